//! Transform hierarchy nodes and their attribute payloads.
//!
//! A `Model` carries the TRS state of one scene-graph node. Lights and
//! cameras keep their optical parameters on a companion `NodeAttribute`
//! object connected as a child of the model, matching the file layout.
//! Local and global matrices are cached per model and validated against
//! a document-wide epoch that every transform setter bumps.

use std::cell::Cell;

use crate::tree::{NodeId, NodeTree, Property};
use crate::util::math::{
    compose_transform, DMat4, DVec2, DVec3, RotationOrder, INCH_TO_MILLIMETER, MILLIMETER_TO_INCH,
};

use super::ObjectSubClass;

/// What a model node represents in the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModelKind {
    #[default]
    Null,
    Root,
    LimbNode,
    Mesh,
    Light,
    Camera,
}

impl ModelKind {
    pub fn from_subclass(sub: ObjectSubClass) -> Self {
        match sub {
            ObjectSubClass::Root => Self::Root,
            ObjectSubClass::LimbNode => Self::LimbNode,
            ObjectSubClass::Mesh => Self::Mesh,
            ObjectSubClass::Light => Self::Light,
            ObjectSubClass::Camera => Self::Camera,
            _ => Self::Null,
        }
    }

    pub fn sub_class(self) -> ObjectSubClass {
        match self {
            Self::Null => ObjectSubClass::Null,
            Self::Root => ObjectSubClass::Root,
            Self::LimbNode => ObjectSubClass::LimbNode,
            Self::Mesh => ObjectSubClass::Mesh,
            Self::Light => ObjectSubClass::Light,
            Self::Camera => ObjectSubClass::Camera,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct MatrixCache {
    pub epoch: u64,
    pub local: DMat4,
    pub global: DMat4,
}

/// TRS state of one scene-graph node.
#[derive(Debug, Clone)]
pub struct ModelData {
    pub kind: ModelKind,
    pub visibility: bool,
    pub rotation_order: RotationOrder,
    pub position: DVec3,
    pub pre_rotation: DVec3,
    pub rotation: DVec3,
    pub post_rotation: DVec3,
    pub scale: DVec3,
    pub(crate) cache: Cell<Option<MatrixCache>>,
}

impl Default for ModelData {
    fn default() -> Self {
        Self {
            kind: ModelKind::Null,
            visibility: true,
            rotation_order: RotationOrder::default(),
            position: DVec3::ZERO,
            pre_rotation: DVec3::ZERO,
            rotation: DVec3::ZERO,
            post_rotation: DVec3::ZERO,
            scale: DVec3::ONE,
            cache: Cell::new(None),
        }
    }
}

impl ModelData {
    pub fn new(kind: ModelKind) -> Self {
        Self { kind, ..Self::default() }
    }

    /// Local transform in column-vector convention:
    /// `T * Rpre * R * Rpost * S`.
    pub fn local_matrix(&self) -> DMat4 {
        compose_transform(
            self.position,
            self.pre_rotation,
            self.rotation,
            self.post_rotation,
            self.scale,
            self.rotation_order,
        )
    }
}

/// Light emitter shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LightType {
    #[default]
    Point,
    Directional,
    Spot,
}

impl LightType {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Directional,
            2 => Self::Spot,
            _ => Self::Point,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Point => 0,
            Self::Directional => 1,
            Self::Spot => 2,
        }
    }
}

/// Optical parameters of a light attribute.
#[derive(Debug, Clone)]
pub struct LightProperties {
    pub light_type: LightType,
    pub color: DVec3,
    pub intensity: f64,
    pub inner_angle: f64,
    pub outer_angle: f64,
}

impl Default for LightProperties {
    fn default() -> Self {
        Self {
            light_type: LightType::Point,
            color: DVec3::ONE,
            intensity: 1.0,
            inner_angle: 45.0,
            outer_angle: 45.0,
        }
    }
}

/// Camera projection kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CameraType {
    #[default]
    Perspective,
    Orthographic,
}

/// Optical parameters of a camera attribute. Film sizes are stored in
/// millimeters; the file format carries them in inches.
#[derive(Debug, Clone)]
pub struct CameraProperties {
    pub camera_type: CameraType,
    pub focal_length: f64,
    pub film_width: f64,
    pub film_height: f64,
    pub film_offset: DVec2,
    pub aspect_width: f64,
    pub aspect_height: f64,
    pub near_plane: f64,
    pub far_plane: f64,
}

impl Default for CameraProperties {
    fn default() -> Self {
        Self {
            camera_type: CameraType::Perspective,
            focal_length: 50.0,
            film_width: 36.0,
            film_height: 24.0,
            film_offset: DVec2::ZERO,
            aspect_width: 1920.0,
            aspect_height: 1080.0,
            near_plane: 0.1,
            far_plane: 1000.0,
        }
    }
}

impl CameraProperties {
    /// Horizontal field of view in degrees.
    pub fn fov(&self) -> f64 {
        crate::util::math::compute_fov(self.film_width, self.focal_length)
    }

    /// Set the focal length from a horizontal field of view in degrees.
    pub fn set_fov(&mut self, fov: f64) {
        self.focal_length = crate::util::math::compute_focal_length(fov, self.film_width);
    }
}

/// Payload of a `NodeAttribute` object.
#[derive(Debug, Clone)]
pub enum AttributeKind {
    Null,
    Root,
    LimbNode,
    Light(LightProperties),
    Camera(CameraProperties),
    Generic,
}

impl AttributeKind {
    pub fn new(sub: ObjectSubClass) -> Self {
        match sub {
            ObjectSubClass::Null => Self::Null,
            ObjectSubClass::Root => Self::Root,
            ObjectSubClass::LimbNode => Self::LimbNode,
            ObjectSubClass::Light => Self::Light(LightProperties::default()),
            ObjectSubClass::Camera => Self::Camera(CameraProperties::default()),
            _ => Self::Generic,
        }
    }

    pub fn sub_class(&self) -> ObjectSubClass {
        match self {
            Self::Null => ObjectSubClass::Null,
            Self::Root => ObjectSubClass::Root,
            Self::LimbNode => ObjectSubClass::LimbNode,
            Self::Light(_) => ObjectSubClass::Light,
            Self::Camera(_) => ObjectSubClass::Camera,
            Self::Generic => ObjectSubClass::Unknown,
        }
    }
}

// -- node translation --

pub(crate) fn read_model(tree: &NodeTree, node: NodeId, kind: ModelKind) -> ModelData {
    let mut m = ModelData::new(kind);
    if let Some(v) = tree.prop70_f64(node, "Visibility") {
        m.visibility = v != 0.0;
    }
    if let Some(code) = tree.prop70_i32(node, "RotationOrder") {
        m.rotation_order = RotationOrder::from_code(code);
    }
    if let Some(v) = tree.prop70_dvec3(node, "Lcl Translation") {
        m.position = v;
    }
    if let Some(v) = tree.prop70_dvec3(node, "PreRotation") {
        m.pre_rotation = v;
    }
    if let Some(v) = tree.prop70_dvec3(node, "Lcl Rotation") {
        m.rotation = v;
    }
    if let Some(v) = tree.prop70_dvec3(node, "PostRotation") {
        m.post_rotation = v;
    }
    if let Some(v) = tree.prop70_dvec3(node, "Lcl Scaling") {
        m.scale = v;
    }
    m
}

pub(crate) fn write_model(tree: &mut NodeTree, node: NodeId, m: &ModelData) {
    tree.leaf1(node, "Version", 232i32);
    let block = tree.create_child(node, "Properties70");
    if m.rotation_order != RotationOrder::Xyz {
        tree.p70(block, "RotationOrder", "RotationOrder", "", "A+",
            vec![m.rotation_order.code().into()]);
    }
    if m.position != DVec3::ZERO {
        tree.p70(block, "Lcl Translation", "Lcl Translation", "", "A+",
            dvec3_values(m.position));
    }
    if m.pre_rotation != DVec3::ZERO {
        tree.p70(block, "PreRotation", "Vector3D", "Vector", "A+",
            dvec3_values(m.pre_rotation));
    }
    if m.rotation != DVec3::ZERO {
        tree.p70(block, "Lcl Rotation", "Lcl Rotation", "", "A+",
            dvec3_values(m.rotation));
    }
    if m.post_rotation != DVec3::ZERO {
        tree.p70(block, "PostRotation", "Vector3D", "Vector", "A+",
            dvec3_values(m.post_rotation));
    }
    if m.scale != DVec3::ONE {
        tree.p70(block, "Lcl Scaling", "Lcl Scaling", "", "A+",
            dvec3_values(m.scale));
    }
    if !m.visibility {
        tree.p70(block, "Visibility", "Visibility", "", "A+", vec![0.0f64.into()]);
    }
}

pub(crate) fn read_light(tree: &NodeTree, node: NodeId) -> LightProperties {
    let mut l = LightProperties::default();
    if let Some(code) = tree.prop70_i32(node, "LightType") {
        l.light_type = LightType::from_code(code);
    }
    if let Some(c) = tree.prop70_dvec3(node, "Color") {
        l.color = c;
    }
    if let Some(v) = tree.prop70_f64(node, "Intensity") {
        l.intensity = v;
    }
    if let Some(v) = tree.prop70_f64(node, "InnerAngle") {
        l.inner_angle = v;
    }
    if let Some(v) = tree.prop70_f64(node, "OuterAngle") {
        l.outer_angle = v;
    }
    l
}

pub(crate) fn write_light(tree: &mut NodeTree, node: NodeId, l: &LightProperties) {
    tree.leaf1(node, "TypeFlags", "Light");
    tree.leaf1(node, "GeometryVersion", 124i32);
    let block = tree.create_child(node, "Properties70");
    tree.p70(block, "LightType", "enum", "", "A", vec![l.light_type.code().into()]);
    tree.p70(block, "Color", "Color", "", "A", dvec3_values(l.color));
    tree.p70(block, "Intensity", "Number", "", "A", vec![l.intensity.into()]);
    if l.light_type == LightType::Spot {
        tree.p70(block, "InnerAngle", "Number", "", "A", vec![l.inner_angle.into()]);
        tree.p70(block, "OuterAngle", "Number", "", "A", vec![l.outer_angle.into()]);
    }
}

pub(crate) fn read_camera(tree: &NodeTree, node: NodeId) -> CameraProperties {
    let mut c = CameraProperties::default();
    if tree.prop70_i32(node, "CameraProjectionType") == Some(1) {
        c.camera_type = CameraType::Orthographic;
    }
    if let Some(v) = tree.prop70_f64(node, "FocalLength") {
        c.focal_length = v;
    }
    if let Some(v) = tree.prop70_f64(node, "FilmWidth") {
        c.film_width = v * INCH_TO_MILLIMETER;
    }
    if let Some(v) = tree.prop70_f64(node, "FilmHeight") {
        c.film_height = v * INCH_TO_MILLIMETER;
    }
    if let Some(v) = tree.prop70_f64(node, "FilmOffsetX") {
        c.film_offset.x = v * INCH_TO_MILLIMETER;
    }
    if let Some(v) = tree.prop70_f64(node, "FilmOffsetY") {
        c.film_offset.y = v * INCH_TO_MILLIMETER;
    }
    if let Some(v) = tree.prop70_f64(node, "AspectWidth") {
        c.aspect_width = v;
    }
    if let Some(v) = tree.prop70_f64(node, "AspectHeight") {
        c.aspect_height = v;
    }
    if let Some(v) = tree.prop70_f64(node, "NearPlane") {
        c.near_plane = v;
    }
    if let Some(v) = tree.prop70_f64(node, "FarPlane") {
        c.far_plane = v;
    }
    c
}

pub(crate) fn write_camera(tree: &mut NodeTree, node: NodeId, c: &CameraProperties) {
    tree.leaf1(node, "TypeFlags", "Camera");
    tree.leaf1(node, "GeometryVersion", 124i32);
    let block = tree.create_child(node, "Properties70");
    if c.camera_type == CameraType::Orthographic {
        tree.p70(block, "CameraProjectionType", "enum", "", "A", vec![1i32.into()]);
    }
    tree.p70(block, "FocalLength", "Number", "", "A", vec![c.focal_length.into()]);
    tree.p70(block, "FilmWidth", "Number", "", "A",
        vec![(c.film_width * MILLIMETER_TO_INCH).into()]);
    tree.p70(block, "FilmHeight", "Number", "", "A",
        vec![(c.film_height * MILLIMETER_TO_INCH).into()]);
    if c.film_offset.x != 0.0 {
        tree.p70(block, "FilmOffsetX", "Number", "", "A",
            vec![(c.film_offset.x * MILLIMETER_TO_INCH).into()]);
    }
    if c.film_offset.y != 0.0 {
        tree.p70(block, "FilmOffsetY", "Number", "", "A",
            vec![(c.film_offset.y * MILLIMETER_TO_INCH).into()]);
    }
    tree.p70(block, "AspectWidth", "Number", "", "A", vec![c.aspect_width.into()]);
    tree.p70(block, "AspectHeight", "Number", "", "A", vec![c.aspect_height.into()]);
    tree.p70(block, "NearPlane", "Number", "", "A", vec![c.near_plane.into()]);
    tree.p70(block, "FarPlane", "Number", "", "A", vec![c.far_plane.into()]);
}

fn dvec3_values(v: DVec3) -> Vec<Property> {
    vec![v.x.into(), v.y.into(), v.z.into()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_defaults() {
        let m = ModelData::default();
        assert!(m.visibility);
        assert_eq!(m.scale, DVec3::ONE);
        assert_eq!(m.local_matrix(), DMat4::IDENTITY);
    }

    #[test]
    fn test_model_node_round_trip() {
        let mut tree = NodeTree::new();
        let node = tree.create_root("Model");
        let mut m = ModelData::new(ModelKind::Mesh);
        m.position = DVec3::new(1.0, 2.0, 3.0);
        m.rotation = DVec3::new(0.0, 90.0, 0.0);
        m.rotation_order = RotationOrder::Zxy;
        m.scale = DVec3::splat(2.0);
        m.visibility = false;
        write_model(&mut tree, node, &m);

        let back = read_model(&tree, node, ModelKind::Mesh);
        assert_eq!(back.position, m.position);
        assert_eq!(back.rotation, m.rotation);
        assert_eq!(back.rotation_order, RotationOrder::Zxy);
        assert_eq!(back.scale, m.scale);
        assert!(!back.visibility);
    }

    #[test]
    fn test_camera_film_units() {
        let mut tree = NodeTree::new();
        let node = tree.create_root("NodeAttribute");
        let c = CameraProperties::default();
        write_camera(&mut tree, node, &c);

        // 36mm film back is stored in inches on disk
        let stored = tree.prop70_f64(node, "FilmWidth").unwrap();
        assert!((stored - 36.0 / 25.4).abs() < 1e-9);

        let back = read_camera(&tree, node);
        assert!((back.film_width - 36.0).abs() < 1e-9);
        assert!((back.film_height - 24.0).abs() < 1e-9);
    }

    #[test]
    fn test_light_round_trip() {
        let mut tree = NodeTree::new();
        let node = tree.create_root("NodeAttribute");
        let mut l = LightProperties::default();
        l.light_type = LightType::Spot;
        l.color = DVec3::new(1.0, 0.5, 0.25);
        l.intensity = 2.5;
        l.outer_angle = 60.0;
        write_light(&mut tree, node, &l);

        let back = read_light(&tree, node);
        assert_eq!(back.light_type, LightType::Spot);
        assert_eq!(back.color, l.color);
        assert_eq!(back.intensity, 2.5);
        assert_eq!(back.outer_angle, 60.0);
    }
}
