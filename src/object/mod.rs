//! Scene entities layered on top of the raw node tree.
//!
//! Every FBX object carries a class string, an optional subclass string,
//! a signed 64-bit id, and a "full name" that encodes display name and
//! internal class name separated by a `\x00\x01` sentinel pair. Objects
//! reference each other through id-based connections; in memory those
//! become [`ObjectHandle`] indices into the document's object arena, so
//! the document is the sole owner and edges can never leak or dangle.

pub mod animation;
pub mod deformer;
pub mod geometry;
pub mod material;
pub mod model;

pub use animation::{AnimationKind, CurveData, CurveNodeData, StackData};
pub use deformer::{
    BindPoseData, ChannelData, ClusterData, JointMatrices, JointWeight, JointWeights, SkinData,
};
pub use geometry::{
    GeomMeshData, LayerElement, LayerElementDesc, MappingMode, ReferenceMode, ShapeData,
};
pub use material::{MaterialData, TextureData, VideoData};
pub use model::{
    AttributeKind, CameraProperties, CameraType, LightProperties, LightType, ModelData, ModelKind,
};

use crate::tree::NodeId;

/// Separator between display name and class name in a full object name.
pub const FULL_NAME_SEPARATOR: &str = "\u{0}\u{1}";

/// Index of an object inside its document's object arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle(pub(crate) u32);

impl ObjectHandle {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// FBX object class, the name of the node under `Objects`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectClass {
    Unknown,
    NodeAttribute,
    Model,
    Geometry,
    Deformer,
    Pose,
    Video,
    Texture,
    Material,
    AnimationStack,
    AnimationLayer,
    AnimationCurveNode,
    AnimationCurve,
}

impl ObjectClass {
    pub fn from_name(name: &str) -> Self {
        match name {
            "NodeAttribute" => Self::NodeAttribute,
            "Model" => Self::Model,
            "Geometry" => Self::Geometry,
            "Deformer" => Self::Deformer,
            "Pose" => Self::Pose,
            "Video" => Self::Video,
            "Texture" => Self::Texture,
            "Material" => Self::Material,
            "AnimationStack" => Self::AnimationStack,
            "AnimationLayer" => Self::AnimationLayer,
            "AnimationCurveNode" => Self::AnimationCurveNode,
            "AnimationCurve" => Self::AnimationCurve,
            _ => Self::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "",
            Self::NodeAttribute => "NodeAttribute",
            Self::Model => "Model",
            Self::Geometry => "Geometry",
            Self::Deformer => "Deformer",
            Self::Pose => "Pose",
            Self::Video => "Video",
            Self::Texture => "Texture",
            Self::Material => "Material",
            Self::AnimationStack => "AnimationStack",
            Self::AnimationLayer => "AnimationLayer",
            Self::AnimationCurveNode => "AnimationCurveNode",
            Self::AnimationCurve => "AnimationCurve",
        }
    }
}

/// FBX object subclass, the third property of an object node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectSubClass {
    Unknown,
    Null,
    Root,
    LimbNode,
    Light,
    Camera,
    Mesh,
    Shape,
    Skin,
    Cluster,
    BlendShape,
    BlendShapeChannel,
    BindPose,
    Clip,
}

impl ObjectSubClass {
    pub fn from_name(name: &str) -> Self {
        match name {
            "Null" => Self::Null,
            "Root" => Self::Root,
            "LimbNode" => Self::LimbNode,
            "Light" => Self::Light,
            "Camera" => Self::Camera,
            "Mesh" => Self::Mesh,
            "Shape" => Self::Shape,
            "Skin" => Self::Skin,
            "Cluster" => Self::Cluster,
            "BlendShape" => Self::BlendShape,
            "BlendShapeChannel" => Self::BlendShapeChannel,
            "BindPose" => Self::BindPose,
            "Clip" => Self::Clip,
            _ => Self::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Unknown => "",
            Self::Null => "Null",
            Self::Root => "Root",
            Self::LimbNode => "LimbNode",
            Self::Light => "Light",
            Self::Camera => "Camera",
            Self::Mesh => "Mesh",
            Self::Shape => "Shape",
            Self::Skin => "Skin",
            Self::Cluster => "Cluster",
            Self::BlendShape => "BlendShape",
            Self::BlendShapeChannel => "BlendShapeChannel",
            Self::BindPose => "BindPose",
            Self::Clip => "Clip",
        }
    }
}

/// The class string used inside full names. A handful of classes spell
/// their internal name differently from their node name.
pub fn internal_class_name(class: ObjectClass, sub: ObjectSubClass) -> &'static str {
    match (class, sub) {
        (ObjectClass::Deformer, ObjectSubClass::Cluster) => "SubDeformer",
        (ObjectClass::Deformer, ObjectSubClass::BlendShapeChannel) => "SubDeformer",
        (ObjectClass::AnimationStack, _) => "AnimStack",
        (ObjectClass::AnimationLayer, _) => "AnimLayer",
        (ObjectClass::AnimationCurveNode, _) => "AnimCurveNode",
        (ObjectClass::AnimationCurve, _) => "AnimCurve",
        _ => class.name(),
    }
}

/// Build a full name from a display name and an internal class name.
/// Any class part already present in `display` is dropped first.
pub fn make_full_name(display: &str, class_name: &str) -> String {
    let display = display.split('\u{0}').next().unwrap_or("");
    format!("{}{}{}", display, FULL_NAME_SEPARATOR, class_name)
}

/// Split a full name into (display name, class name). Names without the
/// separator come back with an empty class part.
pub fn split_full_name(full: &str) -> (&str, &str) {
    match full.split_once(FULL_NAME_SEPARATOR) {
        Some((display, class)) => (display, class),
        None => (full, ""),
    }
}

pub fn is_full_name(name: &str) -> bool {
    name.contains(FULL_NAME_SEPARATOR)
}

/// One directed edge to a child object, optionally carrying the property
/// name of an OP connection (e.g. a texture bound to "DiffuseColor").
#[derive(Debug, Clone)]
pub struct ObjectLink {
    pub child: ObjectHandle,
    pub property: Option<String>,
}

/// Class-specific payload of an object.
#[derive(Debug, Clone, Default)]
pub enum ObjectData {
    #[default]
    Unknown,
    Attribute(AttributeKind),
    Model(Box<ModelData>),
    GeomMesh(Box<GeomMeshData>),
    Shape(ShapeData),
    Skin(SkinData),
    Cluster(ClusterData),
    BlendShape,
    BlendShapeChannel(ChannelData),
    BindPose(BindPoseData),
    Video(VideoData),
    Texture(TextureData),
    Material(MaterialData),
    AnimationStack(StackData),
    AnimationLayer,
    AnimationCurveNode(CurveNodeData),
    AnimationCurve(CurveData),
}

impl ObjectData {
    /// Default payload for a (class, subclass) pair parsed from a file.
    pub fn new(class: ObjectClass, sub: ObjectSubClass) -> Self {
        match class {
            ObjectClass::NodeAttribute => Self::Attribute(AttributeKind::new(sub)),
            ObjectClass::Model => Self::Model(Box::new(ModelData::new(ModelKind::from_subclass(sub)))),
            ObjectClass::Geometry => match sub {
                ObjectSubClass::Shape => Self::Shape(ShapeData::default()),
                _ => Self::GeomMesh(Box::default()),
            },
            ObjectClass::Deformer => match sub {
                ObjectSubClass::Cluster => Self::Cluster(ClusterData::default()),
                ObjectSubClass::BlendShape => Self::BlendShape,
                ObjectSubClass::BlendShapeChannel => Self::BlendShapeChannel(ChannelData::default()),
                _ => Self::Skin(SkinData::default()),
            },
            ObjectClass::Pose => Self::BindPose(BindPoseData::default()),
            ObjectClass::Video => Self::Video(VideoData::default()),
            ObjectClass::Texture => Self::Texture(TextureData::default()),
            ObjectClass::Material => Self::Material(MaterialData::default()),
            ObjectClass::AnimationStack => Self::AnimationStack(StackData::default()),
            ObjectClass::AnimationLayer => Self::AnimationLayer,
            ObjectClass::AnimationCurveNode => Self::AnimationCurveNode(CurveNodeData::default()),
            ObjectClass::AnimationCurve => Self::AnimationCurve(CurveData::default()),
            ObjectClass::Unknown => Self::Unknown,
        }
    }

    pub fn class(&self) -> ObjectClass {
        match self {
            Self::Unknown => ObjectClass::Unknown,
            Self::Attribute(_) => ObjectClass::NodeAttribute,
            Self::Model(_) => ObjectClass::Model,
            Self::GeomMesh(_) | Self::Shape(_) => ObjectClass::Geometry,
            Self::Skin(_) | Self::Cluster(_) | Self::BlendShape | Self::BlendShapeChannel(_) => {
                ObjectClass::Deformer
            }
            Self::BindPose(_) => ObjectClass::Pose,
            Self::Video(_) => ObjectClass::Video,
            Self::Texture(_) => ObjectClass::Texture,
            Self::Material(_) => ObjectClass::Material,
            Self::AnimationStack(_) => ObjectClass::AnimationStack,
            Self::AnimationLayer => ObjectClass::AnimationLayer,
            Self::AnimationCurveNode(_) => ObjectClass::AnimationCurveNode,
            Self::AnimationCurve(_) => ObjectClass::AnimationCurve,
        }
    }

    pub fn sub_class(&self) -> ObjectSubClass {
        match self {
            Self::Attribute(kind) => kind.sub_class(),
            Self::Model(m) => m.kind.sub_class(),
            Self::GeomMesh(_) => ObjectSubClass::Mesh,
            Self::Shape(_) => ObjectSubClass::Shape,
            Self::Skin(_) => ObjectSubClass::Skin,
            Self::Cluster(_) => ObjectSubClass::Cluster,
            Self::BlendShape => ObjectSubClass::BlendShape,
            Self::BlendShapeChannel(_) => ObjectSubClass::BlendShapeChannel,
            Self::BindPose(_) => ObjectSubClass::BindPose,
            Self::Video(_) => ObjectSubClass::Clip,
            _ => ObjectSubClass::Unknown,
        }
    }
}

/// One scene entity owned by the document's object arena.
#[derive(Debug, Clone)]
pub struct Object {
    pub(crate) id: i64,
    pub(crate) name: String,
    pub(crate) node: Option<NodeId>,
    pub(crate) parents: Vec<ObjectHandle>,
    pub(crate) children: Vec<ObjectLink>,
    pub(crate) data: ObjectData,
    pub(crate) dead: bool,
}

impl Object {
    pub(crate) fn new(id: i64, data: ObjectData, display_name: &str) -> Self {
        let name = make_full_name(
            display_name,
            internal_class_name(data.class(), data.sub_class()),
        );
        Self {
            id,
            name,
            node: None,
            parents: Vec::new(),
            children: Vec::new(),
            data,
            dead: false,
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    /// The full name, display and class joined by the `\x00\x01` pair.
    pub fn full_name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> &str {
        split_full_name(&self.name).0
    }

    pub fn class(&self) -> ObjectClass {
        self.data.class()
    }

    pub fn sub_class(&self) -> ObjectSubClass {
        self.data.sub_class()
    }

    /// Backing node in the document tree, once attached or exported.
    pub fn node(&self) -> Option<NodeId> {
        self.node
    }

    pub fn parents(&self) -> &[ObjectHandle] {
        &self.parents
    }

    pub fn children(&self) -> &[ObjectLink] {
        &self.children
    }

    pub fn child_handles(&self) -> impl Iterator<Item = ObjectHandle> + '_ {
        self.children.iter().map(|l| l.child)
    }

    pub fn data(&self) -> &ObjectData {
        &self.data
    }

    // -- typed payload accessors --

    pub fn as_model(&self) -> Option<&ModelData> {
        match &self.data {
            ObjectData::Model(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_model_mut(&mut self) -> Option<&mut ModelData> {
        match &mut self.data {
            ObjectData::Model(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_geom_mesh(&self) -> Option<&GeomMeshData> {
        match &self.data {
            ObjectData::GeomMesh(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_geom_mesh_mut(&mut self) -> Option<&mut GeomMeshData> {
        match &mut self.data {
            ObjectData::GeomMesh(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_shape(&self) -> Option<&ShapeData> {
        match &self.data {
            ObjectData::Shape(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_shape_mut(&mut self) -> Option<&mut ShapeData> {
        match &mut self.data {
            ObjectData::Shape(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_skin(&self) -> Option<&SkinData> {
        match &self.data {
            ObjectData::Skin(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_cluster(&self) -> Option<&ClusterData> {
        match &self.data {
            ObjectData::Cluster(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_cluster_mut(&mut self) -> Option<&mut ClusterData> {
        match &mut self.data {
            ObjectData::Cluster(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_channel(&self) -> Option<&ChannelData> {
        match &self.data {
            ObjectData::BlendShapeChannel(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_channel_mut(&mut self) -> Option<&mut ChannelData> {
        match &mut self.data {
            ObjectData::BlendShapeChannel(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_bind_pose(&self) -> Option<&BindPoseData> {
        match &self.data {
            ObjectData::BindPose(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_bind_pose_mut(&mut self) -> Option<&mut BindPoseData> {
        match &mut self.data {
            ObjectData::BindPose(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_video(&self) -> Option<&VideoData> {
        match &self.data {
            ObjectData::Video(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_video_mut(&mut self) -> Option<&mut VideoData> {
        match &mut self.data {
            ObjectData::Video(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_texture(&self) -> Option<&TextureData> {
        match &self.data {
            ObjectData::Texture(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_material(&self) -> Option<&MaterialData> {
        match &self.data {
            ObjectData::Material(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_material_mut(&mut self) -> Option<&mut MaterialData> {
        match &mut self.data {
            ObjectData::Material(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_stack(&self) -> Option<&StackData> {
        match &self.data {
            ObjectData::AnimationStack(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_curve_node(&self) -> Option<&CurveNodeData> {
        match &self.data {
            ObjectData::AnimationCurveNode(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_curve(&self) -> Option<&CurveData> {
        match &self.data {
            ObjectData::AnimationCurve(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_curve_mut(&mut self) -> Option<&mut CurveData> {
        match &mut self.data {
            ObjectData::AnimationCurve(c) => Some(c),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_name_round_trip() {
        let full = make_full_name("pCube1", "Model");
        assert_eq!(full, "pCube1\u{0}\u{1}Model");
        assert!(is_full_name(&full));
        assert_eq!(split_full_name(&full), ("pCube1", "Model"));
        assert_eq!(split_full_name("bare"), ("bare", ""));
    }

    #[test]
    fn test_full_name_strips_existing_class() {
        let full = make_full_name("joint1\u{0}\u{1}Model", "SubDeformer");
        assert_eq!(split_full_name(&full), ("joint1", "SubDeformer"));
    }

    #[test]
    fn test_internal_class_names() {
        assert_eq!(
            internal_class_name(ObjectClass::Deformer, ObjectSubClass::Cluster),
            "SubDeformer"
        );
        assert_eq!(
            internal_class_name(ObjectClass::AnimationStack, ObjectSubClass::Unknown),
            "AnimStack"
        );
        assert_eq!(
            internal_class_name(ObjectClass::Model, ObjectSubClass::Mesh),
            "Model"
        );
    }

    #[test]
    fn test_class_name_round_trip() {
        for class in [
            ObjectClass::NodeAttribute,
            ObjectClass::Model,
            ObjectClass::Geometry,
            ObjectClass::Deformer,
            ObjectClass::Pose,
            ObjectClass::Video,
            ObjectClass::Texture,
            ObjectClass::Material,
            ObjectClass::AnimationStack,
            ObjectClass::AnimationLayer,
            ObjectClass::AnimationCurveNode,
            ObjectClass::AnimationCurve,
        ] {
            assert_eq!(ObjectClass::from_name(class.name()), class);
        }
        assert_eq!(ObjectClass::from_name("FbxExotic"), ObjectClass::Unknown);
    }

    #[test]
    fn test_data_dispatch() {
        let d = ObjectData::new(ObjectClass::Deformer, ObjectSubClass::Cluster);
        assert_eq!(d.class(), ObjectClass::Deformer);
        assert_eq!(d.sub_class(), ObjectSubClass::Cluster);

        let d = ObjectData::new(ObjectClass::Geometry, ObjectSubClass::Shape);
        assert_eq!(d.sub_class(), ObjectSubClass::Shape);

        let d = ObjectData::new(ObjectClass::Model, ObjectSubClass::LimbNode);
        assert_eq!(d.class(), ObjectClass::Model);
        assert_eq!(d.sub_class(), ObjectSubClass::LimbNode);
    }
}
