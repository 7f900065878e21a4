//! The FBX document: object arena, connection graph, and file API.
//!
//! A [`Document`] owns the raw node tree and the object arena built from
//! it. Objects address each other through [`ObjectHandle`] indices; the
//! flat connection list mirrors the per-object edge lists so reverse and
//! property-tagged lookups stay cheap. Reading replaces the document
//! contents; writing rebuilds the node tree from the object arena.

mod export;
mod import;

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::Path;

use smallvec::SmallVec;
use tracing::warn;

use crate::object::{
    animation::AnimationKind,
    deformer::{
        build_joint_weights, deform_normals, deform_points, fixed_joint_weights,
        apply_morph_normals, apply_morph_points,
    },
    model::MatrixCache,
    AttributeKind, CameraProperties, ClusterData, CurveData, JointMatrices, JointWeights,
    LightProperties, ModelKind, Object, ObjectClass, ObjectData, ObjectHandle, ObjectLink,
    ObjectSubClass,
};
use crate::tree::{ascii, binary, Node, NodeId, NodeTree};
use crate::util::math::{DMat4, DVec3, TICKS_PER_SECOND};
use crate::util::{Error, Result};

/// FBX file format version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FileVersion(pub u32);

impl FileVersion {
    pub const FBX_2014: Self = Self(7400);
    pub const FBX_2016: Self = Self(7500);
    pub const FBX_2020: Self = Self(7700);
}

impl Default for FileVersion {
    fn default() -> Self {
        Self::FBX_2016
    }
}

/// Connection flavor: plain parent/child or a property binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionKind {
    OO,
    OP,
}

/// One edge of the object graph, as stored in the file's `Connections`
/// block.
#[derive(Debug, Clone)]
pub struct Connection {
    pub child: ObjectHandle,
    pub parent: ObjectHandle,
    pub kind: ConnectionKind,
    pub property: Option<String>,
}

/// Scene-wide settings from the `GlobalSettings` block.
#[derive(Debug, Clone)]
pub struct GlobalSettings {
    pub up_axis: i32,
    pub up_axis_sign: i32,
    pub unit_scale: f64,
    pub original_unit_scale: f64,
    pub frame_rate: f64,
    pub camera: String,
    /// End of the default time span, in ticks.
    pub time_stop: i64,
    /// Path of the file this document was read from, if any.
    pub path: String,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            up_axis: 1,
            up_axis_sign: 1,
            unit_scale: 1.0,
            original_unit_scale: 1.0,
            frame_rate: 60.0,
            camera: "Producer Perspective".to_string(),
            time_stop: TICKS_PER_SECOND,
            path: String::new(),
        }
    }
}

/// An FBX scene document.
pub struct Document {
    pub(crate) tree: NodeTree,
    pub(crate) objects: Vec<Object>,
    pub(crate) by_id: HashMap<i64, ObjectHandle>,
    pub(crate) anim_stacks: Vec<ObjectHandle>,
    pub(crate) root_model: ObjectHandle,
    pub(crate) current_take: Option<ObjectHandle>,
    pub(crate) connections: Vec<Connection>,
    pub(crate) global_settings: GlobalSettings,
    pub(crate) version: FileVersion,
    pub(crate) next_id: i64,
    pub(crate) model_epoch: u64,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create an empty document holding only the root model.
    pub fn new() -> Self {
        let mut doc = Self {
            tree: NodeTree::new(),
            objects: Vec::new(),
            by_id: HashMap::new(),
            anim_stacks: Vec::new(),
            root_model: ObjectHandle(0),
            current_take: None,
            connections: Vec::new(),
            global_settings: GlobalSettings::default(),
            version: FileVersion::default(),
            next_id: 1,
            model_epoch: 0,
        };
        doc.root_model = doc.alloc_object(
            0,
            ObjectData::Model(Box::new(crate::object::ModelData::new(ModelKind::Root))),
            "Scene",
        );
        doc
    }

    /// Drop all contents and return to the freshly-created state.
    pub fn unload(&mut self) {
        *self = Self::new();
    }

    // -- reading --

    /// Parse a document from bytes, replacing the current contents. The
    /// first byte decides the codec: `;` means ASCII, anything else the
    /// binary container. On error the document is left empty but valid.
    pub fn read(&mut self, data: &[u8]) -> Result<()> {
        self.unload();
        let result = if data.first() == Some(&b';') {
            let text = std::str::from_utf8(data)
                .map_err(|e| Error::invalid(format!("ascii document is not utf-8: {e}")))?;
            ascii::read_document(text, &mut self.tree)
        } else {
            binary::read_document(data, &mut self.tree)
        };
        let version = match result {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "document parse failed");
                self.unload();
                return Err(e);
            }
        };
        self.version = FileVersion(version);
        if let Err(e) = import::import(self) {
            warn!(error = %e, "document import failed");
            self.unload();
            return Err(e);
        }
        Ok(())
    }

    /// Parse a document from a reader.
    pub fn read_from(&mut self, mut reader: impl Read) -> Result<()> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        self.read(&data)
    }

    /// Parse a document from a file.
    pub fn read_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let data = fs::read(path)?;
        self.read(&data)?;
        self.global_settings.path = path.display().to_string();
        Ok(())
    }

    // -- writing --

    /// Serialize to the binary container format.
    pub fn write_binary(&mut self) -> Result<Vec<u8>> {
        self.export_fbx_nodes();
        binary::write_document(&self.tree, self.version.0)
    }

    pub fn write_binary_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let data = self.write_binary()?;
        fs::write(path, data)?;
        Ok(())
    }

    /// Serialize to the ASCII text format.
    pub fn write_ascii(&mut self) -> Result<String> {
        self.export_fbx_nodes();
        Ok(ascii::write_document(&self.tree, self.version.0))
    }

    pub fn write_ascii_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let text = self.write_ascii()?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Rebuild the raw node tree from the object arena. Called by the
    /// writers; exposed for callers that want the tree itself.
    pub fn export_fbx_nodes(&mut self) {
        export::export(self);
    }

    // -- object arena --

    pub(crate) fn alloc_object(&mut self, id: i64, data: ObjectData, name: &str) -> ObjectHandle {
        let h = ObjectHandle(self.objects.len() as u32);
        if matches!(data, ObjectData::AnimationStack(_)) {
            self.anim_stacks.push(h);
        }
        self.by_id.insert(id, h);
        self.objects.push(Object::new(id, data, name));
        h
    }

    pub(crate) fn take_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Create an object of the given class and subclass.
    pub fn create_object(
        &mut self,
        class: ObjectClass,
        sub: ObjectSubClass,
        name: &str,
    ) -> ObjectHandle {
        let id = self.take_id();
        self.alloc_object(id, ObjectData::new(class, sub), name)
    }

    /// Create a model node and attach it to the root model.
    pub fn create_model(&mut self, kind: ModelKind, name: &str) -> ObjectHandle {
        let h = self.create_object(ObjectClass::Model, kind.sub_class(), name);
        self.add_child(self.root_model, h);
        h
    }

    pub fn create_geom_mesh(&mut self, name: &str) -> ObjectHandle {
        self.create_object(ObjectClass::Geometry, ObjectSubClass::Mesh, name)
    }

    pub fn create_shape(&mut self, name: &str) -> ObjectHandle {
        self.create_object(ObjectClass::Geometry, ObjectSubClass::Shape, name)
    }

    pub fn create_skin(&mut self, name: &str) -> ObjectHandle {
        self.create_object(ObjectClass::Deformer, ObjectSubClass::Skin, name)
    }

    pub fn create_material(&mut self, name: &str) -> ObjectHandle {
        self.create_object(ObjectClass::Material, ObjectSubClass::Unknown, name)
    }

    pub fn create_animation_stack(&mut self, name: &str) -> ObjectHandle {
        self.create_object(ObjectClass::AnimationStack, ObjectSubClass::Unknown, name)
    }

    pub fn create_animation_layer(&mut self, stack: ObjectHandle, name: &str) -> ObjectHandle {
        let h = self.create_object(ObjectClass::AnimationLayer, ObjectSubClass::Unknown, name);
        self.add_child(stack, h);
        h
    }

    /// Create a cluster under `skin` bound to `joint`. Returns `None`
    /// when `joint` is not a model.
    pub fn create_cluster(&mut self, skin: ObjectHandle, joint: ObjectHandle) -> Option<ObjectHandle> {
        if self.object(joint).as_model().is_none() {
            return None;
        }
        let name = self.object(joint).display_name().to_string();
        let h = self.create_object(ObjectClass::Deformer, ObjectSubClass::Cluster, &name);
        self.add_child(skin, h);
        self.add_child(h, joint);
        Some(h)
    }

    pub fn object(&self, h: ObjectHandle) -> &Object {
        &self.objects[h.index()]
    }

    pub fn object_mut(&mut self, h: ObjectHandle) -> &mut Object {
        &mut self.objects[h.index()]
    }

    /// Live objects, in creation order.
    pub fn objects(&self) -> impl Iterator<Item = (ObjectHandle, &Object)> {
        self.objects
            .iter()
            .enumerate()
            .filter(|(_, o)| !o.dead)
            .map(|(i, o)| (ObjectHandle(i as u32), o))
    }

    pub fn find_object_by_id(&self, id: i64) -> Option<ObjectHandle> {
        let h = *self.by_id.get(&id)?;
        (!self.objects[h.index()].dead).then_some(h)
    }

    /// Find by display name or full name.
    pub fn find_object_by_name(&self, name: &str) -> Option<ObjectHandle> {
        self.objects()
            .find(|(_, o)| o.display_name() == name || o.full_name() == name)
            .map(|(h, _)| h)
    }

    pub fn root_model(&self) -> ObjectHandle {
        self.root_model
    }

    /// Remove an object from the arena, severing every edge.
    pub fn erase_object(&mut self, h: ObjectHandle) {
        let parents = self.objects[h.index()].parents.clone();
        let children: Vec<ObjectHandle> =
            self.objects[h.index()].children.iter().map(|l| l.child).collect();
        for p in parents {
            self.erase_child(p, h);
        }
        for c in children {
            self.erase_child(h, c);
        }
        let obj = &mut self.objects[h.index()];
        obj.dead = true;
        let id = obj.id;
        self.by_id.remove(&id);
        self.anim_stacks.retain(|&s| s != h);
        if self.current_take == Some(h) {
            self.current_take = None;
        }
        self.model_epoch += 1;
    }

    // -- connections --

    /// Connect `child` under `parent` with a plain OO connection.
    pub fn add_child(&mut self, parent: ObjectHandle, child: ObjectHandle) {
        self.link(parent, child, None);
    }

    /// Connect `child` under `parent` with an OP connection bound to a
    /// property name.
    pub fn add_child_prop(&mut self, parent: ObjectHandle, child: ObjectHandle, property: &str) {
        self.link(parent, child, Some(property.to_string()));
    }

    fn link(&mut self, parent: ObjectHandle, child: ObjectHandle, property: Option<String>) {
        let kind = if property.is_some() { ConnectionKind::OP } else { ConnectionKind::OO };
        self.objects[parent.index()]
            .children
            .push(ObjectLink { child, property: property.clone() });
        self.objects[child.index()].parents.push(parent);
        self.connections.push(Connection { child, parent, kind, property });
        self.after_edge_change(parent);
    }

    /// Sever one parent/child edge and its flat-list entry.
    pub fn erase_child(&mut self, parent: ObjectHandle, child: ObjectHandle) {
        self.objects[parent.index()].children.retain(|l| l.child != child);
        self.objects[child.index()].parents.retain(|&p| p != parent);
        if let Some(i) = self
            .connections
            .iter()
            .position(|c| c.parent == parent && c.child == child)
        {
            self.connections.remove(i);
        }
        self.after_edge_change(parent);
    }

    fn after_edge_change(&mut self, parent: ObjectHandle) {
        if let ObjectData::Skin(s) = &self.objects[parent.index()].data {
            s.invalidate();
        }
        self.model_epoch += 1;
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    // -- settings and metadata --

    pub fn global_settings(&self) -> &GlobalSettings {
        &self.global_settings
    }

    pub fn global_settings_mut(&mut self) -> &mut GlobalSettings {
        &mut self.global_settings
    }

    pub fn file_version(&self) -> FileVersion {
        self.version
    }

    pub fn set_file_version(&mut self, v: FileVersion) {
        self.version = v;
    }

    // -- raw node helpers --

    pub fn create_node(&mut self, name: &str) -> NodeId {
        self.tree.create_root(name)
    }

    pub fn find_node(&self, name: &str) -> Option<NodeId> {
        self.tree.find_root(name)
    }

    pub fn root_nodes(&self) -> &[NodeId] {
        self.tree.roots()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        self.tree.get(id)
    }

    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut NodeTree {
        &mut self.tree
    }

    // -- model transforms --

    /// First parent that is a model.
    pub fn model_parent(&self, h: ObjectHandle) -> Option<ObjectHandle> {
        self.objects[h.index()]
            .parents
            .iter()
            .copied()
            .find(|&p| self.objects[p.index()].as_model().is_some())
    }

    fn matrices(&self, h: ObjectHandle) -> MatrixCache {
        let Some(model) = self.objects[h.index()].as_model() else {
            return MatrixCache {
                epoch: self.model_epoch,
                local: DMat4::IDENTITY,
                global: DMat4::IDENTITY,
            };
        };
        if let Some(c) = model.cache.get() {
            if c.epoch == self.model_epoch {
                return c;
            }
        }
        let local = model.local_matrix();
        let global = match self.model_parent(h) {
            Some(p) => self.matrices(p).global * local,
            None => local,
        };
        let c = MatrixCache { epoch: self.model_epoch, local, global };
        model.cache.set(Some(c));
        c
    }

    /// Local transform of a model, `T * Rpre * R * Rpost * S`.
    pub fn local_matrix(&self, h: ObjectHandle) -> DMat4 {
        self.matrices(h).local
    }

    /// World transform: parent global times local, cached until any
    /// transform or edge changes.
    pub fn global_matrix(&self, h: ObjectHandle) -> DMat4 {
        self.matrices(h).global
    }

    /// `/`-joined path of display names from the root model.
    pub fn get_path(&self, h: ObjectHandle) -> String {
        if h == self.root_model {
            return String::new();
        }
        let mut path = self.model_parent(h).map(|p| self.get_path(p)).unwrap_or_default();
        path.push('/');
        path.push_str(self.objects[h.index()].display_name());
        path
    }

    fn touch_model<F: FnOnce(&mut crate::object::ModelData)>(&mut self, h: ObjectHandle, f: F) {
        if let Some(m) = self.objects[h.index()].as_model_mut() {
            f(m);
            self.model_epoch += 1;
        }
    }

    pub fn set_position(&mut self, h: ObjectHandle, v: DVec3) {
        self.touch_model(h, |m| m.position = v);
    }

    pub fn set_rotation(&mut self, h: ObjectHandle, v: DVec3) {
        self.touch_model(h, |m| m.rotation = v);
    }

    pub fn set_pre_rotation(&mut self, h: ObjectHandle, v: DVec3) {
        self.touch_model(h, |m| m.pre_rotation = v);
    }

    pub fn set_post_rotation(&mut self, h: ObjectHandle, v: DVec3) {
        self.touch_model(h, |m| m.post_rotation = v);
    }

    pub fn set_scale(&mut self, h: ObjectHandle, v: DVec3) {
        self.touch_model(h, |m| m.scale = v);
    }

    pub fn set_rotation_order(&mut self, h: ObjectHandle, order: crate::util::math::RotationOrder) {
        self.touch_model(h, |m| m.rotation_order = order);
    }

    pub fn set_visibility(&mut self, h: ObjectHandle, v: bool) {
        self.touch_model(h, |m| m.visibility = v);
    }

    // -- attribute-backed model payloads --

    fn attribute_child(&self, model: ObjectHandle) -> Option<ObjectHandle> {
        self.objects[model.index()]
            .children
            .iter()
            .map(|l| l.child)
            .find(|&c| matches!(self.objects[c.index()].data, ObjectData::Attribute(_)))
    }

    /// Light parameters of a light model, from its attribute child.
    pub fn light_properties(&self, model: ObjectHandle) -> Option<&LightProperties> {
        let attr = self.attribute_child(model)?;
        match &self.objects[attr.index()].data {
            ObjectData::Attribute(AttributeKind::Light(p)) => Some(p),
            _ => None,
        }
    }

    pub fn light_properties_mut(&mut self, model: ObjectHandle) -> Option<&mut LightProperties> {
        let attr = self.attribute_child(model)?;
        match &mut self.objects[attr.index()].data {
            ObjectData::Attribute(AttributeKind::Light(p)) => Some(p),
            _ => None,
        }
    }

    /// Camera parameters of a camera model, from its attribute child.
    pub fn camera_properties(&self, model: ObjectHandle) -> Option<&CameraProperties> {
        let attr = self.attribute_child(model)?;
        match &self.objects[attr.index()].data {
            ObjectData::Attribute(AttributeKind::Camera(p)) => Some(p),
            _ => None,
        }
    }

    pub fn camera_properties_mut(&mut self, model: ObjectHandle) -> Option<&mut CameraProperties> {
        let attr = self.attribute_child(model)?;
        match &mut self.objects[attr.index()].data {
            ObjectData::Attribute(AttributeKind::Camera(p)) => Some(p),
            _ => None,
        }
    }

    // -- mesh relationships --

    /// Geometry child of a mesh model.
    pub fn geometry_of(&self, model: ObjectHandle) -> Option<ObjectHandle> {
        self.objects[model.index()]
            .children
            .iter()
            .map(|l| l.child)
            .find(|&c| self.objects[c.index()].class() == ObjectClass::Geometry)
    }

    /// Material children of a mesh model, in connection order.
    pub fn materials_of(&self, model: ObjectHandle) -> Vec<ObjectHandle> {
        self.objects[model.index()]
            .children
            .iter()
            .map(|l| l.child)
            .filter(|&c| self.objects[c.index()].class() == ObjectClass::Material)
            .collect()
    }

    /// Deformer children of a geometry, in connection order.
    pub fn deformers_of(&self, geom: ObjectHandle) -> Vec<ObjectHandle> {
        self.objects[geom.index()]
            .children
            .iter()
            .map(|l| l.child)
            .filter(|&c| self.objects[c.index()].class() == ObjectClass::Deformer)
            .collect()
    }

    pub fn skin_of(&self, geom: ObjectHandle) -> Option<ObjectHandle> {
        self.deformers_of(geom)
            .into_iter()
            .find(|&d| self.objects[d.index()].as_skin().is_some())
    }

    /// Cluster children of a skin, in connection order.
    pub fn clusters_of(&self, skin: ObjectHandle) -> Vec<ObjectHandle> {
        self.objects[skin.index()]
            .children
            .iter()
            .map(|l| l.child)
            .filter(|&c| self.objects[c.index()].as_cluster().is_some())
            .collect()
    }

    /// The model a cluster is bound to.
    pub fn cluster_joint(&self, cluster: ObjectHandle) -> Option<ObjectHandle> {
        self.objects[cluster.index()]
            .children
            .iter()
            .map(|l| l.child)
            .find(|&c| self.objects[c.index()].as_model().is_some())
    }

    /// Pixel source of a texture: its video child, when connected.
    pub fn texture_video(&self, texture: ObjectHandle) -> Option<&crate::object::VideoData> {
        let v = self.objects[texture.index()]
            .children
            .iter()
            .map(|l| l.child)
            .find(|&c| self.objects[c.index()].as_video().is_some())?;
        self.objects[v.index()].as_video()
    }

    // -- skinning --

    /// Per-vertex joint weights of a skin, built once and cached until a
    /// cluster is added or removed.
    pub fn joint_weights(&self, skin: ObjectHandle) -> JointWeights {
        let ObjectData::Skin(data) = &self.objects[skin.index()].data else {
            return JointWeights::default();
        };
        if let Some(jw) = data.weights_cache.borrow().as_ref() {
            return jw.clone();
        }
        let point_count = self.skin_point_count(skin);
        let clusters = self.clusters_of(skin);
        let cluster_data: Vec<&ClusterData> = clusters
            .iter()
            .filter_map(|&c| self.objects[c.index()].as_cluster())
            .collect();
        let jw = build_joint_weights(&cluster_data, point_count);
        *data.weights_cache.borrow_mut() = Some(jw.clone());
        jw
    }

    /// Densified joint weights with exactly `joints_per_vertex` slots.
    pub fn fixed_joint_weights(&self, skin: ObjectHandle, joints_per_vertex: usize) -> JointWeights {
        fixed_joint_weights(&self.joint_weights(skin), joints_per_vertex)
    }

    /// Per-cluster skinning matrices. A cluster without a model child
    /// contributes identity.
    pub fn joint_matrices(&self, skin: ObjectHandle) -> JointMatrices {
        let ObjectData::Skin(data) = &self.objects[skin.index()].data else {
            return JointMatrices::default();
        };
        if let Some(jm) = data.matrices_cache.borrow().as_ref() {
            return jm.clone();
        }
        let mut jm = JointMatrices::default();
        for cluster in self.clusters_of(skin) {
            let Some(c) = self.objects[cluster.index()].as_cluster() else {
                continue;
            };
            let global = match self.cluster_joint(cluster) {
                Some(joint) => self.global_matrix(joint),
                None => {
                    warn!(
                        cluster = self.objects[cluster.index()].display_name(),
                        "cluster has no model child"
                    );
                    DMat4::IDENTITY
                }
            };
            jm.bindpose.push(c.transform_link);
            jm.global.push(global);
            jm.joint_transform.push(global * c.transform);
        }
        *data.matrices_cache.borrow_mut() = Some(jm.clone());
        jm
    }

    fn skin_point_count(&self, skin: ObjectHandle) -> usize {
        self.objects[skin.index()]
            .parents
            .iter()
            .filter_map(|&p| self.objects[p.index()].as_geom_mesh())
            .map(|g| g.points.len())
            .next()
            .unwrap_or(0)
    }

    /// Mesh points with blend shapes and skinning applied. Unskinned
    /// meshes get the owning model's global transform instead.
    pub fn deformed_points(&self, geom: ObjectHandle) -> Vec<DVec3> {
        let Some(mesh) = self.objects[geom.index()].as_geom_mesh() else {
            return Vec::new();
        };
        let mut points = mesh.points.clone();
        let mut skinned = false;
        for deformer in self.deformers_of(geom) {
            match &self.objects[deformer.index()].data {
                ObjectData::BlendShape => {
                    self.apply_blend_shape(deformer, &mut points, false);
                }
                _ => {}
            }
        }
        for deformer in self.deformers_of(geom) {
            if self.objects[deformer.index()].as_skin().is_some() {
                let jw = self.joint_weights(deformer);
                let jm = self.joint_matrices(deformer);
                deform_points(&jw, &jm, &mut points);
                skinned = true;
            }
        }
        if !skinned {
            if let Some(model) = self.model_parent(geom) {
                let m = self.global_matrix(model);
                for p in &mut points {
                    *p = m.transform_point3(*p);
                }
            }
        }
        points
    }

    /// First normal layer with blend shapes and skinning applied.
    pub fn deformed_normals(&self, geom: ObjectHandle) -> Vec<DVec3> {
        let Some(mesh) = self.objects[geom.index()].as_geom_mesh() else {
            return Vec::new();
        };
        let Some(layer) = mesh.normal_layers.first() else {
            return Vec::new();
        };
        let mut normals = layer.data.clone();
        for deformer in self.deformers_of(geom) {
            if matches!(self.objects[deformer.index()].data, ObjectData::BlendShape) {
                self.apply_blend_shape(deformer, &mut normals, true);
            }
        }
        for deformer in self.deformers_of(geom) {
            if self.objects[deformer.index()].as_skin().is_some() {
                let jw = self.joint_weights(deformer);
                let jm = self.joint_matrices(deformer);
                deform_normals(&jw, &jm, &mut normals);
            }
        }
        normals
    }

    fn apply_blend_shape(&self, blend_shape: ObjectHandle, dst: &mut [DVec3], normals: bool) {
        for link in &self.objects[blend_shape.index()].children {
            let Some(channel) = self.objects[link.child.index()].as_channel() else {
                continue;
            };
            let shapes: Vec<ObjectHandle> = self.objects[link.child.index()]
                .children
                .iter()
                .map(|l| l.child)
                .filter(|&s| self.objects[s.index()].as_shape().is_some())
                .collect();
            // channels with several in-between shapes are not applied
            if shapes.len() != 1 {
                continue;
            }
            let Some(shape) = self.objects[shapes[0].index()].as_shape() else {
                continue;
            };
            let shape_weight = channel.full_weights.first().copied().unwrap_or(1.0);
            if shape_weight == 0.0 {
                continue;
            }
            let ratio = channel.weight / shape_weight;
            if normals {
                apply_morph_normals(shape, ratio, dst);
            } else {
                apply_morph_points(shape, ratio, dst);
            }
        }
    }

    // -- animation --

    pub fn animation_stacks(&self) -> &[ObjectHandle] {
        &self.anim_stacks
    }

    pub fn find_animation_stack(&self, name: &str) -> Option<ObjectHandle> {
        self.anim_stacks
            .iter()
            .copied()
            .find(|&h| self.objects[h.index()].display_name() == name)
    }

    pub fn current_take(&self) -> Option<ObjectHandle> {
        self.current_take
    }

    pub fn set_current_take(&mut self, take: Option<ObjectHandle>) {
        self.current_take = take;
    }

    /// Create a curve node of the given kind under `layer`, bound to
    /// `target`'s matching property, with its channel curves attached.
    pub fn create_curve_node(
        &mut self,
        layer: ObjectHandle,
        kind: AnimationKind,
        target: ObjectHandle,
    ) -> ObjectHandle {
        let node = self.create_object(
            ObjectClass::AnimationCurveNode,
            ObjectSubClass::Unknown,
            kind.node_name(),
        );
        if let ObjectData::AnimationCurveNode(c) = &mut self.objects[node.index()].data {
            c.kind = kind;
        }
        self.add_child(layer, node);
        self.add_child_prop(target, node, kind.target_property());
        for channel in crate::object::animation::CURVE_CHANNELS
            .iter()
            .take(kind.channel_count().max(1))
        {
            let curve = self.create_object(
                ObjectClass::AnimationCurve,
                ObjectSubClass::Unknown,
                channel,
            );
            if let ObjectData::AnimationCurve(c) = &mut self.objects[curve.index()].data {
                c.set_unit_conversion(kind.unit_conversion());
            }
            self.add_child_prop(node, curve, channel);
        }
        node
    }

    // at most one curve per d|X / d|Y / d|Z channel
    fn curves_of(&self, curve_node: ObjectHandle) -> SmallVec<[(usize, &CurveData); 3]> {
        self.objects[curve_node.index()]
            .children
            .iter()
            .filter_map(|l| {
                let curve = self.objects[l.child.index()].as_curve()?;
                let channel = crate::object::animation::CURVE_CHANNELS
                    .iter()
                    .position(|&c| Some(c) == l.property.as_deref())?;
                Some((channel, curve))
            })
            .collect()
    }

    fn curves_of_mut(&mut self, curve_node: ObjectHandle) -> SmallVec<[ObjectHandle; 3]> {
        self.objects[curve_node.index()]
            .children
            .iter()
            .filter(|l| self.objects[l.child.index()].as_curve().is_some())
            .map(|l| l.child)
            .collect()
    }

    /// Append one key to every channel curve of a curve node.
    pub fn add_key(&mut self, curve_node: ObjectHandle, time: f32, values: &[f32]) {
        let curves = self.curves_of_mut(curve_node);
        for (curve, &value) in curves.into_iter().zip(values) {
            if let Some(c) = self.objects[curve.index()].as_curve_mut() {
                c.add_value(time, value);
            }
        }
    }

    /// Sample a single-channel curve node.
    pub fn evaluate_f1(&self, curve_node: ObjectHandle, time: f32) -> f32 {
        let Some(data) = self.objects[curve_node.index()].as_curve_node() else {
            return 0.0;
        };
        let mut v = data.defaults[0] as f32;
        for (channel, curve) in self.curves_of(curve_node) {
            if channel == 0 {
                v = curve.evaluate(time);
            }
        }
        v
    }

    /// Sample a three-channel curve node.
    pub fn evaluate_f3(&self, curve_node: ObjectHandle, time: f32) -> DVec3 {
        let Some(data) = self.objects[curve_node.index()].as_curve_node() else {
            return DVec3::ZERO;
        };
        let mut v = DVec3::new(data.defaults[0], data.defaults[1], data.defaults[2]);
        for (channel, curve) in self.curves_of(curve_node) {
            v[channel] = curve.evaluate(time) as f64;
        }
        v
    }

    /// Sample a single-channel curve node as an integer value.
    pub fn evaluate_i(&self, curve_node: ObjectHandle, time: f32) -> i64 {
        self.evaluate_f1(curve_node, time).round() as i64
    }

    /// The object a curve node animates: its parent that is neither an
    /// animation layer nor a stack.
    pub fn curve_node_target(&self, curve_node: ObjectHandle) -> Option<ObjectHandle> {
        self.objects[curve_node.index()].parents.iter().copied().find(|&p| {
            !matches!(
                self.objects[p.index()].class(),
                ObjectClass::AnimationLayer | ObjectClass::AnimationStack
            )
        })
    }

    /// Evaluate every curve node of a stack at `time` and write the
    /// results into the target objects.
    pub fn apply_animation(&mut self, stack: ObjectHandle, time: f32) {
        let mut updates: Vec<(ObjectHandle, AnimationKind, DVec3)> = Vec::new();
        for layer in self.objects[stack.index()].child_handles().collect::<Vec<_>>() {
            if self.objects[layer.index()].class() != ObjectClass::AnimationLayer {
                continue;
            }
            for node in self.objects[layer.index()].child_handles().collect::<Vec<_>>() {
                let Some(data) = self.objects[node.index()].as_curve_node() else {
                    continue;
                };
                let kind = data.kind;
                let Some(target) = self.curve_node_target(node) else {
                    continue;
                };
                let value = if kind.channel_count() == 3 {
                    self.evaluate_f3(node, time)
                } else {
                    DVec3::new(self.evaluate_f1(node, time) as f64, 0.0, 0.0)
                };
                updates.push((target, kind, value));
            }
        }
        for (target, kind, v) in updates {
            self.apply_animated_value(target, kind, v);
        }
    }

    fn apply_animated_value(&mut self, target: ObjectHandle, kind: AnimationKind, v: DVec3) {
        match kind {
            AnimationKind::Position => self.set_position(target, v),
            AnimationKind::Rotation => self.set_rotation(target, v),
            AnimationKind::Scale => self.set_scale(target, v),
            AnimationKind::Color => {
                if let Some(l) = self.light_properties_mut(target) {
                    l.color = v;
                }
            }
            AnimationKind::Intensity => {
                if let Some(l) = self.light_properties_mut(target) {
                    l.intensity = v.x;
                }
            }
            AnimationKind::FocalLength => {
                if let Some(c) = self.camera_properties_mut(target) {
                    c.focal_length = v.x;
                }
            }
            AnimationKind::FilmWidth => {
                if let Some(c) = self.camera_properties_mut(target) {
                    c.film_width = v.x;
                }
            }
            AnimationKind::FilmHeight => {
                if let Some(c) = self.camera_properties_mut(target) {
                    c.film_height = v.x;
                }
            }
            AnimationKind::FilmOffsetX => {
                if let Some(c) = self.camera_properties_mut(target) {
                    c.film_offset.x = v.x;
                }
            }
            AnimationKind::FilmOffsetY => {
                if let Some(c) = self.camera_properties_mut(target) {
                    c.film_offset.y = v.x;
                }
            }
            AnimationKind::DeformWeight => {
                if let Some(c) = self.objects[target.index()].as_channel_mut() {
                    c.weight = v.x;
                }
            }
            AnimationKind::Unknown => {}
        }
    }

    /// Copy every animation stack from `other` into this document,
    /// re-targeting curve nodes by display name. Stacks whose curve
    /// nodes all miss their targets are dropped. Returns the number of
    /// stacks merged; the first one becomes the current take when none
    /// is set.
    pub fn merge_animations(&mut self, other: &Document) -> usize {
        let mut merged = 0;
        for &stack in &other.anim_stacks {
            let stack_obj = other.object(stack);
            let new_stack = self.create_animation_stack(stack_obj.display_name());
            if let (ObjectData::AnimationStack(dst), Some(src)) =
                (&mut self.objects[new_stack.index()].data, stack_obj.as_stack())
            {
                *dst = *src;
            }
            let mut retargeted = 0usize;
            let mut created_layers: Vec<ObjectHandle> = Vec::new();
            for layer in stack_obj.child_handles() {
                if other.object(layer).class() != ObjectClass::AnimationLayer {
                    continue;
                }
                let new_layer =
                    self.create_animation_layer(new_stack, other.object(layer).display_name());
                created_layers.push(new_layer);
                for node in other.object(layer).child_handles().collect::<Vec<_>>() {
                    let Some(node_data) = other.object(node).as_curve_node() else {
                        continue;
                    };
                    let kind = node_data.kind;
                    let target_name = other
                        .curve_node_target(node)
                        .map(|t| other.object(t).display_name().to_string());
                    let Some(target_name) = target_name else {
                        continue;
                    };
                    let Some(target) = self.find_object_by_name(&target_name) else {
                        warn!(target = %target_name, "animation target not found, curve node dropped");
                        continue;
                    };
                    let new_node = self.create_curve_node(new_layer, kind, target);
                    if let ObjectData::AnimationCurveNode(c) = &mut self.objects[new_node.index()].data {
                        *c = node_data.clone();
                    }
                    let src_curves = other.curves_of(node);
                    let dst_curves = self.curves_of_mut(new_node);
                    for (channel, curve) in src_curves {
                        if let Some(&dst) = dst_curves.get(channel) {
                            if let Some(c) = self.objects[dst.index()].as_curve_mut() {
                                *c = curve.clone();
                            }
                        }
                    }
                    retargeted += 1;
                }
            }
            if retargeted == 0 {
                for layer in created_layers {
                    self.erase_object(layer);
                }
                self.erase_object(new_stack);
                continue;
            }
            merged += 1;
            if self.current_take.is_none() {
                self.current_take = Some(new_stack);
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::GeomMeshData;

    #[test]
    fn test_new_document_has_root_model() {
        let doc = Document::new();
        let root = doc.object(doc.root_model());
        assert_eq!(root.id(), 0);
        assert_eq!(root.display_name(), "Scene");
        assert_eq!(root.sub_class(), ObjectSubClass::Root);
    }

    #[test]
    fn test_connection_symmetry() {
        let mut doc = Document::new();
        let model = doc.create_model(ModelKind::Mesh, "cube");
        let geom = doc.create_geom_mesh("cube");
        doc.add_child(model, geom);

        for conn in doc.connections() {
            let parent = doc.object(conn.parent);
            let child = doc.object(conn.child);
            assert!(parent.children().iter().any(|l| l.child == conn.child));
            assert!(child.parents().contains(&conn.parent));
        }
        assert_eq!(doc.geometry_of(model), Some(geom));
    }

    #[test]
    fn test_definitions_templates_cover_object_types() {
        let mut doc = Document::new();
        let model = doc.create_model(ModelKind::Mesh, "cube");
        let geom = doc.create_geom_mesh("cube");
        doc.add_child(model, geom);
        let material = doc.create_material("mat");
        doc.add_child(model, material);
        doc.create_model(ModelKind::LimbNode, "joint");
        doc.export_fbx_nodes();

        let tree = doc.tree();
        let defs = tree.find_root("Definitions").unwrap();
        let mut templates = Vec::new();
        for &ot in tree.children(defs) {
            if let Some(t) = tree.find_child(ot, "PropertyTemplate") {
                templates.push(tree.properties(t)[0].as_str().unwrap().to_string());
            }
        }
        for name in ["FbxNode", "FbxMesh", "FbxSurfacePhong", "FbxSkeleton"] {
            assert!(templates.iter().any(|t| t == name), "missing template {name}");
        }
    }

    #[test]
    fn test_erase_object_severs_edges() {
        let mut doc = Document::new();
        let model = doc.create_model(ModelKind::Mesh, "cube");
        let geom = doc.create_geom_mesh("cube");
        doc.add_child(model, geom);
        let id = doc.object(geom).id();

        doc.erase_object(geom);
        assert!(doc.find_object_by_id(id).is_none());
        assert!(doc.object(model).children().iter().all(|l| l.child != geom));
        assert!(!doc.connections().iter().any(|c| c.child == geom || c.parent == geom));
    }

    #[test]
    fn test_global_matrix_follows_hierarchy() {
        let mut doc = Document::new();
        let parent = doc.create_model(ModelKind::Null, "a");
        let child = doc.create_model(ModelKind::Null, "b");
        doc.erase_child(doc.root_model(), child);
        doc.add_child(parent, child);

        doc.set_position(parent, DVec3::new(1.0, 0.0, 0.0));
        doc.set_position(child, DVec3::new(0.0, 2.0, 0.0));

        let g = doc.global_matrix(child);
        assert_eq!(g.transform_point3(DVec3::ZERO), DVec3::new(1.0, 2.0, 0.0));

        // cache invalidates on setter
        doc.set_position(parent, DVec3::new(5.0, 0.0, 0.0));
        let g = doc.global_matrix(child);
        assert_eq!(g.transform_point3(DVec3::ZERO), DVec3::new(5.0, 2.0, 0.0));
    }

    #[test]
    fn test_get_path() {
        let mut doc = Document::new();
        let parent = doc.create_model(ModelKind::Null, "hips");
        let child = doc.create_model(ModelKind::LimbNode, "spine");
        doc.erase_child(doc.root_model(), child);
        doc.add_child(parent, child);
        assert_eq!(doc.get_path(child), "/hips/spine");
        assert_eq!(doc.get_path(doc.root_model()), "");
    }

    #[test]
    fn test_create_cluster_requires_model() {
        let mut doc = Document::new();
        let skin = doc.create_skin("skin");
        let geom = doc.create_geom_mesh("mesh");
        assert!(doc.create_cluster(skin, geom).is_none());

        let joint = doc.create_model(ModelKind::LimbNode, "joint1");
        let cluster = doc.create_cluster(skin, joint);
        assert!(cluster.is_some());
        assert_eq!(doc.cluster_joint(cluster.unwrap()), Some(joint));
    }

    #[test]
    fn test_skin_weight_cache_invalidation() {
        let mut doc = Document::new();
        let model = doc.create_model(ModelKind::Mesh, "mesh");
        let geom = doc.create_geom_mesh("mesh");
        doc.add_child(model, geom);
        if let Some(g) = doc.object_mut(geom).as_geom_mesh_mut() {
            *g = GeomMeshData {
                points: vec![DVec3::ZERO, DVec3::X],
                ..GeomMeshData::default()
            };
        }
        let skin = doc.create_skin("skin");
        doc.add_child(geom, skin);
        let j1 = doc.create_model(ModelKind::LimbNode, "j1");
        let c1 = doc.create_cluster(skin, j1).unwrap();
        if let Some(c) = doc.object_mut(c1).as_cluster_mut() {
            c.indices = vec![0];
            c.weights = vec![1.0];
        }
        assert_eq!(doc.joint_weights(skin).counts, vec![1, 0]);

        let j2 = doc.create_model(ModelKind::LimbNode, "j2");
        let c2 = doc.create_cluster(skin, j2).unwrap();
        if let Some(c) = doc.object_mut(c2).as_cluster_mut() {
            c.indices = vec![1];
            c.weights = vec![1.0];
        }
        // adding a cluster invalidated the cached table
        assert_eq!(doc.joint_weights(skin).counts, vec![1, 1]);
    }

    #[test]
    fn test_animation_apply() {
        let mut doc = Document::new();
        let model = doc.create_model(ModelKind::Null, "node");
        let stack = doc.create_animation_stack("take1");
        let layer = doc.create_animation_layer(stack, "base");
        let cn = doc.create_curve_node(layer, AnimationKind::Position, model);
        doc.add_key(cn, 0.0, &[0.0, 0.0, 0.0]);
        doc.add_key(cn, 1.0, &[10.0, 0.0, 4.0]);

        doc.apply_animation(stack, 0.5);
        let m = doc.object(model).as_model().unwrap();
        assert!((m.position.x - 5.0).abs() < 1e-6);
        assert!((m.position.z - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_merge_animations_retargets_by_name() {
        let mut src = Document::new();
        let model = src.create_model(ModelKind::Null, "node");
        let stack = src.create_animation_stack("take1");
        let layer = src.create_animation_layer(stack, "base");
        let cn = src.create_curve_node(layer, AnimationKind::Position, model);
        src.add_key(cn, 0.0, &[1.0, 2.0, 3.0]);

        let mut dst = Document::new();
        dst.create_model(ModelKind::Null, "node");
        assert_eq!(dst.merge_animations(&src), 1);
        assert!(dst.current_take().is_some());
        let stack = dst.find_animation_stack("take1").unwrap();
        dst.apply_animation(stack, 0.0);
        let target = dst.find_object_by_name("node").unwrap();
        assert_eq!(
            dst.object(target).as_model().unwrap().position,
            DVec3::new(1.0, 2.0, 3.0)
        );
    }

    #[test]
    fn test_merge_animations_drops_unmatched_stack() {
        let mut src = Document::new();
        let model = src.create_model(ModelKind::Null, "missing");
        let stack = src.create_animation_stack("take1");
        let layer = src.create_animation_layer(stack, "base");
        src.create_curve_node(layer, AnimationKind::Position, model);

        let mut dst = Document::new();
        assert_eq!(dst.merge_animations(&src), 0);
        assert!(dst.find_animation_stack("take1").is_none());
    }
}
