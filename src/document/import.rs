//! Object-graph construction from a parsed node tree.
//!
//! Import runs as an explicit state machine: Instantiate creates one
//! object per `Objects` child and captures id and name, LinkConnections
//! wires the edges from the `Connections` block, PopulateFields decodes
//! every class payload now that the graph is complete, and
//! ResolveCurrentTake picks the active take from the `Takes` block.
//! Payload decoding runs against the finished graph, so connection order
//! in the file never matters.

use tracing::{debug, warn};

use crate::object::{
    animation, deformer, geometry, material, model, AttributeKind, ObjectClass, ObjectData,
    ObjectHandle, ObjectSubClass,
};
use crate::tree::NodeId;
use crate::util::Result;

use super::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Instantiate,
    LinkConnections,
    PopulateFields,
    ResolveCurrentTake,
    Done,
}

pub(super) fn import(doc: &mut Document) -> Result<()> {
    import_global_settings(doc);
    let mut phase = Phase::Instantiate;
    while phase != Phase::Done {
        phase = match phase {
            Phase::Instantiate => {
                instantiate(doc);
                Phase::LinkConnections
            }
            Phase::LinkConnections => {
                link_connections(doc);
                Phase::PopulateFields
            }
            Phase::PopulateFields => {
                populate_fields(doc);
                Phase::ResolveCurrentTake
            }
            Phase::ResolveCurrentTake => {
                resolve_current_take(doc);
                Phase::Done
            }
            Phase::Done => Phase::Done,
        };
    }
    debug!(objects = doc.objects.len(), connections = doc.connections.len(), "import finished");
    Ok(())
}

fn import_global_settings(doc: &mut Document) {
    let Some(node) = doc.tree.find_root("GlobalSettings") else {
        return;
    };
    let gs = &mut doc.global_settings;
    if let Some(v) = doc.tree.prop70_i32(node, "UpAxis") {
        gs.up_axis = v;
    }
    if let Some(v) = doc.tree.prop70_i32(node, "UpAxisSign") {
        gs.up_axis_sign = v;
    }
    if let Some(v) = doc.tree.prop70_f64(node, "UnitScaleFactor") {
        gs.unit_scale = v;
    }
    if let Some(v) = doc.tree.prop70_f64(node, "OriginalUnitScaleFactor") {
        gs.original_unit_scale = v;
    }
    if let Some(v) = doc.tree.prop70_f64(node, "CustomFrameRate") {
        if v > 0.0 {
            gs.frame_rate = v;
        }
    }
    if let Some(v) = doc.tree.prop70_str(node, "DefaultCamera") {
        gs.camera = v.to_string();
    }
    if let Some(v) = doc.tree.prop70_i64(node, "TimeSpanStop") {
        gs.time_stop = v;
    }
}

/// Create one object per `Objects` child, capturing id, name, and
/// subclass from the three-property form.
fn instantiate(doc: &mut Document) {
    let Some(objects) = doc.tree.find_root("Objects") else {
        return;
    };
    let mut max_id = 0i64;
    for &node in doc.tree.children(objects).to_vec().iter() {
        let class = ObjectClass::from_name(doc.tree.name(node));
        if class == ObjectClass::Unknown {
            warn!(class = doc.tree.name(node), "unknown object class, node skipped");
            continue;
        }
        attach_node(doc, node, class);
        if let Some(p) = doc.tree.get(node).property(0) {
            if let Some(id) = p.as_i64() {
                max_id = max_id.max(id);
            }
        }
    }
    doc.next_id = doc.next_id.max(max_id + 1);
}

/// Bind one `Objects` child node to a fresh object.
fn attach_node(doc: &mut Document, node: NodeId, class: ObjectClass) {
    let n = doc.tree.get(node);
    let id = n.property(0).and_then(|p| p.as_i64()).unwrap_or(0);
    let full_name = n.property(1).and_then(|p| p.as_str()).unwrap_or("").to_string();
    let sub_name = n.property(2).and_then(|p| p.as_str()).unwrap_or("").to_string();

    let sub = ObjectSubClass::from_name(&sub_name);
    let display = crate::object::split_full_name(&full_name).0.to_string();
    let h = doc.alloc_object(id, ObjectData::new(class, sub), &display);
    doc.objects[h.index()].node = Some(node);
    // consumers of the binary form expect object nodes to close with the
    // null child marker even when they carry only properties
    doc.tree.get_mut(node).set_force_null_terminate(true);
}

/// Wire `C` records from the `Connections` block into object edges.
fn link_connections(doc: &mut Document) {
    let Some(connections) = doc.tree.find_root("Connections") else {
        return;
    };
    for &c in doc.tree.children(connections).to_vec().iter() {
        if doc.tree.name(c) != "C" {
            warn!(name = doc.tree.name(c), "unknown connection record, skipped");
            continue;
        }
        let n = doc.tree.get(c);
        let kind = n.property(0).and_then(|p| p.as_str()).unwrap_or("");
        let child_id = n.property(1).and_then(|p| p.as_i64());
        let parent_id = n.property(2).and_then(|p| p.as_i64());
        let prop = n.property(3).and_then(|p| p.as_str()).map(str::to_string);

        let (Some(child_id), Some(parent_id)) = (child_id, parent_id) else {
            warn!("connection record without ids, skipped");
            continue;
        };
        let (Some(child), Some(parent)) =
            (doc.find_object_by_id(child_id), doc.find_object_by_id(parent_id))
        else {
            warn!(child_id, parent_id, "connection references unknown object, skipped");
            continue;
        };
        match kind {
            "OO" => doc.add_child(parent, child),
            "OP" => doc.add_child_prop(parent, child, prop.as_deref().unwrap_or("")),
            other => {
                warn!(kind = other, "unknown connection type, skipped");
            }
        }
    }
}

/// Decode every class payload from its backing node. Runs read-only
/// over the graph, then assigns, so cross-object lookups see the fully
/// linked state.
fn populate_fields(doc: &mut Document) {
    let mut updates: Vec<(usize, ObjectData)> = Vec::new();
    for (i, obj) in doc.objects.iter().enumerate() {
        let Some(node) = obj.node else {
            continue;
        };
        let tree = &doc.tree;
        let data = match &obj.data {
            ObjectData::Model(m) => {
                ObjectData::Model(Box::new(model::read_model(tree, node, m.kind)))
            }
            ObjectData::Attribute(AttributeKind::Light(_)) => {
                ObjectData::Attribute(AttributeKind::Light(model::read_light(tree, node)))
            }
            ObjectData::Attribute(AttributeKind::Camera(_)) => {
                ObjectData::Attribute(AttributeKind::Camera(model::read_camera(tree, node)))
            }
            ObjectData::GeomMesh(_) => {
                ObjectData::GeomMesh(Box::new(geometry::read_geom_mesh(tree, node)))
            }
            ObjectData::Shape(_) => ObjectData::Shape(geometry::read_shape(tree, node)),
            ObjectData::Cluster(_) => ObjectData::Cluster(deformer::read_cluster(tree, node)),
            ObjectData::BlendShapeChannel(_) => {
                ObjectData::BlendShapeChannel(deformer::read_channel(tree, node))
            }
            ObjectData::BindPose(_) => ObjectData::BindPose(read_bind_pose(doc, node)),
            ObjectData::Material(_) => ObjectData::Material(material::read_material(tree, node)),
            ObjectData::Texture(_) => ObjectData::Texture(material::read_texture(tree, node)),
            ObjectData::Video(_) => ObjectData::Video(material::read_video(tree, node)),
            ObjectData::AnimationStack(_) => {
                ObjectData::AnimationStack(animation::read_stack(tree, node))
            }
            ObjectData::AnimationCurveNode(_) => ObjectData::AnimationCurveNode(
                animation::read_curve_node(tree, node, obj.display_name()),
            ),
            ObjectData::AnimationCurve(_) => {
                ObjectData::AnimationCurve(animation::read_curve(tree, node))
            }
            _ => continue,
        };
        updates.push((i, data));
    }
    for (i, data) in updates {
        doc.objects[i].data = data;
    }
    assign_curve_unit_conversions(doc);
}

/// Push each curve node's unit conversion down to its channel curves.
fn assign_curve_unit_conversions(doc: &mut Document) {
    let mut updates: Vec<(ObjectHandle, f32)> = Vec::new();
    for (_, obj) in doc.objects() {
        let Some(cn) = obj.as_curve_node() else {
            continue;
        };
        let conversion = cn.kind.unit_conversion();
        if conversion == 1.0 {
            continue;
        }
        for link in obj.children() {
            if doc.objects[link.child.index()].as_curve().is_some() {
                updates.push((link.child, conversion));
            }
        }
    }
    for (curve, conversion) in updates {
        if let Some(c) = doc.objects[curve.index()].as_curve_mut() {
            c.set_unit_conversion(conversion);
        }
    }
}

fn read_bind_pose(doc: &Document, node: NodeId) -> crate::object::BindPoseData {
    let mut pose = crate::object::BindPoseData::default();
    for &pn in doc.tree.children(node) {
        if doc.tree.name(pn) != "PoseNode" {
            continue;
        }
        let Some(id) = doc.tree.child_i64(pn, "Node") else {
            continue;
        };
        let Some(matrix) = doc
            .tree
            .child_property(pn, "Matrix", 0)
            .and_then(crate::tree::Property::to_dmat4)
        else {
            continue;
        };
        let Some(h) = doc.find_object_by_id(id) else {
            warn!(id, "pose node references unknown object, skipped");
            continue;
        };
        if doc.objects[h.index()].as_model().is_none() {
            warn!(id, "pose node references a non-model object");
        }
        pose.pose_nodes.push((h, matrix));
    }
    pose
}

/// Pick the current take named by the `Takes` block.
fn resolve_current_take(doc: &mut Document) {
    let Some(takes) = doc.tree.find_root("Takes") else {
        if doc.current_take.is_none() {
            doc.current_take = doc.anim_stacks.first().copied();
        }
        return;
    };
    if let Some(name) = doc.tree.child_str(takes, "Current") {
        let name = name.to_string();
        doc.current_take = doc.find_animation_stack(&name);
    }
    if doc.current_take.is_none() {
        doc.current_take = doc.anim_stacks.first().copied();
    }
}
