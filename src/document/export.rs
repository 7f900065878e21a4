//! Node-tree reconstruction from the object arena.
//!
//! Export throws away the current tree and rebuilds the whole file
//! shape: header extension, identity records, global settings, the
//! `Definitions` census, one node per object, the `Connections` block
//! from the flat edge list, and the `Takes` summary. Running it twice
//! on an unchanged document produces the same tree.

use tracing::warn;

use crate::object::{
    deformer, geometry, material, model, AttributeKind, ModelKind, ObjectClass, ObjectData,
    ObjectHandle, ObjectSubClass,
};
use crate::tree::{binary, NodeId, NodeTree, Property};
use crate::util::math::to_ticks;

use super::{ConnectionKind, Document};

const CREATOR: &str = concat!("sfbx ", env!("CARGO_PKG_VERSION"));
const HEADER_VERSION: i32 = 1003;
const SCENE_INFO_VERSION: i32 = 100;
const GLOBAL_SETTINGS_VERSION: i32 = 1000;
const DOCUMENT_NODE_ID: i64 = 2_000_000_000;

pub(super) fn export(doc: &mut Document) {
    doc.tree.clear();
    for obj in &mut doc.objects {
        obj.node = None;
    }
    ensure_attributes(doc);
    write_header_extension(doc);
    write_identity(doc);
    write_global_settings(doc);
    write_documents(doc);
    doc.tree.create_root("References");
    write_definitions(doc);
    write_objects(doc);
    write_connections(doc);
    write_takes(doc);
}

/// Models that need a `NodeAttribute` child get one created before
/// anything is written, so the census and the connections see it.
fn ensure_attributes(doc: &mut Document) {
    let mut missing: Vec<(ObjectHandle, ObjectSubClass)> = Vec::new();
    for (h, obj) in doc.objects() {
        if h == doc.root_model {
            continue;
        }
        let Some(m) = obj.as_model() else {
            continue;
        };
        let sub = match m.kind {
            ModelKind::Null | ModelKind::Root => ObjectSubClass::Null,
            ModelKind::LimbNode => ObjectSubClass::LimbNode,
            ModelKind::Light => ObjectSubClass::Light,
            ModelKind::Camera => ObjectSubClass::Camera,
            ModelKind::Mesh => continue,
        };
        let has_attr = obj
            .child_handles()
            .any(|c| matches!(doc.objects[c.index()].data, ObjectData::Attribute(_)));
        if !has_attr {
            missing.push((h, sub));
        }
    }
    for (model, sub) in missing {
        let name = doc.objects[model.index()].display_name().to_string();
        let attr = doc.create_object(ObjectClass::NodeAttribute, sub, &name);
        doc.add_child(model, attr);
    }
}

fn write_header_extension(doc: &mut Document) {
    let tree = &mut doc.tree;
    let header = tree.create_root("FBXHeaderExtension");
    tree.leaf1(header, "FBXHeaderVersion", HEADER_VERSION);
    tree.leaf1(header, "FBXVersion", doc.version.0 as i32);
    tree.leaf1(header, "EncryptionType", 0i32);

    let ts = tree.create_child(header, "CreationTimeStamp");
    tree.leaf1(ts, "Version", 1000i32);
    tree.leaf1(ts, "Year", 1970i32);
    tree.leaf1(ts, "Month", 1i32);
    tree.leaf1(ts, "Day", 1i32);
    tree.leaf1(ts, "Hour", 10i32);
    tree.leaf1(ts, "Minute", 0i32);
    tree.leaf1(ts, "Second", 0i32);
    tree.leaf1(ts, "Millisecond", 0i32);

    tree.leaf1(header, "Creator", CREATOR);

    let flags = tree.create_child(header, "OtherFlags");
    tree.leaf1(flags, "TCDefinition", 127i32);

    let info = tree.create_child(header, "SceneInfo");
    tree.add_property(info, crate::object::make_full_name("GlobalInfo", "SceneInfo"));
    tree.add_property(info, "UserData");
    tree.leaf1(info, "Type", "UserData");
    tree.leaf1(info, "Version", SCENE_INFO_VERSION);
    let meta = tree.create_child(info, "MetaData");
    tree.leaf1(meta, "Version", SCENE_INFO_VERSION);
    tree.leaf1(meta, "Title", "");
    tree.leaf1(meta, "Subject", "");
    tree.leaf1(meta, "Author", "");
    tree.leaf1(meta, "Keywords", "");
    tree.leaf1(meta, "Revision", "");
    tree.leaf1(meta, "Comment", "");
    let block = tree.create_child(info, "Properties70");
    tree.p70(block, "DocumentUrl", "KString", "Url", "",
        vec![doc.global_settings.path.as_str().into()]);
    tree.p70(block, "Original|ApplicationName", "KString", "", "", vec![CREATOR.into()]);
    tree.p70(block, "LastSaved|ApplicationName", "KString", "", "", vec![CREATOR.into()]);
}

fn write_identity(doc: &mut Document) {
    let tree = &mut doc.tree;
    let file_id = tree.create_root("FileId");
    tree.add_property(file_id, Property::Blob(binary::FILE_ID.to_vec()));
    let ct = tree.create_root("CreationTime");
    tree.add_property(ct, binary::TIME_ID);
    let creator = tree.create_root("Creator");
    tree.add_property(creator, CREATOR);
}

fn write_global_settings(doc: &mut Document) {
    let gs = doc.global_settings.clone();
    let tree = &mut doc.tree;
    let node = tree.create_root("GlobalSettings");
    tree.leaf1(node, "Version", GLOBAL_SETTINGS_VERSION);
    let b = tree.create_child(node, "Properties70");
    tree.p70(b, "UpAxis", "int", "Integer", "", vec![gs.up_axis.into()]);
    tree.p70(b, "UpAxisSign", "int", "Integer", "", vec![gs.up_axis_sign.into()]);
    tree.p70(b, "FrontAxis", "int", "Integer", "", vec![0i32.into()]);
    tree.p70(b, "FrontAxisSign", "int", "Integer", "", vec![1i32.into()]);
    tree.p70(b, "CoordAxis", "int", "Integer", "", vec![1i32.into()]);
    tree.p70(b, "CoordAxisSign", "int", "Integer", "", vec![1i32.into()]);
    tree.p70(b, "OriginalUpAxis", "int", "Integer", "", vec![(-1i32).into()]);
    tree.p70(b, "OriginalUpAxisSign", "int", "Integer", "", vec![1i32.into()]);
    tree.p70(b, "UnitScaleFactor", "double", "Number", "", vec![gs.unit_scale.into()]);
    tree.p70(b, "OriginalUnitScaleFactor", "double", "Number", "",
        vec![gs.original_unit_scale.into()]);
    tree.p70(b, "AmbientColor", "ColorRGB", "Color", "",
        vec![0.0f64.into(), 0.0f64.into(), 0.0f64.into()]);
    tree.p70(b, "DefaultCamera", "KString", "", "", vec![gs.camera.as_str().into()]);
    tree.p70(b, "TimeMode", "enum", "", "", vec![0i32.into()]);
    tree.p70(b, "TimeProtocol", "enum", "", "", vec![2i32.into()]);
    tree.p70(b, "SnapOnFrameMode", "enum", "", "", vec![0i32.into()]);
    tree.p70(b, "TimeSpanStart", "KTime", "Time", "", vec![0i64.into()]);
    tree.p70(b, "TimeSpanStop", "KTime", "Time", "", vec![gs.time_stop.into()]);
    tree.p70(b, "CustomFrameRate", "double", "Number", "", vec![gs.frame_rate.into()]);
    tree.p70(b, "TimeMarker", "Compound", "", "", vec![]);
    tree.p70(b, "CurrentTimeMarker", "int", "Integer", "", vec![(-1i32).into()]);
}

fn write_documents(doc: &mut Document) {
    let take_name = doc
        .current_take
        .map(|t| doc.objects[t.index()].display_name().to_string())
        .unwrap_or_default();
    let tree = &mut doc.tree;
    let docs = tree.create_root("Documents");
    tree.leaf1(docs, "Count", 1i32);
    let d = tree.create_child(docs, "Document");
    tree.add_property(d, DOCUMENT_NODE_ID);
    tree.add_property(d, "");
    tree.add_property(d, "Scene");
    let b = tree.create_child(d, "Properties70");
    tree.p70(b, "SourceObject", "object", "", "", vec![]);
    tree.p70(b, "ActiveAnimStackName", "KString", "", "", vec![take_name.as_str().into()]);
    tree.leaf1(d, "RootNode", 0i64);
}

fn write_definitions(doc: &mut Document) {
    let mut counts: Vec<(ObjectClass, usize)> = Vec::new();
    for (h, obj) in doc.objects() {
        if h == doc.root_model {
            continue;
        }
        let class = obj.class();
        if class == ObjectClass::Unknown {
            continue;
        }
        match counts.iter_mut().find(|(c, _)| *c == class) {
            Some((_, n)) => *n += 1,
            None => counts.push((class, 1)),
        }
    }
    let total: usize = counts.iter().map(|(_, n)| n).sum::<usize>() + 1;

    let tree = &mut doc.tree;
    let defs = tree.create_root("Definitions");
    tree.leaf1(defs, "Version", 100i32);
    tree.leaf1(defs, "Count", total as i32);

    let gs = tree.create_child(defs, "ObjectType");
    tree.add_property(gs, "GlobalSettings");
    tree.leaf1(gs, "Count", 1i32);

    for (class, count) in counts {
        let ot = tree.create_child(defs, "ObjectType");
        tree.add_property(ot, class.name());
        tree.leaf1(ot, "Count", count as i32);
        match class {
            ObjectClass::Model => write_model_template(tree, ot),
            ObjectClass::Geometry => {
                write_template(tree, ot, "FbxMesh");
            }
            ObjectClass::Material => write_material_template(tree, ot),
            ObjectClass::NodeAttribute => {
                write_template(tree, ot, "FbxSkeleton");
            }
            _ => {}
        }
    }
}

fn write_template(tree: &mut NodeTree, object_type: NodeId, name: &str) -> NodeId {
    let t = tree.create_child(object_type, "PropertyTemplate");
    tree.add_property(t, name);
    tree.create_child(t, "Properties70")
}

fn write_model_template(tree: &mut NodeTree, object_type: NodeId) {
    let b = write_template(tree, object_type, "FbxNode");
    tree.p70(b, "Lcl Translation", "Lcl Translation", "", "A",
        vec![0.0f64.into(), 0.0f64.into(), 0.0f64.into()]);
    tree.p70(b, "Lcl Rotation", "Lcl Rotation", "", "A",
        vec![0.0f64.into(), 0.0f64.into(), 0.0f64.into()]);
    tree.p70(b, "Lcl Scaling", "Lcl Scaling", "", "A",
        vec![1.0f64.into(), 1.0f64.into(), 1.0f64.into()]);
    tree.p70(b, "Visibility", "Visibility", "", "A", vec![1.0f64.into()]);
    tree.p70(b, "RotationOrder", "RotationOrder", "", "A", vec![0i32.into()]);
}

fn write_material_template(tree: &mut NodeTree, object_type: NodeId) {
    let b = write_template(tree, object_type, "FbxSurfacePhong");
    tree.p70(b, "AmbientColor", "Color", "", "A",
        vec![0.0f64.into(), 0.0f64.into(), 0.0f64.into()]);
    tree.p70(b, "DiffuseColor", "Color", "", "A",
        vec![1.0f64.into(), 1.0f64.into(), 1.0f64.into()]);
    tree.p70(b, "SpecularColor", "Color", "", "A",
        vec![0.0f64.into(), 0.0f64.into(), 0.0f64.into()]);
    tree.p70(b, "Shininess", "Number", "", "A", vec![20.0f64.into()]);
    tree.p70(b, "Opacity", "Number", "", "A", vec![1.0f64.into()]);
}

fn write_objects(doc: &mut Document) {
    let Document { tree, objects, root_model, .. } = doc;
    let objects_node = tree.create_root("Objects");
    for i in 0..objects.len() {
        let node = {
            let obj = &objects[i];
            if obj.dead || i == root_model.index() {
                continue;
            }
            if obj.class() == ObjectClass::Unknown {
                continue;
            }
            let node = tree.create_child(objects_node, obj.class().name());
            tree.add_property(node, obj.id);
            tree.add_property(node, obj.full_name());
            tree.add_property(node, obj.sub_class().name());
            tree.get_mut(node).set_force_null_terminate(true);
            write_payload(tree, node, obj, objects);
            node
        };
        objects[i].node = Some(node);
    }
}

fn write_payload(
    tree: &mut NodeTree,
    node: NodeId,
    obj: &crate::object::Object,
    objects: &[crate::object::Object],
) {
    match &obj.data {
        ObjectData::Attribute(kind) => match kind {
            AttributeKind::Null | AttributeKind::Root => {
                tree.leaf1(node, "TypeFlags", "Null");
            }
            AttributeKind::LimbNode => {
                tree.leaf1(node, "TypeFlags", "Skeleton");
            }
            AttributeKind::Light(l) => model::write_light(tree, node, l),
            AttributeKind::Camera(c) => model::write_camera(tree, node, c),
            AttributeKind::Generic => {}
        },
        ObjectData::Model(m) => {
            model::write_model(tree, node, m);
            if m.kind == ModelKind::Mesh {
                if let Some(block) = tree.find_child(node, "Properties70") {
                    tree.p70(block, "DefaultAttributeIndex", "int", "Integer", "",
                        vec![0i32.into()]);
                }
            }
        }
        ObjectData::GeomMesh(g) => geometry::write_geom_mesh(tree, node, g),
        ObjectData::Shape(s) => geometry::write_shape(tree, node, s),
        ObjectData::Skin(_) => deformer::write_skin(tree, node),
        ObjectData::Cluster(c) => deformer::write_cluster(tree, node, c),
        ObjectData::BlendShape => deformer::write_blend_shape(tree, node),
        ObjectData::BlendShapeChannel(c) => deformer::write_channel(tree, node, c),
        ObjectData::BindPose(p) => {
            let mut entries = Vec::with_capacity(p.pose_nodes.len());
            for &(h, matrix) in &p.pose_nodes {
                let target = &objects[h.index()];
                if target.as_model().is_none() {
                    warn!(id = target.id, "pose node target is not a model");
                }
                entries.push((target.id, matrix));
            }
            deformer::write_bind_pose(tree, node, &entries);
        }
        ObjectData::Video(v) => material::write_video(tree, node, v),
        ObjectData::Texture(t) => material::write_texture(tree, node, t),
        ObjectData::Material(m) => material::write_material(tree, node, m),
        ObjectData::AnimationStack(s) => crate::object::animation::write_stack(tree, node, s),
        ObjectData::AnimationLayer => {}
        ObjectData::AnimationCurveNode(c) => {
            crate::object::animation::write_curve_node(tree, node, c)
        }
        ObjectData::AnimationCurve(c) => crate::object::animation::write_curve(tree, node, c),
        ObjectData::Unknown => {}
    }
}

/// Serialize the flat edge list. Construction keeps it free of
/// duplicates and in insertion order, so no graph walk is needed.
fn write_connections(doc: &mut Document) {
    let Document { tree, objects, connections, .. } = doc;
    let node = tree.create_root("Connections");
    for conn in connections.iter() {
        let child = &objects[conn.child.index()];
        let parent = &objects[conn.parent.index()];
        if child.dead || parent.dead {
            continue;
        }
        let c = tree.create_child(node, "C");
        match conn.kind {
            ConnectionKind::OO => {
                tree.add_property(c, "OO");
                tree.add_property(c, child.id);
                tree.add_property(c, parent.id);
            }
            ConnectionKind::OP => {
                tree.add_property(c, "OP");
                tree.add_property(c, child.id);
                tree.add_property(c, parent.id);
                tree.add_property(c, conn.property.as_deref().unwrap_or(""));
            }
        }
    }
}

fn write_takes(doc: &mut Document) {
    let current = doc
        .current_take
        .map(|t| doc.objects[t.index()].display_name().to_string())
        .unwrap_or_default();
    let stacks: Vec<(String, f32, f32, f32, f32)> = doc
        .anim_stacks
        .iter()
        .filter(|&&h| !doc.objects[h.index()].dead)
        .filter_map(|&h| {
            let obj = &doc.objects[h.index()];
            let s = obj.as_stack()?;
            Some((
                obj.display_name().to_string(),
                s.local_start,
                s.local_stop,
                s.reference_start,
                s.reference_stop,
            ))
        })
        .collect();

    let tree = &mut doc.tree;
    let takes = tree.create_root("Takes");
    tree.leaf1(takes, "Current", current.as_str());
    for (name, ls, lt, rs, rt) in stacks {
        let take = tree.create_child(takes, "Take");
        tree.add_property(take, name.as_str());
        tree.leaf1(take, "FileName", format!("{name}.tak").as_str());
        if ls != 0.0 || lt != 0.0 {
            tree.leaf(take, "LocalTime", vec![
                to_ticks(ls as f64).into(),
                to_ticks(lt as f64).into(),
            ]);
        }
        if rs != 0.0 || rt != 0.0 {
            tree.leaf(take, "ReferenceTime", vec![
                to_ticks(rs as f64).into(),
                to_ticks(rt as f64).into(),
            ]);
        }
    }
}
