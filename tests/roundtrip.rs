//! End-to-end round trips through the binary and ASCII writers.

use sfbx::prelude::*;
use sfbx::object::{AnimationKind, GeomMeshData, ModelKind, ShapeData};

fn quad_scene() -> (Document, ObjectHandle, ObjectHandle) {
    let mut doc = Document::new();
    let model = doc.create_model(ModelKind::Mesh, "quad");
    let geom = doc.create_geom_mesh("quad");
    doc.add_child(model, geom);
    if let Some(g) = doc.object_mut(geom).as_geom_mesh_mut() {
        *g = GeomMeshData {
            points: vec![
                DVec3::new(0.0, 0.0, 0.0),
                DVec3::new(1.0, 0.0, 0.0),
                DVec3::new(1.0, 1.0, 0.0),
                DVec3::new(0.0, 1.0, 0.0),
            ],
            indices: vec![0, 1, 2, 3],
            counts: vec![4],
            ..GeomMeshData::default()
        };
    }
    (doc, model, geom)
}

#[test]
fn quad_mesh_binary_round_trip() {
    let (mut doc, _, _) = quad_scene();
    doc.set_position(doc.find_object_by_name("quad").unwrap(), DVec3::new(1.0, 2.0, 3.0));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quad.fbx");
    doc.write_binary_file(&path).unwrap();

    let mut doc2 = Document::new();
    doc2.read_file(&path).unwrap();
    assert_eq!(doc2.file_version(), FileVersion::FBX_2016);

    // the model and its geometry survive with nonzero ids
    let nonzero: Vec<_> = doc2.objects().filter(|(_, o)| o.id() != 0).collect();
    assert_eq!(nonzero.len(), 2);

    let model = doc2.find_object_by_name("quad").unwrap();
    let m = doc2.object(model).as_model().unwrap();
    assert_eq!(m.position, DVec3::new(1.0, 2.0, 3.0));

    // the quad comes back fan-triangulated
    let geom = doc2.geometry_of(model).unwrap();
    let g = doc2.object(geom).as_geom_mesh().unwrap();
    assert_eq!(g.counts, vec![3, 3]);
    assert_eq!(g.indices, vec![0, 1, 2, 0, 2, 3]);
    assert_eq!(g.points.len(), 4);

    // every connection has matching edges on both endpoints
    for conn in doc2.connections() {
        assert!(doc2.object(conn.parent).children().iter().any(|l| l.child == conn.child));
        assert!(doc2.object(conn.child).parents().contains(&conn.parent));
    }
}

#[test]
fn binary_export_is_idempotent() {
    let (mut doc, _, _) = quad_scene();
    let first = doc.write_binary().unwrap();

    let mut doc2 = Document::new();
    doc2.read(&first).unwrap();
    let second = doc2.write_binary().unwrap();
    assert_eq!(first, second);
}

#[test]
fn ascii_round_trip() {
    let (mut doc, model, _) = quad_scene();
    doc.set_rotation(model, DVec3::new(0.0, 90.0, 0.0));
    doc.set_scale(model, DVec3::splat(2.0));

    let material = doc.create_material("red");
    doc.add_child(model, material);
    if let Some(m) = doc.object_mut(material).as_material_mut() {
        m.diffuse_color = DVec3::new(0.8, 0.1, 0.1);
        m.opacity = 0.5;
    }

    let text = doc.write_ascii().unwrap();
    assert!(text.starts_with("; FBX 7.5.0 project file"));

    let mut doc2 = Document::new();
    doc2.read(text.as_bytes()).unwrap();

    let model = doc2.find_object_by_name("quad").unwrap();
    let m = doc2.object(model).as_model().unwrap();
    assert_eq!(m.rotation, DVec3::new(0.0, 90.0, 0.0));
    assert_eq!(m.scale, DVec3::splat(2.0));

    let material = doc2.find_object_by_name("red").unwrap();
    let mat = doc2.object(material).as_material().unwrap();
    assert_eq!(mat.diffuse_color, DVec3::new(0.8, 0.1, 0.1));
    assert_eq!(mat.opacity, 0.5);
    assert!(doc2.materials_of(model).contains(&material));
}

#[test]
fn skinned_mesh_round_trip() {
    let mut doc = Document::new();
    let model = doc.create_model(ModelKind::Mesh, "skinned");
    let geom = doc.create_geom_mesh("skinned");
    doc.add_child(model, geom);
    if let Some(g) = doc.object_mut(geom).as_geom_mesh_mut() {
        *g = GeomMeshData {
            points: vec![DVec3::ZERO, DVec3::X, DVec3::new(2.0, 0.0, 0.0)],
            indices: vec![0, 1, 2],
            counts: vec![3],
            ..GeomMeshData::default()
        };
    }
    let skin = doc.create_skin("skin");
    doc.add_child(geom, skin);

    let j1 = doc.create_model(ModelKind::LimbNode, "j1");
    let j2 = doc.create_model(ModelKind::LimbNode, "j2");
    let c1 = doc.create_cluster(skin, j1).unwrap();
    let c2 = doc.create_cluster(skin, j2).unwrap();
    if let Some(c) = doc.object_mut(c1).as_cluster_mut() {
        c.indices = vec![0, 1];
        c.weights = vec![1.0, 0.5];
        c.set_bind_matrix(DMat4::IDENTITY);
    }
    if let Some(c) = doc.object_mut(c2).as_cluster_mut() {
        c.indices = vec![1, 2];
        c.weights = vec![0.5, 1.0];
        c.set_bind_matrix(DMat4::from_translation(DVec3::X));
    }

    let data = doc.write_binary().unwrap();
    let mut doc2 = Document::new();
    doc2.read(&data).unwrap();

    let skin = doc2.find_object_by_name("skin").unwrap();
    let jw = doc2.joint_weights(skin);
    assert_eq!(jw.counts, vec![1, 2, 1]);
    assert_eq!(jw.max_joints_per_vertex, 2);

    // vertex 1 is a 0.5/0.5 tie; the first cluster wins the single slot
    let fixed = doc2.fixed_joint_weights(skin, 1);
    assert_eq!(fixed.weights[1].joint_index, 0);
    assert!((fixed.weights[1].weight - 1.0).abs() < 1e-6);

    let c2 = doc2.clusters_of(skin)[1];
    let cluster = doc2.object(c2).as_cluster().unwrap();
    assert_eq!(cluster.transform_link, DMat4::from_translation(DVec3::X));
    assert_eq!(doc2.cluster_joint(c2), Some(doc2.find_object_by_name("j2").unwrap()));
}

#[test]
fn blend_shape_deformation_round_trip() {
    let mut doc = Document::new();
    let model = doc.create_model(ModelKind::Mesh, "face");
    let geom = doc.create_geom_mesh("face");
    doc.add_child(model, geom);
    if let Some(g) = doc.object_mut(geom).as_geom_mesh_mut() {
        *g = GeomMeshData {
            points: vec![DVec3::ZERO, DVec3::X],
            indices: vec![0, 1],
            counts: vec![2],
            ..GeomMeshData::default()
        };
    }
    let blend = doc.create_object(ObjectClass::Deformer, ObjectSubClass::BlendShape, "morphs");
    doc.add_child(geom, blend);
    let channel = doc.create_object(
        ObjectClass::Deformer,
        ObjectSubClass::BlendShapeChannel,
        "smile",
    );
    doc.add_child(blend, channel);
    if let Some(c) = doc.object_mut(channel).as_channel_mut() {
        c.weight = 0.5;
        c.full_weights = vec![1.0];
    }
    let shape = doc.create_shape("smile_target");
    doc.add_child(channel, shape);
    if let Some(s) = doc.object_mut(shape).as_shape_mut() {
        *s = ShapeData {
            indices: vec![1],
            points: vec![DVec3::new(0.0, 2.0, 0.0)],
            normals: vec![],
        };
    }

    let data = doc.write_binary().unwrap();
    let mut doc2 = Document::new();
    doc2.read(&data).unwrap();

    let channel = doc2.find_object_by_name("smile").unwrap();
    assert_eq!(doc2.object(channel).as_channel().unwrap().weight, 0.5);

    let geom = doc2.find_object_by_name("face").map(|m| doc2.geometry_of(m).unwrap()).unwrap();
    let points = doc2.deformed_points(geom);
    // delta scaled by channel weight over the shape's full weight
    assert!((points[1].y - 1.0).abs() < 1e-9);
    assert_eq!(points[0], DVec3::ZERO);
}

#[test]
fn animation_round_trip() {
    let mut doc = Document::new();
    let model = doc.create_model(ModelKind::Null, "node");
    let stack = doc.create_animation_stack("take1");
    let layer = doc.create_animation_layer(stack, "base");
    let cn = doc.create_curve_node(layer, AnimationKind::Position, model);
    doc.add_key(cn, 0.0, &[0.0, 0.0, 0.0]);
    doc.add_key(cn, 2.0, &[8.0, 0.0, -4.0]);
    doc.set_current_take(Some(stack));

    let data = doc.write_binary().unwrap();
    let mut doc2 = Document::new();
    doc2.read(&data).unwrap();

    let stack = doc2.find_animation_stack("take1").unwrap();
    assert_eq!(doc2.current_take(), Some(stack));

    doc2.apply_animation(stack, 1.0);
    let model = doc2.find_object_by_name("node").unwrap();
    let m = doc2.object(model).as_model().unwrap();
    assert!((m.position.x - 4.0).abs() < 1e-4);
    assert!((m.position.z + 2.0).abs() < 1e-4);
}

#[test]
fn global_settings_round_trip() {
    let mut doc = Document::new();
    doc.global_settings_mut().unit_scale = 2.54;
    doc.global_settings_mut().up_axis = 2;
    doc.global_settings_mut().frame_rate = 24.0;

    let data = doc.write_binary().unwrap();
    let mut doc2 = Document::new();
    doc2.read(&data).unwrap();

    assert_eq!(doc2.global_settings().unit_scale, 2.54);
    assert_eq!(doc2.global_settings().up_axis, 2);
    assert_eq!(doc2.global_settings().frame_rate, 24.0);
}

#[test]
fn embedded_texture_round_trip() {
    let mut doc = Document::new();
    let model = doc.create_model(ModelKind::Mesh, "tex_quad");
    let material = doc.create_material("checker_mat");
    doc.add_child(model, material);
    let texture = doc.create_object(ObjectClass::Texture, ObjectSubClass::Unknown, "checker");
    doc.add_child_prop(material, texture, "DiffuseColor");
    let video = doc.create_object(ObjectClass::Video, ObjectSubClass::Clip, "checker");
    doc.add_child(texture, video);
    let png = vec![0x89u8, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0xff];
    if let Some(v) = doc.object_mut(video).as_video_mut() {
        v.filename = "checker.png".to_string();
        v.content = png.clone();
    }

    let data = doc.write_binary().unwrap();
    let mut doc2 = Document::new();
    doc2.read(&data).unwrap();

    let material = doc2.find_object_by_name("checker_mat").unwrap();
    let conn = doc2
        .connections()
        .iter()
        .find(|c| c.parent == material && c.property.is_some())
        .unwrap();
    assert_eq!(conn.property.as_deref(), Some("DiffuseColor"));
    let texture = conn.child;
    assert!(doc2.object(texture).as_texture().is_some());
    assert_eq!(doc2.texture_video(texture).map(|v| v.content.clone()), Some(png.clone()));

    // the embedded bytes also survive the text form
    let text = doc2.write_ascii().unwrap();
    let mut doc3 = Document::new();
    doc3.read(text.as_bytes()).unwrap();
    let video = doc3.find_object_by_name("checker\u{0}\u{1}Video").unwrap();
    assert_eq!(doc3.object(video).as_video().unwrap().content, png);
}

#[test]
fn bad_magic_leaves_document_valid() {
    let mut doc = Document::new();
    let err = doc.read(b"not an fbx file at all");
    assert!(err.is_err());
    // the document is reset to a usable empty state
    assert_eq!(doc.object(doc.root_model()).display_name(), "Scene");
    assert_eq!(doc.objects().count(), 1);
}
