//! Surface materials, textures, and embedded media.
//!
//! Materials hold the classic Phong color set; textures bind to a
//! material property through an `OP` connection carrying the property
//! name (for example `DiffuseColor`). A texture's pixel data lives on a
//! separate `Video` clip object connected as its child, either as a
//! file reference or embedded bytes.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tracing::warn;

use crate::tree::{NodeId, NodeTree, Property};
use crate::util::math::DVec3;

pub(crate) const MATERIAL_VERSION: i32 = 102;
pub(crate) const TEXTURE_VERSION: i32 = 202;

/// Payload of a `Material` object.
#[derive(Debug, Clone)]
pub struct MaterialData {
    pub shading_model: String,
    pub ambient_color: DVec3,
    pub diffuse_color: DVec3,
    pub specular_color: DVec3,
    pub shininess: f64,
    pub opacity: f64,
}

impl Default for MaterialData {
    fn default() -> Self {
        Self {
            shading_model: "Phong".to_string(),
            ambient_color: DVec3::ZERO,
            diffuse_color: DVec3::ONE,
            specular_color: DVec3::ZERO,
            shininess: 20.0,
            opacity: 1.0,
        }
    }
}

/// Payload of a `Texture` object. Pixel data is resolved through the
/// connected `Video` child.
#[derive(Debug, Clone, Default)]
pub struct TextureData {
    pub filename: String,
}

/// Payload of a `Video` clip. `content` is empty for file references
/// and holds the raw media bytes when embedded.
#[derive(Debug, Clone, Default)]
pub struct VideoData {
    pub filename: String,
    pub content: Vec<u8>,
}

impl VideoData {
    pub fn is_embedded(&self) -> bool {
        !self.content.is_empty()
    }
}

// -- node translation --

pub(crate) fn read_material(tree: &NodeTree, node: NodeId) -> MaterialData {
    let mut m = MaterialData::default();
    if let Some(s) = tree.child_str(node, "ShadingModel") {
        m.shading_model = s.to_string();
    }
    if let Some(c) = tree.prop70_dvec3(node, "AmbientColor") {
        m.ambient_color = c;
    }
    if let Some(c) = tree.prop70_dvec3(node, "DiffuseColor") {
        m.diffuse_color = c;
    }
    if let Some(c) = tree.prop70_dvec3(node, "SpecularColor") {
        m.specular_color = c;
    }
    if let Some(v) = tree.prop70_f64(node, "Shininess") {
        m.shininess = v;
    }
    if let Some(v) = tree.prop70_f64(node, "Opacity") {
        m.opacity = v;
    }
    m
}

pub(crate) fn write_material(tree: &mut NodeTree, node: NodeId, m: &MaterialData) {
    tree.leaf1(node, "Version", MATERIAL_VERSION);
    tree.leaf1(node, "ShadingModel", m.shading_model.as_str());
    let block = tree.create_child(node, "Properties70");
    tree.p70(block, "AmbientColor", "Color", "", "A", dvec3_values(m.ambient_color));
    tree.p70(block, "DiffuseColor", "Color", "", "A", dvec3_values(m.diffuse_color));
    tree.p70(block, "SpecularColor", "Color", "", "A", dvec3_values(m.specular_color));
    tree.p70(block, "Shininess", "Number", "", "A", vec![m.shininess.into()]);
    tree.p70(block, "Opacity", "Number", "", "A", vec![m.opacity.into()]);
}

pub(crate) fn read_texture(tree: &NodeTree, node: NodeId) -> TextureData {
    let mut t = TextureData::default();
    if let Some(f) = tree.child_str(node, "FileName").or_else(|| tree.child_str(node, "Filename")) {
        t.filename = f.to_string();
    }
    t
}

pub(crate) fn write_texture(tree: &mut NodeTree, node: NodeId, t: &TextureData) {
    tree.leaf1(node, "Type", "TextureVideoClip");
    tree.leaf1(node, "Version", TEXTURE_VERSION);
    tree.leaf1(node, "FileName", t.filename.as_str());
    tree.leaf1(node, "RelativeFilename", "");
}

pub(crate) fn read_video(tree: &NodeTree, node: NodeId) -> VideoData {
    let mut v = VideoData::default();
    if let Some(f) = tree.child_str(node, "Filename").or_else(|| tree.child_str(node, "FileName")) {
        v.filename = f.to_string();
    }
    if let Some(p) = tree.child_property(node, "Content", 0) {
        if let Some(bytes) = p.as_blob() {
            v.content = bytes.to_vec();
        } else if let Some(text) = p.as_str() {
            // the ASCII codec spells embedded content as base64
            match BASE64.decode(text) {
                Ok(bytes) => v.content = bytes,
                Err(_) => warn!(filename = %v.filename, "undecodable embedded content"),
            }
        }
    }
    v
}

pub(crate) fn write_video(tree: &mut NodeTree, node: NodeId, v: &VideoData) {
    tree.leaf1(node, "Type", "Clip");
    tree.leaf1(node, "Filename", v.filename.as_str());
    tree.leaf1(node, "RelativeFilename", "");
    if v.is_embedded() {
        tree.leaf1(node, "Content", Property::Blob(v.content.clone()));
    }
}

fn dvec3_values(v: DVec3) -> Vec<Property> {
    vec![v.x.into(), v.y.into(), v.z.into()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_material_node_round_trip() {
        let m = MaterialData {
            shading_model: "Lambert".to_string(),
            ambient_color: DVec3::splat(0.1),
            diffuse_color: DVec3::new(0.8, 0.2, 0.2),
            specular_color: DVec3::splat(0.5),
            shininess: 32.0,
            opacity: 0.75,
        };
        let mut tree = NodeTree::new();
        let node = tree.create_root("Material");
        write_material(&mut tree, node, &m);

        let back = read_material(&tree, node);
        assert_eq!(back.shading_model, "Lambert");
        assert_eq!(back.diffuse_color, m.diffuse_color);
        assert_eq!(back.shininess, 32.0);
        assert_eq!(back.opacity, 0.75);
    }

    #[test]
    fn test_video_embedding() {
        let v = VideoData {
            filename: "checker.png".to_string(),
            content: vec![0x89, 0x50, 0x4e, 0x47],
        };
        assert!(v.is_embedded());

        let mut tree = NodeTree::new();
        let node = tree.create_root("Video");
        write_video(&mut tree, node, &v);

        let back = read_video(&tree, node);
        assert_eq!(back.filename, "checker.png");
        assert_eq!(back.content, v.content);
    }

    #[test]
    fn test_video_content_from_base64_string() {
        let bytes = vec![0x89u8, 0x50, 0x4e, 0x47];
        let mut tree = NodeTree::new();
        let node = tree.create_root("Video");
        tree.leaf1(node, "Filename", "checker.png");
        tree.leaf1(node, "Content", BASE64.encode(&bytes));

        let back = read_video(&tree, node);
        assert_eq!(back.content, bytes);
    }

    #[test]
    fn test_texture_node_round_trip() {
        let t = TextureData { filename: "/tex/checker.png".to_string() };
        let mut tree = NodeTree::new();
        let node = tree.create_root("Texture");
        write_texture(&mut tree, node, &t);
        assert_eq!(read_texture(&tree, node).filename, t.filename);
    }
}
