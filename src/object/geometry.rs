//! Mesh and blend-shape geometry payloads.
//!
//! Polygon meshes arrive as a flat `PolygonVertexIndex` array where the
//! last index of each polygon is bitwise-complemented. Import decodes
//! that into per-polygon counts, then fan-triangulates every polygon
//! and remaps the affected layers so downstream consumers only ever see
//! triangles. Export re-applies the complement from the counts array.

use tracing::warn;

use crate::tree::{NodeId, NodeTree, Property};
use crate::util::math::{DVec2, DVec3, DVec4};

/// How layer elements map onto mesh topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingMode {
    ByControlPoint,
    ByPolygonVertex,
    ByPolygon,
    ByEdge,
    AllSame,
}

impl MappingMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ByControlPoint" | "ByVertex" | "ByVertice" => Some(Self::ByControlPoint),
            "ByPolygonVertex" => Some(Self::ByPolygonVertex),
            "ByPolygon" => Some(Self::ByPolygon),
            "ByEdge" => Some(Self::ByEdge),
            "AllSame" => Some(Self::AllSame),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ByControlPoint => "ByControlPoint",
            Self::ByPolygonVertex => "ByPolygonVertex",
            Self::ByPolygon => "ByPolygon",
            Self::ByEdge => "ByEdge",
            Self::AllSame => "AllSame",
        }
    }
}

/// Whether layer data is indexed or used directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceMode {
    Direct,
    IndexToDirect,
}

impl ReferenceMode {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Direct" => Some(Self::Direct),
            "IndexToDirect" | "Index" => Some(Self::IndexToDirect),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Direct => "Direct",
            Self::IndexToDirect => "IndexToDirect",
        }
    }
}

/// One layer of per-element mesh data (normals, UVs, colors, material
/// assignments).
#[derive(Debug, Clone)]
pub struct LayerElement<T> {
    pub name: String,
    pub data: Vec<T>,
    pub indices: Vec<i32>,
    pub mapping_mode: Option<MappingMode>,
    pub reference_mode: Option<ReferenceMode>,
}

impl<T> Default for LayerElement<T> {
    fn default() -> Self {
        Self {
            name: String::new(),
            data: Vec::new(),
            indices: Vec::new(),
            mapping_mode: None,
            reference_mode: None,
        }
    }
}

impl<T: Clone> LayerElement<T> {
    /// Element count the mapping mode is judged against.
    pub fn mapping_size(&self) -> usize {
        if self.indices.is_empty() {
            self.data.len()
        } else {
            self.indices.len()
        }
    }

    /// Resolve the value for a polygon-vertex slot, following the index
    /// table when present.
    pub fn value_for(&self, slot: usize) -> Option<T> {
        let i = if self.indices.is_empty() {
            slot
        } else {
            *self.indices.get(slot)? as usize
        };
        self.data.get(i).cloned()
    }

    /// Fill in missing mapping and reference modes from the data shape.
    /// A declared mode that disagrees with the expected one is kept but
    /// warned about. Ambiguous sizes resolve to the last candidate, so
    /// AllSame outranks ByPolygon outranks ByControlPoint outranks
    /// ByPolygonVertex.
    pub fn check_modes(&mut self, point_count: usize, vertex_count: usize, polygon_count: usize) {
        let expected_ref = if self.indices.is_empty() {
            ReferenceMode::Direct
        } else {
            ReferenceMode::IndexToDirect
        };
        match self.reference_mode {
            None => self.reference_mode = Some(expected_ref),
            Some(declared) if declared != expected_ref => warn!(
                layer = %self.name,
                declared = declared.name(),
                expected = expected_ref.name(),
                "unexpected reference mode"
            ),
            _ => {}
        }

        let size = if self.reference_mode == Some(ReferenceMode::Direct) {
            self.data.len()
        } else {
            self.indices.len()
        };
        let mut matches = 0;
        let mut expected = None;
        if size == vertex_count {
            expected = Some(MappingMode::ByPolygonVertex);
            matches += 1;
        }
        if size == point_count {
            expected = Some(MappingMode::ByControlPoint);
            matches += 1;
        }
        if size == polygon_count {
            expected = Some(MappingMode::ByPolygon);
            matches += 1;
        }
        if size == 1 {
            expected = Some(MappingMode::AllSame);
            matches += 1;
        }
        match self.mapping_mode {
            None => {
                self.mapping_mode = expected;
                if matches > 1 {
                    warn!(
                        layer = %self.name,
                        size,
                        picked = expected.map_or("None", MappingMode::name),
                        "ambiguous layer element mapping"
                    );
                }
            }
            Some(declared) if matches == 0 || Some(declared) != expected => warn!(
                layer = %self.name,
                declared = declared.name(),
                expected = expected.map_or("None", MappingMode::name),
                "unexpected mapping mode"
            ),
            _ => {}
        }
    }
}

/// Entry for the `Layer` summary node written alongside layer elements.
#[derive(Debug, Clone)]
pub struct LayerElementDesc {
    pub type_name: &'static str,
    pub index: i32,
}

/// Polygon mesh payload of a `Geometry` object.
#[derive(Debug, Clone, Default)]
pub struct GeomMeshData {
    pub points: Vec<DVec3>,
    /// Polygon vertex indices, positive form. `counts` delimits polygons.
    pub indices: Vec<i32>,
    /// Vertices per polygon; after import these are all 3.
    pub counts: Vec<i32>,
    pub normal_layers: Vec<LayerElement<DVec3>>,
    pub uv_layers: Vec<LayerElement<DVec2>>,
    pub color_layers: Vec<LayerElement<DVec4>>,
    pub material_layers: Vec<LayerElement<i32>>,
}

impl GeomMeshData {
    /// Material slot for one polygon-vertex slot from the first material
    /// layer, or 0 when the mesh has no material layer.
    pub fn material_for_vertex(&self, slot: usize) -> i32 {
        let Some(layer) = self.material_layers.first() else {
            return 0;
        };
        match layer.mapping_mode {
            Some(MappingMode::AllSame) => layer.indices.first().copied().unwrap_or(0),
            Some(MappingMode::ByPolygon) => {
                // counts are all 3 after triangulation
                layer.indices.get(slot / 3).copied().unwrap_or(0)
            }
            _ => layer.indices.get(slot).copied().unwrap_or(0),
        }
    }

    /// Fan-triangulate in place, remapping per-vertex and per-polygon
    /// layers through the new ordering. Pure triangle meshes are left
    /// untouched.
    pub fn triangulate(&mut self) {
        if self.counts.iter().all(|&c| c == 3) {
            return;
        }
        let mut tri_indices = Vec::with_capacity(self.indices.len());
        let mut vertex_map: Vec<u32> = Vec::with_capacity(self.indices.len());
        let mut polygon_map: Vec<u32> = Vec::new();
        let mut offset = 0usize;
        for (poly, &count) in self.counts.iter().enumerate() {
            let count = count as usize;
            for j in 1..count.saturating_sub(1) {
                for slot in [offset, offset + j, offset + j + 1] {
                    tri_indices.push(self.indices[slot]);
                    vertex_map.push(slot as u32);
                }
                polygon_map.push(poly as u32);
            }
            offset += count;
        }
        self.indices = tri_indices;
        self.counts = vec![3; polygon_map.len()];

        for layer in &mut self.normal_layers {
            remap_layer(layer, &vertex_map, &polygon_map);
        }
        for layer in &mut self.uv_layers {
            remap_layer(layer, &vertex_map, &polygon_map);
        }
        for layer in &mut self.color_layers {
            remap_layer(layer, &vertex_map, &polygon_map);
        }
        for layer in &mut self.material_layers {
            remap_layer(layer, &vertex_map, &polygon_map);
        }
    }
}

fn remap_layer<T: Clone>(layer: &mut LayerElement<T>, vertex_map: &[u32], polygon_map: &[u32]) {
    let map = match layer.mapping_mode {
        Some(MappingMode::ByPolygonVertex) => vertex_map,
        Some(MappingMode::ByPolygon) => polygon_map,
        _ => return,
    };
    if layer.indices.is_empty() {
        layer.data = map.iter().filter_map(|&s| layer.data.get(s as usize).cloned()).collect();
    } else {
        layer.indices =
            map.iter().filter_map(|&s| layer.indices.get(s as usize).copied()).collect();
    }
    if layer.mapping_mode == Some(MappingMode::ByPolygon) {
        layer.mapping_mode = Some(MappingMode::ByPolygonVertex);
    }
}

/// Morph target payload of a `Geometry` object with the `Shape` subclass.
/// Points and normals are deltas addressed by `indices` into the base
/// mesh's control points.
#[derive(Debug, Clone, Default)]
pub struct ShapeData {
    pub indices: Vec<i32>,
    pub points: Vec<DVec3>,
    pub normals: Vec<DVec3>,
}

// -- node translation --

/// Split a `PolygonVertexIndex` array into positive indices and
/// per-polygon counts. The complemented index closes each polygon.
fn decode_polygons(raw: &[i32]) -> (Vec<i32>, Vec<i32>) {
    let mut indices = Vec::with_capacity(raw.len());
    let mut counts = Vec::new();
    let mut current = 0i32;
    for &v in raw {
        current += 1;
        if v < 0 {
            indices.push(!v);
            counts.push(current);
            current = 0;
        } else {
            indices.push(v);
        }
    }
    if current > 0 {
        counts.push(current);
    }
    (indices, counts)
}

fn encode_polygons(indices: &[i32], counts: &[i32]) -> Vec<i32> {
    let mut out = indices.to_vec();
    let mut offset = 0usize;
    for &count in counts {
        let count = count as usize;
        if count > 0 && offset + count <= out.len() {
            out[offset + count - 1] = !out[offset + count - 1];
        }
        offset += count;
    }
    out
}

fn read_layer_common<T>(tree: &NodeTree, node: NodeId, index_name: &str) -> LayerElement<T> {
    let mut layer = LayerElement::default();
    if let Some(n) = tree.child_str(node, "Name") {
        layer.name = n.to_string();
    }
    if let Some(m) = tree.child_str(node, "MappingInformationType") {
        layer.mapping_mode = MappingMode::from_name(m);
        if layer.mapping_mode.is_none() {
            warn!(mode = m, "unknown mapping mode");
        }
    }
    if let Some(r) = tree.child_str(node, "ReferenceInformationType") {
        layer.reference_mode = ReferenceMode::from_name(r);
    }
    if let Some(ix) = tree.child_property(node, index_name, 0).and_then(Property::to_i32_vec) {
        layer.indices = ix;
    }
    layer
}

pub(crate) fn read_geom_mesh(tree: &NodeTree, node: NodeId) -> GeomMeshData {
    let mut mesh = GeomMeshData::default();
    if let Some(v) = tree.child_property(node, "Vertices", 0).and_then(Property::to_dvec3_vec) {
        mesh.points = v;
    }
    if let Some(raw) =
        tree.child_property(node, "PolygonVertexIndex", 0).and_then(Property::to_i32_vec)
    {
        let (indices, counts) = decode_polygons(&raw);
        mesh.indices = indices;
        mesh.counts = counts;
    }
    let point_count = mesh.points.len();
    let vertex_count = mesh.indices.len();
    let polygon_count = mesh.counts.len();

    for &child in tree.children(node) {
        match tree.name(child) {
            "LayerElementNormal" => {
                let mut layer: LayerElement<DVec3> =
                    read_layer_common(tree, child, "NormalsIndex");
                if let Some(d) =
                    tree.child_property(child, "Normals", 0).and_then(Property::to_dvec3_vec)
                {
                    layer.data = d;
                }
                layer.check_modes(point_count, vertex_count, polygon_count);
                mesh.normal_layers.push(layer);
            }
            "LayerElementUV" => {
                let mut layer: LayerElement<DVec2> = read_layer_common(tree, child, "UVIndex");
                if let Some(d) =
                    tree.child_property(child, "UV", 0).and_then(Property::to_dvec2_vec)
                {
                    layer.data = d;
                }
                layer.check_modes(point_count, vertex_count, polygon_count);
                mesh.uv_layers.push(layer);
            }
            "LayerElementColor" => {
                let mut layer: LayerElement<DVec4> =
                    read_layer_common(tree, child, "ColorIndex");
                if let Some(d) =
                    tree.child_property(child, "Colors", 0).and_then(Property::to_dvec4_vec)
                {
                    layer.data = d;
                }
                layer.check_modes(point_count, vertex_count, polygon_count);
                mesh.color_layers.push(layer);
            }
            "LayerElementMaterial" => {
                // material layers keep their declared modes as-is
                let layer: LayerElement<i32> = read_layer_common(tree, child, "Materials");
                mesh.material_layers.push(layer);
            }
            _ => {}
        }
    }

    mesh.triangulate();
    mesh
}

pub(crate) fn write_geom_mesh(tree: &mut NodeTree, node: NodeId, mesh: &GeomMeshData) {
    tree.leaf1(node, "GeometryVersion", 124i32);
    tree.leaf1(node, "Vertices", Property::from_dvec3_slice(&mesh.points));
    tree.leaf1(node, "PolygonVertexIndex",
        Property::I32Array(encode_polygons(&mesh.indices, &mesh.counts)));

    let mut descs: Vec<LayerElementDesc> = Vec::new();
    for (i, layer) in mesh.normal_layers.iter().enumerate() {
        let e = write_layer_common(tree, node, "LayerElementNormal", i as i32, layer);
        tree.leaf1(e, "Normals", Property::from_dvec3_slice(&layer.data));
        if !layer.indices.is_empty() {
            tree.leaf1(e, "NormalsIndex", Property::I32Array(layer.indices.clone()));
        }
        descs.push(LayerElementDesc { type_name: "LayerElementNormal", index: i as i32 });
    }
    for (i, layer) in mesh.uv_layers.iter().enumerate() {
        let e = write_layer_common(tree, node, "LayerElementUV", i as i32, layer);
        tree.leaf1(e, "UV", Property::from_dvec2_slice(&layer.data));
        if !layer.indices.is_empty() {
            tree.leaf1(e, "UVIndex", Property::I32Array(layer.indices.clone()));
        }
        descs.push(LayerElementDesc { type_name: "LayerElementUV", index: i as i32 });
    }
    for (i, layer) in mesh.color_layers.iter().enumerate() {
        let e = write_layer_common(tree, node, "LayerElementColor", i as i32, layer);
        tree.leaf1(e, "Colors", Property::from_dvec4_slice(&layer.data));
        if !layer.indices.is_empty() {
            tree.leaf1(e, "ColorIndex", Property::I32Array(layer.indices.clone()));
        }
        descs.push(LayerElementDesc { type_name: "LayerElementColor", index: i as i32 });
    }
    for (i, layer) in mesh.material_layers.iter().enumerate() {
        let e = write_layer_common(tree, node, "LayerElementMaterial", i as i32, layer);
        tree.leaf1(e, "Materials", Property::I32Array(layer.indices.clone()));
        descs.push(LayerElementDesc { type_name: "LayerElementMaterial", index: i as i32 });
    }

    if !descs.is_empty() {
        let layer = tree.create_child(node, "Layer");
        tree.add_property(layer, 0i32);
        tree.leaf1(layer, "Version", 100i32);
        for d in descs {
            let e = tree.create_child(layer, "LayerElement");
            tree.leaf1(e, "Type", d.type_name);
            tree.leaf1(e, "TypedIndex", d.index);
        }
    }
}

fn write_layer_common<T>(
    tree: &mut NodeTree,
    node: NodeId,
    name: &str,
    index: i32,
    layer: &LayerElement<T>,
) -> NodeId {
    let e = tree.create_child(node, name);
    tree.add_property(e, index);
    tree.leaf1(e, "Version", 101i32);
    tree.leaf1(e, "Name", layer.name.as_str());
    let mapping = layer.mapping_mode.unwrap_or(MappingMode::ByPolygonVertex);
    let reference = layer.reference_mode.unwrap_or(if layer.indices.is_empty() {
        ReferenceMode::Direct
    } else {
        ReferenceMode::IndexToDirect
    });
    tree.leaf1(e, "MappingInformationType", mapping.name());
    tree.leaf1(e, "ReferenceInformationType", reference.name());
    e
}

pub(crate) fn read_shape(tree: &NodeTree, node: NodeId) -> ShapeData {
    let mut shape = ShapeData::default();
    if let Some(ix) = tree.child_property(node, "Indexes", 0).and_then(Property::to_i32_vec) {
        shape.indices = ix;
    }
    if let Some(v) = tree.child_property(node, "Vertices", 0).and_then(Property::to_dvec3_vec) {
        shape.points = v;
    }
    if let Some(n) = tree.child_property(node, "Normals", 0).and_then(Property::to_dvec3_vec) {
        shape.normals = n;
    }
    shape
}

pub(crate) fn write_shape(tree: &mut NodeTree, node: NodeId, shape: &ShapeData) {
    tree.leaf1(node, "Version", 100i32);
    tree.leaf1(node, "Indexes", Property::I32Array(shape.indices.clone()));
    tree.leaf1(node, "Vertices", Property::from_dvec3_slice(&shape.points));
    if !shape.normals.is_empty() {
        tree.leaf1(node, "Normals", Property::from_dvec3_slice(&shape.normals));
    }
}
