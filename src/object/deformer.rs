//! Skin clusters, blend shapes, and bind poses.
//!
//! A `Skin` deformer owns one `Cluster` per joint; each cluster lists
//! the control points it influences with a weight and a bind matrix
//! pair. The per-vertex view of that data is a CSR table built lazily
//! and cached on the skin, invalidated when clusters are added or
//! removed. Blend-shape channels hold morph targets applied as deltas
//! scaled by the channel weight.

use std::cell::RefCell;

use crate::tree::{NodeId, NodeTree, Property};
use crate::util::math::{DMat4, DVec3, WEIGHT_TO_PERCENT, PERCENT_TO_WEIGHT};

use super::geometry::ShapeData;
use super::ObjectHandle;

pub(crate) const SKIN_VERSION: i32 = 101;
pub(crate) const CLUSTER_VERSION: i32 = 100;
pub(crate) const BLEND_SHAPE_VERSION: i32 = 100;
pub(crate) const CHANNEL_VERSION: i32 = 100;
pub(crate) const POSE_VERSION: i32 = 100;

/// One joint influence on one control point.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct JointWeight {
    /// Index into the skin's cluster list.
    pub joint_index: i32,
    pub weight: f32,
}

/// Per-vertex joint influences in CSR form. `counts[v]` influences for
/// vertex `v` start at `offsets[v]` in `weights`, sorted by descending
/// weight.
#[derive(Debug, Clone, Default)]
pub struct JointWeights {
    pub counts: Vec<i32>,
    pub offsets: Vec<i32>,
    pub weights: Vec<JointWeight>,
    pub max_joints_per_vertex: i32,
}

/// Per-joint skinning matrices in column-vector convention.
#[derive(Debug, Clone, Default)]
pub struct JointMatrices {
    pub bindpose: Vec<DMat4>,
    pub global: Vec<DMat4>,
    /// `global * inverse_bindpose`, the matrix applied to bind-space
    /// points during deformation.
    pub joint_transform: Vec<DMat4>,
}

/// Payload of a `Skin` deformer. The cluster list lives on the object's
/// child edges; only the lazily built caches live here.
#[derive(Debug, Clone, Default)]
pub struct SkinData {
    pub(crate) weights_cache: RefCell<Option<JointWeights>>,
    pub(crate) matrices_cache: RefCell<Option<JointMatrices>>,
}

impl SkinData {
    pub(crate) fn invalidate(&self) {
        *self.weights_cache.borrow_mut() = None;
        *self.matrices_cache.borrow_mut() = None;
    }
}

/// Payload of a `Cluster` deformer: the points one joint influences and
/// the joint's bind matrices.
#[derive(Debug, Clone)]
pub struct ClusterData {
    pub indices: Vec<i32>,
    pub weights: Vec<f32>,
    /// Inverse of the joint's bind matrix.
    pub transform: DMat4,
    /// The joint's global matrix at bind time.
    pub transform_link: DMat4,
}

impl Default for ClusterData {
    fn default() -> Self {
        Self {
            indices: Vec::new(),
            weights: Vec::new(),
            transform: DMat4::IDENTITY,
            transform_link: DMat4::IDENTITY,
        }
    }
}

impl ClusterData {
    /// Record the joint's bind matrix, storing it and its inverse.
    pub fn set_bind_matrix(&mut self, m: DMat4) {
        self.transform_link = m;
        self.transform = m.inverse();
    }
}

/// Payload of a `BlendShapeChannel`. `full_weights` holds one target
/// weight per connected shape, in the unit range.
#[derive(Debug, Clone, Default)]
pub struct ChannelData {
    pub weight: f64,
    pub full_weights: Vec<f64>,
}

/// Payload of a `BindPose`: per object, its world matrix at bind time.
#[derive(Debug, Clone, Default)]
pub struct BindPoseData {
    pub pose_nodes: Vec<(ObjectHandle, DMat4)>,
}

/// Build the CSR joint-weight table from a skin's clusters, in cluster
/// order. Influences of each vertex are sorted by descending weight;
/// equal weights keep cluster order.
pub(crate) fn build_joint_weights(clusters: &[&ClusterData], point_count: usize) -> JointWeights {
    let mut jw = JointWeights {
        counts: vec![0; point_count],
        offsets: vec![0; point_count],
        ..JointWeights::default()
    };
    for cluster in clusters {
        for &pi in &cluster.indices {
            if let Some(c) = jw.counts.get_mut(pi as usize) {
                *c += 1;
            }
        }
    }
    let mut total = 0i32;
    for (v, &count) in jw.counts.iter().enumerate() {
        jw.offsets[v] = total;
        total += count;
        jw.max_joints_per_vertex = jw.max_joints_per_vertex.max(count);
    }
    jw.weights = vec![JointWeight::default(); total as usize];

    let mut cursor = vec![0i32; point_count];
    for (ji, cluster) in clusters.iter().enumerate() {
        for (&pi, &w) in cluster.indices.iter().zip(&cluster.weights) {
            let v = pi as usize;
            if v >= point_count {
                continue;
            }
            let slot = (jw.offsets[v] + cursor[v]) as usize;
            jw.weights[slot] = JointWeight { joint_index: ji as i32, weight: w };
            cursor[v] += 1;
        }
    }
    for v in 0..point_count {
        let start = jw.offsets[v] as usize;
        let end = start + jw.counts[v] as usize;
        jw.weights[start..end]
            .sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));
    }
    jw
}

/// Densify the CSR table to `joints_per_vertex` slots per vertex.
/// Vertices with at least that many influences keep the strongest ones,
/// renormalized to sum to one; vertices with fewer keep their weights
/// untouched and are padded with zero slots.
pub(crate) fn fixed_joint_weights(src: &JointWeights, joints_per_vertex: usize) -> JointWeights {
    if src.weights.is_empty() {
        return src.clone();
    }
    let point_count = src.counts.len();
    let mut jw = JointWeights {
        counts: vec![0; point_count],
        offsets: (0..point_count).map(|v| (v * joints_per_vertex) as i32).collect(),
        weights: vec![JointWeight::default(); point_count * joints_per_vertex],
        max_joints_per_vertex: (joints_per_vertex as i32).min(src.max_joints_per_vertex),
    };
    for v in 0..point_count {
        let start = src.offsets[v] as usize;
        let count = src.counts[v] as usize;
        let kept = count.min(joints_per_vertex);
        jw.counts[v] = kept as i32;
        let dst = v * joints_per_vertex;
        jw.weights[dst..dst + kept].copy_from_slice(&src.weights[start..start + kept]);
        if count >= joints_per_vertex {
            let slots = &mut jw.weights[dst..dst + kept];
            let total: f32 = slots.iter().map(|w| w.weight).sum();
            if total != 0.0 {
                let rcp = 1.0 / total;
                for w in slots {
                    w.weight *= rcp;
                }
            }
        }
    }
    jw
}

/// Linear-blend skin a point array in place.
pub(crate) fn deform_points(jw: &JointWeights, jm: &JointMatrices, points: &mut [DVec3]) {
    for (v, p) in points.iter_mut().enumerate() {
        let count = jw.counts[v] as usize;
        if count == 0 {
            continue;
        }
        let start = jw.offsets[v] as usize;
        let src = *p;
        let mut acc = DVec3::ZERO;
        for w in &jw.weights[start..start + count] {
            let m = &jm.joint_transform[w.joint_index as usize];
            acc += m.transform_point3(src) * w.weight as f64;
        }
        *p = acc;
    }
}

/// Linear-blend skin a normal array in place, ignoring translation.
pub(crate) fn deform_normals(jw: &JointWeights, jm: &JointMatrices, normals: &mut [DVec3]) {
    for (v, n) in normals.iter_mut().enumerate() {
        let count = jw.counts[v] as usize;
        if count == 0 {
            continue;
        }
        let start = jw.offsets[v] as usize;
        let src = *n;
        let mut acc = DVec3::ZERO;
        for w in &jw.weights[start..start + count] {
            let m = &jm.joint_transform[w.joint_index as usize];
            acc += m.transform_vector3(src) * w.weight as f64;
        }
        *n = acc.normalize_or_zero();
    }
}

/// Add a morph target's point deltas, scaled by `ratio`.
pub(crate) fn apply_morph_points(shape: &ShapeData, ratio: f64, points: &mut [DVec3]) {
    if ratio <= 0.0 {
        return;
    }
    for (&i, &delta) in shape.indices.iter().zip(&shape.points) {
        if let Some(p) = points.get_mut(i as usize) {
            *p += delta * ratio;
        }
    }
}

/// Add a morph target's normal deltas, scaled by `ratio`.
pub(crate) fn apply_morph_normals(shape: &ShapeData, ratio: f64, normals: &mut [DVec3]) {
    if ratio == 0.0 {
        return;
    }
    for (&i, &delta) in shape.indices.iter().zip(&shape.normals) {
        if let Some(n) = normals.get_mut(i as usize) {
            *n += delta * ratio;
        }
    }
}

// -- node translation --

pub(crate) fn write_skin(tree: &mut NodeTree, node: NodeId) {
    tree.leaf1(node, "Version", SKIN_VERSION);
    tree.leaf1(node, "Link_DeformAcuracy", 50.0f64);
    tree.leaf1(node, "SkinningType", "Linear");
}

pub(crate) fn read_cluster(tree: &NodeTree, node: NodeId) -> ClusterData {
    let mut c = ClusterData::default();
    if let Some(ix) = tree.child_property(node, "Indexes", 0).and_then(Property::to_i32_vec) {
        c.indices = ix;
    }
    if let Some(w) = tree.child_property(node, "Weights", 0).and_then(Property::to_f64_vec) {
        c.weights = w.into_iter().map(|w| w as f32).collect();
    }
    if let Some(m) = tree.child_property(node, "Transform", 0).and_then(Property::to_dmat4) {
        c.transform = m;
    }
    if let Some(m) = tree.child_property(node, "TransformLink", 0).and_then(Property::to_dmat4) {
        c.transform_link = m;
    }
    c
}

pub(crate) fn write_cluster(tree: &mut NodeTree, node: NodeId, c: &ClusterData) {
    tree.leaf1(node, "Version", CLUSTER_VERSION);
    tree.leaf(node, "UserData", vec!["".into(), "".into()]);
    if !c.indices.is_empty() {
        tree.leaf1(node, "Indexes", Property::I32Array(c.indices.clone()));
        tree.leaf1(node, "Weights",
            Property::F64Array(c.weights.iter().map(|&w| w as f64).collect()));
    }
    if c.transform != DMat4::IDENTITY || c.transform_link != DMat4::IDENTITY {
        tree.leaf1(node, "Transform", Property::from_dmat4(c.transform));
        tree.leaf1(node, "TransformLink", Property::from_dmat4(c.transform_link));
    }
}

pub(crate) fn write_blend_shape(tree: &mut NodeTree, node: NodeId) {
    tree.leaf1(node, "Version", BLEND_SHAPE_VERSION);
}

pub(crate) fn read_channel(tree: &NodeTree, node: NodeId) -> ChannelData {
    let mut c = ChannelData::default();
    if let Some(v) = tree.prop70_f64(node, "DeformPercent") {
        c.weight = v * PERCENT_TO_WEIGHT;
    }
    if let Some(w) = tree.child_property(node, "FullWeights", 0).and_then(Property::to_f64_vec) {
        c.full_weights = w.into_iter().map(|w| w * PERCENT_TO_WEIGHT).collect();
    }
    c
}

pub(crate) fn write_channel(tree: &mut NodeTree, node: NodeId, c: &ChannelData) {
    tree.leaf1(node, "Version", CHANNEL_VERSION);
    tree.leaf1(node, "FullWeights",
        Property::F64Array(c.full_weights.iter().map(|&w| w * WEIGHT_TO_PERCENT).collect()));
    let block = tree.create_child(node, "Properties70");
    tree.p70(block, "DeformPercent", "Number", "", "A",
        vec![(c.weight * WEIGHT_TO_PERCENT).into()]);
}

pub(crate) fn write_bind_pose(tree: &mut NodeTree, node: NodeId, entries: &[(i64, DMat4)]) {
    tree.leaf1(node, "Type", "BindPose");
    tree.leaf1(node, "Version", POSE_VERSION);
    tree.leaf1(node, "NbPoseNodes", entries.len() as i32);
    for &(id, matrix) in entries {
        let pn = tree.create_child(node, "PoseNode");
        tree.leaf1(pn, "Node", id);
        tree.leaf1(pn, "Matrix", Property::from_dmat4(matrix));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_clusters() -> (ClusterData, ClusterData) {
        let a = ClusterData {
            indices: vec![0, 1],
            weights: vec![1.0, 0.5],
            ..ClusterData::default()
        };
        let b = ClusterData {
            indices: vec![1, 2],
            weights: vec![0.5, 1.0],
            ..ClusterData::default()
        };
        (a, b)
    }

    #[test]
    fn test_joint_weights_csr() {
        let (a, b) = two_clusters();
        let jw = build_joint_weights(&[&a, &b], 3);
        assert_eq!(jw.counts, vec![1, 2, 1]);
        assert_eq!(jw.offsets, vec![0, 1, 3]);
        assert_eq!(jw.max_joints_per_vertex, 2);
        assert_eq!(jw.weights[0], JointWeight { joint_index: 0, weight: 1.0 });
        assert_eq!(jw.weights[3], JointWeight { joint_index: 1, weight: 1.0 });
    }

    #[test]
    fn test_equal_weights_keep_cluster_order() {
        let (a, b) = two_clusters();
        let jw = build_joint_weights(&[&a, &b], 3);
        // vertex 1 is weighted 0.5 by both joints
        assert_eq!(jw.weights[1].joint_index, 0);
        assert_eq!(jw.weights[2].joint_index, 1);
    }

    #[test]
    fn test_fixed_weights_truncate_and_renormalize() {
        let (a, b) = two_clusters();
        let jw = build_joint_weights(&[&a, &b], 3);
        let fixed = fixed_joint_weights(&jw, 1);
        assert_eq!(fixed.counts, vec![1, 1, 1]);
        assert_eq!(fixed.max_joints_per_vertex, 1);
        // vertex 1 keeps its first influence, renormalized to one
        assert_eq!(fixed.weights[1].joint_index, 0);
        assert!((fixed.weights[1].weight - 1.0).abs() < 1e-6);
        assert_eq!(fixed.weights[0].weight, 1.0);
    }

    #[test]
    fn test_fixed_weights_normalize_non_unit_totals() {
        // vertex 0 influences sum to 0.8, not 1.0
        let a = ClusterData { indices: vec![0], weights: vec![0.5], ..ClusterData::default() };
        let b = ClusterData { indices: vec![0], weights: vec![0.3], ..ClusterData::default() };
        let jw = build_joint_weights(&[&a, &b], 1);

        // truncated vertices come out summing to one
        let fixed = fixed_joint_weights(&jw, 1);
        assert!((fixed.weights[0].weight - 1.0).abs() < 1e-6);

        // so do vertices with exactly as many influences as slots
        let fixed = fixed_joint_weights(&jw, 2);
        let sum: f32 = fixed.weights[..2].iter().map(|w| w.weight).sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!((fixed.weights[0].weight - 0.625).abs() < 1e-6);
        assert_eq!(fixed.counts, vec![2]);
        assert_eq!(fixed.max_joints_per_vertex, 2);
    }

    #[test]
    fn test_fixed_weights_pad_sparse_vertices() {
        let a = ClusterData { indices: vec![0], weights: vec![1.0], ..ClusterData::default() };
        let jw = build_joint_weights(&[&a], 2);
        let fixed = fixed_joint_weights(&jw, 4);
        assert_eq!(fixed.weights.len(), 8);
        assert_eq!(fixed.weights[0].weight, 1.0);
        assert_eq!(fixed.weights[1].weight, 0.0);
        assert_eq!(fixed.weights[4].weight, 0.0);
    }

    #[test]
    fn test_deform_points_translation() {
        let jw = JointWeights {
            counts: vec![1],
            offsets: vec![0],
            weights: vec![JointWeight { joint_index: 0, weight: 1.0 }],
            max_joints_per_vertex: 1,
        };
        let jm = JointMatrices {
            bindpose: vec![DMat4::IDENTITY],
            global: vec![DMat4::from_translation(DVec3::new(0.0, 2.0, 0.0))],
            joint_transform: vec![DMat4::from_translation(DVec3::new(0.0, 2.0, 0.0))],
        };
        let mut points = vec![DVec3::new(1.0, 0.0, 0.0)];
        deform_points(&jw, &jm, &mut points);
        assert_eq!(points[0], DVec3::new(1.0, 2.0, 0.0));
    }

    #[test]
    fn test_morph_skips_nonpositive_ratio() {
        let shape = ShapeData {
            indices: vec![0],
            points: vec![DVec3::Y],
            normals: vec![],
        };
        let mut points = vec![DVec3::ZERO];
        apply_morph_points(&shape, 0.0, &mut points);
        assert_eq!(points[0], DVec3::ZERO);
        apply_morph_points(&shape, 0.5, &mut points);
        assert_eq!(points[0], DVec3::new(0.0, 0.5, 0.0));
    }

    #[test]
    fn test_set_bind_matrix() {
        let mut c = ClusterData::default();
        let bind = DMat4::from_translation(DVec3::new(3.0, 0.0, 0.0));
        c.set_bind_matrix(bind);
        assert_eq!(c.transform_link, bind);
        assert_eq!(c.transform * bind, DMat4::IDENTITY);
    }

    #[test]
    fn test_cluster_node_round_trip() {
        let mut c = ClusterData {
            indices: vec![0, 2, 5],
            weights: vec![0.25, 0.5, 1.0],
            ..ClusterData::default()
        };
        c.set_bind_matrix(DMat4::from_translation(DVec3::new(0.0, 1.0, 0.0)));

        let mut tree = NodeTree::new();
        let node = tree.create_root("Deformer");
        write_cluster(&mut tree, node, &c);

        let back = read_cluster(&tree, node);
        assert_eq!(back.indices, c.indices);
        assert_eq!(back.weights, c.weights);
        assert_eq!(back.transform_link, c.transform_link);
    }

    #[test]
    fn test_channel_percent_conversion() {
        let c = ChannelData { weight: 0.5, full_weights: vec![1.0] };
        let mut tree = NodeTree::new();
        let node = tree.create_root("Deformer");
        write_channel(&mut tree, node, &c);

        // stored in percent
        let stored = tree.child_property(node, "FullWeights", 0).unwrap().to_f64_vec().unwrap();
        assert_eq!(stored, vec![100.0]);
        assert_eq!(tree.prop70_f64(node, "DeformPercent"), Some(50.0));

        let back = read_channel(&tree, node);
        assert_eq!(back.weight, 0.5);
        assert_eq!(back.full_weights, vec![1.0]);
    }
}
