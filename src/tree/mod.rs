//! Raw FBX record container: nodes, properties, and the two codecs.
//!
//! A [`NodeTree`] owns every [`Node`] in a parsed or constructed file,
//! arena-style; nodes reference each other through [`NodeId`] indices
//! rather than owning pointers. The binary and ASCII codecs translate
//! between this tree and the two on-disk forms.

pub mod ascii;
pub mod binary;
pub mod compress;
pub mod property;

pub use property::Property;

use crate::util::math::DVec3;

/// Stable index of a node inside its [`NodeTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    #[inline]
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A named record with an ordered property list and ordered children.
///
/// A node with an empty name, no properties, and no children is the null
/// terminator sentinel used to close binary child lists.
#[derive(Debug, Default, Clone)]
pub struct Node {
    name: String,
    properties: Vec<Property>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
    force_null_terminate: bool,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    pub fn property(&self, i: usize) -> Option<&Property> {
        self.properties.get(i)
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// True for the null terminator sentinel.
    pub fn is_null(&self) -> bool {
        self.name.is_empty() && self.properties.is_empty() && self.children.is_empty()
    }

    /// Force the binary encoding to include the trailing null child marker
    /// even when it would otherwise be elided. Some consumers (the FBX SDK
    /// among them) reject object nodes without it.
    pub fn set_force_null_terminate(&mut self, v: bool) {
        self.force_null_terminate = v;
    }

    pub fn force_null_terminate(&self) -> bool {
        self.force_null_terminate
    }

    pub fn add_property(&mut self, p: impl Into<Property>) {
        self.properties.push(p.into());
    }

    pub fn set_property(&mut self, i: usize, p: impl Into<Property>) {
        if i < self.properties.len() {
            self.properties[i] = p.into();
        }
    }
}

/// Arena owner of all nodes in one document.
#[derive(Debug, Default, Clone)]
pub struct NodeTree {
    nodes: Vec<Node>,
    roots: Vec<NodeId>,
}

impl NodeTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.roots.clear();
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    fn alloc(&mut self, name: impl Into<String>) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node { name: name.into(), ..Node::default() });
        id
    }

    /// Create a new root node.
    pub fn create_root(&mut self, name: impl Into<String>) -> NodeId {
        let id = self.alloc(name);
        self.roots.push(id);
        id
    }

    /// Create a new child under `parent`.
    pub fn create_child(&mut self, parent: NodeId, name: impl Into<String>) -> NodeId {
        let id = self.alloc(name);
        self.nodes[id.index()].parent = Some(parent);
        self.nodes[parent.index()].children.push(id);
        id
    }

    /// Remove a root node from the root list. The node itself stays in the
    /// arena; this only detaches it from serialization.
    pub fn detach_root(&mut self, id: NodeId) {
        self.roots.retain(|&r| r != id);
    }

    pub fn find_root(&self, name: &str) -> Option<NodeId> {
        self.roots.iter().copied().find(|&id| self.get(id).name() == name)
    }

    pub fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.get(parent).children.iter().copied().find(|&id| self.get(id).name() == name)
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.get(id).children
    }

    pub fn name(&self, id: NodeId) -> &str {
        self.get(id).name()
    }

    pub fn properties(&self, id: NodeId) -> &[Property] {
        self.get(id).properties()
    }

    pub fn add_property(&mut self, id: NodeId, p: impl Into<Property>) {
        self.get_mut(id).add_property(p);
    }

    /// Create a leaf child holding the given properties.
    pub fn leaf(&mut self, parent: NodeId, name: &str, props: Vec<Property>) -> NodeId {
        let id = self.create_child(parent, name);
        self.get_mut(id).properties = props;
        id
    }

    /// Create a leaf child holding one property.
    pub fn leaf1(&mut self, parent: NodeId, name: &str, p: impl Into<Property>) -> NodeId {
        self.leaf(parent, name, vec![p.into()])
    }

    // -- typed child lookups, used throughout object import --

    pub fn child_property<'a>(&'a self, parent: NodeId, name: &str, i: usize) -> Option<&'a Property> {
        let c = self.find_child(parent, name)?;
        self.get(c).property(i)
    }

    pub fn child_i32(&self, parent: NodeId, name: &str) -> Option<i32> {
        self.child_property(parent, name, 0)?.as_i32()
    }

    pub fn child_i64(&self, parent: NodeId, name: &str) -> Option<i64> {
        self.child_property(parent, name, 0)?.as_i64()
    }

    pub fn child_f64(&self, parent: NodeId, name: &str) -> Option<f64> {
        self.child_property(parent, name, 0)?.as_f64()
    }

    pub fn child_str<'a>(&'a self, parent: NodeId, name: &str) -> Option<&'a str> {
        self.child_property(parent, name, 0)?.as_str()
    }

    // -- Properties70 helpers --
    //
    // A Properties70 block holds "P" children whose first four properties
    // are (name, type, label, flags) followed by the value(s).

    /// Iterate the `P` entries under a node's `Properties70` child as
    /// (property name, value slice) pairs.
    pub fn props70(&self, node: NodeId) -> impl Iterator<Item = (&str, &[Property])> {
        let block = self
            .find_child(node, "Properties70")
            .or_else(|| self.find_child(node, "Properties"));
        let children: &[NodeId] = block.map(|b| self.children(b)).unwrap_or(&[]);
        children.iter().filter_map(move |&c| {
            let n = self.get(c);
            if n.name() != "P" {
                return None;
            }
            let name = n.property(0)?.as_str()?;
            if n.properties().len() < 5 {
                return Some((name, &n.properties()[0..0]));
            }
            Some((name, &n.properties()[4..]))
        })
    }

    /// Find one `P` entry's value slice by property name.
    pub fn prop70<'a>(&'a self, node: NodeId, name: &str) -> Option<&'a [Property]> {
        self.props70(node).find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn prop70_i32(&self, node: NodeId, name: &str) -> Option<i32> {
        self.prop70(node, name)?.first()?.as_i32()
    }

    pub fn prop70_i64(&self, node: NodeId, name: &str) -> Option<i64> {
        self.prop70(node, name)?.first()?.as_i64()
    }

    pub fn prop70_f64(&self, node: NodeId, name: &str) -> Option<f64> {
        self.prop70(node, name)?.first()?.as_f64()
    }

    pub fn prop70_str<'a>(&'a self, node: NodeId, name: &str) -> Option<&'a str> {
        self.prop70(node, name)?.first()?.as_str()
    }

    pub fn prop70_dvec3(&self, node: NodeId, name: &str) -> Option<DVec3> {
        let v = self.prop70(node, name)?;
        if v.len() < 3 {
            return None;
        }
        Some(DVec3::new(v[0].as_f64()?, v[1].as_f64()?, v[2].as_f64()?))
    }

    /// Append a `P` entry to a `Properties70` node.
    pub fn p70(
        &mut self,
        block: NodeId,
        name: &str,
        ty: &str,
        label: &str,
        flags: &str,
        values: Vec<Property>,
    ) -> NodeId {
        let mut props: Vec<Property> =
            vec![name.into(), ty.into(), label.into(), flags.into()];
        props.extend(values);
        self.leaf(block, "P", props)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_build_and_find() {
        let mut t = NodeTree::new();
        let root = t.create_root("Objects");
        let child = t.create_child(root, "Model");
        t.add_property(child, 42i64);
        t.leaf1(child, "Version", 232i32);

        assert_eq!(t.roots().len(), 1);
        assert_eq!(t.find_root("Objects"), Some(root));
        assert_eq!(t.find_child(root, "Model"), Some(child));
        assert_eq!(t.child_i32(child, "Version"), Some(232));
        assert_eq!(t.get(child).parent(), Some(root));
    }

    #[test]
    fn test_null_sentinel() {
        let mut t = NodeTree::new();
        let n = t.create_root("");
        assert!(t.get(n).is_null());
        t.add_property(n, 1i32);
        assert!(!t.get(n).is_null());
    }

    #[test]
    fn test_props70_round_trip() {
        let mut t = NodeTree::new();
        let obj = t.create_root("Model");
        let block = t.create_child(obj, "Properties70");
        t.p70(block, "Lcl Translation", "Lcl Translation", "", "A", vec![
            1.0f64.into(),
            2.0f64.into(),
            3.0f64.into(),
        ]);
        t.p70(block, "RotationOrder", "enum", "", "", vec![3i32.into()]);

        assert_eq!(t.prop70_dvec3(obj, "Lcl Translation"), Some(DVec3::new(1.0, 2.0, 3.0)));
        assert_eq!(t.prop70_i32(obj, "RotationOrder"), Some(3));
        assert_eq!(t.prop70_i32(obj, "Missing"), None);
        assert_eq!(t.props70(obj).count(), 2);
    }

    #[test]
    fn test_detach_root() {
        let mut t = NodeTree::new();
        let a = t.create_root("A");
        let _b = t.create_root("B");
        t.detach_root(a);
        assert_eq!(t.roots().len(), 1);
        // arena still owns the node
        assert_eq!(t.get(a).name(), "A");
    }
}
