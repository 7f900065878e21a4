//! Animation stacks, layers, curve nodes, and curves.
//!
//! A stack owns layers, a layer owns curve nodes, and each curve node
//! binds one animatable property of its target object, with one curve
//! per scalar channel (`d|X`, `d|Y`, `d|Z`). Times are kept in seconds
//! in memory and serialized as FBX ticks. Curves that drive properties
//! with mismatched file units (film sizes in inches, deform weights in
//! percent) carry a unit conversion applied on evaluation.

use crate::tree::{NodeId, NodeTree, Property};
use crate::util::math::{
    to_seconds, to_ticks, INCH_TO_MILLIMETER, PERCENT_TO_WEIGHT,
};

/// Which property of the target object a curve node animates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnimationKind {
    #[default]
    Unknown,
    Position,
    Rotation,
    Scale,
    Color,
    Intensity,
    FocalLength,
    FilmWidth,
    FilmHeight,
    FilmOffsetX,
    FilmOffsetY,
    DeformWeight,
}

impl AnimationKind {
    /// Map a curve node's display name to its kind.
    pub fn from_node_name(name: &str) -> Self {
        match name {
            "T" => Self::Position,
            "R" => Self::Rotation,
            "S" => Self::Scale,
            "Color" => Self::Color,
            "Intensity" => Self::Intensity,
            "FocalLength" => Self::FocalLength,
            "FilmWidth" => Self::FilmWidth,
            "FilmHeight" => Self::FilmHeight,
            "FilmOffsetX" => Self::FilmOffsetX,
            "FilmOffsetY" => Self::FilmOffsetY,
            "DeformPercent" => Self::DeformWeight,
            _ => Self::Unknown,
        }
    }

    pub fn node_name(self) -> &'static str {
        match self {
            Self::Unknown => "",
            Self::Position => "T",
            Self::Rotation => "R",
            Self::Scale => "S",
            Self::Color => "Color",
            Self::Intensity => "Intensity",
            Self::FocalLength => "FocalLength",
            Self::FilmWidth => "FilmWidth",
            Self::FilmHeight => "FilmHeight",
            Self::FilmOffsetX => "FilmOffsetX",
            Self::FilmOffsetY => "FilmOffsetY",
            Self::DeformWeight => "DeformPercent",
        }
    }

    /// The OP connection property name on the target object.
    pub fn target_property(self) -> &'static str {
        match self {
            Self::Unknown => "",
            Self::Position => "Lcl Translation",
            Self::Rotation => "Lcl Rotation",
            Self::Scale => "Lcl Scaling",
            Self::Color => "Color",
            Self::Intensity => "Intensity",
            Self::FocalLength => "FocalLength",
            Self::FilmWidth => "FilmWidth",
            Self::FilmHeight => "FilmHeight",
            Self::FilmOffsetX => "FilmOffsetX",
            Self::FilmOffsetY => "FilmOffsetY",
            Self::DeformWeight => "DeformPercent",
        }
    }

    pub fn from_target_property(name: &str) -> Self {
        match name {
            "Lcl Translation" => Self::Position,
            "Lcl Rotation" => Self::Rotation,
            "Lcl Scaling" => Self::Scale,
            "Color" => Self::Color,
            "Intensity" => Self::Intensity,
            "FocalLength" => Self::FocalLength,
            "FilmWidth" => Self::FilmWidth,
            "FilmHeight" => Self::FilmHeight,
            "FilmOffsetX" => Self::FilmOffsetX,
            "FilmOffsetY" => Self::FilmOffsetY,
            "DeformPercent" => Self::DeformWeight,
            _ => Self::Unknown,
        }
    }

    /// Number of scalar channels this kind drives.
    pub fn channel_count(self) -> usize {
        match self {
            Self::Position | Self::Rotation | Self::Scale | Self::Color => 3,
            Self::Unknown => 0,
            _ => 1,
        }
    }

    /// Factor from file values to in-memory values. Film sizes are
    /// stored in inches, deform weights in percent.
    pub fn unit_conversion(self) -> f32 {
        match self {
            Self::FilmWidth | Self::FilmHeight | Self::FilmOffsetX | Self::FilmOffsetY => {
                INCH_TO_MILLIMETER as f32
            }
            Self::DeformWeight => PERCENT_TO_WEIGHT as f32,
            _ => 1.0,
        }
    }
}

/// Payload of an `AnimationCurve`: key times in seconds and raw key
/// values as stored on disk.
#[derive(Debug, Clone)]
pub struct CurveData {
    pub default_value: f32,
    pub times: Vec<f32>,
    pub values: Vec<f32>,
    unit_conversion: f32,
    unit_conversion_rcp: f32,
}

impl Default for CurveData {
    fn default() -> Self {
        Self {
            default_value: 0.0,
            times: Vec::new(),
            values: Vec::new(),
            unit_conversion: 1.0,
            unit_conversion_rcp: 1.0,
        }
    }
}

impl CurveData {
    pub fn unit_conversion(&self) -> f32 {
        self.unit_conversion
    }

    pub fn set_unit_conversion(&mut self, c: f32) {
        self.unit_conversion = c;
        self.unit_conversion_rcp = 1.0 / c;
    }

    pub fn start_time(&self) -> f32 {
        self.times.first().copied().unwrap_or(0.0)
    }

    pub fn stop_time(&self) -> f32 {
        self.times.last().copied().unwrap_or(0.0)
    }

    /// Sample the curve with linear interpolation. Outside the key range
    /// the nearest key value holds.
    pub fn evaluate(&self, time: f32) -> f32 {
        if self.times.is_empty() {
            return self.default_value * self.unit_conversion;
        }
        let raw = match self.times.iter().position(|&t| t >= time) {
            Some(0) => self.values[0],
            None => self.values[self.values.len() - 1],
            Some(i) => {
                let (t0, t1) = (self.times[i - 1], self.times[i]);
                let (v0, v1) = (self.values[i - 1], self.values[i]);
                let f = if t1 > t0 { (time - t0) / (t1 - t0) } else { 0.0 };
                v0 + (v1 - v0) * f
            }
        };
        raw * self.unit_conversion
    }

    /// Append a key, taking the value in in-memory units.
    pub fn add_value(&mut self, time: f32, value: f32) {
        self.times.push(time);
        self.values.push(value * self.unit_conversion_rcp);
    }
}

/// Payload of an `AnimationCurveNode`: the animated kind and the
/// per-channel default values from `d|X`, `d|Y`, `d|Z`.
#[derive(Debug, Clone, Default)]
pub struct CurveNodeData {
    pub kind: AnimationKind,
    pub defaults: [f64; 3],
}

/// Payload of an `AnimationStack`: the take's time spans in seconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct StackData {
    pub local_start: f32,
    pub local_stop: f32,
    pub reference_start: f32,
    pub reference_stop: f32,
}

// -- node translation --

pub(crate) const CURVE_CHANNELS: [&str; 3] = ["d|X", "d|Y", "d|Z"];

pub(crate) fn read_curve(tree: &NodeTree, node: NodeId) -> CurveData {
    let mut c = CurveData::default();
    if let Some(v) = tree.child_f64(node, "Default") {
        c.default_value = v as f32;
    }
    if let Some(t) = tree.child_property(node, "KeyTime", 0).and_then(Property::to_i64_vec) {
        c.times = t.into_iter().map(|t| to_seconds(t) as f32).collect();
    }
    if let Some(v) = tree.child_property(node, "KeyValueFloat", 0).and_then(Property::to_f32_vec) {
        c.values = v;
    }
    c
}

pub(crate) fn write_curve(tree: &mut NodeTree, node: NodeId, c: &CurveData) {
    let n = c.times.len();
    tree.leaf1(node, "Default", c.default_value as f64);
    tree.leaf1(node, "KeyVer", 4008i32);
    tree.leaf1(node, "KeyTime",
        Property::I64Array(c.times.iter().map(|&t| to_ticks(t as f64)).collect()));
    tree.leaf1(node, "KeyValueFloat", Property::F32Array(c.values.clone()));
    // one shared linear key attribute
    tree.leaf1(node, "KeyAttrFlags", Property::I32Array(vec![8]));
    tree.leaf1(node, "KeyAttrDataFloat", Property::F32Array(vec![0.0; 4]));
    tree.leaf1(node, "KeyAttrRefCount", Property::I32Array(vec![n as i32]));
}

pub(crate) fn read_curve_node(tree: &NodeTree, node: NodeId, display_name: &str) -> CurveNodeData {
    let mut c = CurveNodeData {
        kind: AnimationKind::from_node_name(display_name),
        ..CurveNodeData::default()
    };
    for (i, channel) in CURVE_CHANNELS.iter().enumerate() {
        if let Some(v) = tree.prop70_f64(node, channel) {
            c.defaults[i] = v;
        }
    }
    c
}

pub(crate) fn write_curve_node(tree: &mut NodeTree, node: NodeId, c: &CurveNodeData) {
    let block = tree.create_child(node, "Properties70");
    for (i, channel) in CURVE_CHANNELS.iter().take(c.kind.channel_count().max(1)).enumerate() {
        tree.p70(block, channel, "Number", "", "A", vec![c.defaults[i].into()]);
    }
}

pub(crate) fn read_stack(tree: &NodeTree, node: NodeId) -> StackData {
    let mut s = StackData::default();
    if let Some(t) = tree.prop70_i64(node, "LocalStart") {
        s.local_start = to_seconds(t) as f32;
    }
    if let Some(t) = tree.prop70_i64(node, "LocalStop") {
        s.local_stop = to_seconds(t) as f32;
    }
    if let Some(t) = tree.prop70_i64(node, "ReferenceStart") {
        s.reference_start = to_seconds(t) as f32;
    }
    if let Some(t) = tree.prop70_i64(node, "ReferenceStop") {
        s.reference_stop = to_seconds(t) as f32;
    }
    s
}

pub(crate) fn write_stack(tree: &mut NodeTree, node: NodeId, s: &StackData) {
    let block = tree.create_child(node, "Properties70");
    if s.local_start != 0.0 {
        tree.p70(block, "LocalStart", "KTime", "Time", "",
            vec![to_ticks(s.local_start as f64).into()]);
    }
    if s.local_stop != 0.0 {
        tree.p70(block, "LocalStop", "KTime", "Time", "",
            vec![to_ticks(s.local_stop as f64).into()]);
    }
    if s.reference_start != 0.0 {
        tree.p70(block, "ReferenceStart", "KTime", "Time", "",
            vec![to_ticks(s.reference_start as f64).into()]);
    }
    if s.reference_stop != 0.0 {
        tree.p70(block, "ReferenceStop", "KTime", "Time", "",
            vec![to_ticks(s.reference_stop as f64).into()]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_curve_evaluate_linear() {
        let mut c = CurveData::default();
        c.add_value(0.0, 0.0);
        c.add_value(1.0, 10.0);
        assert_eq!(c.evaluate(-1.0), 0.0);
        assert_eq!(c.evaluate(0.5), 5.0);
        assert_eq!(c.evaluate(1.0), 10.0);
        assert_eq!(c.evaluate(2.0), 10.0);
    }

    #[test]
    fn test_curve_empty_returns_default() {
        let c = CurveData { default_value: 3.5, ..CurveData::default() };
        assert_eq!(c.evaluate(0.0), 3.5);
    }

    #[test]
    fn test_unit_conversion_round_trips() {
        let mut c = CurveData::default();
        c.set_unit_conversion(AnimationKind::DeformWeight.unit_conversion());
        c.add_value(0.0, 0.5);
        // raw storage stays in file units (percent)
        assert!((c.values[0] - 50.0).abs() < 1e-4);
        assert!((c.evaluate(0.0) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_kind_tables() {
        assert_eq!(AnimationKind::from_node_name("T"), AnimationKind::Position);
        assert_eq!(AnimationKind::Position.target_property(), "Lcl Translation");
        assert_eq!(
            AnimationKind::from_target_property("Lcl Scaling"),
            AnimationKind::Scale
        );
        assert_eq!(AnimationKind::Rotation.channel_count(), 3);
        assert_eq!(AnimationKind::FocalLength.channel_count(), 1);
        assert_eq!(AnimationKind::from_node_name("Wobble"), AnimationKind::Unknown);
    }

    #[test]
    fn test_curve_node_round_trip() {
        let c = CurveNodeData {
            kind: AnimationKind::Position,
            defaults: [1.0, 2.0, 3.0],
        };
        let mut tree = NodeTree::new();
        let node = tree.create_root("AnimationCurveNode");
        write_curve_node(&mut tree, node, &c);

        let back = read_curve_node(&tree, node, "T");
        assert_eq!(back.kind, AnimationKind::Position);
        assert_eq!(back.defaults, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_curve_node_round_trip_in_ticks() {
        let mut c = CurveData::default();
        c.add_value(0.0, 1.0);
        c.add_value(0.5, 2.0);
        c.add_value(1.0, 4.0);

        let mut tree = NodeTree::new();
        let node = tree.create_root("AnimationCurve");
        write_curve(&mut tree, node, &c);

        let back = read_curve(&tree, node);
        assert_eq!(back.values, c.values);
        for (a, b) in back.times.iter().zip(&c.times) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_stack_time_spans() {
        let s = StackData {
            local_start: 0.0,
            local_stop: 2.5,
            reference_start: 0.0,
            reference_stop: 2.5,
        };
        let mut tree = NodeTree::new();
        let node = tree.create_root("AnimationStack");
        write_stack(&mut tree, node, &s);

        let back = read_stack(&tree, node);
        assert!((back.local_stop - 2.5).abs() < 1e-6);
        assert!((back.reference_stop - 2.5).abs() < 1e-6);
        assert_eq!(back.local_start, 0.0);
    }
}
