//! Typed property values carried by tree nodes.
//!
//! A [`Property`] is one value in a node's ordered property list. The
//! variant is the authoritative type tag: it determines the byte layout
//! used by the binary codec in both directions, and a property never
//! changes variant except through explicit reassignment.

use crate::util::math::{DMat4, DVec2, DVec3, DVec4};

/// One typed value inside a [`Node`](crate::tree::Node).
#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    BoolArray(Vec<bool>),
    I32Array(Vec<i32>),
    I64Array(Vec<i64>),
    F32Array(Vec<f32>),
    F64Array(Vec<f64>),
    String(String),
    Blob(Vec<u8>),
}

/// Binary type codes, as stored on disk.
pub mod type_code {
    pub const BOOL: u8 = b'C';
    pub const I16: u8 = b'Y';
    pub const I32: u8 = b'I';
    pub const I64: u8 = b'L';
    pub const F32: u8 = b'F';
    pub const F64: u8 = b'D';
    pub const BOOL_ARRAY: u8 = b'b';
    pub const I32_ARRAY: u8 = b'i';
    pub const I64_ARRAY: u8 = b'l';
    pub const F32_ARRAY: u8 = b'f';
    pub const F64_ARRAY: u8 = b'd';
    pub const STRING: u8 = b'S';
    pub const BLOB: u8 = b'R';
}

impl Property {
    /// The binary type code this property serializes as.
    pub fn type_code(&self) -> u8 {
        match self {
            Property::Bool(_) => type_code::BOOL,
            Property::I16(_) => type_code::I16,
            Property::I32(_) => type_code::I32,
            Property::I64(_) => type_code::I64,
            Property::F32(_) => type_code::F32,
            Property::F64(_) => type_code::F64,
            Property::BoolArray(_) => type_code::BOOL_ARRAY,
            Property::I32Array(_) => type_code::I32_ARRAY,
            Property::I64Array(_) => type_code::I64_ARRAY,
            Property::F32Array(_) => type_code::F32_ARRAY,
            Property::F64Array(_) => type_code::F64_ARRAY,
            Property::String(_) => type_code::STRING,
            Property::Blob(_) => type_code::BLOB,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(
            self,
            Property::BoolArray(_)
                | Property::I32Array(_)
                | Property::I64Array(_)
                | Property::F32Array(_)
                | Property::F64Array(_)
        )
    }

    /// Number of elements for arrays, 1 for scalars and strings.
    pub fn len(&self) -> usize {
        match self {
            Property::BoolArray(v) => v.len(),
            Property::I32Array(v) => v.len(),
            Property::I64Array(v) => v.len(),
            Property::F32Array(v) => v.len(),
            Property::F64Array(v) => v.len(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // -- scalar accessors, numerically coercing --
    //
    // The ASCII grammar does not preserve exact integer widths (every
    // integer parses as i64), so consumers read scalars through these
    // rather than matching the variant.

    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Property::Bool(v) => Some(v),
            Property::I16(v) => Some(v != 0),
            Property::I32(v) => Some(v != 0),
            Property::I64(v) => Some(v != 0),
            Property::F32(v) => Some(v != 0.0),
            Property::F64(v) => Some(v != 0.0),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            Property::Bool(v) => Some(v as i32),
            Property::I16(v) => Some(v as i32),
            Property::I32(v) => Some(v),
            Property::I64(v) => Some(v as i32),
            Property::F32(v) => Some(v as i32),
            Property::F64(v) => Some(v as i32),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Property::Bool(v) => Some(v as i64),
            Property::I16(v) => Some(v as i64),
            Property::I32(v) => Some(v as i64),
            Property::I64(v) => Some(v),
            Property::F32(v) => Some(v as i64),
            Property::F64(v) => Some(v as i64),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        self.as_f64().map(|v| v as f32)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Property::Bool(v) => Some(v as i32 as f64),
            Property::I16(v) => Some(v as f64),
            Property::I32(v) => Some(v as f64),
            Property::I64(v) => Some(v as f64),
            Property::F32(v) => Some(v as f64),
            Property::F64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Property::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Property::Blob(v) => Some(v),
            _ => None,
        }
    }

    // -- borrowed array accessors (exact type) --

    pub fn as_i32_array(&self) -> Option<&[i32]> {
        match self {
            Property::I32Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64_array(&self) -> Option<&[i64]> {
        match self {
            Property::I64Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f32_array(&self) -> Option<&[f32]> {
        match self {
            Property::F32Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64_array(&self) -> Option<&[f64]> {
        match self {
            Property::F64Array(v) => Some(v),
            _ => None,
        }
    }

    // -- converting array accessors --

    pub fn to_i32_vec(&self) -> Option<Vec<i32>> {
        match self {
            Property::I32Array(v) => Some(v.clone()),
            Property::I64Array(v) => Some(v.iter().map(|&x| x as i32).collect()),
            Property::F32Array(v) => Some(v.iter().map(|&x| x as i32).collect()),
            Property::F64Array(v) => Some(v.iter().map(|&x| x as i32).collect()),
            Property::BoolArray(v) => Some(v.iter().map(|&x| x as i32).collect()),
            _ => None,
        }
    }

    pub fn to_i64_vec(&self) -> Option<Vec<i64>> {
        match self {
            Property::I32Array(v) => Some(v.iter().map(|&x| x as i64).collect()),
            Property::I64Array(v) => Some(v.clone()),
            Property::F32Array(v) => Some(v.iter().map(|&x| x as i64).collect()),
            Property::F64Array(v) => Some(v.iter().map(|&x| x as i64).collect()),
            _ => None,
        }
    }

    pub fn to_f32_vec(&self) -> Option<Vec<f32>> {
        match self {
            Property::I32Array(v) => Some(v.iter().map(|&x| x as f32).collect()),
            Property::I64Array(v) => Some(v.iter().map(|&x| x as f32).collect()),
            Property::F32Array(v) => Some(v.clone()),
            Property::F64Array(v) => Some(v.iter().map(|&x| x as f32).collect()),
            _ => None,
        }
    }

    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        match self {
            Property::I32Array(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Property::I64Array(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Property::F32Array(v) => Some(v.iter().map(|&x| x as f64).collect()),
            Property::F64Array(v) => Some(v.clone()),
            _ => None,
        }
    }

    /// Interpret the array as packed xyz triples.
    pub fn to_dvec3_vec(&self) -> Option<Vec<DVec3>> {
        let v = self.to_f64_vec()?;
        if v.len() % 3 != 0 {
            return None;
        }
        Some(v.chunks_exact(3).map(|c| DVec3::new(c[0], c[1], c[2])).collect())
    }

    /// Interpret the array as packed uv pairs.
    pub fn to_dvec2_vec(&self) -> Option<Vec<DVec2>> {
        let v = self.to_f64_vec()?;
        if v.len() % 2 != 0 {
            return None;
        }
        Some(v.chunks_exact(2).map(|c| DVec2::new(c[0], c[1])).collect())
    }

    /// Interpret the array as packed rgba quadruples.
    pub fn to_dvec4_vec(&self) -> Option<Vec<DVec4>> {
        let v = self.to_f64_vec()?;
        if v.len() % 4 != 0 {
            return None;
        }
        Some(v.chunks_exact(4).map(|c| DVec4::new(c[0], c[1], c[2], c[3])).collect())
    }

    /// Interpret a 16-element array as a 4x4 matrix.
    pub fn to_dmat4(&self) -> Option<DMat4> {
        let v = self.to_f64_vec()?;
        if v.len() != 16 {
            return None;
        }
        let mut a = [0.0; 16];
        a.copy_from_slice(&v);
        Some(DMat4::from_cols_array(&a))
    }

    pub fn from_dvec3_slice(v: &[DVec3]) -> Property {
        let flat: &[f64] = bytemuck::cast_slice(v);
        Property::F64Array(flat.to_vec())
    }

    pub fn from_dvec2_slice(v: &[DVec2]) -> Property {
        let flat: &[f64] = bytemuck::cast_slice(v);
        Property::F64Array(flat.to_vec())
    }

    pub fn from_dvec4_slice(v: &[DVec4]) -> Property {
        let flat: &[f64] = bytemuck::cast_slice(v);
        Property::F64Array(flat.to_vec())
    }

    pub fn from_dmat4(m: DMat4) -> Property {
        Property::F64Array(m.to_cols_array().to_vec())
    }
}

impl From<bool> for Property {
    fn from(v: bool) -> Self {
        Property::Bool(v)
    }
}
impl From<i16> for Property {
    fn from(v: i16) -> Self {
        Property::I16(v)
    }
}
impl From<i32> for Property {
    fn from(v: i32) -> Self {
        Property::I32(v)
    }
}
impl From<i64> for Property {
    fn from(v: i64) -> Self {
        Property::I64(v)
    }
}
impl From<f32> for Property {
    fn from(v: f32) -> Self {
        Property::F32(v)
    }
}
impl From<f64> for Property {
    fn from(v: f64) -> Self {
        Property::F64(v)
    }
}
impl From<&str> for Property {
    fn from(v: &str) -> Self {
        Property::String(v.to_string())
    }
}
impl From<String> for Property {
    fn from(v: String) -> Self {
        Property::String(v)
    }
}
impl From<Vec<i32>> for Property {
    fn from(v: Vec<i32>) -> Self {
        Property::I32Array(v)
    }
}
impl From<Vec<i64>> for Property {
    fn from(v: Vec<i64>) -> Self {
        Property::I64Array(v)
    }
}
impl From<Vec<f32>> for Property {
    fn from(v: Vec<f32>) -> Self {
        Property::F32Array(v)
    }
}
impl From<Vec<f64>> for Property {
    fn from(v: Vec<f64>) -> Self {
        Property::F64Array(v)
    }
}
impl From<Vec<u8>> for Property {
    fn from(v: Vec<u8>) -> Self {
        Property::Blob(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_coercion() {
        assert_eq!(Property::I64(42).as_i32(), Some(42));
        assert_eq!(Property::I32(7).as_f64(), Some(7.0));
        assert_eq!(Property::F64(1.5).as_f32(), Some(1.5));
        assert_eq!(Property::I64(0).as_bool(), Some(false));
        assert_eq!(Property::String("x".into()).as_i32(), None);
    }

    #[test]
    fn test_array_conversion() {
        let p = Property::I64Array(vec![1, 2, 3]);
        assert_eq!(p.to_i32_vec(), Some(vec![1, 2, 3]));
        assert_eq!(p.as_i32_array(), None);
        assert_eq!(p.len(), 3);
    }

    #[test]
    fn test_dvec3_pack() {
        let pts = vec![DVec3::new(1.0, 2.0, 3.0), DVec3::new(4.0, 5.0, 6.0)];
        let p = Property::from_dvec3_slice(&pts);
        assert_eq!(p.len(), 6);
        assert_eq!(p.to_dvec3_vec(), Some(pts));
    }

    #[test]
    fn test_dmat4_pack() {
        let m = DMat4::from_translation(DVec3::new(1.0, 2.0, 3.0));
        let p = Property::from_dmat4(m);
        assert_eq!(p.to_dmat4(), Some(m));
    }

    #[test]
    fn test_type_codes() {
        assert_eq!(Property::Bool(true).type_code(), b'C');
        assert_eq!(Property::F64Array(vec![]).type_code(), b'd');
        assert_eq!(Property::String(String::new()).type_code(), b'S');
    }
}
