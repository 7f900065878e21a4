//! FBX binary codec.
//!
//! Layout: a 23-byte magic, a little-endian u32 version, a flat list of
//! root node records closed by an all-zero sentinel record, then a fixed
//! footer. Node records are length-prefixed with absolute end offsets so
//! unknown subtrees can be skipped without a full decode. Record header
//! fields are u32 below version 7500 and u64 from 7500 on.
//!
//! The footer magic constants, the padding arithmetic, and the FileId /
//! CreationTime payloads are load-bearing: external tools run CRC checks
//! over them and reject altered bytes.

use std::io::Cursor;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::tree::compress;
use crate::tree::property::{type_code, Property};
use crate::tree::{NodeId, NodeTree};
use crate::util::{Error, Result};

/// Header magic: `"Kaydara FBX Binary  "` + 0x00 0x1a 0x00.
pub const MAGIC: [u8; 23] = [
    b'K', b'a', b'y', b'd', b'a', b'r', b'a', b' ', b'F', b'B', b'X', b' ', b'B', b'i', b'n',
    b'a', b'r', b'y', b' ', b' ', 0x00, 0x1a, 0x00,
];

pub const FOOTER_MAGIC1: [u8; 16] = [
    0xfa, 0xbc, 0xab, 0x09, 0xd0, 0xc8, 0xd4, 0x66, 0xb1, 0x76, 0xfb, 0x83, 0x1c, 0xf7, 0x26,
    0x7e,
];

pub const FOOTER_MAGIC2: [u8; 16] = [
    0xf8, 0x5a, 0x8c, 0x6a, 0xde, 0xf5, 0xd9, 0x7e, 0xec, 0xe9, 0x0c, 0xe3, 0x75, 0x8f, 0x29,
    0x0b,
];

/// Payload of the top-level `FileId` node.
pub const FILE_ID: [u8; 16] = [
    0x28, 0xb3, 0x2a, 0xeb, 0xb6, 0x24, 0xcc, 0xc2, 0xbf, 0xc8, 0xb0, 0x2a, 0xa9, 0x2b, 0xfc,
    0xf1,
];

/// Payload of the top-level `CreationTime` node.
pub const TIME_ID: &str = "1970-01-01 10:00:00:000";

/// Record headers switch from u32 to u64 fields at this version.
const WIDE_HEADER_VERSION: u32 = 7500;

/// Parse a complete binary document into `tree`, returning the file version.
pub fn read_document(data: &[u8], tree: &mut NodeTree) -> Result<u32> {
    if data.len() < MAGIC.len() + 4 || data[..MAGIC.len()] != MAGIC {
        return Err(Error::InvalidMagic);
    }
    let mut cur = Cursor::new(data);
    cur.set_position(MAGIC.len() as u64);
    let version = cur.read_u32::<LittleEndian>()?;

    loop {
        match read_node(&mut cur, tree, version, None)? {
            Some(_) => {}
            None => break,
        }
    }
    Ok(version)
}

/// Serialize the tree into a complete binary document.
pub fn write_document(tree: &NodeTree, version: u32) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(4096);
    buf.extend_from_slice(&MAGIC);
    buf.write_u32::<LittleEndian>(version)?;

    for &root in tree.roots() {
        write_node(&mut buf, tree, root, version)?;
    }
    write_null_record(&mut buf, version)?;

    buf.extend_from_slice(&FOOTER_MAGIC1);

    // zero padding to the next 16-byte boundary; a full block when already
    // aligned, matching what the format's consumers expect
    let pad = 16 - (buf.len() % 16);
    buf.extend(std::iter::repeat(0u8).take(pad));

    buf.write_i32::<LittleEndian>(0)?;
    buf.write_u32::<LittleEndian>(version)?;
    buf.extend(std::iter::repeat(0u8).take(120));
    buf.extend_from_slice(&FOOTER_MAGIC2);
    Ok(buf)
}

struct RecordHeader {
    end_offset: u64,
    num_props: u64,
    name_len: u8,
}

fn read_header(cur: &mut Cursor<&[u8]>, version: u32) -> Result<RecordHeader> {
    if version >= WIDE_HEADER_VERSION {
        let end_offset = cur.read_u64::<LittleEndian>()?;
        let num_props = cur.read_u64::<LittleEndian>()?;
        let _prop_list_len = cur.read_u64::<LittleEndian>()?;
        let name_len = cur.read_u8()?;
        Ok(RecordHeader { end_offset, num_props, name_len })
    } else {
        let end_offset = cur.read_u32::<LittleEndian>()? as u64;
        let num_props = cur.read_u32::<LittleEndian>()? as u64;
        let _prop_list_len = cur.read_u32::<LittleEndian>()? as u64;
        let name_len = cur.read_u8()?;
        Ok(RecordHeader { end_offset, num_props, name_len })
    }
}

/// Read one node record. Returns `None` for the null sentinel.
fn read_node(
    cur: &mut Cursor<&[u8]>,
    tree: &mut NodeTree,
    version: u32,
    parent: Option<NodeId>,
) -> Result<Option<NodeId>> {
    let header = read_header(cur, version)?;
    if header.end_offset == 0 && header.num_props == 0 && header.name_len == 0 {
        return Ok(None);
    }
    if header.end_offset > cur.get_ref().len() as u64 {
        return Err(Error::UnexpectedEof(cur.position()));
    }

    let mut name_bytes = vec![0u8; header.name_len as usize];
    std::io::Read::read_exact(cur, &mut name_bytes)?;
    let name = String::from_utf8_lossy(&name_bytes).into_owned();

    let id = match parent {
        Some(p) => tree.create_child(p, name),
        None => tree.create_root(name),
    };

    for _ in 0..header.num_props {
        let p = read_property(cur)?;
        tree.get_mut(id).add_property(p);
    }

    while cur.position() < header.end_offset {
        match read_node(cur, tree, version, Some(id))? {
            Some(_) => {}
            None => break,
        }
    }
    // skip anything we did not model
    cur.set_position(header.end_offset);
    Ok(Some(id))
}

fn read_property(cur: &mut Cursor<&[u8]>) -> Result<Property> {
    let pos = cur.position();
    let code = cur.read_u8()?;
    let p = match code {
        type_code::BOOL => Property::Bool(cur.read_u8()? != 0),
        type_code::I16 => Property::I16(cur.read_i16::<LittleEndian>()?),
        type_code::I32 => Property::I32(cur.read_i32::<LittleEndian>()?),
        type_code::I64 => Property::I64(cur.read_i64::<LittleEndian>()?),
        type_code::F32 => Property::F32(cur.read_f32::<LittleEndian>()?),
        type_code::F64 => Property::F64(cur.read_f64::<LittleEndian>()?),
        type_code::BOOL_ARRAY => {
            let raw = read_array_payload(cur, 1)?;
            Property::BoolArray(raw.iter().map(|&b| b != 0).collect())
        }
        type_code::I32_ARRAY => {
            let raw = read_array_payload(cur, 4)?;
            Property::I32Array(
                raw.chunks_exact(4).map(LittleEndian::read_i32).collect(),
            )
        }
        type_code::I64_ARRAY => {
            let raw = read_array_payload(cur, 8)?;
            Property::I64Array(
                raw.chunks_exact(8).map(LittleEndian::read_i64).collect(),
            )
        }
        type_code::F32_ARRAY => {
            let raw = read_array_payload(cur, 4)?;
            Property::F32Array(
                raw.chunks_exact(4).map(LittleEndian::read_f32).collect(),
            )
        }
        type_code::F64_ARRAY => {
            let raw = read_array_payload(cur, 8)?;
            Property::F64Array(
                raw.chunks_exact(8).map(LittleEndian::read_f64).collect(),
            )
        }
        type_code::STRING => {
            let len = cur.read_u32::<LittleEndian>()? as usize;
            let mut bytes = vec![0u8; len];
            std::io::Read::read_exact(cur, &mut bytes)?;
            Property::String(String::from_utf8_lossy(&bytes).into_owned())
        }
        type_code::BLOB => {
            let len = cur.read_u32::<LittleEndian>()? as usize;
            let mut bytes = vec![0u8; len];
            std::io::Read::read_exact(cur, &mut bytes)?;
            Property::Blob(bytes)
        }
        other => return Err(Error::UnknownPropertyType(other, pos)),
    };
    Ok(p)
}

/// Read an array property payload: a 12-byte header (element count,
/// encoding, stored byte length) followed by raw or zlib-deflated data.
/// Decompression is transparent to the caller.
fn read_array_payload(cur: &mut Cursor<&[u8]>, elem_size: usize) -> Result<Vec<u8>> {
    let count = cur.read_u32::<LittleEndian>()? as usize;
    let encoding = cur.read_u32::<LittleEndian>()?;
    let stored_len = cur.read_u32::<LittleEndian>()? as usize;

    let mut stored = vec![0u8; stored_len];
    std::io::Read::read_exact(cur, &mut stored)?;

    let raw_len = count * elem_size;
    let raw = if encoding == 1 {
        compress::inflate(&stored, raw_len)?
    } else {
        stored
    };
    if raw.len() != raw_len {
        return Err(Error::invalid(format!(
            "array payload is {} bytes, expected {}",
            raw.len(),
            raw_len
        )));
    }
    Ok(raw)
}

fn header_size(version: u32) -> usize {
    if version >= WIDE_HEADER_VERSION {
        8 * 3 + 1
    } else {
        4 * 3 + 1
    }
}

fn write_null_record(buf: &mut Vec<u8>, version: u32) -> Result<()> {
    buf.extend(std::iter::repeat(0u8).take(header_size(version)));
    Ok(())
}

fn write_node(buf: &mut Vec<u8>, tree: &NodeTree, id: NodeId, version: u32) -> Result<()> {
    let node = tree.get(id);
    let header_pos = buf.len();
    buf.extend(std::iter::repeat(0u8).take(header_size(version)));
    buf.extend_from_slice(node.name().as_bytes());

    let prop_start = buf.len();
    for p in node.properties() {
        write_property(buf, p)?;
    }
    let prop_list_len = (buf.len() - prop_start) as u64;

    for &child in node.children() {
        write_node(buf, tree, child, version)?;
    }
    if !node.children().is_empty() || node.properties().is_empty() || node.force_null_terminate()
    {
        write_null_record(buf, version)?;
    }

    let end_offset = buf.len() as u64;
    let num_props = node.properties().len() as u64;
    let name_len = node.name().len() as u8;
    if version >= WIDE_HEADER_VERSION {
        LittleEndian::write_u64(&mut buf[header_pos..header_pos + 8], end_offset);
        LittleEndian::write_u64(&mut buf[header_pos + 8..header_pos + 16], num_props);
        LittleEndian::write_u64(&mut buf[header_pos + 16..header_pos + 24], prop_list_len);
        buf[header_pos + 24] = name_len;
    } else {
        LittleEndian::write_u32(&mut buf[header_pos..header_pos + 4], end_offset as u32);
        LittleEndian::write_u32(&mut buf[header_pos + 4..header_pos + 8], num_props as u32);
        LittleEndian::write_u32(
            &mut buf[header_pos + 8..header_pos + 12],
            prop_list_len as u32,
        );
        buf[header_pos + 12] = name_len;
    }
    Ok(())
}

fn write_property(buf: &mut Vec<u8>, p: &Property) -> Result<()> {
    buf.push(p.type_code());
    match p {
        Property::Bool(v) => buf.push(*v as u8),
        Property::I16(v) => buf.write_i16::<LittleEndian>(*v)?,
        Property::I32(v) => buf.write_i32::<LittleEndian>(*v)?,
        Property::I64(v) => buf.write_i64::<LittleEndian>(*v)?,
        Property::F32(v) => buf.write_f32::<LittleEndian>(*v)?,
        Property::F64(v) => buf.write_f64::<LittleEndian>(*v)?,
        Property::BoolArray(v) => {
            let raw: Vec<u8> = v.iter().map(|&b| b as u8).collect();
            write_array_payload(buf, v.len(), &raw)?;
        }
        Property::I32Array(v) => {
            let mut raw = Vec::with_capacity(v.len() * 4);
            for &x in v {
                raw.write_i32::<LittleEndian>(x)?;
            }
            write_array_payload(buf, v.len(), &raw)?;
        }
        Property::I64Array(v) => {
            let mut raw = Vec::with_capacity(v.len() * 8);
            for &x in v {
                raw.write_i64::<LittleEndian>(x)?;
            }
            write_array_payload(buf, v.len(), &raw)?;
        }
        Property::F32Array(v) => {
            let mut raw = Vec::with_capacity(v.len() * 4);
            for &x in v {
                raw.write_f32::<LittleEndian>(x)?;
            }
            write_array_payload(buf, v.len(), &raw)?;
        }
        Property::F64Array(v) => {
            let mut raw = Vec::with_capacity(v.len() * 8);
            for &x in v {
                raw.write_f64::<LittleEndian>(x)?;
            }
            write_array_payload(buf, v.len(), &raw)?;
        }
        Property::String(v) => {
            buf.write_u32::<LittleEndian>(v.len() as u32)?;
            buf.extend_from_slice(v.as_bytes());
        }
        Property::Blob(v) => {
            buf.write_u32::<LittleEndian>(v.len() as u32)?;
            buf.extend_from_slice(v);
        }
    }
    Ok(())
}

fn write_array_payload(buf: &mut Vec<u8>, count: usize, raw: &[u8]) -> Result<()> {
    if raw.len() >= compress::COMPRESS_THRESHOLD {
        let deflated = compress::deflate(raw)?;
        if compress::worth_compressing(raw.len(), deflated.len()) {
            buf.write_u32::<LittleEndian>(count as u32)?;
            buf.write_u32::<LittleEndian>(1)?;
            buf.write_u32::<LittleEndian>(deflated.len() as u32)?;
            buf.extend_from_slice(&deflated);
            return Ok(());
        }
    }
    buf.write_u32::<LittleEndian>(count as u32)?;
    buf.write_u32::<LittleEndian>(0)?;
    buf.write_u32::<LittleEndian>(raw.len() as u32)?;
    buf.extend_from_slice(raw);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> NodeTree {
        let mut t = NodeTree::new();
        let objects = t.create_root("Objects");
        let model = t.create_child(objects, "Model");
        t.add_property(model, 1234567890123i64);
        t.add_property(model, "pCube1\u{0}\u{1}Model");
        t.add_property(model, "Mesh");
        t.get_mut(model).set_force_null_terminate(true);
        t.leaf1(model, "Version", 232i32);
        let geo = t.create_child(objects, "Geometry");
        t.leaf1(geo, "Vertices", vec![0.0f64, 1.0, 2.0, 3.0, 4.0, 5.0]);
        t.leaf1(geo, "Flag", true);
        t
    }

    fn round_trip(version: u32) {
        let t = sample_tree();
        let bytes = write_document(&t, version).unwrap();
        assert_eq!(&bytes[..MAGIC.len()], &MAGIC);

        let mut back = NodeTree::new();
        let v = read_document(&bytes, &mut back).unwrap();
        assert_eq!(v, version);
        assert_eq!(back.roots().len(), 1);

        let objects = back.find_root("Objects").unwrap();
        let model = back.find_child(objects, "Model").unwrap();
        assert_eq!(back.properties(model).len(), 3);
        assert_eq!(back.properties(model)[0].as_i64(), Some(1234567890123));
        assert_eq!(back.properties(model)[1].as_str(), Some("pCube1\u{0}\u{1}Model"));
        assert_eq!(back.child_i32(model, "Version"), Some(232));

        let geo = back.find_child(objects, "Geometry").unwrap();
        let verts = back.child_property(geo, "Vertices", 0).unwrap();
        assert_eq!(verts.as_f64_array().unwrap().len(), 6);
        assert_eq!(back.child_property(geo, "Flag", 0).unwrap().as_bool(), Some(true));
    }

    #[test]
    fn test_round_trip_wide_header() {
        round_trip(7500);
    }

    #[test]
    fn test_round_trip_narrow_header() {
        round_trip(7400);
    }

    #[test]
    fn test_bad_magic() {
        let mut back = NodeTree::new();
        let err = read_document(b"definitely not an fbx file at all.....", &mut back);
        assert!(matches!(err, Err(Error::InvalidMagic)));
    }

    #[test]
    fn test_large_array_compression() {
        let mut t = NodeTree::new();
        let root = t.create_root("Geometry");
        let data: Vec<f64> = (0..2000).map(|i| (i % 16) as f64).collect();
        t.leaf1(root, "Vertices", data.clone());

        let bytes = write_document(&t, 7500).unwrap();
        // compressible payload must come out smaller than raw encoding
        assert!(bytes.len() < data.len() * 8);

        let mut back = NodeTree::new();
        read_document(&bytes, &mut back).unwrap();
        let root = back.find_root("Geometry").unwrap();
        let verts = back.child_property(root, "Vertices", 0).unwrap();
        assert_eq!(verts.as_f64_array().unwrap(), data.as_slice());
    }

    #[test]
    fn test_footer_trailer_bytes() {
        let t = sample_tree();
        let bytes = write_document(&t, 7500).unwrap();
        assert_eq!(&bytes[bytes.len() - 16..], &FOOTER_MAGIC2);
        // the 120-byte zero block sits just before the final magic
        let zeros = &bytes[bytes.len() - 16 - 120..bytes.len() - 16];
        assert!(zeros.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_empty_tree_still_valid() {
        let t = NodeTree::new();
        let bytes = write_document(&t, 7500).unwrap();
        let mut back = NodeTree::new();
        read_document(&bytes, &mut back).unwrap();
        assert!(back.roots().is_empty());
    }
}
