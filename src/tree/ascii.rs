//! FBX ASCII codec.
//!
//! The ASCII form is a comment-tolerant, brace-delimited rendition of the
//! same node tree: `Name: prop, prop { children }`. The first line must be
//! the version header comment `; FBX <major>.<minor>.<patch> project file`;
//! the file version is derived as `major*1000 + minor*100`.
//!
//! Full names are spelled `Class::Display` in ASCII instead of the binary
//! `Display\x00\x01Class` convention; both codecs agree on the in-memory
//! form. Exact integer widths are not preserved by the grammar: every
//! integer parses back as i64 and every decimal as f64, and blobs are
//! emitted as base64 strings the way embedded `Content` is spelled in
//! ASCII FBX.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::tree::{NodeId, NodeTree, Property};
use crate::util::{Error, Result};

const FULL_NAME_SEPARATOR: &str = "\u{0}\u{1}";

/// Parse a complete ASCII document into `tree`, returning the file version.
pub fn read_document(text: &str, tree: &mut NodeTree) -> Result<u32> {
    let first_line = text.lines().next().unwrap_or("");
    let version = parse_version_header(first_line)
        .ok_or_else(|| Error::InvalidAsciiHeader(first_line.to_string()))?;

    let mut p = Parser { s: text.as_bytes(), pos: 0, line: 1 };
    // skip the header line itself; it is a comment and falls out naturally
    loop {
        p.skip_trivia();
        if p.at_end() {
            break;
        }
        parse_node(&mut p, tree, None)?;
    }
    Ok(version)
}

/// Serialize the tree as an ASCII document.
///
/// The binary-only bookkeeping nodes (`FileId`, `CreationTime`, `Creator`)
/// are skipped; the ASCII grammar does not carry them.
pub fn write_document(tree: &NodeTree, version: u32) -> String {
    let mut out = String::with_capacity(4096);
    let major = (version / 1000) % 10;
    let minor = (version / 100) % 10;
    out.push_str(&format!("; FBX {}.{}.0 project file\n", major, minor));
    out.push_str("; ----------------------------------------------------\n\n");

    for &root in tree.roots() {
        let name = tree.name(root);
        if name == "FileId" || name == "CreationTime" || name == "Creator" {
            continue;
        }
        write_node(&mut out, tree, root, 0);
    }
    out
}

fn parse_version_header(line: &str) -> Option<u32> {
    let rest = line.split("FBX").nth(1)?;
    let rest = rest.trim_start();
    let mut parts = rest.splitn(2, ' ');
    let nums = parts.next()?;
    if !parts.next()?.starts_with("project file") {
        return None;
    }
    let mut it = nums.split('.');
    let major: u32 = it.next()?.parse().ok()?;
    let minor: u32 = it.next()?.parse().ok()?;
    let _patch: u32 = it.next()?.parse().ok()?;
    Some(major * 1000 + minor * 100)
}

// -- writer --

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push('\t');
    }
}

fn write_node(out: &mut String, tree: &NodeTree, id: NodeId, depth: usize) {
    let node = tree.get(id);
    indent(out, depth);
    out.push_str(node.name());
    out.push(':');

    let mut first = true;
    for p in node.properties() {
        out.push_str(if first { " " } else { ", " });
        first = false;
        write_property(out, p, depth);
    }

    if !node.children().is_empty() || node.properties().is_empty() {
        out.push_str(" {\n");
        for &child in node.children() {
            write_node(out, tree, child, depth + 1);
        }
        indent(out, depth);
        out.push_str("}\n");
    } else {
        out.push('\n');
    }
}

fn write_property(out: &mut String, p: &Property, depth: usize) {
    match p {
        Property::Bool(v) => out.push_str(if *v { "1" } else { "0" }),
        Property::I16(v) => out.push_str(&v.to_string()),
        Property::I32(v) => out.push_str(&v.to_string()),
        Property::I64(v) => out.push_str(&v.to_string()),
        Property::F32(v) => out.push_str(&format_float(*v as f64)),
        Property::F64(v) => out.push_str(&format_float(*v)),
        Property::String(v) => {
            out.push('"');
            match v.split_once(FULL_NAME_SEPARATOR) {
                Some((display, class)) => {
                    out.push_str(class);
                    out.push_str("::");
                    out.push_str(display);
                }
                None => out.push_str(v),
            }
            out.push('"');
        }
        Property::Blob(v) => {
            out.push('"');
            out.push_str(&BASE64.encode(v));
            out.push('"');
        }
        Property::BoolArray(v) => {
            let items: Vec<String> = v.iter().map(|&b| (b as u8).to_string()).collect();
            write_array(out, v.len(), &items, depth);
        }
        Property::I32Array(v) => {
            let items: Vec<String> = v.iter().map(|x| x.to_string()).collect();
            write_array(out, v.len(), &items, depth);
        }
        Property::I64Array(v) => {
            let items: Vec<String> = v.iter().map(|x| x.to_string()).collect();
            write_array(out, v.len(), &items, depth);
        }
        Property::F32Array(v) => {
            let items: Vec<String> = v.iter().map(|x| format_float(*x as f64)).collect();
            write_array(out, v.len(), &items, depth);
        }
        Property::F64Array(v) => {
            let items: Vec<String> = v.iter().map(|x| format_float(*x)).collect();
            write_array(out, v.len(), &items, depth);
        }
    }
}

fn write_array(out: &mut String, count: usize, items: &[String], depth: usize) {
    out.push('*');
    out.push_str(&count.to_string());
    out.push_str(" {\n");
    indent(out, depth + 1);
    out.push_str("a: ");
    out.push_str(&items.join(","));
    out.push('\n');
    indent(out, depth);
    out.push('}');
}

fn format_float(v: f64) -> String {
    if v == v.trunc() && v.abs() < 1e15 {
        // keep a decimal point so the value parses back as a float
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}

// -- reader --

struct Parser<'a> {
    s: &'a [u8],
    pos: usize,
    line: usize,
}

impl<'a> Parser<'a> {
    fn at_end(&self) -> bool {
        self.pos >= self.s.len()
    }

    fn peek(&self) -> Option<u8> {
        self.s.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
        }
        Some(c)
    }

    /// Skip whitespace (including newlines) and `;` comments.
    fn skip_trivia(&mut self) {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => {
                    self.bump();
                }
                Some(b';') => {
                    while let Some(c) = self.bump() {
                        if c == b'\n' {
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
    }

    /// Skip spaces and tabs only.
    fn skip_inline(&mut self) {
        while matches!(self.peek(), Some(b' ') | Some(b'\t') | Some(b'\r')) {
            self.bump();
        }
    }

    fn err(&self, msg: impl Into<String>) -> Error {
        Error::parse(self.line, msg)
    }
}

fn parse_node(p: &mut Parser, tree: &mut NodeTree, parent: Option<NodeId>) -> Result<NodeId> {
    p.skip_trivia();

    // node name up to ':'
    let start = p.pos;
    while let Some(c) = p.peek() {
        if c == b':' {
            break;
        }
        if c == b'{' || c == b'}' || c == b'\n' {
            return Err(p.err("expected node name followed by ':'"));
        }
        p.bump();
    }
    let name = String::from_utf8_lossy(&p.s[start..p.pos]).trim().to_string();
    if p.bump() != Some(b':') {
        return Err(p.err("expected ':' after node name"));
    }

    let id = match parent {
        Some(par) => tree.create_child(par, name),
        None => tree.create_root(name),
    };

    // property list, possibly spanning lines after trailing commas
    let mut expect_value = false;
    loop {
        p.skip_inline();
        match p.peek() {
            Some(b'{') => break,
            Some(b'\n') | None => {
                if expect_value {
                    p.skip_trivia();
                    continue;
                }
                // the block brace may sit on the next line
                let save_pos = p.pos;
                let save_line = p.line;
                p.skip_trivia();
                if p.peek() == Some(b'{') {
                    break;
                }
                p.pos = save_pos;
                p.line = save_line;
                return Ok(id);
            }
            Some(b',') => {
                p.bump();
                expect_value = true;
            }
            Some(_) => {
                let v = parse_value(p)?;
                tree.get_mut(id).add_property(v);
                expect_value = false;
            }
        }
    }

    // children block
    if p.bump() != Some(b'{') {
        return Err(p.err("expected '{'"));
    }
    loop {
        p.skip_trivia();
        match p.peek() {
            Some(b'}') => {
                p.bump();
                break;
            }
            None => return Err(p.err("unexpected end of file inside block")),
            _ => {
                parse_node(p, tree, Some(id))?;
            }
        }
    }
    Ok(id)
}

fn parse_value(p: &mut Parser) -> Result<Property> {
    match p.peek() {
        Some(b'"') => parse_string(p),
        Some(b'*') => parse_array(p),
        Some(c) if c == b'-' || c == b'+' || c.is_ascii_digit() || c == b'.' => parse_number(p),
        Some(c) if c.is_ascii_alphabetic() => {
            // bare word (Y, T, W and friends)
            let start = p.pos;
            while matches!(p.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
                p.bump();
            }
            Ok(Property::String(
                String::from_utf8_lossy(&p.s[start..p.pos]).into_owned(),
            ))
        }
        _ => Err(p.err("expected property value")),
    }
}

fn parse_string(p: &mut Parser) -> Result<Property> {
    p.bump(); // opening quote
    let start = p.pos;
    while let Some(c) = p.peek() {
        if c == b'"' {
            break;
        }
        p.bump();
    }
    let raw = String::from_utf8_lossy(&p.s[start..p.pos]).into_owned();
    if p.bump() != Some(b'"') {
        return Err(p.err("unterminated string"));
    }
    // Class::Display becomes the internal full-name form
    let value = match raw.split_once("::") {
        Some((class, display)) if !class.is_empty() => {
            format!("{}{}{}", display, FULL_NAME_SEPARATOR, class)
        }
        _ => raw,
    };
    Ok(Property::String(value))
}

fn parse_number(p: &mut Parser) -> Result<Property> {
    let start = p.pos;
    let mut is_float = false;
    while let Some(c) = p.peek() {
        match c {
            b'0'..=b'9' | b'-' | b'+' => {
                p.bump();
            }
            b'.' | b'e' | b'E' => {
                is_float = true;
                p.bump();
            }
            _ => break,
        }
    }
    let text = std::str::from_utf8(&p.s[start..p.pos])
        .map_err(|_| p.err("invalid number"))?;
    if is_float {
        let v: f64 = text.parse().map_err(|_| p.err(format!("bad float '{}'", text)))?;
        Ok(Property::F64(v))
    } else {
        let v: i64 = text.parse().map_err(|_| p.err(format!("bad integer '{}'", text)))?;
        Ok(Property::I64(v))
    }
}

fn parse_array(p: &mut Parser) -> Result<Property> {
    p.bump(); // '*'
    let start = p.pos;
    while matches!(p.peek(), Some(c) if c.is_ascii_digit()) {
        p.bump();
    }
    let count: usize = std::str::from_utf8(&p.s[start..p.pos])
        .ok()
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| p.err("bad array length"))?;

    p.skip_trivia();
    if p.bump() != Some(b'{') {
        return Err(p.err("expected '{' after array length"));
    }
    p.skip_trivia();
    // "a:" marker
    if p.bump() != Some(b'a') || p.bump() != Some(b':') {
        return Err(p.err("expected 'a:' inside array block"));
    }

    let mut ints: Vec<i64> = Vec::with_capacity(count);
    let mut floats: Vec<f64> = Vec::with_capacity(count);
    let mut is_float = false;
    loop {
        p.skip_trivia();
        match p.peek() {
            Some(b'}') => {
                p.bump();
                break;
            }
            Some(b',') => {
                p.bump();
            }
            None => return Err(p.err("unterminated array block")),
            _ => match parse_number(p)? {
                Property::I64(v) => {
                    if is_float {
                        floats.push(v as f64);
                    } else {
                        ints.push(v);
                    }
                }
                Property::F64(v) => {
                    if !is_float {
                        is_float = true;
                        floats = ints.iter().map(|&x| x as f64).collect();
                        ints.clear();
                    }
                    floats.push(v);
                }
                _ => return Err(p.err("unexpected array element")),
            },
        }
    }

    if is_float {
        Ok(Property::F64Array(floats))
    } else {
        Ok(Property::I64Array(ints))
    }
}
