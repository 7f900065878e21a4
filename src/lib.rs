//! # sfbx
//!
//! Rust implementation of the FBX (.fbx) 3D scene interchange format.
//!
//! Original FBX format developed by Autodesk. All rights to the original
//! belong to the authors. This is an independent implementation of the
//! documented binary/ASCII container structure and the scene object model
//! layered on top of it; it does not aim to emulate every FBX SDK edge case.
//!
//! ## Modules
//!
//! - [`util`] - Errors, math types, FBX-specific conversions
//! - [`tree`] - Raw node/property container and the binary/ASCII codecs
//! - [`object`] - Scene entities (models, geometry, deformers, materials, animation)
//! - [`document`] - The [`Document`](document::Document): import/export orchestration
//!
//! ## Example
//!
//! ```ignore
//! use sfbx::Document;
//!
//! let mut doc = Document::new();
//! doc.read_file("character.fbx")?;
//!
//! for (_, obj) in doc.objects() {
//!     println!("{}", obj.display_name());
//! }
//! ```

pub mod util;
pub mod tree;
pub mod object;
pub mod document;

// Re-export commonly used types
pub use util::{Error, Result};
pub use tree::{Node, NodeId, NodeTree, Property};
pub use object::{ObjectClass, ObjectHandle, ObjectSubClass};
pub use document::{Document, FileVersion, GlobalSettings};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::document::{Connection, ConnectionKind, Document, FileVersion, GlobalSettings};
    pub use crate::object::{Object, ObjectClass, ObjectHandle, ObjectSubClass};
    pub use crate::tree::{Node, NodeId, NodeTree, Property};
    pub use crate::util::math::*;
    pub use crate::util::{Error, Result};
}
