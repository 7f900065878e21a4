//! Basic utilities: error types and math helpers.

pub mod error;
pub mod math;

pub use error::{Error, Result};
