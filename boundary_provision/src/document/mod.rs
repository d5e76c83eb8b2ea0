//! Configuration documents: layering, canonical rendering and the service
//! environment file.
//!
//! Documents are plain [`serde_json::Value`] trees. The crate enables
//! `serde_json`'s `preserve_order` feature so mapping keys keep the order in
//! which they were inserted, which is what makes the rendered artifact
//! reproducible byte for byte.

mod env_file;
mod merge;
mod serialize;

pub use env_file::render_env_file;
pub use merge::{merge, merge_value};
pub use serialize::serialize;

/// Ordered hierarchical configuration tree.
pub type ConfigDocument = serde_json::Value;
