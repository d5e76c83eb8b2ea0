//! Test helpers shared across crates.
//!
//! This crate provides an in-memory control plane that records ACL calls and
//! a sandbox that loads a manifest under a scripted environment.

pub mod control_plane;
pub mod manifest_jail;
