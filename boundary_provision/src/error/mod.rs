//! Error types produced by the provisioning core.

mod aggregate;
mod constructors;
mod types;

pub use aggregate::{AggregatedErrors, EntityFailure};
pub use types::{DeclarationIssue, ProvisionError};
