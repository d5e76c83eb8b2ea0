//! Core crate for provisioning a service's configuration and ACL state.
//!
//! Two engines live here. The [`document`] module deep-merges a default
//! configuration with overrides and renders it byte-reproducibly. The [`acl`]
//! module validates declared policies and tokens and converges a control
//! plane towards them.

pub mod acl;
pub mod document;
mod error;
pub mod facts;

pub use acl::{
    AclApi, AclApiSettings, AclEntity, Action, Backoff, DesiredState, Disposition, Ensure,
    EntityOutcome, HttpAclClient, LivePolicy, LiveToken, Policy, PolicyLink, PolicyRequest,
    PolicySpec, Protocol, ReconcileReport, Resource, RetryPolicy, Rule, Token, TokenRequest,
    TokenSpec, reconcile, reconcile_declared, render_rules,
};
pub use document::{ConfigDocument, merge, merge_value, render_env_file, serialize};
pub use error::{AggregatedErrors, DeclarationIssue, EntityFailure, ProvisionError};
pub use facts::HostFacts;

/// Convenience alias for results returned by this crate.
pub type ProvisionResult<T> = Result<T, ProvisionError>;
