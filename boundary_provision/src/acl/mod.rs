//! Access-control declarations and their convergence against the control
//! plane.
//!
//! The flow is: declarations ([`PolicySpec`], [`TokenSpec`]) are validated
//! into a [`DesiredState`], then [`reconcile`] compares it with the live
//! entries exposed through an [`AclApi`] implementation and applies the
//! minimal set of writes.

pub mod client;
mod model;
mod reconcile;
mod rules;

pub use client::{
    AclApi, AclApiSettings, Backoff, HttpAclClient, LivePolicy, LiveToken, PolicyLink,
    PolicyRequest, Protocol, RetryPolicy, TokenRequest,
};
pub use model::{
    AclEntity, DesiredState, Disposition, Ensure, Policy, PolicySpec, Resource, Rule, Token,
    TokenSpec,
};
pub use reconcile::{Action, EntityOutcome, ReconcileReport, reconcile, reconcile_declared};
pub use rules::render_rules;
