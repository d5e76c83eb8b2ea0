//! Primary error enum for rendering and reconciliation flows.

use thiserror::Error;

use super::aggregate::AggregatedErrors;

/// Errors that can occur while rendering configuration or converging ACLs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProvisionError {
    /// The declared policies and tokens are internally inconsistent.
    #[error("invalid ACL declaration:\n{}", render_issues(.0))]
    Declaration(Vec<DeclarationIssue>),

    /// Transient failures exhausted the retry budget for one call.
    #[error("control plane unavailable during {operation} after {attempts} attempt(s): {message}")]
    ControlPlaneUnavailable {
        /// Client operation that failed, for example `create_policy`.
        operation: String,
        /// Number of attempts made before giving up.
        attempts: u32,
        /// Description of the last transient failure.
        message: String,
    },

    /// The control plane returned a definitive client-error response.
    #[error("control plane rejected {operation} (HTTP {status}): {message}")]
    ControlPlaneRejected {
        /// Client operation that was rejected.
        operation: String,
        /// HTTP status code returned by the control plane.
        status: u16,
        /// Response body returned alongside the status.
        message: String,
    },

    /// A configuration node cannot be represented in the rendered artifact.
    #[error("cannot serialize configuration node at '{path}': {message}")]
    SerializationInvariantViolation {
        /// Location of the offending node, for example `$.ports.http`.
        path: String,
        /// Reason the node was rejected.
        message: String,
    },

    /// The live entries for a kind could not be listed, so the entity was not
    /// compared.
    #[error("live {kind} state unavailable: {cause}")]
    LiveStateUnavailable {
        /// Entity kind whose listing failed (`policy` or `token`).
        kind: &'static str,
        /// Rendered cause of the listing failure.
        cause: String,
    },

    /// A token was skipped because a policy it references did not converge.
    #[error("skipped because policy '{policy}' did not converge")]
    DependencyFailed {
        /// Name of the policy whose reconciliation failed.
        policy: String,
    },

    /// A control-plane payload could not be encoded, or a response body did
    /// not match the expected shape.
    #[error("JSON handling failed for {operation}: {source}")]
    Encoding {
        /// Client operation whose payload failed to encode or decode.
        operation: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The configured control-plane endpoint is not a valid URL.
    #[error("invalid control plane endpoint '{endpoint}': {message}")]
    InvalidEndpoint {
        /// Endpoint assembled from the connection settings.
        endpoint: String,
        /// Parser diagnostic.
        message: String,
    },

    /// The HTTP client could not be constructed or a request could not be
    /// built.
    #[error("control plane client error: {0}")]
    Client(#[source] reqwest::Error),

    /// One or more entities failed to converge.
    #[error("ACL reconciliation failed:\n{0}")]
    Aggregate(Box<AggregatedErrors>),
}

/// A single inconsistency found while validating declared ACL state.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum DeclarationIssue {
    /// A token names a policy that is not declared.
    #[error("token '{token}' references unknown policy '{policy}'")]
    UnknownPolicy {
        /// Logical token name.
        token: String,
        /// Missing policy name.
        policy: String,
    },

    /// A present token names a policy that is declared absent.
    #[error("token '{token}' references policy '{policy}' which is declared absent")]
    AbsentPolicy {
        /// Logical token name.
        token: String,
        /// Policy declared with `ensure = absent`.
        policy: String,
    },

    /// A policy was declared without a name.
    #[error("policy name must not be empty")]
    EmptyPolicyName,

    /// Two policies share a name.
    #[error("policy '{0}' is declared more than once")]
    DuplicatePolicy(String),

    /// A token accessor is not a UUID.
    #[error("token '{token}' has invalid accessor_id '{accessor_id}'")]
    InvalidAccessor {
        /// Logical token name.
        token: String,
        /// Offending accessor value.
        accessor_id: String,
    },

    /// Two tokens claim the same accessor.
    #[error("tokens '{first}' and '{second}' share accessor_id '{accessor_id}'")]
    DuplicateAccessor {
        /// Token declared first.
        first: String,
        /// Token declared second.
        second: String,
        /// Shared accessor.
        accessor_id: String,
    },

    /// A segment was supplied for a resource kind that takes none.
    #[error("policy '{policy}' rule {index}: resource '{resource}' does not take a segment")]
    UnexpectedSegment {
        /// Policy containing the rule.
        policy: String,
        /// Zero-based rule position.
        index: usize,
        /// Resource keyword of the rule.
        resource: &'static str,
    },
}

fn render_issues(issues: &[DeclarationIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("- {issue}"))
        .collect::<Vec<_>>()
        .join("\n")
}
