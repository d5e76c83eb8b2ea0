//! Constructors and classification helpers for `ProvisionError`.

use super::{AggregatedErrors, EntityFailure, ProvisionError};

impl ProvisionError {
    /// Builds an aggregate from collected entity failures.
    ///
    /// Returns `None` when `failures` is empty. A single failure is still
    /// wrapped so the entity it belongs to stays visible in the message.
    #[must_use]
    pub fn try_aggregate<I>(failures: I) -> Option<Self>
    where
        I: IntoIterator<Item = EntityFailure>,
    {
        let collected: Vec<EntityFailure> = failures.into_iter().collect();
        if collected.is_empty() {
            return None;
        }
        Some(Self::Aggregate(Box::new(AggregatedErrors::new(collected))))
    }

    /// Construct a rejection for `operation`.
    ///
    /// # Examples
    ///
    /// ```
    /// use boundary_provision::ProvisionError;
    /// let err = ProvisionError::rejected("create_policy", 400, "bad rules");
    /// assert!(!err.is_transient());
    /// ```
    #[must_use]
    pub fn rejected(operation: &str, status: u16, message: impl Into<String>) -> Self {
        Self::ControlPlaneRejected {
            operation: operation.to_owned(),
            status,
            message: message.into(),
        }
    }

    /// Construct an exhausted-retries failure for `operation`.
    #[must_use]
    pub fn unavailable(operation: &str, attempts: u32, message: impl Into<String>) -> Self {
        Self::ControlPlaneUnavailable {
            operation: operation.to_owned(),
            attempts,
            message: message.into(),
        }
    }

    /// Returns `true` when the failure stems from control-plane availability
    /// rather than from the request itself.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ControlPlaneUnavailable { .. } | Self::LiveStateUnavailable { .. }
        )
    }

    /// Returns the declaration issues carried by a [`Self::Declaration`]
    /// error.
    #[must_use]
    pub fn declaration_issues(&self) -> Option<&[super::DeclarationIssue]> {
        match self {
            Self::Declaration(issues) => Some(issues),
            _ => None,
        }
    }
}
