//! Aggregation container for per-entity reconciliation failures.

use std::{error::Error, fmt};

use crate::acl::AclEntity;

use super::ProvisionError;

/// A failure recorded against one declared ACL entity.
#[derive(Debug)]
pub struct EntityFailure {
    /// Entity that failed to converge.
    pub entity: AclEntity,
    /// Cause of the failure.
    pub error: ProvisionError,
}

impl fmt::Display for EntityFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.entity, self.error)
    }
}

/// Collection of [`EntityFailure`]s produced by a single reconciliation run.
///
/// # Examples
///
/// ```
/// use boundary_provision::{AclEntity, AggregatedErrors, EntityFailure, ProvisionError};
///
/// let errors = AggregatedErrors::new(vec![EntityFailure {
///     entity: AclEntity::policy("web"),
///     error: ProvisionError::DependencyFailed { policy: "base".into() },
/// }]);
/// assert_eq!(errors.len(), 1);
/// assert!(errors.to_string().starts_with("1: policy 'web'"));
/// ```
#[derive(Debug, Default)]
pub struct AggregatedErrors(Vec<EntityFailure>);

impl AggregatedErrors {
    /// Create a new aggregation from a vector of failures.
    #[must_use]
    pub const fn new(failures: Vec<EntityFailure>) -> Self {
        Self(failures)
    }

    /// Iterate over the contained failures.
    #[must_use = "iterators should be consumed to inspect failures"]
    pub fn iter(&self) -> impl Iterator<Item = &EntityFailure> {
        self.0.iter()
    }

    /// Number of failures in the aggregation.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` when no failures were collected.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for AggregatedErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}: {failure}", i + 1)?;
        }
        Ok(())
    }
}

impl Error for AggregatedErrors {}

impl<'a> IntoIterator for &'a AggregatedErrors {
    type Item = &'a EntityFailure;
    type IntoIter = std::slice::Iter<'a, EntityFailure>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl IntoIterator for AggregatedErrors {
    type Item = EntityFailure;
    type IntoIter = std::vec::IntoIter<EntityFailure>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
