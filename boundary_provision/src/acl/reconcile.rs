//! Convergence of declared ACL entities against the live control plane.
//!
//! Policies are processed before tokens. Each entity is reconciled
//! independently: a failure is recorded against that entity and the run moves
//! on, so one bad entry never blocks the rest of the batch.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use tracing::{debug, info, warn};

use super::client::{AclApi, LivePolicy, LiveToken, PolicyRequest, TokenRequest};
use super::model::{AclEntity, DesiredState, Ensure, Policy, PolicySpec, Token, TokenSpec};
use crate::{EntityFailure, ProvisionError};

/// Change applied to one entity.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    /// The entity did not exist and was created.
    Created,
    /// The entity existed with different content and was updated.
    Updated,
    /// The entity existed and was deleted.
    Deleted,
    /// The live entity already matched the declaration.
    Unchanged,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
            Self::Unchanged => "unchanged",
        })
    }
}

/// Result of reconciling one declared entity.
#[derive(Debug)]
pub struct EntityOutcome {
    /// Entity the outcome belongs to.
    pub entity: AclEntity,
    /// Applied change, or the reason the entity did not converge.
    pub result: Result<Action, ProvisionError>,
}

/// Per-entity outcomes of one reconciliation run, in processing order.
#[derive(Debug, Default)]
pub struct ReconcileReport {
    outcomes: Vec<EntityOutcome>,
}

impl ReconcileReport {
    /// All outcomes, policies first.
    #[must_use]
    pub fn outcomes(&self) -> &[EntityOutcome] {
        &self.outcomes
    }

    /// Returns `true` when every entity converged.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.result.is_ok())
    }

    /// Number of entities that were created, updated, or deleted.
    #[must_use]
    pub fn changed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome.result, Ok(action) if action != Action::Unchanged))
            .count()
    }

    /// Outcomes that failed.
    #[must_use = "iterators should be consumed to inspect failures"]
    pub fn failures(&self) -> impl Iterator<Item = &EntityOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.result.is_err())
    }

    /// Convert the report into an error when any entity failed.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Aggregate`] naming every failed entity.
    pub fn into_result(self) -> Result<Self, ProvisionError> {
        if self.is_converged() {
            return Ok(self);
        }
        let failures = self.outcomes.into_iter().filter_map(|outcome| match outcome.result {
            Ok(_) => None,
            Err(error) => Some(EntityFailure {
                entity: outcome.entity,
                error,
            }),
        });
        match ProvisionError::try_aggregate(failures) {
            Some(err) => Err(err),
            None => Ok(Self::default()),
        }
    }

    fn record(&mut self, entity: AclEntity, result: Result<Action, ProvisionError>) {
        match &result {
            Ok(Action::Unchanged) => debug!(%entity, "already converged"),
            Ok(action) => info!(%entity, %action, "converged"),
            Err(err) => warn!(%entity, error = %err, "failed to converge"),
        }
        self.outcomes.push(EntityOutcome { entity, result });
    }
}

/// Converge the control plane towards `desired`.
///
/// Entities that live on the control plane but are not declared are never
/// touched. The returned report lists one outcome per declared entity; call
/// [`ReconcileReport::into_result`] to turn failures into an error.
#[must_use]
pub fn reconcile<A>(api: &A, desired: &DesiredState) -> ReconcileReport
where
    A: AclApi + ?Sized,
{
    let mut report = ReconcileReport::default();
    let failed = reconcile_policies(api, desired.policies(), &mut report);
    reconcile_tokens(api, desired.tokens(), &failed, &mut report);
    report
}

/// Validate the declarations and converge them in one step.
///
/// Validation happens before any control-plane call, so inconsistent
/// declarations leave the control plane untouched.
///
/// # Errors
///
/// Returns [`ProvisionError::Declaration`] for inconsistent declarations, or
/// [`ProvisionError::Aggregate`] when any entity failed to converge.
pub fn reconcile_declared<A>(
    api: &A,
    policies: BTreeMap<String, PolicySpec>,
    tokens: BTreeMap<String, TokenSpec>,
) -> Result<ReconcileReport, ProvisionError>
where
    A: AclApi + ?Sized,
{
    let desired = DesiredState::from_specs(policies, tokens)?;
    reconcile(api, &desired).into_result()
}

fn reconcile_policies<A>(api: &A, policies: &[Policy], report: &mut ReconcileReport) -> HashSet<String>
where
    A: AclApi + ?Sized,
{
    let mut failed = HashSet::new();
    if policies.is_empty() {
        return failed;
    }
    let live: HashMap<String, LivePolicy> = match api.list_policies() {
        Ok(listed) => listed.into_iter().map(|p| (p.name.clone(), p)).collect(),
        Err(err) => {
            let cause = err.to_string();
            for policy in policies {
                failed.insert(policy.name.clone());
                report.record(
                    AclEntity::policy(&policy.name),
                    Err(ProvisionError::LiveStateUnavailable {
                        kind: "policy",
                        cause: cause.clone(),
                    }),
                );
            }
            return failed;
        }
    };

    for policy in policies {
        let result = converge_policy(api, policy, live.get(&policy.name));
        if result.is_err() {
            failed.insert(policy.name.clone());
        }
        report.record(AclEntity::policy(&policy.name), result);
    }
    failed
}

fn converge_policy<A>(api: &A, policy: &Policy, live: Option<&LivePolicy>) -> Result<Action, ProvisionError>
where
    A: AclApi + ?Sized,
{
    let request = PolicyRequest::from(policy);
    match (policy.ensure, live) {
        (Ensure::Present, None) => api.create_policy(&request).map(|()| Action::Created),
        (Ensure::Present, Some(current)) if !current.matches(&request) => api
            .update_policy(&policy.name, &request)
            .map(|()| Action::Updated),
        (Ensure::Absent, Some(_)) => api.delete_policy(&policy.name).map(|()| Action::Deleted),
        _ => Ok(Action::Unchanged),
    }
}

fn reconcile_tokens<A>(
    api: &A,
    tokens: &[Token],
    failed_policies: &HashSet<String>,
    report: &mut ReconcileReport,
) where
    A: AclApi + ?Sized,
{
    if tokens.is_empty() {
        return;
    }
    let live: Result<HashMap<String, LiveToken>, String> = api
        .list_tokens()
        .map(|listed| {
            listed
                .into_iter()
                .map(|t| (t.accessor_id.to_ascii_lowercase(), t))
                .collect()
        })
        .map_err(|err| err.to_string());

    for token in tokens {
        let entity = AclEntity::token(token);
        let blocked = (token.ensure == Ensure::Present)
            .then(|| {
                token
                    .policies_by_name
                    .iter()
                    .find(|name| failed_policies.contains(*name))
            })
            .flatten();
        let result = match (&live, blocked) {
            (_, Some(policy)) => Err(ProvisionError::DependencyFailed {
                policy: policy.clone(),
            }),
            (Err(cause), None) => Err(ProvisionError::LiveStateUnavailable {
                kind: "token",
                cause: cause.clone(),
            }),
            (Ok(live), None) => {
                converge_token(api, token, live.get(&token.accessor_id.to_ascii_lowercase()))
            }
        };
        report.record(entity, result);
    }
}

fn converge_token<A>(api: &A, token: &Token, live: Option<&LiveToken>) -> Result<Action, ProvisionError>
where
    A: AclApi + ?Sized,
{
    let mut request = TokenRequest::from(token);
    match (token.ensure, live) {
        (Ensure::Present, None) => api.create_token(&request).map(|()| Action::Created),
        (Ensure::Present, Some(current)) if !current.matches(&request) => {
            // Secret and locality are fixed at creation; the body accessor
            // must match the path exactly.
            request.secret_id = None;
            request.local = current.local;
            request.accessor_id.clone_from(&current.accessor_id);
            api.update_token(&current.accessor_id, &request)
                .map(|()| Action::Updated)
        }
        (Ensure::Absent, Some(current)) => api
            .delete_token(&current.accessor_id)
            .map(|()| Action::Deleted),
        _ => Ok(Action::Unchanged),
    }
}
