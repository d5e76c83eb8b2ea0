//! In-memory control plane that records every ACL call.
//!
//! The fake applies writes to its own state, so a second reconciliation run
//! against the same instance observes the result of the first. Token updates
//! are refused the way a real control plane refuses them: the body accessor
//! must equal the path accessor and the `Local` flag cannot change.
//!
//! # Examples
//!
//! ```
//! use boundary_provision::AclApi;
//! use boundary_provision_test_helpers::control_plane::{Call, FakeControlPlane};
//!
//! let plane = FakeControlPlane::new().with_policy("web", "web nodes", "");
//! assert_eq!(plane.list_policies().map(|p| p.len()).ok(), Some(1));
//! assert_eq!(plane.calls(), [Call::ListPolicies]);
//! ```

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};

use boundary_provision::{
    AclApi, LivePolicy, LiveToken, PolicyLink, PolicyRequest, ProvisionError, TokenRequest,
};

/// One call received by [`FakeControlPlane`], with the key it targeted.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Call {
    /// `list_policies`.
    ListPolicies,
    /// `create_policy` for the named policy.
    CreatePolicy(String),
    /// `update_policy` for the named policy.
    UpdatePolicy(String),
    /// `delete_policy` for the named policy.
    DeletePolicy(String),
    /// `list_tokens`.
    ListTokens,
    /// `create_token` for the accessor.
    CreateToken(String),
    /// `update_token` for the accessor.
    UpdateToken(String),
    /// `delete_token` for the accessor.
    DeleteToken(String),
}

impl Call {
    /// Returns `true` for calls that mutate control-plane state.
    #[must_use]
    pub const fn is_write(&self) -> bool {
        !matches!(self, Self::ListPolicies | Self::ListTokens)
    }

    const fn operation(&self) -> &'static str {
        match self {
            Self::ListPolicies => "list_policies",
            Self::CreatePolicy(_) => "create_policy",
            Self::UpdatePolicy(_) => "update_policy",
            Self::DeletePolicy(_) => "delete_policy",
            Self::ListTokens => "list_tokens",
            Self::CreateToken(_) => "create_token",
            Self::UpdateToken(_) => "update_token",
            Self::DeleteToken(_) => "delete_token",
        }
    }
}

/// How a scripted failure presents itself.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureMode {
    /// Retries were exhausted.
    Unavailable,
    /// The request was rejected with the given status.
    Rejected(u16),
}

/// Recording [`AclApi`] implementation backed by in-memory maps.
#[derive(Debug, Default)]
pub struct FakeControlPlane {
    policies: RefCell<BTreeMap<String, LivePolicy>>,
    tokens: RefCell<BTreeMap<String, LiveToken>>,
    calls: RefCell<Vec<Call>>,
    failures: HashMap<Call, FailureMode>,
    next_id: Cell<u32>,
}

impl FakeControlPlane {
    /// Create an empty control plane.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a live policy.
    #[must_use]
    pub fn with_policy(self, name: &str, description: &str, rules: &str) -> Self {
        let id = self.allocate_id();
        self.policies.borrow_mut().insert(
            name.to_owned(),
            LivePolicy {
                id,
                name: name.to_owned(),
                description: description.to_owned(),
                rules: rules.to_owned(),
            },
        );
        self
    }

    /// Seed a live token.
    #[must_use]
    pub fn with_token(self, accessor_id: &str, description: &str, policies: &[&str]) -> Self {
        self.tokens.borrow_mut().insert(
            accessor_id.to_ascii_lowercase(),
            LiveToken {
                accessor_id: accessor_id.to_owned(),
                description: description.to_owned(),
                policies: policies
                    .iter()
                    .map(|name| PolicyLink {
                        id: None,
                        name: (*name).to_owned(),
                    })
                    .collect(),
                local: false,
            },
        );
        self
    }

    /// Make every occurrence of `call` fail with `mode`.
    #[must_use]
    pub fn fail_on(mut self, call: Call, mode: FailureMode) -> Self {
        self.failures.insert(call, mode);
        self
    }

    /// Every call received so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    /// Mutating calls received so far, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<Call> {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.is_write())
            .cloned()
            .collect()
    }

    /// Current live state of the named policy.
    #[must_use]
    pub fn policy(&self, name: &str) -> Option<LivePolicy> {
        self.policies.borrow().get(name).cloned()
    }

    /// Current live state of the token with `accessor_id`.
    #[must_use]
    pub fn token(&self, accessor_id: &str) -> Option<LiveToken> {
        self.tokens
            .borrow()
            .get(&accessor_id.to_ascii_lowercase())
            .cloned()
    }

    fn allocate_id(&self) -> String {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        format!("00000000-0000-4000-8000-{id:012}")
    }

    fn record(&self, call: Call) -> Result<(), ProvisionError> {
        let failure = self.failures.get(&call).copied();
        let operation = call.operation();
        self.calls.borrow_mut().push(call);
        match failure {
            None => Ok(()),
            Some(FailureMode::Unavailable) => Err(ProvisionError::unavailable(
                operation,
                3,
                "connection refused",
            )),
            Some(FailureMode::Rejected(status)) => {
                Err(ProvisionError::rejected(operation, status, "rejected by fake"))
            }
        }
    }

    fn store_policy(&self, id: String, request: &PolicyRequest) {
        self.policies.borrow_mut().insert(
            request.name.clone(),
            LivePolicy {
                id,
                name: request.name.clone(),
                description: request.description.clone(),
                rules: request.rules.clone(),
            },
        );
    }

    fn store_token(&self, request: &TokenRequest) {
        self.tokens.borrow_mut().insert(
            request.accessor_id.to_ascii_lowercase(),
            LiveToken {
                accessor_id: request.accessor_id.clone(),
                description: request.description.clone(),
                policies: request.policies.clone(),
                local: request.local,
            },
        );
    }

    fn missing(operation: &str, key: &str) -> ProvisionError {
        ProvisionError::rejected(operation, 404, format!("{key} not found"))
    }
}

impl AclApi for FakeControlPlane {
    fn list_tokens(&self) -> Result<Vec<LiveToken>, ProvisionError> {
        self.record(Call::ListTokens)?;
        Ok(self.tokens.borrow().values().cloned().collect())
    }

    fn create_token(&self, token: &TokenRequest) -> Result<(), ProvisionError> {
        self.record(Call::CreateToken(token.accessor_id.clone()))?;
        self.store_token(token);
        Ok(())
    }

    fn update_token(&self, accessor_id: &str, token: &TokenRequest) -> Result<(), ProvisionError> {
        self.record(Call::UpdateToken(accessor_id.to_owned()))?;
        let current = self
            .token(accessor_id)
            .ok_or_else(|| Self::missing("update_token", accessor_id))?;
        if token.accessor_id != accessor_id {
            return Err(ProvisionError::rejected(
                "update_token",
                400,
                "Specified accessor ID in URL does not match the one in the request body",
            ));
        }
        if token.local != current.local {
            return Err(ProvisionError::rejected(
                "update_token",
                400,
                "Cannot toggle local mode of an existing token",
            ));
        }
        self.store_token(token);
        Ok(())
    }

    fn delete_token(&self, accessor_id: &str) -> Result<(), ProvisionError> {
        self.record(Call::DeleteToken(accessor_id.to_owned()))?;
        self.tokens
            .borrow_mut()
            .remove(&accessor_id.to_ascii_lowercase())
            .map(drop)
            .ok_or_else(|| Self::missing("delete_token", accessor_id))
    }

    fn list_policies(&self) -> Result<Vec<LivePolicy>, ProvisionError> {
        self.record(Call::ListPolicies)?;
        Ok(self.policies.borrow().values().cloned().collect())
    }

    fn create_policy(&self, policy: &PolicyRequest) -> Result<(), ProvisionError> {
        self.record(Call::CreatePolicy(policy.name.clone()))?;
        let id = self.allocate_id();
        self.store_policy(id, policy);
        Ok(())
    }

    fn update_policy(&self, name: &str, policy: &PolicyRequest) -> Result<(), ProvisionError> {
        self.record(Call::UpdatePolicy(name.to_owned()))?;
        let id = self
            .policy(name)
            .map(|current| current.id)
            .ok_or_else(|| Self::missing("update_policy", name))?;
        self.store_policy(id, policy);
        Ok(())
    }

    fn delete_policy(&self, name: &str) -> Result<(), ProvisionError> {
        self.record(Call::DeletePolicy(name.to_owned()))?;
        self.policies
            .borrow_mut()
            .remove(name)
            .map(drop)
            .ok_or_else(|| Self::missing("delete_policy", name))
    }
}
