//! Desired-state model for ACL policies and tokens.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::rules::render_rules;
use crate::{DeclarationIssue, ProvisionError};

/// Whether a declared entity should exist on the control plane.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Ensure {
    /// The entity must exist with the declared content.
    #[default]
    Present,
    /// The entity must not exist.
    Absent,
}

/// Resource keyword of a policy rule.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    /// ACL administration.
    Acl,
    /// A single agent by node name.
    Agent,
    /// Agents by node-name prefix.
    AgentPrefix,
    /// A single user event.
    Event,
    /// User events by prefix.
    EventPrefix,
    /// A single KV key.
    Key,
    /// KV keys by prefix.
    KeyPrefix,
    /// Gossip keyring operations.
    Keyring,
    /// Service mesh configuration.
    Mesh,
    /// A single catalog node.
    Node,
    /// Catalog nodes by prefix.
    NodePrefix,
    /// Cluster operator endpoints.
    Operator,
    /// Cluster peering.
    Peering,
    /// A single prepared query.
    Query,
    /// Prepared queries by prefix.
    QueryPrefix,
    /// A single service.
    Service,
    /// Services by prefix.
    ServicePrefix,
    /// A single session.
    Session,
    /// Sessions by prefix.
    SessionPrefix,
}

impl Resource {
    /// Returns the rule keyword for this resource.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Acl => "acl",
            Self::Agent => "agent",
            Self::AgentPrefix => "agent_prefix",
            Self::Event => "event",
            Self::EventPrefix => "event_prefix",
            Self::Key => "key",
            Self::KeyPrefix => "key_prefix",
            Self::Keyring => "keyring",
            Self::Mesh => "mesh",
            Self::Node => "node",
            Self::NodePrefix => "node_prefix",
            Self::Operator => "operator",
            Self::Peering => "peering",
            Self::Query => "query",
            Self::QueryPrefix => "query_prefix",
            Self::Service => "service",
            Self::ServicePrefix => "service_prefix",
            Self::Session => "session",
            Self::SessionPrefix => "session_prefix",
        }
    }

    /// Returns `true` when rules for this resource name a segment.
    #[must_use]
    pub const fn takes_segment(self) -> bool {
        !matches!(
            self,
            Self::Acl | Self::Keyring | Self::Mesh | Self::Operator | Self::Peering
        )
    }
}

/// Access granted by a rule.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    /// Read access.
    Read,
    /// Read and write access.
    Write,
    /// Explicit denial.
    Deny,
    /// Listing access.
    List,
}

impl Disposition {
    /// Returns the rule keyword for this disposition.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Deny => "deny",
            Self::List => "list",
        }
    }
}

/// One entry of a policy's ordered rule list.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Rule {
    /// Resource the rule applies to.
    pub resource: Resource,
    /// Exact name or prefix for segmented resources; may be empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,
    /// Access granted.
    pub disposition: Disposition,
}

impl Rule {
    /// Build a rule for a segmented resource.
    #[must_use]
    pub fn new(resource: Resource, segment: impl Into<String>, disposition: Disposition) -> Self {
        Self {
            resource,
            segment: Some(segment.into()),
            disposition,
        }
    }

    /// Build a rule for a resource that takes no segment.
    #[must_use]
    pub const fn global(resource: Resource, disposition: Disposition) -> Self {
        Self {
            resource,
            segment: None,
            disposition,
        }
    }
}

/// Declared policy body, keyed by name in the surrounding mapping.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct PolicySpec {
    /// Human-readable description stored with the policy.
    #[serde(default)]
    pub description: String,
    /// Ordered rules.
    #[serde(default)]
    pub rules: Vec<Rule>,
    /// Desired presence.
    #[serde(default)]
    pub ensure: Ensure,
}

/// Declared token body, keyed by logical name in the surrounding mapping.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TokenSpec {
    /// Stable accessor UUID used to find the token on the control plane.
    pub accessor_id: String,
    /// Names of the policies linked to the token.
    #[serde(default)]
    pub policies_by_name: BTreeSet<String>,
    /// Description stored with the token; defaults to the logical name.
    #[serde(default)]
    pub description: Option<String>,
    /// Secret to assign at creation; generated by the control plane when
    /// omitted.
    #[serde(default)]
    pub secret_id: Option<String>,
    /// Create the token as datacenter-local.
    #[serde(default)]
    pub local: bool,
    /// Desired presence.
    #[serde(default)]
    pub ensure: Ensure,
}

/// A named policy with its desired presence.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Policy {
    /// Unique policy name; the reconciliation key.
    pub name: String,
    /// Description stored with the policy.
    pub description: String,
    /// Ordered rules.
    pub rules: Vec<Rule>,
    /// Desired presence.
    pub ensure: Ensure,
}

impl Policy {
    /// Build a policy from its name and declared body.
    #[must_use]
    pub fn from_spec(name: impl Into<String>, spec: PolicySpec) -> Self {
        Self {
            name: name.into(),
            description: spec.description,
            rules: spec.rules,
            ensure: spec.ensure,
        }
    }

    /// Render the rule list in the control plane's rule syntax.
    #[must_use]
    pub fn rendered_rules(&self) -> String {
        render_rules(&self.rules)
    }
}

/// A named token with its desired presence.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Token {
    /// Logical declaration name.
    pub name: String,
    /// Accessor UUID; the reconciliation key.
    pub accessor_id: String,
    /// Linked policy names.
    pub policies_by_name: BTreeSet<String>,
    /// Description stored with the token.
    pub description: String,
    /// Secret used at creation only.
    pub secret_id: Option<String>,
    /// Datacenter-local flag used at creation only.
    pub local: bool,
    /// Desired presence.
    pub ensure: Ensure,
}

impl Token {
    /// Build a token from its logical name and declared body.
    #[must_use]
    pub fn from_spec(name: impl Into<String>, spec: TokenSpec) -> Self {
        let name = name.into();
        Self {
            description: spec.description.unwrap_or_else(|| name.clone()),
            name,
            accessor_id: spec.accessor_id,
            policies_by_name: spec.policies_by_name,
            secret_id: spec.secret_id,
            local: spec.local,
            ensure: spec.ensure,
        }
    }
}

/// Identity of a declared entity, used when reporting outcomes.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum AclEntity {
    /// A policy, keyed by name.
    Policy {
        /// Policy name.
        name: String,
    },
    /// A token, keyed by accessor.
    Token {
        /// Logical token name.
        name: String,
        /// Accessor UUID.
        accessor_id: String,
    },
}

impl AclEntity {
    /// Identity of the policy called `name`.
    #[must_use]
    pub fn policy(name: impl Into<String>) -> Self {
        Self::Policy { name: name.into() }
    }

    /// Identity of `token`.
    #[must_use]
    pub fn token(token: &Token) -> Self {
        Self::Token {
            name: token.name.clone(),
            accessor_id: token.accessor_id.clone(),
        }
    }
}

impl fmt::Display for AclEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Policy { name } => write!(f, "policy '{name}'"),
            Self::Token { name, accessor_id } => write!(f, "token '{name}' ({accessor_id})"),
        }
    }
}

/// Validated set of declared policies and tokens.
///
/// Construction checks every cross-reference, so a value of this type never
/// names a policy it does not also declare.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DesiredState {
    policies: Vec<Policy>,
    tokens: Vec<Token>,
}

impl DesiredState {
    /// Validate and assemble a desired state.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Declaration`] listing every inconsistency
    /// found.
    pub fn new(policies: Vec<Policy>, tokens: Vec<Token>) -> Result<Self, ProvisionError> {
        let issues = validate(&policies, &tokens);
        if issues.is_empty() {
            Ok(Self { policies, tokens })
        } else {
            Err(ProvisionError::Declaration(issues))
        }
    }

    /// Validate declarations keyed by name, as supplied by the orchestration
    /// layer.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Declaration`] listing every inconsistency
    /// found.
    pub fn from_specs(
        policies: BTreeMap<String, PolicySpec>,
        tokens: BTreeMap<String, TokenSpec>,
    ) -> Result<Self, ProvisionError> {
        Self::new(
            policies
                .into_iter()
                .map(|(name, spec)| Policy::from_spec(name, spec))
                .collect(),
            tokens
                .into_iter()
                .map(|(name, spec)| Token::from_spec(name, spec))
                .collect(),
        )
    }

    /// Declared policies in declaration order.
    #[must_use]
    pub fn policies(&self) -> &[Policy] {
        &self.policies
    }

    /// Declared tokens in declaration order.
    #[must_use]
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Returns `true` when nothing is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty() && self.tokens.is_empty()
    }
}

fn validate(policies: &[Policy], tokens: &[Token]) -> Vec<DeclarationIssue> {
    let mut issues = Vec::new();
    let mut declared: HashMap<&str, Ensure> = HashMap::new();
    for policy in policies {
        if policy.name.trim().is_empty() {
            issues.push(DeclarationIssue::EmptyPolicyName);
            continue;
        }
        if declared.insert(&policy.name, policy.ensure).is_some() {
            issues.push(DeclarationIssue::DuplicatePolicy(policy.name.clone()));
        }
        for (index, rule) in policy.rules.iter().enumerate() {
            if !rule.resource.takes_segment() && rule.segment.is_some() {
                issues.push(DeclarationIssue::UnexpectedSegment {
                    policy: policy.name.clone(),
                    index,
                    resource: rule.resource.as_str(),
                });
            }
        }
    }

    let mut accessors: HashMap<String, &str> = HashMap::new();
    for token in tokens {
        match Uuid::parse_str(&token.accessor_id) {
            Ok(accessor) => {
                if let Some(first) = accessors.insert(accessor.to_string(), &token.name) {
                    issues.push(DeclarationIssue::DuplicateAccessor {
                        first: first.to_owned(),
                        second: token.name.clone(),
                        accessor_id: token.accessor_id.clone(),
                    });
                }
            }
            Err(_) => issues.push(DeclarationIssue::InvalidAccessor {
                token: token.name.clone(),
                accessor_id: token.accessor_id.clone(),
            }),
        }
        for policy in &token.policies_by_name {
            match declared.get(policy.as_str()) {
                None => issues.push(DeclarationIssue::UnknownPolicy {
                    token: token.name.clone(),
                    policy: policy.clone(),
                }),
                Some(Ensure::Absent) if token.ensure == Ensure::Present => {
                    issues.push(DeclarationIssue::AbsentPolicy {
                        token: token.name.clone(),
                        policy: policy.clone(),
                    });
                }
                Some(_) => {}
            }
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use rstest::{fixture, rstest};

    use super::{DesiredState, Disposition, Ensure, PolicySpec, Resource, Rule, TokenSpec};
    use crate::DeclarationIssue;

    const ACCESSOR: &str = "7c4e3f11-786d-44e6-ac1d-b99546a1ccbd";

    #[fixture]
    fn policies() -> BTreeMap<String, PolicySpec> {
        BTreeMap::from([(
            "test_policy_abc".to_owned(),
            PolicySpec {
                description: "This is a test policy".to_owned(),
                rules: vec![Rule::new(Resource::Key, "test_key", Disposition::Write)],
                ensure: Ensure::Present,
            },
        )])
    }

    fn token(accessor_id: &str, policies: &[&str]) -> TokenSpec {
        TokenSpec {
            accessor_id: accessor_id.to_owned(),
            policies_by_name: policies.iter().map(|p| (*p).to_owned()).collect::<BTreeSet<_>>(),
            ..TokenSpec::default()
        }
    }

    fn issues_of(
        policies: BTreeMap<String, PolicySpec>,
        tokens: BTreeMap<String, TokenSpec>,
    ) -> Vec<DeclarationIssue> {
        match DesiredState::from_specs(policies, tokens) {
            Ok(_) => Vec::new(),
            Err(err) => err.declaration_issues().map(<[_]>::to_vec).unwrap_or_default(),
        }
    }

    #[rstest]
    fn consistent_declarations_validate(policies: BTreeMap<String, PolicySpec>) {
        let tokens = BTreeMap::from([("xyz".to_owned(), token(ACCESSOR, &["test_policy_abc"]))]);
        let state = match DesiredState::from_specs(policies, tokens) {
            Ok(state) => state,
            Err(err) => panic!("expected valid declarations: {err}"),
        };
        assert_eq!(state.tokens().len(), 1);
        assert_eq!(state.tokens().first().map(|t| t.description.as_str()), Some("xyz"));
    }

    #[rstest]
    fn unknown_policy_is_named(policies: BTreeMap<String, PolicySpec>) {
        let tokens = BTreeMap::from([("xyz".to_owned(), token(ACCESSOR, &["ghost"]))]);
        assert_eq!(
            issues_of(policies, tokens),
            vec![DeclarationIssue::UnknownPolicy {
                token: "xyz".to_owned(),
                policy: "ghost".to_owned(),
            }]
        );
    }

    #[rstest]
    fn present_token_cannot_use_absent_policy(mut policies: BTreeMap<String, PolicySpec>) {
        if let Some(spec) = policies.get_mut("test_policy_abc") {
            spec.ensure = Ensure::Absent;
        }
        let tokens = BTreeMap::from([("xyz".to_owned(), token(ACCESSOR, &["test_policy_abc"]))]);
        assert!(matches!(
            issues_of(policies, tokens).as_slice(),
            [DeclarationIssue::AbsentPolicy { .. }]
        ));
    }

    #[rstest]
    fn accessor_problems_are_all_reported(policies: BTreeMap<String, PolicySpec>) {
        let tokens = BTreeMap::from([
            ("a".to_owned(), token(ACCESSOR, &[])),
            ("b".to_owned(), token(&ACCESSOR.to_uppercase(), &[])),
            ("c".to_owned(), token("not-a-uuid", &[])),
        ]);
        let issues = issues_of(policies, tokens);
        assert_eq!(issues.len(), 2, "unexpected issues: {issues:?}");
        assert!(issues.iter().any(|i| matches!(i, DeclarationIssue::DuplicateAccessor { .. })));
        assert!(issues.iter().any(|i| matches!(i, DeclarationIssue::InvalidAccessor { .. })));
    }

    #[test]
    fn global_resources_reject_segments() {
        let policies = BTreeMap::from([(
            "ops".to_owned(),
            PolicySpec {
                rules: vec![Rule::new(Resource::Operator, "x", Disposition::Read)],
                ..PolicySpec::default()
            },
        )]);
        assert!(matches!(
            issues_of(policies, BTreeMap::new()).as_slice(),
            [DeclarationIssue::UnexpectedSegment { index: 0, resource: "operator", .. }]
        ));
    }

    #[test]
    fn rules_deserialize_from_declarations() {
        let parsed: Result<PolicySpec, _> = serde_json::from_value(serde_json::json!({
            "description": "d",
            "rules": [
                {"resource": "service_prefix", "segment": "tst_service", "disposition": "read"},
                {"resource": "operator", "disposition": "read"}
            ],
            "ensure": "absent"
        }));
        let spec = match parsed {
            Ok(spec) => spec,
            Err(err) => panic!("policy spec should deserialize: {err}"),
        };
        assert_eq!(spec.ensure, Ensure::Absent);
        assert_eq!(
            spec.rules,
            vec![
                Rule::new(Resource::ServicePrefix, "tst_service", Disposition::Read),
                Rule::global(Resource::Operator, Disposition::Read),
            ]
        );
    }
}
