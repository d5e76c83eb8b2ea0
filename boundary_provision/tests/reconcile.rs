//! Reconciliation behaviour against an in-memory control plane.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Result, anyhow};
use boundary_provision::{
    Action, DesiredState, Disposition, Ensure, PolicySpec, ProvisionError, Resource, Rule,
    TokenSpec, reconcile, reconcile_declared, render_rules,
};
use rstest::{fixture, rstest};
use test_helpers::control_plane::{Call, FailureMode, FakeControlPlane};

const ACCESSOR: &str = "7c4e3f11-786d-44e6-ac1d-b99546a1ccbd";
const OTHER_ACCESSOR: &str = "10381ad3-2837-43a6-b1ea-e27b7d53a749";

fn policy_rules() -> Vec<Rule> {
    vec![
        Rule::new(Resource::ServicePrefix, "tst_service", Disposition::Read),
        Rule::new(Resource::Key, "test_key", Disposition::Write),
        Rule::new(Resource::NodePrefix, "", Disposition::Deny),
        Rule::global(Resource::Operator, Disposition::Read),
    ]
}

#[fixture]
fn policies() -> BTreeMap<String, PolicySpec> {
    BTreeMap::from([(
        "test_policy_abc".to_owned(),
        PolicySpec {
            description: "This is a test policy".to_owned(),
            rules: policy_rules(),
            ensure: Ensure::Present,
        },
    )])
}

fn token(accessor_id: &str, policies: &[&str], ensure: Ensure) -> TokenSpec {
    TokenSpec {
        accessor_id: accessor_id.to_owned(),
        policies_by_name: policies.iter().map(|p| (*p).to_owned()).collect::<BTreeSet<_>>(),
        ensure,
        ..TokenSpec::default()
    }
}

#[fixture]
fn tokens() -> BTreeMap<String, TokenSpec> {
    BTreeMap::from([(
        "test_token_xyz".to_owned(),
        token(ACCESSOR, &["test_policy_abc"], Ensure::Present),
    )])
}

fn converged_plane() -> FakeControlPlane {
    FakeControlPlane::new()
        .with_policy(
            "test_policy_abc",
            "This is a test policy",
            &render_rules(&policy_rules()),
        )
        .with_token(ACCESSOR, "test_token_xyz", &["test_policy_abc"])
}

#[rstest]
fn creates_policy_before_token(
    policies: BTreeMap<String, PolicySpec>,
    tokens: BTreeMap<String, TokenSpec>,
) -> Result<()> {
    let plane = FakeControlPlane::new();
    let report = reconcile_declared(&plane, policies, tokens)?;

    assert_eq!(
        plane.writes(),
        [
            Call::CreatePolicy("test_policy_abc".to_owned()),
            Call::CreateToken(ACCESSOR.to_owned()),
        ]
    );
    assert_eq!(report.changed(), 2);
    let created = plane
        .token(ACCESSOR)
        .ok_or_else(|| anyhow!("token should exist"))?;
    assert_eq!(created.description, "test_token_xyz");
    Ok(())
}

#[rstest]
fn converged_state_issues_no_writes(
    policies: BTreeMap<String, PolicySpec>,
    tokens: BTreeMap<String, TokenSpec>,
) -> Result<()> {
    let plane = converged_plane();
    let report = reconcile_declared(&plane, policies, tokens)?;

    assert!(plane.writes().is_empty(), "unexpected writes: {:?}", plane.writes());
    assert!(report
        .outcomes()
        .iter()
        .all(|outcome| matches!(outcome.result, Ok(Action::Unchanged))));
    Ok(())
}

#[rstest]
fn second_run_is_idempotent(
    policies: BTreeMap<String, PolicySpec>,
    tokens: BTreeMap<String, TokenSpec>,
) -> Result<()> {
    let plane = FakeControlPlane::new();
    let desired = DesiredState::from_specs(policies, tokens)?;
    reconcile(&plane, &desired).into_result()?;
    let writes_after_first = plane.writes().len();

    let report = reconcile(&plane, &desired).into_result()?;
    assert_eq!(plane.writes().len(), writes_after_first);
    assert_eq!(report.changed(), 0);
    Ok(())
}

#[rstest]
fn unknown_policy_fails_before_any_call(policies: BTreeMap<String, PolicySpec>) {
    let plane = FakeControlPlane::new();
    let tokens = BTreeMap::from([("xyz".to_owned(), token(ACCESSOR, &["ghost"], Ensure::Present))]);

    let err = reconcile_declared(&plane, policies, tokens).expect_err("ghost must be rejected");
    assert!(matches!(err, ProvisionError::Declaration(_)));
    assert!(err.to_string().contains("ghost"));
    assert!(plane.calls().is_empty());
}

#[test]
fn absent_token_is_deleted_once() -> Result<()> {
    let plane = converged_plane();
    let tokens = BTreeMap::from([(
        "test_token_xyz".to_owned(),
        token(&ACCESSOR.to_uppercase(), &[], Ensure::Absent),
    )]);

    reconcile_declared(&plane, BTreeMap::new(), tokens)?;
    assert_eq!(plane.writes(), [Call::DeleteToken(ACCESSOR.to_owned())]);
    assert!(plane.token(ACCESSOR).is_none());
    Ok(())
}

#[test]
fn absent_entries_already_missing_are_noops() -> Result<()> {
    let plane = FakeControlPlane::new();
    let policies = BTreeMap::from([(
        "old".to_owned(),
        PolicySpec {
            ensure: Ensure::Absent,
            ..PolicySpec::default()
        },
    )]);
    let tokens = BTreeMap::from([("gone".to_owned(), token(ACCESSOR, &[], Ensure::Absent))]);

    let report = reconcile_declared(&plane, policies, tokens)?;
    assert!(plane.writes().is_empty());
    assert_eq!(report.outcomes().len(), 2);
    Ok(())
}

#[rstest]
fn unmanaged_entries_are_left_alone(
    policies: BTreeMap<String, PolicySpec>,
    tokens: BTreeMap<String, TokenSpec>,
) -> Result<()> {
    let plane = converged_plane()
        .with_policy("global-management", "Builtin Policy", "")
        .with_token(OTHER_ACCESSOR, "Anonymous Token", &[]);

    reconcile_declared(&plane, policies, tokens)?;
    assert!(plane.writes().is_empty());
    assert!(plane.policy("global-management").is_some());
    assert!(plane.token(OTHER_ACCESSOR).is_some());
    Ok(())
}

#[rstest]
fn changed_content_triggers_update(
    mut policies: BTreeMap<String, PolicySpec>,
    tokens: BTreeMap<String, TokenSpec>,
) -> Result<()> {
    if let Some(spec) = policies.get_mut("test_policy_abc") {
        spec.rules.push(Rule::new(Resource::Agent, "web-1", Disposition::Read));
    }
    let plane = converged_plane().with_policy("other", "", "");
    let mut tokens = tokens;
    tokens.insert(
        "second".to_owned(),
        token(OTHER_ACCESSOR, &["test_policy_abc"], Ensure::Present),
    );
    let plane = plane.with_token(OTHER_ACCESSOR, "second", &["other"]);

    reconcile_declared(&plane, policies, tokens)?;
    assert_eq!(
        plane.writes(),
        [
            Call::UpdatePolicy("test_policy_abc".to_owned()),
            Call::UpdateToken(OTHER_ACCESSOR.to_owned()),
        ]
    );
    let policy = plane
        .policy("test_policy_abc")
        .ok_or_else(|| anyhow!("policy should exist"))?;
    assert!(policy.rules.ends_with("agent \"web-1\" {\n  policy = \"read\"\n}"));
    Ok(())
}

#[rstest]
fn token_update_keeps_live_accessor_and_locality(
    policies: BTreeMap<String, PolicySpec>,
) -> Result<()> {
    let plane = converged_plane();
    let mut declared = token(&ACCESSOR.to_uppercase(), &["test_policy_abc"], Ensure::Present);
    declared.description = Some("edge agents".to_owned());
    declared.local = true;
    let tokens = BTreeMap::from([("test_token_xyz".to_owned(), declared)]);

    reconcile_declared(&plane, policies, tokens)?;
    assert_eq!(plane.writes(), [Call::UpdateToken(ACCESSOR.to_owned())]);
    let updated = plane
        .token(ACCESSOR)
        .ok_or_else(|| anyhow!("token should exist"))?;
    assert_eq!(updated.accessor_id, ACCESSOR);
    assert_eq!(updated.description, "edge agents");
    assert!(!updated.local);
    Ok(())
}

#[test]
fn absent_policy_is_deleted_once() -> Result<()> {
    let plane = converged_plane().with_policy("retired", "old rules", "");
    let policies = BTreeMap::from([(
        "retired".to_owned(),
        PolicySpec {
            ensure: Ensure::Absent,
            ..PolicySpec::default()
        },
    )]);

    let report = reconcile_declared(&plane, policies, BTreeMap::new())?;
    assert_eq!(plane.writes(), [Call::DeletePolicy("retired".to_owned())]);
    assert!(plane.policy("retired").is_none());
    assert!(plane.policy("test_policy_abc").is_some());
    assert!(matches!(
        report.outcomes().first().map(|outcome| &outcome.result),
        Some(Ok(Action::Deleted))
    ));
    Ok(())
}

#[test]
fn failure_on_one_entity_does_not_stop_the_rest() {
    let plane = FakeControlPlane::new()
        .fail_on(Call::CreatePolicy("a".to_owned()), FailureMode::Rejected(400));
    let policies = BTreeMap::from([
        ("a".to_owned(), PolicySpec::default()),
        ("b".to_owned(), PolicySpec::default()),
    ]);
    let tokens = BTreeMap::from([
        ("needs_a".to_owned(), token(ACCESSOR, &["a"], Ensure::Present)),
        ("needs_b".to_owned(), token(OTHER_ACCESSOR, &["b"], Ensure::Present)),
    ]);

    let err = reconcile_declared(&plane, policies, tokens).expect_err("policy a must fail");
    let ProvisionError::Aggregate(errors) = err else {
        panic!("expected aggregate error, got {err:?}");
    };
    let failed: Vec<String> = errors.iter().map(|f| f.entity.to_string()).collect();
    assert_eq!(
        failed,
        [
            "policy 'a'".to_owned(),
            format!("token 'needs_a' ({ACCESSOR})"),
        ]
    );
    assert!(matches!(
        errors.iter().nth(1).map(|f| &f.error),
        Some(ProvisionError::DependencyFailed { policy }) if policy == "a"
    ));
    assert_eq!(
        plane.writes(),
        [
            Call::CreatePolicy("a".to_owned()),
            Call::CreatePolicy("b".to_owned()),
            Call::CreateToken(OTHER_ACCESSOR.to_owned()),
        ]
    );
}

#[rstest]
fn failed_listing_marks_every_entity_of_that_kind(
    policies: BTreeMap<String, PolicySpec>,
    tokens: BTreeMap<String, TokenSpec>,
) {
    let plane = FakeControlPlane::new().fail_on(Call::ListTokens, FailureMode::Unavailable);
    let desired = DesiredState::from_specs(policies, tokens).expect("valid declarations");

    let report = reconcile(&plane, &desired);
    assert!(!report.is_converged());
    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert!(matches!(
        failures.first().map(|f| &f.result),
        Some(Err(ProvisionError::LiveStateUnavailable { kind: "token", .. }))
    ));
    assert_eq!(plane.writes(), [Call::CreatePolicy("test_policy_abc".to_owned())]);
}

#[test]
fn empty_declarations_make_no_calls() -> Result<()> {
    let plane = FakeControlPlane::new();
    let report = reconcile_declared(&plane, BTreeMap::new(), BTreeMap::new())?;
    assert!(report.outcomes().is_empty());
    assert!(plane.calls().is_empty());
    Ok(())
}
