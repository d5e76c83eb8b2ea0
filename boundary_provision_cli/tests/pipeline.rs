//! End-to-end pipeline runs against a scratch directory, a recording service
//! manager and an in-memory control plane.

use std::cell::RefCell;
use std::collections::BTreeMap;

use anyhow::{Context, Result};
use boundary_provision::{
    AclApi, Disposition, Ensure, HostFacts, PolicySpec, ProvisionError, Resource, Rule, TokenSpec,
};
use boundary_provision_cli::error::CliError;
use boundary_provision_cli::manifest::{Manifest, ServiceEnsure};
use boundary_provision_cli::output::WriteOutcome;
use boundary_provision_cli::pipeline::{CONFIG_FILE, ENV_FILE, Plan, execute};
use boundary_provision_cli::platform::PlatformAdapter;
use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use serde_json::json;
use test_helpers::control_plane::{Call, FakeControlPlane};

const ACCESSOR: &str = "7c4e3f11-786d-44e6-ac1d-b99546a1ccbd";

/// Service manager double that records reload requests.
#[derive(Default)]
struct RecordingPlatform {
    active: bool,
    reloads: RefCell<Vec<String>>,
}

impl RecordingPlatform {
    fn running() -> Self {
        Self {
            active: true,
            ..Self::default()
        }
    }

    fn reload_count(&self) -> usize {
        self.reloads.borrow().len()
    }
}

impl PlatformAdapter for RecordingPlatform {
    fn name(&self) -> &'static str {
        "recording"
    }

    fn is_active(&self, _service: &str) -> Result<bool, CliError> {
        Ok(self.active)
    }

    fn reload(&self, service: &str) -> Result<(), CliError> {
        self.reloads.borrow_mut().push(service.to_owned());
        Ok(())
    }
}

struct Scratch {
    _temp: tempfile::TempDir,
    dir: Utf8PathBuf,
}

#[fixture]
fn scratch() -> Scratch {
    let temp = tempfile::tempdir().expect("create tempdir");
    let dir = Utf8PathBuf::from_path_buf(temp.path().join("boundary.d")).expect("utf-8 path");
    Scratch { _temp: temp, dir }
}

fn manifest(dir: &Utf8PathBuf) -> Manifest {
    let policies = BTreeMap::from([(
        "test_policy_abc".to_owned(),
        PolicySpec {
            description: "This is a test policy".to_owned(),
            rules: vec![Rule::new(Resource::Key, "test_key", Disposition::Write)],
            ensure: Ensure::Present,
        },
    )]);
    let tokens = BTreeMap::from([(
        "test_token_xyz".to_owned(),
        TokenSpec {
            accessor_id: ACCESSOR.to_owned(),
            policies_by_name: ["test_policy_abc".to_owned()].into_iter().collect(),
            ..TokenSpec::default()
        },
    )]);
    Manifest {
        config_defaults: json!({
            "data_dir": "/dir1",
            "server": false,
            "ports": {"http": 1, "rpc": 8300}
        }),
        config_hash: json!({
            "bootstrap_expect": 5,
            "server": true,
            "ports": {"http": -1, "https": 8500}
        }),
        config_dir: dir.clone(),
        env_vars: BTreeMap::from([
            ("TEST".to_owned(), "foobar".to_owned()),
            ("BLA".to_owned(), "blub".to_owned()),
        ]),
        policies,
        tokens,
        ..Manifest::default()
    }
}

fn facts() -> HostFacts {
    HostFacts::new("linux", Some("0.14.2".to_owned()))
}

#[rstest]
fn first_run_writes_reloads_and_converges(scratch: Scratch) -> Result<()> {
    let plan = Plan::new(manifest(&scratch.dir));
    let platform = RecordingPlatform::running();
    let plane = FakeControlPlane::new();

    let outcome = execute(&plan, facts(), &platform, Some(&plane as &dyn AclApi))?;

    assert_eq!(outcome.config, WriteOutcome::Changed);
    assert_eq!(outcome.env_file, WriteOutcome::Changed);
    assert!(outcome.reloaded);
    assert_eq!(platform.reload_count(), 1);
    assert_eq!(outcome.acls.map(|report| report.changed()), Some(2));
    assert_eq!(outcome.facts.binary_version(), Some("0.14.2"));

    let config = std::fs::read_to_string(scratch.dir.join(CONFIG_FILE))?;
    assert_eq!(
        config,
        r#"{"data_dir":"/dir1","server":true,"ports":{"http":-1,"rpc":8300,"https":8500},"bootstrap_expect":5}"#
    );
    let env_file = std::fs::read_to_string(scratch.dir.join(ENV_FILE))?;
    assert_eq!(env_file, "BLA=blub\nTEST=foobar\n");
    Ok(())
}

#[rstest]
fn second_run_changes_nothing(scratch: Scratch) -> Result<()> {
    let plan = Plan::new(manifest(&scratch.dir));
    let platform = RecordingPlatform::running();
    let plane = FakeControlPlane::new();
    execute(&plan, facts(), &platform, Some(&plane as &dyn AclApi))?;
    let writes = plane.writes().len();

    let outcome = execute(&plan, facts(), &platform, Some(&plane as &dyn AclApi))?;
    assert_eq!(outcome.config, WriteOutcome::Unchanged);
    assert_eq!(outcome.env_file, WriteOutcome::Unchanged);
    assert!(!outcome.reloaded);
    assert_eq!(platform.reload_count(), 1);
    assert_eq!(plane.writes().len(), writes);
    Ok(())
}

#[rstest]
fn pretty_flag_indents_output(scratch: Scratch) -> Result<()> {
    let mut plan = Plan::new(manifest(&scratch.dir));
    plan.force_pretty = true;
    plan.reconcile_acls = false;
    execute(&plan, facts(), &RecordingPlatform::default(), None)?;

    let config = std::fs::read_to_string(scratch.dir.join(CONFIG_FILE))?;
    assert!(config.contains("\"bootstrap_expect\": 5"));
    assert!(config.contains("  \"ports\": {\n    \"http\": -1,"));
    Ok(())
}

#[rstest]
#[case(ServiceEnsure::Stopped, true, true)]
#[case(ServiceEnsure::Running, false, true)]
#[case(ServiceEnsure::Running, true, false)]
fn reload_is_skipped_unless_wanted(
    scratch: Scratch,
    #[case] service_ensure: ServiceEnsure,
    #[case] restart_on_change: bool,
    #[case] active: bool,
) -> Result<()> {
    let mut manifest = manifest(&scratch.dir);
    manifest.service_ensure = service_ensure;
    manifest.restart_on_change = restart_on_change;
    let mut plan = Plan::new(manifest);
    plan.reconcile_acls = false;
    let platform = RecordingPlatform {
        active,
        ..RecordingPlatform::default()
    };

    let outcome = execute(&plan, facts(), &platform, None)?;
    assert!(!outcome.reloaded);
    assert_eq!(platform.reload_count(), 0);
    Ok(())
}

#[rstest]
fn invalid_declarations_stop_before_writing(scratch: Scratch) {
    let mut manifest = manifest(&scratch.dir);
    if let Some(token) = manifest.tokens.get_mut("test_token_xyz") {
        token.policies_by_name.insert("ghost".to_owned());
    }
    let plan = Plan::new(manifest);
    let plane = FakeControlPlane::new();

    let err = execute(&plan, facts(), &RecordingPlatform::running(), Some(&plane as &dyn AclApi))
        .expect_err("ghost policy must be rejected");
    assert!(matches!(err, CliError::Provision(ProvisionError::Declaration(_))));
    assert!(plane.calls().is_empty());
    assert!(!scratch.dir.join(CONFIG_FILE).exists());
}

#[rstest]
fn null_override_does_not_clear_defaults(scratch: Scratch) -> Result<()> {
    let mut manifest = manifest(&scratch.dir);
    manifest.config_hash = json!({"data_dir": null});
    let mut plan = Plan::new(manifest);
    plan.reconcile_acls = false;
    execute(&plan, facts(), &RecordingPlatform::default(), None)?;

    let config = std::fs::read_to_string(scratch.dir.join(CONFIG_FILE))
        .context("config artifact should exist")?;
    assert!(config.starts_with(r#"{"data_dir":"/dir1","#));
    Ok(())
}

#[rstest]
fn null_default_aborts_without_artifact(scratch: Scratch) {
    let mut manifest = manifest(&scratch.dir);
    manifest.config_defaults = json!({"retry_join": [null]});
    let mut plan = Plan::new(manifest);
    plan.reconcile_acls = false;

    let err = execute(&plan, facts(), &RecordingPlatform::default(), None)
        .expect_err("null cannot be serialized");
    assert!(err.to_string().contains("$.retry_join[0]"), "unexpected error: {err}");
    assert!(!scratch.dir.join(CONFIG_FILE).exists());
}

#[rstest]
fn acl_failures_surface_after_artifacts_are_written(scratch: Scratch) {
    let plan = Plan::new(manifest(&scratch.dir));
    let plane = FakeControlPlane::new().fail_on(
        Call::CreatePolicy("test_policy_abc".to_owned()),
        test_helpers::control_plane::FailureMode::Unavailable,
    );

    let err = execute(&plan, facts(), &RecordingPlatform::running(), Some(&plane as &dyn AclApi))
        .expect_err("policy creation fails");
    assert!(matches!(err, CliError::Provision(ProvisionError::Aggregate(ref errors)) if errors.len() == 2));
    assert!(scratch.dir.join(CONFIG_FILE).exists());
}
