//! Ordered provisioning tasks.
//!
//! A run is an explicit list of [`Task`]s executed in sequence:
//! validate declarations, render the configuration and environment file,
//! write them, reload the service when something changed, then converge ACLs.
//! A failing task stops the run, so a rendering error never leaves a partial
//! artifact behind and ACLs are only touched once the artifacts are in place.

use boundary_provision::{
    AclApi, DesiredState, HostFacts, ReconcileReport, merge, reconcile, render_env_file, serialize,
};
use tracing::{debug, info};

use crate::error::CliError;
use crate::manifest::{Manifest, ServiceEnsure};
use crate::output::{WriteOutcome, write_artifact};
use crate::platform::PlatformAdapter;

/// File name of the rendered configuration inside the config directory.
pub const CONFIG_FILE: &str = "config.json";
/// File name of the environment file inside the config directory.
pub const ENV_FILE: &str = "boundary.env";

/// One step of a provisioning run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Task {
    /// Check the ACL declarations before anything is written.
    ValidateAcls,
    /// Merge and serialize the configuration document.
    RenderConfig,
    /// Render the environment file.
    RenderEnvFile,
    /// Write the configuration artifact.
    WriteConfig,
    /// Write the environment file.
    WriteEnvFile,
    /// Reload the service when an artifact changed.
    ReloadService,
    /// Converge ACLs on the control plane.
    ReconcileAcls,
}

/// A manifest plus the run-level switches taken from the command line.
#[derive(Clone, Debug)]
pub struct Plan {
    /// Loaded manifest.
    pub manifest: Manifest,
    /// Force indented output.
    pub force_pretty: bool,
    /// Allow service reloads.
    pub allow_reload: bool,
    /// Converge ACLs.
    pub reconcile_acls: bool,
}

impl Plan {
    /// Build a plan that performs every task the manifest asks for.
    #[must_use]
    pub const fn new(manifest: Manifest) -> Self {
        Self {
            manifest,
            force_pretty: false,
            allow_reload: true,
            reconcile_acls: true,
        }
    }

    /// Tasks this plan runs, in order.
    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        let mut tasks = Vec::with_capacity(7);
        if self.reconcile_acls {
            tasks.push(Task::ValidateAcls);
        }
        tasks.extend([
            Task::RenderConfig,
            Task::RenderEnvFile,
            Task::WriteConfig,
            Task::WriteEnvFile,
        ]);
        if self.allow_reload && self.manifest.manage_service && self.manifest.restart_on_change {
            tasks.push(Task::ReloadService);
        }
        if self.reconcile_acls {
            tasks.push(Task::ReconcileAcls);
        }
        tasks
    }

    const fn pretty(&self) -> bool {
        self.force_pretty || self.manifest.pretty_config
    }
}

/// What a run did.
#[derive(Debug)]
pub struct RunOutcome {
    /// Host facts the run was based on.
    pub facts: HostFacts,
    /// Effect of writing the configuration artifact.
    pub config: WriteOutcome,
    /// Effect of writing the environment file.
    pub env_file: WriteOutcome,
    /// Whether the service was reloaded.
    pub reloaded: bool,
    /// ACL outcomes, when ACLs were reconciled.
    pub acls: Option<ReconcileReport>,
}

#[derive(Default)]
struct RunState {
    desired: Option<DesiredState>,
    config: Option<String>,
    env_file: Option<String>,
    config_written: Option<WriteOutcome>,
    env_written: Option<WriteOutcome>,
    reloaded: bool,
    acls: Option<ReconcileReport>,
}

impl RunState {
    fn changed(&self) -> bool {
        [self.config_written, self.env_written]
            .into_iter()
            .flatten()
            .any(WriteOutcome::is_changed)
    }
}

/// Execute `plan` against the given collaborators.
///
/// `acl` may be `None` when no control plane is configured; the reconcile
/// task is then skipped.
///
/// # Errors
///
/// Returns the first failing task's error. ACL failures surface as
/// [`boundary_provision::ProvisionError::Aggregate`] after every entity has
/// been attempted.
pub fn execute(
    plan: &Plan,
    facts: HostFacts,
    platform: &dyn PlatformAdapter,
    acl: Option<&dyn AclApi>,
) -> Result<RunOutcome, CliError> {
    let manifest = &plan.manifest;
    let mut state = RunState::default();
    for task in plan.tasks() {
        debug!(?task, "running task");
        match task {
            Task::ValidateAcls => {
                state.desired = Some(DesiredState::from_specs(
                    manifest.policies.clone(),
                    manifest.tokens.clone(),
                )?);
            }
            Task::RenderConfig => {
                let document = merge(&manifest.config_defaults, &manifest.config_hash);
                state.config = Some(serialize(&document, plan.pretty())?);
            }
            Task::RenderEnvFile => {
                state.env_file = Some(render_env_file(&manifest.env_vars)?);
            }
            Task::WriteConfig => {
                let rendered = state.config.as_deref().unwrap_or_default();
                state.config_written =
                    Some(write_artifact(&manifest.config_dir, CONFIG_FILE, rendered)?);
            }
            Task::WriteEnvFile => {
                let rendered = state.env_file.as_deref().unwrap_or_default();
                state.env_written = Some(write_artifact(&manifest.config_dir, ENV_FILE, rendered)?);
            }
            Task::ReloadService => {
                state.reloaded = reload_if_needed(manifest, &state, platform)?;
            }
            Task::ReconcileAcls => {
                if let (Some(api), Some(desired)) = (acl, state.desired.as_ref())
                    && !desired.is_empty()
                {
                    state.acls = Some(reconcile(api, desired).into_result()?);
                }
            }
        }
    }

    Ok(RunOutcome {
        facts,
        config: state.config_written.unwrap_or(WriteOutcome::Unchanged),
        env_file: state.env_written.unwrap_or(WriteOutcome::Unchanged),
        reloaded: state.reloaded,
        acls: state.acls,
    })
}

fn reload_if_needed(
    manifest: &Manifest,
    state: &RunState,
    platform: &dyn PlatformAdapter,
) -> Result<bool, CliError> {
    if !state.changed() || manifest.service_ensure != ServiceEnsure::Running {
        return Ok(false);
    }
    if !platform.is_active(&manifest.service_name)? {
        debug!(
            adapter = platform.name(),
            service = %manifest.service_name,
            "service not running; reload skipped"
        );
        return Ok(false);
    }
    platform.reload(&manifest.service_name)?;
    info!(service = %manifest.service_name, "reloaded after configuration change");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::{Plan, Task};
    use crate::manifest::Manifest;

    #[test]
    fn full_plan_orders_tasks() {
        assert_eq!(
            Plan::new(Manifest::default()).tasks(),
            [
                Task::ValidateAcls,
                Task::RenderConfig,
                Task::RenderEnvFile,
                Task::WriteConfig,
                Task::WriteEnvFile,
                Task::ReloadService,
                Task::ReconcileAcls,
            ]
        );
    }

    #[rstest]
    #[case(false, true)]
    #[case(true, false)]
    fn reload_task_follows_switches(#[case] allow_reload: bool, #[case] manage_service: bool) {
        let plan = Plan {
            allow_reload,
            reconcile_acls: false,
            manifest: Manifest {
                manage_service,
                ..Manifest::default()
            },
            force_pretty: false,
        };
        assert!(!plan.tasks().contains(&Task::ReloadService));
        assert!(!plan.tasks().contains(&Task::ReconcileAcls));
    }
}
