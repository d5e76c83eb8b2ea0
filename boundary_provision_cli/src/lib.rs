//! Library half of the `boundary-provision` binary.
//!
//! Loads a manifest, renders the service's configuration artifacts, reloads
//! the service when they change and converges ACLs through
//! [`boundary_provision`].

pub mod cli;
pub mod error;
pub mod manifest;
pub mod output;
pub mod pipeline;
pub mod platform;

use boundary_provision::facts::SystemCommandRunner;
use boundary_provision::{AclApi, HostFacts, HttpAclClient};
use tracing::info;

use crate::cli::Args;
use crate::error::CliError;
use crate::pipeline::{Plan, RunOutcome};

/// Run the full pipeline for parsed command-line arguments.
///
/// # Errors
///
/// Returns [`CliError`] when loading, rendering, writing, reloading or
/// reconciling fails.
pub fn run(args: &Args) -> Result<RunOutcome, CliError> {
    let manifest = manifest::load_manifest(&args.manifest)?;
    let facts = HostFacts::detect(&SystemCommandRunner, &manifest.binary_name);
    info!(
        kernel = facts.kernel(),
        version = facts.binary_version().unwrap_or("unknown"),
        "starting provisioning run"
    );

    let client = if args.should_skip_acls || !manifest.declares_acls() {
        None
    } else {
        let settings = manifest::load_acl_settings(&args.manifest)?;
        Some(HttpAclClient::new(&settings)?)
    };
    let platform = platform::adapter_for(manifest.init_style);

    let plan = Plan {
        force_pretty: args.pretty,
        allow_reload: !args.should_skip_reload,
        reconcile_acls: !args.should_skip_acls,
        manifest,
    };
    let acl = client.as_ref().map(|c| c as &dyn AclApi);
    let outcome = pipeline::execute(&plan, facts, platform.as_ref(), acl)?;
    info!(
        config = ?outcome.config,
        env_file = ?outcome.env_file,
        reloaded = outcome.reloaded,
        acl_changes = outcome.acls.as_ref().map_or(0, |report| report.changed()),
        "provisioning run complete"
    );
    Ok(outcome)
}
