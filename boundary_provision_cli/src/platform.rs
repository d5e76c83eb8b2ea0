//! Service-manager adapters used to reload the managed service.

use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::CliError;

/// Service manager in charge of the managed service.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InitStyle {
    /// `systemctl`.
    #[default]
    Systemd,
    /// SysV `service` scripts.
    Sysv,
    /// `rc-service`.
    Openrc,
    /// No service manager; reloads are skipped.
    #[serde(rename = "none", alias = "unmanaged")]
    Unmanaged,
}

/// Primitive service-manager operations needed after writing artifacts.
pub trait PlatformAdapter {
    /// Adapter name used in logs.
    fn name(&self) -> &'static str;

    /// Returns `true` when `service` is currently running.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::Platform`] when the service manager cannot be run.
    fn is_active(&self, service: &str) -> Result<bool, CliError>;

    /// Ask `service` to reload its configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::Platform`] when the reload command fails.
    fn reload(&self, service: &str) -> Result<(), CliError>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Manager {
    Systemd,
    Sysv,
    Openrc,
}

/// Adapter that shells out to a service-manager program.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CommandAdapter {
    manager: Manager,
}

impl CommandAdapter {
    fn status_command(self, service: &str) -> (&'static str, Vec<&str>) {
        match self.manager {
            Manager::Systemd => ("systemctl", vec!["is-active", "--quiet", service]),
            Manager::Sysv => ("service", vec![service, "status"]),
            Manager::Openrc => ("rc-service", vec![service, "status"]),
        }
    }

    fn reload_command(self, service: &str) -> (&'static str, Vec<&str>) {
        match self.manager {
            Manager::Systemd => ("systemctl", vec!["reload", service]),
            Manager::Sysv => ("service", vec![service, "reload"]),
            Manager::Openrc => ("rc-service", vec![service, "reload"]),
        }
    }
}

impl PlatformAdapter for CommandAdapter {
    fn name(&self) -> &'static str {
        match self.manager {
            Manager::Systemd => "systemd",
            Manager::Sysv => "sysv",
            Manager::Openrc => "openrc",
        }
    }

    fn is_active(&self, service: &str) -> Result<bool, CliError> {
        let (program, args) = self.status_command(service);
        let status = Command::new(program)
            .args(&args)
            .status()
            .map_err(|err| platform_error(program, &args, &err.to_string()))?;
        Ok(status.success())
    }

    fn reload(&self, service: &str) -> Result<(), CliError> {
        let (program, args) = self.reload_command(service);
        let output = Command::new(program)
            .args(&args)
            .output()
            .map_err(|err| platform_error(program, &args, &err.to_string()))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(platform_error(
                program,
                &args,
                &format!("{}: {}", output.status, stderr.trim()),
            ));
        }
        info!(adapter = self.name(), service, "service reloaded");
        Ok(())
    }
}

/// Adapter for hosts where the service is not under a service manager.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct NoopAdapter;

impl PlatformAdapter for NoopAdapter {
    fn name(&self) -> &'static str {
        "none"
    }

    fn is_active(&self, _service: &str) -> Result<bool, CliError> {
        Ok(false)
    }

    fn reload(&self, _service: &str) -> Result<(), CliError> {
        Ok(())
    }
}

/// Select the adapter for `style`.
#[must_use]
pub fn adapter_for(style: InitStyle) -> Box<dyn PlatformAdapter> {
    let manager = match style {
        InitStyle::Systemd => Manager::Systemd,
        InitStyle::Sysv => Manager::Sysv,
        InitStyle::Openrc => Manager::Openrc,
        InitStyle::Unmanaged => return Box::new(NoopAdapter),
    };
    Box::new(CommandAdapter { manager })
}

fn platform_error(program: &str, args: &[&str], message: &str) -> CliError {
    CliError::Platform {
        command: format!("{program} {}", args.join(" ")),
        message: message.to_owned(),
    }
}
