//! Host facts gathered once at the start of a run.

use std::process::Command;

use serde::Deserialize;
use tracing::debug;

/// Runs external programs and captures their standard output.
pub trait CommandRunner {
    /// Run `program` with `args`, returning stdout when it exits successfully.
    fn run(&self, program: &str, args: &[&str]) -> Option<String>;
}

/// [`CommandRunner`] backed by [`std::process::Command`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &str, args: &[&str]) -> Option<String> {
        let output = match Command::new(program).args(args).output() {
            Ok(output) => output,
            Err(err) => {
                debug!(program, error = %err, "command could not be started");
                return None;
            }
        };
        if !output.status.success() {
            debug!(program, status = %output.status, "command exited unsuccessfully");
            return None;
        }
        String::from_utf8(output.stdout).ok()
    }
}

#[derive(Deserialize)]
struct VersionOutput {
    version: Option<String>,
}

/// Extract the `version` field from `<binary> version -format=json` output.
///
/// ```rust
/// use boundary_provision::facts::parse_version_output;
///
/// let raw = r#"{"revision":"a86ee","version":"0.14.2","build_date":"2023-10-31T11:02:50Z"}"#;
/// assert_eq!(parse_version_output(raw).as_deref(), Some("0.14.2"));
/// assert_eq!(parse_version_output("not json"), None);
/// ```
#[must_use]
pub fn parse_version_output(raw: &str) -> Option<String> {
    serde_json::from_str::<VersionOutput>(raw.trim())
        .ok()
        .and_then(|parsed| parsed.version)
        .filter(|version| !version.is_empty())
}

/// Discover the installed version of `binary`, or `None` when it cannot be
/// run or its output is not understood.
#[must_use]
pub fn discover_version<R>(runner: &R, binary: &str) -> Option<String>
where
    R: CommandRunner + ?Sized,
{
    let raw = runner.run(binary, &["version", "-format=json"])?;
    parse_version_output(&raw)
}

/// Immutable snapshot of the host, taken before any task runs.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct HostFacts {
    kernel: String,
    binary_version: Option<String>,
}

impl HostFacts {
    /// Build a snapshot from known values.
    #[must_use]
    pub fn new(kernel: impl Into<String>, binary_version: Option<String>) -> Self {
        Self {
            kernel: kernel.into(),
            binary_version,
        }
    }

    /// Detect facts for the running host. The binary version is only probed
    /// on Linux.
    #[must_use]
    pub fn detect<R>(runner: &R, binary: &str) -> Self
    where
        R: CommandRunner + ?Sized,
    {
        let kernel = std::env::consts::OS;
        let binary_version = if kernel == "linux" {
            discover_version(runner, binary)
        } else {
            None
        };
        debug!(kernel, version = ?binary_version, "host facts collected");
        Self::new(kernel, binary_version)
    }

    /// Operating-system kernel, for example `linux`.
    #[must_use]
    pub fn kernel(&self) -> &str {
        &self.kernel
    }

    /// Installed version of the managed binary, when discoverable.
    #[must_use]
    pub fn binary_version(&self) -> Option<&str> {
        self.binary_version.as_deref()
    }
}
