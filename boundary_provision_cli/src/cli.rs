//! Command-line interface definitions for `boundary-provision`.

use camino::Utf8PathBuf;
use clap::Parser;

/// Parsed CLI arguments for `boundary-provision`.
#[derive(Debug, Parser)]
#[command(name = "boundary-provision")]
#[command(about = "Render Boundary configuration and converge its ACLs")]
#[command(version)]
pub struct Args {
    /// Manifest describing the configuration layers and ACL declarations
    /// (`.toml` or `.json`).
    #[arg(short, long, value_name = "path")]
    pub manifest: Utf8PathBuf,
    /// Write artifacts but leave ACLs untouched.
    #[arg(long = "skip-acls")]
    pub should_skip_acls: bool,
    /// Never reload the service, even when artifacts changed.
    #[arg(long = "no-reload")]
    pub should_skip_reload: bool,
    /// Render the configuration with indentation regardless of the manifest.
    #[arg(long)]
    pub pretty: bool,
}
