//! Error types for the `boundary-provision` binary.

use boundary_provision::ProvisionError;
use camino::Utf8PathBuf;
use thiserror::Error;

/// Errors surfaced by the provisioning pipeline.
#[derive(Debug, Error)]
pub enum CliError {
    /// The manifest could not be read.
    #[error("failed to read manifest {path}: {source}")]
    ManifestRead {
        /// Manifest location.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The manifest is not valid TOML or JSON, or has the wrong shape.
    #[error("failed to parse manifest {path}: {message}")]
    ManifestParse {
        /// Manifest location.
        path: Utf8PathBuf,
        /// Parser diagnostic.
        message: String,
    },

    /// The ACL connection settings could not be assembled.
    #[error("invalid ACL connection settings: {0}")]
    Settings(#[from] Box<figment::Error>),

    /// Rendering or reconciliation failed.
    #[error(transparent)]
    Provision(#[from] ProvisionError),

    /// An artifact could not be written.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path being read or written.
        path: Utf8PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A service-manager command failed.
    #[error("service manager command '{command}' failed: {message}")]
    Platform {
        /// Command line that was run.
        command: String,
        /// Exit status or spawn failure.
        message: String,
    },
}

impl From<figment::Error> for CliError {
    fn from(err: figment::Error) -> Self {
        Self::Settings(Box::new(err))
    }
}
