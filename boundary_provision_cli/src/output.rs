//! Artifact writers for `boundary-provision`.

use std::io::{self, ErrorKind, Write};

use camino::Utf8Path;
use cap_std::ambient_authority;
use cap_std::fs_utf8::{Dir, OpenOptions};
use tracing::{debug, info};

use crate::error::CliError;

/// Whether a write changed the file on disk.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriteOutcome {
    /// The file was created or its content replaced.
    Changed,
    /// The file already held the rendered content.
    Unchanged,
}

impl WriteOutcome {
    /// Returns `true` for [`WriteOutcome::Changed`].
    #[must_use]
    pub const fn is_changed(self) -> bool {
        matches!(self, Self::Changed)
    }
}

/// Write `contents` to `file_name` inside `dir`, creating the directory when
/// needed. The file is left untouched when it already holds `contents`;
/// otherwise it is replaced through a sibling temporary file so readers see
/// either the old or the new artifact, never a partial one.
///
/// # Errors
///
/// Returns [`CliError::Io`] when the directory or file cannot be accessed.
pub fn write_artifact(
    dir: &Utf8Path,
    file_name: &str,
    contents: &str,
) -> Result<WriteOutcome, CliError> {
    let handle = open_config_dir(dir)?;
    let path = dir.join(file_name);
    match handle.read_to_string(file_name) {
        Ok(existing) if existing == contents => {
            debug!(%path, "artifact already up to date");
            return Ok(WriteOutcome::Unchanged);
        }
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => return Err(CliError::Io { path, source: err }),
    }

    replace_file(&handle, file_name, contents.as_bytes()).map_err(|source| CliError::Io {
        path: path.clone(),
        source,
    })?;
    info!(%path, "artifact written");
    Ok(WriteOutcome::Changed)
}

/// Create the configuration directory if it is missing and open a handle
/// scoped to it.
fn open_config_dir(path: &Utf8Path) -> Result<Dir, CliError> {
    let io_error = |source: io::Error| CliError::Io {
        path: path.to_path_buf(),
        source,
    };
    Dir::create_ambient_dir_all(path, ambient_authority()).map_err(io_error)?;
    Dir::open_ambient_dir(path, ambient_authority()).map_err(io_error)
}

fn replace_file(dir: &Dir, file_name: &str, bytes: &[u8]) -> io::Result<()> {
    let temp_name = format!(".{file_name}.{}.tmp", std::process::id());
    let written = dir
        .open_with(
            &temp_name,
            OpenOptions::new().write(true).create(true).truncate(true),
        )
        .and_then(|mut file| {
            file.write_all(bytes)?;
            file.sync_all()
        })
        .and_then(|()| dir.rename(&temp_name, dir, file_name));
    if written.is_err() {
        let _ = dir.remove_file(&temp_name);
    }
    written
}
