//! Sandboxed manifest loading for settings tests.
//!
//! Each run gets a scratch working directory holding a single manifest, plus
//! the given environment variables. `figment::Jail` restores the process
//! environment afterwards and serialises runs that touch it.

use std::fmt::Display;

use anyhow::{Result, anyhow};
use camino::Utf8Path;

/// A manifest file together with the environment it is loaded under.
#[derive(Clone, Copy, Debug)]
pub struct ManifestJail<'a> {
    file_name: &'a str,
    contents: &'a str,
    env: &'a [(&'a str, &'a str)],
}

impl<'a> ManifestJail<'a> {
    /// Manifest named `file_name` holding `contents`, with no extra variables.
    #[must_use]
    pub const fn new(file_name: &'a str, contents: &'a str) -> Self {
        Self {
            file_name,
            contents,
            env: &[],
        }
    }

    /// Variables to set, for example `BOUNDARY_PROVISION_ACL_API_PORT`.
    #[must_use]
    pub const fn with_env(mut self, env: &'a [(&'a str, &'a str)]) -> Self {
        self.env = env;
        self
    }

    /// Write the manifest, set the variables, and call `load` with the
    /// manifest's relative path.
    ///
    /// # Errors
    ///
    /// Returns an error when the jail cannot be prepared or `load` fails; the
    /// loader's message is kept.
    pub fn load<F, T, E>(self, load: F) -> Result<T>
    where
        F: FnOnce(&Utf8Path) -> Result<T, E>,
        E: Display,
    {
        let mut output = None;
        figment::Jail::try_with(|jail| {
            jail.create_file(self.file_name, self.contents)?;
            for &(key, value) in self.env {
                jail.set_env(key, value);
            }
            let loaded = load(Utf8Path::new(self.file_name))
                .map_err(|err| figment::Error::from(err.to_string()))?;
            output = Some(loaded);
            Ok(())
        })
        .map_err(|err| anyhow!(err.to_string()))?;
        output.ok_or_else(|| anyhow!("manifest {} was not loaded", self.file_name))
    }
}
