//! Loading of the provisioning manifest and ACL connection settings.
//!
//! The manifest body (configuration layers and ACL declarations) is parsed
//! directly so mapping keys keep their written order. Connection settings are
//! layered with `figment`: built-in defaults, then the manifest's `acl_api_*`
//! keys, then `BOUNDARY_PROVISION_ACL_API_*` environment variables.

use std::collections::BTreeMap;

use boundary_provision::{
    AclApiSettings, Backoff, ConfigDocument, PolicySpec, Protocol, TokenSpec,
};
use camino::{Utf8Path, Utf8PathBuf};
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CliError;
use crate::platform::InitStyle;

/// Prefix for environment variables that override connection settings.
pub const ENV_PREFIX: &str = "BOUNDARY_PROVISION_";

/// Desired run state of the managed service.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceEnsure {
    /// The service should be running; changed artifacts trigger a reload.
    #[default]
    Running,
    /// The service should be stopped; it is never reloaded.
    Stopped,
}

/// Everything a run needs apart from connection settings.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Manifest {
    /// Base configuration layer.
    pub config_defaults: ConfigDocument,
    /// Overrides merged over `config_defaults`.
    pub config_hash: ConfigDocument,
    /// Render the configuration with indentation.
    pub pretty_config: bool,
    /// Directory receiving `config.json` and `boundary.env`.
    pub config_dir: Utf8PathBuf,
    /// Variables written to the service's environment file.
    pub env_vars: BTreeMap<String, String>,
    /// Whether the service is under this tool's management.
    pub manage_service: bool,
    /// Reload the service when an artifact changed.
    pub restart_on_change: bool,
    /// Desired run state of the service.
    pub service_ensure: ServiceEnsure,
    /// Service unit name.
    pub service_name: String,
    /// Service manager used for reloads.
    pub init_style: InitStyle,
    /// Binary probed for the installed version.
    pub binary_name: String,
    /// Declared ACL policies keyed by name.
    pub policies: BTreeMap<String, PolicySpec>,
    /// Declared ACL tokens keyed by logical name.
    pub tokens: BTreeMap<String, TokenSpec>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            config_defaults: Value::Object(Map::new()),
            config_hash: Value::Object(Map::new()),
            pretty_config: false,
            config_dir: Utf8PathBuf::from("/etc/boundary.d"),
            env_vars: BTreeMap::new(),
            manage_service: true,
            restart_on_change: true,
            service_ensure: ServiceEnsure::Running,
            service_name: String::from("boundary"),
            init_style: InitStyle::Systemd,
            binary_name: String::from("boundary"),
            policies: BTreeMap::new(),
            tokens: BTreeMap::new(),
        }
    }
}

impl Manifest {
    /// Returns `true` when the manifest declares any ACL entity.
    #[must_use]
    pub fn declares_acls(&self) -> bool {
        !self.policies.is_empty() || !self.tokens.is_empty()
    }
}

/// Manifest file syntax, chosen by extension.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Syntax {
    Json,
    Toml,
}

impl Syntax {
    fn of(path: &Utf8Path) -> Self {
        match path.extension() {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Toml,
        }
    }
}

/// Read and parse the manifest at `path`.
///
/// # Errors
///
/// Returns [`CliError::ManifestRead`] when the file cannot be read and
/// [`CliError::ManifestParse`] when it is malformed.
pub fn load_manifest(path: &Utf8Path) -> Result<Manifest, CliError> {
    let raw = std::fs::read_to_string(path).map_err(|source| CliError::ManifestRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_manifest(path, &raw)
}

fn parse_manifest(path: &Utf8Path, raw: &str) -> Result<Manifest, CliError> {
    let parsed = match Syntax::of(path) {
        Syntax::Json => serde_json::from_str(raw).map_err(|err| err.to_string()),
        Syntax::Toml => parse_toml(raw),
    };
    parsed.map_err(|message| CliError::ManifestParse {
        path: path.to_path_buf(),
        message,
    })
}

/// TOML admits `nan` and `inf`, which JSON cannot carry; they would otherwise
/// reach the document as `null` and read as "inherit".
fn parse_toml(raw: &str) -> Result<Manifest, String> {
    let table: toml::Table = toml::from_str(raw).map_err(|err| err.to_string())?;
    if let Some(at) = table
        .iter()
        .find_map(|(key, value)| non_finite_float(value, format!("$.{key}")))
    {
        return Err(format!("non-finite float at {at} cannot be rendered as JSON"));
    }
    toml::Value::Table(table)
        .try_into()
        .map_err(|err: toml::de::Error| err.to_string())
}

fn non_finite_float(value: &toml::Value, at: String) -> Option<String> {
    match value {
        toml::Value::Float(float) if !float.is_finite() => Some(at),
        toml::Value::Table(table) => table
            .iter()
            .find_map(|(key, nested)| non_finite_float(nested, format!("{at}.{key}"))),
        toml::Value::Array(items) => items
            .iter()
            .enumerate()
            .find_map(|(index, nested)| non_finite_float(nested, format!("{at}[{index}]"))),
        _ => None,
    }
}

/// `acl_api_*` keys as they appear in the manifest and environment.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
struct AclConnection {
    acl_api_token: String,
    acl_api_hostname: String,
    acl_api_port: u16,
    acl_api_protocol: Protocol,
    acl_api_tries: u32,
    acl_api_retry_delay_ms: u64,
    acl_api_backoff: Backoff,
    acl_api_timeout_ms: u64,
}

impl From<AclApiSettings> for AclConnection {
    fn from(settings: AclApiSettings) -> Self {
        Self {
            acl_api_token: settings.token,
            acl_api_hostname: settings.hostname,
            acl_api_port: settings.port,
            acl_api_protocol: settings.protocol,
            acl_api_tries: settings.tries,
            acl_api_retry_delay_ms: settings.retry_delay_ms,
            acl_api_backoff: settings.backoff,
            acl_api_timeout_ms: settings.timeout_ms,
        }
    }
}

impl From<AclConnection> for AclApiSettings {
    fn from(connection: AclConnection) -> Self {
        Self {
            token: connection.acl_api_token,
            hostname: connection.acl_api_hostname,
            port: connection.acl_api_port,
            protocol: connection.acl_api_protocol,
            tries: connection.acl_api_tries,
            retry_delay_ms: connection.acl_api_retry_delay_ms,
            backoff: connection.acl_api_backoff,
            timeout_ms: connection.acl_api_timeout_ms,
        }
    }
}

/// Assemble ACL connection settings for the manifest at `path`.
///
/// # Errors
///
/// Returns [`CliError::Settings`] when a layer holds a value of the wrong
/// type.
pub fn load_acl_settings(path: &Utf8Path) -> Result<AclApiSettings, CliError> {
    let defaults = Serialized::defaults(AclConnection::from(AclApiSettings::default()));
    let figment = match Syntax::of(path) {
        Syntax::Json => Figment::from(defaults).merge(Json::file(path.as_std_path())),
        Syntax::Toml => Figment::from(defaults).merge(Toml::file(path.as_std_path())),
    };
    let connection: AclConnection = figment.merge(Env::prefixed(ENV_PREFIX)).extract()?;
    Ok(connection.into())
}
