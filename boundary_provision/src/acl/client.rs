//! Blocking HTTP client for the control plane's ACL administration API.
//!
//! Every call is authenticated with a bearer token and retried on transient
//! failures (connection errors, timeouts, HTTP 5xx and 429). Any other
//! non-success status is a rejection and is returned after a single attempt.

use std::collections::BTreeSet;
use std::error::Error as StdError;
use std::fmt;
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::model::{Policy, Token};
use crate::ProvisionError;

/// Administrative operations the reconciler needs from the control plane.
///
/// [`HttpAclClient`] is the production implementation; tests substitute an
/// in-memory control plane.
pub trait AclApi {
    /// Lists live tokens.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when the control plane cannot be reached or
    /// rejects the request.
    fn list_tokens(&self) -> Result<Vec<LiveToken>, ProvisionError>;

    /// Creates a token.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when the call fails.
    fn create_token(&self, token: &TokenRequest) -> Result<(), ProvisionError>;

    /// Updates the token identified by `accessor_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when the call fails.
    fn update_token(&self, accessor_id: &str, token: &TokenRequest) -> Result<(), ProvisionError>;

    /// Deletes the token identified by `accessor_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when the call fails.
    fn delete_token(&self, accessor_id: &str) -> Result<(), ProvisionError>;

    /// Lists live policies including their rules.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when the control plane cannot be reached or
    /// rejects the request.
    fn list_policies(&self) -> Result<Vec<LivePolicy>, ProvisionError>;

    /// Creates a policy.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when the call fails.
    fn create_policy(&self, policy: &PolicyRequest) -> Result<(), ProvisionError>;

    /// Updates the policy called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when the call fails.
    fn update_policy(&self, name: &str, policy: &PolicyRequest) -> Result<(), ProvisionError>;

    /// Deletes the policy called `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError`] when the call fails.
    fn delete_policy(&self, name: &str) -> Result<(), ProvisionError>;
}

/// URL scheme used to reach the control plane.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Cleartext HTTP.
    #[default]
    Http,
    /// HTTP over TLS.
    Https,
}

impl Protocol {
    /// Returns the URL scheme.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

/// Delay growth between retries.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// Wait the configured delay before every retry.
    #[default]
    Fixed,
    /// Double the delay after every retry, up to [`RetryPolicy::max_delay`].
    Exponential,
}

/// Connection settings for the ACL API.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct AclApiSettings {
    /// Bearer token; no `Authorization` header is sent when empty.
    pub token: String,
    /// Control-plane host name or address.
    pub hostname: String,
    /// Control-plane HTTP port.
    pub port: u16,
    /// URL scheme.
    pub protocol: Protocol,
    /// Maximum attempts per call, including the first.
    pub tries: u32,
    /// Delay before the first retry, in milliseconds.
    pub retry_delay_ms: u64,
    /// Delay growth between retries.
    pub backoff: Backoff,
    /// Connect and request timeout, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for AclApiSettings {
    fn default() -> Self {
        Self {
            token: String::new(),
            hostname: String::from("localhost"),
            port: 8500,
            protocol: Protocol::Http,
            tries: 3,
            retry_delay_ms: 1_000,
            backoff: Backoff::Fixed,
            timeout_ms: 10_000,
        }
    }
}

impl AclApiSettings {
    /// Base URL of the control plane.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!(
            "{}://{}:{}/",
            self.protocol.as_str(),
            self.hostname,
            self.port
        )
    }

    /// Retry behaviour derived from these settings.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            tries: self.tries,
            delay: Duration::from_millis(self.retry_delay_ms),
            backoff: self.backoff,
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Bounded retry behaviour for a single call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first. Zero is treated as one.
    pub tries: u32,
    /// Delay before the first retry.
    pub delay: Duration,
    /// Delay growth between retries.
    pub backoff: Backoff,
    /// Upper bound for exponential delays.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Number of attempts a call may make.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        if self.tries == 0 { 1 } else { self.tries }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use boundary_provision::{Backoff, RetryPolicy};
    ///
    /// let policy = RetryPolicy {
    ///     tries: 5,
    ///     delay: Duration::from_millis(100),
    ///     backoff: Backoff::Exponential,
    ///     max_delay: Duration::from_millis(350),
    /// };
    /// assert_eq!(policy.delay_after(1), Duration::from_millis(100));
    /// assert_eq!(policy.delay_after(2), Duration::from_millis(200));
    /// assert_eq!(policy.delay_after(3), Duration::from_millis(350));
    /// ```
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential => {
                let factor = 1_u32
                    .checked_shl(attempt.saturating_sub(1))
                    .unwrap_or(u32::MAX);
                self.delay.saturating_mul(factor).min(self.max_delay)
            }
        }
    }
}

/// Reference from a token to a policy.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct PolicyLink {
    /// Policy ID, when known.
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Policy name.
    #[serde(rename = "Name", default)]
    pub name: String,
}

/// Body of a policy create or update call.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyRequest {
    /// Policy name.
    pub name: String,
    /// Policy description.
    pub description: String,
    /// Rendered rule text.
    pub rules: String,
}

impl From<&Policy> for PolicyRequest {
    fn from(policy: &Policy) -> Self {
        Self {
            name: policy.name.clone(),
            description: policy.description.clone(),
            rules: policy.rendered_rules(),
        }
    }
}

/// Body of a token create or update call.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TokenRequest {
    /// Accessor UUID.
    #[serde(rename = "AccessorID")]
    pub accessor_id: String,
    /// Secret to assign; only sent at creation.
    #[serde(rename = "SecretID", default, skip_serializing_if = "Option::is_none")]
    pub secret_id: Option<String>,
    /// Token description.
    #[serde(rename = "Description")]
    pub description: String,
    /// Linked policies, by name.
    #[serde(rename = "Policies")]
    pub policies: Vec<PolicyLink>,
    /// Datacenter-local flag.
    #[serde(rename = "Local")]
    pub local: bool,
}

impl TokenRequest {
    /// Names of the linked policies.
    #[must_use]
    pub fn policy_names(&self) -> BTreeSet<String> {
        self.policies.iter().map(|link| link.name.clone()).collect()
    }
}

impl From<&Token> for TokenRequest {
    fn from(token: &Token) -> Self {
        Self {
            accessor_id: token.accessor_id.clone(),
            secret_id: token.secret_id.clone(),
            description: token.description.clone(),
            policies: token
                .policies_by_name
                .iter()
                .map(|name| PolicyLink {
                    id: None,
                    name: name.clone(),
                })
                .collect(),
            local: token.local,
        }
    }
}

/// Policy as reported by the control plane.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct LivePolicy {
    /// Control-plane identifier.
    #[serde(rename = "ID")]
    pub id: String,
    /// Policy name.
    #[serde(rename = "Name")]
    pub name: String,
    /// Policy description.
    #[serde(rename = "Description", default)]
    pub description: String,
    /// Rule text; empty in list responses.
    #[serde(rename = "Rules", default)]
    pub rules: String,
}

impl LivePolicy {
    /// Returns `true` when the live content equals `request`.
    #[must_use]
    pub fn matches(&self, request: &PolicyRequest) -> bool {
        self.description == request.description && self.rules.trim_end() == request.rules.trim_end()
    }
}

/// Token as reported by the control plane.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct LiveToken {
    /// Accessor UUID.
    #[serde(rename = "AccessorID")]
    pub accessor_id: String,
    /// Token description.
    #[serde(rename = "Description", default)]
    pub description: String,
    /// Linked policies.
    #[serde(rename = "Policies", default, deserialize_with = "null_as_empty")]
    pub policies: Vec<PolicyLink>,
    /// Datacenter-local flag.
    #[serde(rename = "Local", default)]
    pub local: bool,
}

impl LiveToken {
    /// Names of the linked policies.
    #[must_use]
    pub fn policy_names(&self) -> BTreeSet<String> {
        self.policies.iter().map(|link| link.name.clone()).collect()
    }

    /// Returns `true` when the live content equals `request`.
    #[must_use]
    pub fn matches(&self, request: &TokenRequest) -> bool {
        self.description == request.description && self.policy_names() == request.policy_names()
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// [`AclApi`] implementation backed by `reqwest`'s blocking client.
pub struct HttpAclClient {
    base_url: Url,
    token: String,
    retry: RetryPolicy,
    client: Client,
}

impl fmt::Debug for HttpAclClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpAclClient")
            .field("base_url", &self.base_url.as_str())
            .field("token", &"<redacted>")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Outcome of one failed attempt.
enum AttemptError {
    Transient(String),
    Rejected { status: u16, message: String },
    Fatal(reqwest::Error),
}

impl HttpAclClient {
    /// Builds a client for the control plane described by `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::InvalidEndpoint`] when the settings do not
    /// form a URL, or [`ProvisionError::Client`] when the HTTP client cannot
    /// be created.
    pub fn new(settings: &AclApiSettings) -> Result<Self, ProvisionError> {
        let endpoint = settings.endpoint();
        let base_url = Url::parse(&endpoint).map_err(|err| ProvisionError::InvalidEndpoint {
            endpoint: endpoint.clone(),
            message: err.to_string(),
        })?;
        let timeout = Duration::from_millis(settings.timeout_ms);
        let client = Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()
            .map_err(ProvisionError::Client)?;
        Ok(Self {
            base_url,
            token: settings.token.clone(),
            retry: settings.retry_policy(),
            client,
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn send(
        &self,
        operation: &'static str,
        method: &Method,
        url: &Url,
        body: Option<&Value>,
    ) -> Result<String, ProvisionError> {
        let attempts = self.retry.attempts();
        let mut attempt = 1;
        loop {
            debug!(operation, attempt, %url, "calling control plane");
            match self.attempt_once(method, url, body) {
                Ok(text) => return Ok(text),
                Err(AttemptError::Rejected { status, message }) => {
                    return Err(ProvisionError::rejected(operation, status, message));
                }
                Err(AttemptError::Fatal(err)) => return Err(ProvisionError::Client(err)),
                Err(AttemptError::Transient(message)) => {
                    if attempt >= attempts {
                        return Err(ProvisionError::unavailable(operation, attempt, message));
                    }
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        operation,
                        attempt,
                        attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %message,
                        "control plane call failed; retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }

    fn attempt_once(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&Value>,
    ) -> Result<String, AttemptError> {
        let mut request = self.client.request(method.clone(), url.clone());
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }
        if let Some(payload) = body {
            request = request.json(payload);
        }
        let response = request.send().map_err(classify_send_error)?;
        read_response(response)
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        segments: &[&str],
    ) -> Result<T, ProvisionError> {
        let body = self.send(operation, &Method::GET, &self.url(segments), None)?;
        decode(operation, &body)
    }

    fn policy_by_name(
        &self,
        operation: &'static str,
        name: &str,
    ) -> Result<LivePolicy, ProvisionError> {
        self.get_json(operation, &["v1", "acl", "policy", "name", name])
    }
}

impl AclApi for HttpAclClient {
    fn list_tokens(&self) -> Result<Vec<LiveToken>, ProvisionError> {
        self.get_json("list_tokens", &["v1", "acl", "tokens"])
    }

    fn create_token(&self, token: &TokenRequest) -> Result<(), ProvisionError> {
        let body = encode("create_token", token)?;
        let url = self.url(&["v1", "acl", "token"]);
        self.send("create_token", &Method::PUT, &url, Some(&body))
            .map(drop)
    }

    fn update_token(&self, accessor_id: &str, token: &TokenRequest) -> Result<(), ProvisionError> {
        let body = encode("update_token", token)?;
        let url = self.url(&["v1", "acl", "token", accessor_id]);
        self.send("update_token", &Method::PUT, &url, Some(&body))
            .map(drop)
    }

    fn delete_token(&self, accessor_id: &str) -> Result<(), ProvisionError> {
        let url = self.url(&["v1", "acl", "token", accessor_id]);
        self.send("delete_token", &Method::DELETE, &url, None)
            .map(drop)
    }

    fn list_policies(&self) -> Result<Vec<LivePolicy>, ProvisionError> {
        let listed: Vec<LivePolicy> = self.get_json("list_policies", &["v1", "acl", "policies"])?;
        listed
            .iter()
            .map(|summary| self.get_json("read_policy", &["v1", "acl", "policy", &summary.id]))
            .collect()
    }

    fn create_policy(&self, policy: &PolicyRequest) -> Result<(), ProvisionError> {
        let body = encode("create_policy", policy)?;
        let url = self.url(&["v1", "acl", "policy"]);
        self.send("create_policy", &Method::PUT, &url, Some(&body))
            .map(drop)
    }

    fn update_policy(&self, name: &str, policy: &PolicyRequest) -> Result<(), ProvisionError> {
        let current = self.policy_by_name("update_policy", name)?;
        let mut body = encode("update_policy", policy)?;
        if let Value::Object(map) = &mut body {
            map.insert(String::from("ID"), Value::String(current.id.clone()));
        }
        let url = self.url(&["v1", "acl", "policy", &current.id]);
        self.send("update_policy", &Method::PUT, &url, Some(&body))
            .map(drop)
    }

    fn delete_policy(&self, name: &str) -> Result<(), ProvisionError> {
        let current = self.policy_by_name("delete_policy", name)?;
        let url = self.url(&["v1", "acl", "policy", &current.id]);
        self.send("delete_policy", &Method::DELETE, &url, None)
            .map(drop)
    }
}

fn classify_send_error(err: reqwest::Error) -> AttemptError {
    if err.is_builder() {
        AttemptError::Fatal(err)
    } else {
        AttemptError::Transient(describe(&err))
    }
}

fn read_response(response: Response) -> Result<String, AttemptError> {
    let status = response.status();
    let body = response
        .text()
        .map_err(|err| AttemptError::Transient(describe(&err)))?;
    if status.is_success() {
        return Ok(body);
    }
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(AttemptError::Transient(format!(
            "HTTP {}: {}",
            status.as_u16(),
            body.trim()
        )));
    }
    Err(AttemptError::Rejected {
        status: status.as_u16(),
        message: body.trim().to_owned(),
    })
}

/// Render an error with its source chain, since `reqwest` keeps the useful
/// detail (for example "connection refused") in the sources.
fn describe(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn encode<T: Serialize>(operation: &'static str, value: &T) -> Result<Value, ProvisionError> {
    serde_json::to_value(value).map_err(|source| ProvisionError::Encoding {
        operation: operation.to_owned(),
        source,
    })
}

fn decode<T: DeserializeOwned>(operation: &'static str, body: &str) -> Result<T, ProvisionError> {
    serde_json::from_str(body).map_err(|source| ProvisionError::Encoding {
        operation: operation.to_owned(),
        source,
    })
}
