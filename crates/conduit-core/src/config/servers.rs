//! The tool-provider configuration file.
//!
//! ```json
//! { "mcpServers": { "weather": { "type": "sse", "url": "http://localhost:8000/sse" } } }
//! ```
//!
//! Entries are deserialized into loose raw structs and then validated, so a
//! bad file reports every offending path at once and is never partially
//! coerced.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::validation::{ConfigValidationError, ValidationResult};
use crate::error::Error;

/// Top-level key holding the provider map.
pub const SERVERS_KEY: &str = "mcpServers";

/// Default per-provider timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: f64 = 30.0;

/// Streaming reads may stay idle this many times longer than the connect timeout.
pub const READ_TIMEOUT_FACTOR: u32 = 10;

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]{1,128}$").expect("provider name pattern compiles"));

/// Wire transport used to reach a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Child process speaking newline-delimited JSON on stdin/stdout.
    Stdio,
    /// Legacy HTTP+SSE: a GET event stream plus POSTed messages.
    Sse,
    /// Streamable HTTP: every message is a POST, replies are JSON or SSE.
    Http,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Sse => write!(f, "sse"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// What to do with bytes on a stdio channel that are not valid UTF-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeErrors {
    /// Fail the read.
    #[default]
    Strict,
    /// Substitute U+FFFD and carry on.
    Replace,
}

/// Settings for a provider launched as a child process.
#[derive(Debug, Clone, PartialEq)]
pub struct StdioConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Extra variables layered over the inherited environment.
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub decode_errors: DecodeErrors,
}

/// Settings for a provider reached over HTTP.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    pub url: Url,
    /// Sent as `Authorization: Bearer <token>`.
    pub access_token: Option<String>,
}

/// Transport-specific part of a [`ServerConfig`].
#[derive(Debug, Clone, PartialEq)]
pub enum TransportConfig {
    Stdio(StdioConfig),
    Sse(RemoteConfig),
    Http(RemoteConfig),
}

/// One named tool provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Unique name, `[A-Za-z0-9_]{1,128}`. Never contains `-`, which keeps
    /// qualified tool names splittable on their first `-`.
    pub name: String,
    pub transport: TransportConfig,
    pub disabled: bool,
    /// Raw tool names to expose. Empty means no allow-filter.
    pub allowed_tools: BTreeSet<String>,
    /// Raw tool names to hide. Wins over `allowed_tools`.
    pub denied_tools: BTreeSet<String>,
    pub timeout_secs: f64,
}

impl ServerConfig {
    fn with_transport(name: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            name: name.into(),
            transport,
            disabled: false,
            allowed_tools: BTreeSet::new(),
            denied_tools: BTreeSet::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// A provider launched as `command args...`.
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self::with_transport(
            name,
            TransportConfig::Stdio(StdioConfig {
                command: command.into(),
                args,
                env: HashMap::new(),
                cwd: None,
                decode_errors: DecodeErrors::Strict,
            }),
        )
    }

    /// A provider reached over legacy HTTP+SSE.
    pub fn sse(name: impl Into<String>, url: Url) -> Self {
        Self::with_transport(
            name,
            TransportConfig::Sse(RemoteConfig {
                url,
                access_token: None,
            }),
        )
    }

    /// A provider reached over streamable HTTP.
    pub fn http(name: impl Into<String>, url: Url) -> Self {
        Self::with_transport(
            name,
            TransportConfig::Http(RemoteConfig {
                url,
                access_token: None,
            }),
        )
    }

    /// Set whether the provider is disabled.
    pub fn with_disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Set the allow-list.
    pub fn with_allowed_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    /// Set the deny-list.
    pub fn with_denied_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.denied_tools = tools.into_iter().map(Into::into).collect();
        self
    }

    /// Set the timeout in seconds.
    pub fn with_timeout(mut self, secs: f64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// The transport kind.
    pub fn kind(&self) -> TransportKind {
        match self.transport {
            TransportConfig::Stdio(_) => TransportKind::Stdio,
            TransportConfig::Sse(_) => TransportKind::Sse,
            TransportConfig::Http(_) => TransportKind::Http,
        }
    }

    /// Whether a session should be created for this provider.
    pub fn is_enabled(&self) -> bool {
        !self.disabled
    }

    /// Connect and per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs).unwrap_or(Duration::MAX)
    }

    /// Idle timeout for streaming reads.
    pub fn read_timeout(&self) -> Duration {
        self.timeout().saturating_mul(READ_TIMEOUT_FACTOR)
    }
}

/// The servers document as written on disk.
#[derive(Debug, Deserialize)]
struct ServersDocument {
    #[serde(rename = "mcpServers")]
    servers: Option<BTreeMap<String, Value>>,
    /// Anything else at the top level is rejected.
    #[serde(flatten)]
    unknown: BTreeMap<String, Value>,
}

/// One `mcpServers` entry before validation.
///
/// Every field is optional here so that missing ones are reported together
/// by [`RawServer::validate`]. Unknown keys are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServer {
    #[serde(rename = "type")]
    kind: Option<TransportKind>,
    #[serde(default)]
    disabled: bool,
    #[serde(default)]
    allowed_tools: Vec<String>,
    #[serde(default)]
    not_allowed_tools: Vec<String>,
    timeout: Option<f64>,

    command: Option<String>,
    args: Option<Vec<String>>,
    #[serde(default)]
    env: HashMap<String, String>,
    cwd: Option<PathBuf>,
    encoding: Option<String>,
    encoding_error_handler: Option<DecodeErrors>,

    url: Option<String>,
    access_token: Option<String>,
}

impl RawServer {
    /// Check the entry found at `path`, building it when nothing is wrong.
    fn validate(self, name: &str, path: &str, result: &mut ValidationResult) -> Option<ServerConfig> {
        let errors_before = result.errors().count();

        if !NAME_PATTERN.is_match(name) {
            result.add_error(path, "server name must match [A-Za-z0-9_]{1,128}");
        }

        let timeout_secs = match self.timeout {
            Some(secs) if secs.is_finite() && secs > 0.0 => secs,
            Some(_) => {
                result.add_error(format!("{path}.timeout"), "must be a positive number of seconds");
                DEFAULT_TIMEOUT_SECS
            }
            None => DEFAULT_TIMEOUT_SECS,
        };

        if let Some(both) = self.allowed_tools.iter().find(|t| self.not_allowed_tools.contains(*t)) {
            result.add_warning(
                format!("{path}.notAllowedTools"),
                format!("'{}' is also allowed; the deny-list wins", both),
            );
        }

        let transport = match self.kind {
            Some(TransportKind::Stdio) => self.stdio(path, result),
            Some(kind) => self.remote(kind, path, result),
            None => {
                result.add_error(format!("{path}.type"), "is required");
                None
            }
        };

        if result.errors().count() > errors_before {
            return None;
        }

        Some(ServerConfig {
            name: name.to_string(),
            transport: transport?,
            disabled: self.disabled,
            allowed_tools: self.allowed_tools.into_iter().collect(),
            denied_tools: self.not_allowed_tools.into_iter().collect(),
            timeout_secs,
        })
    }

    fn stdio(&self, path: &str, result: &mut ValidationResult) -> Option<TransportConfig> {
        if self.url.is_some() {
            result.add_warning(format!("{path}.url"), "ignored for stdio providers");
        }

        let command = self.command.clone().filter(|c| !c.is_empty());
        if command.is_none() {
            result.add_error(format!("{path}.command"), "is required for stdio providers");
        }
        if self.args.is_none() {
            result.add_error(format!("{path}.args"), "is required for stdio providers");
        }
        if let Some(encoding) = &self.encoding {
            if !matches!(encoding.to_ascii_lowercase().as_str(), "utf-8" | "utf8") {
                result.add_error(format!("{path}.encoding"), "only utf-8 is supported");
            }
        }

        Some(TransportConfig::Stdio(StdioConfig {
            command: command?,
            args: self.args.clone()?,
            env: self.env.clone(),
            cwd: self.cwd.clone(),
            decode_errors: self.encoding_error_handler.unwrap_or_default(),
        }))
    }

    fn remote(
        &self,
        kind: TransportKind,
        path: &str,
        result: &mut ValidationResult,
    ) -> Option<TransportConfig> {
        if self.command.is_some() {
            result.add_warning(format!("{path}.command"), "ignored for remote providers");
        }

        let Some(raw) = &self.url else {
            result.add_error(format!("{path}.url"), format!("is required for {} providers", kind));
            return None;
        };
        let url = match Url::parse(raw) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => url,
            Ok(url) => {
                result.add_error(
                    format!("{path}.url"),
                    format!("unsupported scheme '{}', expected http or https", url.scheme()),
                );
                return None;
            }
            Err(e) => {
                result.add_error(format!("{path}.url"), format!("must be an absolute URI: {}", e));
                return None;
            }
        };

        let remote = RemoteConfig {
            url,
            access_token: self.access_token.clone(),
        };
        Some(match kind {
            TransportKind::Sse => TransportConfig::Sse(remote),
            _ => TransportConfig::Http(remote),
        })
    }
}

/// Parse and validate a servers document.
///
/// Entries come back ordered by name. Problems in different entries are
/// reported together; a value of the wrong type is reported against its
/// entry.
pub fn parse_servers(raw: &str) -> Result<Vec<ServerConfig>, ConfigValidationError> {
    let document: ServersDocument = serde_json::from_str(raw)
        .map_err(|e| ConfigValidationError::single("$", format!("invalid servers document: {}", e)))?;

    let mut result = ValidationResult::new();
    for key in document.unknown.keys() {
        result.add_error(key.as_str(), "unknown top-level key");
    }
    let entries = document.servers.unwrap_or_else(|| {
        result.add_error(SERVERS_KEY, "is required");
        BTreeMap::new()
    });

    let mut servers = Vec::with_capacity(entries.len());
    for (name, entry) in entries {
        let path = format!("{}.{}", SERVERS_KEY, name);
        match serde_json::from_value::<RawServer>(entry) {
            Ok(raw) => servers.extend(raw.validate(&name, &path, &mut result)),
            Err(e) => result.add_error(path, e.to_string()),
        }
    }

    result.into_result()?;
    Ok(servers)
}

/// Read and validate a servers file from disk.
pub fn load_servers_file(path: impl AsRef<Path>) -> Result<Vec<ServerConfig>, Error> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.display().to_string(),
        source,
    })?;
    Ok(parse_servers(&raw)?)
}
