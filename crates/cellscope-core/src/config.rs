//! Export and push configuration.
//!
//! Values come from two layers: `CELLSCOPE_*` environment variables and
//! explicit caller options. Explicit values win.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::errors::{CellscopeError, CellscopeResult};
use crate::export::Sidecar;

pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_SECONDS: f64 = 1.0;
pub const DEFAULT_TIMEOUT_SECONDS: f64 = 30.0;
pub const MAX_BACKOFF_SECONDS: f64 = 3600.0;
pub const MAX_TIMEOUT_SECONDS: f64 = 86400.0;

pub const ENV_ENDPOINT: &str = "CELLSCOPE_SPARQL_ENDPOINT";
pub const ENV_TOKEN: &str = "CELLSCOPE_SPARQL_TOKEN";
pub const ENV_USERNAME: &str = "CELLSCOPE_SPARQL_USERNAME";
pub const ENV_PASSWORD: &str = "CELLSCOPE_SPARQL_PASSWORD";
pub const ENV_OUTPUT: &str = "CELLSCOPE_SPARQL_OUTPUT";
pub const ENV_RETRIES: &str = "CELLSCOPE_SPARQL_RETRIES";
pub const ENV_BACKOFF: &str = "CELLSCOPE_SPARQL_BACKOFF";
pub const ENV_TIMEOUT: &str = "CELLSCOPE_SPARQL_TIMEOUT";
pub const ENV_VISUALIZE: &str = "CELLSCOPE_VISUALIZE";

/// Parse a boolean flag with the usual on/off spellings.
///
/// Unset or empty variables fall back to `default`.
pub fn env_flag(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(val) => {
            let v = val.trim().to_lowercase();
            if v.is_empty() {
                return default;
            }
            if default {
                !matches!(v.as_str(), "0" | "false" | "no" | "off")
            } else {
                matches!(v.as_str(), "1" | "true" | "yes" | "on")
            }
        }
        Err(_) => default,
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> CellscopeResult<Option<T>> {
    match env_string(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| CellscopeError::Validation(format!("{name} has an invalid value: {raw}"))),
        None => Ok(None),
    }
}

/// Endpoint credential.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Bearer(String),
    Basic { username: String, password: String },
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Bearer(_) => f.write_str("Bearer(***)"),
            Credential::Basic { username, .. } => {
                write!(f, "Basic {{ username: {username:?}, password: *** }}")
            }
        }
    }
}

/// Settings for the delta push stage.
///
/// Fields are optional so layers can be merged; accessors apply defaults.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PushConfig {
    pub endpoint: Option<String>,
    pub auth_token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub output: Option<PathBuf>,
    pub retries: Option<u32>,
    pub backoff_seconds: Option<f64>,
    pub timeout_seconds: Option<f64>,
    pub headers: BTreeMap<String, String>,
}

impl PushConfig {
    pub fn from_env() -> CellscopeResult<Self> {
        Ok(Self {
            endpoint: env_string(ENV_ENDPOINT),
            auth_token: env_string(ENV_TOKEN),
            username: env_string(ENV_USERNAME),
            password: env_string(ENV_PASSWORD),
            output: env_string(ENV_OUTPUT).map(PathBuf::from),
            retries: env_parsed(ENV_RETRIES)?,
            backoff_seconds: env_parsed(ENV_BACKOFF)?,
            timeout_seconds: env_parsed(ENV_TIMEOUT)?,
            headers: BTreeMap::new(),
        })
    }

    /// Overlay `explicit` on top of `self`; explicit values win.
    pub fn merged_with(&self, explicit: &PushConfig) -> PushConfig {
        let mut headers = self.headers.clone();
        headers.extend(explicit.headers.clone());
        PushConfig {
            endpoint: explicit.endpoint.clone().or_else(|| self.endpoint.clone()),
            auth_token: explicit.auth_token.clone().or_else(|| self.auth_token.clone()),
            username: explicit.username.clone().or_else(|| self.username.clone()),
            password: explicit.password.clone().or_else(|| self.password.clone()),
            output: explicit.output.clone().or_else(|| self.output.clone()),
            retries: explicit.retries.or(self.retries),
            backoff_seconds: explicit.backoff_seconds.or(self.backoff_seconds),
            timeout_seconds: explicit.timeout_seconds.or(self.timeout_seconds),
            headers,
        }
    }

    pub fn retries(&self) -> u32 {
        self.retries.unwrap_or(DEFAULT_RETRIES)
    }

    pub fn backoff_seconds(&self) -> f64 {
        self.backoff_seconds.unwrap_or(DEFAULT_BACKOFF_SECONDS)
    }

    pub fn timeout_seconds(&self) -> f64 {
        self.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS)
    }

    /// Configured endpoint, ignoring blank values.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }

    pub fn credential(&self) -> Option<Credential> {
        if let Some(token) = &self.auth_token {
            return Some(Credential::Bearer(token.clone()));
        }
        match (&self.username, &self.password) {
            (Some(username), password) => Some(Credential::Basic {
                username: username.clone(),
                password: password.clone().unwrap_or_default(),
            }),
            _ => None,
        }
    }

    pub fn validate(&self) -> CellscopeResult<()> {
        if self.auth_token.is_some() && (self.username.is_some() || self.password.is_some()) {
            return Err(CellscopeError::Validation(
                "auth token and username/password are mutually exclusive".to_string(),
            ));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(CellscopeError::Validation(
                "password supplied without a username".to_string(),
            ));
        }
        let backoff = self.backoff_seconds();
        if !(backoff > 0.0 && backoff <= MAX_BACKOFF_SECONDS) {
            return Err(CellscopeError::Validation(format!(
                "backoff_seconds must be in (0, {MAX_BACKOFF_SECONDS}], got {backoff}"
            )));
        }
        let timeout = self.timeout_seconds();
        if !(timeout > 0.0 && timeout <= MAX_TIMEOUT_SECONDS) {
            return Err(CellscopeError::Validation(format!(
                "timeout must be in (0, {MAX_TIMEOUT_SECONDS}], got {timeout}"
            )));
        }
        Ok(())
    }
}

/// Options for one `export` call.
#[derive(Clone, Debug, PartialEq)]
pub struct ExportOptions {
    pub push: PushConfig,
    /// Base IRI for relative bundle ids; defaults to the crate directory.
    pub base_uri: Option<String>,
    pub visualize: bool,
    /// Skip delta generation and push entirely.
    pub skip_index: bool,
    pub aliases: BTreeMap<String, String>,
    /// Bridge hints for artifacts the analyzer cannot see.
    pub sidecars: Vec<Sidecar>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            push: PushConfig::default(),
            base_uri: None,
            visualize: true,
            skip_index: false,
            aliases: BTreeMap::new(),
            sidecars: Vec::new(),
        }
    }
}

impl ExportOptions {
    /// Options seeded from the environment.
    pub fn from_env() -> CellscopeResult<Self> {
        Ok(Self {
            push: PushConfig::from_env()?,
            visualize: env_flag(ENV_VISUALIZE, true),
            ..Self::default()
        })
    }
}
