use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8888;
pub const DEFAULT_COOLDOWN_SECS: u64 = 60;
pub const DEFAULT_COOLDOWN_429_SECS: u64 = 300;
pub const DEFAULT_COOLDOWN_403_SECS: u64 = 3600;
pub const DEFAULT_PRIORITY: i64 = 999;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("provider #{index} has an empty name")]
    EmptyName { index: usize },
    #[error("duplicate provider name: {0}")]
    DuplicateName(String),
    #[error("provider {provider}: unsupported protocol {protocol:?} (expected \"anthropic\" or \"openai\")")]
    UnsupportedProtocol { provider: String, protocol: String },
    #[error("provider {provider}: invalid base_url {url:?}: {reason}")]
    InvalidBaseUrl {
        provider: String,
        url: String,
        reason: String,
    },
    #[error("no enabled providers configured")]
    NoProviders,
}

/// Configuration document consumed once at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub failover: FailoverConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl AppConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_slice(&raw)
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self, ConfigError> {
        Ok(serde_json::from_slice(raw)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub verbose: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            verbose: false,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Optional layer merged over the file's `server` section.
///
/// Merge order: CLI > file > defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub verbose: Option<bool>,
}

impl ServerConfigPatch {
    pub fn apply_to(self, config: &mut ServerConfig) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(verbose) = self.verbose {
            config.verbose = verbose;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverConfig {
    /// Cooldown applied when a failed response carries no usable retry hint.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_seconds: u64,
    /// Fallback for 429 responses without a retry hint.
    #[serde(default = "default_cooldown_429_secs")]
    pub cooldown_429_seconds: u64,
    /// Fallback for 403 responses, usually a revoked or unfunded key.
    #[serde(default = "default_cooldown_403_secs")]
    pub cooldown_403_seconds: u64,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: default_cooldown_secs(),
            cooldown_429_seconds: default_cooldown_429_secs(),
            cooldown_403_seconds: default_cooldown_403_secs(),
        }
    }
}

/// Raw provider entry as written in the config file. Validated by the registry.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default, alias = "models", skip_serializing_if = "BTreeMap::is_empty")]
    pub model_map: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_seconds: Option<u64>,
    #[serde(default, alias = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("protocol", &self.protocol)
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("model_map", &self.model_map)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .field("cooldown_seconds", &self.cooldown_seconds)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish()
    }
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_cooldown_secs() -> u64 {
    DEFAULT_COOLDOWN_SECS
}

fn default_cooldown_429_secs() -> u64 {
    DEFAULT_COOLDOWN_429_SECS
}

fn default_cooldown_403_secs() -> u64 {
    DEFAULT_COOLDOWN_403_SECS
}
