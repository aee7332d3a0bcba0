//! Configuration management for Ratewall.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{RatewallError, Result};
use crate::ratelimit::RateLimitPolicy;

/// Prefix for environment overrides, e.g. `RATEWALL__LIMITS__IP_LIMIT`.
pub const ENV_PREFIX: &str = "RATEWALL";

/// Unprefixed variable names accepted for compatibility with older
/// deployments, paired with the setting each one feeds.
pub const LEGACY_ENV_VARS: &[(&str, &str)] = &[
    ("REDIS_ADDR", "STORAGE__REDIS_ADDR"),
    ("REDIS_PASSWORD", "STORAGE__REDIS_PASSWORD"),
    ("RATE_LIMIT_IP", "LIMITS__IP_LIMIT"),
    ("RATE_LIMIT_TOKEN", "LIMITS__TOKEN_LIMIT"),
    ("BLOCK_DURATION", "LIMITS__BLOCK_DURATION_SECS"),
];

/// Legacy switch selecting the in-memory backend when set to `true`.
pub const LEGACY_USE_MEMORY: &str = "USE_MEMORY";

/// Main configuration for the Ratewall service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RatewallConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Request ceilings and block duration
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Caller identification
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Limiter state storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Requests per second allowed for callers identified by address
    #[serde(default = "default_ip_limit")]
    pub ip_limit: u64,

    /// Requests per second allowed for callers presenting a token
    #[serde(default = "default_token_limit")]
    pub token_limit: u64,

    /// Seconds a caller stays blocked after exceeding its limit
    #[serde(default = "default_block_duration_secs")]
    pub block_duration_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            ip_limit: default_ip_limit(),
            token_limit: default_token_limit(),
            block_duration_secs: default_block_duration_secs(),
        }
    }
}

fn default_ip_limit() -> u64 {
    5
}

fn default_token_limit() -> u64 {
    10
}

fn default_block_duration_secs() -> u64 {
    300
}

impl LimitsConfig {
    /// Build the policy enforced by the rate limiter.
    pub fn policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            ip_limit: self.ip_limit,
            token_limit: self.token_limit,
            block_duration: Duration::from_secs(self.block_duration_secs),
        }
    }
}

/// How callers are identified.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Header carrying the API token
    #[serde(default = "default_token_header")]
    pub token_header: String,

    /// Tokens granted the privileged limit. Empty means any token.
    #[serde(default)]
    pub allowed_tokens: Vec<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            token_header: default_token_header(),
            allowed_tokens: Vec::new(),
        }
    }
}

fn default_token_header() -> String {
    "API_KEY".to_string()
}

/// Which store keeps limiter state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process-local map
    Memory,
    /// Shared Redis server
    Redis,
}

/// What to do with a request when the store fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Reject the request
    Deny,
    /// Let the request through
    Allow,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Store backend
    #[serde(default = "default_backend")]
    pub backend: BackendKind,

    /// Redis `host:port`
    #[serde(default = "default_redis_addr")]
    pub redis_addr: String,

    /// Redis password, empty for none
    #[serde(default)]
    pub redis_password: String,

    /// Upper bound in milliseconds on a single admission decision
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Seconds between sweeps of expired in-memory entries, 0 disables
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Handling of requests whose decision failed
    #[serde(default = "default_failure_mode")]
    pub failure_mode: FailureMode,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            redis_addr: default_redis_addr(),
            redis_password: String::new(),
            timeout_ms: default_timeout_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
            failure_mode: default_failure_mode(),
        }
    }
}

fn default_backend() -> BackendKind {
    BackendKind::Redis
}

fn default_redis_addr() -> String {
    "localhost:6379".to_string()
}

fn default_timeout_ms() -> u64 {
    500
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_failure_mode() -> FailureMode {
    FailureMode::Deny
}

impl StorageConfig {
    /// Bound on a single admission decision.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Sweep period for the in-memory store, if sweeping is enabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

impl RatewallConfig {
    /// Load configuration from an optional file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut loader = ConfigLoader::new();
        if let Some(path) = path {
            loader = loader.with_config_path(path);
        }
        loader.load()
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.limits.ip_limit == 0 {
            return Err(config_error("limits.ip_limit must be greater than zero"));
        }
        if self.limits.token_limit == 0 {
            return Err(config_error("limits.token_limit must be greater than zero"));
        }
        if self.limits.block_duration_secs == 0 {
            return Err(config_error("limits.block_duration_secs must be greater than zero"));
        }
        if self.storage.timeout_ms == 0 {
            return Err(config_error("storage.timeout_ms must be greater than zero"));
        }
        if self.classifier.token_header.is_empty() {
            return Err(config_error("classifier.token_header must not be empty"));
        }
        if self.storage.backend == BackendKind::Redis && self.storage.redis_addr.is_empty() {
            return Err(config_error("storage.redis_addr is required for the redis backend"));
        }
        Ok(())
    }
}

fn config_error(message: &str) -> RatewallError {
    RatewallError::Config(message.to_string())
}

/// Translate legacy variables into `SECTION__KEY` form.
///
/// `USE_MEMORY=true` selects the memory backend, any other value selects
/// Redis. Unknown variables are ignored.
fn legacy_overrides(vars: &HashMap<String, String>) -> HashMap<String, String> {
    let mut overrides: HashMap<String, String> = LEGACY_ENV_VARS
        .iter()
        .filter_map(|(legacy, key)| vars.get(*legacy).map(|value| (key.to_string(), value.clone())))
        .collect();

    if let Some(use_memory) = vars.get(LEGACY_USE_MEMORY) {
        let backend = if use_memory.trim() == "true" { "memory" } else { "redis" };
        overrides.insert("STORAGE__BACKEND".to_string(), backend.to_string());
    }
    overrides
}

/// Legacy variables present in the process environment.
fn legacy_process_vars() -> HashMap<String, String> {
    LEGACY_ENV_VARS
        .iter()
        .map(|(legacy, _)| *legacy)
        .chain(std::iter::once(LEGACY_USE_MEMORY))
        .filter_map(|name| std::env::var(name).ok().map(|value| (name.to_string(), value)))
        .collect()
}

/// Layers built-in defaults, an optional file, legacy variables, and
/// prefixed environment overrides, in increasing precedence.
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_prefix: String,
    legacy_vars: Option<HashMap<String, String>>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_path: None,
            env_prefix: ENV_PREFIX.to_string(),
            legacy_vars: None,
        }
    }

    /// Read legacy variables from `vars` instead of the process environment.
    pub fn with_legacy_vars(mut self, vars: HashMap<String, String>) -> Self {
        self.legacy_vars = Some(vars);
        self
    }

    /// Set config file path. TOML or YAML, chosen by extension.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Set environment variable prefix.
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Load and validate configuration.
    pub fn load(&self) -> Result<RatewallConfig> {
        let mut builder = config::Config::builder();

        if let Some(path) = &self.config_path {
            builder = builder.add_source(config::File::from(path.as_path()));
        }

        let legacy = match &self.legacy_vars {
            Some(vars) => legacy_overrides(vars),
            None => legacy_overrides(&legacy_process_vars()),
        };
        builder = builder.add_source(
            config::Environment::default()
                .separator("__")
                .try_parsing(true)
                .source(Some(legacy)),
        );

        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("classifier.allowed_tokens"),
        );

        let config: RatewallConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| RatewallError::Config(format!("Failed to load configuration: {}", e)))?;

        config.validate()?;
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
