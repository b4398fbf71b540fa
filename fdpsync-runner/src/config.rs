//! Run configuration, loaded from TOML.
//!
//! Every key has a default, so an empty file is a valid (test environment)
//! configuration. [`SyncConfig::validate`] must pass before a run starts.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use fdpsync_core::remote::{
    ClientIdentity, ClientSettings, Environment, FetchRequest, RetryPolicy, Secret,
    TransportSettings,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("cannot serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("remote.endpoint '{value}' is not an absolute http(s) URL: {reason}")]
    InvalidEndpoint { value: String, reason: String },

    #[error("remote.proxy '{value}' is not an absolute http(s) URL: {reason}")]
    InvalidProxy { value: String, reason: String },

    #[error("remote.timeout_secs must be within 1..=600, got {0}")]
    TimeoutOutOfRange(u64),

    #[error("remote.max_retries must be within 0..=10, got {0}")]
    RetriesOutOfRange(u32),

    #[error("remote.backoff_base_ms ({base_ms}) must not exceed remote.backoff_max_ms ({max_ms})")]
    BackoffOrder { base_ms: u64, max_ms: u64 },

    #[error("remote.backoff_max_ms must not exceed 600000, got {0}")]
    BackoffMaxOutOfRange(u64),

    #[error("remote.request_block_size must be within 1..=100, got {0}")]
    BlockSizeOutOfRange(usize),

    #[error("remote.max_concurrent_requests must be within 1..=16, got {0}")]
    ConcurrencyOutOfRange(usize),

    #[error("remote.password_env '{0}' is not a valid environment variable name")]
    InvalidPasswordEnv(String),

    #[error("catalog.path must not be empty")]
    EmptyCatalogPath,

    #[error("output.path {} must have the .xlsx extension", .0.display())]
    OutputExtension(PathBuf),

    #[error("output directory {} does not exist", .0.display())]
    OutputDirectoryMissing(PathBuf),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub remote: RemoteConfig,
    pub catalog: CatalogConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    /// Overrides the environment's default endpoint.
    pub endpoint: Option<String>,
    pub environment: Environment,
    pub timeout_secs: u64,
    /// Extra attempts after the first.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub jitter: bool,
    pub request_block_size: usize,
    pub max_concurrent_requests: usize,
    pub user: String,
    /// Name of the environment variable holding the password.
    pub password_env: String,
    pub data_supplier: String,
    pub profile: Option<String>,
    /// Quoted ISO date, e.g. `"2024-05-31"`.
    pub content_date: Option<NaiveDate>,
    pub proxy: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            environment: Environment::Test,
            timeout_secs: 30,
            max_retries: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            jitter: true,
            request_block_size: 10,
            max_concurrent_requests: 4,
            user: String::new(),
            password_env: "FDP_PASSWORD".into(),
            data_supplier: String::new(),
            profile: None,
            content_date: None,
            proxy: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogConfig {
    pub path: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("resources/isinlei.csv"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub path: PathBuf,
    /// Archive raw responses here when set.
    pub backup_dir: Option<PathBuf>,
    /// Keep going when individual batches fail.
    pub allow_partial: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("fdp_reconciliation.xlsx"),
            backup_dir: None,
            allow_partial: false,
        }
    }
}

impl SyncConfig {
    /// Load a configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse a configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every rule; the first violation wins.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.remote;

        let endpoint = self.endpoint();
        check_url(&endpoint).map_err(|reason| ConfigError::InvalidEndpoint {
            value: endpoint.clone(),
            reason,
        })?;
        if let Some(proxy) = &r.proxy {
            check_url(proxy).map_err(|reason| ConfigError::InvalidProxy {
                value: proxy.clone(),
                reason,
            })?;
        }
        if !(1..=600).contains(&r.timeout_secs) {
            return Err(ConfigError::TimeoutOutOfRange(r.timeout_secs));
        }
        if r.max_retries > 10 {
            return Err(ConfigError::RetriesOutOfRange(r.max_retries));
        }
        if r.backoff_max_ms > 600_000 {
            return Err(ConfigError::BackoffMaxOutOfRange(r.backoff_max_ms));
        }
        if r.backoff_base_ms > r.backoff_max_ms {
            return Err(ConfigError::BackoffOrder {
                base_ms: r.backoff_base_ms,
                max_ms: r.backoff_max_ms,
            });
        }
        if !(1..=100).contains(&r.request_block_size) {
            return Err(ConfigError::BlockSizeOutOfRange(r.request_block_size));
        }
        if !(1..=16).contains(&r.max_concurrent_requests) {
            return Err(ConfigError::ConcurrencyOutOfRange(r.max_concurrent_requests));
        }
        let env_name_ok = !r.password_env.is_empty()
            && r.password_env
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_');
        if !env_name_ok {
            return Err(ConfigError::InvalidPasswordEnv(r.password_env.clone()));
        }

        if self.catalog.path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyCatalogPath);
        }

        let out = &self.output.path;
        let is_xlsx = out
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xlsx"));
        if !is_xlsx {
            return Err(ConfigError::OutputExtension(out.clone()));
        }
        if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.is_dir() {
                return Err(ConfigError::OutputDirectoryMissing(parent.to_path_buf()));
            }
        }
        Ok(())
    }

    /// The configured endpoint, or the environment's default.
    pub fn endpoint(&self) -> String {
        self.remote
            .endpoint
            .clone()
            .unwrap_or_else(|| self.remote.environment.default_endpoint().to_string())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.remote.max_retries,
            base_delay: Duration::from_millis(self.remote.backoff_base_ms),
            max_delay: Duration::from_millis(self.remote.backoff_max_ms),
            jitter: self.remote.jitter,
        }
    }

    pub fn transport_settings(&self) -> TransportSettings {
        TransportSettings {
            timeout: Duration::from_secs(self.remote.timeout_secs),
            proxy: self.remote.proxy.clone(),
            max_idle_per_host: self.remote.max_concurrent_requests,
            ..TransportSettings::default()
        }
    }

    /// Password from the configured environment variable, if set and non-empty.
    pub fn password(&self) -> Option<Secret> {
        std::env::var(&self.remote.password_env)
            .ok()
            .filter(|p| !p.is_empty())
            .map(Secret::new)
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            endpoint: self.endpoint(),
            identity: ClientIdentity {
                environment: self.remote.environment,
                user: self.remote.user.clone(),
                data_supplier: self.remote.data_supplier.clone(),
                client_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            password: self.password(),
            retry: self.retry_policy(),
        }
    }

    /// Date and profile shared by every batch request.
    pub fn request_template(&self) -> FetchRequest {
        FetchRequest {
            content_date: self.remote.content_date,
            profile: self.remote.profile.clone(),
            ..FetchRequest::new(Vec::new())
        }
    }
}

fn check_url(value: &str) -> Result<(), String> {
    let url = reqwest::Url::parse(value).map_err(|e| e.to_string())?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(format!("unsupported scheme '{}'", url.scheme()));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err("missing host".into());
    }
    Ok(())
}
