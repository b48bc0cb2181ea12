//! TOML-based configuration for modelforge.
//!
//! Supports a config file (modelforge.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [sources.sales]
//! driver = "sqlite"
//! connection_string = "./data/sales.db"
//!
//! [sources.crm]
//! driver = "postgres"
//! connection_string = "${CRM_DATABASE_URL}"
//! label = "crm"
//!
//! [worker]
//! path = "./modelforge-worker"
//!
//! [ai]
//! base_url = "http://localhost:11434/v1"
//! model = "qwen2.5:14b-instruct"
//!
//! [query]
//! timeout_secs = 30
//! default_row_cap = 1000
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::connection::Driver;

/// Upper bound on session lifetime. Configuration may shorten it, never extend it.
pub const MAX_SESSION_TTL_HOURS: u32 = 24;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Source not found: {0}")]
    SourceNotFound(String),

    #[error("Unsupported driver: {0}")]
    UnsupportedDriver(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Settings {
    /// Named data sources, keyed by source id.
    pub sources: HashMap<String, SourceSettings>,

    /// Worker configuration (non-SQLite drivers).
    pub worker: WorkerSettings,

    /// AI engine configuration.
    pub ai: AiSettings,

    /// Session lifecycle configuration.
    pub session: SessionSettings,

    /// Query execution limits.
    pub query: QuerySettings,

    /// Durable model storage.
    pub storage: StorageSettings,

    /// Log output.
    pub logging: LoggingSettings,

    /// HTTP API.
    pub server: ServerSettings,
}

/// Data source configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceSettings {
    /// Database driver (sqlite, duckdb, postgres, mysql, mssql).
    pub driver: String,

    /// Connection string (supports ${ENV_VAR} expansion).
    pub connection_string: String,

    /// Namespace label used when this source is merged with others.
    #[serde(default)]
    pub label: Option<String>,

    /// Schema to introspect for this source.
    #[serde(default)]
    pub default_schema: Option<String>,
}

impl SourceSettings {
    /// Get the driver type.
    pub fn driver_type(&self) -> Result<Driver, SettingsError> {
        self.driver
            .parse::<Driver>()
            .map_err(|_| SettingsError::UnsupportedDriver(self.driver.clone()))
    }

    /// Get the connection string with environment variables expanded.
    pub fn resolved_connection_string(&self) -> Result<String, SettingsError> {
        expand_env_vars(&self.connection_string)
    }
}

/// Worker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Path to worker binary.
    pub path: Option<String>,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Connection pool settings.
    pub pool: PoolSettings,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            path: None,
            request_timeout_secs: 30,
            pool: PoolSettings::default(),
        }
    }
}

/// Connection pool settings passed through to the worker.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Maximum number of idle connections per pool.
    pub max_idle_conns: u32,

    /// Maximum number of open connections per pool.
    pub max_open_conns: u32,

    /// Maximum connection lifetime (e.g., "5m", "1h").
    pub conn_max_lifetime: String,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_idle_conns: 5,
            max_open_conns: 10,
            conn_max_lifetime: "5m".to_string(),
        }
    }
}

impl PoolSettings {
    /// Convert to worker command-line arguments.
    pub fn to_worker_args(&self) -> Vec<String> {
        vec![
            "-pool".to_string(),
            format!("-pool-max-idle={}", self.max_idle_conns),
            format!("-pool-max-open={}", self.max_open_conns),
            format!("-pool-conn-lifetime={}", self.conn_max_lifetime),
        ]
    }
}

/// AI engine configuration (OpenAI-compatible chat completions endpoint).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AiSettings {
    /// Base URL, e.g. `http://localhost:11434/v1`.
    pub base_url: String,

    /// Model identifier.
    pub model: String,

    /// Bearer token (supports ${ENV_VAR} expansion).
    pub api_key: Option<String>,

    /// Request timeout in seconds.
    pub timeout_secs: u64,

    /// Sampling temperature.
    pub temperature: f32,

    /// Completion token limit.
    pub max_tokens: Option<u32>,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            model: "qwen2.5:14b-instruct".to_string(),
            api_key: None,
            timeout_secs: 120,
            temperature: 0.2,
            max_tokens: None,
        }
    }
}

impl AiSettings {
    /// Resolved API key, if configured.
    pub fn resolved_api_key(&self) -> Result<Option<String>, SettingsError> {
        self.api_key.as_deref().map(expand_env_vars).transpose()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Session lifecycle configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Session lifetime in hours, clamped to [`MAX_SESSION_TTL_HOURS`].
    pub ttl_hours: u32,

    /// Interval of the background reaper.
    pub reap_interval_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            ttl_hours: MAX_SESSION_TTL_HOURS,
            reap_interval_secs: 300,
        }
    }
}

impl SessionSettings {
    /// Effective TTL.
    pub fn ttl(&self) -> chrono::Duration {
        let hours = self.ttl_hours.clamp(1, MAX_SESSION_TTL_HOURS);
        chrono::Duration::hours(i64::from(hours))
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.reap_interval_secs.max(1))
    }
}

/// Query execution limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QuerySettings {
    /// Execution timeout in seconds.
    pub timeout_secs: u64,

    /// Row cap applied when the caller does not supply one.
    pub default_row_cap: usize,

    /// Largest row cap a caller may request.
    pub max_row_cap: usize,

    /// Largest table (estimated rows) that may be pulled for an in-process join.
    pub federation_max_rows: u64,

    /// Per-source bound on schema collection.
    pub collect_timeout_secs: u64,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            default_row_cap: 1000,
            max_row_cap: 10_000,
            federation_max_rows: 50_000,
            collect_timeout_secs: 10,
        }
    }
}

impl QuerySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn collect_timeout(&self) -> Duration {
        Duration::from_secs(self.collect_timeout_secs)
    }

    /// Clamp a caller-supplied row cap into the configured range.
    pub fn effective_row_cap(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_row_cap)
            .min(self.max_row_cap)
    }
}

/// Durable model storage.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct StorageSettings {
    /// SQLite file path; defaults to `~/.modelforge/models.db`.
    pub path: Option<String>,
}

impl StorageSettings {
    /// Resolve the store path, expanding env vars and a leading `~`.
    pub fn resolved_path(&self) -> Result<PathBuf, SettingsError> {
        match &self.path {
            Some(path) => {
                let expanded = expand_env_vars(path)?;
                match expanded.strip_prefix("~/") {
                    Some(rest) => dirs::home_dir()
                        .map(|home| home.join(rest))
                        .ok_or_else(|| {
                            SettingsError::InvalidConfig("home directory unavailable".into())
                        }),
                    None => Ok(PathBuf::from(expanded)),
                }
            }
            None => dirs::home_dir()
                .map(|home| home.join(".modelforge").join("models.db"))
                .ok_or_else(|| SettingsError::InvalidConfig("home directory unavailable".into())),
        }
    }
}

/// Log output configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default level when `RUST_LOG` is unset.
    pub level: String,

    /// One of `pretty`, `compact`, `json`.
    pub format: String,

    /// Include file and line in log records.
    pub include_location: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            include_location: false,
        }
    }
}

/// HTTP API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8700".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `MODELFORGE_CONFIG`
    /// 2. `./modelforge.toml`
    /// 3. `~/.config/modelforge/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("MODELFORGE_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("modelforge.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("modelforge").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), SettingsError> {
        for (id, source) in &self.sources {
            source.driver_type()?;
            if id.trim().is_empty() {
                return Err(SettingsError::InvalidConfig("empty source id".into()));
            }
        }
        if self.query.default_row_cap == 0 || self.query.max_row_cap == 0 {
            return Err(SettingsError::InvalidConfig(
                "query row caps must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Get a source by id.
    pub fn get_source(&self, id: &str) -> Result<&SourceSettings, SettingsError> {
        self.sources
            .get(id)
            .ok_or_else(|| SettingsError::SourceNotFound(id.to_string()))
    }

    /// Whether any configured source needs the worker process.
    pub fn needs_worker(&self) -> bool {
        self.sources
            .values()
            .filter_map(|s| s.driver_type().ok())
            .any(|d| !d.is_in_process())
    }

    /// Get the worker binary path, searching common locations when unset.
    pub fn worker_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.worker.path {
            let expanded = expand_env_vars(path).ok()?;
            return Some(PathBuf::from(expanded));
        }

        let candidates = [
            "modelforge-worker",
            "./modelforge-worker",
            "./worker/modelforge-worker",
        ];

        candidates
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let mut var_name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
        } else {
            while let Some(&ch) = chars.peek() {
                if ch.is_alphanumeric() || ch == '_' {
                    var_name.push(ch);
                    chars.next();
                } else {
                    break;
                }
            }
            if var_name.is_empty() {
                // Just a lone $, keep it
                result.push('$');
                continue;
            }
        }

        let value =
            env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
        result.push_str(&value);
    }

    Ok(result)
}
