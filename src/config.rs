//! Configuration types and builders for execute-sync.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use url::Url;
use validator::Validate;

/// Prefix shared by every environment variable the crate reads.
pub const ENV_PREFIX: &str = "EXECUTESYNC_";

/// Name of the cursor file kept in the state directory.
pub const CURSOR_FILE_NAME: &str = "last_sync_date.txt";

/// Main configuration for the sync client.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SyncConfig {
    /// Upstream document API configuration
    #[validate(nested)]
    pub upstream: UpstreamConfig,

    /// Warehouse connection configuration
    #[serde(default)]
    #[validate(nested)]
    pub warehouse: WarehouseConfig,

    /// Sync behavior configuration
    #[serde(default)]
    #[validate(nested)]
    pub sync: SyncBehaviorConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SyncConfig {
    /// Create a new configuration builder.
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Load configuration from `EXECUTESYNC_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::builder();

        if let Some(url) = env_var("EXECUTE_URL") {
            builder = builder.execute_url(url);
        }
        if let Some(key_id) = env_var("EXECUTE_APIKEY_ID") {
            builder = builder.key_id(key_id);
        }
        if let Some(secret) = env_var("EXECUTE_APIKEY_SECRET") {
            builder = builder.key_secret(secret);
        }
        if let Some(max) = parse_env::<usize>("MAX_DOCUMENTS")? {
            builder = builder.max_documents(max);
        }
        if let Some(chunk_size) = parse_env::<usize>("CHUNK_SIZE")? {
            builder = builder.chunk_size(chunk_size);
        }
        if let Some(calcs) = parse_env::<bool>("INCLUDE_CALCS")? {
            builder = builder.include_calcs(calcs);
        }
        if let Some(force) = parse_env::<bool>("FORCE")? {
            builder = builder.force(force);
        }
        if let Some(dir) = env_var("STATE_DIR") {
            builder = builder.state_dir(dir);
        }
        if let Some(wait) = env_var("WAIT") {
            builder = builder.wait(parse_duration("WAIT", &wait)?);
        }
        if let Some(interval) = env_var("PRUNE_INTERVAL") {
            builder = builder.prune_interval(parse_duration("PRUNE_INTERVAL", &interval)?);
        }
        if let Some(dsn) = env_var("DATABASE_DSN") {
            builder = builder.warehouse_dsn(dsn);
        }
        if let Some(token) = env_var("MOTHERDUCK_TOKEN") {
            builder = builder.motherduck_token(token);
        }
        if let Some(db) = env_var("MOTHERDUCK_DATABASE") {
            builder = builder.motherduck_database(db);
        }
        if let Some(level) = env_var("LOG_LEVEL") {
            builder = builder.log_level(level);
        }

        builder.build()
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read {}: {}", path.display(), e)))?;

        Self::from_toml_str(&content)
            .map_err(|e| Error::config(format!("Failed to load {}: {}", path.display(), e)))
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::config_with_source("Failed to parse TOML", e))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self)
            .map_err(|e| Error::validation(format!("Config validation failed: {}", e)))?;

        Url::parse(&self.upstream.url)
            .map_err(|e| Error::validation(format!("Invalid Execute URL: {}", e)))?;

        Ok(())
    }

    /// Render the configuration as TOML with all secrets left out.
    pub fn to_redacted_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| Error::config_with_source("Failed to render configuration", e))
    }
}

/// Upstream (Execute) API configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpstreamConfig {
    /// Base URL of the Execute API
    #[validate(length(min = 1))]
    pub url: String,

    /// API key id (basic auth user)
    #[validate(length(min = 1))]
    pub key_id: String,

    /// API key secret (basic auth password)
    #[validate(length(min = 1))]
    #[serde(skip_serializing)]
    pub key_secret: String,

    /// Maximum number of documents per fetched page
    #[validate(range(min = 1, max = 100000))]
    #[serde(default = "default_max_documents")]
    pub max_documents: usize,

    /// Include calculated fields in fetches
    #[serde(default)]
    pub include_calcs: bool,

    /// Request timeout in seconds
    #[validate(range(min = 1))]
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl UpstreamConfig {
    /// Request timeout as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Warehouse (DuckDB / MotherDuck) connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct WarehouseConfig {
    /// DuckDB database path, or `:memory:`. Defaults to `execute.duckdb` in
    /// the state directory.
    #[serde(default)]
    pub dsn: Option<String>,

    /// MotherDuck access token; when set the warehouse is MotherDuck
    #[serde(default, skip_serializing)]
    pub motherduck_token: Option<String>,

    /// MotherDuck database name
    #[validate(length(min = 1, max = 128))]
    #[serde(default = "default_database")]
    pub database: String,

    /// Create the MotherDuck database if it does not exist
    #[serde(default = "default_true")]
    pub create_database: bool,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            dsn: None,
            motherduck_token: None,
            database: default_database(),
            create_database: true,
        }
    }
}

/// Where the warehouse lives, resolved from [`WarehouseConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarehouseTarget {
    /// Ephemeral in-process database
    InMemory,
    /// Local DuckDB file
    File(PathBuf),
    /// MotherDuck hosted database
    MotherDuck {
        /// Database name
        database: String,
        /// Access token
        token: String,
    },
}

impl WarehouseConfig {
    /// Resolve the connection target; file databases default into `state_dir`.
    pub fn target(&self, state_dir: &Path) -> WarehouseTarget {
        if let Some(token) = self.motherduck_token.as_ref().filter(|t| !t.is_empty()) {
            return WarehouseTarget::MotherDuck {
                database: self.database.clone(),
                token: token.clone(),
            };
        }
        match self.dsn.as_deref() {
            Some(":memory:") => WarehouseTarget::InMemory,
            Some(dsn) if !dsn.is_empty() => WarehouseTarget::File(PathBuf::from(dsn)),
            _ => WarehouseTarget::File(state_dir.join(default_duckdb_file())),
        }
    }
}

/// Sync behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SyncBehaviorConfig {
    /// Array fields longer than this are split into chunks
    #[validate(range(min = 1, max = 1000000))]
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Delay between iterations in continuous mode (0 = run once)
    #[serde(default = "default_wait", with = "humantime_serde")]
    pub wait: Duration,

    /// Directory holding the cursor file (and the default DuckDB file)
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Ignore the persisted cursor and refetch everything
    #[serde(default)]
    pub force: bool,

    /// How often continuous mode prunes superseded batches (0 = never)
    #[serde(default = "default_prune_interval", with = "humantime_serde")]
    pub prune_interval: Duration,
}

impl Default for SyncBehaviorConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            wait: default_wait(),
            state_dir: default_state_dir(),
            force: false,
            prune_interval: default_prune_interval(),
        }
    }
}

impl SyncBehaviorConfig {
    /// Path of the persisted cursor file.
    pub fn cursor_path(&self) -> PathBuf {
        self.state_dir.join(CURSOR_FILE_NAME)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: quiet, info, debug (or any EnvFilter directive)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format
    #[serde(default)]
    pub format: LogFormat,

    /// Also append logs to this file
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::Text,
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Translate the level name into an `EnvFilter` directive.
    pub fn filter_directive(&self) -> &str {
        match self.level.to_lowercase().as_str() {
            "quiet" => "warn",
            "debug" => "debug",
            "info" | "" => "info",
            _ => self.level.as_str(),
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text format (default)
    #[default]
    Text,
    /// JSON format
    Json,
}

/// Builder for SyncConfig.
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    execute_url: Option<String>,
    key_id: Option<String>,
    key_secret: Option<String>,
    max_documents: Option<usize>,
    include_calcs: Option<bool>,
    chunk_size: Option<usize>,
    wait: Option<Duration>,
    state_dir: Option<PathBuf>,
    force: Option<bool>,
    prune_interval: Option<Duration>,
    warehouse_dsn: Option<String>,
    motherduck_token: Option<String>,
    motherduck_database: Option<String>,
    log_level: Option<String>,
}

impl SyncConfigBuilder {
    /// Set the Execute API base URL.
    pub fn execute_url(mut self, url: impl Into<String>) -> Self {
        self.execute_url = Some(url.into());
        self
    }

    /// Set the API key id.
    pub fn key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    /// Set the API key secret.
    pub fn key_secret(mut self, secret: impl Into<String>) -> Self {
        self.key_secret = Some(secret.into());
        self
    }

    /// Set the page size limit.
    pub fn max_documents(mut self, max: usize) -> Self {
        self.max_documents = Some(max);
        self
    }

    /// Include calculated fields.
    pub fn include_calcs(mut self, calcs: bool) -> Self {
        self.include_calcs = Some(calcs);
        self
    }

    /// Set the array chunk size.
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size);
        self
    }

    /// Set the delay between iterations.
    pub fn wait(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }

    /// Set the state directory.
    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = Some(dir.into());
        self
    }

    /// Force a full refresh.
    pub fn force(mut self, force: bool) -> Self {
        self.force = Some(force);
        self
    }

    /// Set the prune interval.
    pub fn prune_interval(mut self, interval: Duration) -> Self {
        self.prune_interval = Some(interval);
        self
    }

    /// Set the DuckDB database path.
    pub fn warehouse_dsn(mut self, dsn: impl Into<String>) -> Self {
        self.warehouse_dsn = Some(dsn.into());
        self
    }

    /// Set the MotherDuck access token.
    pub fn motherduck_token(mut self, token: impl Into<String>) -> Self {
        self.motherduck_token = Some(token.into());
        self
    }

    /// Set the MotherDuck database name.
    pub fn motherduck_database(mut self, db: impl Into<String>) -> Self {
        self.motherduck_database = Some(db.into());
        self
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    /// Build the SyncConfig.
    pub fn build(self) -> Result<SyncConfig> {
        let url = self
            .execute_url
            .ok_or_else(|| Error::config("EXECUTE_URL is required"))?;
        Url::parse(&url).map_err(|e| Error::config(format!("Invalid Execute URL: {}", e)))?;

        let key_id = self
            .key_id
            .ok_or_else(|| Error::config("EXECUTE_APIKEY_ID is required"))?;
        let key_secret = self
            .key_secret
            .ok_or_else(|| Error::config("EXECUTE_APIKEY_SECRET is required"))?;

        let config = SyncConfig {
            upstream: UpstreamConfig {
                url,
                key_id,
                key_secret,
                max_documents: self.max_documents.unwrap_or_else(default_max_documents),
                include_calcs: self.include_calcs.unwrap_or(false),
                timeout_secs: default_timeout_secs(),
            },
            warehouse: WarehouseConfig {
                dsn: self.warehouse_dsn,
                motherduck_token: self.motherduck_token,
                database: self.motherduck_database.unwrap_or_else(default_database),
                ..Default::default()
            },
            sync: SyncBehaviorConfig {
                chunk_size: self.chunk_size.unwrap_or_else(default_chunk_size),
                wait: self.wait.unwrap_or_else(default_wait),
                state_dir: self.state_dir.unwrap_or_else(default_state_dir),
                force: self.force.unwrap_or(false),
                prune_interval: self.prune_interval.unwrap_or_else(default_prune_interval),
            },
            logging: LoggingConfig {
                level: self.log_level.unwrap_or_else(default_log_level),
                ..Default::default()
            },
        };

        config.validate()?;
        Ok(config)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn parse_env<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    env_var(name)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| {
                Error::config(format!("Invalid value for {ENV_PREFIX}{name}: {e}"))
            })
        })
        .transpose()
}

/// Parse a duration; bare integers are seconds.
fn parse_duration(name: &str, raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(raw)
        .map_err(|e| Error::config(format!("Invalid duration for {ENV_PREFIX}{name}: {e}")))
}

/// Serde adapter storing durations as humantime strings ("10m", "600s").
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Seconds(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
            Raw::Text(text) => {
                humantime::parse_duration(&text).map_err(serde::de::Error::custom)
            }
        }
    }
}

// Defaults
fn default_max_documents() -> usize {
    1000
}
fn default_timeout_secs() -> u64 {
    300
}
fn default_database() -> String {
    "execute".into()
}
fn default_duckdb_file() -> &'static str {
    "execute.duckdb"
}
fn default_chunk_size() -> usize {
    10000
}
fn default_wait() -> Duration {
    Duration::from_secs(600)
}
fn default_state_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_prune_interval() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}
fn default_log_level() -> String {
    "info".into()
}
fn default_true() -> bool {
    true
}
