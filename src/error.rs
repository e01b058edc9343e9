//! Error types for execute-sync.
//!
//! Per-document and per-chunk problems never surface here; they are counted
//! and skipped by the replication loop. An [`Error`] aborts the operation it
//! came from.

use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for execute-sync operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or unusable settings
    #[error("Configuration error: {message}")]
    Config {
        /// What was being attempted
        message: String,
        /// Underlying failure
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Upstream request failed before a status was received, or the
    /// response was unusable
    #[error("Upstream request error: {message}")]
    Upstream {
        /// What was being attempted
        message: String,
        /// Underlying failure
        #[source]
        source: Option<reqwest::Error>,
    },

    /// Upstream answered with a non-success status
    #[error("Upstream returned unexpected status {status} for {url}")]
    UpstreamStatus {
        /// HTTP status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// DuckDB / MotherDuck could not be opened or attached
    #[error("Warehouse connection error: {message}")]
    WarehouseConnection {
        /// What was being attempted
        message: String,
        /// Underlying failure
        #[source]
        source: Option<duckdb::Error>,
    },

    /// Statement against a warehouse table or view failed
    #[error("Warehouse query error on '{object}': {message}")]
    WarehouseQuery {
        /// Table or view name
        object: String,
        /// What was being attempted
        message: String,
        /// Underlying failure
        #[source]
        source: Option<duckdb::Error>,
    },

    /// Document schema from the upstream could not be parsed
    #[error("Schema error: {message}")]
    Schema {
        /// Parser message
        message: String,
    },

    /// Document envelope or configuration value failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {message}")]
    Serialization {
        /// What was being attempted
        message: String,
        /// Underlying failure
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Iteration aborted after partial progress
    #[error("Sync error: {message}")]
    Sync {
        /// What was being attempted
        message: String,
        /// Documents uploaded (and covered by a saved cursor) before the abort
        documents_synced: usize,
    },

    /// Cursor file or log file I/O
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Settings problem without an underlying cause.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Settings problem caused by a parse or render failure.
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Upstream error without an underlying transport failure, e.g. a
    /// missing response header.
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
            source: None,
        }
    }

    /// Transport failure reported by reqwest.
    pub fn upstream_http(message: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Upstream {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Non-success HTTP status for `url`.
    pub fn upstream_status(status: u16, url: impl Into<String>) -> Self {
        Self::UpstreamStatus {
            status,
            url: url.into(),
        }
    }

    /// DuckDB open / attach failure.
    pub fn warehouse_connection(message: impl Into<String>, source: duckdb::Error) -> Self {
        Self::WarehouseConnection {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Failure of a statement touching `object` (table or view name).
    pub fn warehouse_query(
        object: impl Into<String>,
        message: impl Into<String>,
        source: duckdb::Error,
    ) -> Self {
        Self::WarehouseQuery {
            object: object.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Unparseable document schema.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Rejected document envelope or setting.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// JSON encode / decode failure.
    pub fn serialization(message: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Serialization {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Iteration abort after `documents_synced` documents were uploaded.
    pub fn sync(message: impl Into<String>, documents_synced: usize) -> Self {
        Self::Sync {
            message: message.into(),
            documents_synced,
        }
    }

    /// Whether the next scheduled iteration can be expected to succeed
    /// without operator action. Nothing is retried inside an iteration.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Upstream { .. } | Error::WarehouseConnection { .. } | Error::Io(_) => true,
            Error::UpstreamStatus { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Stable label for logs and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "CONFIG_ERROR",
            Error::Upstream { .. } => "UPSTREAM_ERROR",
            Error::UpstreamStatus { .. } => "UPSTREAM_STATUS",
            Error::WarehouseConnection { .. } => "WH_CONNECTION_ERROR",
            Error::WarehouseQuery { .. } => "WH_QUERY_ERROR",
            Error::Schema { .. } => "SCHEMA_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Serialization { .. } => "SERIALIZATION_ERROR",
            Error::Sync { .. } => "SYNC_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }
}
