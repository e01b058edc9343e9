//! # execute-sync
//!
//! Incrementally replicate versioned Execute documents into a DuckDB or
//! MotherDuck warehouse, and derive relational views from the upstream's
//! self-describing schema.
//!
//! ## Features
//!
//! - **Incremental replication**: cursor-based paging, advanced only after a
//!   page is in the warehouse
//! - **Chunking**: oversized list fields are split across secondary rows
//! - **Idempotent convergence**: re-delivered documents converge through the
//!   `LATEST` projections; superseded batches are pruned
//! - **View compiler**: nested RECORD / RECORD LIST schemas become a tree of
//!   relational views
//! - **Progress tracking**: real-time progress updates via callbacks
//! - **Metrics**: built-in counters for observability
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use execute_sync::{RunMode, SyncClient, SyncConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = SyncConfig::builder()
//!         .execute_url("https://execute.example.com/")
//!         .key_id("key-id")
//!         .key_secret("key-secret")
//!         .warehouse_dsn("warehouse.duckdb")
//!         .build()?;
//!
//!     let client = SyncClient::connect(config)?;
//!     client.create_views().await?;
//!     let result = client.run(RunMode::OneShot).await?;
//!
//!     println!("Synced {} documents", result.total_documents());
//!     Ok(())
//! }
//! ```
//!
//! ## Compiling views without a warehouse
//!
//! ```rust
//! use execute_sync::schema::{DocumentSchema, FieldMetadata, FieldType, RootSchema};
//! use execute_sync::views::compile;
//!
//! let schema = RootSchema::new().with_type(
//!     "Well",
//!     DocumentSchema::new().with_field(FieldMetadata::new("NAME", FieldType::Text)),
//! );
//! let plan = compile(&schema);
//! assert!(plan.find("Well").unwrap().column("NAME").is_some());
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![deny(unsafe_code)]

pub mod chunker;
pub mod config;
pub mod cursor;
pub mod document;
pub mod error;
pub mod metrics;
pub mod motherduck;
pub mod schema;
pub mod sync;
pub mod upstream;
pub mod views;
pub mod warehouse;

// Re-exports for convenience
pub use chunker::{ChunkedDocument, Chunker, chunk_record};
pub use config::{SyncConfig, SyncConfigBuilder, WarehouseTarget};
pub use cursor::{CursorStore, FileCursorStore, SyncCursor};
pub use document::{Document, Envelope, Record};
pub use error::{Error, Result};
pub use motherduck::MotherDuckWarehouse;
pub use schema::{DocumentSchema, FieldMetadata, FieldType, RootSchema};
pub use sync::{IterationResult, RunMode, SyncClient, SyncPhase, SyncProgress, SyncResult};
pub use upstream::UpstreamClient;
pub use views::{ViewPlan, ViewPlanNode, compile};
pub use warehouse::{UploadStats, Warehouse};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
