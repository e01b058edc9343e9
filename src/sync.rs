//! Replication loop for execute-sync.
//!
//! One iteration loads the cursor, then repeatedly fetches a page, chunks and
//! uploads it, and persists the page's cursor, until the upstream reports the
//! feed is no longer truncated. All pages of an iteration share one
//! `batch_date`.

use crate::chunker::{ChunkedDocument, Chunker};
use crate::config::SyncConfig;
use crate::cursor::{CursorStore, FileCursorStore, SyncCursor};
use crate::document::{Document, Record};
use crate::error::{Error, Result};
use crate::metrics::{Metrics, Timer};
use crate::motherduck::MotherDuckWarehouse;
use crate::upstream::{UPLOAD_BATCH_BYTES, UpstreamClient};
use crate::views;
use crate::warehouse::{UploadStats, ViewApplyStats, Warehouse};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};

/// Format of the batch timestamp shared by all chunks of an iteration.
pub const BATCH_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// How long the loop keeps running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Iterate, sleeping `wait` between iterations, until shut down
    #[default]
    Continuous,
    /// Run a single iteration and return its error, if any
    OneShot,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Continuous => write!(f, "continuous"),
            RunMode::OneShot => write!(f, "one-shot"),
        }
    }
}

/// Outcome of one replication iteration.
#[derive(Debug, Clone, Serialize)]
pub struct IterationResult {
    /// Batch timestamp of every chunk written
    pub batch_date: String,
    /// Pages fetched
    pub pages: usize,
    /// Documents skipped as malformed or invalid
    pub documents_rejected: usize,
    /// Warehouse outcome summed over all pages
    pub upload: UploadStats,
    /// Cursor persisted at the end of the iteration
    pub cursor: String,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl IterationResult {
    /// Documents written to the warehouse.
    pub fn documents_synced(&self) -> usize {
        self.upload.documents_processed
    }
}

/// Outcome of a [`SyncClient::run`].
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    /// Whether every iteration succeeded
    pub success: bool,
    /// Run mode used
    pub mode: String,
    /// Iterations attempted
    pub iterations: usize,
    /// Iterations that failed
    pub failed_iterations: usize,
    /// Warehouse outcome summed over all iterations
    pub totals: UploadStats,
    /// Documents skipped over all iterations
    pub documents_rejected: usize,
    /// Last persisted cursor
    pub last_cursor: Option<String>,
    /// Timestamp when the run ended
    pub completed_at: String,
    /// Last error message, if any
    pub error: Option<String>,
}

impl SyncResult {
    fn new(mode: RunMode) -> Self {
        Self {
            success: true,
            mode: mode.to_string(),
            iterations: 0,
            failed_iterations: 0,
            totals: UploadStats::default(),
            documents_rejected: 0,
            last_cursor: None,
            completed_at: String::new(),
            error: None,
        }
    }

    fn record(&mut self, iteration: &IterationResult) {
        self.iterations += 1;
        self.totals.merge(&iteration.upload);
        self.documents_rejected += iteration.documents_rejected;
        self.last_cursor = Some(iteration.cursor.clone());
    }

    fn record_failure(&mut self, error: &Error) {
        self.iterations += 1;
        self.failed_iterations += 1;
        self.success = false;
        self.error = Some(error.to_string());
    }

    /// Total documents written.
    pub fn total_documents(&self) -> usize {
        self.totals.documents_processed
    }
}

/// Sync progress callback.
pub type ProgressCallback = Box<dyn Fn(SyncProgress) + Send + Sync>;

/// Sync progress update.
#[derive(Debug, Clone)]
pub struct SyncProgress {
    /// Batch being written
    pub batch_date: String,
    /// Current phase
    pub phase: SyncPhase,
    /// Pages completed so far in this iteration
    pub pages: usize,
    /// Documents written so far in this iteration
    pub documents_processed: usize,
    /// Cursor the next fetch will use
    pub cursor: String,
}

/// Sync phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    /// Reading the persisted cursor
    LoadingCursor,
    /// Fetching a page from the upstream
    Fetching,
    /// Writing chunks to the warehouse
    Uploading,
    /// Persisting the page cursor
    AdvancingCursor,
    /// Iteration finished
    Completed,
    /// Iteration aborted
    Failed,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPhase::LoadingCursor => write!(f, "loading cursor"),
            SyncPhase::Fetching => write!(f, "fetching"),
            SyncPhase::Uploading => write!(f, "uploading"),
            SyncPhase::AdvancingCursor => write!(f, "advancing cursor"),
            SyncPhase::Completed => write!(f, "completed"),
            SyncPhase::Failed => write!(f, "failed"),
        }
    }
}

/// Lazily turns NDJSON lines into chunked documents, skipping lines that do
/// not parse or fail envelope validation.
pub struct PageStream<'a, I> {
    lines: I,
    chunker: &'a Chunker,
    malformed: usize,
    invalid: usize,
}

impl<'a, I> PageStream<'a, I>
where
    I: Iterator,
    I::Item: AsRef<str>,
{
    /// Stream the given lines through `chunker`.
    pub fn new(lines: I, chunker: &'a Chunker) -> Self {
        Self {
            lines,
            chunker,
            malformed: 0,
            invalid: 0,
        }
    }

    /// Lines that were not JSON objects.
    pub fn malformed(&self) -> usize {
        self.malformed
    }

    /// Documents that failed envelope validation.
    pub fn invalid(&self) -> usize {
        self.invalid
    }

    /// All skipped lines.
    pub fn rejected(&self) -> usize {
        self.malformed + self.invalid
    }
}

impl<I> Iterator for PageStream<'_, I>
where
    I: Iterator,
    I::Item: AsRef<str>,
{
    type Item = ChunkedDocument;

    fn next(&mut self) -> Option<ChunkedDocument> {
        loop {
            let line = self.lines.next()?;
            let record = match Record::from_json_line(line.as_ref()) {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, "Skipping malformed document");
                    self.malformed += 1;
                    continue;
                }
            };
            match Document::from_record(record) {
                Ok(document) => return Some(self.chunker.chunk_document(document)),
                Err(e) => {
                    warn!(error = %e, "Skipping invalid document");
                    self.invalid += 1;
                }
            }
        }
    }
}

/// Main sync client.
pub struct SyncClient<W, C = FileCursorStore> {
    config: SyncConfig,
    upstream: UpstreamClient,
    warehouse: W,
    cursor: C,
    chunker: Chunker,
    metrics: Arc<Metrics>,
    progress_callback: Option<Arc<ProgressCallback>>,
}

impl SyncClient<MotherDuckWarehouse, FileCursorStore> {
    /// Create a client wired to the configured DuckDB / MotherDuck warehouse
    /// and the cursor file in the state directory.
    #[instrument(skip(config))]
    pub fn connect(config: SyncConfig) -> Result<Self> {
        info!("Initializing sync client...");
        config.validate()?;

        let target = config.warehouse.target(&config.sync.state_dir);
        let warehouse = MotherDuckWarehouse::connect(&target, config.warehouse.create_database)?;
        let cursor = FileCursorStore::new(config.sync.cursor_path());

        Self::new(config, warehouse, cursor)
    }
}

impl<W: Warehouse, C: CursorStore> SyncClient<W, C> {
    /// Create a client from explicit parts.
    pub fn new(config: SyncConfig, warehouse: W, cursor: C) -> Result<Self> {
        let upstream = UpstreamClient::new(config.upstream.clone())?;
        let chunker = Chunker::new(config.sync.chunk_size);

        Ok(Self {
            config,
            upstream,
            warehouse,
            cursor,
            chunker,
            metrics: Arc::new(Metrics::new()),
            progress_callback: None,
        })
    }

    /// Set progress callback.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(SyncProgress) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(Box::new(callback)));
        self
    }

    /// Share a metrics collector.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Metrics collected by this client.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// The warehouse this client writes to.
    pub fn warehouse(&self) -> &W {
        &self.warehouse
    }

    /// The cursor store this client advances.
    pub fn cursor_store(&self) -> &C {
        &self.cursor
    }

    /// Run the loop; in continuous mode Ctrl-C stops it between iterations.
    pub async fn run(&self, mode: RunMode) -> Result<SyncResult> {
        self.run_until(mode, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run the loop until `shutdown` resolves.
    ///
    /// Continuous mode logs failed iterations and keeps going; a zero `wait`
    /// runs a single iteration. One-shot mode returns the iteration's error.
    #[instrument(skip(self, shutdown), fields(mode = %mode))]
    pub async fn run_until<F>(&self, mode: RunMode, shutdown: F) -> Result<SyncResult>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let wait = self.config.sync.wait;
        let prune_interval = self.config.sync.prune_interval;
        let mut force = self.config.sync.force;
        let mut last_prune = Instant::now();
        let mut result = SyncResult::new(mode);

        loop {
            info!("Starting Sync");
            match self.run_iteration(force).await {
                Ok(iteration) => {
                    if iteration.documents_synced() == 0 {
                        info!("Sync Complete: No Updated Documents");
                    } else {
                        info!("Sync Complete: {} Updated Documents", iteration.documents_synced());
                    }
                    result.record(&iteration);
                    force = false;
                }
                Err(e) if mode == RunMode::OneShot => return Err(e),
                Err(e) => {
                    warn!(error = %e, code = e.code(), retryable = e.is_retryable(), "Sync Failed");
                    result.record_failure(&e);
                }
            }

            if mode == RunMode::OneShot || wait.is_zero() {
                break;
            }

            if !prune_interval.is_zero() && last_prune.elapsed() >= prune_interval {
                if let Err(e) = self.prune() {
                    warn!(error = %e, "Scheduled prune failed");
                }
                last_prune = Instant::now();
            }

            info!("Sleeping {}", humantime::format_duration(wait));
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = &mut shutdown => {
                    info!("Shutdown requested, stopping sync");
                    break;
                }
            }
        }

        result.completed_at = chrono::Utc::now().to_rfc3339();
        Ok(result)
    }

    /// Run one replication iteration.
    ///
    /// With `force` the persisted cursor is ignored and everything is
    /// replicated again from the beginning.
    pub async fn run_iteration(&self, force: bool) -> Result<IterationResult> {
        let timer = Timer::start("Sync iteration");
        let batch_date = batch_date_now();

        let outcome = self.iterate(&batch_date, force, &timer).await;
        let duration_ms = timer.stop();
        self.metrics.record_iteration(outcome.is_ok(), duration_ms);

        if let Err(ref e) = outcome {
            error!(batch_date = %batch_date, error = %e, "Sync iteration aborted");
            self.report_progress(SyncProgress {
                batch_date: batch_date.clone(),
                phase: SyncPhase::Failed,
                pages: 0,
                documents_processed: 0,
                cursor: String::new(),
            });
        }
        outcome
    }

    #[instrument(skip(self, timer))]
    async fn iterate(&self, batch_date: &str, force: bool, timer: &Timer) -> Result<IterationResult> {
        self.report(batch_date, SyncPhase::LoadingCursor, 0, 0, "");
        let mut cursor = if force {
            info!("Forcing a complete data refresh");
            SyncCursor::beginning()
        } else {
            self.cursor.load_or_beginning()?
        };

        self.warehouse.bootstrap()?;

        let mut pages = 0;
        let mut rejected = 0;
        let mut upload = UploadStats::default();

        loop {
            self.report(batch_date, SyncPhase::Fetching, pages, upload.documents_processed, cursor.as_str());
            let mut page = self.upstream.fetch_page(&cursor).await?;
            self.metrics.record_page();
            pages += 1;

            self.report(batch_date, SyncPhase::Uploading, pages, upload.documents_processed, cursor.as_str());
            loop {
                let lines = page.next_batch(UPLOAD_BATCH_BYTES).await?;
                if lines.is_empty() {
                    break;
                }
                let mut stream = PageStream::new(lines.into_iter(), &self.chunker);
                let stats = self.warehouse.upload(batch_date, &mut stream)?;

                rejected += stream.rejected();
                upload.merge(&stats);
                self.metrics.record_upload(&stats);
                self.metrics.record_rejected(stream.rejected() as u64);

                debug!(
                    page = pages,
                    documents = stats.documents_processed,
                    malformed = stream.malformed(),
                    invalid = stream.invalid(),
                    "Uploaded page batch"
                );
            }
            debug!(page = pages, bytes = page.bytes_read(), "Page complete");

            self.report(batch_date, SyncPhase::AdvancingCursor, pages, upload.documents_processed, page.next_cursor.as_str());
            self.cursor.save(&page.next_cursor)?;

            if !page.truncated {
                cursor = page.next_cursor;
                break;
            }
            if page.next_cursor == cursor {
                return Err(Error::sync(
                    format!("Upstream reported more pages but the cursor did not advance past {cursor}"),
                    upload.documents_processed,
                ));
            }
            cursor = page.next_cursor;
        }

        self.report(batch_date, SyncPhase::Completed, pages, upload.documents_processed, cursor.as_str());

        Ok(IterationResult {
            batch_date: batch_date.to_string(),
            pages,
            documents_rejected: rejected,
            upload,
            cursor: cursor.to_string(),
            duration_ms: timer.elapsed_ms(),
        })
    }

    /// Fetch the schema and (re)create every helper view.
    #[instrument(skip(self))]
    pub async fn create_views(&self) -> Result<ViewApplyStats> {
        let schema = self.upstream.fetch_schema().await?.without_inactive();
        let plan = views::compile(&schema);

        self.warehouse.bootstrap()?;
        let stats = self.warehouse.apply_view_plan(&plan)?;
        self.metrics.record_views(stats.created as u64);

        if stats.failed.is_empty() {
            info!(views = stats.created, "Views Created");
        } else {
            warn!(
                views = stats.created,
                failed = stats.failed.len(),
                "Views created with errors"
            );
        }
        Ok(stats)
    }

    /// Remove superseded batches from the warehouse.
    #[instrument(skip(self))]
    pub fn prune(&self) -> Result<usize> {
        self.warehouse.bootstrap()?;
        let removed = self.warehouse.prune()?;
        self.metrics.record_prune(removed as u64);
        Ok(removed)
    }

    /// Create views, then replicate everything from the beginning once.
    pub async fn clone_warehouse(&self) -> Result<IterationResult> {
        self.create_views().await?;
        let iteration = self.run_iteration(true).await?;
        info!("Sync Completed");
        Ok(iteration)
    }

    fn report(&self, batch_date: &str, phase: SyncPhase, pages: usize, documents: usize, cursor: &str) {
        self.report_progress(SyncProgress {
            batch_date: batch_date.to_string(),
            phase,
            pages,
            documents_processed: documents,
            cursor: cursor.to_string(),
        });
    }

    /// Report progress via callback.
    fn report_progress(&self, progress: SyncProgress) {
        if let Some(ref callback) = self.progress_callback {
            callback(progress);
        }
    }
}

/// Batch timestamp for an iteration starting now.
pub fn batch_date_now() -> String {
    chrono::Utc::now().format(BATCH_DATE_FORMAT).to_string()
}
