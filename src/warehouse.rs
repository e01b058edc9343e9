//! Warehouse adapter boundary.
//!
//! The replication loop and the view compiler only talk to a warehouse through
//! [`Warehouse`]. Adapters own physical storage, SQL dialect and escaping.

use crate::chunker::ChunkedDocument;
use crate::error::Result;
use crate::views::ViewPlan;
use serde::Serialize;

/// Name of the table every chunk is stored in.
pub const DOCUMENTS_TABLE: &str = "EXECUTE_DOCUMENTS";
/// Latest batch per (type, id, version).
pub const LATEST_ALL_VERSIONS_VIEW: &str = "EXECUTE_DOCUMENTS_LATEST_ALL_VERSIONS";
/// Latest version per (type, id).
pub const LATEST_VIEW: &str = "EXECUTE_DOCUMENTS_LATEST";

/// Outcome of uploading one page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UploadStats {
    /// Documents with at least one chunk written
    pub documents_processed: usize,
    /// Chunks written
    pub chunks_written: usize,
    /// Chunks the warehouse refused
    pub chunks_failed: usize,
    /// Chunks dropped by the size policy before reaching the warehouse
    pub chunks_oversized: usize,
    /// Chunks accepted with a size warning
    pub size_warnings: usize,
}

impl UploadStats {
    /// Fold another page's numbers into this one.
    pub fn merge(&mut self, other: &UploadStats) {
        self.documents_processed += other.documents_processed;
        self.chunks_written += other.chunks_written;
        self.chunks_failed += other.chunks_failed;
        self.chunks_oversized += other.chunks_oversized;
        self.size_warnings += other.size_warnings;
    }
}

/// Outcome of applying a view plan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ViewApplyStats {
    /// Views created or replaced
    pub created: usize,
    /// Views that failed, with the error message
    pub failed: Vec<(String, String)>,
}

/// Capabilities the core needs from a warehouse.
///
/// Implementations acquire a session per call and release it on every exit
/// path; dropping an uncommitted upload must leave the warehouse unchanged.
pub trait Warehouse {
    /// Create the documents table and the latest projections. Idempotent.
    fn bootstrap(&self) -> Result<()>;

    /// Store every chunk of `documents` under `batch_date`.
    ///
    /// A chunk the warehouse refuses is skipped and counted in the returned
    /// stats. An error means the warehouse itself failed; the caller must not
    /// advance the cursor past these documents.
    fn upload(
        &self,
        batch_date: &str,
        documents: &mut dyn Iterator<Item = ChunkedDocument>,
    ) -> Result<UploadStats>;

    /// Delete rows that are not the latest batch of their version.
    /// Returns the number of rows removed.
    fn prune(&self) -> Result<usize>;

    /// Create or replace every view of the plan.
    fn apply_view_plan(&self, plan: &ViewPlan) -> Result<ViewApplyStats>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_stats_merge() {
        let mut total = UploadStats::default();
        total.merge(&UploadStats {
            documents_processed: 2,
            chunks_written: 5,
            chunks_failed: 1,
            chunks_oversized: 0,
            size_warnings: 1,
        });
        total.merge(&UploadStats {
            documents_processed: 1,
            chunks_written: 1,
            chunks_failed: 0,
            chunks_oversized: 2,
            size_warnings: 0,
        });

        assert_eq!(total.documents_processed, 3);
        assert_eq!(total.chunks_written, 6);
        assert_eq!(total.chunks_failed, 1);
        assert_eq!(total.chunks_oversized, 2);
        assert_eq!(total.size_warnings, 1);
    }
}
