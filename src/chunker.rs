//! Splitting of oversized array fields into secondary chunks.
//!
//! Chunk 0 holds the document minus every top-level array longer than the
//! chunk size. Each further chunk holds `{DOCUMENT_ID, <field>: <slice>}` for
//! one slice of one such array. Fields are processed in name order and slices
//! in array order, so chunk indices are stable for a given document.
//!
//! Arrays nested inside records are never inspected.

use crate::document::{Document, Envelope, FIELD_DOCUMENT_ID, Record};
use serde_json::Value;
use tracing::{debug, error, info, warn};

const MIB: usize = 1024 * 1024;

/// Serialized chunks at or above this size are logged as warnings.
pub const WARNING_CHUNK_BYTES: usize = 8 * MIB;
/// Recommended maximum payload size of a warehouse variant column.
pub const RECOMMENDED_CHUNK_BYTES: usize = 10 * MIB;
/// Serialized chunks at or above this size are rejected.
pub const MAX_CHUNK_BYTES: usize = 15 * MIB;

/// Size class of a serialized chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    /// Below every threshold
    Normal,
    /// At or above [`WARNING_CHUNK_BYTES`]
    Large,
    /// At or above [`RECOMMENDED_CHUNK_BYTES`]
    OverRecommended,
    /// At or above [`MAX_CHUNK_BYTES`]; never written
    Rejected,
}

impl SizeClass {
    /// Classify a serialized size in bytes.
    pub fn classify(size_bytes: usize) -> Self {
        if size_bytes >= MAX_CHUNK_BYTES {
            SizeClass::Rejected
        } else if size_bytes >= RECOMMENDED_CHUNK_BYTES {
            SizeClass::OverRecommended
        } else if size_bytes >= WARNING_CHUNK_BYTES {
            SizeClass::Large
        } else {
            SizeClass::Normal
        }
    }
}

/// Split a record into its base record followed by array slices.
///
/// A `chunk_size` of 0 disables chunking.
pub fn chunk_record(mut record: Record, chunk_size: usize) -> Vec<Record> {
    if chunk_size == 0 {
        return vec![record];
    }

    let mut oversized: Vec<String> = record
        .iter()
        .filter(|(_, value)| matches!(value, Value::Array(items) if items.len() > chunk_size))
        .map(|(field, _)| field.clone())
        .collect();
    oversized.sort();

    if oversized.is_empty() {
        return vec![record];
    }

    let document_id = record.get(FIELD_DOCUMENT_ID).cloned().unwrap_or(Value::Null);
    let mut pieces = Vec::new();

    for field in oversized {
        let Some(Value::Array(items)) = record.remove(&field) else {
            continue;
        };
        debug!(
            document_id = %document_id,
            field = %field,
            list_size = items.len(),
            chunk_size,
            "Chunking large list"
        );
        for slice in items.chunks(chunk_size) {
            let mut piece = Record::new();
            piece.insert(FIELD_DOCUMENT_ID, document_id.clone());
            piece.insert(field.clone(), Value::Array(slice.to_vec()));
            pieces.push(piece);
        }
    }

    let mut chunks = Vec::with_capacity(pieces.len() + 1);
    chunks.push(record);
    chunks.extend(pieces);
    chunks
}

/// One serialized chunk ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position of this chunk within its document (0 = base record)
    pub index: usize,
    /// Serialized JSON payload
    pub payload: String,
}

impl Chunk {
    /// Serialized size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.payload.len()
    }
}

/// A document after chunking and size policy.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkedDocument {
    /// Envelope shared by every chunk
    pub envelope: Envelope,
    /// Accepted chunks in index order; rejected indices are absent
    pub chunks: Vec<Chunk>,
    /// Chunks accepted with a size warning
    pub size_warnings: usize,
    /// Chunks rejected by the size policy
    pub oversized: usize,
    /// Chunks that could not be serialized
    pub encode_failures: usize,
}

impl ChunkedDocument {
    /// Chunks that will not reach the warehouse.
    pub fn rejected(&self) -> usize {
        self.oversized + self.encode_failures
    }
}

/// Applies chunking and the size policy to validated documents.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
}

impl Chunker {
    /// Create a chunker for the given array chunk size.
    pub fn new(chunk_size: usize) -> Self {
        Self { chunk_size }
    }

    /// Configured chunk size.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Chunk a document and serialize every chunk, dropping the ones the size
    /// policy rejects.
    pub fn chunk_document(&self, document: Document) -> ChunkedDocument {
        let (envelope, data) = document.into_parts();
        let records = chunk_record(data, self.chunk_size);

        let mut chunked = ChunkedDocument {
            envelope,
            chunks: Vec::with_capacity(records.len()),
            size_warnings: 0,
            oversized: 0,
            encode_failures: 0,
        };

        debug!(
            document_id = %chunked.envelope.id,
            chunk_count = records.len(),
            "Created chunks for document"
        );

        for (index, record) in records.into_iter().enumerate() {
            let bytes = match record.to_json_bytes() {
                Ok(bytes) => bytes,
                Err(e) => {
                    error!(document_id = %chunked.envelope.id, chunk_index = index, error = %e, "JSON marshaling failed");
                    chunked.encode_failures += 1;
                    continue;
                }
            };
            let payload = match String::from_utf8(bytes) {
                Ok(payload) => payload,
                Err(e) => {
                    error!(document_id = %chunked.envelope.id, chunk_index = index, error = %e, "JSON is not UTF-8");
                    chunked.encode_failures += 1;
                    continue;
                }
            };

            let size = payload.len();
            let size_mb = size as f64 / MIB as f64;
            match SizeClass::classify(size) {
                SizeClass::Rejected => {
                    error!(
                        document_id = %chunked.envelope.id,
                        chunk_index = index,
                        size_bytes = size,
                        size_mb,
                        limit_mb = MAX_CHUNK_BYTES / MIB,
                        "JSON object exceeds extreme size limit, skipping chunk"
                    );
                    chunked.oversized += 1;
                    continue;
                }
                SizeClass::OverRecommended => {
                    warn!(
                        document_id = %chunked.envelope.id,
                        chunk_index = index,
                        size_bytes = size,
                        size_mb,
                        "Large JSON object detected, may impact warehouse performance"
                    );
                    info!(
                        document_id = %chunked.envelope.id,
                        chunk_index = index,
                        recommended_mb = RECOMMENDED_CHUNK_BYTES / MIB,
                        "Chunk exceeds the recommended variant size"
                    );
                    chunked.size_warnings += 1;
                }
                SizeClass::Large => {
                    warn!(
                        document_id = %chunked.envelope.id,
                        chunk_index = index,
                        size_bytes = size,
                        size_mb,
                        "Large JSON object detected, may impact warehouse performance"
                    );
                    chunked.size_warnings += 1;
                }
                SizeClass::Normal => {}
            }

            chunked.chunks.push(Chunk { index, payload });
        }

        chunked
    }
}
