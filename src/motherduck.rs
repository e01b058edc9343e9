//! DuckDB / MotherDuck warehouse adapter.
//!
//! Chunks land in a single `EXECUTE_DOCUMENTS` table keyed by
//! (batch date, type, id, version, chunk). Views from a [`ViewPlan`] are
//! rendered with DuckDB's JSON functions; list expansion uses `unnest`.

use crate::chunker::{Chunk, ChunkedDocument};
use crate::config::WarehouseTarget;
use crate::document::Envelope;
use crate::error::{Error, Result};
use crate::views::{
    ChunkFilter, Coercion, ColumnSource, EnvelopeColumn, JsonPath, PathRoot, ProjectionColumn,
    ViewPlan, ViewPlanNode,
};
use crate::warehouse::{
    DOCUMENTS_TABLE, LATEST_ALL_VERSIONS_VIEW, LATEST_VIEW, UploadStats, ViewApplyStats, Warehouse,
};
use duckdb::{Connection, Statement, params};
use tracing::{debug, error, info, instrument, warn};

/// Documents written per upload transaction.
const DOCUMENTS_PER_TRANSACTION: usize = 100;

const INSERT_SQL: &str = r#"INSERT OR REPLACE INTO EXECUTE_DOCUMENTS
    ("BATCH_DATE", "TYPE", "ID", "VERSION", "CHUNK", "AUTHOR", "DATE", "DELETED", "DATA")
    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#;

const BOOTSTRAP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS EXECUTE_DOCUMENTS (
    "BATCH_DATE" VARCHAR NOT NULL,
    "TYPE" VARCHAR NOT NULL,
    "ID" VARCHAR NOT NULL,
    "VERSION" BIGINT NOT NULL,
    "CHUNK" INTEGER NOT NULL,
    "AUTHOR" VARCHAR,
    "DATE" VARCHAR,
    "DELETED" BOOLEAN,
    "DATA" JSON,
    PRIMARY KEY ("BATCH_DATE", "TYPE", "ID", "VERSION", "CHUNK")
);

CREATE OR REPLACE VIEW EXECUTE_DOCUMENTS_LATEST_ALL_VERSIONS AS
SELECT ed.*
FROM EXECUTE_DOCUMENTS ed
JOIN (
    SELECT "TYPE", "ID", "VERSION", MAX("BATCH_DATE") AS "BATCH_DATE"
    FROM EXECUTE_DOCUMENTS
    GROUP BY "TYPE", "ID", "VERSION"
) m
  ON ed."TYPE" = m."TYPE" AND ed."ID" = m."ID"
 AND ed."VERSION" = m."VERSION" AND ed."BATCH_DATE" = m."BATCH_DATE";

CREATE OR REPLACE VIEW EXECUTE_DOCUMENTS_LATEST AS
SELECT lav.*
FROM EXECUTE_DOCUMENTS_LATEST_ALL_VERSIONS lav
JOIN (
    SELECT "TYPE", "ID", MAX("VERSION") AS "VERSION"
    FROM EXECUTE_DOCUMENTS_LATEST_ALL_VERSIONS
    GROUP BY "TYPE", "ID"
) m
  ON lav."TYPE" = m."TYPE" AND lav."ID" = m."ID" AND lav."VERSION" = m."VERSION";
"#;

const PRUNE_SQL: &str = r#"
DELETE FROM EXECUTE_DOCUMENTS
USING (
    SELECT "TYPE", "ID", "VERSION", MAX("BATCH_DATE") AS "BATCH_DATE"
    FROM EXECUTE_DOCUMENTS
    GROUP BY "TYPE", "ID", "VERSION"
) m
WHERE EXECUTE_DOCUMENTS."TYPE" = m."TYPE"
  AND EXECUTE_DOCUMENTS."ID" = m."ID"
  AND EXECUTE_DOCUMENTS."VERSION" = m."VERSION"
  AND EXECUTE_DOCUMENTS."BATCH_DATE" < m."BATCH_DATE"
"#;

/// Warehouse backed by DuckDB, locally or on MotherDuck.
pub struct MotherDuckWarehouse {
    conn: Connection,
    target: WarehouseTarget,
}

impl MotherDuckWarehouse {
    /// Open the warehouse described by `target`.
    #[instrument(skip(target), fields(warehouse = %describe(target)))]
    pub fn connect(target: &WarehouseTarget, create_database: bool) -> Result<Self> {
        let conn = match target {
            WarehouseTarget::InMemory => Connection::open_in_memory()
                .map_err(|e| Error::warehouse_connection("Failed to open in-memory DuckDB", e))?,
            WarehouseTarget::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                Connection::open(path).map_err(|e| {
                    Error::warehouse_connection(format!("Failed to open {}", path.display()), e)
                })?
            }
            WarehouseTarget::MotherDuck { database, token } => {
                info!("Connecting to MotherDuck...");

                // Connect without a database first so it can be created
                if create_database {
                    let init_conn = Connection::open(format!("md:?motherduck_token={token}"))
                        .map_err(|e| {
                            Error::warehouse_connection("Failed to connect to MotherDuck", e)
                        })?;
                    init_conn
                        .execute(
                            &format!("CREATE DATABASE IF NOT EXISTS {}", quote_ident(database)),
                            [],
                        )
                        .map_err(|e| {
                            Error::warehouse_query(database, "Failed to create database", e)
                        })?;
                    info!("Ensured database exists: {}", database);
                }

                Connection::open(format!("md:{database}?motherduck_token={token}"))
                    .map_err(|e| Error::warehouse_connection("Failed to connect to database", e))?
            }
        };

        let warehouse = Self {
            conn,
            target: target.clone(),
        };
        warehouse.ping()?;
        info!("Connected to warehouse: {}", describe(target));
        Ok(warehouse)
    }

    /// Open an ephemeral in-memory warehouse.
    pub fn in_memory() -> Result<Self> {
        Self::connect(&WarehouseTarget::InMemory, false)
    }

    /// Where this warehouse lives.
    pub fn target(&self) -> &WarehouseTarget {
        &self.target
    }

    /// Test connectivity.
    pub fn ping(&self) -> Result<()> {
        self.conn
            .execute("SELECT 1", [])
            .map_err(|e| Error::warehouse_query("", "Ping failed", e))?;
        Ok(())
    }

    /// Row count of a table or view.
    pub fn count_rows(&self, relation: &str) -> Result<i64> {
        let session = self.session()?;
        let query = format!("SELECT COUNT(*) FROM {}", quote_ident(relation));
        session
            .query_row(&query, [], |row| row.get(0))
            .map_err(|e| Error::warehouse_query(relation, "Count failed", e))
    }

    /// Whether a view with this name exists.
    pub fn view_exists(&self, name: &str) -> Result<bool> {
        let session = self.session()?;
        let count: i64 = session
            .query_row(
                "SELECT COUNT(*) FROM duckdb_views() WHERE view_name = ?",
                params![name],
                |row| row.get(0),
            )
            .map_err(|e| Error::warehouse_query(name, "Check view exists failed", e))?;
        Ok(count > 0)
    }

    /// A fresh connection to the same database, dropped by the caller.
    pub fn session(&self) -> Result<Connection> {
        self.conn
            .try_clone()
            .map_err(|e| Error::warehouse_connection("Failed to open warehouse session", e))
    }
}

impl Warehouse for MotherDuckWarehouse {
    #[instrument(skip(self))]
    fn bootstrap(&self) -> Result<()> {
        let session = self.session()?;
        session
            .execute_batch(BOOTSTRAP_SQL)
            .map_err(|e| Error::warehouse_query(DOCUMENTS_TABLE, "Bootstrap failed", e))?;
        debug!(
            table = DOCUMENTS_TABLE,
            views = ?[LATEST_ALL_VERSIONS_VIEW, LATEST_VIEW],
            "Bootstrapped warehouse"
        );
        Ok(())
    }

    #[instrument(skip(self, documents))]
    fn upload(
        &self,
        batch_date: &str,
        documents: &mut dyn Iterator<Item = ChunkedDocument>,
    ) -> Result<UploadStats> {
        let mut session = self.session()?;
        let mut stats = UploadStats::default();
        let mut group = Vec::with_capacity(DOCUMENTS_PER_TRANSACTION);

        for document in documents {
            stats.chunks_oversized += document.oversized;
            stats.chunks_failed += document.encode_failures;
            stats.size_warnings += document.size_warnings;

            group.push(document);
            if group.len() == DOCUMENTS_PER_TRANSACTION {
                write_group(&mut session, batch_date, &group, &mut stats)?;
                group.clear();
            }
        }
        write_group(&mut session, batch_date, &group, &mut stats)?;

        info!(
            batch_date,
            documents = stats.documents_processed,
            chunks = stats.chunks_written,
            failed = stats.chunks_failed,
            oversized = stats.chunks_oversized,
            "Uploaded page"
        );
        Ok(stats)
    }

    #[instrument(skip(self))]
    fn prune(&self) -> Result<usize> {
        let session = self.session()?;
        let removed = session
            .execute(PRUNE_SQL, [])
            .map_err(|e| Error::warehouse_query(DOCUMENTS_TABLE, "Prune failed", e))?;
        info!(removed, "Pruned superseded batches");
        Ok(removed)
    }

    #[instrument(skip(self, plan), fields(views = plan.view_count()))]
    fn apply_view_plan(&self, plan: &ViewPlan) -> Result<ViewApplyStats> {
        let session = self.session()?;
        let mut stats = ViewApplyStats::default();

        for node in plan.nodes() {
            info!("Creating Helper View `{}`", node.name);
            let sql = render_view(node);
            debug!(view = %node.name, %sql, "Rendered view");
            match session.execute_batch(&sql) {
                Ok(()) => stats.created += 1,
                Err(e) => {
                    error!(view = %node.name, error = %e, "Error creating view");
                    stats.failed.push((node.name.clone(), e.to_string()));
                }
            }
        }

        Ok(stats)
    }
}

/// Write `group` in one transaction.
///
/// DuckDB aborts a transaction on its first failed statement, so on failure
/// the group is rolled back and rewritten one chunk at a time.
fn write_group(
    session: &mut Connection,
    batch_date: &str,
    group: &[ChunkedDocument],
    stats: &mut UploadStats,
) -> Result<()> {
    if group.is_empty() {
        return Ok(());
    }
    match insert_transaction(session, batch_date, group) {
        Ok(written) => {
            stats.chunks_written += written;
            stats.documents_processed += group.iter().filter(|d| !d.chunks.is_empty()).count();
            Ok(())
        }
        Err(e) => {
            warn!(
                documents = group.len(),
                error = %e,
                "Upload transaction rolled back, writing chunks one by one"
            );
            insert_each(session, batch_date, group, stats)
        }
    }
}

fn insert_transaction(
    session: &mut Connection,
    batch_date: &str,
    group: &[ChunkedDocument],
) -> duckdb::Result<usize> {
    let tx = session.transaction()?;
    let mut written = 0;
    {
        let mut stmt = tx.prepare(INSERT_SQL)?;
        for document in group {
            for chunk in &document.chunks {
                insert_chunk(&mut stmt, batch_date, &document.envelope, chunk)?;
                written += 1;
            }
        }
    }
    tx.commit()?;
    Ok(written)
}

/// Autocommit every chunk separately so a failure skips only that chunk.
/// A session that stops answering fails the page instead.
fn insert_each(
    session: &Connection,
    batch_date: &str,
    group: &[ChunkedDocument],
    stats: &mut UploadStats,
) -> Result<()> {
    let mut stmt = session
        .prepare(INSERT_SQL)
        .map_err(|e| Error::warehouse_query(DOCUMENTS_TABLE, "Prepare insert failed", e))?;

    for document in group {
        let env = &document.envelope;
        let mut wrote_any = false;
        for chunk in &document.chunks {
            match insert_chunk(&mut stmt, batch_date, env, chunk) {
                Ok(()) => {
                    stats.chunks_written += 1;
                    wrote_any = true;
                }
                Err(e) => {
                    warn!(
                        document_id = %env.id,
                        chunk_index = chunk.index,
                        size_bytes = chunk.payload.len(),
                        error = %e,
                        "Failed to write chunk"
                    );
                    stats.chunks_failed += 1;
                    session
                        .execute_batch("SELECT 1")
                        .map_err(|e| Error::warehouse_connection("Warehouse session lost during upload", e))?;
                }
            }
        }
        if wrote_any {
            stats.documents_processed += 1;
        }
    }
    Ok(())
}

fn insert_chunk(
    stmt: &mut Statement<'_>,
    batch_date: &str,
    env: &Envelope,
    chunk: &Chunk,
) -> duckdb::Result<()> {
    stmt.execute(params![
        batch_date,
        env.doc_type,
        env.id,
        env.version,
        chunk.index as i64,
        env.author,
        env.date,
        env.deleted,
        chunk.payload
    ])?;
    Ok(())
}

/// Render the `CREATE OR REPLACE VIEW` statement for one plan node.
pub fn render_view(node: &ViewPlanNode) -> String {
    let columns = node
        .columns
        .iter()
        .map(render_column)
        .collect::<Vec<_>>()
        .join(",\n    ");

    let source = match &node.list_expansion {
        None => format!("{LATEST_VIEW} d"),
        Some(expansion) => format!(
            "(SELECT l.*, unnest(json_extract(l.\"DATA\", {})) AS \"ITEM\" FROM {LATEST_VIEW} l WHERE l.\"TYPE\" = {}) d",
            quote_literal(&format!("{}[*]", json_path(&expansion.path))),
            quote_literal(&node.doc_type),
        ),
    };

    let mut sql = format!(
        "CREATE OR REPLACE VIEW {} AS\nSELECT\n    {}\nFROM {}\nWHERE d.\"TYPE\" = {}",
        quote_ident(&node.name),
        columns,
        source,
        quote_literal(&node.doc_type),
    );
    if node.chunk_filter == ChunkFilter::BaseOnly {
        sql.push_str(" AND d.\"CHUNK\" = 0");
    }
    sql
}

fn render_column(column: &ProjectionColumn) -> String {
    let expr = match &column.source {
        ColumnSource::DocumentId => "d.\"ID\"".to_string(),
        ColumnSource::Envelope(env) => match env {
            EnvelopeColumn::Deleted => "d.\"DELETED\"".to_string(),
            EnvelopeColumn::Author => "d.\"AUTHOR\"".to_string(),
            EnvelopeColumn::Version => "d.\"VERSION\"".to_string(),
            EnvelopeColumn::Date => "d.\"DATE\"".to_string(),
        },
        ColumnSource::Payload(path) => {
            let base = match path.root() {
                PathRoot::Data => "d.\"DATA\"",
                PathRoot::Item => "d.\"ITEM\"",
            };
            let text = format!(
                "json_extract_string({base}, {})",
                quote_literal(&json_path(path))
            );
            match column.coercion {
                Coercion::Text => text,
                Coercion::Integer => format!("TRY_CAST(TRY_CAST({text} AS DOUBLE) AS BIGINT)"),
                Coercion::Decimal => format!("TRY_CAST({text} AS DOUBLE)"),
                Coercion::Boolean => format!("TRY_CAST({text} AS BOOLEAN)"),
                Coercion::DateTime => format!("TRY_CAST({text} AS TIMESTAMP)"),
            }
        }
    };
    format!("{expr} AS {}", quote_ident(&column.name))
}

/// DuckDB JSON path for a plan path, e.g. `$."LOCATION"."LAT"`.
fn json_path(path: &JsonPath) -> String {
    let mut out = String::from("$");
    for segment in path.segments() {
        out.push_str(".\"");
        out.push_str(&segment.replace('"', "\\\""));
        out.push('"');
    }
    out
}

/// Quote an identifier, doubling embedded double quotes.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote a string literal, doubling embedded single quotes.
fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn describe(target: &WarehouseTarget) -> String {
    match target {
        WarehouseTarget::InMemory => ":memory:".to_string(),
        WarehouseTarget::File(path) => path.display().to_string(),
        WarehouseTarget::MotherDuck { database, .. } => format!("md:{database}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::Chunker;
    use crate::document::{Document, Record};
    use crate::schema::{DocumentSchema, FieldMetadata, FieldType, RootSchema};
    use crate::views::compile;
    use serde_json::json;

    fn document(id: &str, version: i64, extra: serde_json::Value) -> Document {
        let mut value = json!({
            "$TYPE": "Well",
            "DOCUMENT_ID": id,
            "$VERSION": version,
            "$AUTHOR_ID": "A1",
            "$DATE": "2024-01-01T00:00:00Z",
            "$DELETED": false,
        });
        if let (Some(map), serde_json::Value::Object(extra)) = (value.as_object_mut(), extra) {
            map.extend(extra);
        }
        let record = Record::from_json_line(&value.to_string()).unwrap();
        Document::from_record(record).unwrap()
    }

    fn upload(wh: &MotherDuckWarehouse, batch: &str, docs: Vec<Document>, chunk_size: usize) -> UploadStats {
        let chunker = Chunker::new(chunk_size);
        let mut stream = docs.into_iter().map(|d| chunker.chunk_document(d));
        wh.upload(batch, &mut stream).unwrap()
    }

    fn warehouse() -> MotherDuckWarehouse {
        let wh = MotherDuckWarehouse::in_memory().unwrap();
        wh.bootstrap().unwrap();
        wh
    }

    #[test]
    fn test_bootstrap_is_idempotent() {
        let wh = warehouse();
        wh.bootstrap().unwrap();
        assert!(wh.view_exists(LATEST_VIEW).unwrap());
        assert!(wh.view_exists(LATEST_ALL_VERSIONS_VIEW).unwrap());
        assert_eq!(wh.count_rows(DOCUMENTS_TABLE).unwrap(), 0);
    }

    #[test]
    fn test_upload_counts_chunks() {
        let wh = warehouse();
        let notes: Vec<i64> = (1..=25).collect();
        let stats = upload(
            &wh,
            "2024-05-01T00:00:00Z",
            vec![document("W1", 1, json!({ "NOTES": notes })), document("W2", 1, json!({}))],
            10,
        );

        assert_eq!(stats.documents_processed, 2);
        assert_eq!(stats.chunks_written, 5);
        assert_eq!(stats.chunks_failed, 0);
        assert_eq!(wh.count_rows(DOCUMENTS_TABLE).unwrap(), 5);
    }

    #[test]
    fn test_refused_chunk_skips_only_itself() {
        let wh = warehouse();
        let chunker = Chunker::new(10);
        let mut bad = chunker.chunk_document(document("BAD", 1, json!({})));
        bad.chunks[0].payload = "{not json".to_string();
        let first = chunker.chunk_document(document("W1", 1, json!({})));
        let last = chunker.chunk_document(document("W2", 1, json!({})));

        let mut stream = vec![first, bad, last].into_iter();
        let stats = wh.upload("2024-05-01T00:00:00Z", &mut stream).unwrap();

        assert_eq!(stats.documents_processed, 2);
        assert_eq!(stats.chunks_written, 2);
        assert_eq!(stats.chunks_failed, 1);
        assert_eq!(wh.count_rows(DOCUMENTS_TABLE).unwrap(), 2);
    }

    #[test]
    fn test_size_policy_does_not_abort_upload() {
        const MIB: usize = 1024 * 1024;
        let wh = warehouse();
        let docs = vec![
            document("BIG", 1, json!({ "BLOB": "x".repeat(9 * MIB) })),
            document("HUGE", 1, json!({ "BLOB": "x".repeat(16 * MIB) })),
            document("W1", 1, json!({ "NAME": "small" })),
        ];

        let stats = upload(&wh, "2024-05-01T00:00:00Z", docs, 10000);

        assert_eq!(stats.documents_processed, 2);
        assert_eq!(stats.size_warnings, 1);
        assert_eq!(stats.chunks_oversized, 1);
        assert_eq!(stats.chunks_failed, 0);
        assert_eq!(wh.count_rows(DOCUMENTS_TABLE).unwrap(), 2);
    }

    #[test]
    fn test_reupload_converges_and_prunes() {
        let wh = warehouse();
        upload(&wh, "2024-05-01T00:00:00Z", vec![document("W1", 1, json!({"NAME": "a"}))], 10);
        upload(&wh, "2024-05-02T00:00:00Z", vec![document("W1", 1, json!({"NAME": "a"}))], 10);

        assert_eq!(wh.count_rows(DOCUMENTS_TABLE).unwrap(), 2);
        assert_eq!(wh.count_rows(LATEST_ALL_VERSIONS_VIEW).unwrap(), 1);

        let session = wh.session().unwrap();
        let batch: String = session
            .query_row(
                "SELECT \"BATCH_DATE\" FROM EXECUTE_DOCUMENTS_LATEST_ALL_VERSIONS",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(batch, "2024-05-02T00:00:00Z");
        assert_eq!(wh.count_rows(LATEST_VIEW).unwrap(), 1);

        assert_eq!(wh.prune().unwrap(), 1);
        assert_eq!(wh.count_rows(DOCUMENTS_TABLE).unwrap(), 1);
        assert_eq!(wh.count_rows(LATEST_VIEW).unwrap(), 1);
    }

    #[test]
    fn test_latest_picks_highest_version() {
        let wh = warehouse();
        upload(&wh, "2024-05-02T00:00:00Z", vec![document("W1", 1, json!({}))], 10);
        upload(&wh, "2024-05-01T00:00:00Z", vec![document("W1", 2, json!({}))], 10);

        let session = wh.session().unwrap();
        let version: i64 = session
            .query_row("SELECT \"VERSION\" FROM EXECUTE_DOCUMENTS_LATEST", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 2);
        assert_eq!(wh.prune().unwrap(), 0);
    }

    #[test]
    fn test_views_query_uploaded_documents() {
        let wh = warehouse();
        let schema = RootSchema::new().with_type(
            "Well",
            DocumentSchema::new()
                .with_field(FieldMetadata::new("NAME", FieldType::Text))
                .with_field(FieldMetadata::new("DEPTH", FieldType::Integer))
                .with_field(
                    FieldMetadata::new("CASINGS", FieldType::RecordList).with_record_type(
                        DocumentSchema::new().with_field(FieldMetadata::new("SIZE", FieldType::Decimal)),
                    ),
                ),
        );

        let casings = json!([
            {"LISTITEM_ID": "c1", "SIZE": 7.0},
            {"LISTITEM_ID": "c2", "SIZE": 9.625},
            {"LISTITEM_ID": "c3", "SIZE": 13.375}
        ]);
        upload(
            &wh,
            "2024-05-01T00:00:00Z",
            vec![document("W1", 1, json!({"NAME": "Alpha 1", "DEPTH": 3000.0, "CASINGS": casings}))],
            2,
        );

        let stats = wh.apply_view_plan(&compile(&schema)).unwrap();
        assert_eq!(stats.created, 2);
        assert!(stats.failed.is_empty(), "{:?}", stats.failed);

        let session = wh.session().unwrap();
        let (name, depth): (String, i64) = session
            .query_row("SELECT \"NAME\", \"DEPTH\" FROM \"Well\"", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(name, "Alpha 1");
        assert_eq!(depth, 3000);

        assert_eq!(wh.count_rows("Well").unwrap(), 1);
        assert_eq!(wh.count_rows("Well_CASINGS").unwrap(), 3);
    }

    #[test]
    fn test_render_quotes_literals() {
        let schema = RootSchema::new().with_type(
            "O'Brien",
            DocumentSchema::new().with_field(FieldMetadata::new("NAME", FieldType::Text)),
        );
        let plan = compile(&schema);
        let sql = render_view(&plan.roots[0]);

        assert!(sql.contains("CREATE OR REPLACE VIEW \"O'Brien\""));
        assert!(sql.contains("= 'O''Brien'"));
        assert!(sql.contains("json_extract_string(d.\"DATA\", '$.\"NAME\"') AS \"NAME\""));
        assert!(sql.ends_with("AND d.\"CHUNK\" = 0"));
    }
}
