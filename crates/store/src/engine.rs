//! The single-writer SQLite log engine.
//!
//! One `LogEngine` owns the database for a store. Mutations (`execute`,
//! `batch`) are serialized behind an async lock; reads interleave between
//! writes but never run during an open write transaction. After a committed
//! mutation, the affected tables (derived from the statements' leading
//! verbs) are published to subscribed notification connections.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex as StdMutex;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, SqlitePool, TypeInfo, ValueRef};
use tokio::sync::{mpsc, Mutex};
use tracing::instrument;

use crate::changes;
use crate::error::{map_sqlx_error, StoreError};
use crate::notify::{ChangeRouter, ConnectionId, TablesChanged};
use crate::schema;

/// One statement of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatement {
    pub kind: StatementKind,
    pub sql: String,
    #[serde(default)]
    pub params: Vec<JsonValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatementKind {
    Query,
    Execute,
}

/// Result of one batch statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    /// Materialized rows for `query` statements.
    pub rows: Option<Vec<JsonValue>>,
    /// Affected row count for `execute` statements.
    pub rows_affected: Option<u64>,
}

/// Single-writer embedded SQLite engine for one store.
pub struct LogEngine {
    pool: SqlitePool,
    db_path: Option<PathBuf>,
    write_lock: Mutex<()>,
    router: StdMutex<ChangeRouter>,
}

impl LogEngine {
    /// Open (or create) the database file and bring it to schema v1.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        Self::from_options(options, Some(path)).await
    }

    /// Open an in-memory database (tests/dev). `export_main`/`import_main`
    /// are unavailable without a backing file.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| map_sqlx_error("open", e))?;
        Self::from_options(options, None).await
    }

    async fn from_options(
        options: SqliteConnectOptions,
        db_path: Option<PathBuf>,
    ) -> Result<Self, StoreError> {
        // A single connection: the engine is the only writer, and a second
        // connection to an in-memory database would see a different store.
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("open", e))?;

        schema::bootstrap(&pool).await?;

        Ok(Self {
            pool,
            db_path,
            write_lock: Mutex::new(()),
            router: StdMutex::new(ChangeRouter::new()),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // -- reads -------------------------------------------------------------

    /// Read-only statement; returns materialized rows as JSON objects keyed
    /// by column name.
    pub async fn query(
        &self,
        sql: &str,
        params: &[JsonValue],
    ) -> Result<Vec<JsonValue>, StoreError> {
        let mut query = sqlx::query(sql);
        query = bind_params(query, params)?;
        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("query", e))?;
        rows.iter().map(row_to_json).collect()
    }

    // -- writes ------------------------------------------------------------

    /// Single mutating statement. Serialized against all other mutations;
    /// publishes change hints after commit.
    #[instrument(skip(self, params), fields(sql = %truncate_sql(sql)))]
    pub async fn execute(&self, sql: &str, params: &[JsonValue]) -> Result<u64, StoreError> {
        let _write = self.write_lock.lock().await;

        let mut query = sqlx::query(sql);
        query = bind_params(query, params)?;
        let result = query
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("execute", e))?;

        self.publish_changes(changes::affected_tables([sql]));
        Ok(result.rows_affected())
    }

    /// Multiple statements in one transaction, all-or-nothing. Any failure
    /// rolls the whole batch back; no change hints are published for a
    /// rolled-back batch.
    #[instrument(skip_all, fields(statements = statements.len()))]
    pub async fn batch(
        &self,
        statements: &[BatchStatement],
    ) -> Result<Vec<BatchResult>, StoreError> {
        let _write = self.write_lock.lock().await;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("batch begin", e))?;

        let mut results = Vec::with_capacity(statements.len());
        for (index, statement) in statements.iter().enumerate() {
            let mut query = sqlx::query(&statement.sql);
            query = bind_params(query, &statement.params)?;

            let outcome = match statement.kind {
                StatementKind::Query => query.fetch_all(&mut *tx).await.and_then(|rows| {
                    Ok(BatchResult {
                        rows: Some(
                            rows.iter()
                                .map(row_to_json)
                                .collect::<Result<Vec<_>, _>>()
                                // Row materialization failures abort the batch
                                // like any statement failure.
                                .map_err(|e| sqlx::Error::Protocol(e.to_string()))?,
                        ),
                        rows_affected: None,
                    })
                }),
                StatementKind::Execute => query.execute(&mut *tx).await.map(|r| BatchResult {
                    rows: None,
                    rows_affected: Some(r.rows_affected()),
                }),
            };

            match outcome {
                Ok(result) => results.push(result),
                Err(e) => {
                    let cause = map_sqlx_error("batch statement", e);
                    if let Err(rollback) = tx.rollback().await {
                        tracing::warn!(error = %rollback, "batch rollback failed");
                    }
                    return Err(StoreError::TransactionAborted(format!(
                        "statement {index} failed: {cause}"
                    )));
                }
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("batch commit", e))?;

        let mutating = statements
            .iter()
            .filter(|s| s.kind == StatementKind::Execute)
            .map(|s| s.sql.as_str());
        self.publish_changes(changes::affected_tables(mutating));

        Ok(results)
    }

    // -- notifications -----------------------------------------------------

    /// Open a notification connection for an endpoint.
    pub fn connect_notifications(
        &self,
    ) -> (ConnectionId, mpsc::UnboundedReceiver<TablesChanged>) {
        self.router.lock().expect("router lock").register_connection()
    }

    pub fn disconnect_notifications(&self, connection: ConnectionId) {
        self.router.lock().expect("router lock").drop_connection(connection);
    }

    /// Register a named interest in a set of tables.
    pub fn subscribe_tables(
        &self,
        connection: ConnectionId,
        subscription_id: impl Into<String>,
        tables: impl IntoIterator<Item = String>,
    ) {
        self.router
            .lock()
            .expect("router lock")
            .subscribe(subscription_id, connection, tables);
    }

    pub fn unsubscribe_tables(&self, subscription_id: &str) {
        self.router
            .lock()
            .expect("router lock")
            .unsubscribe(subscription_id);
    }

    /// Serialize a typed write path (used by [`crate::log::EventLog`]) with
    /// the same lock that guards `execute`/`batch`.
    pub(crate) async fn acquire_write(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    pub(crate) fn publish_changes(&self, tables: Vec<String>) {
        if tables.is_empty() {
            return;
        }
        self.router.lock().expect("router lock").publish(&tables);
    }

    // -- maintenance -------------------------------------------------------

    /// Raw database snapshot (development). File-backed databases only.
    pub async fn export_main(&self) -> Result<Vec<u8>, StoreError> {
        let _write = self.write_lock.lock().await;
        let path = self.db_path.as_ref().ok_or_else(|| {
            StoreError::invalid_state("export_main requires a file-backed database")
        })?;

        // Flush any journaled pages so the file on disk is self-contained.
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("export checkpoint", e))?;

        tokio::fs::read(path)
            .await
            .map_err(|e| StoreError::invalid_state(format!("export_main: {e}")))
    }

    /// Raw database restore (development). Closes the engine; the caller
    /// re-opens it against the restored file.
    pub async fn import_main(&self, bytes: &[u8]) -> Result<(), StoreError> {
        let _write = self.write_lock.lock().await;
        let path = self.db_path.clone().ok_or_else(|| {
            StoreError::invalid_state("import_main requires a file-backed database")
        })?;

        self.pool.close().await;
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StoreError::invalid_state(format!("import_main: {e}")))
    }

    /// Close the database. Pending operations fail afterwards.
    pub async fn shutdown(&self) {
        self.pool.close().await;
    }
}

impl core::fmt::Debug for LogEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LogEngine")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// SQL <-> JSON plumbing
// ---------------------------------------------------------------------------

type SqliteQuery<'q> =
    sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

/// Bind JSON parameters positionally. Scalars only; nested values have no
/// SQLite representation and are rejected.
fn bind_params<'q>(
    mut query: SqliteQuery<'q>,
    params: &'q [JsonValue],
) -> Result<SqliteQuery<'q>, StoreError> {
    for param in params {
        query = match param {
            JsonValue::Null => query.bind(Option::<String>::None),
            JsonValue::Bool(b) => query.bind(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    query.bind(i)
                } else if let Some(f) = n.as_f64() {
                    query.bind(f)
                } else {
                    return Err(StoreError::validation(format!(
                        "unsupported numeric parameter: {n}"
                    )));
                }
            }
            JsonValue::String(s) => query.bind(s.as_str()),
            other => {
                return Err(StoreError::validation(format!(
                    "unsupported parameter shape: {other}"
                )))
            }
        };
    }
    Ok(query)
}

/// Materialize a row as a JSON object keyed by column name. BLOB columns
/// come back as base64url strings (JSON has no byte type).
fn row_to_json(row: &SqliteRow) -> Result<JsonValue, StoreError> {
    let mut object = serde_json::Map::with_capacity(row.columns().len());
    for column in row.columns() {
        let index = column.ordinal();
        let raw = row
            .try_get_raw(index)
            .map_err(|e| map_sqlx_error("row decode", e))?;

        let value = if raw.is_null() {
            JsonValue::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" => JsonValue::from(
                    row.try_get::<i64, _>(index)
                        .map_err(|e| map_sqlx_error("row decode", e))?,
                ),
                "REAL" => JsonValue::from(
                    row.try_get::<f64, _>(index)
                        .map_err(|e| map_sqlx_error("row decode", e))?,
                ),
                "BLOB" => JsonValue::String(
                    URL_SAFE_NO_PAD.encode(
                        row.try_get::<Vec<u8>, _>(index)
                            .map_err(|e| map_sqlx_error("row decode", e))?,
                    ),
                ),
                _ => JsonValue::String(
                    row.try_get::<String, _>(index)
                        .map_err(|e| map_sqlx_error("row decode", e))?,
                ),
            }
        };
        object.insert(column.name().to_string(), value);
    }
    Ok(JsonValue::Object(object))
}

fn truncate_sql(sql: &str) -> &str {
    let trimmed = sql.trim_start();
    match trimmed.char_indices().nth(64) {
        Some((idx, _)) => &trimmed[..idx],
        None => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn engine() -> LogEngine {
        LogEngine::in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let engine = engine().await;
        // Bootstrapping again against the same pool is a no-op.
        schema::bootstrap(engine.pool()).await.unwrap();
        assert_eq!(schema::user_version(engine.pool()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_schema_version_is_a_migration_error() {
        let engine = engine().await;
        sqlx::query("PRAGMA user_version = 7")
            .execute(engine.pool())
            .await
            .unwrap();

        let err = schema::bootstrap(engine.pool()).await.unwrap_err();
        assert!(matches!(err, StoreError::Migration(_)));
    }

    #[tokio::test]
    async fn execute_and_query_round_trip() {
        let engine = engine().await;
        let affected = engine
            .execute(
                "INSERT INTO projection_cache (projection, key, value) VALUES (?, ?, ?)",
                &[json!("p"), json!("k"), json!("{\"n\":1}")],
            )
            .await
            .unwrap();
        assert_eq!(affected, 1);

        let rows = engine
            .query(
                "SELECT projection, key, value FROM projection_cache WHERE projection = ?",
                &[json!("p")],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["projection"], json!("p"));
        assert_eq!(rows[0]["value"], json!("{\"n\":1}"));
    }

    #[tokio::test]
    async fn blob_columns_materialize_as_base64url() {
        let engine = engine().await;
        engine
            .execute(
                "INSERT INTO events (event_id, aggregate_type, aggregate_id, event_type, \
                 payload_encrypted, version, occurred_at) VALUES (?, ?, ?, ?, x'00ff', 1, 0)",
                &[json!("e-1"), json!("scope"), json!("a-1"), json!("t")],
            )
            .await
            .unwrap();

        let rows = engine
            .query("SELECT payload_encrypted FROM events", &[])
            .await
            .unwrap();
        let encoded = rows[0]["payload_encrypted"].as_str().unwrap();
        assert_eq!(URL_SAFE_NO_PAD.decode(encoded).unwrap(), vec![0u8, 0xff]);
    }

    #[tokio::test]
    async fn batch_is_all_or_nothing() {
        let engine = engine().await;
        engine
            .execute(
                "INSERT INTO projection_cache (projection, key, value) VALUES ('p', 'k0', 'v')",
                &[],
            )
            .await
            .unwrap();

        let err = engine
            .batch(&[
                BatchStatement {
                    kind: StatementKind::Execute,
                    sql: "INSERT INTO projection_cache (projection, key, value) VALUES ('p', 'k1', 'v')"
                        .to_string(),
                    params: vec![],
                },
                BatchStatement {
                    kind: StatementKind::Execute,
                    sql: "INSERT INTO missing_table (x) VALUES (1)".to_string(),
                    params: vec![],
                },
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TransactionAborted(_)));

        // The first statement's effect must not be observable.
        let rows = engine
            .query("SELECT COUNT(*) AS n FROM projection_cache", &[])
            .await
            .unwrap();
        assert_eq!(rows[0]["n"], json!(1));
    }

    #[tokio::test]
    async fn committed_mutations_notify_intersecting_subscribers() {
        let engine = engine().await;
        let (connection, mut rx) = engine.connect_notifications();
        engine.subscribe_tables(connection, "sub-1", ["projection_cache".to_string()]);

        engine
            .execute(
                "INSERT INTO projection_cache (projection, key, value) VALUES ('p', 'k', 'v')",
                &[],
            )
            .await
            .unwrap();

        let notice = rx.try_recv().unwrap();
        assert_eq!(notice.tables, vec!["PROJECTION_CACHE".to_string()]);
    }

    #[tokio::test]
    async fn rolled_back_batches_notify_nobody() {
        let engine = engine().await;
        let (connection, mut rx) = engine.connect_notifications();
        engine.subscribe_tables(connection, "sub-1", ["projection_cache".to_string()]);

        let _ = engine
            .batch(&[
                BatchStatement {
                    kind: StatementKind::Execute,
                    sql: "INSERT INTO projection_cache (projection, key, value) VALUES ('p', 'k', 'v')"
                        .to_string(),
                    params: vec![],
                },
                BatchStatement {
                    kind: StatementKind::Execute,
                    sql: "INSERT INTO missing_table (x) VALUES (1)".to_string(),
                    params: vec![],
                },
            ])
            .await
            .unwrap_err();

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_silences_a_subscription() {
        let engine = engine().await;
        let (connection, mut rx) = engine.connect_notifications();
        engine.subscribe_tables(connection, "sub-1", ["projection_cache".to_string()]);
        engine.unsubscribe_tables("sub-1");

        engine
            .execute(
                "INSERT INTO projection_cache (projection, key, value) VALUES ('p', 'k', 'v')",
                &[],
            )
            .await
            .unwrap();

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn nested_parameter_shapes_are_rejected() {
        let engine = engine().await;
        let err = engine
            .query("SELECT ?", &[json!({"nested": true})])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[tokio::test]
    async fn export_then_import_restores_the_database() {
        let dir = tempfile::tempdir().unwrap();
        let source_path = dir.path().join("source.db");

        let source = LogEngine::open(&source_path).await.unwrap();
        source
            .execute(
                "INSERT INTO projection_cache (projection, key, value) VALUES ('p', 'k', 'v')",
                &[],
            )
            .await
            .unwrap();
        let bytes = source.export_main().await.unwrap();
        assert!(!bytes.is_empty());
        source.shutdown().await;

        let target_path = dir.path().join("target.db");
        let target = LogEngine::open(&target_path).await.unwrap();
        target.import_main(&bytes).await.unwrap();

        // import_main closes the engine; reopen against the restored file.
        let restored = LogEngine::open(&target_path).await.unwrap();
        let rows = restored
            .query("SELECT COUNT(*) AS n FROM projection_cache", &[])
            .await
            .unwrap();
        assert_eq!(rows[0]["n"], json!(1));
    }

    #[tokio::test]
    async fn export_requires_a_file_backed_database() {
        let engine = engine().await;
        let err = engine.export_main().await.unwrap_err();
        assert!(matches!(err, StoreError::DbInvalidState(_)));

        let err = engine.import_main(b"bytes").await.unwrap_err();
        assert!(matches!(err, StoreError::DbInvalidState(_)));
    }

    #[tokio::test]
    async fn batch_mixes_queries_and_executes() {
        let engine = engine().await;
        let results = engine
            .batch(&[
                BatchStatement {
                    kind: StatementKind::Execute,
                    sql: "INSERT INTO projection_cache (projection, key, value) VALUES ('p', 'k', 'v')"
                        .to_string(),
                    params: vec![],
                },
                BatchStatement {
                    kind: StatementKind::Query,
                    sql: "SELECT COUNT(*) AS n FROM projection_cache".to_string(),
                    params: vec![],
                },
            ])
            .await
            .unwrap();

        assert_eq!(results[0].rows_affected, Some(1));
        let rows = results[1].rows.as_ref().unwrap();
        assert_eq!(rows[0]["n"], json!(1));
    }
}
