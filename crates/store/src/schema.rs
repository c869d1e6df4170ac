//! Schema v1 and the idempotent bootstrap.

use sqlx::SqlitePool;

use crate::error::{map_sqlx_error, StoreError};

/// Current schema version, mirrored in `PRAGMA user_version`.
pub const SCHEMA_VERSION: i64 = 1;

/// Schema v1 DDL. Applied in order inside one transaction.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // The append-only event log. `commit_sequence` is the store-local total
    // order; `(aggregate_type, aggregate_id, version)` is dense and unique.
    r#"
    CREATE TABLE IF NOT EXISTS events (
        commit_sequence INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id        TEXT    NOT NULL UNIQUE,
        aggregate_type  TEXT    NOT NULL,
        aggregate_id    TEXT    NOT NULL,
        event_type      TEXT    NOT NULL,
        payload_encrypted BLOB  NOT NULL,
        keyring_update  BLOB,
        version         INTEGER NOT NULL CHECK (version >= 1),
        occurred_at     INTEGER NOT NULL CHECK (occurred_at >= 0),
        actor_id        TEXT,
        causation_id    TEXT,
        correlation_id  TEXT,
        epoch           INTEGER
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_events_aggregate_version
        ON events(aggregate_type, aggregate_id, version)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS snapshots (
        aggregate_type  TEXT    NOT NULL,
        aggregate_id    TEXT    NOT NULL,
        version         INTEGER NOT NULL,
        last_global_seq INTEGER,
        state           TEXT    NOT NULL,
        PRIMARY KEY (aggregate_type, aggregate_id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS projection_cache (
        projection TEXT NOT NULL,
        key        TEXT NOT NULL,
        value      TEXT NOT NULL,
        PRIMARY KEY (projection, key)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS projection_meta (
        projection           TEXT PRIMARY KEY,
        last_commit_sequence INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sync_meta (
        remote                 TEXT PRIMARY KEY,
        last_pulled_global_seq INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sync_event_map (
        event_id   TEXT PRIMARY KEY,
        global_seq INTEGER NOT NULL
    )
    "#,
];

/// Bring the database to schema v1.
///
/// Transactional and idempotent: `user_version` 0 applies the schema and
/// sets the marker; the current version is a no-op; anything else is a
/// `MigrationError`.
pub async fn bootstrap(pool: &SqlitePool) -> Result<(), StoreError> {
    let current = user_version(pool).await?;
    match current {
        0 => apply_schema(pool).await,
        SCHEMA_VERSION => Ok(()),
        other => Err(StoreError::Migration(format!(
            "unsupported schema version {other} (expected 0 or {SCHEMA_VERSION})"
        ))),
    }
}

pub async fn user_version(pool: &SqlitePool) -> Result<i64, StoreError> {
    let (version,): (i64,) = sqlx::query_as("PRAGMA user_version")
        .fetch_one(pool)
        .await
        .map_err(|e| map_sqlx_error("user_version", e))?;
    Ok(version)
}

async fn apply_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| map_sqlx_error("schema begin", e))?;

    for statement in SCHEMA_STATEMENTS {
        sqlx::query(statement)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("schema apply", e))?;
    }

    sqlx::query(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("schema version", e))?;

    tx.commit()
        .await
        .map_err(|e| map_sqlx_error("schema commit", e))?;

    tracing::info!(version = SCHEMA_VERSION, "schema bootstrapped");
    Ok(())
}
