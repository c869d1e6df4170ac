//! Typed access to the event log tables.
//!
//! `EventLog` is the facade the aggregate plumbing and the sync client use:
//! appends enforce per-aggregate version density, reads rebuild wire
//! records, and sync bookkeeping (`sync_event_map`, `sync_meta`) is updated
//! atomically with integration. It shares the engine's write serialization
//! and change notifications.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::Row;
use tracing::instrument;
use uuid::Uuid;

use chronicle_core::{AggregateId, EventId, SnapshotEnvelope, UserId};
use chronicle_events::EventRecord;

use crate::engine::LogEngine;
use crate::error::{map_sqlx_error, StoreError};

/// A persisted event with its store-local commit sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEventRow {
    pub commit_sequence: i64,
    pub record: EventRecord,
}

/// A remote event to integrate, already parsed from `record_json`.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEvent {
    pub global_seq: u64,
    pub record: EventRecord,
}

/// Outcome of integrating a pulled page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntegrationReport {
    /// Foreign events inserted into the local log.
    pub inserted: usize,
    /// Own events that only gained a global-sequence mapping.
    pub mapped: usize,
    /// Events that were already fully known.
    pub skipped: usize,
}

/// Typed facade over the engine for the event log tables.
#[derive(Debug, Clone)]
pub struct EventLog {
    engine: Arc<LogEngine>,
}

impl EventLog {
    pub fn new(engine: Arc<LogEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<LogEngine> {
        &self.engine
    }

    // -- append ------------------------------------------------------------

    /// Append a batch of records atomically.
    ///
    /// Versions must continue each aggregate's stream without gaps; the
    /// first hole aborts the whole batch. The `events` unique indexes back
    /// this check at the database level.
    #[instrument(skip_all, fields(records = records.len()))]
    pub async fn append_records(&self, records: &[EventRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }
        for record in records {
            record.validate()?;
        }

        let _write = self.engine.acquire_write().await;
        let mut tx = self
            .engine
            .pool()
            .begin()
            .await
            .map_err(|e| map_sqlx_error("append begin", e))?;

        let mut next_versions: HashMap<(String, String), u64> = HashMap::new();
        for record in records {
            let key = (
                record.aggregate_type.clone(),
                record.aggregate_id.to_string(),
            );
            let next = match next_versions.get(&key) {
                Some(next) => *next,
                None => {
                    let (current,): (i64,) = sqlx::query_as(
                        "SELECT COALESCE(MAX(version), 0) FROM events \
                         WHERE aggregate_type = ? AND aggregate_id = ?",
                    )
                    .bind(&key.0)
                    .bind(&key.1)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("append version check", e))?;
                    current as u64 + 1
                }
            };

            if record.version != next {
                let _ = tx.rollback().await;
                return Err(StoreError::ConstraintViolation(format!(
                    "version gap for {}/{}: got {}, expected {}",
                    key.0, key.1, record.version, next
                )));
            }
            next_versions.insert(key, next + 1);

            insert_event(&mut tx, record).await?;
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("append commit", e))?;

        self.engine.publish_changes(vec!["EVENTS".to_string()]);
        Ok(())
    }

    // -- reads -------------------------------------------------------------

    /// Full stream of one aggregate, ordered by version.
    pub async fn read_stream(
        &self,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<Vec<StoredEventRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT commit_sequence, event_id, aggregate_type, aggregate_id, event_type, \
             payload_encrypted, keyring_update, version, occurred_at, actor_id, causation_id, \
             correlation_id, epoch \
             FROM events WHERE aggregate_type = ? AND aggregate_id = ? ORDER BY version ASC",
        )
        .bind(aggregate_type)
        .bind(aggregate_id.to_string())
        .fetch_all(self.engine.pool())
        .await
        .map_err(|e| map_sqlx_error("read_stream", e))?;

        rows.iter().map(row_to_stored_event).collect()
    }

    /// Events committed locally that have no global sequence yet, in commit
    /// order — the candidates for the next push.
    pub async fn unsynced_records(&self) -> Result<Vec<StoredEventRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT e.commit_sequence, e.event_id, e.aggregate_type, e.aggregate_id, \
             e.event_type, e.payload_encrypted, e.keyring_update, e.version, e.occurred_at, \
             e.actor_id, e.causation_id, e.correlation_id, e.epoch \
             FROM events e LEFT JOIN sync_event_map m ON e.event_id = m.event_id \
             WHERE m.event_id IS NULL ORDER BY e.commit_sequence ASC",
        )
        .fetch_all(self.engine.pool())
        .await
        .map_err(|e| map_sqlx_error("unsynced_records", e))?;

        rows.iter().map(row_to_stored_event).collect()
    }

    /// The set of global sequences assigned to this store's events.
    pub async fn mapped_global_seqs(&self) -> Result<Vec<u64>, StoreError> {
        let rows = sqlx::query("SELECT global_seq FROM sync_event_map ORDER BY global_seq ASC")
            .fetch_all(self.engine.pool())
            .await
            .map_err(|e| map_sqlx_error("mapped_global_seqs", e))?;
        Ok(rows
            .iter()
            .map(|row| row.get::<i64, _>(0) as u64)
            .collect())
    }

    // -- sync bookkeeping --------------------------------------------------

    /// Record server-assigned global sequences for pushed events and advance
    /// the pull watermark to the end of the assigned range.
    pub async fn record_push_outcome(
        &self,
        remote: &str,
        assignments: &[(EventId, u64)],
    ) -> Result<(), StoreError> {
        if assignments.is_empty() {
            return Ok(());
        }
        let _write = self.engine.acquire_write().await;
        let mut tx = self
            .engine
            .pool()
            .begin()
            .await
            .map_err(|e| map_sqlx_error("record_push begin", e))?;

        let mut head = 0u64;
        for (event_id, global_seq) in assignments {
            sqlx::query("INSERT INTO sync_event_map (event_id, global_seq) VALUES (?, ?)")
                .bind(event_id.to_string())
                .bind(*global_seq as i64)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("record_push map", e))?;
            head = head.max(*global_seq);
        }
        upsert_watermark(&mut tx, remote, head).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("record_push commit", e))?;

        self.engine.publish_changes(vec![
            "SYNC_EVENT_MAP".to_string(),
            "SYNC_META".to_string(),
        ]);
        Ok(())
    }

    /// Integrate a pulled page: insert foreign events, map own events that
    /// the server has now sequenced, advance the watermark. One transaction.
    #[instrument(skip_all, fields(remote, events = events.len()))]
    pub async fn integrate_remote(
        &self,
        remote: &str,
        events: &[RemoteEvent],
    ) -> Result<IntegrationReport, StoreError> {
        if events.is_empty() {
            return Ok(IntegrationReport::default());
        }

        let _write = self.engine.acquire_write().await;
        let mut tx = self
            .engine
            .pool()
            .begin()
            .await
            .map_err(|e| map_sqlx_error("integrate begin", e))?;

        let mut report = IntegrationReport::default();
        let mut watermark = 0u64;

        for remote_event in events {
            let record = &remote_event.record;
            record.validate()?;
            watermark = watermark.max(remote_event.global_seq);

            let mapped: Option<(i64,)> =
                sqlx::query_as("SELECT global_seq FROM sync_event_map WHERE event_id = ?")
                    .bind(record.id.to_string())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("integrate map lookup", e))?;
            if mapped.is_some() {
                report.skipped += 1;
                continue;
            }

            let known: Option<(i64,)> =
                sqlx::query_as("SELECT commit_sequence FROM events WHERE event_id = ?")
                    .bind(record.id.to_string())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("integrate event lookup", e))?;

            if known.is_none() {
                insert_event(&mut tx, record).await?;
                report.inserted += 1;
            } else {
                report.mapped += 1;
            }

            sqlx::query("INSERT INTO sync_event_map (event_id, global_seq) VALUES (?, ?)")
                .bind(record.id.to_string())
                .bind(remote_event.global_seq as i64)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("integrate map insert", e))?;
        }

        upsert_watermark(&mut tx, remote, watermark).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("integrate commit", e))?;

        self.engine.publish_changes(vec![
            "EVENTS".to_string(),
            "SYNC_EVENT_MAP".to_string(),
            "SYNC_META".to_string(),
        ]);
        Ok(report)
    }

    /// Pull watermark for a remote: the highest global sequence integrated.
    pub async fn last_pulled_global_seq(&self, remote: &str) -> Result<u64, StoreError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT last_pulled_global_seq FROM sync_meta WHERE remote = ?")
                .bind(remote)
                .fetch_optional(self.engine.pool())
                .await
                .map_err(|e| map_sqlx_error("last_pulled", e))?;
        Ok(row.map(|(seq,)| seq as u64).unwrap_or(0))
    }

    // -- snapshots ---------------------------------------------------------

    /// Upsert the single snapshot row of an aggregate.
    pub async fn write_snapshot(&self, snapshot: &SnapshotEnvelope) -> Result<(), StoreError> {
        let _write = self.engine.acquire_write().await;
        sqlx::query(
            "INSERT INTO snapshots (aggregate_type, aggregate_id, version, last_global_seq, state) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT (aggregate_type, aggregate_id) DO UPDATE SET \
             version = excluded.version, last_global_seq = excluded.last_global_seq, \
             state = excluded.state",
        )
        .bind(&snapshot.aggregate_type)
        .bind(snapshot.aggregate_id.to_string())
        .bind(snapshot.version as i64)
        .bind(snapshot.last_global_seq.map(|s| s as i64))
        .bind(snapshot.state.to_string())
        .execute(self.engine.pool())
        .await
        .map_err(|e| map_sqlx_error("write_snapshot", e))?;

        self.engine.publish_changes(vec!["SNAPSHOTS".to_string()]);
        Ok(())
    }

    pub async fn read_snapshot(
        &self,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<Option<SnapshotEnvelope>, StoreError> {
        let row = sqlx::query(
            "SELECT version, last_global_seq, state FROM snapshots \
             WHERE aggregate_type = ? AND aggregate_id = ?",
        )
        .bind(aggregate_type)
        .bind(aggregate_id.to_string())
        .fetch_optional(self.engine.pool())
        .await
        .map_err(|e| map_sqlx_error("read_snapshot", e))?;

        row.map(|row| {
            let state: String = row.get("state");
            let state = serde_json::from_str(&state)
                .map_err(|e| StoreError::validation(format!("snapshot state: {e}")))?;
            Ok(SnapshotEnvelope::new(
                aggregate_id,
                aggregate_type,
                row.get::<i64, _>("version") as u64,
                row.get::<Option<i64>, _>("last_global_seq").map(|s| s as u64),
                state,
            ))
        })
        .transpose()
    }
}

async fn insert_event(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    record: &EventRecord,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO events (event_id, aggregate_type, aggregate_id, event_type, \
         payload_encrypted, keyring_update, version, occurred_at, actor_id, causation_id, \
         correlation_id, epoch) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(record.id.to_string())
    .bind(&record.aggregate_type)
    .bind(record.aggregate_id.to_string())
    .bind(&record.event_type)
    .bind(record.payload_bytes()?)
    .bind(record.keyring_update_bytes()?)
    .bind(record.version as i64)
    .bind(record.occurred_at)
    .bind(record.actor_id.map(|id| id.to_string()))
    .bind(record.causation_id.map(|id| id.to_string()))
    .bind(record.correlation_id.map(|id| id.to_string()))
    .bind(record.epoch.map(|e| e as i64))
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("insert event", e))?;
    Ok(())
}

async fn upsert_watermark(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    remote: &str,
    global_seq: u64,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO sync_meta (remote, last_pulled_global_seq) VALUES (?, ?) \
         ON CONFLICT (remote) DO UPDATE SET last_pulled_global_seq = \
         MAX(last_pulled_global_seq, excluded.last_pulled_global_seq)",
    )
    .bind(remote)
    .bind(global_seq as i64)
    .execute(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("watermark", e))?;
    Ok(())
}

fn row_to_stored_event(row: &sqlx::sqlite::SqliteRow) -> Result<StoredEventRow, StoreError> {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;

    let payload: Vec<u8> = row.get("payload_encrypted");
    let keyring_update: Option<Vec<u8>> = row.get("keyring_update");

    let record = EventRecord {
        id: EventId::from_uuid(parse_uuid(row.get("event_id"), "event_id")?),
        aggregate_type: row.get("aggregate_type"),
        aggregate_id: AggregateId::from_uuid(parse_uuid(row.get("aggregate_id"), "aggregate_id")?),
        event_type: row.get("event_type"),
        payload: URL_SAFE_NO_PAD.encode(payload),
        version: row.get::<i64, _>("version") as u64,
        occurred_at: row.get("occurred_at"),
        actor_id: parse_opt_uuid(row.get("actor_id"), "actor_id")?.map(UserId::from_uuid),
        causation_id: parse_opt_uuid(row.get("causation_id"), "causation_id")?
            .map(EventId::from_uuid),
        correlation_id: parse_opt_uuid(row.get("correlation_id"), "correlation_id")?
            .map(EventId::from_uuid),
        epoch: row.get::<Option<i64>, _>("epoch").map(|e| e as u64),
        keyring_update: keyring_update.map(|k| URL_SAFE_NO_PAD.encode(k)),
    };

    Ok(StoredEventRow {
        commit_sequence: row.get("commit_sequence"),
        record,
    })
}

fn parse_uuid(value: String, field: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(&value)
        .map_err(|e| StoreError::validation(format!("{field}: {e}")))
}

fn parse_opt_uuid(value: Option<String>, field: &str) -> Result<Option<Uuid>, StoreError> {
    value.map(|v| parse_uuid(v, field)).transpose()
}
