//! Server side of the sync protocol: global sequence assignment.
//!
//! One backend serves every store. Writes are serialized per store (the
//! sequence assignment critical section); distinct stores proceed
//! concurrently. Event bodies are stored opaquely as `record_json`.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::instrument;

use chronicle_core::StoreId;

use crate::error::{map_sqlx_error, SyncError};
use crate::types::{PullPage, PulledEvent, PushEvent, PushOutcome, SyncConflict};

/// Largest accepted `record_json`, in bytes.
const MAX_RECORD_BYTES: usize = 1 << 20;

/// Sync server storage and sequencing.
pub struct SyncBackend {
    pool: SqlitePool,
    store_locks: Mutex<HashMap<StoreId, Arc<Mutex<()>>>>,
}

impl SyncBackend {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        Self::from_options(options).await
    }

    pub async fn in_memory() -> Result<Self, SyncError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| map_sqlx_error("open", e))?;
        Self::from_options(options).await
    }

    async fn from_options(options: SqliteConnectOptions) -> Result<Self, SyncError> {
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| map_sqlx_error("open", e))?;

        for statement in [
            "CREATE TABLE IF NOT EXISTS sync_log (\
                store_id    TEXT    NOT NULL, \
                global_seq  INTEGER NOT NULL CHECK (global_seq >= 1), \
                event_id    TEXT    NOT NULL, \
                record_json TEXT    NOT NULL, \
                PRIMARY KEY (store_id, global_seq), \
                UNIQUE (store_id, event_id))",
            "CREATE TABLE IF NOT EXISTS sync_heads (\
                store_id TEXT PRIMARY KEY, \
                head     INTEGER NOT NULL CHECK (head >= 0))",
        ] {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| map_sqlx_error("schema", e))?;
        }

        Ok(Self {
            pool,
            store_locks: Mutex::new(HashMap::new()),
        })
    }

    /// The per-store critical section guarding sequence assignment.
    async fn store_lock(&self, store_id: StoreId) -> Arc<Mutex<()>> {
        let mut locks = self.store_locks.lock().await;
        Arc::clone(locks.entry(store_id).or_default())
    }

    /// Current head for a store (0 when nothing was pushed).
    pub async fn head(&self, store_id: StoreId) -> Result<u64, SyncError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT head FROM sync_heads WHERE store_id = ?")
            .bind(store_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("head", e))?;
        Ok(row.map(|(head,)| head as u64).unwrap_or(0))
    }

    /// Append a batch, assigning `head+1 ..= head+k` atomically.
    ///
    /// The transaction reads the head, compares with `expected_head`,
    /// inserts with assigned sequences, and advances the head by exactly
    /// `k`. Any conflict rolls back with the head unchanged.
    #[instrument(skip(self, events), fields(store_id = %store_id, expected_head, events = events.len()))]
    pub async fn push(
        &self,
        store_id: StoreId,
        expected_head: u64,
        events: &[PushEvent],
    ) -> Result<PushOutcome, SyncError> {
        if events.is_empty() {
            return Err(SyncError::validation("push requires at least one event"));
        }
        if let Some(conflict) = validate_events(events) {
            return Ok(PushOutcome::Conflict(conflict));
        }

        let lock = self.store_lock(store_id).await;
        let _guard = lock.lock().await;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("push begin", e))?;

        let head: u64 = sqlx::query_as::<_, (i64,)>(
            "SELECT head FROM sync_heads WHERE store_id = ?",
        )
        .bind(store_id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("push head", e))?
        .map(|(head,)| head as u64)
        .unwrap_or(0);

        if head > expected_head {
            return Ok(PushOutcome::Conflict(SyncConflict::ServerAhead { head }));
        }
        if expected_head > head {
            return Ok(PushOutcome::Conflict(SyncConflict::ClientAhead { head }));
        }

        for event in events {
            let exists: Option<(i64,)> = sqlx::query_as(
                "SELECT global_seq FROM sync_log WHERE store_id = ? AND event_id = ?",
            )
            .bind(store_id.to_string())
            .bind(&event.event_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("push duplicate check", e))?;
            if exists.is_some() {
                return Ok(PushOutcome::Conflict(SyncConflict::DuplicateEventId {
                    event_id: event.event_id.clone(),
                }));
            }
        }

        let first = head + 1;
        let mut next = first;
        for event in events {
            sqlx::query(
                "INSERT INTO sync_log (store_id, global_seq, event_id, record_json) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(store_id.to_string())
            .bind(next as i64)
            .bind(&event.event_id)
            .bind(&event.record_json)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("push insert", e))?;
            next += 1;
        }
        let last = next - 1;

        sqlx::query(
            "INSERT INTO sync_heads (store_id, head) VALUES (?, ?) \
             ON CONFLICT (store_id) DO UPDATE SET head = excluded.head",
        )
        .bind(store_id.to_string())
        .bind(last as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("push head update", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("push commit", e))?;

        tracing::debug!(first, last, "push accepted");
        Ok(PushOutcome::Accepted {
            assigned_range: (first, last),
        })
    }

    /// Read a page of the store's log past `since`.
    pub async fn pull(
        &self,
        store_id: StoreId,
        since: u64,
        limit: u32,
    ) -> Result<PullPage, SyncError> {
        if limit == 0 {
            return Err(SyncError::validation("pull limit must be >= 1"));
        }

        let head = self.head(store_id).await?;
        let rows = sqlx::query(
            "SELECT global_seq, event_id, record_json FROM sync_log \
             WHERE store_id = ? AND global_seq > ? ORDER BY global_seq ASC LIMIT ?",
        )
        .bind(store_id.to_string())
        .bind(since as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("pull", e))?;

        let events: Vec<PulledEvent> = rows
            .iter()
            .map(|row| PulledEvent {
                global_sequence: row.get::<i64, _>("global_seq") as u64,
                event_id: row.get("event_id"),
                record_json: row.get("record_json"),
            })
            .collect();

        let last_returned = events.last().map(|e| e.global_sequence);
        let has_more = last_returned.map(|last| last < head).unwrap_or(false);

        Ok(PullPage {
            has_more,
            next_since: if has_more { last_returned } else { None },
            events,
            head,
        })
    }

    /// Purge a store's log server-side (development).
    pub async fn reset(&self, store_id: StoreId) -> Result<(), SyncError> {
        let lock = self.store_lock(store_id).await;
        let _guard = lock.lock().await;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("reset begin", e))?;
        for statement in [
            "DELETE FROM sync_log WHERE store_id = ?",
            "DELETE FROM sync_heads WHERE store_id = ?",
        ] {
            sqlx::query(statement)
                .bind(store_id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("reset", e))?;
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("reset commit", e))?;
        Ok(())
    }
}

/// Pre-transaction shape checks; violations are `invalid_record` conflicts.
fn validate_events(events: &[PushEvent]) -> Option<SyncConflict> {
    let mut seen: HashSet<&str> = HashSet::new();
    for event in events {
        if event.event_id.is_empty() {
            return Some(SyncConflict::InvalidRecord {
                detail: "eventId must be non-empty".to_string(),
            });
        }
        if !seen.insert(event.event_id.as_str()) {
            return Some(SyncConflict::DuplicateEventId {
                event_id: event.event_id.clone(),
            });
        }
        if event.record_json.len() > MAX_RECORD_BYTES {
            return Some(SyncConflict::InvalidRecord {
                detail: format!("recordJson exceeds {MAX_RECORD_BYTES} bytes"),
            });
        }
        if serde_json::from_str::<serde_json::Value>(&event.record_json).is_err() {
            return Some(SyncConflict::InvalidRecord {
                detail: "recordJson is not valid JSON".to_string(),
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn backend() -> SyncBackend {
        SyncBackend::in_memory().await.unwrap()
    }

    fn event(id: &str) -> PushEvent {
        PushEvent::new(id, format!("{{\"id\":\"{id}\"}}"))
    }

    #[tokio::test]
    async fn push_then_pull_round_trip() {
        let backend = backend().await;
        let store = StoreId::new();

        let outcome = backend.push(store, 0, &[event("a")]).await.unwrap();
        assert_eq!(
            outcome,
            PushOutcome::Accepted {
                assigned_range: (1, 1)
            }
        );

        let page = backend.pull(store, 0, 100).await.unwrap();
        assert_eq!(page.head, 1);
        assert!(!page.has_more);
        assert_eq!(page.next_since, None);
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.events[0].global_sequence, 1);
        assert_eq!(page.events[0].event_id, "a");
    }

    #[tokio::test]
    async fn stale_expected_head_is_server_ahead_then_rebase_succeeds() {
        let backend = backend().await;
        let store = StoreId::new();
        backend.push(store, 0, &[event("a")]).await.unwrap();

        // Same expected head again: the server is ahead and says where.
        let outcome = backend.push(store, 0, &[event("b")]).await.unwrap();
        assert_eq!(
            outcome,
            PushOutcome::Conflict(SyncConflict::ServerAhead { head: 1 })
        );

        // Retrying with the corrected head assigns the next sequence.
        let outcome = backend.push(store, 1, &[event("b")]).await.unwrap();
        assert_eq!(
            outcome,
            PushOutcome::Accepted {
                assigned_range: (2, 2)
            }
        );

        let page = backend.pull(store, 0, 100).await.unwrap();
        let seqs: Vec<u64> = page.events.iter().map(|e| e.global_sequence).collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[tokio::test]
    async fn duplicate_event_id_is_rejected_and_head_unchanged() {
        let backend = backend().await;
        let store = StoreId::new();
        backend.push(store, 0, &[event("a")]).await.unwrap();

        let outcome = backend.push(store, 1, &[event("a")]).await.unwrap();
        assert_eq!(
            outcome,
            PushOutcome::Conflict(SyncConflict::DuplicateEventId {
                event_id: "a".to_string()
            })
        );
        assert_eq!(backend.head(store).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn client_ahead_is_its_own_conflict() {
        let backend = backend().await;
        let store = StoreId::new();

        let outcome = backend.push(store, 5, &[event("a")]).await.unwrap();
        assert_eq!(
            outcome,
            PushOutcome::Conflict(SyncConflict::ClientAhead { head: 0 })
        );
    }

    #[tokio::test]
    async fn pushes_advance_the_head_by_exactly_k() {
        let backend = backend().await;
        let store = StoreId::new();

        let outcome = backend
            .push(store, 0, &[event("a"), event("b"), event("c")])
            .await
            .unwrap();
        assert_eq!(
            outcome,
            PushOutcome::Accepted {
                assigned_range: (1, 3)
            }
        );
        assert_eq!(backend.head(store).await.unwrap(), 3);

        // The assigned set is dense: {1..head}.
        let page = backend.pull(store, 0, 100).await.unwrap();
        let seqs: Vec<u64> = page.events.iter().map(|e| e.global_sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn pull_pages_in_ascending_order() {
        let backend = backend().await;
        let store = StoreId::new();
        let events: Vec<PushEvent> = (0..5).map(|i| event(&format!("e{i}"))).collect();
        backend.push(store, 0, &events).await.unwrap();

        let first = backend.pull(store, 0, 2).await.unwrap();
        assert_eq!(first.head, 5);
        assert!(first.has_more);
        assert_eq!(first.next_since, Some(2));
        assert_eq!(
            first.events.iter().map(|e| e.global_sequence).collect::<Vec<_>>(),
            vec![1, 2]
        );

        let second = backend.pull(store, 2, 2).await.unwrap();
        assert!(second.has_more);
        assert_eq!(second.next_since, Some(4));

        let last = backend.pull(store, 4, 2).await.unwrap();
        assert!(!last.has_more);
        assert_eq!(last.next_since, None);
        assert_eq!(last.events.len(), 1);
    }

    #[tokio::test]
    async fn stores_are_sequenced_independently() {
        let backend = backend().await;
        let store_a = StoreId::new();
        let store_b = StoreId::new();

        backend.push(store_a, 0, &[event("a1")]).await.unwrap();
        let outcome = backend.push(store_b, 0, &[event("b1")]).await.unwrap();
        assert_eq!(
            outcome,
            PushOutcome::Accepted {
                assigned_range: (1, 1)
            }
        );

        // Same event id in a different store is not a duplicate.
        let outcome = backend.push(store_b, 1, &[event("a1")]).await.unwrap();
        assert!(matches!(outcome, PushOutcome::Accepted { .. }));
    }

    #[tokio::test]
    async fn malformed_records_are_invalid_record_conflicts() {
        let backend = backend().await;
        let store = StoreId::new();

        let outcome = backend
            .push(store, 0, &[PushEvent::new("a", "not json")])
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            PushOutcome::Conflict(SyncConflict::InvalidRecord { .. })
        ));

        let outcome = backend
            .push(store, 0, &[PushEvent::new("", "{}")])
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            PushOutcome::Conflict(SyncConflict::InvalidRecord { .. })
        ));
    }

    #[tokio::test]
    async fn empty_push_is_a_validation_error() {
        let backend = backend().await;
        let err = backend.push(StoreId::new(), 0, &[]).await.unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[tokio::test]
    async fn reset_purges_the_store() {
        let backend = backend().await;
        let store = StoreId::new();
        backend.push(store, 0, &[event("a")]).await.unwrap();

        backend.reset(store).await.unwrap();
        assert_eq!(backend.head(store).await.unwrap(), 0);
        let page = backend.pull(store, 0, 10).await.unwrap();
        assert!(page.events.is_empty());

        // The sequence restarts at 1 after a reset.
        let outcome = backend.push(store, 0, &[event("a")]).await.unwrap();
        assert_eq!(
            outcome,
            PushOutcome::Accepted {
                assigned_range: (1, 1)
            }
        );
    }
}
