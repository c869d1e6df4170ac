//! Client side of the sync protocol: push pending, pull to head, rebase.

use async_trait::async_trait;

use chronicle_core::{EventId, StoreId};
use chronicle_events::EventRecord;
use chronicle_store::{EventLog, RemoteEvent};

use crate::error::SyncError;
use crate::server::SyncBackend;
use crate::types::{PullPage, PushEvent, PushOutcome, SyncConflict};

/// Transport abstraction over the two sync RPCs. The backend implements it
/// directly for in-process deployments; an HTTP client implements it at the
/// edge.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn push(
        &self,
        store_id: StoreId,
        expected_head: u64,
        events: Vec<PushEvent>,
    ) -> Result<PushOutcome, SyncError>;

    async fn pull(
        &self,
        store_id: StoreId,
        since: u64,
        limit: u32,
    ) -> Result<PullPage, SyncError>;
}

#[async_trait]
impl<T> SyncTransport for std::sync::Arc<T>
where
    T: SyncTransport + ?Sized,
{
    async fn push(
        &self,
        store_id: StoreId,
        expected_head: u64,
        events: Vec<PushEvent>,
    ) -> Result<PushOutcome, SyncError> {
        (**self).push(store_id, expected_head, events).await
    }

    async fn pull(
        &self,
        store_id: StoreId,
        since: u64,
        limit: u32,
    ) -> Result<PullPage, SyncError> {
        (**self).pull(store_id, since, limit).await
    }
}

#[async_trait]
impl SyncTransport for SyncBackend {
    async fn push(
        &self,
        store_id: StoreId,
        expected_head: u64,
        events: Vec<PushEvent>,
    ) -> Result<PushOutcome, SyncError> {
        SyncBackend::push(self, store_id, expected_head, &events).await
    }

    async fn pull(
        &self,
        store_id: StoreId,
        since: u64,
        limit: u32,
    ) -> Result<PullPage, SyncError> {
        SyncBackend::pull(self, store_id, since, limit).await
    }
}

#[derive(Debug, Clone)]
pub struct SyncClientConfig {
    /// Name of the remote in `sync_meta` bookkeeping.
    pub remote: String,
    /// Page size for pulls.
    pub pull_limit: u32,
    /// Rebase retries before a conflict is reported as persistent.
    pub max_rebase_attempts: u32,
}

impl Default for SyncClientConfig {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            pull_limit: 100,
            max_rebase_attempts: 5,
        }
    }
}

/// Outcome of one push cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PushReport {
    pub pushed: usize,
    pub assigned_range: Option<(u64, u64)>,
    /// Server-ahead rounds absorbed before acceptance.
    pub rebases: u32,
}

/// Drives a local store against a sync transport.
pub struct SyncClient<T> {
    store_id: StoreId,
    log: EventLog,
    transport: T,
    config: SyncClientConfig,
}

impl<T: SyncTransport> SyncClient<T> {
    pub fn new(store_id: StoreId, log: EventLog, transport: T, config: SyncClientConfig) -> Self {
        Self {
            store_id,
            log,
            transport,
            config,
        }
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Push every locally committed event that has no global sequence yet.
    ///
    /// On `server_ahead` the client pulls to the server's head, integrates,
    /// and retries with the corrected expected head, up to the configured
    /// budget. Exhaustion surfaces as [`SyncError::RebaseExhausted`].
    pub async fn push_pending(&self) -> Result<PushReport, SyncError> {
        let pending = self.log.unsynced_records().await?;
        if pending.is_empty() {
            return Ok(PushReport::default());
        }

        let event_ids: Vec<EventId> = pending.iter().map(|e| e.record.id).collect();
        let events: Vec<PushEvent> = pending
            .iter()
            .map(|e| push_event_from_record(&e.record))
            .collect();

        let mut rebases = 0u32;
        loop {
            let expected_head = self.log.last_pulled_global_seq(&self.config.remote).await?;
            let outcome = self
                .transport
                .push(self.store_id, expected_head, events.clone())
                .await?;

            match outcome {
                PushOutcome::Accepted {
                    assigned_range: (first, last),
                } => {
                    let assignments: Vec<(EventId, u64)> =
                        event_ids.iter().copied().zip(first..=last).collect();
                    self.log
                        .record_push_outcome(&self.config.remote, &assignments)
                        .await?;
                    tracing::debug!(first, last, rebases, "push accepted");
                    return Ok(PushReport {
                        pushed: events.len(),
                        assigned_range: Some((first, last)),
                        rebases,
                    });
                }

                PushOutcome::Conflict(SyncConflict::ServerAhead { head }) => {
                    if rebases >= self.config.max_rebase_attempts {
                        return Err(SyncError::RebaseExhausted {
                            attempts: rebases,
                            server_head: head,
                        });
                    }
                    rebases += 1;
                    tracing::debug!(server_head = head, rebases, "server ahead, rebasing");
                    self.pull_to_head().await?;
                }

                PushOutcome::Conflict(conflict) => {
                    return Err(SyncError::Conflict(conflict));
                }
            }
        }
    }

    /// Pull pages until the server's head is integrated locally.
    pub async fn pull_to_head(&self) -> Result<(), SyncError> {
        loop {
            let since = self.log.last_pulled_global_seq(&self.config.remote).await?;
            let page = self
                .transport
                .pull(self.store_id, since, self.config.pull_limit)
                .await?;

            if page.events.is_empty() {
                return Ok(());
            }

            let remote_events: Vec<RemoteEvent> = page
                .events
                .iter()
                .map(|e| {
                    let record = EventRecord::decode_json(&e.record_json)
                        .map_err(|err| SyncError::validation(format!("pulled record: {err}")))?;
                    Ok(RemoteEvent {
                        global_seq: e.global_sequence,
                        record,
                    })
                })
                .collect::<Result<_, SyncError>>()?;

            let report = self
                .log
                .integrate_remote(&self.config.remote, &remote_events)
                .await?;
            tracing::debug!(
                inserted = report.inserted,
                mapped = report.mapped,
                skipped = report.skipped,
                head = page.head,
                "integrated pulled page"
            );

            if !page.has_more {
                return Ok(());
            }
        }
    }
}

fn push_event_from_record(record: &EventRecord) -> PushEvent {
    PushEvent::new(record.id.to_string(), record.encode_json())
}
