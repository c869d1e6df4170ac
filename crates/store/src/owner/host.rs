//! The owner host: a single cooperative loop serializing every request.
//!
//! Endpoints attach with an outbound channel, then send typed messages. The
//! loop handles one inbound message at a time, so mutations are naturally
//! serialized and responses to one endpoint are FIFO with respect to
//! dispatch completion. Notifications are forwarded per endpoint from the
//! engine's change router and may interleave with responses.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use chronicle_core::StoreId;

use crate::engine::LogEngine;
use crate::error::StoreError;
use crate::notify::ConnectionId;

use super::lease::{Lease, LeaseRegistry};
use super::protocol::{
    ClientMessage, NotifyKind, OwnershipMode, ProtocolError, RequestPayload, ResponsePayload,
    ServerMessage, PROTOCOL_VERSION,
};

/// Identifier of an attached endpoint, local to one owner host.
pub type EndpointId = u64;

/// Static owner configuration.
#[derive(Debug, Clone)]
pub struct OwnerConfig {
    /// Store the lease is taken for.
    pub store_id: StoreId,
    /// Database name endpoints are expected to agree on.
    pub db_name: String,
    pub mode: OwnershipMode,
    /// Whether the host provides private storage (OPFS or equivalent).
    pub private_storage_available: bool,
}

pub(crate) enum HostInbound {
    Attach {
        endpoint: EndpointId,
        tx: mpsc::UnboundedSender<ServerMessage>,
    },
    Detach {
        endpoint: EndpointId,
    },
    Message {
        endpoint: EndpointId,
        message: ClientMessage,
    },
}

/// Handle to a running owner host; used to attach arbiter endpoints.
#[derive(Clone, Debug)]
pub struct OwnerHandle {
    pub(crate) inbox: mpsc::UnboundedSender<HostInbound>,
    pub(crate) next_endpoint: Arc<AtomicU64>,
}

impl OwnerHandle {
    pub(crate) fn allocate_endpoint(&self) -> EndpointId {
        self.next_endpoint.fetch_add(1, Ordering::Relaxed)
    }
}

/// Spawn the owner loop for an engine, taking the store's write lease.
pub fn spawn_owner(
    engine: Arc<LogEngine>,
    config: OwnerConfig,
    leases: &LeaseRegistry,
) -> Result<OwnerHandle, StoreError> {
    let lease = leases.acquire(config.store_id)?;
    let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

    tokio::spawn(host_loop(engine, config, lease, inbox_rx));

    Ok(OwnerHandle {
        inbox: inbox_tx,
        next_endpoint: Arc::new(AtomicU64::new(1)),
    })
}

struct EndpointState {
    tx: mpsc::UnboundedSender<ServerMessage>,
    notify_connection: ConnectionId,
    forwarder: tokio::task::JoinHandle<()>,
}

async fn host_loop(
    engine: Arc<LogEngine>,
    config: OwnerConfig,
    lease: Lease,
    mut inbox: mpsc::UnboundedReceiver<HostInbound>,
) {
    let server_instance_id = Uuid::new_v4();
    let mut established: Option<(StoreId, String)> = None;
    let mut pre_cancelled: HashSet<(EndpointId, u64)> = HashSet::new();
    let mut endpoints: HashMap<EndpointId, EndpointState> = HashMap::new();

    tracing::debug!(store_id = %lease.store_id(), %server_instance_id, "owner host started");

    while let Some(inbound) = inbox.recv().await {
        match inbound {
            HostInbound::Attach { endpoint, tx } => {
                let (notify_connection, mut notify_rx) = engine.connect_notifications();
                let notify_tx = tx.clone();
                let forwarder = tokio::spawn(async move {
                    while let Some(notice) = notify_rx.recv().await {
                        let message = ServerMessage::Notify {
                            notify_kind: NotifyKind::TablesChanged,
                            tables: notice.tables,
                        };
                        if notify_tx.send(message).is_err() {
                            break;
                        }
                    }
                });
                endpoints.insert(
                    endpoint,
                    EndpointState {
                        tx,
                        notify_connection,
                        forwarder,
                    },
                );
            }

            HostInbound::Detach { endpoint } => {
                if let Some(state) = endpoints.remove(&endpoint) {
                    engine.disconnect_notifications(state.notify_connection);
                    state.forwarder.abort();
                }
                pre_cancelled.retain(|(e, _)| *e != endpoint);
            }

            HostInbound::Message { endpoint, message } => {
                let Some(state) = endpoints.get(&endpoint) else {
                    continue;
                };

                match message {
                    ClientMessage::Hello {
                        v,
                        store_id,
                        client_instance_id,
                        db_name,
                        require_private_storage,
                    } => {
                        let reply = handle_hello(
                            &config,
                            &mut established,
                            v,
                            store_id,
                            client_instance_id,
                            &db_name,
                            require_private_storage,
                            server_instance_id,
                        );
                        let _ = state.tx.send(reply);
                    }

                    ClientMessage::Cancel {
                        v,
                        target_request_id,
                        ..
                    } => {
                        if v == PROTOCOL_VERSION {
                            // Advisory: parks the id so a not-yet-dispatched
                            // request answers CanceledError. A request that
                            // already ran has already been answered.
                            pre_cancelled.insert((endpoint, target_request_id));
                        }
                    }

                    ClientMessage::Request {
                        v,
                        request_id,
                        payload,
                    } => {
                        let shutdown = matches!(payload, RequestPayload::Shutdown);
                        let response = if v != PROTOCOL_VERSION {
                            error_response(
                                request_id,
                                &StoreError::protocol(format!(
                                    "unsupported protocol version {v}"
                                )),
                            )
                        } else if pre_cancelled.remove(&(endpoint, request_id)) {
                            error_response(request_id, &StoreError::Canceled)
                        } else if established.is_none() {
                            error_response(
                                request_id,
                                &StoreError::protocol("request before hello"),
                            )
                        } else {
                            let outcome = dispatch(
                                &engine,
                                state.notify_connection,
                                payload,
                            )
                            .await;
                            match outcome {
                                Ok(data) => ServerMessage::Response {
                                    request_id,
                                    payload: ResponsePayload::Ok { data },
                                },
                                Err(e) => error_response(request_id, &e),
                            }
                        };

                        let ok = matches!(
                            &response,
                            ServerMessage::Response {
                                payload: ResponsePayload::Ok { .. },
                                ..
                            }
                        );
                        let _ = state.tx.send(response);

                        if shutdown && ok {
                            break;
                        }
                    }
                }
            }
        }
    }

    for state in endpoints.into_values() {
        engine.disconnect_notifications(state.notify_connection);
        state.forwarder.abort();
    }
    tracing::debug!(store_id = %lease.store_id(), "owner host stopped");
    drop(lease);
}

#[allow(clippy::too_many_arguments)]
fn handle_hello(
    config: &OwnerConfig,
    established: &mut Option<(StoreId, String)>,
    v: u32,
    store_id: StoreId,
    client_instance_id: Uuid,
    db_name: &str,
    require_private_storage: bool,
    server_instance_id: Uuid,
) -> ServerMessage {
    if v != PROTOCOL_VERSION {
        return ServerMessage::HelloError {
            error: ProtocolError::from(&StoreError::protocol(format!(
                "unsupported protocol version {v}"
            ))),
        };
    }

    if require_private_storage && !config.private_storage_available {
        return ServerMessage::HelloError {
            error: ProtocolError::from(&StoreError::invalid_state(
                "private storage required but unavailable",
            )),
        };
    }

    match established {
        None => {
            *established = Some((store_id, db_name.to_string()));
            tracing::debug!(%store_id, %client_instance_id, db_name, "ownership established");
        }
        Some((expected_store, expected_db)) => {
            if *expected_store != store_id || expected_db != db_name {
                return ServerMessage::HelloError {
                    error: ProtocolError::from(&StoreError::ownership(format!(
                        "hello for ({store_id}, {db_name}) disagrees with established \
                         ({expected_store}, {expected_db})"
                    ))),
                };
            }
        }
    }

    ServerMessage::HelloOk {
        protocol_version: PROTOCOL_VERSION,
        ownership_mode: config.mode,
        server_instance_id,
    }
}

async fn dispatch(
    engine: &Arc<LogEngine>,
    notify_connection: ConnectionId,
    payload: RequestPayload,
) -> Result<serde_json::Value, StoreError> {
    match payload {
        RequestPayload::Query { sql, params } => {
            let rows = engine.query(&sql, &params).await?;
            Ok(json!({ "rows": rows }))
        }
        RequestPayload::Execute { sql, params } => {
            let rows_affected = engine.execute(&sql, &params).await?;
            Ok(json!({ "rowsAffected": rows_affected }))
        }
        RequestPayload::Batch { statements } => {
            let results = engine.batch(&statements).await?;
            Ok(json!({ "results": results }))
        }
        RequestPayload::SubscribeTables {
            subscription_id,
            tables,
        } => {
            engine.subscribe_tables(notify_connection, subscription_id, tables);
            Ok(json!({}))
        }
        RequestPayload::UnsubscribeTables { subscription_id } => {
            engine.unsubscribe_tables(&subscription_id);
            Ok(json!({}))
        }
        RequestPayload::ExportMain => {
            let bytes = engine.export_main().await?;
            Ok(json!({ "bytes": URL_SAFE_NO_PAD.encode(bytes) }))
        }
        RequestPayload::ImportMain { bytes } => {
            let bytes = URL_SAFE_NO_PAD
                .decode(&bytes)
                .map_err(|e| StoreError::validation(format!("import bytes: {e}")))?;
            engine.import_main(&bytes).await?;
            Ok(json!({}))
        }
        RequestPayload::Shutdown => {
            engine.shutdown().await;
            Ok(json!({}))
        }
    }
}

fn error_response(request_id: u64, error: &StoreError) -> ServerMessage {
    ServerMessage::Response {
        request_id,
        payload: ResponsePayload::Error {
            error: ProtocolError::from(error),
        },
    }
}
