//! Arbiter endpoint: the client side of the owner protocol.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use uuid::Uuid;

use chronicle_core::StoreId;

use crate::error::StoreError;
use crate::notify::TablesChanged;

use super::host::{EndpointId, HostInbound, OwnerHandle};
use super::protocol::{
    ClientMessage, OwnershipMode, RequestPayload, ResponsePayload, ServerMessage,
    PROTOCOL_VERSION,
};

/// Successful hello reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloAck {
    pub protocol_version: u32,
    pub ownership_mode: OwnershipMode,
    pub server_instance_id: Uuid,
}

/// One client endpoint of the owner protocol.
///
/// Requests are answered FIFO per endpoint; `Notify` messages interleave and
/// are buffered until drained with [`ArbiterEndpoint::next_notification`].
pub struct ArbiterEndpoint {
    endpoint_id: EndpointId,
    to_host: mpsc::UnboundedSender<HostInbound>,
    from_host: mpsc::UnboundedReceiver<ServerMessage>,
    next_request_id: u64,
    buffered_notifications: VecDeque<TablesChanged>,
    buffered_responses: HashMap<u64, ResponsePayload>,
}

/// Bounded handshake window.
pub const HELLO_TIMEOUT: Duration = Duration::from_secs(5);

impl OwnerHandle {
    /// Attach a new arbiter endpoint to this owner.
    pub fn connect(&self) -> ArbiterEndpoint {
        let endpoint_id = self.allocate_endpoint();
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = self.inbox.send(HostInbound::Attach {
            endpoint: endpoint_id,
            tx,
        });

        ArbiterEndpoint {
            endpoint_id,
            to_host: self.inbox.clone(),
            from_host: rx,
            next_request_id: 1,
            buffered_notifications: VecDeque::new(),
            buffered_responses: HashMap::new(),
        }
    }
}

impl ArbiterEndpoint {
    /// Perform the hello handshake. Times out after [`HELLO_TIMEOUT`].
    pub async fn hello(
        &mut self,
        store_id: StoreId,
        client_instance_id: Uuid,
        db_name: impl Into<String>,
        require_private_storage: bool,
    ) -> Result<HelloAck, StoreError> {
        self.send(ClientMessage::Hello {
            v: PROTOCOL_VERSION,
            store_id,
            client_instance_id,
            db_name: db_name.into(),
            require_private_storage,
        });

        let reply = tokio::time::timeout(HELLO_TIMEOUT, self.recv_hello_reply())
            .await
            .map_err(|_| StoreError::invalid_state("hello timed out"))??;
        Ok(reply)
    }

    /// Send a request and await its response.
    pub async fn request(&mut self, payload: RequestPayload) -> Result<JsonValue, StoreError> {
        let request_id = self.send_request(payload);
        self.await_response(request_id).await
    }

    /// Fire a request without waiting; pair with
    /// [`ArbiterEndpoint::await_response`]. Used when a `Cancel` must be
    /// issued between send and completion.
    pub fn send_request(&mut self, payload: RequestPayload) -> u64 {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.send(ClientMessage::Request {
            v: PROTOCOL_VERSION,
            request_id,
            payload,
        });
        request_id
    }

    /// Ask the owner to drop a request that has not started executing.
    pub fn send_cancel(&mut self, target_request_id: u64) {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        self.send(ClientMessage::Cancel {
            v: PROTOCOL_VERSION,
            request_id,
            target_request_id,
        });
    }

    /// Await the response for a specific request id, buffering interleaved
    /// notifications and out-of-order responses.
    pub async fn await_response(&mut self, request_id: u64) -> Result<JsonValue, StoreError> {
        if let Some(payload) = self.buffered_responses.remove(&request_id) {
            return Self::unwrap_response(payload);
        }

        loop {
            let message = self.from_host.recv().await.ok_or_else(|| {
                StoreError::invalid_state("owner terminated before responding")
            })?;
            match message {
                ServerMessage::Notify { tables, .. } => {
                    self.buffered_notifications.push_back(TablesChanged { tables });
                }
                ServerMessage::Response {
                    request_id: got,
                    payload,
                } => {
                    if got == request_id {
                        return Self::unwrap_response(payload);
                    }
                    self.buffered_responses.insert(got, payload);
                }
                // A stray hello reply outside the handshake window.
                ServerMessage::HelloOk { .. } | ServerMessage::HelloError { .. } => {}
            }
        }
    }

    /// Next `TablesChanged` notice, waiting up to `timeout`.
    pub async fn next_notification(&mut self, timeout: Duration) -> Option<TablesChanged> {
        if let Some(notice) = self.buffered_notifications.pop_front() {
            return Some(notice);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let message = tokio::time::timeout_at(deadline, self.from_host.recv())
                .await
                .ok()??;
            match message {
                ServerMessage::Notify { tables, .. } => {
                    return Some(TablesChanged { tables });
                }
                ServerMessage::Response {
                    request_id,
                    payload,
                } => {
                    self.buffered_responses.insert(request_id, payload);
                }
                ServerMessage::HelloOk { .. } | ServerMessage::HelloError { .. } => {}
            }
        }
    }

    fn unwrap_response(payload: ResponsePayload) -> Result<JsonValue, StoreError> {
        match payload {
            ResponsePayload::Ok { data } => Ok(data),
            ResponsePayload::Error { error } => Err(error.into_store_error()),
        }
    }

    async fn recv_hello_reply(&mut self) -> Result<HelloAck, StoreError> {
        loop {
            let message = self
                .from_host
                .recv()
                .await
                .ok_or_else(|| StoreError::invalid_state("owner terminated during hello"))?;
            match message {
                ServerMessage::HelloOk {
                    protocol_version,
                    ownership_mode,
                    server_instance_id,
                } => {
                    return Ok(HelloAck {
                        protocol_version,
                        ownership_mode,
                        server_instance_id,
                    })
                }
                ServerMessage::HelloError { error } => return Err(error.into_store_error()),
                ServerMessage::Notify { tables, .. } => {
                    self.buffered_notifications.push_back(TablesChanged { tables });
                }
                ServerMessage::Response {
                    request_id,
                    payload,
                } => {
                    self.buffered_responses.insert(request_id, payload);
                }
            }
        }
    }

    fn send(&self, message: ClientMessage) {
        let _ = self.to_host.send(HostInbound::Message {
            endpoint: self.endpoint_id,
            message,
        });
    }
}

impl Drop for ArbiterEndpoint {
    fn drop(&mut self) {
        let _ = self.to_host.send(HostInbound::Detach {
            endpoint: self.endpoint_id,
        });
    }
}
