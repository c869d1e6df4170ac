//! The local log store: a single-writer embedded SQLite engine plus the
//! owner arbitration protocol that shares it across endpoints.
//!
//! One process-local [`LogEngine`] instance (the *owner*) holds the write
//! lease for a store. Other endpoints (browser tabs, worker processes) talk
//! to it through the typed message protocol in [`owner`]: hello/handshake,
//! request/response with advisory cancellation, and unsolicited
//! `TablesChanged` notifications after committed mutations.

pub mod changes;
pub mod engine;
pub mod error;
pub mod log;
pub mod notify;
pub mod owner;
pub mod projection;
pub mod schema;

pub use engine::{BatchResult, BatchStatement, LogEngine, StatementKind};
pub use error::StoreError;
pub use log::{EventLog, IntegrationReport, RemoteEvent, StoredEventRow};
pub use notify::{ConnectionId, TablesChanged};
pub use owner::{
    spawn_owner, ArbiterEndpoint, ClientMessage, HelloAck, Lease, LeaseRegistry, NotifyKind,
    OwnerConfig, OwnerHandle, OwnershipMode, ProtocolError, RequestPayload, ResponsePayload,
    ServerMessage, PROTOCOL_VERSION,
};
pub use projection::ProjectionStore;
