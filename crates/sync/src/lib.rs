//! The sync protocol engine: push/pull between client stores and the
//! server-assigned global order.
//!
//! The server side ([`SyncBackend`]) assigns a strictly monotonic, dense
//! global sequence per store and classifies conflicts (`server_ahead`,
//! `client_ahead`, `duplicate_event_id`, `invalid_record`). The client side
//! ([`SyncClient`]) pushes locally committed events with an expected head,
//! pulls pages to integrate, and rebases on `server_ahead` under a bounded
//! retry budget.

pub mod client;
pub mod error;
pub mod server;
pub mod types;

pub use client::{PushReport, SyncClient, SyncClientConfig, SyncTransport};
pub use error::SyncError;
pub use server::SyncBackend;
pub use types::{PullPage, PulledEvent, PushEvent, PushOutcome, SyncConflict};
