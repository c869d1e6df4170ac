//! Owner arbitration: the protocol that shares one single-writer engine
//! across many client endpoints.
//!
//! The *owner* hosts the engine and serializes every mutation; *arbiters*
//! are client endpoints that hello-handshake, then exchange
//! request/response envelopes (with advisory pre-dispatch cancellation) and
//! receive unsolicited `TablesChanged` notifications.

mod client;
mod host;
mod lease;
mod protocol;

pub use client::{ArbiterEndpoint, HelloAck, HELLO_TIMEOUT};
pub use host::{spawn_owner, EndpointId, OwnerConfig, OwnerHandle};
pub use lease::{Lease, LeaseRegistry};
pub use protocol::{
    ClientMessage, NotifyKind, OwnershipMode, ProtocolError, RequestPayload, ResponsePayload,
    ServerMessage, PROTOCOL_VERSION,
};
