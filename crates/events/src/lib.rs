//! Event envelope, wire record, and the payload field codec.
//!
//! Events cross three boundaries — the local log, the sync wire, and
//! snapshots — so their representation is centralized here: typed metadata in
//! [`EventMetadata`]/[`EventEnvelope`], the JSON wire shape in
//! [`EventRecord`], and the per-field bijective mappers in [`codec`]. The
//! [`SpecRegistry`] keys encode/decode pairs by event type tag.

pub mod codec;
pub mod envelope;
pub mod event;
pub mod record;
pub mod registry;

pub use codec::CodecError;
pub use envelope::{EventEnvelope, EventMetadata};
pub use event::Event;
pub use record::EventRecord;
pub use registry::{EventSpec, RegistryError, SpecRegistry};
