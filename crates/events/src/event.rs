//! Domain-agnostic event trait.

use chrono::{DateTime, Utc};

/// Minimal interface every domain event implements.
///
/// Events are immutable facts: serializable, owned, and safe to move across
/// task boundaries. The type tag is the stable registry key — changing it
/// breaks decoding of historical events.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event type tag (e.g. "keyring.scope.created").
    ///
    /// Convention: `{module}.{aggregate}.{action}`.
    fn event_type(&self) -> &'static str;

    /// When the event occurred (business time, not persistence time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
