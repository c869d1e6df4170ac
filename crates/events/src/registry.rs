//! Registry of event specs, keyed by event type tag.
//!
//! A spec binds a type tag to the (encode, decode) pair for one payload
//! variant of the closed union `E`. The registry is populated once at
//! startup; registering the same tag twice is a configuration error, not a
//! last-write-wins overwrite.

use std::collections::HashMap;

use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::codec::CodecError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Two specs claimed the same type tag; the registry configuration is
    /// broken and startup must not proceed.
    #[error("duplicate event spec for tag '{0}'")]
    DuplicateTag(String),

    #[error("no event spec registered for tag '{0}'")]
    UnknownTag(String),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Encode/decode pair for one event type.
#[derive(Debug)]
pub struct EventSpec<E> {
    pub event_type: &'static str,
    pub encode: fn(&E) -> Result<JsonValue, CodecError>,
    pub decode: fn(&JsonValue) -> Result<E, CodecError>,
}

/// Set of event specs keyed by type tag.
#[derive(Debug)]
pub struct SpecRegistry<E> {
    specs: HashMap<&'static str, EventSpec<E>>,
}

impl<E> SpecRegistry<E> {
    pub fn new() -> Self {
        Self {
            specs: HashMap::new(),
        }
    }

    /// Build a registry from a spec list, failing on duplicate tags.
    pub fn with_specs(
        specs: impl IntoIterator<Item = EventSpec<E>>,
    ) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for spec in specs {
            registry.register(spec)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, spec: EventSpec<E>) -> Result<(), RegistryError> {
        if self.specs.contains_key(spec.event_type) {
            return Err(RegistryError::DuplicateTag(spec.event_type.to_string()));
        }
        self.specs.insert(spec.event_type, spec);
        Ok(())
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.specs.contains_key(event_type)
    }

    pub fn event_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.specs.keys().copied()
    }

    fn spec(&self, event_type: &str) -> Result<&EventSpec<E>, RegistryError> {
        self.specs
            .get(event_type)
            .ok_or_else(|| RegistryError::UnknownTag(event_type.to_string()))
    }

    pub fn encode(&self, event_type: &str, payload: &E) -> Result<JsonValue, RegistryError> {
        Ok((self.spec(event_type)?.encode)(payload)?)
    }

    pub fn decode(&self, event_type: &str, value: &JsonValue) -> Result<E, RegistryError> {
        Ok((self.spec(event_type)?.decode)(value)?)
    }
}

impl<E> Default for SpecRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}
