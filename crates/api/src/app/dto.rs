//! Request DTOs and the parse-don't-validate boundary.
//!
//! Every request names a `storeId`; it must parse as a UUID v4 and equal
//! the authenticated actor's identifier. Both failures are validation
//! errors raised before the sync engine is touched.

use serde::Deserialize;

use chronicle_core::{DomainError, StoreId};
use chronicle_sync::PushEvent;

use crate::context::ActorContext;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub store_id: String,
    pub expected_head: u64,
    pub events: Vec<PushEventRequest>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEventRequest {
    pub event_id: String,
    pub record_json: String,
    #[serde(default)]
    pub scope_id: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub resource_key_id: Option<String>,
    #[serde(default)]
    pub grant_id: Option<String>,
    #[serde(default)]
    pub scope_state_ref: Option<String>,
    #[serde(default)]
    pub author_device_id: Option<String>,
}

impl From<PushEventRequest> for PushEvent {
    fn from(value: PushEventRequest) -> Self {
        PushEvent {
            event_id: value.event_id,
            record_json: value.record_json,
            scope_id: value.scope_id,
            resource_id: value.resource_id,
            resource_key_id: value.resource_key_id,
            grant_id: value.grant_id,
            scope_state_ref: value.scope_state_ref,
            author_device_id: value.author_device_id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullQuery {
    pub store_id: String,
    #[serde(default)]
    pub since: u64,
    #[serde(default = "default_pull_limit")]
    pub limit: u32,
}

fn default_pull_limit() -> u32 {
    100
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetRequest {
    pub store_id: String,
}

/// Parse and authorize a `storeId`: syntactically a UUID v4 and equal to
/// the actor's identifier.
pub fn authorized_store_id(raw: &str, actor: &ActorContext) -> Result<StoreId, DomainError> {
    let store_id = StoreId::parse(raw)?;
    if store_id.as_uuid() != actor.actor_id().as_uuid() {
        return Err(DomainError::validation(
            "storeId does not match the authenticated actor",
        ));
    }
    Ok(store_id)
}
