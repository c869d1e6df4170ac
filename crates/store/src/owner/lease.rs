//! Named exclusive lease per store identifier.
//!
//! Ownership of the database file is acquired by taking the lease for its
//! `store_id`; release happens on drop (shutdown or abnormal endpoint
//! termination). Any exclusive named-lock primitive of the host satisfies
//! this contract; the registry here is the in-process implementation.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chronicle_core::StoreId;

use crate::error::StoreError;

#[derive(Debug, Clone, Default)]
pub struct LeaseRegistry {
    held: Arc<Mutex<HashSet<StoreId>>>,
}

impl LeaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the exclusive lease for a store. Fails with `DbOwnershipError`
    /// while another owner holds it.
    pub fn acquire(&self, store_id: StoreId) -> Result<Lease, StoreError> {
        let mut held = self.held.lock().expect("lease registry lock");
        if !held.insert(store_id) {
            return Err(StoreError::ownership(format!(
                "write lease for store {store_id} is already held"
            )));
        }
        Ok(Lease {
            held: Arc::clone(&self.held),
            store_id,
        })
    }

    pub fn is_held(&self, store_id: StoreId) -> bool {
        self.held
            .lock()
            .expect("lease registry lock")
            .contains(&store_id)
    }
}

/// An acquired write lease. Dropping it releases the store.
#[derive(Debug)]
pub struct Lease {
    held: Arc<Mutex<HashSet<StoreId>>>,
    store_id: StoreId,
}

impl Lease {
    pub fn store_id(&self) -> StoreId {
        self.store_id
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.held
            .lock()
            .expect("lease registry lock")
            .remove(&self.store_id);
    }
}
