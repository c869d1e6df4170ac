//! Post-commit table-change notification fan-out.
//!
//! Connections register an outbound channel; subscriptions bind a named
//! interest in a table set to a connection. After a committed mutation the
//! engine publishes the affected tables to every connection whose
//! subscriptions intersect. Delivery is best-effort and at-least-once per
//! affected table per transaction; dead connections are dropped on publish.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Identifier of a notification connection (one per endpoint).
pub type ConnectionId = u64;

/// The unsolicited change notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TablesChanged {
    /// Affected table names, uppercase, deduplicated.
    pub tables: Vec<String>,
}

#[derive(Debug)]
struct SubscriptionEntry {
    connection: ConnectionId,
    tables: HashSet<String>,
}

/// Registry of connections and their table subscriptions.
#[derive(Debug, Default)]
pub struct ChangeRouter {
    connections: HashMap<ConnectionId, mpsc::UnboundedSender<TablesChanged>>,
    subscriptions: HashMap<String, SubscriptionEntry>,
    next_connection: ConnectionId,
}

impl ChangeRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_connection(&mut self) -> (ConnectionId, mpsc::UnboundedReceiver<TablesChanged>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_connection;
        self.next_connection += 1;
        self.connections.insert(id, tx);
        (id, rx)
    }

    pub fn drop_connection(&mut self, connection: ConnectionId) {
        self.connections.remove(&connection);
        self.subscriptions
            .retain(|_, entry| entry.connection != connection);
    }

    /// Register a named interest in a set of tables. Re-registering the same
    /// subscription id replaces its table set.
    pub fn subscribe(
        &mut self,
        subscription_id: impl Into<String>,
        connection: ConnectionId,
        tables: impl IntoIterator<Item = String>,
    ) {
        let tables: HashSet<String> = tables.into_iter().map(|t| t.to_uppercase()).collect();
        self.subscriptions
            .insert(subscription_id.into(), SubscriptionEntry { connection, tables });
    }

    pub fn unsubscribe(&mut self, subscription_id: &str) {
        self.subscriptions.remove(subscription_id);
    }

    /// Publish a committed change set to every interested connection.
    pub fn publish(&mut self, tables: &[String]) {
        if tables.is_empty() {
            return;
        }

        let mut interested: HashSet<ConnectionId> = HashSet::new();
        for entry in self.subscriptions.values() {
            if tables.iter().any(|t| entry.tables.contains(t)) {
                interested.insert(entry.connection);
            }
        }

        let notice = TablesChanged {
            tables: tables.to_vec(),
        };
        let mut dead: Vec<ConnectionId> = Vec::new();
        for connection in interested {
            if let Some(tx) = self.connections.get(&connection) {
                if tx.send(notice.clone()).is_err() {
                    dead.push(connection);
                }
            }
        }
        for connection in dead {
            self.drop_connection(connection);
        }
    }
}
