//! Connection registry: the hub's single source of truth for who is
//! connected and how to reach them.
//!
//! Three derived indexes (by client, by user, by conversation) live under
//! one `RwLock` so removal is atomic across all of them — a disconnect can
//! never leave a client id dangling in a group index.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::{counter, gauge};
use relay_core::envelope::Envelope;
use relay_core::ids::{ClientId, ConversationId, UserId};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::connection::ClientConnection;

/// Registry failures.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A connection with this client id is already registered.
    #[error("client {0} is already registered")]
    AlreadyRegistered(ClientId),
}

#[derive(Default)]
struct Indexes {
    by_client: HashMap<ClientId, Arc<ClientConnection>>,
    by_user: HashMap<UserId, Vec<ClientId>>,
    by_conversation: HashMap<ConversationId, Vec<ClientId>>,
}

/// Tracks live connections and fans envelopes out to groups of them.
pub struct ConnectionRegistry {
    indexes: RwLock<Indexes>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            indexes: RwLock::new(Indexes::default()),
        }
    }

    /// Add a connection to every applicable index.
    ///
    /// Registering the same client id twice is an error; client ids are
    /// generated at upgrade, so a collision means a bookkeeping bug rather
    /// than a client retry.
    pub async fn register(&self, conn: Arc<ClientConnection>) -> Result<(), RegistryError> {
        let mut idx = self.indexes.write().await;
        if idx.by_client.contains_key(&conn.id) {
            return Err(RegistryError::AlreadyRegistered(conn.id.clone()));
        }
        if let Some(user_id) = &conn.user_id {
            idx.by_user
                .entry(user_id.clone())
                .or_default()
                .push(conn.id.clone());
        }
        if let Some(conversation_id) = &conn.conversation_id {
            idx.by_conversation
                .entry(conversation_id.clone())
                .or_default()
                .push(conn.id.clone());
        }
        let _ = idx.by_client.insert(conn.id.clone(), conn);
        gauge!("ws_connections_active").increment(1.0);
        Ok(())
    }

    /// Remove a connection from every index. No-op when absent.
    ///
    /// Group keys whose member list becomes empty are dropped entirely.
    pub async fn disconnect(&self, client_id: &ClientId) -> bool {
        let mut idx = self.indexes.write().await;
        let Some(conn) = idx.by_client.remove(client_id) else {
            return false;
        };
        if let Some(user_id) = &conn.user_id {
            if let Some(members) = idx.by_user.get_mut(user_id) {
                members.retain(|id| id != client_id);
                if members.is_empty() {
                    let _ = idx.by_user.remove(user_id);
                }
            }
        }
        if let Some(conversation_id) = &conn.conversation_id {
            if let Some(members) = idx.by_conversation.get_mut(conversation_id) {
                members.retain(|id| id != client_id);
                if members.is_empty() {
                    let _ = idx.by_conversation.remove(conversation_id);
                }
            }
        }
        gauge!("ws_connections_active").decrement(1.0);
        debug!(client_id = %client_id, dropped = conn.drop_count(), "connection removed");
        true
    }

    /// Whether a client id is currently registered.
    pub async fn contains(&self, client_id: &ClientId) -> bool {
        self.indexes.read().await.by_client.contains_key(client_id)
    }

    /// Look up a connection by client id.
    pub async fn get(&self, client_id: &ClientId) -> Option<Arc<ClientConnection>> {
        self.indexes.read().await.by_client.get(client_id).cloned()
    }

    /// Total number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.indexes.read().await.by_client.len()
    }

    /// Number of connections held by a user.
    pub async fn user_connection_count(&self, user_id: &UserId) -> usize {
        self.indexes
            .read()
            .await
            .by_user
            .get(user_id)
            .map_or(0, Vec::len)
    }

    /// Number of connections scoped to a conversation.
    pub async fn conversation_connection_count(
        &self,
        conversation_id: &ConversationId,
    ) -> usize {
        self.indexes
            .read()
            .await
            .by_conversation
            .get(conversation_id)
            .map_or(0, Vec::len)
    }

    /// Snapshot every live connection (for the reaper pass).
    pub async fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.indexes.read().await.by_client.values().cloned().collect()
    }

    /// Send one envelope to one connection.
    ///
    /// One attempt, no cleanup on failure: the caller decides whether a
    /// failed send means eviction.
    pub fn send_envelope(&self, conn: &ClientConnection, envelope: &Envelope) -> bool {
        conn.send_envelope(envelope)
    }

    /// Broadcast an envelope to every connection.
    pub async fn broadcast(&self, envelope: &Envelope) {
        let members = self.snapshot().await;
        counter!("ws_events_broadcast_total", "scope" => "global").increment(1);
        self.deliver(members, envelope, "all").await;
    }

    /// Broadcast an envelope to every connection a user holds.
    ///
    /// Unknown user is a silent no-op.
    pub async fn broadcast_to_user(&self, user_id: &UserId, envelope: &Envelope) {
        let members = self.group_snapshot_user(user_id).await;
        if members.is_empty() {
            return;
        }
        counter!("ws_events_broadcast_total", "scope" => "user").increment(1);
        self.deliver(members, envelope, user_id.as_str()).await;
    }

    /// Broadcast an envelope to every connection scoped to a conversation.
    ///
    /// Unknown conversation is a silent no-op.
    pub async fn broadcast_to_conversation(
        &self,
        conversation_id: &ConversationId,
        envelope: &Envelope,
    ) {
        let members = self.group_snapshot_conversation(conversation_id).await;
        if members.is_empty() {
            return;
        }
        counter!("ws_events_broadcast_total", "scope" => "conversation").increment(1);
        self.deliver(members, envelope, conversation_id.as_str()).await;
    }

    async fn group_snapshot_user(&self, user_id: &UserId) -> Vec<Arc<ClientConnection>> {
        let idx = self.indexes.read().await;
        idx.by_user
            .get(user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| idx.by_client.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn group_snapshot_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Vec<Arc<ClientConnection>> {
        let idx = self.indexes.read().await;
        idx.by_conversation
            .get(conversation_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| idx.by_client.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Send to every member, then evict the ones whose send failed.
    ///
    /// The full pass always completes before any eviction, so one dead
    /// member never deprives the rest of the group of the event.
    async fn deliver(
        &self,
        members: Vec<Arc<ClientConnection>>,
        envelope: &Envelope,
        group: &str,
    ) {
        let json = match serde_json::to_string(envelope) {
            Ok(j) => Arc::new(j),
            Err(e) => {
                warn!(group, error = %e, "failed to serialize envelope");
                return;
            }
        };
        debug!(group, recipients = members.len(), "broadcasting envelope");

        let mut failed: Vec<ClientId> = Vec::new();
        for conn in &members {
            if !conn.send(Arc::clone(&json)) {
                warn!(client_id = %conn.id, group, "send failed, marking for eviction");
                failed.push(conn.id.clone());
            }
        }
        for client_id in failed {
            if self.disconnect(&client_id).await {
                info!(client_id = %client_id, "evicted dead connection after broadcast");
            }
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
