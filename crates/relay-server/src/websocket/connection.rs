//! WebSocket client connection state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use relay_core::envelope::Envelope;
use relay_core::ids::{ClientId, ConversationId, UserId};
use tokio::sync::mpsc;

/// Represents a connected WebSocket client.
///
/// Scope is fixed at handshake: `user_id` comes from token verification and
/// `conversation_id` from the upgrade query string. Neither changes for the
/// lifetime of the connection; clients wanting a different scope reconnect.
pub struct ClientConnection {
    /// Unique connection ID, generated at upgrade.
    pub id: ClientId,
    /// Authenticated user, if a token was presented.
    pub user_id: Option<UserId>,
    /// Conversation this connection is scoped to, if any.
    pub conversation_id: Option<ConversationId>,
    /// Send channel to the connection's WebSocket write task.
    tx: mpsc::Sender<Arc<String>>,
    /// When this connection was established.
    pub connected_at: Instant,
    /// When the last inbound frame arrived. Outbound sends do not stamp
    /// this clock: the reaper's heartbeat probes and event broadcasts must
    /// not count as client liveness.
    last_activity: Mutex<Instant>,
    /// Count of messages dropped due to full or closed channel.
    pub dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection.
    pub fn new(
        id: ClientId,
        user_id: Option<UserId>,
        conversation_id: Option<ConversationId>,
        tx: mpsc::Sender<Arc<String>>,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            user_id,
            conversation_id,
            tx,
            connected_at: now,
            last_activity: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Send a text message to the client.
    ///
    /// Returns `false` if the channel is full or closed, and increments the
    /// dropped message counter. Never blocks and never errors; the caller
    /// decides what a failed send means.
    pub fn send(&self, message: Arc<String>) -> bool {
        if self.tx.try_send(message).is_ok() {
            true
        } else {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("ws_broadcast_drops_total").increment(1);
            false
        }
    }

    /// Serialize an envelope and send it to the client.
    pub fn send_envelope(&self, envelope: &Envelope) -> bool {
        match serde_json::to_string(envelope) {
            Ok(json) => self.send(Arc::new(json)),
            Err(_) => false,
        }
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Stamp the activity clock. Called on every inbound frame.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Time since the last inbound frame.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
