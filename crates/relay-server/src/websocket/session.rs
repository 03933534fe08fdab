//! Connection lifecycle — handles a single client from upgrade through
//! disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, histogram};
use relay_core::envelope::Envelope;
use relay_core::ids::{ClientId, ConversationId, UserId};
use relay_rpc::{HandlerRouter, HubContext};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use super::connection::ClientConnection;
use super::registry::ConnectionRegistry;

/// Capacity of the per-connection outbound queue.
const SEND_QUEUE_CAPACITY: usize = 1024;

/// Unregisters the connection even if the session loop unwinds.
///
/// Disarmed on the normal exit path, where cleanup runs inline; on a panic
/// the drop spawns the disconnect so no stale registry entry survives until
/// the reaper happens to notice.
struct DisconnectGuard {
    registry: Arc<ConnectionRegistry>,
    client_id: Option<ClientId>,
}

impl DisconnectGuard {
    fn disarm(&mut self) {
        self.client_id = None;
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if let Some(client_id) = self.client_id.take() {
            let registry = Arc::clone(&self.registry);
            let _ = tokio::spawn(async move {
                let _ = registry.disconnect(&client_id).await;
            });
        }
    }
}

/// Run the lifecycle loop for one connected client.
///
/// 1. Registers the connection (scope fixed from the handshake)
/// 2. Sends the `connected` welcome envelope
/// 3. Forwards outbound envelopes from the send channel to the socket
/// 4. Routes incoming frames through the handler router
/// 5. Cleans up exactly once on every exit path
///
/// The receive loop waits at most `receive_timeout` per frame; on timeout it
/// continues only while the connection is still registered, so an eviction
/// by the reaper or a failed broadcast ends the loop within one timeout.
#[instrument(skip_all, fields(client_id))]
pub async fn run_session(
    ws: WebSocket,
    user_id: Option<UserId>,
    conversation_id: Option<ConversationId>,
    registry: Arc<ConnectionRegistry>,
    router: Arc<HandlerRouter>,
    ctx: Arc<HubContext>,
    receive_timeout: Duration,
) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    let client_id = ClientId::new();
    let _ = tracing::Span::current().record("client_id", client_id.as_str());

    let (send_tx, mut send_rx) = mpsc::channel::<Arc<String>>(SEND_QUEUE_CAPACITY);
    let connection = Arc::new(ClientConnection::new(
        client_id.clone(),
        user_id,
        conversation_id,
        send_tx,
    ));

    if let Err(e) = registry.register(connection.clone()).await {
        // Client ids are freshly generated, so this indicates a bug.
        error!(error = %e, "failed to register connection");
        let _ = ws_tx.send(Message::Close(None)).await;
        return;
    }

    let mut guard = DisconnectGuard {
        registry: Arc::clone(&registry),
        client_id: Some(client_id.clone()),
    };

    let connection_start = std::time::Instant::now();
    info!(
        user_id = connection.user_id.as_ref().map(UserId::as_str),
        conversation_id = connection.conversation_id.as_ref().map(ConversationId::as_str),
        "client connected"
    );
    counter!("ws_connections_total").increment(1);

    // Welcome envelope goes straight to the socket, ahead of anything the
    // registry might already be fanning out through the queue.
    let connected = Envelope::connected(&client_id, connection.user_id.as_ref());
    if let Ok(json) = serde_json::to_string(&connected) {
        let _ = ws_tx.send(Message::Text(json.into())).await;
    }

    // Outbound forwarder: drains the send channel onto the socket.
    let outbound = tokio::spawn(async move {
        while let Some(text) = send_rx.recv().await {
            if ws_tx.send(Message::Text((*text).clone().into())).await.is_err() {
                break;
            }
        }
    });

    // Receive loop.
    loop {
        let msg = match tokio::time::timeout(receive_timeout, ws_rx.next()).await {
            Err(_elapsed) => {
                if registry.contains(&connection.id).await {
                    continue;
                }
                debug!("connection no longer registered, closing");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(error = %e, "transport error");
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        let text = match msg {
            Message::Text(ref t) => Some(t.to_string()),
            Message::Binary(ref data) => match std::str::from_utf8(data) {
                Ok(s) => Some(s.to_string()),
                Err(_) => {
                    info!(len = data.len(), "received non-UTF8 binary frame");
                    None
                }
            },
            Message::Close(_) => {
                info!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                connection.touch();
                None
            }
        };

        let Some(text) = text else { continue };
        connection.touch();

        if let Some(response) = router.dispatch_message(&text, &ctx).await {
            if !connection.send_envelope(&response) {
                warn!("failed to enqueue response (channel full or closed)");
            }
        }
    }

    // Cleanup: exactly once, on every exit path.
    info!(dropped = connection.drop_count(), "client disconnected");
    counter!("ws_disconnections_total").increment(1);
    histogram!("ws_connection_duration_seconds").record(connection_start.elapsed().as_secs_f64());
    outbound.abort();
    let _ = registry.disconnect(&connection.id).await;
    guard.disarm();
}
