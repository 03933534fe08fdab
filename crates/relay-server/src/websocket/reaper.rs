//! Heartbeat and idle-connection reaping.
//!
//! One background loop for the whole hub. Each pass sends every connection
//! a heartbeat envelope and evicts the ones that are provably dead (send
//! failed) or quiet past the idle cutoff even though their transport still
//! looks open (half-open TCP, backgrounded mobile apps).

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use relay_core::envelope::Envelope;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::registry::ConnectionRegistry;

/// Outcome of one reaper pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapStats {
    /// Connections probed.
    pub probed: usize,
    /// Evictions because the heartbeat send failed.
    pub dead: usize,
    /// Evictions because the connection exceeded the idle cutoff.
    pub idle: usize,
}

/// Run one heartbeat-and-evict pass.
pub async fn reap_pass(registry: &ConnectionRegistry, idle_cutoff: Duration) -> ReapStats {
    let members = registry.snapshot().await;
    let mut stats = ReapStats {
        probed: members.len(),
        ..ReapStats::default()
    };

    let heartbeat = Envelope::heartbeat();
    let json = match serde_json::to_string(&heartbeat) {
        Ok(j) => Arc::new(j),
        Err(e) => {
            warn!(error = %e, "failed to serialize heartbeat");
            return stats;
        }
    };

    // Full pass first, evictions after, so a dead connection never delays
    // or skips the probes of the rest. The idle clock only moves on inbound
    // frames, so the probe itself cannot mask idleness.
    let mut dead = Vec::new();
    let mut idle = Vec::new();
    for conn in &members {
        if !conn.send(Arc::clone(&json)) {
            dead.push(conn.id.clone());
        } else if conn.idle_for() > idle_cutoff {
            idle.push(conn.id.clone());
        }
    }

    for client_id in dead {
        if registry.disconnect(&client_id).await {
            counter!("ws_reaper_evictions_total", "reason" => "dead").increment(1);
            info!(client_id = %client_id, "evicted dead connection");
            stats.dead += 1;
        }
    }
    for client_id in idle {
        if registry.disconnect(&client_id).await {
            counter!("ws_reaper_evictions_total", "reason" => "idle").increment(1);
            info!(client_id = %client_id, "evicted idle connection");
            stats.idle += 1;
        }
    }

    stats
}

/// Run the reaper loop until cancelled.
pub async fn run_reaper(
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    idle_cutoff: Duration,
    cancel: CancellationToken,
) {
    let mut tick = time::interval(interval);
    // Skip the immediate first tick
    let _ = tick.tick().await;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let stats = reap_pass(&registry, idle_cutoff).await;
                debug!(
                    probed = stats.probed,
                    dead = stats.dead,
                    idle = stats.idle,
                    "reaper pass complete"
                );
            }
            () = cancel.cancelled() => {
                info!("reaper stopped");
                return;
            }
        }
    }
}
