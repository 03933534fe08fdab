//! Process-wide event dispatcher.
//!
//! Maps an event-type name to an ordered list of asynchronous listeners.
//! Registration happens once during setup, before the hub accepts
//! connections; after [`EventDispatcher::build`] the table is immutable and
//! dispatch needs no synchronization.
//!
//! Dispatch runs every listener concurrently, each on its own task, so one
//! listener failing (or panicking) never prevents the others from running
//! and never propagates to the caller. A typical listener is "broadcast this
//! event to a connection group"; a malformed payload on one path must not
//! block unrelated notifications.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

/// Error returned by a listener; logged and swallowed by the dispatcher.
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// An asynchronous listener for one event type.
#[async_trait]
pub trait EventListener: Send + Sync {
    /// Handle one dispatched event.
    async fn handle(&self, data: Arc<Value>) -> Result<(), ListenerError>;
}

/// Mutable listener table used during startup wiring.
#[derive(Default)]
pub struct DispatcherBuilder {
    listeners: HashMap<String, Vec<Arc<dyn EventListener>>>,
}

impl DispatcherBuilder {
    /// Append a listener for an event type.
    ///
    /// No uniqueness check: registering the same listener twice duplicates
    /// delivery.
    pub fn register_listener(
        &mut self,
        event_type: &str,
        listener: impl EventListener + 'static,
    ) {
        self.listeners
            .entry(event_type.to_owned())
            .or_default()
            .push(Arc::new(listener));
    }

    /// Freeze the table into an immutable dispatcher.
    pub fn build(self) -> EventDispatcher {
        EventDispatcher {
            listeners: self.listeners,
        }
    }
}

/// Immutable event-type → listener registry.
pub struct EventDispatcher {
    listeners: HashMap<String, Vec<Arc<dyn EventListener>>>,
}

impl EventDispatcher {
    /// Start building a dispatcher.
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// Number of listeners registered for an event type.
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.listeners.get(event_type).map_or(0, Vec::len)
    }

    /// Fire all listeners for an event type concurrently.
    ///
    /// Completes immediately as a no-op when nothing is registered. Every
    /// listener failure is caught and isolated; callers receive no
    /// per-listener results.
    pub async fn dispatch(&self, event_type: &str, data: Value) {
        let Some(listeners) = self.listeners.get(event_type) else {
            debug!(event_type, "no listeners registered, dropping event");
            return;
        };

        let data = Arc::new(data);
        let handles: Vec<_> = listeners
            .iter()
            .map(|listener| {
                let listener = Arc::clone(listener);
                let data = Arc::clone(&data);
                let event_type = event_type.to_owned();
                tokio::spawn(async move {
                    if let Err(e) = listener.handle(data).await {
                        warn!(event_type, error = %e, "event listener failed");
                    }
                })
            })
            .collect();

        for handle in handles {
            // A panicking listener surfaces here as a JoinError.
            if let Err(e) = handle.await {
                warn!(event_type, error = %e, "event listener panicked");
            }
        }
    }
}
