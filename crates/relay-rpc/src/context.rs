//! Shared context handed to every action handler.

use std::sync::Arc;

use relay_core::dispatch::EventDispatcher;

/// Handles a handler may need while executing an operation.
///
/// Constructed once at startup and passed by reference into every
/// invocation; never recreated as ambient global state.
#[derive(Clone)]
pub struct HubContext {
    /// Process-wide event dispatcher. Operations call
    /// [`EventDispatcher::dispatch`] to announce state changes after
    /// completing their own work.
    pub dispatcher: Arc<EventDispatcher>,
}

impl HubContext {
    /// Build a context around a dispatcher.
    pub fn new(dispatcher: Arc<EventDispatcher>) -> Self {
        Self { dispatcher }
    }
}
