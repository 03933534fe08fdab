//! Bridge from the event dispatcher to the connection registry.
//!
//! Business handlers announce state changes through the dispatcher; these
//! listeners turn each announcement into an event envelope and fan it out
//! to the right connection group. Wiring happens once at startup, e.g.
//! `new_message → ConversationEventListener`, `lead_updated →
//! UserEventListener`, `system_notice → GlobalEventListener`.

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::dispatch::{EventListener, ListenerError};
use relay_core::envelope::Envelope;
use relay_core::ids::{ConversationId, UserId};
use serde_json::Value;

use super::registry::ConnectionRegistry;

/// Fans an event out to every connection scoped to the conversation named
/// by the `conversation_id` key in the event data.
pub struct ConversationEventListener {
    registry: Arc<ConnectionRegistry>,
    event_type: String,
}

impl ConversationEventListener {
    /// Create a listener broadcasting `event_type` envelopes.
    pub fn new(registry: Arc<ConnectionRegistry>, event_type: impl Into<String>) -> Self {
        Self {
            registry,
            event_type: event_type.into(),
        }
    }
}

#[async_trait]
impl EventListener for ConversationEventListener {
    async fn handle(&self, data: Arc<Value>) -> Result<(), ListenerError> {
        let conversation_id = data
            .get("conversation_id")
            .and_then(Value::as_str)
            .ok_or("event data missing 'conversation_id'")?;
        let envelope = Envelope::event(&self.event_type, (*data).clone());
        self.registry
            .broadcast_to_conversation(&ConversationId::from(conversation_id), &envelope)
            .await;
        Ok(())
    }
}

/// Fans an event out to every connection held by the user named by the
/// `user_id` key in the event data.
pub struct UserEventListener {
    registry: Arc<ConnectionRegistry>,
    event_type: String,
}

impl UserEventListener {
    /// Create a listener broadcasting `event_type` envelopes.
    pub fn new(registry: Arc<ConnectionRegistry>, event_type: impl Into<String>) -> Self {
        Self {
            registry,
            event_type: event_type.into(),
        }
    }
}

#[async_trait]
impl EventListener for UserEventListener {
    async fn handle(&self, data: Arc<Value>) -> Result<(), ListenerError> {
        let user_id = data
            .get("user_id")
            .and_then(Value::as_str)
            .ok_or("event data missing 'user_id'")?;
        let envelope = Envelope::event(&self.event_type, (*data).clone());
        self.registry
            .broadcast_to_user(&UserId::from(user_id), &envelope)
            .await;
        Ok(())
    }
}

/// Fans an event out to every live connection.
pub struct GlobalEventListener {
    registry: Arc<ConnectionRegistry>,
    event_type: String,
}

impl GlobalEventListener {
    /// Create a listener broadcasting `event_type` envelopes.
    pub fn new(registry: Arc<ConnectionRegistry>, event_type: impl Into<String>) -> Self {
        Self {
            registry,
            event_type: event_type.into(),
        }
    }
}

#[async_trait]
impl EventListener for GlobalEventListener {
    async fn handle(&self, data: Arc<Value>) -> Result<(), ListenerError> {
        let envelope = Envelope::event(&self.event_type, (*data).clone());
        self.registry.broadcast(&envelope).await;
        Ok(())
    }
}
