//! # relay-core
//!
//! Protocol layer shared by the Relay hub:
//!
//! - Wire envelope shapes (`request`, `response`, `error`, `event`,
//!   `connected`, `heartbeat`) and their literal fields
//! - Branded ID newtypes (`ClientId`, `UserId`, `ConversationId`)
//! - The process-wide event dispatcher (event type → listeners, concurrent
//!   fan-out with per-listener failure isolation)

#![deny(unsafe_code)]

pub mod dispatch;
pub mod envelope;
pub mod ids;

pub use dispatch::{EventDispatcher, EventListener, ListenerError};
pub use envelope::{Envelope, EnvelopeKind, ErrorBody};
pub use ids::{ClientId, ConversationId, UserId};
