//! # relay-rpc
//!
//! The handler router for the Relay hub. Each named resource owns a static
//! table of `action → handler` built once at startup; incoming request
//! envelopes are validated, routed, and converted into correlated
//! response/error envelopes. Business handlers (users, conversations,
//! messages, leads, meetings, dashboards) live outside this crate and plug
//! in through the [`router::ActionHandler`] trait.

#![deny(unsafe_code)]

pub mod context;
pub mod errors;
pub mod router;
pub mod validation;

pub use context::HubContext;
pub use errors::ActionError;
pub use router::{ActionHandler, HandlerRouter};
