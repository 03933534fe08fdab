//! WebSocket gateway: connection state, registry, fan-out, lifecycle.

pub mod connection;
pub mod events;
pub mod reaper;
pub mod registry;
pub mod session;
