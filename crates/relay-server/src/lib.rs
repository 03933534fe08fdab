//! # relay-server
//!
//! Axum HTTP + `WebSocket` server for the Relay hub.
//!
//! - `WebSocket` gateway: per-connection lifecycle, request routing,
//!   connection registry with user/conversation indexes
//! - Event fan-out: unicast, per-user, per-conversation, and global
//!   broadcast with eviction of dead members
//! - Heartbeat/reaper background task for idle and dead connections
//! - Pluggable token verification at upgrade time
//! - HTTP endpoints: health check, Prometheus metrics
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod auth;
pub mod config;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use auth::{AllowAll, TokenVerifier};
pub use config::ServerConfig;
pub use server::RelayServer;
pub use shutdown::ShutdownCoordinator;
pub use websocket::connection::ClientConnection;
pub use websocket::registry::{ConnectionRegistry, RegistryError};
