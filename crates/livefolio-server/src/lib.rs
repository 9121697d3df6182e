//! # livefolio-server
//!
//! Axum WebSocket server that pushes investment updates to the connections
//! subscribed on behalf of each user.
//!
//! - [`ConnectionRegistry`]: user → connections map with targeted broadcast
//! - [`EventDispatcher`] / [`EventBus`]: domain events into the registry
//! - [`session`]: per-socket lifecycle with heartbeat and subscribe handling
//! - [`LiveServer`]: routes (`/ws`, `/health`, `/metrics`, `POST /events`)
//!   and graceful shutdown

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;

pub use config::ServerConfig;
pub use connection::ConnectionHandle;
pub use dispatcher::{EventBus, EventDispatcher};
pub use error::{SendError, ServerError};
pub use registry::{BroadcastReport, ConnectionRegistry};
pub use server::LiveServer;
pub use shutdown::{DrainReport, ShutdownCoordinator};
