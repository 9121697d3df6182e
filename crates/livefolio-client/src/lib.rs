//! # livefolio-client
//!
//! Keeps one subscriber connection to the livefolio server alive and turns
//! `investment_update` pushes into cache invalidations.
//!
//! - [`ConnectionManager`]: actor-owned connection lifecycle with automatic,
//!   fixed-delay reconnect
//! - [`ReconnectPolicy`] / [`RetryHandle`]: the single cancellable retry slot
//! - [`Connector`] / [`Transport`]: the network seam, implemented by
//!   [`WsConnector`] and, for tests, [`mock::MockConnector`]
//! - [`CacheInvalidator`]: where invalidations go
//! - [`SessionStore`]: persisted identity between runs

#![deny(unsafe_code)]

pub mod cache;
pub mod error;
pub mod manager;
pub mod mock;
pub mod reconnect;
pub mod session_store;
pub mod transport;
pub mod ws;

pub use cache::{CacheInvalidator, CacheKey, RecordingInvalidator};
pub use error::{ClientError, ReconnectError};
pub use manager::{ConnectionManager, ConnectionState, ManagerConfig};
pub use reconnect::{DEFAULT_RECONNECT_DELAY, ReconnectPolicy, RetryHandle};
pub use session_store::{
    FileSessionStore, MemorySessionStore, SessionStore, USER_ID_KEY, store_user_id,
    stored_user_id,
};
pub use transport::{
    CloseCode, ConnectionSeq, Connector, EventSink, LifecycleEvent, Transport, TransportEvent,
};
pub use ws::WsConnector;
