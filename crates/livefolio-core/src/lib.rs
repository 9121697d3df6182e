//! # livefolio-core
//!
//! Shared vocabulary for the livefolio server and client crates:
//!
//! - **Ids**: [`UserId`] (numeric, as carried on the wire) and branded
//!   string ids such as [`ConnectionId`]
//! - **Domain events**: [`DomainEvent`] with its fixed [`EventKind`] enumeration
//! - **Protocol**: the two wire message shapes and their JSON codec
//! - **Errors**: [`DecodeError`] / [`EncodeError`] via `thiserror`

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod ids;
pub mod protocol;

pub use errors::{DecodeError, EncodeError, ProtocolError};
pub use events::{DomainEvent, EventKind};
pub use ids::{ConnectionId, UserId};
pub use protocol::{Message, decode, decode_str, encode};
