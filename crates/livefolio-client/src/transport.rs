//! Transport seam between the connection manager and the network.
//!
//! A [`Connector`] opens a [`Transport`] and reports everything that
//! happens to it through an [`EventSink`]. Each sink is stamped with the
//! [`ConnectionSeq`] of the connection it belongs to, so the manager can
//! tell a live connection's events from a replaced one's.
//!
//! Contract for implementors: `open` returns immediately; the sink then
//! receives at most one `Opened`, any number of `Message`/`Error`, and
//! exactly one `Closed`, which is always the last event.

use std::fmt;

use tokio::sync::mpsc;

use crate::error::ClientError;

/// Monotonic per-manager connection number.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionSeq(pub u64);

impl fmt::Display for ConnectionSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// WebSocket close status code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CloseCode(pub u16);

impl CloseCode {
    /// 1000: orderly shutdown.
    pub const NORMAL: Self = Self(1000);
    /// 1001: endpoint going away.
    pub const GOING_AWAY: Self = Self(1001);
    /// 1005: close frame carried no status.
    pub const NO_STATUS: Self = Self(1005);
    /// 1006: connection dropped without a close frame.
    pub const ABNORMAL: Self = Self(1006);

    /// Whether this is a normal closure.
    pub fn is_normal(self) -> bool {
        self == Self::NORMAL
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Something that happened to a transport.
#[derive(Clone, Debug, PartialEq)]
pub enum LifecycleEvent {
    /// Handshake completed; sends are now possible.
    Opened,
    /// An inbound frame.
    Message(Vec<u8>),
    /// A transport error. Informational only; a `Closed` follows if the
    /// connection is lost.
    Error(String),
    /// The transport is gone.
    Closed {
        /// Close status.
        code: CloseCode,
        /// Close reason, possibly empty.
        reason: String,
    },
}

/// A lifecycle event tagged with its connection.
#[derive(Clone, Debug, PartialEq)]
pub struct TransportEvent {
    /// Which connection this is about.
    pub seq: ConnectionSeq,
    /// What happened.
    pub event: LifecycleEvent,
}

/// Sending half of the lifecycle channel, bound to one connection.
#[derive(Clone, Debug)]
pub struct EventSink {
    seq: ConnectionSeq,
    tx: mpsc::UnboundedSender<TransportEvent>,
}

impl EventSink {
    /// Bind a sink to `seq`.
    pub fn new(seq: ConnectionSeq, tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { seq, tx }
    }

    /// The connection this sink reports for.
    pub fn seq(&self) -> ConnectionSeq {
        self.seq
    }

    fn emit(&self, event: LifecycleEvent) {
        // Receiver gone means the manager stopped; nothing left to notify.
        let _ = self.tx.send(TransportEvent {
            seq: self.seq,
            event,
        });
    }

    /// Report a completed handshake.
    pub fn opened(&self) {
        self.emit(LifecycleEvent::Opened);
    }

    /// Report an inbound frame.
    pub fn message(&self, data: impl Into<Vec<u8>>) {
        self.emit(LifecycleEvent::Message(data.into()));
    }

    /// Report a transport error.
    pub fn error(&self, message: impl Into<String>) {
        self.emit(LifecycleEvent::Error(message.into()));
    }

    /// Report that the transport closed.
    pub fn closed(&self, code: CloseCode, reason: impl Into<String>) {
        self.emit(LifecycleEvent::Closed {
            code,
            reason: reason.into(),
        });
    }
}

/// Handle to one open (or opening) duplex connection.
pub trait Transport: Send {
    /// Queue a text frame.
    fn send(&self, text: String) -> Result<(), ClientError>;

    /// Begin closing with `code`. The sink reports `Closed` when done.
    fn close(&self, code: CloseCode);
}

/// Factory for transports.
pub trait Connector: Send + Sync + 'static {
    /// Start connecting to `url`. Must not block.
    fn open(&self, url: &str, sink: EventSink) -> Box<dyn Transport>;
}
