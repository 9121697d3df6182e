//! In-memory connector for deterministic tests without a network.
//!
//! Every `open` is recorded as a [`MockConnection`] the test can drive:
//! complete the handshake, deliver frames, inject errors, or drop the
//! connection with any close code.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::error::ClientError;
use crate::transport::{CloseCode, Connector, ConnectionSeq, EventSink, Transport};

#[derive(Debug, Default)]
struct ConnState {
    sent: Mutex<Vec<String>>,
    close_requested: Mutex<Option<CloseCode>>,
    closed: AtomicBool,
    fail_sends: AtomicBool,
}

/// One connection opened through a [`MockConnector`].
#[derive(Clone, Debug)]
pub struct MockConnection {
    url: String,
    sink: EventSink,
    state: Arc<ConnState>,
}

impl MockConnection {
    /// URL passed to `open`.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sequence number the manager assigned.
    pub fn seq(&self) -> ConnectionSeq {
        self.sink.seq()
    }

    /// Complete the handshake.
    pub fn open(&self) {
        self.sink.opened();
    }

    /// Deliver an inbound text frame.
    pub fn deliver(&self, text: &str) {
        self.sink.message(text);
    }

    /// Deliver raw inbound bytes.
    pub fn deliver_bytes(&self, data: &[u8]) {
        self.sink.message(data);
    }

    /// Inject a transport error.
    pub fn error(&self, message: &str) {
        self.sink.error(message);
    }

    /// Drop the connection from the network side. No-op if already closed.
    pub fn close(&self, code: CloseCode, reason: &str) {
        if !self.state.closed.swap(true, Ordering::SeqCst) {
            self.sink.closed(code, reason);
        }
    }

    /// Frames the manager sent on this connection.
    pub fn sent(&self) -> Vec<String> {
        self.state.sent.lock().clone()
    }

    /// Close code the manager requested, if any.
    pub fn close_requested(&self) -> Option<CloseCode> {
        *self.state.close_requested.lock()
    }

    /// Whether a `Closed` event has been emitted.
    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Make subsequent sends fail.
    pub fn fail_sends(&self, fail: bool) {
        self.state.fail_sends.store(fail, Ordering::SeqCst);
    }
}

struct MockTransport {
    conn: MockConnection,
}

impl Transport for MockTransport {
    fn send(&self, text: String) -> Result<(), ClientError> {
        if self.conn.state.fail_sends.load(Ordering::SeqCst) || self.conn.is_closed() {
            return Err(ClientError::TransportClosed);
        }
        self.conn.state.sent.lock().push(text);
        Ok(())
    }

    fn close(&self, code: CloseCode) {
        *self.conn.state.close_requested.lock() = Some(code);
        // A real socket confirms a requested close with a Closed event.
        self.conn.close(code, "closed by client");
    }
}

/// Connector that records every connection it opens.
#[derive(Clone, Debug, Default)]
pub struct MockConnector {
    connections: Arc<Mutex<Vec<MockConnection>>>,
    auto_open: bool,
    fail_sends: bool,
}

impl MockConnector {
    /// Connections stay in `Connecting` until the test calls [`MockConnection::open`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections complete their handshake immediately.
    pub fn auto_open() -> Self {
        Self {
            auto_open: true,
            ..Self::default()
        }
    }

    /// New connections reject every send.
    #[must_use]
    pub fn with_failing_sends(mut self) -> Self {
        self.fail_sends = true;
        self
    }

    /// Every connection opened so far, oldest first.
    pub fn connections(&self) -> Vec<MockConnection> {
        self.connections.lock().clone()
    }

    /// Number of `open` calls.
    pub fn connect_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// The most recently opened connection.
    pub fn last(&self) -> Option<MockConnection> {
        self.connections.lock().last().cloned()
    }
}

impl Connector for MockConnector {
    fn open(&self, url: &str, sink: EventSink) -> Box<dyn Transport> {
        let conn = MockConnection {
            url: url.to_owned(),
            sink,
            state: Arc::new(ConnState::default()),
        };
        conn.fail_sends(self.fail_sends);
        self.connections.lock().push(conn.clone());
        if self.auto_open {
            conn.open();
        }
        Box::new(MockTransport { conn })
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::transport::LifecycleEvent;

    #[tokio::test]
    async fn records_sends_and_single_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connector = MockConnector::auto_open();
        let transport = connector.open("ws://mock/ws", EventSink::new(ConnectionSeq(1), tx));

        transport.send("hello".into()).unwrap();
        transport.close(CloseCode::NORMAL);
        connector.last().unwrap().close(CloseCode::ABNORMAL, "late");

        assert_eq!(rx.recv().await.unwrap().event, LifecycleEvent::Opened);
        let closed = rx.recv().await.unwrap().event;
        assert!(matches!(closed, LifecycleEvent::Closed { code: CloseCode::NORMAL, .. }));
        assert!(rx.try_recv().is_err(), "only one Closed per connection");

        let conn = connector.last().unwrap();
        assert_eq!(conn.sent(), vec!["hello".to_string()]);
        assert_eq!(conn.close_requested(), Some(CloseCode::NORMAL));
        assert_eq!(conn.url(), "ws://mock/ws");
    }

    #[test]
    fn failing_sends() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let connector = MockConnector::new().with_failing_sends();
        let transport = connector.open("ws://mock/ws", EventSink::new(ConnectionSeq(1), tx));
        assert!(matches!(transport.send("x".into()), Err(ClientError::TransportClosed)));
        assert!(connector.last().unwrap().sent().is_empty());
    }
}
