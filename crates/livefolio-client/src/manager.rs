//! Client connection manager.
//!
//! A spawned control loop owns all connection state. The public
//! [`ConnectionManager`] handle only sends it commands, so every lifecycle
//! transition is handled one at a time, in order.
//!
//! ```text
//! Idle ──connect──▶ Connecting ──Opened──▶ Open
//!                      │                    │
//!                      └──────Closed◀───────┘  (teardown: Open ──▶ Closing ──▶ Closed)
//!                               │
//!                               └── ReconnectPolicy delay ──▶ Connecting
//! ```
//!
//! Transport events carry the [`ConnectionSeq`] of the connection that
//! produced them; events from any connection other than the current one
//! are ignored. After [`ConnectionManager::teardown`] the loop is inert
//! until `connect` is called again.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use livefolio_core::{Message, UserId, decode, encode};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::cache::{CacheInvalidator, CacheKey};
use crate::error::ClientError;
use crate::reconnect::{DEFAULT_RECONNECT_DELAY, ReconnectPolicy};
use crate::transport::{
    CloseCode, ConnectionSeq, Connector, EventSink, LifecycleEvent, Transport, TransportEvent,
};

/// Observable lifecycle state of the managed connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection has been attempted.
    #[default]
    Idle,
    /// Handshake in progress.
    Connecting,
    /// Subscribed and receiving.
    Open,
    /// Close requested, waiting for the transport to confirm.
    Closing,
    /// No live connection.
    Closed,
}

impl ConnectionState {
    /// Whether the connection counts as live (open or about to be).
    pub fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        })
    }
}

/// Manager configuration.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// WebSocket endpoint, e.g. `ws://127.0.0.1:7878/ws`.
    pub url: String,
    /// Fixed delay before each reconnect.
    pub reconnect_delay: Duration,
}

impl ManagerConfig {
    /// Config for `url` with the default reconnect delay.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        }
    }

    /// Override the reconnect delay.
    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

enum Command {
    Connect(Option<UserId>),
    Teardown(oneshot::Sender<()>),
    RetryFired(u64),
}

/// Handle to a running connection manager. Cheap to clone; the control
/// loop stops (closing its connection) once every handle is dropped.
#[derive(Clone)]
pub struct ConnectionManager {
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    user_rx: watch::Receiver<Option<UserId>>,
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .field("subscribed_user", &self.subscribed_user())
            .finish()
    }
}

impl ConnectionManager {
    /// Spawn the control loop. Must be called from within a Tokio runtime.
    pub fn spawn(
        config: ManagerConfig,
        connector: Arc<dyn Connector>,
        invalidator: Arc<dyn CacheInvalidator>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let (user_tx, user_rx) = watch::channel(None);

        let actor = Actor {
            url: config.url,
            connector,
            invalidator,
            policy: ReconnectPolicy::new(config.reconnect_delay),
            cmd_weak: cmd_tx.downgrade(),
            events_tx,
            state_tx,
            user_tx,
            current: None,
            subscribed: None,
            next_seq: 0,
            next_retry_id: 0,
            pending_retry: None,
            torn_down: false,
            ever_connected: false,
        };
        let _ = tokio::spawn(actor.run(cmd_rx, events_rx));

        Self {
            cmd_tx,
            state_rx,
            user_rx,
        }
    }

    /// Open a connection subscribed to `user_id`, replacing any current one.
    /// `None` is a no-op. Re-arms a torn-down manager.
    pub fn connect(&self, user_id: Option<UserId>) {
        if self.cmd_tx.send(Command::Connect(user_id)).is_err() {
            warn!("connect ignored: connection manager has stopped");
        }
    }

    /// Cancel any pending retry and close the connection. Once this returns,
    /// no further connect happens until [`connect`](Self::connect) is called.
    pub async fn teardown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Teardown(ack_tx)).is_err() {
            return;
        }
        let _ = ack_rx.await;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch lifecycle state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// The user the manager is (or will be, after reconnecting) subscribed for.
    pub fn subscribed_user(&self) -> Option<UserId> {
        *self.user_rx.borrow()
    }
}

struct Current {
    seq: ConnectionSeq,
    user_id: UserId,
    state: ConnectionState,
    transport: Box<dyn Transport>,
}

struct Actor {
    url: String,
    connector: Arc<dyn Connector>,
    invalidator: Arc<dyn CacheInvalidator>,
    policy: ReconnectPolicy,
    cmd_weak: mpsc::WeakUnboundedSender<Command>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    state_tx: watch::Sender<ConnectionState>,
    user_tx: watch::Sender<Option<UserId>>,
    current: Option<Current>,
    subscribed: Option<UserId>,
    next_seq: u64,
    next_retry_id: u64,
    pending_retry: Option<u64>,
    torn_down: bool,
    ever_connected: bool,
}

impl Actor {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut events_rx: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        loop {
            tokio::select! {
                biased;
                cmd = cmd_rx.recv() => match cmd {
                    Some(Command::Connect(user_id)) => self.handle_connect(user_id),
                    Some(Command::Teardown(ack)) => {
                        self.handle_teardown();
                        let _ = ack.send(());
                    }
                    Some(Command::RetryFired(id)) => self.handle_retry_fired(id),
                    None => break,
                },
                Some(event) = events_rx.recv() => self.handle_event(event),
            }
        }
        debug!("all manager handles dropped, stopping");
        self.handle_teardown();
    }

    fn publish(&self) {
        let state = match &self.current {
            Some(c) => c.state,
            None if self.ever_connected => ConnectionState::Closed,
            None => ConnectionState::Idle,
        };
        let _ = self.state_tx.send_replace(state);
        let _ = self.user_tx.send_replace(self.subscribed);
    }

    fn cancel_retry(&mut self) -> bool {
        self.pending_retry = None;
        self.policy.cancel()
    }

    fn handle_connect(&mut self, user_id: Option<UserId>) {
        let Some(user_id) = user_id else {
            debug!("connect without a user id, ignoring");
            return;
        };
        self.torn_down = false;
        if self.cancel_retry() {
            debug!("explicit connect superseded pending reconnect");
        }

        if let Some(prev) = self.current.take() {
            if prev.state.is_active() {
                debug!(seq = %prev.seq, "closing previous connection before reconnecting");
                prev.transport.close(CloseCode::NORMAL);
            }
        }

        self.next_seq += 1;
        let seq = ConnectionSeq(self.next_seq);
        let sink = EventSink::new(seq, self.events_tx.clone());
        let transport = self.connector.open(&self.url, sink);
        info!(%seq, %user_id, url = %self.url, "connecting");

        self.current = Some(Current {
            seq,
            user_id,
            state: ConnectionState::Connecting,
            transport,
        });
        self.subscribed = Some(user_id);
        self.ever_connected = true;
        self.publish();
    }

    fn handle_teardown(&mut self) {
        let was_torn_down = self.torn_down;
        self.torn_down = true;
        if self.cancel_retry() {
            info!("pending reconnect cancelled");
        }
        if let Some(current) = self.current.as_mut() {
            if current.state.is_active() {
                info!(seq = %current.seq, "closing connection");
                current.transport.close(CloseCode::NORMAL);
                current.state = ConnectionState::Closing;
            }
        }
        self.subscribed = None;
        if !was_torn_down {
            debug!("connection manager torn down");
        }
        self.publish();
    }

    fn handle_retry_fired(&mut self, id: u64) {
        if self.pending_retry != Some(id) {
            debug!(retry = id, "stale reconnect timer, ignoring");
            return;
        }
        self.pending_retry = None;
        self.policy.clear_fired();
        if self.torn_down {
            return;
        }
        info!(user_id = ?self.subscribed, "reconnecting");
        self.handle_connect(self.subscribed);
    }

    fn schedule_reconnect(&mut self) {
        self.next_retry_id += 1;
        let id = self.next_retry_id;
        let weak = self.cmd_weak.clone();
        let scheduled = self.policy.schedule_retry(move || {
            if let Some(tx) = weak.upgrade() {
                let _ = tx.send(Command::RetryFired(id));
            }
        });
        match scheduled {
            Ok(()) => {
                self.pending_retry = Some(id);
                info!(delay = ?self.policy.delay(), "reconnect scheduled");
            }
            Err(e) => debug!(error = %e, "keeping existing reconnect"),
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        let TransportEvent { seq, event } = event;
        let Some(current) = self.current.as_mut().filter(|c| c.seq == seq) else {
            debug!(%seq, ?event, "event from a replaced connection, ignoring");
            return;
        };

        match event {
            LifecycleEvent::Opened => {
                if current.state != ConnectionState::Connecting || self.torn_down {
                    debug!(%seq, state = %current.state, "late open, ignoring");
                    return;
                }
                current.state = ConnectionState::Open;
                let subscribe = Message::subscribe(current.user_id);
                let sent = encode(&subscribe)
                    .map_err(ClientError::from)
                    .and_then(|text| current.transport.send(text));
                match sent {
                    Ok(()) => info!(%seq, user_id = %current.user_id, "subscribed"),
                    Err(e) => warn!(%seq, error = %e, "failed to send subscribe"),
                }
                self.publish();
            }
            LifecycleEvent::Message(data) => {
                if current.state != ConnectionState::Open || self.torn_down {
                    return;
                }
                let user_id = current.user_id;
                self.handle_message(seq, user_id, &data);
            }
            LifecycleEvent::Error(message) => {
                warn!(%seq, error = %message, "transport error");
            }
            LifecycleEvent::Closed { code, reason } => {
                self.current = None;
                if self.torn_down {
                    info!(%seq, %code, "connection closed");
                } else {
                    warn!(%seq, %code, %reason, "connection lost");
                    self.schedule_reconnect();
                }
                self.publish();
            }
        }
    }

    fn handle_message(&self, seq: ConnectionSeq, subscribed: UserId, data: &[u8]) {
        match decode(data) {
            Ok(Message::InvestmentUpdate { user_id, .. }) if user_id == subscribed => {
                let key = CacheKey::investments(user_id);
                debug!(%seq, %key, "invalidating");
                self.invalidator.invalidate(&key);
            }
            Ok(Message::InvestmentUpdate { user_id, .. }) => {
                debug!(%seq, %user_id, %subscribed, "update for another user, dropping");
            }
            Ok(other) => {
                debug!(%seq, kind = other.kind(), "no action for message, dropping");
            }
            Err(e) => {
                warn!(%seq, error = %e, kind = e.error_kind(), "undecodable message, dropping");
            }
        }
    }
}
