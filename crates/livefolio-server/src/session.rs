//! WebSocket session lifecycle: one connected subscriber from upgrade
//! through disconnect.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket, close_code};
use futures::{SinkExt, StreamExt};
use livefolio_core::{Message, UserId, decode};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::MIN_HEARTBEAT_INTERVAL;
use crate::connection::ConnectionHandle;
use crate::metrics::{
    SUBSCRIPTIONS_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL, WS_INBOUND_DROPPED_TOTAL,
};
use crate::registry::ConnectionRegistry;

/// How long the writer gets to flush a close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Ping cadence and how long a silent client is tolerated.
#[derive(Clone, Copy, Debug)]
pub struct Heartbeat {
    /// Interval between server pings.
    pub interval: Duration,
    /// Disconnect after this long without a pong.
    pub timeout: Duration,
}

/// Everything a session needs besides its socket.
pub struct SessionContext {
    /// Where subscriptions are recorded.
    pub registry: Arc<ConnectionRegistry>,
    /// Ping settings.
    pub heartbeat: Heartbeat,
    /// Server-wide shutdown.
    pub shutdown: CancellationToken,
}

/// Why the writer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterExit {
    Closed,
    Shutdown,
    PongTimeout,
    WriteFailed,
}

/// Run a WebSocket session for a connected client.
///
/// 1. Forwards queued frames and periodic pings to the socket
/// 2. Registers the connection on every valid `subscribe`
/// 3. Drops anything else without closing
/// 4. Closes on eviction, heartbeat timeout or server shutdown
/// 5. Unregisters on disconnect
#[instrument(skip_all, fields(connection_id = %handle.id()))]
pub async fn run_ws_session(
    ws: WebSocket,
    handle: Arc<ConnectionHandle>,
    send_rx: mpsc::Receiver<Arc<String>>,
    ctx: SessionContext,
) {
    let (ws_tx, mut ws_rx) = ws.split();

    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    let close = handle.close_token();
    let mut outbound = tokio::spawn(write_loop(
        ws_tx,
        send_rx,
        Arc::clone(&handle),
        ctx.heartbeat,
        ctx.shutdown.clone(),
    ));

    let mut peer_closed = true;
    loop {
        let frame = tokio::select! {
            () = close.cancelled() => {
                peer_closed = false;
                break;
            }
            frame = ws_rx.next() => frame,
        };
        let msg = match frame {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                debug!(error = %e, "websocket read failed");
                break;
            }
            None => break,
        };
        match msg {
            WsMessage::Text(text) => {
                let _ = handle_inbound(text.as_bytes(), &handle, &ctx.registry);
            }
            WsMessage::Binary(data) => {
                let _ = handle_inbound(&data, &handle, &ctx.registry);
            }
            WsMessage::Close(_) => {
                debug!("client sent close frame");
                break;
            }
            WsMessage::Ping(_) | WsMessage::Pong(_) => handle.mark_alive(),
        }
    }

    if peer_closed {
        outbound.abort();
    } else if tokio::time::timeout(CLOSE_GRACE, &mut outbound).await.is_err() {
        outbound.abort();
    }
    handle.close();
    let _ = ctx.registry.unregister(handle.id());

    let age = handle.age();
    info!(duration_secs = age.as_secs(), "client disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(age.as_secs_f64());
}

/// Drain the send queue into the socket, pinging on the heartbeat interval.
async fn write_loop<S>(
    mut ws_tx: S,
    mut send_rx: mpsc::Receiver<Arc<String>>,
    handle: Arc<ConnectionHandle>,
    heartbeat: Heartbeat,
    shutdown: CancellationToken,
) -> WriterExit
where
    S: futures::Sink<WsMessage> + Unpin,
{
    let close = handle.close_token();
    let mut ping_interval = tokio::time::interval(heartbeat.interval.max(MIN_HEARTBEAT_INTERVAL));
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    let exit = loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break WriterExit::Shutdown,
            () = close.cancelled() => break WriterExit::Closed,
            msg = send_rx.recv() => match msg {
                Some(text) => {
                    if ws_tx.send(WsMessage::Text(text.as_str().into())).await.is_err() {
                        break WriterExit::WriteFailed;
                    }
                }
                None => break WriterExit::Closed,
            },
            _ = ping_interval.tick() => {
                if !handle.check_alive() && handle.last_pong_elapsed() > heartbeat.timeout {
                    warn!(timeout = ?heartbeat.timeout, "client unresponsive, disconnecting");
                    break WriterExit::PongTimeout;
                }
                if ws_tx.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                    break WriterExit::WriteFailed;
                }
            }
        }
    };

    let frame = match exit {
        WriterExit::Shutdown => Some((close_code::AWAY, "server shutting down")),
        WriterExit::Closed => Some((close_code::AGAIN, "connection evicted")),
        WriterExit::PongTimeout => Some((close_code::POLICY, "heartbeat timeout")),
        WriterExit::WriteFailed => None,
    };
    if let Some((code, reason)) = frame {
        let _ = ws_tx
            .send(WsMessage::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })))
            .await;
    }
    debug!(?exit, "writer stopped");
    handle.close();
    exit
}

/// Apply one inbound frame. Returns the user subscribed to, if any.
///
/// Malformed, unknown and server-only messages are logged and dropped;
/// they never close the connection.
pub fn handle_inbound(
    data: &[u8],
    handle: &Arc<ConnectionHandle>,
    registry: &ConnectionRegistry,
) -> Option<UserId> {
    match decode(data) {
        Ok(Message::Subscribe { user_id }) => {
            if handle.is_closed() {
                return None;
            }
            registry.register(user_id, Arc::clone(handle));
            counter!(SUBSCRIPTIONS_TOTAL).increment(1);
            info!(%user_id, "client subscribed");
            Some(user_id)
        }
        Ok(other) => {
            debug!(kind = other.kind(), "ignoring unexpected inbound message");
            counter!(WS_INBOUND_DROPPED_TOTAL, "reason" => "unexpected").increment(1);
            None
        }
        Err(e) => {
            warn!(error = %e, len = data.len(), "dropping malformed inbound message");
            counter!(WS_INBOUND_DROPPED_TOTAL, "reason" => e.error_kind()).increment(1);
            None
        }
    }
}
