//! WebSocket transport on `tokio-tungstenite`.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::transport::{CloseCode, Connector, EventSink, Transport};

/// How long to wait for the peer to acknowledge our close frame.
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

enum Outbound {
    Text(String),
    Close(CloseCode),
}

/// Opens real WebSocket connections.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Create a connector.
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    fn open(&self, url: &str, sink: EventSink) -> Box<dyn Transport> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tokio::spawn(run_socket(url.to_owned(), sink, rx));
        Box::new(WsTransport { tx })
    }
}

struct WsTransport {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Transport for WsTransport {
    fn send(&self, text: String) -> Result<(), ClientError> {
        self.tx
            .send(Outbound::Text(text))
            .map_err(|_| ClientError::TransportClosed)
    }

    fn close(&self, code: CloseCode) {
        let _ = self.tx.send(Outbound::Close(code));
    }
}

/// Drive one socket from handshake to close. Emits exactly one `Closed`.
async fn run_socket(url: String, sink: EventSink, mut rx: mpsc::UnboundedReceiver<Outbound>) {
    let seq = sink.seq();
    debug!(%seq, %url, "connecting");

    let connected = tokio::select! {
        res = tokio_tungstenite::connect_async(url.as_str()) => res,
        cmd = rx.recv() => {
            // Only a close (or a dropped handle) can arrive before open.
            let code = match cmd {
                Some(Outbound::Close(code)) => code,
                _ => CloseCode::NORMAL,
            };
            sink.closed(code, "closed before open");
            return;
        }
    };

    let ws = match connected {
        Ok((ws, _response)) => ws,
        Err(e) => {
            let reason = ClientError::WebSocket(e.to_string()).to_string();
            sink.error(reason.clone());
            sink.closed(CloseCode::ABNORMAL, reason);
            return;
        }
    };
    sink.opened();

    let (mut ws_tx, mut ws_rx) = ws.split();
    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = ws_tx.send(WsMessage::Text(text.into())).await {
                        sink.error(e.to_string());
                    }
                }
                Some(Outbound::Close(code)) => {
                    close_and_drain(&mut ws_tx, &mut ws_rx, code).await;
                    sink.closed(code, "closed by client");
                    return;
                }
                None => {
                    close_and_drain(&mut ws_tx, &mut ws_rx, CloseCode::NORMAL).await;
                    sink.closed(CloseCode::NORMAL, "transport dropped");
                    return;
                }
            },
            frame = ws_rx.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => sink.message(text.as_str()),
                Some(Ok(WsMessage::Binary(data))) => sink.message(data.to_vec()),
                Some(Ok(WsMessage::Close(frame))) => {
                    let (code, reason) = frame.map_or((CloseCode::NO_STATUS, String::new()), |f| {
                        (CloseCode(u16::from(f.code)), f.reason.as_str().to_owned())
                    });
                    debug!(%seq, %code, %reason, "server closed connection");
                    // tungstenite queued the close reply; push it out before dropping the socket.
                    let _ = tokio::time::timeout(CLOSE_HANDSHAKE_TIMEOUT, ws_tx.flush()).await;
                    sink.closed(code, reason);
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(%seq, error = %e, "websocket read failed");
                    sink.error(e.to_string());
                    sink.closed(CloseCode::ABNORMAL, e.to_string());
                    return;
                }
                None => {
                    sink.closed(CloseCode::ABNORMAL, "stream ended");
                    return;
                }
            },
        }
    }
}

async fn close_and_drain<S, R>(ws_tx: &mut S, ws_rx: &mut R, code: CloseCode)
where
    S: futures::Sink<WsMessage> + Unpin,
    R: futures::Stream + Unpin,
{
    let frame = CloseFrame {
        code: code.0.into(),
        reason: "".into(),
    };
    if ws_tx.send(WsMessage::Close(Some(frame))).await.is_err() {
        return;
    }
    // Wait for the peer's close echo so the handshake completes cleanly.
    let _ = tokio::time::timeout(CLOSE_HANDSHAKE_TIMEOUT, async {
        while ws_rx.next().await.is_some() {}
    })
    .await;
}
