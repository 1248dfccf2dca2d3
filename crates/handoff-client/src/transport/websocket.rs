//! WebSocket transport over `tokio-tungstenite`.
//!
//! Each connect spawns one task that opens the socket (bounded by the
//! configured timeout) and then runs a select loop forwarding queued outbound
//! frames and decoding inbound text frames.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use handoff_core::TransportError;
use handoff_core::protocol::{InboundPacket, OutboundFrame};
use handoff_settings::RelaySettings;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{EventSink, Transport, TransportEvent};

/// Connection parameters for [`WebSocketTransport`].
#[derive(Clone, Debug)]
pub struct WebSocketConfig {
    /// Relay URL (`ws://` or `wss://`).
    pub url: String,
    /// Upper bound on opening the socket.
    pub connect_timeout: Duration,
    /// Outbound frames buffered before sends are refused.
    pub outbound_queue: usize,
}

impl WebSocketConfig {
    /// Build from loaded relay settings.
    pub fn from_settings(relay: &RelaySettings) -> Self {
        Self {
            url: relay.url.clone(),
            connect_timeout: Duration::from_millis(relay.connect_timeout_ms),
            outbound_queue: relay.outbound_queue.max(1),
        }
    }
}

struct Connection {
    sink: EventSink,
    out_tx: mpsc::Sender<OutboundFrame>,
    cancel: CancellationToken,
    _task: JoinHandle<()>,
}

/// Relay transport over a WebSocket.
///
/// `connect` must be called from within a tokio runtime.
pub struct WebSocketTransport {
    config: WebSocketConfig,
    active: Mutex<Option<Connection>>,
}

impl WebSocketTransport {
    /// Create a transport for `config`. Nothing is opened until `connect`.
    pub fn new(config: WebSocketConfig) -> Self {
        Self {
            config,
            active: Mutex::new(None),
        }
    }

    /// Configured relay URL.
    pub fn url(&self) -> &str {
        &self.config.url
    }
}

impl Transport for WebSocketTransport {
    fn connect(&self, sink: EventSink) {
        let (out_tx, out_rx) = mpsc::channel(self.config.outbound_queue);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_connection(
            self.config.clone(),
            sink.clone(),
            out_rx,
            cancel.clone(),
        ));

        let previous = self.active.lock().replace(Connection {
            sink,
            out_tx,
            cancel,
            _task: task,
        });
        if let Some(previous) = previous {
            debug!(epoch = previous.sink.epoch(), "replacing open connection");
            previous.cancel.cancel();
        }
    }

    fn close(&self) {
        if let Some(conn) = self.active.lock().take() {
            debug!(epoch = conn.sink.epoch(), "closing connection");
            conn.cancel.cancel();
        }
    }

    fn emit(&self, frame: OutboundFrame) {
        let guard = self.active.lock();
        let Some(conn) = guard.as_ref() else {
            warn!(tag = %frame.tag, "emit with no connection, dropping frame");
            return;
        };
        let err = match conn.out_tx.try_send(frame) {
            Ok(()) => return,
            Err(mpsc::error::TrySendError::Full(frame)) => {
                TransportError::Send(format!("outbound queue full, dropped {}", frame.tag))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => TransportError::Closed,
        };
        let sink = conn.sink.clone();
        drop(guard);
        warn!(error = %err, "emit failed");
        let _ = sink.send(TransportEvent::Error(err.to_string()));
    }
}

async fn run_connection(
    config: WebSocketConfig,
    sink: EventSink,
    mut out_rx: mpsc::Receiver<OutboundFrame>,
    cancel: CancellationToken,
) {
    let epoch = sink.epoch();
    let opening = tokio::time::timeout(config.connect_timeout, connect_async(config.url.as_str()));

    let ws = tokio::select! {
        () = cancel.cancelled() => {
            debug!(epoch, "connect abandoned");
            return;
        }
        result = opening => match result {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(e)) => {
                let err = TransportError::Connect(e.to_string());
                warn!(epoch, url = %config.url, error = %err, "relay connect failed");
                let _ = sink.send(TransportEvent::ConnectFailed(err.to_string()));
                return;
            }
            Err(_elapsed) => {
                #[allow(clippy::cast_possible_truncation)]
                let err = TransportError::ConnectTimeout {
                    timeout_ms: config.connect_timeout.as_millis() as u64,
                };
                warn!(epoch, url = %config.url, error = %err, "relay connect failed");
                let _ = sink.send(TransportEvent::ConnectFailed(err.to_string()));
                return;
            }
        }
    };

    info!(epoch, url = %config.url, "relay connected");
    let _ = sink.send(TransportEvent::Connected);
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                // Flush frames queued just before close, e.g. a final ack.
                while let Ok(frame) = out_rx.try_recv() {
                    if ws_tx.send(Message::Text(frame.encode().into())).await.is_err() {
                        break;
                    }
                }
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            frame = out_rx.recv() => {
                let Some(frame) = frame else { break };
                debug!(epoch, tag = %frame.tag, "sending frame");
                if let Err(e) = ws_tx.send(Message::Text(frame.encode().into())).await {
                    let err = TransportError::Send(e.to_string());
                    let _ = sink.send(TransportEvent::Error(err.to_string()));
                    break;
                }
            }
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => match InboundPacket::decode(text.as_str()) {
                    Ok(packet) => {
                        let _ = sink.send(TransportEvent::Packet(packet));
                    }
                    Err(err) => {
                        warn!(epoch, error = %err, "dropping undecodable frame");
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(epoch, error = %e, "relay socket error");
                    let _ = sink.send(TransportEvent::Error(e.to_string()));
                    break;
                }
            }
        }
    }

    info!(epoch, "relay disconnected");
    let _ = sink.send(TransportEvent::Disconnected);
}
