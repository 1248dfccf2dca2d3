//! Transport adapters.
//!
//! A [`Transport`] owns one duplex connection to a relay. Its methods never
//! block and never fail to the caller: outcomes come back later as
//! [`TransportEvent`]s pushed into the [`EventSink`] handed over on
//! [`Transport::connect`].
//!
//! Every sink carries the epoch of the connect call that created it, so the
//! session controller can discard events from a connection it already gave up
//! on.

mod memory;
mod websocket;

pub use memory::MemoryTransport;
pub use websocket::{WebSocketConfig, WebSocketTransport};

use handoff_core::protocol::{InboundPacket, OutboundFrame};
use tokio::sync::mpsc;

/// Lifecycle and data events reported by a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is open.
    Connected,
    /// The connection could not be opened.
    ConnectFailed(String),
    /// The connection closed, locally or remotely.
    Disconnected,
    /// Something went wrong on an open connection.
    Error(String),
    /// One inbound message.
    Packet(InboundPacket),
}

impl TransportEvent {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::ConnectFailed(_) => "connect_failed",
            Self::Disconnected => "disconnected",
            Self::Error(_) => "error",
            Self::Packet(_) => "packet",
        }
    }
}

/// Receiving half of the event channel, consumed by the session controller.
pub type EventStream = mpsc::UnboundedReceiver<(u64, TransportEvent)>;

/// Where a transport reports events for one connect call.
#[derive(Clone, Debug)]
pub struct EventSink {
    epoch: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl EventSink {
    /// Create a sink/stream pair for `epoch`.
    pub fn channel(epoch: u64) -> (Self, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { epoch, tx }, rx)
    }

    /// Sink for another epoch on the same channel.
    pub fn with_epoch(&self, epoch: u64) -> Self {
        Self {
            epoch,
            tx: self.tx.clone(),
        }
    }

    /// Epoch this sink reports under.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Report an event. Returns `false` once the controller is gone.
    pub fn send(&self, event: TransportEvent) -> bool {
        self.tx.send((self.epoch, event)).is_ok()
    }
}

/// One duplex connection to a relay server.
pub trait Transport: Send + Sync {
    /// Start opening a connection.
    ///
    /// The outcome arrives on `sink` as `Connected` or `ConnectFailed`. Any
    /// connection opened by an earlier call is closed first.
    fn connect(&self, sink: EventSink);

    /// Close the current connection, if any.
    fn close(&self);

    /// Queue one frame for sending. Failures are reported as `Error` events.
    fn emit(&self, frame: OutboundFrame);
}
