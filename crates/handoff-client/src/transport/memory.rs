//! In-process transport driven by the caller.
//!
//! Records every connect, close, and emitted frame, and lets the caller play
//! the relay's side by injecting events. Used by the flow tests and handy for
//! embedding the client without a network.

use handoff_core::protocol::{InboundPacket, OutboundFrame, OutboundTag};
use handoff_core::TransportError;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{EventSink, Transport, TransportEvent};

#[derive(Default)]
struct MemoryState {
    sink: Option<EventSink>,
    open: bool,
    sent: Vec<OutboundFrame>,
    connects: usize,
    closes: usize,
}

/// Transport whose relay side is scripted by the caller.
#[derive(Default)]
pub struct MemoryTransport {
    state: Mutex<MemoryState>,
}

impl MemoryTransport {
    /// Create a transport with no connection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the pending connection and report `Connected`.
    pub fn accept(&self) -> bool {
        let mut state = self.state.lock();
        state.open = true;
        let sink = state.sink.clone();
        drop(state);
        sink.is_some_and(|s| s.send(TransportEvent::Connected))
    }

    /// Report `ConnectFailed` for the pending connection.
    pub fn refuse(&self, reason: &str) -> bool {
        self.inject(TransportEvent::ConnectFailed(reason.to_owned()))
    }

    /// Deliver a text frame as the relay would send it.
    ///
    /// Undecodable frames are logged and dropped, as on a real socket.
    pub fn deliver(&self, text: &str) -> bool {
        match InboundPacket::decode(text) {
            Ok(packet) => self.inject(TransportEvent::Packet(packet)),
            Err(err) => {
                warn!(error = %err, "dropping undecodable frame");
                false
            }
        }
    }

    /// Drop the connection from the relay side.
    pub fn drop_connection(&self) -> bool {
        self.state.lock().open = false;
        self.inject(TransportEvent::Disconnected)
    }

    /// Report an arbitrary event on the current sink.
    pub fn inject(&self, event: TransportEvent) -> bool {
        let sink = self.state.lock().sink.clone();
        sink.is_some_and(|s| s.send(event))
    }

    /// Frames emitted while the connection was open, oldest first.
    pub fn sent(&self) -> Vec<OutboundFrame> {
        self.state.lock().sent.clone()
    }

    /// Emitted frames carrying `tag`.
    pub fn sent_with_tag(&self, tag: OutboundTag) -> Vec<OutboundFrame> {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|f| f.tag == tag)
            .cloned()
            .collect()
    }

    /// Number of `connect` calls.
    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    /// Number of `close` calls.
    pub fn close_count(&self) -> usize {
        self.state.lock().closes
    }

    /// Whether the connection is open.
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }
}

impl Transport for MemoryTransport {
    fn connect(&self, sink: EventSink) {
        let mut state = self.state.lock();
        state.connects += 1;
        state.open = false;
        debug!(epoch = sink.epoch(), "memory transport connecting");
        state.sink = Some(sink);
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closes += 1;
        let was_open = std::mem::replace(&mut state.open, false);
        let sink = state.sink.clone();
        drop(state);
        // A real socket reports its own close.
        if was_open {
            if let Some(sink) = sink {
                let _ = sink.send(TransportEvent::Disconnected);
            }
        }
    }

    fn emit(&self, frame: OutboundFrame) {
        let mut state = self.state.lock();
        if state.open {
            state.sent.push(frame);
            return;
        }
        let sink = state.sink.clone();
        drop(state);
        if let Some(sink) = sink {
            let _ = sink.send(TransportEvent::Error(TransportError::Closed.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_frames_only_while_open() {
        let transport = MemoryTransport::new();
        let (sink, mut rx) = EventSink::channel(1);
        transport.connect(sink);

        transport.emit(OutboundFrame::new(OutboundTag::Host, Some("early")));
        assert_eq!(
            rx.recv().await,
            Some((1, TransportEvent::Error("connection closed".into())))
        );

        assert!(transport.accept());
        assert_eq!(rx.recv().await, Some((1, TransportEvent::Connected)));

        transport.emit(OutboundFrame::new(OutboundTag::Host, Some("shoes")));
        assert_eq!(transport.sent_with_tag(OutboundTag::Host).len(), 1);
        assert_eq!(transport.sent()[0].payload.as_deref(), Some("shoes"));
    }

    #[tokio::test]
    async fn close_reports_disconnect_once() {
        let transport = MemoryTransport::new();
        let (sink, mut rx) = EventSink::channel(7);
        transport.connect(sink);
        let _ = transport.accept();
        let _ = rx.recv().await;

        transport.close();
        transport.close();
        assert_eq!(transport.close_count(), 2);
        assert_eq!(rx.recv().await, Some((7, TransportEvent::Disconnected)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn deliver_decodes_frames() {
        let transport = MemoryTransport::new();
        let (sink, mut rx) = EventSink::channel(0);
        transport.connect(sink);

        assert!(transport.deliver(r#"["ItemID","shoes"]"#));
        let (_, event) = rx.recv().await.unwrap();
        let TransportEvent::Packet(packet) = event else {
            panic!("expected packet, got {event:?}");
        };
        assert_eq!(packet.text_payload().as_deref(), Some("shoes"));

        assert!(!transport.deliver("{oops"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn inject_without_connect_is_dropped() {
        let transport = MemoryTransport::new();
        assert!(!transport.accept());
        assert!(!transport.refuse("nope"));
        assert_eq!(transport.connect_count(), 0);
    }
}
