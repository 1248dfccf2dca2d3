//! Connection lifecycle on top of a [`Transport`].
//!
//! The controller owns connection intent and turns raw transport events into
//! three observer events:
//!
//! - `connect_result(bool)`: exactly once per [`SessionController::connect`];
//!   later results for the same attempt are ignored with a warning
//! - `disconnected`: an open connection closed
//! - `error(reason)`: the transport reported a problem
//!
//! A single pump task consumes transport events in delivery order. Packets
//! are routed only while the connection is open.

use std::sync::Arc;

use handoff_core::TransportError;
use handoff_core::protocol::{OutboundFrame, OutboundTag};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::observers::{ObserverList, SubscriptionId};
use crate::router::MessageRouter;
use crate::transport::{EventSink, EventStream, Transport, TransportEvent};

/// Connection state as seen by the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    /// No connection and no attempt in progress.
    Idle,
    /// `connect` was called; no result yet.
    Connecting,
    /// The connection is open.
    Connected,
}

struct Link {
    state: LinkState,
    epoch: u64,
}

struct Inner {
    transport: Arc<dyn Transport>,
    router: Arc<MessageRouter>,
    link: Mutex<Link>,
    sink: EventSink,
    connect_result: ObserverList<bool>,
    disconnected: ObserverList<()>,
    error: ObserverList<String>,
}

/// Owns one relay connection and fans its events out to observers.
pub struct SessionController {
    inner: Arc<Inner>,
    pump: JoinHandle<()>,
}

impl SessionController {
    /// Create a controller and start its event pump.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(transport: Arc<dyn Transport>, router: Arc<MessageRouter>) -> Self {
        let (sink, events) = EventSink::channel(0);
        let inner = Arc::new(Inner {
            transport,
            router,
            link: Mutex::new(Link {
                state: LinkState::Idle,
                epoch: 0,
            }),
            sink,
            connect_result: ObserverList::new(),
            disconnected: ObserverList::new(),
            error: ObserverList::new(),
        });
        let pump = tokio::spawn(run_pump(Arc::clone(&inner), events));
        Self { inner, pump }
    }

    /// Start connecting. The outcome arrives as one `connect_result`.
    ///
    /// Callers are expected to be idle; connecting while a connection is open
    /// replaces it.
    pub fn connect(&self) {
        let epoch = {
            let mut link = self.inner.link.lock();
            if link.state != LinkState::Idle {
                warn!(state = ?link.state, "connect while a connection is active, replacing it");
            }
            link.epoch += 1;
            link.state = LinkState::Connecting;
            link.epoch
        };
        info!(epoch, "connecting to relay");
        self.inner.transport.connect(self.inner.sink.with_epoch(epoch));
    }

    /// Close the connection if one is open or in progress.
    ///
    /// Idempotent. Returns `false` if there was nothing to close. Closing an
    /// open connection notifies `disconnected` observers before returning;
    /// abandoning an attempt produces no `connect_result`.
    pub fn disconnect(&self) -> bool {
        let previous = {
            let mut link = self.inner.link.lock();
            let previous = link.state;
            if previous == LinkState::Idle {
                return false;
            }
            link.state = LinkState::Idle;
            // Anything the transport still reports for this connection is stale.
            link.epoch += 1;
            previous
        };
        info!(was = ?previous, "disconnecting from relay");
        self.inner.transport.close();
        if previous == LinkState::Connected {
            let _ = self.inner.disconnected.notify(&());
        }
        true
    }

    /// Send a message. `None` sends the bare tag.
    ///
    /// Never fails to the caller; sending while not connected is reported to
    /// `error` observers.
    pub fn send(&self, tag: OutboundTag, payload: Option<&str>) {
        let state = self.inner.link.lock().state;
        if state != LinkState::Connected {
            let reason = TransportError::Closed.to_string();
            warn!(%tag, ?state, "send while not connected");
            let _ = self.inner.error.notify(&reason);
            return;
        }
        debug!(%tag, has_payload = payload.is_some(), "sending");
        self.inner.transport.emit(OutboundFrame::new(tag, payload));
    }

    /// Whether the connection is open.
    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Current connection state.
    pub fn state(&self) -> LinkState {
        self.inner.link.lock().state
    }

    /// Router that receives packets from this connection.
    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.inner.router
    }

    /// Observe connect outcomes.
    pub fn on_connect_result(
        &self,
        observer: impl Fn(&bool) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.connect_result.subscribe(observer)
    }

    /// Observe closes of an open connection.
    pub fn on_disconnected(
        &self,
        observer: impl Fn(&()) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.disconnected.subscribe(observer)
    }

    /// Observe transport errors.
    pub fn on_error(&self, observer: impl Fn(&String) + Send + Sync + 'static) -> SubscriptionId {
        self.inner.error.subscribe(observer)
    }

    /// Remove a connect-result observer.
    pub fn remove_connect_result(&self, id: SubscriptionId) -> bool {
        self.inner.connect_result.unsubscribe(id)
    }

    /// Remove a disconnected observer.
    pub fn remove_disconnected(&self, id: SubscriptionId) -> bool {
        self.inner.disconnected.unsubscribe(id)
    }

    /// Remove an error observer.
    pub fn remove_error(&self, id: SubscriptionId) -> bool {
        self.inner.error.unsubscribe(id)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.pump.abort();
        self.inner.transport.close();
    }
}

async fn run_pump(inner: Arc<Inner>, mut events: EventStream) {
    while let Some((epoch, event)) = events.recv().await {
        inner.handle_event(epoch, event);
    }
}

impl Inner {
    fn handle_event(&self, epoch: u64, event: TransportEvent) {
        let mut link = self.link.lock();
        if epoch != link.epoch {
            debug!(
                epoch,
                current = link.epoch,
                kind = event.kind(),
                "ignoring stale transport event"
            );
            return;
        }

        match event {
            TransportEvent::Connected => {
                if link.state != LinkState::Connecting {
                    warn!(epoch, state = ?link.state, "duplicate connect result ignored");
                    return;
                }
                link.state = LinkState::Connected;
                drop(link);
                info!(epoch, "relay connection open");
                let _ = self.connect_result.notify(&true);
            }
            TransportEvent::ConnectFailed(reason) => {
                if link.state != LinkState::Connecting {
                    warn!(epoch, state = ?link.state, "duplicate connect result ignored");
                    return;
                }
                link.state = LinkState::Idle;
                drop(link);
                warn!(epoch, reason = %reason, "relay connect failed");
                let _ = self.connect_result.notify(&false);
            }
            TransportEvent::Disconnected => match link.state {
                LinkState::Connecting => {
                    link.state = LinkState::Idle;
                    drop(link);
                    warn!(epoch, "connection closed before it opened");
                    let _ = self.connect_result.notify(&false);
                }
                LinkState::Connected => {
                    link.state = LinkState::Idle;
                    drop(link);
                    info!(epoch, "relay connection closed");
                    let _ = self.disconnected.notify(&());
                }
                LinkState::Idle => {
                    debug!(epoch, "disconnect while idle ignored");
                }
            },
            TransportEvent::Error(reason) => {
                drop(link);
                warn!(epoch, reason = %reason, "transport error");
                let _ = self.error.notify(&reason);
            }
            TransportEvent::Packet(packet) => {
                if link.state != LinkState::Connected {
                    debug!(epoch, state = ?link.state, "dropping packet while not connected");
                    return;
                }
                drop(link);
                let _ = self.router.dispatch(&packet);
            }
        }
    }
}
