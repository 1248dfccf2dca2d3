//! Sender and receiver handoff flows.
//!
//! # Sender
//!
//! `Idle → Connecting → SenderAwaitingCode → SenderAwaitingReceipt → Idle`
//!
//! Connect, send `Host(item)`, show the code from `ConnectionID`, and tear the
//! connection down once `ItemReceived` arrives.
//!
//! # Receiver
//!
//! `Idle → Connecting → ReceiverAwaitingItem → Idle`
//!
//! Connect, send `GetItem(code)`, then either show the item and acknowledge
//! with `ItemReceived(code)`, or report the `INVALID` sentinel and hand the
//! retrieve control back.
//!
//! Each request runs as one task that suspends on one-shot waits. Waits are
//! armed under the state lock before the message that triggers their reply is
//! sent, and every transition into `Idle` cancels them. A generation counter
//! makes any step of an older flow a no-op.

mod state;
mod waits;

pub use state::{HandoffView, Notice, Phase, Role, Session};

use std::future::Future;
use std::sync::{Arc, Weak};

use handoff_core::protocol::{InboundPacket, InboundTag, ItemLookup, OutboundTag};
use handoff_core::{HandoffError, Rejection};
use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::observers::SubscriptionId;
use crate::reachability::Reachability;
use crate::router::MessageRouter;
use crate::session::SessionController;
use crate::transport::Transport;
use waits::{PendingWaits, wait_for};

struct Flow {
    cancel: CancellationToken,
}

#[derive(Default)]
struct MachineState {
    phase: Phase,
    session: Option<Session>,
    generation: u64,
    flow: Option<Flow>,
    /// Teardowns in progress. The idle view is published only once the
    /// connection is closed and the waits are gone.
    teardowns: u32,
    /// Bumped by every return to idle.
    resets: u64,
}

impl MachineState {
    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.phase != Phase::Idle && self.teardowns == 0
    }

    fn is_settled(&self) -> bool {
        self.phase == Phase::Idle && self.teardowns == 0
    }

    /// Claim the current flow for teardown.
    fn start_teardown(&mut self) -> (Option<Flow>, u64) {
        self.teardowns += 1;
        (self.flow.take(), self.resets)
    }

    /// Release a teardown claim. Returns whether the flow still owns the view,
    /// i.e. no return to idle happened in the meantime.
    fn end_teardown(&mut self, resets: u64) -> bool {
        self.teardowns -= 1;
        if self.resets != resets {
            return false;
        }
        self.phase = Phase::Idle;
        self.session = None;
        true
    }
}

struct Attachment {
    connect_result: SubscriptionId,
    disconnected: SubscriptionId,
    error: SubscriptionId,
}

struct MachineInner {
    session: Arc<SessionController>,
    reachability: Arc<dyn Reachability>,
    state: Mutex<MachineState>,
    view: watch::Sender<HandoffView>,
    waits: PendingWaits,
    attachment: Mutex<Option<Attachment>>,
}

/// Drives handoffs over one [`SessionController`].
///
/// Created attached: its packet handlers and session observers are
/// registered until [`detach`](Self::detach) or drop.
pub struct HandoffMachine {
    inner: Arc<MachineInner>,
}

impl HandoffMachine {
    /// Create a machine over an existing controller and attach it.
    pub fn new(session: Arc<SessionController>, reachability: Arc<dyn Reachability>) -> Self {
        let (view, _) = watch::channel(HandoffView::default());
        let machine = Self {
            inner: Arc::new(MachineInner {
                session,
                reachability,
                state: Mutex::new(MachineState::default()),
                view,
                waits: PendingWaits::new(),
                attachment: Mutex::new(None),
            }),
        };
        let _ = machine.attach();
        machine
    }

    /// Build the router and controller for `transport`, then the machine.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        reachability: Arc<dyn Reachability>,
    ) -> Self {
        let router = Arc::new(MessageRouter::new());
        let session = Arc::new(SessionController::new(transport, router));
        Self::new(session, reachability)
    }

    /// Register packet handlers and session observers.
    ///
    /// Returns `false` if already attached.
    pub fn attach(&self) -> bool {
        let mut attachment = self.inner.attachment.lock();
        if attachment.is_some() {
            return false;
        }

        let router = self.inner.session.router();
        let weak = Arc::downgrade(&self.inner);
        for tag in InboundTag::ALL {
            let weak = Weak::clone(&weak);
            let _ = router.register(tag.as_str(), move |packet| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_packet(tag, packet);
                }
            });
        }

        let w = Weak::clone(&weak);
        let connect_result = self.inner.session.on_connect_result(move |ok| {
            if let Some(inner) = w.upgrade() {
                let _ = inner.waits.connect.resolve(*ok);
            }
        });
        let w = Weak::clone(&weak);
        let disconnected = self.inner.session.on_disconnected(move |()| {
            if let Some(inner) = w.upgrade() {
                inner.on_link_lost(&HandoffError::Disconnected);
            }
        });
        let error = self.inner.session.on_error(move |reason| {
            if let Some(inner) = weak.upgrade() {
                inner.on_link_lost(&HandoffError::Transport(reason.clone()));
            }
        });

        *attachment = Some(Attachment {
            connect_result,
            disconnected,
            error,
        });
        debug!("handoff machine attached");
        true
    }

    /// Remove handlers and observers, then return to idle.
    ///
    /// Returns `false` if not attached.
    pub fn detach(&self) -> bool {
        let Some(attachment) = self.inner.attachment.lock().take() else {
            return false;
        };
        let router = self.inner.session.router();
        for tag in InboundTag::ALL {
            let _ = router.deregister(tag.as_str());
        }
        let _ = self.inner.session.remove_connect_result(attachment.connect_result);
        let _ = self.inner.session.remove_disconnected(attachment.disconnected);
        let _ = self.inner.session.remove_error(attachment.error);
        self.inner.back_to_idle();
        debug!("handoff machine detached");
        true
    }

    /// Switch the view to the receiver layout with retrieval enabled.
    pub fn enter_receiver_mode(&self) {
        self.inner.view.send_modify(|v| {
            v.mode = Some(Role::Receiver);
            v.retrieve_enabled = v.phase == Phase::Idle;
        });
    }

    /// Put `item_id` up for grabs and wait for a receiver.
    ///
    /// Returns once the connection attempt has started; progress is published
    /// on [`view`](Self::view).
    pub fn host_item(&self, item_id: &str) -> Result<(), HandoffError> {
        let inner = &self.inner;
        let item_id = item_id.trim();
        if !inner.reachability.is_online() {
            return Err(inner.reject(Rejection::Offline));
        }
        if item_id.is_empty() {
            return Err(inner.reject(Rejection::EmptyItem));
        }

        let (session, cancel, connect_rx) = inner.begin(
            |generation| Session::sender(generation, item_id),
            |v| {
                v.mode = Some(Role::Sender);
                v.code_text.clear();
                v.data_text = HandoffView::data_line(item_id);
            },
        )?;
        info!(session = %session.id, item = item_id, "hosting item");
        inner.session.connect();

        let flow = Arc::clone(inner).run_sender(
            session.generation,
            item_id.to_owned(),
            cancel,
            connect_rx,
        );
        inner.spawn_flow(&session, flow);
        Ok(())
    }

    /// Redeem a connection code. The code is matched case-insensitively.
    ///
    /// Returns once the connection attempt has started; progress is published
    /// on [`view`](Self::view).
    pub fn retrieve_item(&self, code: &str) -> Result<(), HandoffError> {
        let inner = &self.inner;
        let code = code.trim().to_uppercase();
        if !inner.reachability.is_online() {
            return Err(inner.reject(Rejection::Offline));
        }
        if code.is_empty() {
            return Err(inner.reject(Rejection::EmptyCode));
        }

        let (session, cancel, connect_rx) = inner.begin(
            |generation| Session::receiver(generation, &code),
            |v| {
                v.mode = Some(Role::Receiver);
                v.data_text.clear();
                v.retrieve_enabled = false;
            },
        )?;
        info!(session = %session.id, code = %code, "retrieving item");
        inner.session.connect();

        let flow = Arc::clone(inner).run_receiver(session.generation, code, cancel, connect_rx);
        inner.spawn_flow(&session, flow);
        Ok(())
    }

    /// Abandon any flow, disconnect, and clear everything displayed.
    ///
    /// Safe to call at any time, any number of times.
    pub fn back_to_idle(&self) {
        self.inner.back_to_idle();
    }

    /// Subscribe to view updates.
    pub fn view(&self) -> watch::Receiver<HandoffView> {
        self.inner.view.subscribe()
    }

    /// Current view.
    pub fn snapshot(&self) -> HandoffView {
        self.inner.view.borrow().clone()
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.inner.state.lock().phase
    }

    /// Record of the running session, if any.
    pub fn current_session(&self) -> Option<Session> {
        self.inner.state.lock().session.clone()
    }

    /// Number of armed waits.
    pub fn pending_waits(&self) -> usize {
        self.inner.waits.armed_count()
    }

    /// Underlying session controller.
    pub fn session_controller(&self) -> &Arc<SessionController> {
        &self.inner.session
    }
}

impl Drop for HandoffMachine {
    fn drop(&mut self) {
        let _ = self.detach();
    }
}

impl MachineInner {
    fn reject(&self, rejection: Rejection) -> HandoffError {
        let err = HandoffError::Rejected(rejection);
        warn!(%rejection, "handoff request rejected");
        if let Some(notice) = Notice::for_error(&err) {
            self.view.send_modify(|v| v.notice = Some(notice));
        }
        err
    }

    /// Open a new session and arm its connect wait.
    fn begin(
        &self,
        make_session: impl FnOnce(u64) -> Session,
        init_view: impl FnOnce(&mut HandoffView),
    ) -> Result<(Session, CancellationToken, oneshot::Receiver<bool>), HandoffError> {
        let mut st = self.state.lock();
        if !st.is_settled() {
            warn!(phase = ?st.phase, teardowns = st.teardowns, "handoff already in progress");
            return Err(HandoffError::Rejected(Rejection::Busy));
        }

        st.generation += 1;
        let session = make_session(st.generation);
        let cancel = CancellationToken::new();
        st.phase = Phase::Connecting;
        st.session = Some(session.clone());
        st.flow = Some(Flow {
            cancel: cancel.clone(),
        });

        let _ = self.waits.cancel_all();
        let connect_rx = self.waits.connect.arm(session.generation);
        self.view.send_modify(|v| {
            v.phase = Phase::Connecting;
            v.notice = None;
            init_view(v);
        });
        Ok((session, cancel, connect_rx))
    }

    fn spawn_flow<F>(self: &Arc<Self>, session: &Session, flow: F)
    where
        F: Future<Output = Result<(), HandoffError>> + Send + 'static,
    {
        let inner = Arc::clone(self);
        let generation = session.generation;
        let span = info_span!("handoff", session = %session.id, role = ?session.role, generation);
        let _ = tokio::spawn(
            async move {
                match flow.await {
                    Ok(()) => info!("handoff complete"),
                    Err(HandoffError::Cancelled) => {
                        let current = inner.state.lock().is_current(generation);
                        if current {
                            // A wait was dropped under a flow nobody tore down.
                            warn!("handoff lost its wait, resetting");
                            inner.fail(generation, &HandoffError::Cancelled);
                        } else {
                            debug!("handoff cancelled");
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, code = err.code(), "handoff failed");
                        inner.fail(generation, &err);
                    }
                }
            }
            .instrument(span),
        );
    }

    async fn run_sender(
        self: Arc<Self>,
        generation: u64,
        item_id: String,
        cancel: CancellationToken,
        connect_rx: oneshot::Receiver<bool>,
    ) -> Result<(), HandoffError> {
        if !wait_for(&cancel, connect_rx).await? {
            return Err(HandoffError::ConnectFailed);
        }

        let (code_rx, receipt_rx) = self.advance(generation, Phase::SenderAwaitingCode, |s, _| {
            s.connected = true;
            (
                self.waits.code.arm(generation),
                self.waits.receipt.arm(generation),
            )
        })?;
        self.session.send(OutboundTag::Host, Some(&item_id));

        let code = wait_for(&cancel, code_rx).await?;
        info!(code = %code, "connection code issued");
        self.advance(generation, Phase::SenderAwaitingReceipt, |s, v| {
            s.connection_code = Some(code.clone());
            v.code_text.clone_from(&code);
        })?;

        wait_for(&cancel, receipt_rx).await?;
        info!("receiver acknowledged item");
        self.finish(generation, |v| {
            v.code_text.clear();
            v.notice = Some(Notice::ItemDelivered);
        })
    }

    async fn run_receiver(
        self: Arc<Self>,
        generation: u64,
        code: String,
        cancel: CancellationToken,
        connect_rx: oneshot::Receiver<bool>,
    ) -> Result<(), HandoffError> {
        if !wait_for(&cancel, connect_rx).await? {
            return Err(HandoffError::ConnectFailed);
        }

        let item_rx = self.advance(generation, Phase::ReceiverAwaitingItem, |s, _| {
            s.connected = true;
            self.waits.item.arm(generation)
        })?;
        self.session.send(OutboundTag::GetItem, Some(&code));

        match wait_for(&cancel, item_rx).await? {
            ItemLookup::Invalid => {
                warn!(code = %code, "relay rejected connection code");
                self.finish(generation, |v| {
                    v.notice = Some(Notice::InvalidCode);
                    v.retrieve_enabled = true;
                })
            }
            ItemLookup::Found(item) => {
                info!(item = %item, "item retrieved");
                self.advance(generation, Phase::ReceiverAwaitingItem, |s, v| {
                    s.item_id = Some(item.clone());
                    s.receipt_confirmed = true;
                    v.data_text = HandoffView::data_line(&item);
                })?;
                self.session.send(OutboundTag::ItemReceived, Some(&code));
                self.finish(generation, |v| v.notice = Some(Notice::ItemRetrieved))
            }
        }
    }

    /// Move the current flow to `phase`, applying `step` under the state lock.
    fn advance<R>(
        &self,
        generation: u64,
        phase: Phase,
        step: impl FnOnce(&mut Session, &mut HandoffView) -> R,
    ) -> Result<R, HandoffError> {
        let mut st = self.state.lock();
        if !st.is_current(generation) {
            return Err(HandoffError::Cancelled);
        }
        st.phase = phase;
        let Some(session) = st.session.as_mut() else {
            return Err(HandoffError::Cancelled);
        };
        let mut view = self.view.borrow().clone();
        let out = step(session, &mut view);
        view.phase = phase;
        let _ = self.view.send_replace(view);
        Ok(out)
    }

    /// End the current flow successfully, then publish `update`.
    fn finish(
        &self,
        generation: u64,
        update: impl FnOnce(&mut HandoffView),
    ) -> Result<(), HandoffError> {
        let (flow, resets) = {
            let mut st = self.state.lock();
            if !st.is_current(generation) {
                return Err(HandoffError::Cancelled);
            }
            st.start_teardown()
        };
        self.teardown(flow);

        let mut st = self.state.lock();
        if st.end_teardown(resets) {
            self.view.send_modify(|v| {
                v.phase = Phase::Idle;
                update(v);
            });
        }
        Ok(())
    }

    /// End the current flow with `err` shown to the user.
    fn fail(&self, generation: u64, err: &HandoffError) {
        let (flow, resets) = {
            let mut st = self.state.lock();
            if !st.is_current(generation) {
                debug!(generation, error = %err, "failure for finished flow ignored");
                return;
            }
            st.start_teardown()
        };
        self.teardown(flow);

        let mut st = self.state.lock();
        if st.end_teardown(resets) {
            self.view.send_modify(|v| {
                v.clear_text();
                v.notice = Notice::for_error(err);
            });
        }
    }

    fn back_to_idle(&self) {
        let flow = {
            let mut st = self.state.lock();
            st.resets += 1;
            st.start_teardown().0
        };
        self.teardown(flow);

        let mut st = self.state.lock();
        st.teardowns -= 1;
        st.phase = Phase::Idle;
        st.session = None;
        let _ = self.view.send_replace(HandoffView::default());
        debug!("returned to idle");
    }

    /// Cancel the flow and its waits, then close the connection.
    ///
    /// Runs without the state lock: closing an open connection notifies the
    /// `disconnected` observers synchronously.
    fn teardown(&self, flow: Option<Flow>) {
        if let Some(flow) = flow {
            flow.cancel.cancel();
        }
        let cancelled = self.waits.cancel_all();
        let _ = self.session.disconnect();
        debug!(cancelled, "flow torn down");
    }

    fn on_packet(&self, tag: InboundTag, packet: &InboundPacket) {
        match tag {
            InboundTag::ConnectionId => match packet.text_payload() {
                Some(code) => {
                    let _ = self.waits.code.resolve(code);
                }
                None => warn!(%tag, "packet without payload dropped"),
            },
            InboundTag::ItemId => match packet.item_lookup() {
                Some(lookup) => {
                    let _ = self.waits.item.resolve(lookup);
                }
                None => warn!(%tag, "packet without payload dropped"),
            },
            InboundTag::ItemReceived => {
                debug!("item received by receiver");
                let _ = self.waits.receipt.resolve(());
            }
        }
    }

    fn on_link_lost(&self, err: &HandoffError) {
        let generation = {
            let st = self.state.lock();
            if st.phase == Phase::Idle || st.teardowns > 0 {
                debug!(error = %err, "link event with no flow running");
                return;
            }
            st.generation
        };
        warn!(generation, error = %err, "relay link lost mid-flow");
        self.fail(generation, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reachability::{AlwaysOnline, ManualReachability};
    use crate::transport::MemoryTransport;
    use assert_matches::assert_matches;
    use std::time::Duration;

    fn machine() -> (Arc<MemoryTransport>, HandoffMachine) {
        let transport = Arc::new(MemoryTransport::new());
        let machine = HandoffMachine::with_transport(transport.clone(), Arc::new(AlwaysOnline));
        (transport, machine)
    }

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    #[tokio::test]
    async fn attach_registers_every_inbound_tag() {
        let (_transport, machine) = machine();
        let router = machine.session_controller().router();
        assert_eq!(router.tags(), ["ConnectionID", "ItemID", "ItemReceived"]);
        assert!(!machine.attach());

        assert!(machine.detach());
        assert!(router.tags().is_empty());
        assert!(!machine.detach());

        assert!(machine.attach());
        assert_eq!(router.tags().len(), 3);
    }

    #[tokio::test]
    async fn offline_rejects_without_connecting() {
        let transport = Arc::new(MemoryTransport::new());
        let reach = Arc::new(ManualReachability::new(false));
        let machine = HandoffMachine::with_transport(transport.clone(), reach.clone());

        assert_matches!(
            machine.host_item("shoes"),
            Err(HandoffError::Rejected(Rejection::Offline))
        );
        assert_matches!(
            machine.retrieve_item("ab12"),
            Err(HandoffError::Rejected(Rejection::Offline))
        );
        assert_eq!(machine.snapshot().notice, Some(Notice::Offline));
        assert_eq!(transport.connect_count(), 0);

        reach.set_online(true);
        assert!(machine.host_item("shoes").is_ok());
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn empty_inputs_rejected() {
        let (transport, machine) = machine();
        assert_matches!(
            machine.host_item(""),
            Err(HandoffError::Rejected(Rejection::EmptyItem))
        );
        assert_eq!(machine.snapshot().notice, Some(Notice::EmptyItem));

        assert_matches!(
            machine.retrieve_item("  "),
            Err(HandoffError::Rejected(Rejection::EmptyCode))
        );
        assert_eq!(machine.snapshot().notice, Some(Notice::EmptyCode));
        assert_eq!(transport.connect_count(), 0);
        assert_eq!(machine.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn second_request_while_busy_rejected() {
        let (transport, machine) = machine();
        machine.host_item("shoes").unwrap();
        assert_matches!(
            machine.retrieve_item("AB12"),
            Err(HandoffError::Rejected(Rejection::Busy))
        );
        assert_eq!(transport.connect_count(), 1);
        assert_eq!(machine.current_session().unwrap().role, Role::Sender);
    }

    #[tokio::test]
    async fn hosting_initializes_view() {
        let (_transport, machine) = machine();
        machine.host_item("shoes").unwrap();

        let view = machine.snapshot();
        assert_eq!(view.mode, Some(Role::Sender));
        assert_eq!(view.phase, Phase::Connecting);
        assert_eq!(view.data_text, "Data: shoes");
        assert!(view.code_text.is_empty());
        assert_eq!(machine.pending_waits(), 1);
    }

    #[tokio::test]
    async fn receiver_mode_enables_retrieval() {
        let (_transport, machine) = machine();
        machine.enter_receiver_mode();
        let view = machine.snapshot();
        assert_eq!(view.mode, Some(Role::Receiver));
        assert!(view.retrieve_enabled);

        machine.retrieve_item("ab12").unwrap();
        assert!(!machine.snapshot().retrieve_enabled);
        assert_eq!(
            machine.current_session().unwrap().connection_code.as_deref(),
            Some("AB12")
        );
    }

    #[tokio::test]
    async fn transport_error_mid_flow_fails_to_idle() {
        let (transport, machine) = machine();
        machine.host_item("shoes").unwrap();
        let _ = transport.accept();
        settle().await;
        assert_eq!(machine.phase(), Phase::SenderAwaitingCode);

        let _ = transport.inject(crate::transport::TransportEvent::Error("socket reset".into()));
        settle().await;

        let view = machine.snapshot();
        assert_eq!(machine.phase(), Phase::Idle);
        assert_eq!(view.notice, Some(Notice::TransportError("socket reset".into())));
        assert!(view.data_text.is_empty());
        assert_eq!(machine.pending_waits(), 0);
        assert!(!machine.session_controller().is_connected());
    }

    #[tokio::test]
    async fn remote_disconnect_mid_flow_fails_to_idle() {
        let (transport, machine) = machine();
        machine.retrieve_item("AB12").unwrap();
        let _ = transport.accept();
        settle().await;

        let _ = transport.drop_connection();
        settle().await;

        let view = machine.snapshot();
        assert_eq!(view.phase, Phase::Idle);
        assert_eq!(view.notice, Some(Notice::ConnectionLost));
        assert!(view.retrieve_enabled);
        assert_eq!(machine.pending_waits(), 0);
    }

    #[tokio::test]
    async fn detach_cancels_waits() {
        let (_transport, machine) = machine();
        machine.host_item("shoes").unwrap();
        assert_eq!(machine.pending_waits(), 1);

        assert!(machine.detach());
        assert_eq!(machine.pending_waits(), 0);
        assert_eq!(machine.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn flow_losing_its_wait_resets_to_idle() {
        let (transport, machine) = machine();
        machine.host_item("shoes").unwrap();
        assert_eq!(machine.inner.waits.cancel_all(), 1);
        settle().await;

        let view = machine.snapshot();
        assert_eq!(view.phase, Phase::Idle);
        assert_eq!(view.notice, None);
        assert_eq!(machine.pending_waits(), 0);
        assert_eq!(transport.close_count(), 1);

        machine.host_item("hat").unwrap();
        assert_eq!(transport.connect_count(), 2);
        assert_eq!(machine.phase(), Phase::Connecting);
    }

    #[tokio::test]
    async fn requests_wait_for_teardown() {
        let (transport, machine) = machine();
        machine.inner.state.lock().teardowns = 1;
        assert_matches!(
            machine.host_item("shoes"),
            Err(HandoffError::Rejected(Rejection::Busy))
        );
        assert_eq!(transport.connect_count(), 0);

        machine.inner.state.lock().teardowns = 0;
        assert!(machine.host_item("shoes").is_ok());
    }
}
