//! One-shot wait slots.
//!
//! A flow arms a slot before sending the message that triggers the reply, then
//! awaits the receiver. The first matching event resolves the slot and empties
//! it; events with no armed slot are dropped. Cancelling drops the sender, so
//! the waiting flow wakes with an error instead of hanging.

use handoff_core::HandoffError;
use handoff_core::protocol::ItemLookup;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

struct Armed<T> {
    generation: u64,
    tx: oneshot::Sender<T>,
}

/// A single-use slot for one kind of signal.
pub(crate) struct WaitSlot<T> {
    name: &'static str,
    armed: Mutex<Option<Armed<T>>>,
}

impl<T> WaitSlot<T> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            armed: Mutex::new(None),
        }
    }

    /// Arm the slot for `generation`, replacing any earlier wait.
    pub(crate) fn arm(&self, generation: u64) -> oneshot::Receiver<T> {
        let (tx, rx) = oneshot::channel();
        let previous = self.armed.lock().replace(Armed { generation, tx });
        if let Some(previous) = previous {
            debug!(wait = self.name, old = previous.generation, generation, "replacing armed wait");
        }
        rx
    }

    /// Resolve the armed wait. Returns `false` if nothing was waiting.
    pub(crate) fn resolve(&self, value: T) -> bool {
        let Some(armed) = self.armed.lock().take() else {
            debug!(wait = self.name, "no wait armed, dropping signal");
            return false;
        };
        if armed.tx.send(value).is_err() {
            debug!(wait = self.name, generation = armed.generation, "waiter already gone");
            return false;
        }
        true
    }

    /// Drop the armed wait, if any.
    pub(crate) fn cancel(&self) -> bool {
        self.armed.lock().take().is_some()
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.armed.lock().is_some()
    }
}

/// Every wait a handoff flow can be suspended on.
pub(crate) struct PendingWaits {
    pub(crate) connect: WaitSlot<bool>,
    pub(crate) code: WaitSlot<String>,
    pub(crate) receipt: WaitSlot<()>,
    pub(crate) item: WaitSlot<ItemLookup>,
}

impl PendingWaits {
    pub(crate) fn new() -> Self {
        Self {
            connect: WaitSlot::new("connect_result"),
            code: WaitSlot::new("connection_id"),
            receipt: WaitSlot::new("item_received"),
            item: WaitSlot::new("item_id"),
        }
    }

    /// Drop every armed wait. Returns how many were armed.
    pub(crate) fn cancel_all(&self) -> usize {
        [
            self.connect.cancel(),
            self.code.cancel(),
            self.receipt.cancel(),
            self.item.cancel(),
        ]
        .into_iter()
        .filter(|cancelled| *cancelled)
        .count()
    }

    pub(crate) fn armed_count(&self) -> usize {
        [
            self.connect.is_armed(),
            self.code.is_armed(),
            self.receipt.is_armed(),
            self.item.is_armed(),
        ]
        .into_iter()
        .filter(|armed| *armed)
        .count()
    }
}

/// Await `rx` unless `cancel` fires first.
pub(crate) async fn wait_for<T>(
    cancel: &CancellationToken,
    rx: oneshot::Receiver<T>,
) -> Result<T, HandoffError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(HandoffError::Cancelled),
        value = rx => value.map_err(|_| HandoffError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn resolves_exactly_once() {
        let waits = PendingWaits::new();
        let rx = waits.code.arm(1);
        assert!(waits.code.resolve("AB12".into()));
        assert!(!waits.code.resolve("LATE".into()));
        assert_eq!(rx.await.unwrap(), "AB12");
    }

    #[tokio::test]
    async fn unarmed_signal_is_dropped() {
        let waits = PendingWaits::new();
        assert!(!waits.receipt.resolve(()));
        assert_eq!(waits.armed_count(), 0);
    }

    #[tokio::test]
    async fn rearming_cancels_previous_waiter() {
        let waits = PendingWaits::new();
        let first = waits.item.arm(1);
        let second = waits.item.arm(2);
        assert!(first.await.is_err());
        assert!(waits.item.resolve(ItemLookup::Invalid));
        assert_eq!(second.await.unwrap(), ItemLookup::Invalid);
    }

    #[tokio::test]
    async fn cancel_all_wakes_waiters() {
        let waits = PendingWaits::new();
        let token = CancellationToken::new();
        let connect = waits.connect.arm(1);
        let _code = waits.code.arm(1);
        assert_eq!(waits.armed_count(), 2);

        assert_eq!(waits.cancel_all(), 2);
        assert_eq!(waits.armed_count(), 0);
        assert_matches!(wait_for(&token, connect).await, Err(HandoffError::Cancelled));
    }

    #[tokio::test]
    async fn token_cancels_wait() {
        let waits = PendingWaits::new();
        let token = CancellationToken::new();
        let rx = waits.receipt.arm(1);
        token.cancel();
        assert_matches!(wait_for(&token, rx).await, Err(HandoffError::Cancelled));
        // The slot stays armed until the machine cancels it explicitly.
        assert!(waits.receipt.is_armed());
    }

    #[tokio::test]
    async fn wait_for_returns_value() {
        let waits = PendingWaits::new();
        let token = CancellationToken::new();
        let rx = waits.connect.arm(3);
        assert!(waits.connect.resolve(true));
        assert_matches!(wait_for(&token, rx).await, Ok(true));
    }
}
