//! Per-event observer lists.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// Handle returned by [`ObserverList::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Observer<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// Ordered list of callbacks for one event.
///
/// [`notify`](Self::notify) calls a snapshot of the list taken before the
/// first callback runs, so callbacks may subscribe or unsubscribe freely.
pub struct ObserverList<A> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(SubscriptionId, Observer<A>)>>,
}

impl<A> ObserverList<A> {
    /// Create an empty list.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Append a callback.
    pub fn subscribe(&self, observer: impl Fn(&A) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().push((id, Arc::new(observer)));
        id
    }

    /// Remove a callback. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    /// Number of subscribed callbacks.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no callbacks are subscribed.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Call every callback subscribed at this moment, in subscription order.
    /// Returns how many were called.
    pub fn notify(&self, arg: &A) -> usize {
        let snapshot: Vec<Observer<A>> = self
            .entries
            .lock()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for observer in &snapshot {
            observer(arg);
        }
        snapshot.len()
    }
}

impl<A> Default for ObserverList<A> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn notifies_in_order() {
        let list = ObserverList::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for label in ["a", "b"] {
            let seen = Arc::clone(&seen);
            let _ = list.subscribe(move |n| seen.lock().push(format!("{label}{n}")));
        }
        assert_eq!(list.notify(&7), 2);
        assert_eq!(*seen.lock(), ["a7", "b7"]);
    }

    #[test]
    fn unsubscribe_removes_only_that_observer() {
        let list = ObserverList::<()>::new();
        let a = list.subscribe(|()| {});
        let _b = list.subscribe(|()| {});
        assert!(list.unsubscribe(a));
        assert!(!list.unsubscribe(a));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn unsubscribe_during_notify_uses_snapshot() {
        let list = Arc::new(ObserverList::<()>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(Mutex::new(None));

        {
            let list_ref = Arc::downgrade(&list);
            let second = Arc::clone(&second);
            let calls = Arc::clone(&calls);
            let _ = list.subscribe(move |()| {
                let _ = calls.fetch_add(1, Ordering::SeqCst);
                if let (Some(list), Some(id)) = (list_ref.upgrade(), *second.lock()) {
                    let _ = list.unsubscribe(id);
                }
            });
        }
        let calls_b = Arc::clone(&calls);
        let id = list.subscribe(move |()| {
            let _ = calls_b.fetch_add(1, Ordering::SeqCst);
        });
        *second.lock() = Some(id);

        // The snapshot still includes the second observer.
        assert_eq!(list.notify(&()), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        // It is gone for the next round.
        assert_eq!(list.notify(&()), 1);
    }

    #[test]
    fn subscribe_during_notify_takes_effect_next_round() {
        let list = Arc::new(ObserverList::<()>::new());
        let weak = Arc::downgrade(&list);
        let _ = list.subscribe(move |()| {
            if let Some(list) = weak.upgrade() {
                let _ = list.subscribe(|()| {});
            }
        });
        assert_eq!(list.notify(&()), 1);
        assert_eq!(list.len(), 2);
    }
}
