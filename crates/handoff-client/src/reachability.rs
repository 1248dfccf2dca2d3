//! Network reachability checks made before connecting.

use std::sync::atomic::{AtomicBool, Ordering};

/// Answers whether the network is usable right now.
pub trait Reachability: Send + Sync {
    /// `false` short-circuits a handoff request with the offline notice.
    fn is_online(&self) -> bool;
}

/// Always reports online. Connect failures still surface normally.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysOnline;

impl Reachability for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Reachability flag set by the embedding application.
#[derive(Debug)]
pub struct ManualReachability {
    online: AtomicBool,
}

impl ManualReachability {
    /// Create with an initial state.
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    /// Update the state.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Relaxed);
    }
}

impl Reachability for ManualReachability {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }
}
