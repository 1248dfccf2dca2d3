//! Tag-based packet dispatch.
//!
//! The router maps an inbound tag to at most one handler. Registering a tag
//! twice replaces the earlier handler. Dispatch looks the handler up under the
//! registry lock and runs it after the lock is released, so handlers may
//! register or deregister tags themselves.

use std::collections::HashMap;
use std::sync::Arc;

use handoff_core::protocol::InboundPacket;
use parking_lot::RwLock;
use tracing::{debug, warn};

/// Callback invoked with each packet for its tag.
pub type PacketHandler = Arc<dyn Fn(&InboundPacket) + Send + Sync>;

/// What [`MessageRouter::dispatch`] did with a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// A handler ran.
    Handled,
    /// No handler for the tag; dropped.
    NoHandler,
    /// The packet had no tag; dropped.
    Empty,
}

/// Registry of packet handlers keyed by tag.
#[derive(Default)]
pub struct MessageRouter {
    handlers: RwLock<HashMap<String, PacketHandler>>,
}

impl MessageRouter {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `tag`, replacing any existing one.
    ///
    /// Returns `true` if a handler was replaced.
    pub fn register(
        &self,
        tag: &str,
        handler: impl Fn(&InboundPacket) + Send + Sync + 'static,
    ) -> bool {
        let replaced = self
            .handlers
            .write()
            .insert(tag.to_owned(), Arc::new(handler))
            .is_some();
        if replaced {
            warn!(tag, "handler already registered, overwriting");
        }
        replaced
    }

    /// Remove the handler for `tag`. Returns `false` if none was registered.
    pub fn deregister(&self, tag: &str) -> bool {
        let removed = self.handlers.write().remove(tag).is_some();
        if !removed {
            warn!(tag, "no handler registered for tag");
        }
        removed
    }

    /// Route one packet to the handler for its tag.
    pub fn dispatch(&self, packet: &InboundPacket) -> DispatchOutcome {
        let Some(tag) = packet.tag() else {
            warn!("dropping packet with no tag");
            return DispatchOutcome::Empty;
        };

        let handler = self.handlers.read().get(&tag).cloned();
        let Some(handler) = handler else {
            warn!(tag = %tag, "no handler registered for tag");
            return DispatchOutcome::NoHandler;
        };

        debug!(tag = %tag, tokens = packet.len(), "dispatching packet");
        handler(packet);
        DispatchOutcome::Handled
    }

    /// Whether `tag` has a handler.
    pub fn has_handler(&self, tag: &str) -> bool {
        self.handlers.read().contains_key(tag)
    }

    /// Registered tags (sorted).
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.handlers.read().keys().cloned().collect();
        tags.sort();
        tags
    }
}
