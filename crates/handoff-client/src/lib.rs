//! # handoff-client
//!
//! Peer-to-peer item handoff through a relay.
//!
//! A sender hosts an item id and gets a short connection code back; a receiver
//! redeems that code for the item and acknowledges it, which tells the sender
//! the handoff is done.
//!
//! Layers, bottom up:
//!
//! - [`transport`]: duplex connection to the relay ([`WebSocketTransport`],
//!   [`MemoryTransport`])
//! - [`router`]: maps inbound message tags to handlers
//! - [`session`]: one connection's lifecycle and its observer events
//! - [`handoff`]: the sender and receiver flows built on the three above

#![deny(unsafe_code)]

pub mod handoff;
pub mod observers;
pub mod reachability;
pub mod router;
pub mod session;
pub mod transport;

pub use handoff::{HandoffMachine, HandoffView, Notice, Phase, Role, Session};
pub use reachability::{AlwaysOnline, ManualReachability, Reachability};
pub use router::{DispatchOutcome, MessageRouter};
pub use session::{LinkState, SessionController};
pub use transport::{
    EventSink, MemoryTransport, Transport, TransportEvent, WebSocketConfig, WebSocketTransport,
};
