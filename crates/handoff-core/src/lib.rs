//! # handoff-core
//!
//! Shared vocabulary for the item-handoff client.
//!
//! - **Protocol**: wire tags, the inbound packet view, outbound frames, and the
//!   token unquoting rule used by the relay
//! - **Errors**: `TransportError` and `HandoffError` via `thiserror`
//! - **IDs**: `SessionId` as a UUID v7 newtype
//! - **Logging**: `tracing` subscriber setup and test capture helpers

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod logging;
pub mod protocol;

pub use errors::{HandoffError, Rejection, TransportError};
pub use ids::SessionId;
pub use protocol::{InboundPacket, InboundTag, ItemLookup, OutboundFrame, OutboundTag, unquote};
