//! Error types for the handoff client.
//!
//! - [`TransportError`]: failures inside a transport adapter (connect, send,
//!   frame codec). Adapters report these as events rather than returning them
//!   to the caller that triggered the work.
//! - [`HandoffError`]: outcome of a handoff request or flow, classified into
//!   business-rule rejections and transport failures.

use std::fmt;

use thiserror::Error;

// ── Error code constants ────────────────────────────────────────────

/// Input or environment check failed before connecting.
pub const REJECTED: &str = "REJECTED";
/// The relay could not be reached.
pub const CONNECT_FAILED: &str = "CONNECT_FAILED";
/// The relay connection dropped mid-flow.
pub const DISCONNECTED: &str = "DISCONNECTED";
/// The transport reported an error mid-flow.
pub const TRANSPORT_ERROR: &str = "TRANSPORT_ERROR";
/// The flow was torn down before it finished.
pub const CANCELLED: &str = "CANCELLED";

/// Failure inside a transport adapter.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Opening the connection failed.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Opening the connection did not finish in time.
    #[error("connect timed out after {timeout_ms}ms")]
    ConnectTimeout {
        /// Configured timeout.
        timeout_ms: u64,
    },

    /// A frame could not be handed to the connection.
    #[error("send failed: {0}")]
    Send(String),

    /// The connection is not open.
    #[error("connection closed")]
    Closed,

    /// An inbound frame could not be decoded.
    #[error("malformed frame: {0}")]
    Codec(#[from] serde_json::Error),

    /// An inbound frame decoded but is not a token array.
    #[error("unexpected frame shape: {0}")]
    Envelope(String),
}

/// Reason a handoff request was refused before any connection was attempted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// The network is not reachable.
    Offline,
    /// No item id was supplied for hosting.
    EmptyItem,
    /// No connection code was supplied for retrieval.
    EmptyCode,
    /// A handoff is already in progress.
    Busy,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Offline => "network unreachable",
            Self::EmptyItem => "item id is empty",
            Self::EmptyCode => "connection code is empty",
            Self::Busy => "a handoff is already in progress",
        };
        f.write_str(s)
    }
}

/// Outcome of a handoff request or of a running flow.
#[derive(Debug, Error)]
pub enum HandoffError {
    /// Refused before connecting.
    #[error("handoff rejected: {0}")]
    Rejected(Rejection),

    /// The relay connection could not be established.
    #[error("could not connect to relay")]
    ConnectFailed,

    /// The relay connection dropped while the flow was waiting.
    #[error("relay connection lost")]
    Disconnected,

    /// The transport reported an error while the flow was waiting.
    #[error("transport error: {0}")]
    Transport(String),

    /// The flow was torn down (return to idle, detach, or a newer session).
    #[error("handoff cancelled")]
    Cancelled,
}

impl HandoffError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Rejected(_) => REJECTED,
            Self::ConnectFailed => CONNECT_FAILED,
            Self::Disconnected => DISCONNECTED,
            Self::Transport(_) => TRANSPORT_ERROR,
            Self::Cancelled => CANCELLED,
        }
    }

    /// Whether the user can retry without restarting the client.
    ///
    /// Cancellation is user-initiated and never reported as retryable.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    /// Whether this error originated in the transport rather than user input.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::ConnectFailed | Self::Disconnected | Self::Transport(_)
        )
    }
}

impl From<TransportError> for HandoffError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Connect(_) | TransportError::ConnectTimeout { .. } => {
                Self::ConnectFailed
            }
            TransportError::Closed => Self::Disconnected,
            other => Self::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn codes_are_stable() {
        assert_eq!(HandoffError::Rejected(Rejection::Offline).code(), "REJECTED");
        assert_eq!(HandoffError::ConnectFailed.code(), "CONNECT_FAILED");
        assert_eq!(HandoffError::Disconnected.code(), "DISCONNECTED");
        assert_eq!(HandoffError::Transport("x".into()).code(), "TRANSPORT_ERROR");
        assert_eq!(HandoffError::Cancelled.code(), "CANCELLED");
    }

    #[test]
    fn rejection_display() {
        let err = HandoffError::Rejected(Rejection::EmptyCode);
        assert_eq!(err.to_string(), "handoff rejected: connection code is empty");
    }

    #[test]
    fn classification() {
        assert!(HandoffError::ConnectFailed.is_transport());
        assert!(HandoffError::Transport("boom".into()).is_transport());
        assert!(!HandoffError::Rejected(Rejection::Busy).is_transport());
        assert!(HandoffError::Rejected(Rejection::Offline).is_recoverable());
        assert!(!HandoffError::Cancelled.is_recoverable());
    }

    #[test]
    fn transport_error_conversion() {
        let timeout = TransportError::ConnectTimeout { timeout_ms: 500 };
        assert_eq!(timeout.to_string(), "connect timed out after 500ms");
        assert_matches!(HandoffError::from(timeout), HandoffError::ConnectFailed);
        assert_matches!(
            HandoffError::from(TransportError::Closed),
            HandoffError::Disconnected
        );
        assert_matches!(
            HandoffError::from(TransportError::Send("queue full".into())),
            HandoffError::Transport(msg) if msg.contains("queue full")
        );
    }

    #[test]
    fn codec_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: TransportError = json_err.into();
        assert_matches!(err, TransportError::Codec(_));
        assert!(err.to_string().starts_with("malformed frame"));
    }
}
