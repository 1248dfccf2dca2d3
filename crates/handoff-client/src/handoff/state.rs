//! Session record, phases, and the view published to the UI layer.

use std::fmt;

use handoff_core::{HandoffError, Rejection, SessionId};

/// Which side of the handoff this client plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Hosts an item and hands out a connection code.
    Sender,
    /// Redeems a connection code for the item.
    Receiver,
}

/// Where the handoff flow currently is.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    /// No flow running.
    #[default]
    Idle,
    /// Waiting for the relay connection to open.
    Connecting,
    /// Sender: `Host` sent, waiting for the connection code.
    SenderAwaitingCode,
    /// Sender: code shown, waiting for the receiver's acknowledgment.
    SenderAwaitingReceipt,
    /// Receiver: `GetItem` sent, waiting for the item.
    ReceiverAwaitingItem,
}

/// One connection attempt, owned by the state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    /// Log identifier.
    pub id: SessionId,
    /// Side this session plays.
    pub role: Role,
    /// Counter that invalidates waits armed by earlier sessions.
    pub generation: u64,
    /// Item being handed off, once known.
    pub item_id: Option<String>,
    /// Uppercase connection code, once known.
    pub connection_code: Option<String>,
    /// Whether the relay connection opened.
    pub connected: bool,
    /// Whether the handoff was acknowledged.
    pub receipt_confirmed: bool,
}

impl Session {
    pub(crate) fn sender(generation: u64, item_id: &str) -> Self {
        Self {
            id: SessionId::new(),
            role: Role::Sender,
            generation,
            item_id: Some(item_id.to_owned()),
            connection_code: None,
            connected: false,
            receipt_confirmed: false,
        }
    }

    pub(crate) fn receiver(generation: u64, code: &str) -> Self {
        Self {
            id: SessionId::new(),
            role: Role::Receiver,
            generation,
            item_id: None,
            connection_code: Some(code.to_owned()),
            connected: false,
            receipt_confirmed: false,
        }
    }
}

/// User-facing message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notice {
    /// The device has no network.
    Offline,
    /// Hosting was requested without an item id.
    EmptyItem,
    /// Retrieval was requested without a code.
    EmptyCode,
    /// The relay knows no session for the code.
    InvalidCode,
    /// Sender: the receiver acknowledged the item.
    ItemDelivered,
    /// Receiver: the item arrived and was acknowledged.
    ItemRetrieved,
    /// The relay could not be reached.
    ConnectFailed,
    /// The relay connection dropped mid-flow.
    ConnectionLost,
    /// The transport failed mid-flow.
    TransportError(String),
}

impl Notice {
    /// Notice for a failed request or flow, if the user should see one.
    pub fn for_error(err: &HandoffError) -> Option<Self> {
        match err {
            HandoffError::Rejected(Rejection::Offline) => Some(Self::Offline),
            HandoffError::Rejected(Rejection::EmptyItem) => Some(Self::EmptyItem),
            HandoffError::Rejected(Rejection::EmptyCode) => Some(Self::EmptyCode),
            HandoffError::ConnectFailed => Some(Self::ConnectFailed),
            HandoffError::Disconnected => Some(Self::ConnectionLost),
            HandoffError::Transport(reason) => Some(Self::TransportError(reason.clone())),
            HandoffError::Rejected(Rejection::Busy) | HandoffError::Cancelled => None,
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Offline => f.write_str("Please connect to the internet."),
            Self::EmptyItem => f.write_str("Enter an itemID to send"),
            Self::EmptyCode => f.write_str("Enter a connection ID"),
            Self::InvalidCode => f.write_str("Invalid connection ID"),
            Self::ItemDelivered => f.write_str("Item received"),
            Self::ItemRetrieved => f.write_str("Item retrieved"),
            Self::ConnectFailed => f.write_str("Could not connect to the server."),
            Self::ConnectionLost => f.write_str("Lost connection to the server."),
            Self::TransportError(reason) => write!(f, "Connection error: {reason}"),
        }
    }
}

/// Everything a UI needs to render the handoff screen.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HandoffView {
    /// Current phase.
    pub phase: Phase,
    /// Sender or receiver layout; `None` is the initial prompt.
    pub mode: Option<Role>,
    /// Connection code shown to the sender.
    pub code_text: String,
    /// Item line, `Data: <item>`.
    pub data_text: String,
    /// Latest message for the user.
    pub notice: Option<Notice>,
    /// Whether the receiver's retrieve control is usable.
    pub retrieve_enabled: bool,
}

impl HandoffView {
    /// Item line text for `item`.
    pub fn data_line(item: &str) -> String {
        format!("Data: {item}")
    }

    /// Clear everything displayed while keeping the layout.
    pub(crate) fn clear_text(&mut self) {
        self.phase = Phase::Idle;
        self.code_text.clear();
        self.data_text.clear();
        self.notice = None;
        self.retrieve_enabled = self.mode == Some(Role::Receiver);
    }
}
