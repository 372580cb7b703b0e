//! JSON wire protocol for diagram collaboration.
//!
//! Every WebSocket text frame carries exactly one JSON object tagged by
//! its `type` field:
//! ```text
//! client ──► server   {"type":"join-room","roomId":"diagram-1"}
//!                     {"type":"cursor-move","x":10,"y":20}
//!
//! server ──► client   {"type":"roster","roomId":"diagram-1","members":[…]}
//!                     {"type":"cursor-move","sourceConnectionId":"…",
//!                      "sourceDisplayName":"…","sourceColor":"#FF6B6B",
//!                      "x":10,"y":20,"timestamp":1700000000000}
//! ```
//!
//! Outbound messages are serialized once into a shared [`Frame`] so a
//! broadcast to N members costs a single encode.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;
use uuid::Uuid;

use crate::presence::PresenceInfo;
use crate::storage::DiagramSummary;

/// Pre-encoded outbound frame, shared between all recipients of a broadcast.
pub type Frame = Arc<str>;

/// Server version reported in the welcome handshake.
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Milliseconds since the Unix epoch, stamped on every outbound event.
pub fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ───────────────────────────────────────────────────────────────────
// Identifiers
// ───────────────────────────────────────────────────────────────────

/// Opaque identifier of one live transport session.
///
/// Generated server-side at connect time and never accepted from client input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Allocate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Diagram identifier naming a collaboration room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ───────────────────────────────────────────────────────────────────
// Inbound
// ───────────────────────────────────────────────────────────────────

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Enter the collaboration room of a diagram (implicitly leaving any other).
    JoinRoom { room_id: RoomId },
    /// Leave a room explicitly.
    LeaveRoom { room_id: RoomId },
    /// Pointer moved, in diagram coordinates.
    CursorMove { x: f64, y: f64 },
    /// Selected cell ids changed.
    SelectionChange { cell_ids: Vec<String> },
    /// Opaque editor change, relayed untouched.
    DiagramEdit { change: serde_json::Value },
    /// Replace the anonymous identity with a named one.
    Identify {
        #[serde(default)]
        user_id: Option<String>,
        #[serde(default)]
        display_name: Option<String>,
    },
    /// Persist diagram XML; a missing id creates a new diagram.
    SaveDiagram {
        #[serde(default)]
        id: Option<String>,
        name: String,
        xml: String,
    },
    /// Load the latest (or a specific) version of a diagram.
    LoadDiagram {
        id: String,
        #[serde(default)]
        version: Option<u64>,
    },
    ListDiagrams {},
    Ping {},
}

impl ClientMessage {
    /// Parse one inbound text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join-room",
            Self::LeaveRoom { .. } => "leave-room",
            Self::CursorMove { .. } => "cursor-move",
            Self::SelectionChange { .. } => "selection-change",
            Self::DiagramEdit { .. } => "diagram-edit",
            Self::Identify { .. } => "identify",
            Self::SaveDiagram { .. } => "save-diagram",
            Self::LoadDiagram { .. } => "load-diagram",
            Self::ListDiagrams {} => "list-diagrams",
            Self::Ping {} => "ping",
        }
    }
}

/// Events fanned out to the other members of the sender's room.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    CursorMove { x: f64, y: f64 },
    SelectionChange { cell_ids: Vec<String> },
    DiagramEdit { change: serde_json::Value },
}

impl RoomEvent {
    /// Wrap the event in an outbound envelope stamped with its origin.
    pub fn into_envelope(self, source: Source, timestamp: u64) -> ServerMessage {
        match self {
            RoomEvent::CursorMove { x, y } => ServerMessage::CursorMove { source, x, y, timestamp },
            RoomEvent::SelectionChange { cell_ids } => {
                ServerMessage::SelectionChange { source, cell_ids, timestamp }
            }
            RoomEvent::DiagramEdit { change } => {
                ServerMessage::DiagramEdit { source, change, timestamp }
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RoomEvent::CursorMove { .. } => "cursor-move",
            RoomEvent::SelectionChange { .. } => "selection-change",
            RoomEvent::DiagramEdit { .. } => "diagram-edit",
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Outbound
// ───────────────────────────────────────────────────────────────────

/// Origin metadata attached to every relayed room event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub source_connection_id: ConnectionId,
    pub source_user_id: String,
    pub source_display_name: String,
    pub source_color: String,
}

impl From<&PresenceInfo> for Source {
    fn from(info: &PresenceInfo) -> Self {
        Self {
            source_connection_id: info.connection_id,
            source_user_id: info.user_id.clone(),
            source_display_name: info.display_name.clone(),
            source_color: info.color.clone(),
        }
    }
}

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// First frame on every connection.
    Welcome {
        connection_id: ConnectionId,
        user_id: String,
        display_name: String,
        color: String,
        version: &'static str,
    },
    PresenceJoin {
        connection_id: ConnectionId,
        user_id: String,
        display_name: String,
        color: String,
        timestamp: u64,
    },
    PresenceLeave {
        connection_id: ConnectionId,
        user_id: String,
        display_name: String,
        color: String,
        timestamp: u64,
    },
    /// Current members of a room, sent to a new joiner.
    Roster {
        room_id: RoomId,
        members: Vec<PresenceInfo>,
    },
    CursorMove {
        #[serde(flatten)]
        source: Source,
        x: f64,
        y: f64,
        timestamp: u64,
    },
    SelectionChange {
        #[serde(flatten)]
        source: Source,
        cell_ids: Vec<String>,
        timestamp: u64,
    },
    DiagramEdit {
        #[serde(flatten)]
        source: Source,
        change: serde_json::Value,
        timestamp: u64,
    },
    DiagramSaved {
        id: String,
        version: u64,
    },
    Diagram {
        id: String,
        name: String,
        xml: String,
        version: u64,
    },
    DiagramList {
        diagrams: Vec<DiagramSummary>,
    },
    /// Failure reply addressed to the requesting connection only.
    Error {
        request: String,
        message: String,
    },
    Pong {
        timestamp: u64,
    },
}

impl ServerMessage {
    pub fn presence_join(info: &PresenceInfo) -> Self {
        Self::PresenceJoin {
            connection_id: info.connection_id,
            user_id: info.user_id.clone(),
            display_name: info.display_name.clone(),
            color: info.color.clone(),
            timestamp: timestamp_millis(),
        }
    }

    pub fn presence_leave(info: &PresenceInfo) -> Self {
        Self::PresenceLeave {
            connection_id: info.connection_id,
            user_id: info.user_id.clone(),
            display_name: info.display_name.clone(),
            color: info.color.clone(),
            timestamp: timestamp_millis(),
        }
    }

    pub fn error(request: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            request: request.into(),
            message: message.into(),
        }
    }

    /// Serialize to a shareable text frame.
    pub fn encode(&self) -> Result<Frame, ProtocolError> {
        serde_json::to_string(self)
            .map(Frame::from)
            .map_err(|e| ProtocolError::Serialization(e.to_string()))
    }
}

/// Protocol errors. None of them close the connection.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("message of {size} bytes exceeds limit of {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("binary frames are not supported")]
    BinaryFrame,
}
