//! Presence: who is looking at which diagram, and how to draw them.
//!
//! ## Architecture
//!
//! ```text
//! ConnectionRegistry ──describe()──┐
//!                                  ├──► PresenceDirectory::roster_of() ──► Roster frame
//! RoomManager ──────members_of()───┘
//! ```
//!
//! The roster is a view computed on demand, never stored. A member that
//! stopped resolving in the registry is silently omitted.

use serde::{Deserialize, Serialize};

use crate::broadcast::RoomManager;
use crate::protocol::{ConnectionId, RoomId};
use crate::registry::ConnectionRegistry;

/// User id given to connections that never identified themselves.
pub const ANONYMOUS_USER_ID: &str = "anonymous";

/// Display name given to connections that never identified themselves.
pub const ANONYMOUS_DISPLAY_NAME: &str = "Anonymous";

// ───────────────────────────────────────────────────────────────────
// Core types
// ───────────────────────────────────────────────────────────────────

/// Display attributes of one connection, as seen by other room members.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceInfo {
    pub connection_id: ConnectionId,
    /// Logical user; several connections (tabs) may share it.
    pub user_id: String,
    pub display_name: String,
    /// `#RRGGBB` cursor/selection colour, fixed for the connection's lifetime.
    pub color: String,
}

impl PresenceInfo {
    /// Anonymous identity with the given colour.
    pub fn anonymous(connection_id: ConnectionId, color: impl Into<String>) -> Self {
        Self {
            connection_id,
            user_id: ANONYMOUS_USER_ID.to_string(),
            display_name: ANONYMOUS_DISPLAY_NAME.to_string(),
            color: color.into(),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Colour assignment
// ───────────────────────────────────────────────────────────────────

/// Fixed cursor palette.
pub const PALETTE: [&str; 12] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#96CEB4",
    "#FFEAA7", "#DDA0DD", "#98D8C8", "#F7DC6F",
    "#BB8FCE", "#85C1E2", "#F8B739", "#52B788",
];

/// Round-robin colour source.
///
/// Consecutive assignments never repeat until all `PALETTE.len()` colours
/// have been handed out.
#[derive(Debug, Default)]
pub struct ColorPalette {
    next: usize,
}

impl ColorPalette {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the rotation at an arbitrary offset.
    pub fn starting_at(offset: usize) -> Self {
        Self { next: offset % PALETTE.len() }
    }

    /// Take the next colour in the rotation.
    pub fn next_color(&mut self) -> &'static str {
        let color = PALETTE[self.next];
        self.next = (self.next + 1) % PALETTE.len();
        color
    }
}

// ───────────────────────────────────────────────────────────────────
// Roster
// ───────────────────────────────────────────────────────────────────

/// Computes per-room rosters from membership and registry state.
#[derive(Debug, Default, Clone, Copy)]
pub struct PresenceDirectory;

impl PresenceDirectory {
    pub fn new() -> Self {
        Self
    }

    /// Presence of every member of `room`, in join order.
    pub fn roster_of(
        &self,
        rooms: &RoomManager,
        registry: &ConnectionRegistry,
        room: &RoomId,
    ) -> Vec<PresenceInfo> {
        self.roster_excluding(rooms, registry, room, None)
    }

    /// Same as [`roster_of`](Self::roster_of) without one connection, used
    /// to show a joiner who else is present.
    pub fn roster_excluding(
        &self,
        rooms: &RoomManager,
        registry: &ConnectionRegistry,
        room: &RoomId,
        without: Option<&ConnectionId>,
    ) -> Vec<PresenceInfo> {
        rooms
            .members_of(room)
            .iter()
            .filter(|id| Some(*id) != without)
            .filter_map(|id| {
                let info = registry.describe(id);
                if info.is_none() {
                    log::debug!("Roster of {room}: skipping stale member {id}");
                }
                info
            })
            .collect()
    }
}
