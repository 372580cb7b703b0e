//! Room membership and fan-out.
//!
//! ```text
//! RoomManager
//!   ├── "diagram-1" ── Room { A, B, C }    (join order kept)
//!   └── "diagram-7" ── Room { D }
//! ```
//!
//! Membership and `ConnectionRegistry` room pointers are kept in lockstep:
//! a connection whose room is `R` is a member of `R`, and every member of
//! `R` points back at `R`. Rooms exist only while they have members.

use indexmap::IndexSet;
use std::collections::HashMap;
use std::time::Instant;

use crate::presence::{PresenceDirectory, PresenceInfo};
use crate::protocol::{ConnectionId, RoomId, ServerMessage};
use crate::registry::ConnectionRegistry;

/// Delivery counts for one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Frames accepted by a recipient's outbox.
    pub delivered: usize,
    /// Recipients whose outbox was closed, full or unknown.
    pub failed: usize,
}

/// Encode `message` once and hand it to every recipient except `without`.
///
/// One failed recipient never stops delivery to the rest.
pub fn fan_out<'a>(
    registry: &ConnectionRegistry,
    recipients: impl IntoIterator<Item = &'a ConnectionId>,
    message: &ServerMessage,
    without: Option<&ConnectionId>,
) -> BroadcastReport {
    let mut report = BroadcastReport::default();
    let frame = match message.encode() {
        Ok(frame) => frame,
        Err(e) => {
            log::error!("Failed to encode broadcast: {e}");
            return report;
        }
    };
    for id in recipients {
        if Some(id) == without {
            continue;
        }
        if registry.send_frame(id, frame.clone()) {
            report.delivered += 1;
        } else {
            report.failed += 1;
        }
    }
    report
}

/// One diagram's collaboration session.
#[derive(Debug)]
struct Room {
    members: IndexSet<ConnectionId>,
    created_at: Instant,
}

impl Room {
    fn new() -> Self {
        Self {
            members: IndexSet::new(),
            created_at: Instant::now(),
        }
    }
}

/// Result of a join.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinOutcome {
    /// Everyone else in the room, in join order.
    pub roster: Vec<PresenceInfo>,
    /// The connection was already a member; nothing was broadcast.
    pub already_member: bool,
    /// Room implicitly left to make this join.
    pub left: Option<RoomId>,
}

/// Maps diagram ids to their member sets.
pub struct RoomManager {
    rooms: HashMap<RoomId, Room>,
    directory: PresenceDirectory,
}

impl RoomManager {
    pub fn new() -> Self {
        Self {
            rooms: HashMap::new(),
            directory: PresenceDirectory::new(),
        }
    }

    /// Add a connection to `room`, creating it on demand.
    ///
    /// A connection sitting in another room leaves it first. Joining the
    /// room one is already in changes nothing and broadcasts nothing.
    /// Returns `None` when the connection is not registered.
    pub fn join(
        &mut self,
        registry: &mut ConnectionRegistry,
        id: &ConnectionId,
        room: RoomId,
    ) -> Option<JoinOutcome> {
        let info = registry.describe(id)?;

        let current = registry.room_of(id).cloned();
        if current.as_ref() == Some(&room) && self.is_member(&room, id) {
            return Some(JoinOutcome {
                roster: self.directory.roster_excluding(self, registry, &room, Some(id)),
                already_member: true,
                left: None,
            });
        }

        let left = match current {
            Some(previous) if previous != room => {
                self.leave(registry, id, &previous);
                Some(previous)
            }
            _ => None,
        };

        let entry = self.rooms.entry(room.clone()).or_insert_with(|| {
            log::info!("Room {room} created");
            Room::new()
        });
        entry.members.insert(*id);
        registry.set_room(id, Some(room.clone()));

        let members = self.members_of(&room);
        let report = fan_out(registry, &members, &ServerMessage::presence_join(&info), Some(id));
        log::info!(
            "Connection {id} ({}) joined room {room}; notified {} of {} peers",
            info.display_name,
            report.delivered,
            members.len() - 1
        );

        Some(JoinOutcome {
            roster: self.directory.roster_excluding(self, registry, &room, Some(id)),
            already_member: false,
            left,
        })
    }

    /// Remove a connection from `room`. No-op when it is not a member.
    ///
    /// The last member leaving deletes the room; otherwise the remaining
    /// members are told.
    pub fn leave(
        &mut self,
        registry: &mut ConnectionRegistry,
        id: &ConnectionId,
        room: &RoomId,
    ) -> bool {
        let Some(entry) = self.rooms.get_mut(room) else {
            log::debug!("Leave of unknown room {room} by {id} ignored");
            return false;
        };
        if !entry.members.shift_remove(id) {
            log::debug!("Leave of room {room} by non-member {id} ignored");
            return false;
        }
        if registry.room_of(id) == Some(room) {
            registry.set_room(id, None);
        }

        if entry.members.is_empty() {
            let lifetime = entry.created_at.elapsed();
            self.rooms.remove(room);
            log::info!("Connection {id} left room {room}; room removed (empty) after {lifetime:?}");
            return true;
        }

        let remaining = self.members_of(room);
        if let Some(info) = registry.describe(id) {
            let report = fan_out(registry, &remaining, &ServerMessage::presence_leave(&info), None);
            log::info!(
                "Connection {id} left room {room}; notified {} of {} peers",
                report.delivered,
                remaining.len()
            );
        }
        true
    }

    /// Leave whatever room the connection is in.
    pub fn leave_current(
        &mut self,
        registry: &mut ConnectionRegistry,
        id: &ConnectionId,
    ) -> Option<RoomId> {
        let room = registry.room_of(id).cloned()?;
        self.leave(registry, id, &room).then_some(room)
    }

    /// Snapshot of a room's members in join order; empty for unknown rooms.
    pub fn members_of(&self, room: &RoomId) -> Vec<ConnectionId> {
        self.rooms
            .get(room)
            .map(|r| r.members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, room: &RoomId, id: &ConnectionId) -> bool {
        self.rooms.get(room).is_some_and(|r| r.members.contains(id))
    }

    /// Send to every member of a room except `without`.
    pub fn broadcast(
        &self,
        registry: &ConnectionRegistry,
        room: &RoomId,
        message: &ServerMessage,
        without: Option<&ConnectionId>,
    ) -> BroadcastReport {
        match self.rooms.get(room) {
            Some(r) => fan_out(registry, &r.members, message, without),
            None => BroadcastReport::default(),
        }
    }

    pub fn contains_room(&self, room: &RoomId) -> bool {
        self.rooms.contains_key(room)
    }

    /// Number of live (non-empty) rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// All live room ids.
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.rooms.keys().cloned().collect()
    }

    /// Member count per live room.
    pub fn room_sizes(&self) -> Vec<(RoomId, usize)> {
        self.rooms
            .iter()
            .map(|(id, r)| (id.clone(), r.members.len()))
            .collect()
    }

    /// Check the two-way link between membership and registry room pointers,
    /// and that no empty room is kept.
    pub fn consistent_with(&self, registry: &ConnectionRegistry) -> bool {
        let members_point_back = self.rooms.iter().all(|(room, r)| {
            !r.members.is_empty() && r.members.iter().all(|id| registry.room_of(id) == Some(room))
        });
        let pointers_resolve = registry.ids().iter().all(|id| match registry.room_of(id) {
            Some(room) => self.is_member(room, id),
            None => true,
        });
        members_point_back && pointers_resolve
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}
