//! Stateless routing of room events to the sender's peers.
//!
//! ```text
//! origin ──► room_of(origin) ──► members_of(room) ──► send to all but origin
//!              │ none
//!              ▼
//!           dropped
//! ```

use crate::broadcast::{fan_out, RoomManager};
use crate::protocol::{timestamp_millis, ConnectionId, RoomEvent, RoomId, Source};
use crate::registry::ConnectionRegistry;

/// What happened to one routed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// The origin is not in a room (or no longer registered); nothing sent.
    NotInRoom,
    Delivered {
        room: RoomId,
        delivered: usize,
        failed: usize,
    },
}

/// Fans cursor, selection and edit events out to a room, excluding the sender.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventRouter;

impl EventRouter {
    pub fn new() -> Self {
        Self
    }

    /// Deliver `event` to every other member of the origin's room.
    pub fn route(
        &self,
        registry: &ConnectionRegistry,
        rooms: &RoomManager,
        origin: &ConnectionId,
        event: RoomEvent,
    ) -> RouteOutcome {
        let Some(room) = registry.room_of(origin).cloned() else {
            log::debug!("Dropping {} from {origin}: not in a room", event.kind());
            return RouteOutcome::NotInRoom;
        };
        let Some(info) = registry.describe(origin) else {
            return RouteOutcome::NotInRoom;
        };

        let kind = event.kind();
        let envelope = event.into_envelope(Source::from(&info), timestamp_millis());
        let members = rooms.members_of(&room);
        let report = fan_out(registry, &members, &envelope, Some(origin));

        if kind == "cursor-move" {
            log::trace!("Routed {kind} from {origin} in {room} to {} peers", report.delivered);
        } else {
            log::debug!("Routed {kind} from {origin} in {room} to {} peers", report.delivered);
        }

        RouteOutcome::Delivered {
            room,
            delivered: report.delivered,
            failed: report.failed,
        }
    }
}
