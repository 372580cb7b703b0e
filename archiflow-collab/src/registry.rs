//! Connection registry: connection id → (outbox, presence, current room).
//!
//! This is the only place a frame is handed to a transport. Sending never
//! fails loudly: a closed or lagging outbox yields `false` so that a
//! broadcast keeps going for the remaining members.

use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::presence::{ColorPalette, PresenceInfo};
use crate::protocol::{ConnectionId, Frame, RoomId, ServerMessage};

/// Transport handle: the sending half of a connection's outbound queue.
pub type Outbox = mpsc::Sender<Frame>;

/// One registered connection.
struct Connection {
    outbox: Outbox,
    presence: PresenceInfo,
    /// Mutated only by `RoomManager`.
    room: Option<RoomId>,
    connected_at: Instant,
}

/// Owns every live connection and its presence metadata.
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
    palette: ColorPalette,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::with_palette(ColorPalette::new())
    }

    pub fn with_palette(palette: ColorPalette) -> Self {
        Self {
            connections: HashMap::new(),
            palette,
        }
    }

    /// Register a transport and allocate its id, anonymous identity and colour.
    pub fn register(&mut self, outbox: Outbox) -> ConnectionId {
        let mut id = ConnectionId::new();
        while self.connections.contains_key(&id) {
            id = ConnectionId::new();
        }
        let presence = PresenceInfo::anonymous(id, self.palette.next_color());
        log::info!("Connection {id} registered ({})", presence.color);
        self.connections.insert(
            id,
            Connection {
                outbox,
                presence,
                room: None,
                connected_at: Instant::now(),
            },
        );
        id
    }

    /// Drop the mapping. Does not touch room membership: callers leave first.
    pub fn unregister(&mut self, id: &ConnectionId) -> bool {
        match self.connections.remove(id) {
            Some(conn) => {
                if let Some(room) = &conn.room {
                    log::warn!("Connection {id} unregistered while still in room {room}");
                }
                log::info!(
                    "Connection {id} unregistered after {:?}",
                    conn.connected_at.elapsed()
                );
                true
            }
            None => false,
        }
    }

    /// Serialize and send one message. `false` if unknown, closed or lagging.
    pub fn send(&self, id: &ConnectionId, message: &ServerMessage) -> bool {
        match message.encode() {
            Ok(frame) => self.send_frame(id, frame),
            Err(e) => {
                log::error!("Failed to encode message for {id}: {e}");
                false
            }
        }
    }

    /// Send a pre-encoded frame.
    pub fn send_frame(&self, id: &ConnectionId, frame: Frame) -> bool {
        let Some(conn) = self.connections.get(id) else {
            log::debug!("Send to unknown connection {id} ignored");
            return false;
        };
        match conn.outbox.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                log::warn!("Connection {id} is lagging, frame dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                log::debug!("Connection {id} outbox closed, frame dropped");
                false
            }
        }
    }

    /// Presence metadata of a connection.
    pub fn describe(&self, id: &ConnectionId) -> Option<PresenceInfo> {
        self.connections.get(id).map(|c| c.presence.clone())
    }

    /// Room the connection is currently in.
    pub fn room_of(&self, id: &ConnectionId) -> Option<&RoomId> {
        self.connections.get(id).and_then(|c| c.room.as_ref())
    }

    pub(crate) fn set_room(&mut self, id: &ConnectionId, room: Option<RoomId>) -> bool {
        match self.connections.get_mut(id) {
            Some(conn) => {
                conn.room = room;
                true
            }
            None => false,
        }
    }

    /// Update the identity of a connection. The colour never changes.
    pub fn identify(
        &mut self,
        id: &ConnectionId,
        user_id: Option<String>,
        display_name: Option<String>,
    ) -> Option<PresenceInfo> {
        let conn = self.connections.get_mut(id)?;
        if let Some(user_id) = user_id.filter(|u| !u.trim().is_empty()) {
            conn.presence.user_id = user_id;
        }
        if let Some(name) = display_name.filter(|n| !n.trim().is_empty()) {
            conn.presence.display_name = name;
        }
        Some(conn.presence.clone())
    }

    /// Clone of the transport handle, for replies sent from another task.
    pub fn outbox(&self, id: &ConnectionId) -> Option<Outbox> {
        self.connections.get(id).map(|c| c.outbox.clone())
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Ids of all registered connections.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
