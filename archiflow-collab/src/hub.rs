//! The collaboration hub: one explicitly constructed instance of the
//! registry, room manager, router and presence directory, plus the
//! diagram store.
//!
//! ```text
//! transport ──connect()────► ConnectionRegistry::register ──► welcome
//!           ──handle_text()─► ClientMessage
//!                               ├── join/leave ──► RoomManager ──► roster / presence-*
//!                               ├── cursor/selection/edit ──► EventRouter
//!                               └── save/load/list ──► DiagramStore (blocking pool)
//!           ──disconnect()──► leave_current + unregister
//! ```
//!
//! Every method runs to completion without awaiting, so each one is
//! atomic with respect to the others as long as a single task owns the hub.

use std::sync::Arc;

use crate::broadcast::RoomManager;
use crate::presence::PresenceDirectory;
use crate::protocol::{
    timestamp_millis, ClientMessage, ConnectionId, ProtocolError, RoomEvent, RoomId,
    ServerMessage, SERVER_VERSION,
};
use crate::registry::{ConnectionRegistry, Outbox};
use crate::router::{EventRouter, RouteOutcome};
use crate::storage::{DiagramStore, MemoryStore, SaveRequest, StoreError};

/// Point-in-time hub statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HubStats {
    pub connections: usize,
    pub rooms: usize,
    /// Member count per live room.
    pub room_sizes: Vec<(RoomId, usize)>,
    pub events_routed: u64,
    /// Events from connections that were not in a room.
    pub events_dropped: u64,
    pub protocol_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    events_routed: u64,
    events_dropped: u64,
    protocol_errors: u64,
}

pub struct CollabHub {
    registry: ConnectionRegistry,
    rooms: RoomManager,
    router: EventRouter,
    directory: PresenceDirectory,
    store: Arc<dyn DiagramStore>,
    counters: Counters,
}

impl CollabHub {
    pub fn new(store: Arc<dyn DiagramStore>) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            rooms: RoomManager::new(),
            router: EventRouter::new(),
            directory: PresenceDirectory::new(),
            store,
            counters: Counters::default(),
        }
    }

    /// Hub backed by a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Register a new transport and greet it.
    pub fn connect(&mut self, outbox: Outbox) -> ConnectionId {
        let id = self.registry.register(outbox);
        if let Some(info) = self.registry.describe(&id) {
            self.registry.send(
                &id,
                &ServerMessage::Welcome {
                    connection_id: id,
                    user_id: info.user_id,
                    display_name: info.display_name,
                    color: info.color,
                    version: SERVER_VERSION,
                },
            );
        }
        id
    }

    /// Leave the current room (telling the others), then forget the connection.
    pub fn disconnect(&mut self, id: &ConnectionId) -> bool {
        if let Some(room) = self.rooms.leave_current(&mut self.registry, id) {
            log::debug!("Connection {id} left {room} on disconnect");
        }
        self.registry.unregister(id)
    }

    /// Decode and handle one inbound text frame.
    ///
    /// Malformed frames are logged and dropped; the connection stays open.
    pub fn handle_text(&mut self, id: &ConnectionId, text: &str) -> Result<(), ProtocolError> {
        match ClientMessage::decode(text) {
            Ok(message) => {
                self.handle(id, message);
                Ok(())
            }
            Err(e) => {
                self.record_protocol_error(id, &e);
                Err(e)
            }
        }
    }

    /// Count and log a protocol error caught at the transport.
    pub fn record_protocol_error(&mut self, id: &ConnectionId, error: &ProtocolError) {
        self.counters.protocol_errors += 1;
        log::warn!("Protocol error from {id}: {error}");
    }

    /// Handle one decoded message from `id`.
    pub fn handle(&mut self, id: &ConnectionId, message: ClientMessage) {
        if !self.registry.contains(id) {
            log::debug!("Ignoring {} from unregistered connection {id}", message.kind());
            return;
        }

        match message {
            ClientMessage::JoinRoom { room_id } => {
                if let Some(outcome) = self.rooms.join(&mut self.registry, id, room_id.clone()) {
                    self.registry.send(
                        id,
                        &ServerMessage::Roster {
                            room_id,
                            members: outcome.roster,
                        },
                    );
                }
            }
            ClientMessage::LeaveRoom { room_id } => {
                self.rooms.leave(&mut self.registry, id, &room_id);
            }
            ClientMessage::CursorMove { x, y } => self.route(id, RoomEvent::CursorMove { x, y }),
            ClientMessage::SelectionChange { cell_ids } => {
                self.route(id, RoomEvent::SelectionChange { cell_ids })
            }
            ClientMessage::DiagramEdit { change } => {
                self.route(id, RoomEvent::DiagramEdit { change })
            }
            ClientMessage::Identify {
                user_id,
                display_name,
            } => {
                if let Some(info) = self.registry.identify(id, user_id, display_name) {
                    log::info!(
                        "Connection {id} identified as {} ({})",
                        info.display_name,
                        info.user_id
                    );
                }
            }
            ClientMessage::SaveDiagram { id: diagram_id, name, xml } => {
                let user_id = self
                    .registry
                    .describe(id)
                    .map(|info| info.user_id)
                    .unwrap_or_default();
                let request = SaveRequest {
                    id: diagram_id,
                    name,
                    xml,
                    user_id,
                };
                self.dispatch_storage(id, "save-diagram", move |store| {
                    let saved = store.save_diagram(request)?;
                    log::info!("Diagram {} saved as version {}", saved.id, saved.version);
                    Ok(ServerMessage::DiagramSaved {
                        id: saved.id,
                        version: saved.version,
                    })
                });
            }
            ClientMessage::LoadDiagram { id: diagram_id, version } => {
                self.dispatch_storage(id, "load-diagram", move |store| {
                    Ok(match store.load_diagram(&diagram_id, version)? {
                        Some(d) => ServerMessage::Diagram {
                            id: d.id,
                            name: d.name,
                            xml: d.xml,
                            version: d.version,
                        },
                        None => ServerMessage::error(
                            "load-diagram",
                            format!("diagram {diagram_id} not found"),
                        ),
                    })
                });
            }
            ClientMessage::ListDiagrams {} => {
                self.dispatch_storage(id, "list-diagrams", |store| {
                    Ok(ServerMessage::DiagramList {
                        diagrams: store.list_diagrams()?,
                    })
                });
            }
            ClientMessage::Ping {} => {
                self.registry.send(
                    id,
                    &ServerMessage::Pong {
                        timestamp: timestamp_millis(),
                    },
                );
            }
        }
    }

    fn route(&mut self, id: &ConnectionId, event: RoomEvent) {
        match self.router.route(&self.registry, &self.rooms, id, event) {
            RouteOutcome::NotInRoom => self.counters.events_dropped += 1,
            RouteOutcome::Delivered { .. } => self.counters.events_routed += 1,
        }
    }

    /// Run a store call on the blocking pool and reply to `id` only.
    ///
    /// The continuation holds a clone of the requester's outbox and never
    /// touches membership.
    fn dispatch_storage<F>(&self, id: &ConnectionId, request: &'static str, op: F)
    where
        F: FnOnce(&dyn DiagramStore) -> Result<ServerMessage, StoreError> + Send + 'static,
    {
        let Some(outbox) = self.registry.outbox(id) else {
            return;
        };
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("No runtime for {request} from {id}: {e}");
                self.registry
                    .send(id, &ServerMessage::error(request, "storage unavailable"));
                return;
            }
        };
        let store = Arc::clone(&self.store);
        let id = *id;

        runtime.spawn(async move {
            let reply = match tokio::task::spawn_blocking(move || op(store.as_ref())).await {
                Ok(Ok(reply)) => reply,
                Ok(Err(e)) => {
                    log::error!("{request} for {id} failed: {e}");
                    ServerMessage::error(request, e.to_string())
                }
                Err(e) => {
                    log::error!("{request} task for {id} aborted: {e}");
                    ServerMessage::error(request, "storage task aborted")
                }
            };
            match reply.encode() {
                Ok(frame) => {
                    if outbox.send(frame).await.is_err() {
                        log::debug!("{request} reply for {id} dropped: connection gone");
                    }
                }
                Err(e) => log::error!("Failed to encode {request} reply: {e}"),
            }
        });
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.registry.len(),
            rooms: self.rooms.room_count(),
            room_sizes: self.rooms.room_sizes(),
            events_routed: self.counters.events_routed,
            events_dropped: self.counters.events_dropped,
            protocol_errors: self.counters.protocol_errors,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn rooms(&self) -> &RoomManager {
        &self.rooms
    }

    pub fn directory(&self) -> &PresenceDirectory {
        &self.directory
    }

    /// Roster of a room, for diagnostics.
    pub fn roster_of(&self, room: &RoomId) -> Vec<crate::presence::PresenceInfo> {
        self.directory.roster_of(&self.rooms, &self.registry, room)
    }

    /// Membership and registry agree in both directions.
    pub fn is_consistent(&self) -> bool {
        self.rooms.consistent_with(&self.registry)
    }
}
