//! # archiflow-collab: Real-time collaboration layer for ArchiFlow
//!
//! Relays presence and editing events between the clients editing the
//! same diagram. The server does no conflict resolution: it tracks who is
//! connected, who is in which room, and fans events out to the others.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   JSON over WebSocket   ┌──────────────┐
//! │ Editor      │ ◄─────────────────────► │ CollabServer │
//! │ (per user)  │                         │ (transport)  │
//! └─────────────┘                         └──────┬───────┘
//!                                                │ HubCommand
//!                                         ┌──────▼───────┐
//!                                         │  CollabHub   │
//!                                         └──────┬───────┘
//!            ┌──────────────────┬────────────────┼─────────────────┐
//!            ▼                  ▼                ▼                 ▼
//!   ConnectionRegistry     RoomManager      EventRouter    PresenceDirectory
//!   (id → outbox,          (room → ordered  (exclude-sender (rosters)
//!    presence, room)        members)         fan-out)
//! ```
//!
//! ## Modules
//!
//! - [`protocol`]: JSON wire messages and identifiers
//! - [`registry`]: live connections and their presence metadata
//! - [`broadcast`]: room membership and fan-out
//! - [`router`]: relays room events to everyone but the sender
//! - [`presence`]: identity defaults, colours, rosters
//! - [`hub`]: ties the four together and dispatches client messages
//! - [`server`]: WebSocket server driving the hub
//! - [`storage`]: versioned diagram persistence (memory or RocksDB)

pub mod protocol;
pub mod presence;
pub mod registry;
pub mod broadcast;
pub mod router;
pub mod hub;
pub mod server;
pub mod storage;

// Re-exports for convenience
pub use protocol::{
    ClientMessage, ConnectionId, Frame, ProtocolError, RoomEvent, RoomId, ServerMessage, Source,
};
pub use presence::{ColorPalette, PresenceDirectory, PresenceInfo};
pub use registry::{ConnectionRegistry, Outbox};
pub use broadcast::{fan_out, BroadcastReport, JoinOutcome, RoomManager};
pub use router::{EventRouter, RouteOutcome};
pub use hub::{CollabHub, HubStats};
pub use server::{CollabServer, HubHandle, ServerConfig, ServerError, ServerHandle, ServerStats};
pub use storage::{
    open_store, DiagramStore, DiagramSummary, MemoryStore, RocksStore, SaveRequest, StoreConfig,
    StoreError, StoredDiagram,
};
