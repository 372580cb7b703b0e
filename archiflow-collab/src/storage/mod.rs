//! Diagram persistence behind a save/load interface.
//!
//! ```text
//! CollabHub ──spawn_blocking──► dyn DiagramStore
//!                                   ├── MemoryStore  (process lifetime)
//!                                   └── RocksStore   (RocksDB on disk)
//!                                         ├── CF "versions": LZ4 XML per version
//!                                         └── CF "metadata": JSON per diagram
//! ```
//!
//! Every save produces a new version; earlier versions stay loadable.
//! The store never touches room membership: replies go straight to the
//! requesting connection.

pub mod memory;
pub mod rocks;

pub use memory::MemoryStore;
pub use rocks::{RocksStore, StoreConfig};

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::protocol::timestamp_millis;

/// One stored version of a diagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDiagram {
    pub id: String,
    pub name: String,
    pub xml: String,
    pub version: u64,
    pub updated_by: String,
    /// Milliseconds since the Unix epoch.
    pub updated_at: u64,
}

/// Listing entry: latest version of a diagram, without its XML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagramSummary {
    pub id: String,
    pub name: String,
    pub version: u64,
    pub updated_by: String,
    pub updated_at: u64,
}

impl From<&StoredDiagram> for DiagramSummary {
    fn from(d: &StoredDiagram) -> Self {
        Self {
            id: d.id.clone(),
            name: d.name.clone(),
            version: d.version,
            updated_by: d.updated_by.clone(),
            updated_at: d.updated_at,
        }
    }
}

/// A save request. `user_id` comes from server-side presence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRequest {
    pub id: Option<String>,
    pub name: String,
    pub xml: String,
    pub user_id: String,
}

impl SaveRequest {
    /// The explicit id, or a freshly generated `diagram-<millis>-<suffix>`.
    pub fn resolve_id(&self) -> Result<String, StoreError> {
        match &self.id {
            Some(id) if id.trim().is_empty() => {
                Err(StoreError::InvalidRequest("diagram id must not be blank".into()))
            }
            Some(id) => Ok(id.clone()),
            None => {
                let suffix = Uuid::new_v4().simple().to_string();
                Ok(format!("diagram-{}-{}", timestamp_millis(), &suffix[..8]))
            }
        }
    }
}

/// Result of a successful save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedDiagram {
    pub id: String,
    pub version: u64,
}

/// Storage errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("compression error: {0}")]
    Compression(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("store lock poisoned")]
    Poisoned,
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Save/load interface consumed by the collaboration hub.
///
/// Calls may block; the hub runs them on the blocking pool.
pub trait DiagramStore: Send + Sync {
    /// Latest version, or the given one. `Ok(None)` when absent.
    fn load_diagram(&self, id: &str, version: Option<u64>)
        -> Result<Option<StoredDiagram>, StoreError>;

    /// Store a new version and return its number.
    fn save_diagram(&self, request: SaveRequest) -> Result<SavedDiagram, StoreError>;

    /// Latest version of every diagram, ordered by id.
    fn list_diagrams(&self) -> Result<Vec<DiagramSummary>, StoreError>;
}

/// RocksDB at `path` when given, otherwise an in-memory store.
pub fn open_store(path: Option<&Path>) -> Result<Arc<dyn DiagramStore>, StoreError> {
    match path {
        Some(path) => {
            let store = RocksStore::open(StoreConfig {
                path: path.to_path_buf(),
                ..StoreConfig::default()
            })?;
            log::info!("Diagram store opened at {}", path.display());
            Ok(Arc::new(store))
        }
        None => {
            log::info!("Diagram store is in-memory; diagrams are lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
