//! In-memory diagram store with full version history.

use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{DiagramStore, DiagramSummary, SaveRequest, SavedDiagram, StoreError, StoredDiagram};
use crate::protocol::timestamp_millis;

/// Diagram versions keyed by id; index `n` holds version `n + 1`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    diagrams: Mutex<BTreeMap<String, Vec<StoredDiagram>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DiagramStore for MemoryStore {
    fn load_diagram(
        &self,
        id: &str,
        version: Option<u64>,
    ) -> Result<Option<StoredDiagram>, StoreError> {
        let diagrams = self.diagrams.lock().map_err(|_| StoreError::Poisoned)?;
        let Some(versions) = diagrams.get(id) else {
            return Ok(None);
        };
        let found = match version {
            Some(v) => versions.iter().find(|d| d.version == v),
            None => versions.last(),
        };
        Ok(found.cloned())
    }

    fn save_diagram(&self, request: SaveRequest) -> Result<SavedDiagram, StoreError> {
        let id = request.resolve_id()?;
        let mut diagrams = self.diagrams.lock().map_err(|_| StoreError::Poisoned)?;
        let versions = diagrams.entry(id.clone()).or_default();
        let version = versions.last().map_or(1, |d| d.version + 1);
        versions.push(StoredDiagram {
            id: id.clone(),
            name: request.name,
            xml: request.xml,
            version,
            updated_by: request.user_id,
            updated_at: timestamp_millis(),
        });
        Ok(SavedDiagram { id, version })
    }

    fn list_diagrams(&self) -> Result<Vec<DiagramSummary>, StoreError> {
        let diagrams = self.diagrams.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(diagrams
            .values()
            .filter_map(|versions| versions.last())
            .map(DiagramSummary::from)
            .collect())
    }
}
