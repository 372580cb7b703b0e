//! RocksDB-backed diagram store.
//!
//! Column families:
//! - `versions`: one record per saved version, LZ4 compressed, keyed by
//!   `<id bytes><0x00><version:8 bytes big-endian>`
//! - `metadata`: JSON [`DiagramMetadata`] per diagram, keyed by id
//!
//! A save writes the new version and the updated metadata in one
//! `WriteBatch`, so a crash never leaves metadata pointing at a missing
//! version.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{DiagramStore, DiagramSummary, SaveRequest, SavedDiagram, StoreError, StoredDiagram};
use crate::protocol::timestamp_millis;

const CF_VERSIONS: &str = "versions";
const CF_METADATA: &str = "metadata";

const COLUMN_FAMILIES: &[&str] = &[CF_VERSIONS, CF_METADATA];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync every save (default: true)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("archiflow_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: true,
            max_open_files: 256,
        }
    }
}

impl StoreConfig {
    /// Small caches, no fsync.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
        }
    }
}

/// Per-diagram bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagramMetadata {
    pub id: String,
    pub name: String,
    /// Latest version number
    pub version: u64,
    pub created_by: String,
    pub created_at: u64,
    pub updated_by: String,
    pub updated_at: u64,
    /// Uncompressed XML size of the latest version
    pub xml_size: u64,
    /// Stored size of the latest version
    pub compressed_size: u64,
}

impl DiagramMetadata {
    fn summary(&self) -> DiagramSummary {
        DiagramSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            version: self.version,
            updated_by: self.updated_by.clone(),
            updated_at: self.updated_at,
        }
    }
}

/// Body of one version record (id and version live in the key).
#[derive(Debug, Serialize, Deserialize)]
struct VersionRecord {
    name: String,
    xml: String,
    updated_by: String,
    updated_at: u64,
}

/// RocksDB diagram store.
pub struct RocksStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    /// Serializes the read-modify-write of version numbers.
    write_lock: Mutex<()>,
}

impl RocksStore {
    /// Open (or create) the store at the configured path.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        Ok(Self {
            db,
            config,
            write_lock: Mutex::new(()),
        })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);

        match name {
            CF_VERSIONS => {
                // Values are already LZ4 compressed
                opts.set_compression_type(DBCompressionType::None);
            }
            CF_METADATA => {
                opts.set_compression_type(DBCompressionType::Lz4);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            _ => {}
        }

        opts
    }

    /// Metadata of one diagram.
    pub fn load_metadata(&self, id: &str) -> Result<Option<DiagramMetadata>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        match self.db.get_cf(&cf, id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Flush memtables to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }

    fn version_key(id: &str, version: u64) -> Vec<u8> {
        let mut key = Vec::with_capacity(id.len() + 9);
        key.extend_from_slice(id.as_bytes());
        key.push(0);
        key.extend_from_slice(&version.to_be_bytes());
        key
    }
}

impl DiagramStore for RocksStore {
    fn load_diagram(
        &self,
        id: &str,
        version: Option<u64>,
    ) -> Result<Option<StoredDiagram>, StoreError> {
        let version = match version {
            Some(v) => v,
            None => match self.load_metadata(id)? {
                Some(meta) => meta.version,
                None => return Ok(None),
            },
        };

        let cf = self.cf(CF_VERSIONS)?;
        let Some(compressed) = self.db.get_cf(&cf, Self::version_key(id, version))? else {
            return Ok(None);
        };
        let raw = lz4_flex::decompress_size_prepended(&compressed)
            .map_err(|e| StoreError::Compression(e.to_string()))?;
        let record: VersionRecord = serde_json::from_slice(&raw)?;

        Ok(Some(StoredDiagram {
            id: id.to_string(),
            name: record.name,
            xml: record.xml,
            version,
            updated_by: record.updated_by,
            updated_at: record.updated_at,
        }))
    }

    fn save_diagram(&self, request: SaveRequest) -> Result<SavedDiagram, StoreError> {
        let id = request.resolve_id()?;
        let _guard = self.write_lock.lock().map_err(|_| StoreError::Poisoned)?;

        let cf_versions = self.cf(CF_VERSIONS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let now = timestamp_millis();
        let xml_size = request.xml.len() as u64;
        let record = VersionRecord {
            name: request.name,
            xml: request.xml,
            updated_by: request.user_id,
            updated_at: now,
        };
        let compressed = lz4_flex::compress_prepend_size(&serde_json::to_vec(&record)?);

        let meta = match self.load_metadata(&id)? {
            Some(prev) => DiagramMetadata {
                name: record.name.clone(),
                version: prev.version + 1,
                updated_by: record.updated_by.clone(),
                updated_at: now,
                xml_size,
                compressed_size: compressed.len() as u64,
                ..prev
            },
            None => DiagramMetadata {
                id: id.clone(),
                name: record.name.clone(),
                version: 1,
                created_by: record.updated_by.clone(),
                created_at: now,
                updated_by: record.updated_by.clone(),
                updated_at: now,
                xml_size,
                compressed_size: compressed.len() as u64,
            },
        };

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_versions, Self::version_key(&id, meta.version), &compressed);
        batch.put_cf(&cf_meta, id.as_bytes(), serde_json::to_vec(&meta)?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        log::debug!(
            "Saved diagram {id} v{} ({} → {} bytes)",
            meta.version,
            meta.xml_size,
            meta.compressed_size
        );
        Ok(SavedDiagram { id, version: meta.version })
    }

    fn list_diagrams(&self) -> Result<Vec<DiagramSummary>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item?;
            let meta: DiagramMetadata = serde_json::from_slice(&value)?;
            out.push(meta.summary());
        }
        Ok(out)
    }
}
