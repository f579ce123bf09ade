//! RocksDB-backed list store.
//!
//! Column families:
//! - `lists`: full list snapshots (bincode, LZ4 compressed), keyed by list id
//! - `metadata`: per-list bookkeeping, same key
//!
//! Keys are the list id as 8 big-endian bytes with the sign bit flipped, so
//! iteration order is id order.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::SystemTime;

use colab_core::{Group, Item, List, ListId, ListRepository, RepositoryError, User};
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const CF_LISTS: &str = "lists";
const CF_METADATA: &str = "metadata";

const COLUMN_FAMILIES: &[&str] = &[CF_LISTS, CF_METADATA];

/// Name of the group and item every created list starts with.
const SEED_NAME: &str = "default";

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync every save (default: true; saves are rare and user-initiated)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("colablists_data"),
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

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListMetadata {
    pub list_id: ListId,
    pub title: String,
    /// Number of times the list was written
    pub save_count: u64,
    pub group_count: u64,
    pub item_count: u64,
    /// Encoded snapshot size before compression
    pub snapshot_size: u64,
    pub compressed_size: u64,
    /// Seconds since epoch
    pub created_at: u64,
    pub updated_at: u64,
}

impl ListMetadata {
    fn new(list_id: ListId) -> Self {
        let now = now_secs();
        Self {
            list_id,
            title: String::new(),
            save_count: 0,
            group_count: 0,
            item_count: 0,
            snapshot_size: 0,
            compressed_size: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        let (meta, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        Ok(meta)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("List not found: {0}")]
    NotFound(ListId),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Compression error: {0}")]
    Compression(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<StoreError> for RepositoryError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => RepositoryError::NotFound(id),
            other => RepositoryError::Storage(other.to_string()),
        }
    }
}

/// RocksDB-backed list store.
pub struct ListStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    /// Id handed to the next created list
    next_id: AtomicI64,
}

impl ListStore {
    /// Open the store, creating the database and column families if missing.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(&config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        let next_id = Self::recover_next_id(&db);
        log::info!(
            "Opened list store at {} (next list id {next_id})",
            config.path.display()
        );

        Ok(Self {
            db,
            config,
            next_id: AtomicI64::new(next_id),
        })
    }

    fn cf_options(config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);

        // Values are already LZ4 framed by us.
        opts.set_compression_type(DBCompressionType::None);
        opts.optimize_for_point_lookup(config.block_cache_size as u64);
        opts
    }

    /// One past the highest list id on disk.
    fn recover_next_id(db: &DBWithThreadMode<SingleThreaded>) -> ListId {
        let Some(cf) = db.cf_handle(CF_METADATA) else {
            return 1;
        };
        let mut iter = db.iterator_cf(cf, IteratorMode::End);
        match iter.next() {
            Some(Ok((key, _))) => decode_key(&key).map_or(1, |id| id.max(0) + 1),
            _ => 1,
        }
    }

    /// Write the full list and its metadata in one batch.
    pub fn save_list(&self, list: &List) -> Result<ListMetadata, StoreError> {
        let cf_lists = self.cf(CF_LISTS)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let encoded = bincode::serde::encode_to_vec(list, bincode::config::standard())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let compressed = lz4_flex::compress_prepend_size(&encoded);

        let mut meta = match self.load_metadata(list.id) {
            Ok(meta) => meta,
            Err(StoreError::NotFound(_)) => ListMetadata::new(list.id),
            Err(e) => return Err(e),
        };
        meta.title = list.title.clone();
        meta.save_count += 1;
        meta.group_count = list.groups.len() as u64;
        meta.item_count = list.item_count() as u64;
        meta.snapshot_size = encoded.len() as u64;
        meta.compressed_size = compressed.len() as u64;
        meta.updated_at = now_secs();

        let key = encode_key(list.id);
        let mut batch = WriteBatch::default();
        batch.put_cf(cf_lists, key, &compressed);
        batch.put_cf(cf_meta, key, meta.encode()?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        self.next_id.fetch_max(list.id.saturating_add(1), Ordering::SeqCst);
        log::debug!(
            "Stored list {} ({} bytes, {} compressed)",
            list.id,
            meta.snapshot_size,
            meta.compressed_size
        );
        Ok(meta)
    }

    pub fn load_list(&self, list_id: ListId) -> Result<List, StoreError> {
        let cf = self.cf(CF_LISTS)?;
        let Some(compressed) = self.db.get_cf(cf, encode_key(list_id))? else {
            return Err(StoreError::NotFound(list_id));
        };
        let encoded = lz4_flex::decompress_size_prepended(&compressed)
            .map_err(|e| StoreError::Compression(e.to_string()))?;
        let (list, _) = bincode::serde::decode_from_slice(&encoded, bincode::config::standard())
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;
        Ok(list)
    }

    /// Create a new list seeded with one `default` group holding one
    /// `default` item.
    pub fn create(
        &self,
        title: &str,
        description: &str,
        creator: Option<User>,
    ) -> Result<List, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut list = List::new(id, title);
        list.description = description.to_string();
        list.creator = creator;
        let mut group = Group::new(1, SEED_NAME);
        group.items.push(Item::new(1, SEED_NAME, 0));
        list.groups.push(group);

        self.save_list(&list)?;
        log::info!("Created list {id} \"{title}\"");
        Ok(list)
    }

    pub fn exists(&self, list_id: ListId) -> Result<bool, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        Ok(self.db.get_cf(cf, encode_key(list_id))?.is_some())
    }

    pub fn load_metadata(&self, list_id: ListId) -> Result<ListMetadata, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        match self.db.get_cf(cf, encode_key(list_id))? {
            Some(bytes) => ListMetadata::decode(&bytes),
            None => Err(StoreError::NotFound(list_id)),
        }
    }

    /// All stored list ids in ascending order.
    pub fn list_ids(&self) -> Result<Vec<ListId>, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            let id = decode_key(&key)
                .ok_or_else(|| StoreError::Deserialization("Invalid list key".into()))?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Remove a list and its metadata. Deleting a missing list is not an error.
    pub fn delete(&self, list_id: ListId) -> Result<(), StoreError> {
        let cf_lists = self.cf(CF_LISTS)?;
        let cf_meta = self.cf(CF_METADATA)?;
        let key = encode_key(list_id);

        let mut batch = WriteBatch::default();
        batch.delete_cf(cf_lists, key);
        batch.delete_cf(cf_meta, key);
        self.db.write(batch)?;
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }
}

impl ListRepository for ListStore {
    fn load(&self, list_id: ListId) -> Result<List, RepositoryError> {
        Ok(self.load_list(list_id)?)
    }

    fn save(&self, list: &List) -> Result<List, RepositoryError> {
        self.save_list(list)?;
        Ok(list.clone())
    }
}

const SIGN_BIT: u64 = 1 << 63;

/// Big-endian with the sign bit flipped, so byte order matches numeric
/// order for negative ids too.
fn encode_key(list_id: ListId) -> [u8; 8] {
    ((list_id as u64) ^ SIGN_BIT).to_be_bytes()
}

fn decode_key(key: &[u8]) -> Option<ListId> {
    let bytes: [u8; 8] = key.try_into().ok()?;
    Some((u64::from_be_bytes(bytes) ^ SIGN_BIT) as ListId)
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
