//! IndexedDB adapter: one object store in one database.
//!
//! The database is opened on first use and the open is memoized. If it fails, or
//! any later transaction fails, the adapter switches to an internal memory
//! adapter for good and never touches IndexedDB again. Data written before the
//! switch stays in IndexedDB and is not visible through the fallback.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::adapters::memory::MemoryAdapter;
use crate::adapters::StorageAdapter;
use crate::errors::{StorageError, StorageResult};
use crate::native::window::resolve_window;
use crate::native::{IdbDatabase, IdbFactory, IdbKey, IdbUpgrade, ObjectStoreParams, TransactionMode, Window};

pub const INDEXED_DB_ID: &str = "indexeddb-storage";
pub const INDEXED_DB_FALLBACK_ID: &str = "indexeddb-fallback";

#[derive(Clone, Debug)]
pub struct IndexedDbOptions {
    pub database_name: String,
    pub store_name: String,
    pub version: u32,
    /// Without one, the window's (explicit or ambient) `indexedDB` is used.
    pub factory: Option<Arc<IdbFactory>>,
    pub window: Option<Arc<Window>>,
}

impl Default for IndexedDbOptions {
    fn default() -> Self {
        Self {
            database_name: "gosub-storage".to_string(),
            store_name: "kv-store".to_string(),
            version: 1,
            factory: None,
            window: None,
        }
    }
}

impl IndexedDbOptions {
    pub fn builder() -> IndexedDbOptionsBuilder {
        IndexedDbOptionsBuilder::default()
    }
}

/// Builder for [`IndexedDbOptions`].
#[derive(Debug, Clone, Default)]
pub struct IndexedDbOptionsBuilder {
    inner: IndexedDbOptions,
}

impl IndexedDbOptionsBuilder {
    #[inline]
    fn map(mut self, f: impl FnOnce(&mut IndexedDbOptions)) -> Self {
        f(&mut self.inner);
        self
    }

    pub fn database_name(self, name: impl Into<String>) -> Self {
        self.map(|o| o.database_name = name.into())
    }

    pub fn store_name(self, name: impl Into<String>) -> Self {
        self.map(|o| o.store_name = name.into())
    }

    pub fn version(self, version: u32) -> Self {
        self.map(|o| o.version = version)
    }

    pub fn factory(self, factory: Arc<IdbFactory>) -> Self {
        self.map(|o| o.factory = Some(factory))
    }

    pub fn window(self, window: Arc<Window>) -> Self {
        self.map(|o| o.window = Some(window))
    }

    pub fn build(self) -> StorageResult<IndexedDbOptions> {
        if self.inner.database_name.is_empty() {
            return Err(StorageError::InvalidOptions("database_name must not be empty".into()));
        }
        if self.inner.store_name.is_empty() {
            return Err(StorageError::InvalidOptions("store_name must not be empty".into()));
        }
        if self.inner.version == 0 {
            return Err(StorageError::InvalidOptions("version must be at least 1".into()));
        }
        Ok(self.inner)
    }
}

pub struct IndexedDbAdapter {
    factory: Arc<IdbFactory>,
    database_name: String,
    store_name: String,
    version: u32,
    database: OnceCell<Option<Arc<IdbDatabase>>>,
    fallen_back: AtomicBool,
    fallback: OnceLock<MemoryAdapter>,
}

impl IndexedDbAdapter {
    pub fn new(factory: Arc<IdbFactory>, options: &IndexedDbOptions) -> Self {
        Self {
            factory,
            database_name: options.database_name.clone(),
            store_name: options.store_name.clone(),
            version: options.version,
            database: OnceCell::new(),
            fallen_back: AtomicBool::new(false),
            fallback: OnceLock::new(),
        }
    }

    /// True once the adapter has switched to its memory fallback.
    pub fn is_fallen_back(&self) -> bool {
        self.fallen_back.load(Ordering::SeqCst)
    }

    fn open(&self) -> Option<Arc<IdbDatabase>> {
        let store = self.store_name.clone();
        let request = self
            .factory
            .open_with_upgrade(&self.database_name, self.version, move |upgrade: &mut IdbUpgrade<'_>| {
                if !upgrade.contains_store(&store) {
                    upgrade.create_object_store(&store, ObjectStoreParams::default())?;
                }
                Ok(())
            });
        match request.into_result() {
            Ok(db) => Some(db),
            Err(err) => {
                self.fall_back(&err);
                None
            }
        }
    }

    async fn database(&self) -> Option<Arc<IdbDatabase>> {
        if self.is_fallen_back() {
            return None;
        }
        self.database.get_or_init(|| async { self.open() }).await.clone()
    }

    fn fall_back(&self, err: &StorageError) {
        if !self.fallen_back.swap(true, Ordering::SeqCst) {
            log::warn!(
                "indexeddb `{}.{}` failed ({}), falling back to memory",
                self.database_name,
                self.store_name,
                err
            );
        }
    }

    fn fallback(&self) -> &MemoryAdapter {
        self.fallback.get_or_init(|| MemoryAdapter::new(INDEXED_DB_FALLBACK_ID))
    }

    /// Runs `op` against the database; a failure flips the adapter to the fallback
    /// and reports `None` so the caller retries there.
    async fn with_database<T>(&self, op: impl FnOnce(&IdbDatabase) -> StorageResult<T>) -> Option<T> {
        let db = self.database().await?;
        match op(&db) {
            Ok(value) => Some(value),
            Err(err) => {
                self.fall_back(&err);
                None
            }
        }
    }

    fn read_from(&self, db: &IdbDatabase, key: &str) -> StorageResult<Option<String>> {
        let tx = db.transaction(&[self.store_name.as_str()], TransactionMode::ReadOnly)?;
        let value = tx.object_store(&self.store_name)?.get(key).into_result()?;
        Ok(match value {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s),
            Some(other) => Some(other.to_string()),
        })
    }

    fn write_to(&self, db: &IdbDatabase, key: &str, value: &str) -> StorageResult<()> {
        let tx = db.transaction(&[self.store_name.as_str()], TransactionMode::ReadWrite)?;
        tx.object_store(&self.store_name)?
            .put(Value::String(value.to_string()), Some(IdbKey::from(key)))
            .into_result()?;
        Ok(())
    }

    fn remove_from(&self, db: &IdbDatabase, key: &str) -> StorageResult<()> {
        let tx = db.transaction(&[self.store_name.as_str()], TransactionMode::ReadWrite)?;
        tx.object_store(&self.store_name)?.delete(key).into_result()
    }

    fn clear_store(&self, db: &IdbDatabase) -> StorageResult<()> {
        let tx = db.transaction(&[self.store_name.as_str()], TransactionMode::ReadWrite)?;
        tx.object_store(&self.store_name)?.clear().into_result()
    }

    fn keys_of(&self, db: &IdbDatabase) -> StorageResult<Vec<String>> {
        let tx = db.transaction(&[self.store_name.as_str()], TransactionMode::ReadOnly)?;
        let store = tx.object_store(&self.store_name)?;

        if let Some(request) = store.get_all_keys() {
            return Ok(request.into_result()?.iter().map(IdbKey::to_string).collect());
        }

        let mut keys = Vec::new();
        let mut cursor = store.open_key_cursor().into_result()?;
        while let Some(current) = cursor {
            keys.push(current.key().to_string());
            cursor = current.advance();
        }
        Ok(keys)
    }
}

impl fmt::Debug for IndexedDbAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexedDbAdapter")
            .field("database_name", &self.database_name)
            .field("store_name", &self.store_name)
            .field("version", &self.version)
            .field("fallen_back", &self.is_fallen_back())
            .finish()
    }
}

/// Creates an IndexedDB adapter, or an `"indexeddb-fallback"` memory adapter
/// when no `indexedDB` is available.
pub fn create_indexed_db_adapter(options: IndexedDbOptions) -> Arc<dyn StorageAdapter> {
    let factory = options
        .factory
        .clone()
        .or_else(|| resolve_window(options.window.as_ref()).and_then(|w| w.indexed_db()));

    match factory {
        Some(factory) => Arc::new(IndexedDbAdapter::new(factory, &options)),
        None => {
            log::debug!("indexedDB unavailable, using memory adapter `{}`", INDEXED_DB_FALLBACK_ID);
            Arc::new(MemoryAdapter::new(INDEXED_DB_FALLBACK_ID))
        }
    }
}

#[async_trait]
impl StorageAdapter for IndexedDbAdapter {
    fn id(&self) -> &str {
        INDEXED_DB_ID
    }

    async fn read(&self, key: &str) -> StorageResult<Option<String>> {
        match self.with_database(|db| self.read_from(db, key)).await {
            Some(value) => Ok(value),
            None => self.fallback().read(key).await,
        }
    }

    async fn write(&self, key: &str, value: &str) -> StorageResult<()> {
        match self.with_database(|db| self.write_to(db, key, value)).await {
            Some(()) => Ok(()),
            None => self.fallback().write(key, value).await,
        }
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        match self.with_database(|db| self.remove_from(db, key)).await {
            Some(()) => Ok(()),
            None => self.fallback().remove(key).await,
        }
    }

    async fn clear(&self) -> StorageResult<()> {
        match self.with_database(|db| self.clear_store(db)).await {
            Some(()) => Ok(()),
            None => self.fallback().clear().await,
        }
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        match self.with_database(|db| self.keys_of(db)).await {
            Some(keys) => Ok(keys),
            None => self.fallback().keys().await,
        }
    }
}
