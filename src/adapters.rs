//! Storage adapters: one async key/value contract over every backend.
//!
//! - [`MemoryAdapter`] (always available): process-local map; also the fallback of
//!   every other adapter.
//! - Web Storage ([`create_local_storage_adapter`], [`create_session_storage_adapter`]):
//!   wraps a [`NativeStorage`](crate::native::NativeStorage).
//! - [`create_cookie_adapter`]: reads and writes `document.cookie`.
//! - [`create_indexed_db_adapter`]: one object store in a lazily opened database.
//!
//! Constructors never fail on a missing backend. When the window, storage object,
//! document or `indexedDB` is unavailable they return a [`MemoryAdapter`] whose id
//! ends in `-fallback`.

pub mod cookie;
pub mod indexed_db;
pub mod memory;
pub mod web_storage;

use async_trait::async_trait;

use crate::emitter::ChangeListener;
use crate::errors::StorageResult;
use crate::listeners::Unsubscribe;

pub use cookie::{
    create_cookie_adapter, CookieAdapter, CookieOptions, CookieOptionsBuilder, COOKIE_FALLBACK_ID, COOKIE_STORAGE_ID,
};
pub use indexed_db::{
    create_indexed_db_adapter, IndexedDbAdapter, IndexedDbOptions, IndexedDbOptionsBuilder, INDEXED_DB_FALLBACK_ID,
    INDEXED_DB_ID,
};
pub use memory::{create_memory_adapter, MemoryAdapter, DEFAULT_MEMORY_ID};
pub use web_storage::{
    create_local_storage_adapter, create_session_storage_adapter, WebStorageAdapter, WebStorageOptions,
    LOCAL_STORAGE_ID, SESSION_STORAGE_ID,
};

/// Uniform asynchronous key/value contract.
///
/// Every operation completes asynchronously, even over synchronous backends, so
/// callers never branch on the backend type.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Stable identity, used as the `source` of the changes a store emits.
    fn id(&self) -> &str;

    /// Returns `None` if the key does not exist.
    async fn read(&self, key: &str) -> StorageResult<Option<String>>;

    async fn write(&self, key: &str, value: &str) -> StorageResult<()>;

    async fn remove(&self, key: &str) -> StorageResult<()>;

    async fn clear(&self) -> StorageResult<()>;

    async fn keys(&self) -> StorageResult<Vec<String>>;

    /// Subscribes to changes the backend reports on its own (for example Web
    /// Storage's cross-context `storage` event). `None` when the backend has no
    /// such notifications.
    fn listen(&self, _listener: ChangeListener) -> Option<Unsubscribe> {
        None
    }
}
