//! The storage store: one adapter plus a change emitter.
//!
//! Every successful mutation made through the store emits exactly one change per
//! affected key, in the order the keys were affected. `clear` lists the keys
//! before clearing, since the backend cannot say afterwards what it deleted.
//! Changes the adapter reports on its own (see [`StorageAdapter::listen`]) are
//! re-emitted unchanged.
//!
//! After [`StorageStore::dispose`] the store still forwards calls to the adapter
//! but never emits again, and every [`watch`](StorageStore::watch) receiver is
//! closed.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use tokio::sync::broadcast;

use crate::adapters::StorageAdapter;
use crate::binding::StorageBinding;
use crate::codec::{Codec, StringCodec};
use crate::emitter::{ChangeEmitter, ChangeFilter};
use crate::errors::StorageResult;
use crate::listeners::Unsubscribe;
use crate::types::{StorageChange, WILDCARD_KEY};

/// Capacity of each [`watch`](StorageStore::watch) channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 128;

/// A handle for receiving storage changes asynchronously.
pub type Subscription = broadcast::Receiver<StorageChange>;

pub struct StorageStore {
    adapter: Arc<dyn StorageAdapter>,
    emitter: ChangeEmitter,
    external: Mutex<Option<Unsubscribe>>,
    disposed: Arc<AtomicBool>,
}

/// Creates a store over `adapter`, subscribing to the adapter's own change
/// notifications if it has any.
pub fn create_storage_store(adapter: Arc<dyn StorageAdapter>) -> Arc<StorageStore> {
    StorageStore::new(adapter)
}

impl StorageStore {
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Arc<Self> {
        let emitter = ChangeEmitter::new();
        let disposed = Arc::new(AtomicBool::new(false));

        let external = {
            let emitter = emitter.clone();
            let disposed = disposed.clone();
            adapter.listen(Arc::new(move |change: &StorageChange| {
                if !disposed.load(Ordering::SeqCst) {
                    emitter.emit(change);
                }
            }))
        };
        if external.is_some() {
            log::debug!("store: listening to external changes of `{}`", adapter.id());
        }

        Arc::new(Self {
            adapter,
            emitter,
            external: Mutex::new(external),
            disposed,
        })
    }

    pub fn adapter(&self) -> &Arc<dyn StorageAdapter> {
        &self.adapter
    }

    pub fn adapter_id(&self) -> &str {
        self.adapter.id()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn notify(&self, change: StorageChange) {
        if self.is_disposed() {
            return;
        }
        self.emitter.emit(&change);
    }

    pub async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.adapter.read(key).await
    }

    pub async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.adapter.write(key, value).await?;
        self.notify(StorageChange::write(key, value, self.adapter.id()));
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> StorageResult<()> {
        self.adapter.remove(key).await?;
        self.notify(StorageChange::remove(key, self.adapter.id()));
        Ok(())
    }

    pub async fn clear(&self) -> StorageResult<()> {
        let keys = self.adapter.keys().await?;
        self.adapter.clear().await?;
        for key in keys {
            self.notify(StorageChange::clear(key, self.adapter.id()));
        }
        Ok(())
    }

    pub async fn keys(&self) -> StorageResult<Vec<String>> {
        self.adapter.keys().await
    }

    /// Subscribes to changes of `key`; an empty key or [`WILDCARD_KEY`]
    /// subscribes to every key.
    pub fn subscribe<F>(&self, key: &str, listener: F) -> Unsubscribe
    where
        F: Fn(&StorageChange) + Send + Sync + 'static,
    {
        self.emitter.subscribe(resolve_key(key), listener)
    }

    pub fn subscribe_all<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn(&StorageChange) + Send + Sync + 'static,
    {
        self.emitter.subscribe_all(listener)
    }

    pub fn subscribe_filtered<F>(&self, filter: ChangeFilter, listener: F) -> Unsubscribe
    where
        F: Fn(&StorageChange) + Send + Sync + 'static,
    {
        self.emitter.subscribe_filtered(filter, listener)
    }

    /// Changes of `key` (empty or `"*"` for all keys) as a broadcast channel.
    ///
    /// The channel closes when the store is disposed. Once every receiver is
    /// dropped the underlying subscription removes itself on the next change.
    pub fn watch(&self, key: &str) -> Subscription {
        let (tx, rx) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        let own: Arc<OnceLock<Unsubscribe>> = Arc::new(OnceLock::new());

        let handle = own.clone();
        let unsubscribe = self.emitter.subscribe(resolve_key(key), move |change: &StorageChange| {
            // `send` only fails when no receiver is left.
            if tx.send(change.clone()).is_err() {
                if let Some(unsubscribe) = handle.get() {
                    unsubscribe.unsubscribe();
                }
            }
        });
        let _ = own.set(unsubscribe);
        rx
    }

    /// A string view of `key`.
    pub fn bind(self: &Arc<Self>, key: &str) -> StorageBinding<String, StringCodec> {
        StorageBinding::new(self.clone(), key, StringCodec)
    }

    /// A typed view of `key` through `codec`.
    pub fn bind_with<T, C>(self: &Arc<Self>, key: &str, codec: C) -> StorageBinding<T, C>
    where
        C: Codec<T>,
    {
        StorageBinding::new(self.clone(), key, codec)
    }

    /// Stops listening to the adapter and drops every subscriber. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let external = self.external.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(external) = external {
            external.unsubscribe();
        }
        self.emitter.clear();
        log::debug!("store over `{}` disposed", self.adapter.id());
    }
}

fn resolve_key(key: &str) -> &str {
    if key.is_empty() {
        WILDCARD_KEY
    } else {
        key
    }
}

impl fmt::Debug for StorageStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageStore")
            .field("adapter", &self.adapter.id())
            .field("subscribers", &self.emitter.len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{create_local_storage_adapter, create_memory_adapter, WebStorageOptions};
    use crate::errors::StorageError;
    use crate::native::{InMemoryStorageArea, NativeStorage, Window};
    use crate::types::ChangeType;

    fn memory_store() -> Arc<StorageStore> {
        create_storage_store(Arc::new(create_memory_adapter(None)))
    }

    fn recorder() -> (Arc<Mutex<Vec<StorageChange>>>, impl Fn(&StorageChange) + Send + Sync + 'static) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        (log, move |change: &StorageChange| sink.lock().unwrap().push(change.clone()))
    }

    #[tokio::test]
    async fn set_and_remove_emit_to_key_subscribers() {
        let store = memory_store();
        let (log, listener) = recorder();
        store.subscribe("token", listener);

        store.set("token", "123").await.unwrap();
        store.set("other", "x").await.unwrap();
        store.remove("token").await.unwrap();

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![StorageChange::write("token", "123", "memory"), StorageChange::remove("token", "memory")]
        );
    }

    #[tokio::test]
    async fn clear_emits_once_per_existing_key() {
        let store = memory_store();
        let (log, listener) = recorder();
        store.subscribe("", listener);

        store.set("a", "1").await.unwrap();
        store.set("b", "2").await.unwrap();
        store.clear().await.unwrap();

        let pairs: Vec<(String, ChangeType)> =
            log.lock().unwrap().iter().map(|c| (c.key.clone(), c.kind)).collect();
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), ChangeType::Write),
                ("b".to_string(), ChangeType::Write),
                ("a".to_string(), ChangeType::Clear),
                ("b".to_string(), ChangeType::Clear),
            ]
        );
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_write_emits_nothing() {
        let storage = NativeStorage::new(Arc::new(InMemoryStorageArea::with_quota(2)));
        let store = create_storage_store(create_local_storage_adapter(WebStorageOptions::new().storage(storage)));
        let (log, listener) = recorder();
        store.subscribe_all(listener);

        let err = store.set("key", "value").await.unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded(_)));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn external_changes_are_reemitted_until_dispose() {
        let window = Window::with_all_storage("https://example.com/").unwrap();
        let local = window.local_storage().unwrap();
        let store = create_storage_store(create_local_storage_adapter(WebStorageOptions::new().window(window.clone())));
        assert_eq!(store.adapter_id(), "local-storage");
        assert_eq!(window.storage_listener_count(), 1);

        let (log, listener) = recorder();
        store.subscribe_all(listener);

        window.apply_remote_change(&local, Some("theme"), Some("dark")).unwrap();
        assert_eq!(*log.lock().unwrap(), vec![StorageChange::write("theme", "dark", "local-storage")]);

        store.dispose();
        store.dispose();
        assert!(store.is_disposed());
        assert_eq!(window.storage_listener_count(), 0);

        window.apply_remote_change(&local, Some("theme"), Some("light")).unwrap();
        store.set("after", "1").await.unwrap();
        assert_eq!(log.lock().unwrap().len(), 1);
        // The adapter is still usable.
        assert_eq!(store.get("after").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn filtered_subscription() {
        let store = memory_store();
        let (log, listener) = recorder();
        store.subscribe_filtered(
            ChangeFilter::new().exclude(crate::emitter::ChangePattern::new().kind(ChangeType::Remove)),
            listener,
        );

        store.set("a", "1").await.unwrap();
        store.remove("a").await.unwrap();
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn watch_streams_changes_and_closes_on_dispose() {
        let store = memory_store();
        let mut token = store.watch("token");
        let mut all = store.watch("*");

        store.set("token", "1").await.unwrap();
        store.set("other", "2").await.unwrap();

        assert_eq!(token.recv().await.unwrap(), StorageChange::write("token", "1", "memory"));
        assert_eq!(all.recv().await.unwrap().key, "token");
        assert_eq!(all.recv().await.unwrap().key, "other");

        store.dispose();
        assert!(matches!(token.recv().await, Err(broadcast::error::RecvError::Closed)));
    }

    #[tokio::test]
    async fn dropped_watch_receivers_unsubscribe_themselves() {
        let store = memory_store();
        drop(store.watch("k"));
        assert_eq!(store.emitter.len(), 1);

        store.set("k", "v").await.unwrap();
        assert_eq!(store.emitter.len(), 0);
    }
}
