//! Typed views of a single store key.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::codec::{Codec, StringCodec};
use crate::errors::StorageResult;
use crate::listeners::Unsubscribe;
use crate::store::StorageStore;
use crate::types::StorageChange;

/// One key of a [`StorageStore`], read and written through a [`Codec`].
///
/// Values that fail to decode read as `None`.
pub struct StorageBinding<T, C = StringCodec> {
    store: Arc<StorageStore>,
    key: String,
    codec: Arc<C>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, C> StorageBinding<T, C>
where
    C: Codec<T>,
{
    pub fn new(store: Arc<StorageStore>, key: impl Into<String>, codec: C) -> Self {
        Self {
            store,
            key: key.into(),
            codec: Arc::new(codec),
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn store(&self) -> &Arc<StorageStore> {
        &self.store
    }

    pub async fn read(&self) -> StorageResult<Option<T>> {
        let raw = self.store.get(&self.key).await?;
        Ok(self.codec.decode(raw.as_deref()))
    }

    pub async fn write(&self, value: &T) -> StorageResult<()> {
        let encoded = self.codec.encode(value)?;
        self.store.set(&self.key, &encoded).await
    }

    /// Reads the current value, passes it to `f` and writes the result.
    ///
    /// Not atomic: a write landing between the read and the write is lost.
    pub async fn update<F>(&self, f: F) -> StorageResult<()>
    where
        F: FnOnce(Option<T>) -> T,
    {
        let current = self.read().await?;
        self.write(&f(current)).await
    }

    pub async fn remove(&self) -> StorageResult<()> {
        self.store.remove(&self.key).await
    }

    /// Calls `listener` with the decoded value on every change of the key.
    /// Removals and clears decode to `None`.
    pub fn subscribe<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn(Option<T>, &StorageChange) + Send + Sync + 'static,
        T: 'static,
        C: 'static,
    {
        let codec = self.codec.clone();
        self.store.subscribe(&self.key, move |change: &StorageChange| {
            listener(codec.decode(change.value.as_deref()), change);
        })
    }
}

impl<T, C> Clone for StorageBinding<T, C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            key: self.key.clone(),
            codec: self.codec.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T, C> fmt::Debug for StorageBinding<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageBinding")
            .field("key", &self.key)
            .field("adapter", &self.store.adapter_id())
            .finish()
    }
}
