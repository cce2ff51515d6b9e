use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::adapters::StorageAdapter;
use crate::errors::StorageResult;

pub const DEFAULT_MEMORY_ID: &str = "memory";

/// Process-local adapter. Never fails; keys are listed in sorted order.
#[derive(Debug)]
pub struct MemoryAdapter {
    id: String,
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryAdapter {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_ID)
    }
}

/// Creates a memory adapter; `id` defaults to `"memory"`.
pub fn create_memory_adapter(id: Option<&str>) -> MemoryAdapter {
    MemoryAdapter::new(id.unwrap_or(DEFAULT_MEMORY_ID))
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn read(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.read().unwrap_or_else(PoisonError::into_inner).get(key).cloned())
    }

    async fn write(&self, key: &str, value: &str) -> StorageResult<()> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).remove(key);
        Ok(())
    }

    async fn clear(&self) -> StorageResult<()> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).clear();
        Ok(())
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.entries.read().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_and_remove() {
        let adapter = create_memory_adapter(None);
        assert_eq!(adapter.id(), "memory");

        adapter.write("k", "v").await.unwrap();
        assert_eq!(adapter.read("k").await.unwrap().as_deref(), Some("v"));

        adapter.remove("k").await.unwrap();
        assert_eq!(adapter.read("k").await.unwrap(), None);
        // Removing a missing key is not an error.
        adapter.remove("k").await.unwrap();
    }

    #[tokio::test]
    async fn keys_are_sorted_and_clear_empties() {
        let adapter = create_memory_adapter(Some("custom"));
        assert_eq!(adapter.id(), "custom");
        for k in ["b", "c", "a"] {
            adapter.write(k, k).await.unwrap();
        }
        assert_eq!(adapter.keys().await.unwrap(), vec!["a", "b", "c"]);
        assert!(adapter.listen(std::sync::Arc::new(|_: &crate::types::StorageChange| {})).is_none());

        adapter.clear().await.unwrap();
        assert!(adapter.is_empty());
    }
}
