use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use anyhow::Result;
use crate::errors::StorageError;
use crate::native::area::StorageArea;

/// In‑memory storage area (no persistence). Used as the default backend of
/// every native Storage object and in tests.
///
/// An optional quota (in bytes of keys plus values) makes `set_item` fail with
/// [`StorageError::QuotaExceeded`] the way a full browser storage does.
#[derive(Default)]
pub struct InMemoryStorageArea {
    map: Mutex<BTreeMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl InMemoryStorageArea {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            map: Mutex::new(BTreeMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.map.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StorageArea for InMemoryStorageArea {
    fn get_item(&self, key: &str) -> Option<String> {
        self.entries().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self.entries();
        if let Some(quota) = self.quota_bytes {
            let used: usize = map
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = used + key.len() + value.len();
            if needed > quota {
                return Err(StorageError::QuotaExceeded(format!(
                    "writing `{key}` needs {needed} bytes, quota is {quota}"
                ))
                .into());
            }
        }
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries().clear();
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries().len()
    }

    fn keys(&self) -> Vec<String> {
        // BTreeMap order keeps key(i) stable between calls.
        self.entries().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_contract() {
        let area = InMemoryStorageArea::new();

        assert_eq!(area.len(), 0);
        assert!(area.get_item("missing").is_none());

        area.set_item("b", "2").unwrap();
        area.set_item("a", "1").unwrap();
        assert_eq!(area.keys(), vec!["a".to_string(), "b".to_string()]);

        area.remove_item("a").unwrap();
        area.remove_item("never-there").unwrap();
        assert_eq!(area.keys(), vec!["b".to_string()]);

        area.clear().unwrap();
        assert!(area.keys().is_empty());
    }

    #[test]
    fn quota_rejects_oversized_writes() {
        let area = InMemoryStorageArea::with_quota(8);
        area.set_item("k", "1234").unwrap(); // 5 bytes

        let err = area.set_item("x", "123456").unwrap_err();
        let err = StorageError::from(err);
        assert!(matches!(err, StorageError::QuotaExceeded(_)));
        assert!(area.get_item("x").is_none());

        // Replacing an entry only counts the new value.
        area.set_item("k", "1234567").unwrap();
        assert_eq!(area.get_item("k").as_deref(), Some("1234567"));
    }
}
