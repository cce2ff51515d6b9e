//! The live Web Storage object (`window.localStorage` / `window.sessionStorage`).

use crate::errors::StorageResult;
use crate::intercept::Interceptable;
use crate::native::area::StorageArea;
use crate::native::in_memory::InMemoryStorageArea;
use std::fmt;
use std::sync::Arc;

/// A Storage object as scripts see it.
///
/// `get_item`, `set_item`, `remove_item` and `clear` are interceptable entry
/// points; `key`, `length` and the raw [`area`](Self::area) are not, so
/// interceptors can inspect storage without triggering themselves.
pub struct NativeStorage {
    area: Arc<dyn StorageArea>,
    get_item: Interceptable<String, Option<String>>,
    set_item: Interceptable<(String, String), StorageResult<()>>,
    remove_item: Interceptable<String, StorageResult<()>>,
    clear: Interceptable<(), StorageResult<()>>,
}

impl NativeStorage {
    pub fn new(area: Arc<dyn StorageArea>) -> Arc<Self> {
        Arc::new(Self {
            area,
            get_item: Interceptable::new("getItem"),
            set_item: Interceptable::new("setItem"),
            remove_item: Interceptable::new("removeItem"),
            clear: Interceptable::new("clear"),
        })
    }

    pub fn in_memory() -> Arc<Self> {
        Self::new(Arc::new(InMemoryStorageArea::new()))
    }

    /// The backend, bypassing every interceptor.
    pub fn area(&self) -> &Arc<dyn StorageArea> {
        &self.area
    }

    pub fn get_item(&self, key: &str) -> Option<String> {
        self.get_item.invoke(key.to_string(), &|k: String| self.area.get_item(&k))
    }

    pub fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        self.set_item.invoke((key.to_string(), value.to_string()), &|(k, v): (String, String)| {
            self.area.set_item(&k, &v).map_err(Into::into)
        })
    }

    pub fn remove_item(&self, key: &str) -> StorageResult<()> {
        self.remove_item
            .invoke(key.to_string(), &|k: String| self.area.remove_item(&k).map_err(Into::into))
    }

    pub fn clear(&self) -> StorageResult<()> {
        self.clear.invoke((), &|_: ()| self.area.clear().map_err(Into::into))
    }

    pub fn key(&self, index: usize) -> Option<String> {
        self.area.key(index)
    }

    pub fn length(&self) -> usize {
        self.area.len()
    }

    /// Every key, enumerated by index the way scripts have to.
    pub fn snapshot_keys(&self) -> Vec<String> {
        (0..self.length()).filter_map(|i| self.key(i)).collect()
    }

    pub fn get_item_slot(&self) -> &Interceptable<String, Option<String>> {
        &self.get_item
    }

    pub fn set_item_slot(&self) -> &Interceptable<(String, String), StorageResult<()>> {
        &self.set_item
    }

    pub fn remove_item_slot(&self) -> &Interceptable<String, StorageResult<()>> {
        &self.remove_item
    }

    pub fn clear_slot(&self) -> &Interceptable<(), StorageResult<()>> {
        &self.clear
    }

    /// Makes every entry point non-interceptable.
    pub fn seal(&self) {
        self.get_item.seal();
        self.set_item.seal();
        self.remove_item.seal();
        self.clear.seal();
    }
}

impl fmt::Debug for NativeStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeStorage")
            .field("length", &self.length())
            .field("set_item", &self.set_item)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StorageError;
    use crate::intercept::{intercept, wrapper};
    use std::sync::Mutex;

    #[test]
    fn behaves_like_dom_storage() {
        let storage = NativeStorage::in_memory();
        storage.set_item("b", "2").unwrap();
        storage.set_item("a", "1").unwrap();

        assert_eq!(storage.length(), 2);
        assert_eq!(storage.get_item("a").as_deref(), Some("1"));
        assert_eq!(storage.snapshot_keys(), vec!["a".to_string(), "b".to_string()]);

        storage.remove_item("a").unwrap();
        assert!(storage.get_item("a").is_none());
        storage.clear().unwrap();
        assert_eq!(storage.length(), 0);
    }

    #[test]
    fn quota_errors_surface_as_typed_errors() {
        let storage = NativeStorage::new(Arc::new(InMemoryStorageArea::with_quota(4)));
        let err = storage.set_item("key", "value").unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded(_)));
    }

    #[test]
    fn interceptor_sees_calls_and_area_bypasses_it() {
        let storage = NativeStorage::in_memory();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = seen.clone();
        let hook = intercept(
            &storage,
            NativeStorage::set_item_slot,
            wrapper(move |args: (String, String), next: &dyn Fn((String, String)) -> StorageResult<()>| {
                s.lock().unwrap().push(args.0.clone());
                next(args)
            }),
        )
        .unwrap();

        storage.set_item("a", "1").unwrap();
        storage.area().set_item("b", "2").unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["a".to_string()]);
        assert_eq!(storage.get_item("b").as_deref(), Some("2"));

        hook.restore();
        storage.set_item("c", "3").unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
