use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::adapters::memory::MemoryAdapter;
use crate::adapters::StorageAdapter;
use crate::emitter::ChangeListener;
use crate::errors::StorageResult;
use crate::listeners::Unsubscribe;
use crate::native::window::resolve_window;
use crate::native::{NativeStorage, StorageEvent, Window};
use crate::types::{StorageChange, WILDCARD_KEY};

pub const LOCAL_STORAGE_ID: &str = "local-storage";
pub const SESSION_STORAGE_ID: &str = "session-storage";

/// Options for the Web Storage adapters.
///
/// Without an explicit `storage`, the window's (explicit or ambient) storage
/// object is used. The window also provides the `storage` events behind
/// [`StorageAdapter::listen`].
#[derive(Clone, Debug, Default)]
pub struct WebStorageOptions {
    pub storage: Option<Arc<NativeStorage>>,
    pub window: Option<Arc<Window>>,
    pub id: Option<String>,
}

impl WebStorageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn storage(mut self, storage: Arc<NativeStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn window(mut self, window: Arc<Window>) -> Self {
        self.window = Some(window);
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum StorageKind {
    Local,
    Session,
}

impl StorageKind {
    fn default_id(self) -> &'static str {
        match self {
            StorageKind::Local => LOCAL_STORAGE_ID,
            StorageKind::Session => SESSION_STORAGE_ID,
        }
    }

    fn resolve(self, window: &Window) -> Option<Arc<NativeStorage>> {
        match self {
            StorageKind::Local => window.local_storage(),
            StorageKind::Session => window.session_storage(),
        }
    }
}

/// Adapter over a live Web Storage object.
pub struct WebStorageAdapter {
    id: String,
    storage: Arc<NativeStorage>,
    window: Option<Arc<Window>>,
}

impl WebStorageAdapter {
    pub fn new(id: impl Into<String>, storage: Arc<NativeStorage>, window: Option<Arc<Window>>) -> Self {
        Self {
            id: id.into(),
            storage,
            window,
        }
    }

    pub fn storage(&self) -> &Arc<NativeStorage> {
        &self.storage
    }
}

impl fmt::Debug for WebStorageAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebStorageAdapter")
            .field("id", &self.id)
            .field("listens", &self.window.is_some())
            .finish()
    }
}

pub fn create_local_storage_adapter(options: WebStorageOptions) -> Arc<dyn StorageAdapter> {
    create_web_storage_adapter(StorageKind::Local, options)
}

pub fn create_session_storage_adapter(options: WebStorageOptions) -> Arc<dyn StorageAdapter> {
    create_web_storage_adapter(StorageKind::Session, options)
}

fn create_web_storage_adapter(kind: StorageKind, options: WebStorageOptions) -> Arc<dyn StorageAdapter> {
    let window = resolve_window(options.window.as_ref());
    let storage = options
        .storage
        .or_else(|| window.as_ref().and_then(|w| kind.resolve(w)));

    let Some(storage) = storage else {
        let fallback = format!("{}-fallback", kind.default_id());
        log::debug!("web storage unavailable, using memory adapter `{}`", fallback);
        return Arc::new(MemoryAdapter::new(fallback));
    };

    let id = options.id.unwrap_or_else(|| kind.default_id().to_string());
    Arc::new(WebStorageAdapter::new(id, storage, window))
}

/// Translates a native `storage` event into a change record.
fn change_from_event(event: &StorageEvent, source: &str) -> StorageChange {
    match &event.key {
        Some(key) => match &event.new_value {
            Some(value) => StorageChange::write(key.clone(), value.clone(), source),
            None => StorageChange::remove(key.clone(), source),
        },
        None => StorageChange::clear(WILDCARD_KEY, source),
    }
}

#[async_trait]
impl StorageAdapter for WebStorageAdapter {
    fn id(&self) -> &str {
        &self.id
    }

    async fn read(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.storage.get_item(key))
    }

    async fn write(&self, key: &str, value: &str) -> StorageResult<()> {
        self.storage.set_item(key, value)
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.storage.remove_item(key)
    }

    async fn clear(&self) -> StorageResult<()> {
        self.storage.clear()
    }

    async fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.storage.snapshot_keys())
    }

    fn listen(&self, listener: ChangeListener) -> Option<Unsubscribe> {
        let window = self.window.as_ref()?;
        let storage = self.storage.clone();
        let source = self.id.clone();

        Some(window.add_storage_listener(move |event: &StorageEvent| {
            if event.is_for(&storage) {
                listener(&change_from_event(event, &source));
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StorageError;
    use crate::native::InMemoryStorageArea;
    use crate::types::ChangeType;
    use std::sync::Mutex;

    #[tokio::test]
    async fn delegates_to_the_native_object() {
        let storage = NativeStorage::in_memory();
        let adapter = create_local_storage_adapter(WebStorageOptions::new().storage(storage.clone()));
        assert_eq!(adapter.id(), "local-storage");

        adapter.write("b", "2").await.unwrap();
        adapter.write("a", "1").await.unwrap();
        assert_eq!(storage.get_item("a").as_deref(), Some("1"));
        assert_eq!(adapter.keys().await.unwrap(), vec!["a", "b"]);

        adapter.remove("a").await.unwrap();
        assert_eq!(adapter.read("a").await.unwrap(), None);
        adapter.clear().await.unwrap();
        assert_eq!(storage.length(), 0);
    }

    #[tokio::test]
    async fn quota_failure_propagates() {
        let storage = NativeStorage::new(Arc::new(InMemoryStorageArea::with_quota(3)));
        let adapter = create_session_storage_adapter(WebStorageOptions::new().storage(storage).id("tiny"));
        assert_eq!(adapter.id(), "tiny");

        let err = adapter.write("key", "value").await.unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded(_)));
    }

    #[test]
    fn missing_storage_degrades_to_memory() {
        let window = Window::builder().build().unwrap();
        let adapter = create_session_storage_adapter(WebStorageOptions::new().window(window));
        assert_eq!(adapter.id(), "session-storage-fallback");
    }

    #[tokio::test]
    async fn listen_translates_events_for_its_own_area() {
        let window = Window::with_all_storage("https://example.com/").unwrap();
        let local = window.local_storage().unwrap();
        let session = window.session_storage().unwrap();
        let adapter = create_local_storage_adapter(WebStorageOptions::new().window(window.clone()));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let unsubscribe = adapter
            .listen(Arc::new(move |change: &StorageChange| {
                s.lock().unwrap().push((change.key.clone(), change.kind, change.value.clone()));
            }))
            .unwrap();

        window.apply_remote_change(&local, Some("k"), Some("1")).unwrap();
        window.apply_remote_change(&session, Some("other"), Some("x")).unwrap();
        window.apply_remote_change(&local, Some("k"), None).unwrap();
        window.apply_remote_change(&local, None, None).unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("k".to_string(), ChangeType::Write, Some("1".to_string())),
                ("k".to_string(), ChangeType::Remove, None),
                ("*".to_string(), ChangeType::Clear, None),
            ]
        );

        unsubscribe.unsubscribe();
        window.apply_remote_change(&local, Some("k"), Some("2")).unwrap();
        assert_eq!(seen.lock().unwrap().len(), 3);
    }
}
