//! The browsing context the adapters and hijacks attach to.
//!
//! A [`Window`] exposes whichever storage APIs it was built with; a missing one
//! is the analogue of the API being unavailable (SSR, workers, privacy modes).
//! The process may install one *ambient* window, which stands in for the global
//! `window` of a page.

use std::fmt;
use std::fmt::Display;
use std::sync::{Arc, PoisonError, RwLock};

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::errors::{StorageError, StorageResult};
use crate::listeners::{ListenerList, Unsubscribe};
use crate::native::document::NativeDocument;
use crate::native::event::StorageEvent;
use crate::native::indexed_db::IdbFactory;
use crate::native::storage::NativeStorage;

/// A unique identifier for a window, represented as a UUID.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowId(Uuid);

impl WindowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WindowId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for WindowId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct Window {
    id: WindowId,
    url: Url,
    local_storage: Option<Arc<NativeStorage>>,
    session_storage: Option<Arc<NativeStorage>>,
    document: Option<Arc<NativeDocument>>,
    indexed_db: Option<Arc<IdbFactory>>,
    storage_listeners: Arc<ListenerList<StorageEvent>>,
}

impl Window {
    pub fn builder() -> WindowBuilder {
        WindowBuilder::default()
    }

    /// A window at `url` with every storage API present and empty.
    pub fn with_all_storage(url: &str) -> StorageResult<Arc<Self>> {
        Self::builder()
            .url(url)
            .local_storage(NativeStorage::in_memory())
            .session_storage(NativeStorage::in_memory())
            .with_document()
            .indexed_db(IdbFactory::new())
            .build()
    }

    pub fn id(&self) -> WindowId {
        self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn local_storage(&self) -> Option<Arc<NativeStorage>> {
        self.local_storage.clone()
    }

    pub fn session_storage(&self) -> Option<Arc<NativeStorage>> {
        self.session_storage.clone()
    }

    pub fn document(&self) -> Option<Arc<NativeDocument>> {
        self.document.clone()
    }

    pub fn indexed_db(&self) -> Option<Arc<IdbFactory>> {
        self.indexed_db.clone()
    }

    /// `addEventListener('storage', ..)`.
    pub fn add_storage_listener<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn(&StorageEvent) + Send + Sync + 'static,
    {
        let id = self.storage_listeners.add(Arc::new(listener));
        let weak = Arc::downgrade(&self.storage_listeners);
        Unsubscribe::new(move || {
            if let Some(list) = weak.upgrade() {
                list.remove(id);
            }
        })
    }

    pub fn storage_listener_count(&self) -> usize {
        self.storage_listeners.len()
    }

    pub fn dispatch_storage_event(&self, event: &StorageEvent) {
        log::trace!("window {}: storage event for {:?}", self.id, event.key);
        self.storage_listeners.notify(event);
    }

    /// Applies a change made to `area` by another browsing context: the backend
    /// is updated directly (no interceptor runs) and this window receives the
    /// matching `storage` event. `key == None` clears the area.
    pub fn apply_remote_change(
        &self,
        area: &Arc<NativeStorage>,
        key: Option<&str>,
        new_value: Option<&str>,
    ) -> StorageResult<()> {
        let backend = area.area();
        let event = match key {
            Some(key) => {
                let old_value = backend.get_item(key);
                match new_value {
                    Some(value) => backend.set_item(key, value)?,
                    None => backend.remove_item(key)?,
                }
                StorageEvent::keyed(area, key, old_value, new_value.map(str::to_string), self.url.as_str())
            }
            None => {
                backend.clear()?;
                StorageEvent::cleared(area, self.url.as_str())
            }
        };
        self.dispatch_storage_event(&event);
        Ok(())
    }
}

impl fmt::Debug for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Window")
            .field("id", &self.id)
            .field("url", &self.url.as_str())
            .field("local_storage", &self.local_storage.is_some())
            .field("session_storage", &self.session_storage.is_some())
            .field("document", &self.document.is_some())
            .field("indexed_db", &self.indexed_db.is_some())
            .finish()
    }
}

/// Builder for [`Window`]. Every storage API is absent unless added.
#[derive(Debug, Clone)]
pub struct WindowBuilder {
    url: String,
    local_storage: Option<Arc<NativeStorage>>,
    session_storage: Option<Arc<NativeStorage>>,
    document: Option<Arc<NativeDocument>>,
    with_document: bool,
    indexed_db: Option<Arc<IdbFactory>>,
}

impl Default for WindowBuilder {
    fn default() -> Self {
        Self {
            url: "about:blank".to_string(),
            local_storage: None,
            session_storage: None,
            document: None,
            with_document: false,
            indexed_db: None,
        }
    }
}

impl WindowBuilder {
    #[inline]
    fn map(mut self, f: impl FnOnce(&mut WindowBuilder)) -> Self {
        f(&mut self);
        self
    }

    pub fn url(self, url: impl Into<String>) -> Self {
        self.map(|b| b.url = url.into())
    }

    pub fn local_storage(self, storage: Arc<NativeStorage>) -> Self {
        self.map(|b| b.local_storage = Some(storage))
    }

    pub fn session_storage(self, storage: Arc<NativeStorage>) -> Self {
        self.map(|b| b.session_storage = Some(storage))
    }

    pub fn document(self, document: Arc<NativeDocument>) -> Self {
        self.map(|b| b.document = Some(document))
    }

    /// Creates a fresh document at the window's URL on `build()`.
    pub fn with_document(self) -> Self {
        self.map(|b| b.with_document = true)
    }

    pub fn indexed_db(self, factory: Arc<IdbFactory>) -> Self {
        self.map(|b| b.indexed_db = Some(factory))
    }

    pub fn build(self) -> StorageResult<Arc<Window>> {
        let url = Url::parse(&self.url)
            .map_err(|e| StorageError::InvalidOptions(format!("invalid window url `{}`: {e}", self.url)))?;

        let document = match (self.document, self.with_document) {
            (Some(doc), _) => Some(doc),
            (None, true) => Some(NativeDocument::from_url(url.clone())),
            (None, false) => None,
        };

        Ok(Arc::new(Window {
            id: WindowId::new(),
            url,
            local_storage: self.local_storage,
            session_storage: self.session_storage,
            document,
            indexed_db: self.indexed_db,
            storage_listeners: Arc::new(ListenerList::new()),
        }))
    }
}

lazy_static! {
    static ref AMBIENT_WINDOW: RwLock<Option<Arc<Window>>> = RwLock::new(None);
}

/// Installs (or with `None`, removes) the process-wide window. Returns the
/// previous one.
pub fn set_ambient_window(window: Option<Arc<Window>>) -> Option<Arc<Window>> {
    let mut slot = AMBIENT_WINDOW.write().unwrap_or_else(PoisonError::into_inner);
    std::mem::replace(&mut *slot, window)
}

/// The process-wide window, if one is installed.
pub fn ambient_window() -> Option<Arc<Window>> {
    AMBIENT_WINDOW.read().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Resolves an explicitly given window, falling back to the ambient one.
pub fn resolve_window(explicit: Option<&Arc<Window>>) -> Option<Arc<Window>> {
    explicit.cloned().or_else(ambient_window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn builder_defaults_to_no_storage() {
        let window = Window::builder().build().unwrap();
        assert_eq!(window.url().as_str(), "about:blank");
        assert!(window.local_storage().is_none());
        assert!(window.session_storage().is_none());
        assert!(window.document().is_none());
        assert!(window.indexed_db().is_none());
    }

    #[test]
    fn builder_rejects_bad_url() {
        let err = Window::builder().url("::nope").build().unwrap_err();
        assert!(matches!(err, StorageError::InvalidOptions(_)));
    }

    #[test]
    fn with_all_storage_builds_document_at_window_url() {
        let window = Window::with_all_storage("https://example.com/app").unwrap();
        let doc = window.document().unwrap();
        assert_eq!(doc.url().as_str(), "https://example.com/app");
        assert!(window.local_storage().is_some());
        assert!(window.indexed_db().is_some());
        assert_ne!(window.id(), Window::with_all_storage("https://example.com/").unwrap().id());
    }

    #[test]
    fn remote_changes_update_backend_and_fire_events() {
        let window = Window::with_all_storage("https://example.com/").unwrap();
        let local = window.local_storage().unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));

        let e = events.clone();
        let sub = window.add_storage_listener(move |ev: &StorageEvent| {
            e.lock().unwrap().push((ev.key.clone(), ev.old_value.clone(), ev.new_value.clone()));
        });

        window.apply_remote_change(&local, Some("k"), Some("1")).unwrap();
        window.apply_remote_change(&local, Some("k"), None).unwrap();
        window.apply_remote_change(&local, None, None).unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec![
                (Some("k".to_string()), None, Some("1".to_string())),
                (Some("k".to_string()), Some("1".to_string()), None),
                (None, None, None),
            ]
        );

        sub.unsubscribe();
        assert_eq!(window.storage_listener_count(), 0);
    }

    #[test]
    fn explicit_window_wins_over_ambient() {
        let explicit = Window::builder().url("https://explicit.test/").build().unwrap();
        let resolved = resolve_window(Some(&explicit)).unwrap();
        assert!(Arc::ptr_eq(&resolved, &explicit));
    }
}
