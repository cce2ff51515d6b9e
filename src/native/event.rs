use crate::native::storage::NativeStorage;
use std::fmt;
use std::sync::Arc;

/// The `storage` event a window receives when another browsing context changes
/// one of its storage areas.
///
/// `key == None` means the whole area was cleared.
#[derive(Clone)]
pub struct StorageEvent {
    pub key: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub url: String,
    pub storage_area: Option<Arc<NativeStorage>>,
}

impl StorageEvent {
    /// A single-key event for `area`.
    pub fn keyed(
        area: &Arc<NativeStorage>,
        key: impl Into<String>,
        old_value: Option<String>,
        new_value: Option<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            key: Some(key.into()),
            old_value,
            new_value,
            url: url.into(),
            storage_area: Some(area.clone()),
        }
    }

    /// The event fired after `clear()` on `area`.
    pub fn cleared(area: &Arc<NativeStorage>, url: impl Into<String>) -> Self {
        Self {
            key: None,
            old_value: None,
            new_value: None,
            url: url.into(),
            storage_area: Some(area.clone()),
        }
    }

    /// True when the event concerns exactly `area` (identity, not contents).
    pub fn is_for(&self, area: &Arc<NativeStorage>) -> bool {
        self.storage_area
            .as_ref()
            .is_some_and(|own| Arc::ptr_eq(own, area))
    }
}

impl fmt::Debug for StorageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageEvent")
            .field("key", &self.key)
            .field("old_value", &self.old_value)
            .field("new_value", &self.new_value)
            .field("url", &self.url)
            .field("has_storage_area", &self.storage_area.is_some())
            .finish()
    }
}
