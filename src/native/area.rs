use anyhow::Result;

/// Object-safe key/value backend behind a Web Storage object (DOM's Storage).
pub trait StorageArea: Send + Sync {
    /// Retrieves the value associated with the given key, or `None` if not found.
    fn get_item(&self, key: &str) -> Option<String>;

    /// Sets the value for the given key, overwriting any existing value.
    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Removes the item with the given key.
    fn remove_item(&self, key: &str) -> Result<()>;

    /// Clears all items in the storage area.
    fn clear(&self) -> Result<()>;

    /// Returns the number of items in the storage area.
    fn len(&self) -> usize;

    /// Returns a vector of all keys in the storage area.
    fn keys(&self) -> Vec<String>;

    /// Returns the key at `index` in the area's key order.
    fn key(&self, index: usize) -> Option<String> {
        self.keys().into_iter().nth(index)
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
