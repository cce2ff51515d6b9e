//! Native browser storage objects.
//!
//! These are the objects page scripts talk to directly, modelled as explicit
//! Rust values so that adapters can wrap them and hijacks can intercept them.
//!
//! # Available types
//!
//! - [`StorageArea`]: Trait for the key/value backend of a Storage object.
//! - [`InMemoryStorageArea`]: In-memory backend, optionally with a quota.
//! - [`NativeStorage`]: `localStorage` / `sessionStorage`.
//! - [`NativeDocument`]: The `document.cookie` accessor and its cookie jar.
//! - [`IdbFactory`] and friends: `indexedDB`.
//! - [`Window`]: Composition of the above plus the `storage` event target.
//! - [`StorageEvent`]: The cross-context `storage` event.
//!
//! Use [`set_ambient_window`] to give the process a global window; adapters and
//! hijacks that are not handed a window explicitly fall back to it.

pub mod area;
pub mod cookies;
pub mod document;
pub mod event;
pub mod in_memory;
pub mod indexed_db;
pub mod storage;
pub mod window;

pub use area::StorageArea;
pub use cookies::{Cookie, CookieAssignment, CookieJar, CookieOutcome, SameSite};
pub use document::NativeDocument;
pub use event::StorageEvent;
pub use in_memory::InMemoryStorageArea;
pub use indexed_db::{
    IdbDatabase, IdbFactory, IdbKey, IdbKeyCursor, IdbKeyRange, IdbObjectStore, IdbOpenArgs, IdbQuery, IdbRequest,
    IdbTransaction, IdbUpgrade, ObjectStoreParams, TransactionMode,
};
pub use storage::NativeStorage;
pub use window::{ambient_window, set_ambient_window, Window, WindowBuilder, WindowId};
