//! Unified browser-style storage with change notifications.
//!
//! A [`StorageStore`] puts one [`StorageAdapter`](adapters::StorageAdapter) (memory,
//! Web Storage, cookies or IndexedDB) behind a single async API and emits a
//! [`StorageChange`] for every successful mutation. [`StorageBinding`]s give typed
//! access to single keys through a [`Codec`](codec::Codec). The [`hijack`] module
//! reports mutations made directly on the native objects in [`native`], bypassing
//! any store.

pub mod adapters;
pub mod binding;
pub mod codec;
pub mod emitter;
pub mod errors;
pub mod hijack;
pub mod intercept;
pub mod listeners;
pub mod native;
pub mod store;
pub mod types;

pub use binding::StorageBinding;
pub use codec::{create_json_codec, JsonCodec, JsonCodecOptions, StringCodec};
pub use emitter::{ChangeEmitter, ChangeFilter, ChangeListener, ChangePattern};
pub use errors::{StorageError, StorageResult};
pub use hijack::{start_native_hijack, stop_native_hijack, subscribe_storage_changes, HijackController, HijackOptions};
pub use listeners::Unsubscribe;
pub use store::{create_storage_store, StorageStore, Subscription};
pub use types::{ChangeType, StorageChange, WILDCARD_KEY};
