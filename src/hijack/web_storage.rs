use std::sync::{Arc, Weak};

use crate::emitter::ChangeEmitter;
use crate::errors::StorageResult;
use crate::hijack::{install_all, HijackHandle};
use crate::intercept::{intercept, wrapper, MethodHook};
use crate::native::NativeStorage;
use crate::types::{ChangeType, StorageChange};

/// Hijacks `setItem`, `removeItem` and `clear` of `storage` (and `getItem` when
/// `observe_reads` is set), emitting changes tagged with `source`.
///
/// A write is reported with the value read back from the backend after the
/// call. `clear` reports one change per key present before the call.
pub fn hijack_web_storage(
    storage: &Arc<NativeStorage>,
    source: &str,
    emitter: &ChangeEmitter,
    observe_reads: bool,
) -> Option<HijackHandle> {
    let weak = Arc::downgrade(storage);

    let mut installs: Vec<Box<dyn FnOnce() -> Option<MethodHook> + '_>> = vec![
        Box::new(|| hook_set_item(storage, weak.clone(), source, emitter)),
        Box::new(|| hook_remove_item(storage, source, emitter)),
        Box::new(|| hook_clear(storage, weak.clone(), source, emitter)),
    ];
    if observe_reads {
        installs.push(Box::new(|| hook_get_item(storage, source, emitter)));
    }

    match install_all(installs) {
        Some(hooks) => Some(HijackHandle::from_hooks(source, hooks)),
        None => {
            log::debug!("web storage `{}` cannot be hijacked", source);
            None
        }
    }
}

fn hook_set_item(
    storage: &Arc<NativeStorage>,
    weak: Weak<NativeStorage>,
    source: &str,
    emitter: &ChangeEmitter,
) -> Option<MethodHook> {
    let source = source.to_string();
    let emitter = emitter.clone();
    intercept(
        storage,
        NativeStorage::set_item_slot,
        wrapper(
            move |(key, value): (String, String), next: &dyn Fn((String, String)) -> StorageResult<()>| -> StorageResult<()> {
                next((key.clone(), value))?;
                if let Some(storage) = weak.upgrade() {
                    let stored = storage.area().get_item(&key);
                    emitter.emit(&StorageChange::new(key, stored, ChangeType::Write, source.as_str()));
                }
                Ok(())
            },
        ),
    )
}

fn hook_remove_item(storage: &Arc<NativeStorage>, source: &str, emitter: &ChangeEmitter) -> Option<MethodHook> {
    let source = source.to_string();
    let emitter = emitter.clone();
    intercept(
        storage,
        NativeStorage::remove_item_slot,
        wrapper(move |key: String, next: &dyn Fn(String) -> StorageResult<()>| -> StorageResult<()> {
            next(key.clone())?;
            emitter.emit(&StorageChange::remove(key, source.as_str()));
            Ok(())
        }),
    )
}

fn hook_clear(
    storage: &Arc<NativeStorage>,
    weak: Weak<NativeStorage>,
    source: &str,
    emitter: &ChangeEmitter,
) -> Option<MethodHook> {
    let source = source.to_string();
    let emitter = emitter.clone();
    intercept(
        storage,
        NativeStorage::clear_slot,
        wrapper(move |_: (), next: &dyn Fn(()) -> StorageResult<()>| -> StorageResult<()> {
            let keys = weak.upgrade().map(|s| s.snapshot_keys()).unwrap_or_default();
            next(())?;
            for key in keys {
                emitter.emit(&StorageChange::clear(key, source.as_str()));
            }
            Ok(())
        }),
    )
}

fn hook_get_item(storage: &Arc<NativeStorage>, source: &str, emitter: &ChangeEmitter) -> Option<MethodHook> {
    let source = source.to_string();
    let emitter = emitter.clone();
    intercept(
        storage,
        NativeStorage::get_item_slot,
        wrapper(move |key: String, next: &dyn Fn(String) -> Option<String>| {
            let value = next(key.clone());
            emitter.emit(&StorageChange::read(key, value.clone(), source.as_str()));
            value
        }),
    )
}
