//! Native hijacking: turning direct calls on native storage objects into
//! [`StorageChange`](crate::StorageChange)s.
//!
//! Each hijack installs wrappers into the [`Interceptable`](crate::intercept::Interceptable)
//! slots of one native object and hands back a [`HijackHandle`]. The wrappers call
//! through to whatever was there before and emit only after the underlying call
//! succeeded. Restoring a handle removes exactly the wrappers it installed, so
//! several hijacks of the same object can coexist.
//!
//! A hijack that cannot be installed (a sealed slot) returns `None`.
//!
//! [`HijackController`] ties the individual hijacks together for a window and
//! republishes everything through one emitter.

mod controller;
mod cookie;
mod indexed_db;
mod web_storage;

use std::fmt;

use crate::intercept::MethodHook;
use crate::listeners::Unsubscribe;

pub use controller::{
    default_controller, start_native_hijack, stop_native_hijack, subscribe_storage_changes, HijackController,
    HijackOptions, HijackOptionsBuilder, StorageAttachment,
};
pub use cookie::{hijack_cookie, COOKIE_SOURCE};
pub use indexed_db::{hijack_indexed_db, INDEXED_DB_SOURCE};
pub use web_storage::hijack_web_storage;

/// One active interception.
///
/// [`restore`](Self::restore) undoes it and may be called any number of times.
/// Dropping a handle leaves the interception in place.
pub struct HijackHandle {
    source: String,
    undo: Unsubscribe,
}

impl HijackHandle {
    pub(crate) fn from_hooks(source: impl Into<String>, hooks: Vec<MethodHook>) -> Self {
        Self::with_restore(source, move || {
            for hook in hooks {
                hook.restore();
            }
        })
    }

    pub(crate) fn with_restore(source: impl Into<String>, restore: impl FnOnce() + Send + 'static) -> Self {
        let source = source.into();
        log::debug!("hijack `{}` installed", source);
        let label = source.clone();
        Self {
            source,
            undo: Unsubscribe::new(move || {
                restore();
                log::debug!("hijack `{}` restored", label);
            }),
        }
    }

    /// The `source` of the changes this hijack emits.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn is_active(&self) -> bool {
        self.undo.is_active()
    }

    pub fn restore(&self) {
        self.undo.unsubscribe();
    }
}

impl fmt::Debug for HijackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HijackHandle")
            .field("source", &self.source)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Installs every hook or none: if one install fails, the ones already in place
/// are restored.
pub(crate) fn install_all(installs: Vec<Box<dyn FnOnce() -> Option<MethodHook> + '_>>) -> Option<Vec<MethodHook>> {
    let mut hooks = Vec::with_capacity(installs.len());
    for install in installs {
        match install() {
            Some(hook) => hooks.push(hook),
            None => {
                for hook in &hooks {
                    hook.restore();
                }
                return None;
            }
        }
    }
    Some(hooks)
}
