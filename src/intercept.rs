//! Reversible method interception for native storage objects.
//!
//! Every interceptable entry point of a native object (for example
//! `Storage.setItem` or the `document.cookie` setter) owns an
//! [`Interceptable`] slot. Calling the entry point runs the installed wrappers,
//! outermost (most recently installed) first, and finally the real
//! implementation. Each wrapper receives the call arguments and a `next`
//! function for the layer beneath it.
//!
//! Installing returns a [`HookId`]; removing that id takes out exactly that one
//! layer, so independent interceptions of the same method can be installed and
//! restored in any order without disturbing each other.
//!
//! A slot can be *sealed*, after which installs fail. Native objects use this to
//! model entry points that cannot be redefined.
//!
//! # Example
//! ```
//! use std::sync::Arc;
//! use gosub_storage::intercept::{wrapper, Interceptable};
//!
//! let slot: Interceptable<u32, u32> = Interceptable::new("double");
//! let real = |n: u32| n * 2;
//!
//! let id = slot.install(wrapper(|n: u32, next: &dyn Fn(u32) -> u32| next(n) + 1)).unwrap();
//! assert_eq!(slot.invoke(5, &real), 11);
//!
//! slot.remove(id);
//! assert_eq!(slot.invoke(5, &real), 10);
//! ```

use crate::listeners::Unsubscribe;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

/// A layer installed into an [`Interceptable`].
pub type Wrapper<A, R> = Arc<dyn Fn(A, &dyn Fn(A) -> R) -> R + Send + Sync>;

/// Builds a [`Wrapper`] from a closure, pinning down its higher-ranked signature.
pub fn wrapper<A, R, F>(f: F) -> Wrapper<A, R>
where
    F: Fn(A, &dyn Fn(A) -> R) -> R + Send + Sync + 'static,
{
    Arc::new(f)
}

static NEXT_HOOK_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one installed layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HookId(u64);

impl HookId {
    fn next() -> Self {
        HookId(NEXT_HOOK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// An interceptable method slot.
pub struct Interceptable<A, R> {
    method: &'static str,
    layers: RwLock<Vec<(HookId, Wrapper<A, R>)>>,
    sealed: AtomicBool,
}

impl<A, R> Interceptable<A, R> {
    pub fn new(method: &'static str) -> Self {
        Self {
            method,
            layers: RwLock::new(Vec::new()),
            sealed: AtomicBool::new(false),
        }
    }

    /// Name of the intercepted method, used for logging.
    pub fn method(&self) -> &'static str {
        self.method
    }

    /// Refuses all further installs. Already installed layers stay in place.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    /// Installs `wrapper` as the new outermost layer.
    ///
    /// Returns `None` when the slot is sealed.
    pub fn install(&self, wrapper: Wrapper<A, R>) -> Option<HookId> {
        if self.is_sealed() {
            log::warn!("cannot intercept sealed method `{}`", self.method);
            return None;
        }
        let id = HookId::next();
        self.layers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, wrapper));
        Some(id)
    }

    /// Removes the layer installed under `id`, leaving every other layer untouched.
    pub fn remove(&self, id: HookId) -> bool {
        let mut layers = self.layers.write().unwrap_or_else(PoisonError::into_inner);
        let before = layers.len();
        layers.retain(|(layer_id, _)| *layer_id != id);
        layers.len() != before
    }

    pub fn hook_count(&self) -> usize {
        self.layers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_hooked(&self) -> bool {
        self.hook_count() > 0
    }

    /// Calls the method: every installed layer, then `original`.
    ///
    /// The layer list is snapshotted first, so layers may install or remove hooks
    /// (on this slot too) while they run.
    pub fn invoke(&self, args: A, original: &dyn Fn(A) -> R) -> R {
        let layers: Vec<Wrapper<A, R>> = self
            .layers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, layer)| layer.clone())
            .collect();
        run_layers(&layers, args, original)
    }
}

fn run_layers<A, R>(layers: &[Wrapper<A, R>], args: A, original: &dyn Fn(A) -> R) -> R {
    match layers.split_last() {
        None => original(args),
        Some((outer, inner)) => outer(args, &|a: A| run_layers(inner, a, original)),
    }
}

impl<A, R> fmt::Debug for Interceptable<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interceptable")
            .field("method", &self.method)
            .field("hooks", &self.hook_count())
            .field("sealed", &self.is_sealed())
            .finish()
    }
}

/// One installed interception bound to its target object.
///
/// [`restore`](Self::restore) removes exactly the layer this hook installed and is
/// idempotent. The hook only holds a weak reference to the target, so it never
/// keeps a native object alive.
#[derive(Debug)]
pub struct MethodHook {
    method: &'static str,
    target: Weak<dyn Any + Send + Sync>,
    undo: Unsubscribe,
}

impl MethodHook {
    pub fn method(&self) -> &'static str {
        self.method
    }

    pub fn is_active(&self) -> bool {
        self.undo.is_active()
    }

    /// Active and its target still alive.
    pub fn is_attached(&self) -> bool {
        self.is_active() && self.target.strong_count() > 0
    }

    pub fn restore(&self) {
        self.undo.unsubscribe();
    }
}

/// Installs `wrapper` on the slot that `slot` selects on `target`.
///
/// Returns `None` when the slot refuses the install.
pub fn intercept<T, A, R>(
    target: &Arc<T>,
    slot: fn(&T) -> &Interceptable<A, R>,
    wrapper: Wrapper<A, R>,
) -> Option<MethodHook>
where
    T: Send + Sync + 'static,
    A: 'static,
    R: 'static,
{
    let method = slot(target).method();
    let id = slot(target).install(wrapper)?;
    let weak = Arc::downgrade(target);
    log::trace!("intercepted `{}` ({:?})", method, id);

    Some(MethodHook {
        method,
        target: weak.clone(),
        undo: Unsubscribe::new(move || {
            if let Some(target) = weak.upgrade() {
                slot(&target).remove(id);
            }
        }),
    })
}
