//! Listener registries with snapshot dispatch.
//!
//! Both the change emitter and the window `storage` event target keep their
//! callbacks in a [`ListenerList`]. Dispatch walks a snapshot of the list, so a
//! listener may subscribe or unsubscribe (itself included) while it runs, and a
//! panicking listener is logged and skipped instead of aborting the dispatch.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Callback stored in a [`ListenerList`].
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

pub(crate) struct ListenerList<E> {
    entries: RwLock<Vec<(u64, Listener<E>)>>,
    next_id: AtomicU64,
}

impl<E> Default for ListenerList<E> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl<E> ListenerList<E> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Appends a listener and returns its id. Listeners run in registration order.
    pub(crate) fn add(&self, listener: Listener<E>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.insert(id, listener);
        id
    }

    /// Appends a listener under an id allocated by the caller, which must keep
    /// ids unique for the life of the list.
    pub(crate) fn insert(&self, id: u64, listener: Listener<E>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
    }

    /// Removes the listener with `id`. Unknown ids are ignored.
    pub(crate) fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub(crate) fn clear(&self) {
        self.entries.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Listener<E>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect()
    }

    /// Calls every listener registered at the time of the call.
    pub(crate) fn notify(&self, event: &E) {
        for listener in self.snapshot() {
            dispatch_isolated(&listener, event);
        }
    }
}

/// Runs one listener, containing any panic it raises. Returns `false` on panic.
pub(crate) fn dispatch_isolated<E>(listener: &Listener<E>, event: &E) -> bool {
    let result = catch_unwind(AssertUnwindSafe(|| listener(event)));
    if let Err(panic) = result {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        log::warn!("storage listener panicked: {}", reason);
        return false;
    }
    true
}

/// Handle returned by every `subscribe`/`listen` call.
///
/// Calling [`Unsubscribe::unsubscribe`] more than once is a no-op, and it may be
/// called from inside the listener it removes. Dropping the handle does **not**
/// unsubscribe.
#[derive(Clone)]
pub struct Unsubscribe {
    action: Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>,
}

impl Unsubscribe {
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Arc::new(Mutex::new(Some(Box::new(action)))),
        }
    }

    /// A handle with nothing to undo.
    pub fn noop() -> Self {
        Self {
            action: Arc::new(Mutex::new(None)),
        }
    }

    pub fn unsubscribe(&self) {
        let action = self.action.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(action) = action {
            action();
        }
    }

    /// True until [`unsubscribe`](Self::unsubscribe) has run.
    pub fn is_active(&self) -> bool {
        self.action.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }
}

impl fmt::Debug for Unsubscribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unsubscribe")
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn notify_runs_in_registration_order() {
        let list: ListenerList<u32> = ListenerList::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            list.add(Arc::new(move |n: &u32| seen.lock().unwrap().push(format!("{tag}:{n}"))));
        }

        list.notify(&7);
        assert_eq!(*seen.lock().unwrap(), vec!["first:7", "second:7", "third:7"]);
    }

    #[test]
    fn panicking_listener_does_not_stop_the_others() {
        let list: ListenerList<()> = ListenerList::new();
        let calls = Arc::new(AtomicUsize::new(0));

        list.add(Arc::new(|_: &()| panic!("boom")));
        let c = calls.clone();
        list.add(Arc::new(move |_: &()| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        list.notify(&());
        list.notify(&());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn listener_can_remove_itself_during_dispatch() {
        let list: Arc<ListenerList<()>> = Arc::new(ListenerList::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let own_id = Arc::new(AtomicU64::new(0));

        let l = list.clone();
        let c = calls.clone();
        let id_cell = own_id.clone();
        let id = list.add(Arc::new(move |_: &()| {
            c.fetch_add(1, Ordering::SeqCst);
            l.remove(id_cell.load(Ordering::SeqCst));
        }));
        own_id.store(id, Ordering::SeqCst);

        list.notify(&());
        list.notify(&());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(list.is_empty());
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let handle = Unsubscribe::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(handle.is_active());
        handle.unsubscribe();
        handle.clone().unsubscribe();
        assert!(!handle.is_active());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        Unsubscribe::noop().unsubscribe();
    }
}
