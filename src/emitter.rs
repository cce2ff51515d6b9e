//! Change emitter: keyed and wildcard publish/subscribe of [`StorageChange`]s.
//!
//! A subscriber either listens to one exact key or to [`WILDCARD_KEY`], which
//! receives every change. [`ChangeEmitter::emit`] dispatches synchronously, in
//! registration order, first to the change's key subscribers and then to the
//! wildcard subscribers. A change that is itself keyed by the wildcard (a native
//! "storage cleared" event) is delivered to the wildcard subscribers once.
//!
//! Filtered subscriptions take [`ChangeFilter`] include/exclude rules: include
//! rules win, so when any include rule exists and none matches the change is
//! dropped; otherwise a matching exclude rule drops it.

use crate::listeners::{Listener, ListenerList, Unsubscribe};
use crate::types::{ChangeType, StorageChange, WILDCARD_KEY};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

/// Callback receiving storage changes.
pub type ChangeListener = Listener<StorageChange>;

/// Partial [`StorageChange`]; unset fields match anything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangePattern {
    pub key: Option<String>,
    pub value: Option<String>,
    pub kind: Option<ChangeType>,
    pub source: Option<String>,
}

impl ChangePattern {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn kind(mut self, kind: ChangeType) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn matches(&self, change: &StorageChange) -> bool {
        self.key.as_ref().map_or(true, |k| *k == change.key)
            && self.value.as_ref().map_or(true, |v| change.value.as_ref() == Some(v))
            && self.kind.map_or(true, |t| t == change.kind)
            && self.source.as_ref().map_or(true, |s| *s == change.source)
    }
}

/// Include/exclude rule sets for filtered subscriptions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeFilter {
    pub include: Vec<ChangePattern>,
    pub exclude: Vec<ChangePattern>,
}

impl ChangeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn include(mut self, pattern: ChangePattern) -> Self {
        self.include.push(pattern);
        self
    }

    pub fn exclude(mut self, pattern: ChangePattern) -> Self {
        self.exclude.push(pattern);
        self
    }

    pub fn accepts(&self, change: &StorageChange) -> bool {
        if !self.include.is_empty() && !self.include.iter().any(|p| p.matches(change)) {
            return false;
        }
        !self.exclude.iter().any(|p| p.matches(change))
    }
}

struct EmitterInner {
    lists: RwLock<HashMap<String, Arc<ListenerList<StorageChange>>>>,
    // Shared by every list so ids stay unique across `clear`.
    next_id: AtomicU64,
}

impl Default for EmitterInner {
    fn default() -> Self {
        Self {
            lists: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }
}

impl EmitterInner {
    fn list(&self, key: &str) -> Option<Arc<ListenerList<StorageChange>>> {
        self.lists
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn add(&self, key: &str, listener: ChangeListener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        // Added under the map lock so a concurrent `remove` cannot drop the list first.
        self.lists
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(ListenerList::new()))
            .insert(id, listener);
        id
    }

    fn remove(&self, key: &str, id: u64) {
        let mut lists = self.lists.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(list) = lists.get(key) {
            list.remove(id);
            if list.is_empty() {
                lists.remove(key);
            }
        }
    }
}

/// In-process change bus. Cloning yields another handle to the same bus.
#[derive(Clone, Default)]
pub struct ChangeEmitter {
    inner: Arc<EmitterInner>,
}

impl ChangeEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to changes of `key`. Passing [`WILDCARD_KEY`] subscribes to all keys.
    pub fn subscribe<F>(&self, key: &str, listener: F) -> Unsubscribe
    where
        F: Fn(&StorageChange) + Send + Sync + 'static,
    {
        self.subscribe_listener(key, Arc::new(listener))
    }

    /// Subscribes to every change.
    pub fn subscribe_all<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn(&StorageChange) + Send + Sync + 'static,
    {
        self.subscribe_listener(WILDCARD_KEY, Arc::new(listener))
    }

    /// Subscribes to every change that `filter` accepts.
    pub fn subscribe_filtered<F>(&self, filter: ChangeFilter, listener: F) -> Unsubscribe
    where
        F: Fn(&StorageChange) + Send + Sync + 'static,
    {
        self.subscribe_listener(
            WILDCARD_KEY,
            Arc::new(move |change: &StorageChange| {
                if filter.accepts(change) {
                    listener(change);
                }
            }),
        )
    }

    pub fn subscribe_listener(&self, key: &str, listener: ChangeListener) -> Unsubscribe {
        let id = self.inner.add(key, listener);
        let weak: Weak<EmitterInner> = Arc::downgrade(&self.inner);
        let key = key.to_string();
        Unsubscribe::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove(&key, id);
            }
        })
    }

    /// Delivers `change` to its key subscribers, then to the wildcard subscribers.
    pub fn emit(&self, change: &StorageChange) {
        log::trace!("emit {} {} from {}", change.kind, change.key, change.source);

        if !change.is_wildcard() {
            if let Some(keyed) = self.inner.list(&change.key) {
                keyed.notify(change);
            }
        }
        if let Some(wildcard) = self.inner.list(WILDCARD_KEY) {
            wildcard.notify(change);
        }
    }

    /// Drops every subscriber.
    pub fn clear(&self) {
        let lists: Vec<_> = self
            .inner
            .lists
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, list)| list)
            .collect();
        for list in lists {
            list.clear();
        }
    }

    /// Number of active subscriptions across all keys.
    pub fn len(&self) -> usize {
        self.inner
            .lists
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|list| list.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ChangeEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeEmitter")
            .field("subscribers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Box<dyn Fn(&StorageChange) + Send + Sync>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = log.clone();
        let make = move |tag: &str| -> Box<dyn Fn(&StorageChange) + Send + Sync> {
            let l = l.clone();
            let tag = tag.to_string();
            Box::new(move |c: &StorageChange| l.lock().unwrap().push(format!("{tag}:{}:{}", c.key, c.kind)))
        };
        (log, make)
    }

    #[test]
    fn keyed_subscribers_run_before_wildcard() {
        let emitter = ChangeEmitter::new();
        let (log, make) = recorder();

        emitter.subscribe_all(make("all"));
        emitter.subscribe("a", make("a"));
        emitter.subscribe("b", make("b"));

        emitter.emit(&StorageChange::write("a", "1", "test"));
        emitter.emit(&StorageChange::remove("b", "test"));
        emitter.emit(&StorageChange::write("c", "3", "test"));

        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:a:write", "all:a:write", "b:b:remove", "all:b:remove", "all:c:write"]
        );
    }

    #[test]
    fn wildcard_keyed_change_is_delivered_once() {
        let emitter = ChangeEmitter::new();
        let (log, make) = recorder();
        emitter.subscribe(WILDCARD_KEY, make("all"));

        emitter.emit(&StorageChange::clear(WILDCARD_KEY, "local-storage"));
        assert_eq!(*log.lock().unwrap(), vec!["all:*:clear"]);
    }

    #[test]
    fn unsubscribe_is_idempotent_and_scoped() {
        let emitter = ChangeEmitter::new();
        let (log, make) = recorder();

        let first = emitter.subscribe("k", make("first"));
        let _second = emitter.subscribe("k", make("second"));
        assert_eq!(emitter.len(), 2);

        first.unsubscribe();
        first.unsubscribe();
        assert_eq!(emitter.len(), 1);

        emitter.emit(&StorageChange::write("k", "v", "test"));
        assert_eq!(*log.lock().unwrap(), vec!["second:k:write"]);
    }

    #[test]
    fn once_style_handler_unsubscribes_itself() {
        let emitter = ChangeEmitter::new();
        let seen = Arc::new(Mutex::new(0usize));
        let handle: Arc<OnceLock<Unsubscribe>> = Arc::new(OnceLock::new());

        let s = seen.clone();
        let h = handle.clone();
        let unsubscribe = emitter.subscribe("k", move |_: &StorageChange| {
            *s.lock().unwrap() += 1;
            if let Some(me) = h.get() {
                me.unsubscribe();
            }
        });
        let _ = handle.set(unsubscribe);

        let (log, make) = recorder();
        emitter.subscribe("k", make("after"));

        emitter.emit(&StorageChange::write("k", "1", "test"));
        emitter.emit(&StorageChange::write("k", "2", "test"));

        assert_eq!(*seen.lock().unwrap(), 1);
        // The handler registered after the self-removing one still saw both events.
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn subscribing_during_dispatch_does_not_deliver_current_change() {
        let emitter = ChangeEmitter::new();
        let late_calls = Arc::new(Mutex::new(0usize));

        let e = emitter.clone();
        let lc = late_calls.clone();
        emitter.subscribe_all(move |_: &StorageChange| {
            let lc = lc.clone();
            e.subscribe_all(move |_: &StorageChange| *lc.lock().unwrap() += 1);
        });

        emitter.emit(&StorageChange::write("x", "1", "test"));
        assert_eq!(*late_calls.lock().unwrap(), 0);
        emitter.emit(&StorageChange::write("x", "2", "test"));
        assert_eq!(*late_calls.lock().unwrap(), 1);
    }

    #[test]
    fn panicking_subscriber_is_isolated() {
        let emitter = ChangeEmitter::new();
        let (log, make) = recorder();

        emitter.subscribe("k", |_: &StorageChange| panic!("subscriber bug"));
        emitter.subscribe("k", make("ok"));

        emitter.emit(&StorageChange::write("k", "1", "test"));
        emitter.emit(&StorageChange::write("k", "2", "test"));
        assert_eq!(log.lock().unwrap().len(), 2);
        assert_eq!(emitter.len(), 2);
    }

    #[test]
    fn filter_include_takes_precedence() {
        let only_writes = ChangeFilter::new().include(ChangePattern::new().kind(ChangeType::Write));
        assert!(only_writes.accepts(&StorageChange::write("a", "1", "s")));
        assert!(!only_writes.accepts(&StorageChange::remove("a", "s")));

        let writes_but_not_a = ChangeFilter::new()
            .include(ChangePattern::new().kind(ChangeType::Write))
            .exclude(ChangePattern::new().key("a"));
        assert!(!writes_but_not_a.accepts(&StorageChange::write("a", "1", "s")));
        assert!(writes_but_not_a.accepts(&StorageChange::write("b", "1", "s")));

        let exclude_cookie = ChangeFilter::new().exclude(ChangePattern::new().source("cookie"));
        assert!(!exclude_cookie.accepts(&StorageChange::write("a", "1", "cookie")));
        assert!(exclude_cookie.accepts(&StorageChange::write("a", "1", "memory")));

        let by_value = ChangeFilter::new().include(ChangePattern::new().value("1"));
        assert!(by_value.accepts(&StorageChange::write("a", "1", "s")));
        assert!(!by_value.accepts(&StorageChange::remove("a", "s")));
    }

    #[test]
    fn filtered_subscription_only_sees_accepted_changes() {
        let emitter = ChangeEmitter::new();
        let (log, make) = recorder();
        let listener = make("f");
        emitter.subscribe_filtered(
            ChangeFilter::new().exclude(ChangePattern::new().kind(ChangeType::Read)),
            move |c: &StorageChange| listener(c),
        );

        emitter.emit(&StorageChange::read("k", Some("1".into()), "test"));
        emitter.emit(&StorageChange::write("k", "1", "test"));
        assert_eq!(*log.lock().unwrap(), vec!["f:k:write"]);
    }

    #[test]
    fn clear_drops_everything() {
        let emitter = ChangeEmitter::new();
        let (log, make) = recorder();
        let handle = emitter.subscribe("k", make("k"));
        emitter.subscribe_all(make("all"));

        emitter.clear();
        assert!(emitter.is_empty());
        emitter.emit(&StorageChange::write("k", "1", "test"));
        assert!(log.lock().unwrap().is_empty());

        // Stale handles stay harmless.
        handle.unsubscribe();
    }

    #[test]
    fn stale_handle_after_clear_leaves_new_subscribers_alone() {
        let emitter = ChangeEmitter::new();
        let (log, make) = recorder();
        let stale = emitter.subscribe("k", make("old"));

        emitter.clear();
        let _fresh = emitter.subscribe("k", make("new"));
        stale.unsubscribe();

        assert_eq!(emitter.len(), 1);
        emitter.emit(&StorageChange::write("k", "1", "test"));
        assert_eq!(*log.lock().unwrap(), vec!["new:k:write"]);
    }
}
