use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::emitter::ChangeEmitter;
use crate::hijack::HijackHandle;
use crate::intercept::{intercept, wrapper, Interceptable, MethodHook};
use crate::native::indexed_db::{IdbOpenArgs, IdbQuery, PutArgs};
use crate::native::{IdbDatabase, IdbFactory, IdbKey, IdbObjectStore, IdbRequest, IdbTransaction, TransactionMode};
use crate::errors::StorageResult;
use crate::types::StorageChange;

/// Source of the changes emitted by the IndexedDB hijack.
pub const INDEXED_DB_SOURCE: &str = "indexeddb";

type PutSlot = fn(&IdbObjectStore) -> &Interceptable<PutArgs, IdbRequest<IdbKey>>;

struct IdbHijack {
    active: AtomicBool,
    emitter: ChangeEmitter,
    transaction_hooks: Mutex<Vec<MethodHook>>,
}

impl IdbHijack {
    fn new(emitter: &ChangeEmitter) -> Self {
        Self {
            active: AtomicBool::new(true),
            emitter: emitter.clone(),
            transaction_hooks: Mutex::new(Vec::new()),
        }
    }

    /// Keeps `hook`, dropping the hooks of databases that are gone.
    fn track(&self, hook: MethodHook) {
        let mut hooks = self.transaction_hooks.lock().unwrap_or_else(PoisonError::into_inner);
        hooks.retain(MethodHook::is_attached);
        hooks.push(hook);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn emit(&self, change: StorageChange) {
        if self.is_active() {
            self.emitter.emit(&change);
        }
    }
}

/// `<db>.<store>` prefix of the change keys of one object store.
#[derive(Clone)]
struct StoreLocation {
    db: String,
    store: String,
}

impl StoreLocation {
    fn key(&self, key: &str) -> String {
        format!("{}.{}.{}", self.db, self.store, key)
    }

    fn prefix(&self) -> String {
        format!("{}.{}", self.db, self.store)
    }
}

/// Hijacks `open` of `factory`. Every database opened through it gets its
/// `transaction` hijacked, and every object store of those transactions its
/// `put`, `add`, `delete` and `clear`.
///
/// Change keys are `<db>.<store>.<key>` (`range` for key range deletes).
/// Writes carry the JSON text of the stored value. `clear` is a single change
/// keyed `<db>.<store>`. Nothing is emitted for failed requests.
///
/// Restoring removes the `open` hook and the `transaction` hooks of every
/// database still alive. Object stores already handed out keep their wrappers
/// but stop reporting.
pub fn hijack_indexed_db(factory: &Arc<IdbFactory>, emitter: &ChangeEmitter) -> Option<HijackHandle> {
    let state = Arc::new(IdbHijack::new(emitter));

    let open_state = state.clone();
    let open_hook = intercept(
        factory,
        IdbFactory::open_slot,
        wrapper(move |args: IdbOpenArgs, next: &dyn Fn(IdbOpenArgs) -> IdbRequest<Arc<IdbDatabase>>| {
            let request = next(args);
            if open_state.is_active() {
                if let Some(db) = request.result() {
                    hijack_database(&open_state, db);
                }
            }
            request
        }),
    );
    let Some(open_hook) = open_hook else {
        log::debug!("indexedDB.open cannot be hijacked");
        return None;
    };

    Some(HijackHandle::with_restore(INDEXED_DB_SOURCE, move || {
        state.active.store(false, Ordering::SeqCst);
        open_hook.restore();
        let hooks = std::mem::take(&mut *state.transaction_hooks.lock().unwrap_or_else(PoisonError::into_inner));
        for hook in hooks {
            hook.restore();
        }
    }))
}

fn hijack_database(state: &Arc<IdbHijack>, db: &Arc<IdbDatabase>) {
    let tx_state = state.clone();
    let db_name = db.name().to_string();
    let hook = intercept(
        db,
        IdbDatabase::transaction_slot,
        wrapper(
            move |(names, mode): (Vec<String>, TransactionMode),
                  next: &dyn Fn((Vec<String>, TransactionMode)) -> StorageResult<Arc<IdbTransaction>>| {
                let transaction = next((names, mode));
                if let Ok(transaction) = &transaction {
                    if tx_state.is_active() {
                        hijack_transaction(&tx_state, &db_name, transaction);
                    }
                }
                transaction
            },
        ),
    );

    match hook {
        Some(hook) => state.track(hook),
        None => log::debug!("transaction of database `{}` cannot be hijacked", db.name()),
    }
}

fn hijack_transaction(state: &Arc<IdbHijack>, db_name: &str, transaction: &IdbTransaction) {
    for name in transaction.store_names() {
        let Ok(store) = transaction.object_store(name) else {
            continue;
        };
        let location = StoreLocation {
            db: db_name.to_string(),
            store: name.clone(),
        };
        hook_put(state, &store, IdbObjectStore::put_slot, location.clone());
        hook_put(state, &store, IdbObjectStore::add_slot, location.clone());
        hook_delete(state, &store, location.clone());
        hook_clear(state, &store, location);
    }
}

// Object-store hooks are never restored individually: they live as long as the
// transaction and turn into pass-through once the hijack is restored.

fn hook_put(state: &Arc<IdbHijack>, store: &Arc<IdbObjectStore>, slot: PutSlot, location: StoreLocation) {
    let state = state.clone();
    let installed = intercept(
        store,
        slot,
        wrapper(move |(value, key): PutArgs, next: &dyn Fn(PutArgs) -> IdbRequest<IdbKey>| {
            let json = state.is_active().then(|| serde_json::to_string(&value));
            let request = next((value, key));
            if let (Some(Ok(json)), Some(key)) = (json, request.result()) {
                state.emit(StorageChange::write(location.key(&key.to_string()), json, INDEXED_DB_SOURCE));
            }
            request
        }),
    );
    if installed.is_none() {
        log::debug!("object store `{}` cannot be hijacked", store.name());
    }
}

fn hook_delete(state: &Arc<IdbHijack>, store: &Arc<IdbObjectStore>, location: StoreLocation) {
    let state = state.clone();
    intercept(
        store,
        IdbObjectStore::delete_slot,
        wrapper(move |query: IdbQuery, next: &dyn Fn(IdbQuery) -> IdbRequest<()>| {
            let key = match &query {
                IdbQuery::Key(key) => key.to_string(),
                IdbQuery::Range(_) => "range".to_string(),
            };
            let request = next(query);
            if request.is_success() {
                state.emit(StorageChange::remove(location.key(&key), INDEXED_DB_SOURCE));
            }
            request
        }),
    );
}

fn hook_clear(state: &Arc<IdbHijack>, store: &Arc<IdbObjectStore>, location: StoreLocation) {
    let state = state.clone();
    intercept(
        store,
        IdbObjectStore::clear_slot,
        wrapper(move |_: (), next: &dyn Fn(()) -> IdbRequest<()>| {
            let request = next(());
            if request.is_success() {
                state.emit(StorageChange::clear(location.prefix(), INDEXED_DB_SOURCE));
            }
            request
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{IdbKeyRange, ObjectStoreParams};
    use serde_json::json;

    fn recorder(emitter: &ChangeEmitter) -> Arc<Mutex<Vec<String>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let l = log.clone();
        emitter.subscribe_all(move |c: &StorageChange| {
            l.lock()
                .unwrap()
                .push(format!("{}:{}:{}", c.kind, c.key, c.value.as_deref().unwrap_or("")));
        });
        log
    }

    fn open(factory: &IdbFactory, auto_increment: bool) -> Arc<IdbDatabase> {
        factory
            .open_with_upgrade("app", 1, move |upgrade| {
                upgrade.create_object_store("kv", ObjectStoreParams { auto_increment })
            })
            .into_result()
            .unwrap()
    }

    fn kv(db: &IdbDatabase) -> Arc<IdbObjectStore> {
        db.transaction(&["kv"], TransactionMode::ReadWrite)
            .unwrap()
            .object_store("kv")
            .unwrap()
    }

    #[test]
    fn hooks_of_dropped_databases_are_pruned() {
        let factory = IdbFactory::new();
        let state = Arc::new(IdbHijack::new(&ChangeEmitter::new()));

        for _ in 0..3 {
            let db = open(&factory, false);
            hijack_database(&state, &db);
        }
        let kept = open(&factory, false);
        hijack_database(&state, &kept);

        let hooks = state.transaction_hooks.lock().unwrap();
        assert_eq!(hooks.len(), 1);
        assert!(hooks[0].is_attached());
    }

    #[test]
    fn mutations_are_namespaced_by_database_and_store() {
        let factory = IdbFactory::new();
        let emitter = ChangeEmitter::new();
        let log = recorder(&emitter);
        let handle = hijack_indexed_db(&factory, &emitter).unwrap();
        assert_eq!(handle.source(), "indexeddb");

        let store = kv(&open(&factory, false));
        assert!(store.put(json!({"a": 1}), Some("user".into())).is_success());
        assert!(store.add(json!("x"), Some(IdbKey::from(7i64))).is_success());
        assert!(store.delete("user").is_success());
        assert!(store.delete(IdbKeyRange::lower_bound(0i64)).is_success());
        assert!(store.clear().is_success());

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "write:app.kv.user:{\"a\":1}",
                "write:app.kv.7:\"x\"",
                "remove:app.kv.user:",
                "remove:app.kv.range:",
                "clear:app.kv:",
            ]
        );
    }

    #[test]
    fn generated_keys_come_from_the_request() {
        let factory = IdbFactory::new();
        let emitter = ChangeEmitter::new();
        let log = recorder(&emitter);
        let _handle = hijack_indexed_db(&factory, &emitter).unwrap();

        let store = kv(&open(&factory, true));
        store.put(json!(true), None);
        store.put(json!(false), None);
        assert_eq!(*log.lock().unwrap(), vec!["write:app.kv.1:true", "write:app.kv.2:false"]);
    }

    #[test]
    fn failed_requests_are_not_reported() {
        let factory = IdbFactory::new();
        let emitter = ChangeEmitter::new();
        let log = recorder(&emitter);
        let _handle = hijack_indexed_db(&factory, &emitter).unwrap();

        let db = open(&factory, false);
        let store = kv(&db);
        assert!(!store.put(json!(1), None).is_success());
        store.add(json!(1), Some("k".into()));
        assert!(!store.add(json!(2), Some("k".into())).is_success());

        let read_only = db
            .transaction(&["kv"], TransactionMode::ReadOnly)
            .unwrap()
            .object_store("kv")
            .unwrap();
        assert!(!read_only.clear().is_success());

        assert_eq!(*log.lock().unwrap(), vec!["write:app.kv.k:1"]);
    }

    #[test]
    fn restore_unhooks_open_and_transactions() {
        let factory = IdbFactory::new();
        let emitter = ChangeEmitter::new();
        let log = recorder(&emitter);
        let handle = hijack_indexed_db(&factory, &emitter).unwrap();

        let db = open(&factory, false);
        let in_flight = kv(&db);
        assert!(db.transaction_slot().is_hooked());

        handle.restore();
        handle.restore();
        assert!(!factory.open_slot().is_hooked());
        assert!(!db.transaction_slot().is_hooked());

        in_flight.put(json!(1), Some("a".into()));
        kv(&db).put(json!(2), Some("b".into()));
        kv(&open(&factory, false)).put(json!(3), Some("c".into()));
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(in_flight.count().into_result().unwrap(), 3);
    }

    #[test]
    fn sealed_factory_is_not_hijacked() {
        let factory = IdbFactory::new();
        factory.seal();
        assert!(hijack_indexed_db(&factory, &ChangeEmitter::new()).is_none());
    }
}
