//! An in-process IndexedDB.
//!
//! Only what a key/value store needs is modelled: databases with versioned
//! upgrades, object stores with out-of-line keys (optionally auto-incremented),
//! read-only and read-write transactions, and key cursors. Requests complete
//! before the call returns; await them (they implement [`IntoFuture`]) or
//! inspect [`IdbRequest::result`] / [`IdbRequest::error`] the way the
//! `onsuccess` / `onerror` handlers would.
//!
//! `IdbFactory::open`, `IdbDatabase::transaction` and the mutating object-store
//! methods are interceptable.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::{ready, IntoFuture, Ready};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::errors::{StorageError, StorageResult};
use crate::intercept::Interceptable;

/// Largest key an auto-increment store hands out (2^53).
const MAX_GENERATED_KEY: u64 = 1 << 53;

/// A record key. Numbers sort before strings.
#[derive(Clone, Debug)]
pub enum IdbKey {
    Number(f64),
    String(String),
}

impl Ord for IdbKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (IdbKey::Number(a), IdbKey::Number(b)) => a.total_cmp(b),
            (IdbKey::String(a), IdbKey::String(b)) => a.cmp(b),
            (IdbKey::Number(_), IdbKey::String(_)) => Ordering::Less,
            (IdbKey::String(_), IdbKey::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for IdbKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for IdbKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IdbKey {}

impl fmt::Display for IdbKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdbKey::Number(n) => write!(f, "{n}"),
            IdbKey::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for IdbKey {
    fn from(s: &str) -> Self {
        IdbKey::String(s.to_string())
    }
}

impl From<String> for IdbKey {
    fn from(s: String) -> Self {
        IdbKey::String(s)
    }
}

impl From<f64> for IdbKey {
    fn from(n: f64) -> Self {
        IdbKey::Number(n)
    }
}

impl From<i64> for IdbKey {
    fn from(n: i64) -> Self {
        IdbKey::Number(n as f64)
    }
}

impl From<u32> for IdbKey {
    fn from(n: u32) -> Self {
        IdbKey::Number(f64::from(n))
    }
}

/// Inclusive key range; an open end is unbounded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdbKeyRange {
    pub lower: Option<IdbKey>,
    pub upper: Option<IdbKey>,
}

impl IdbKeyRange {
    pub fn only(key: impl Into<IdbKey>) -> Self {
        let key = key.into();
        Self { lower: Some(key.clone()), upper: Some(key) }
    }

    pub fn bound(lower: impl Into<IdbKey>, upper: impl Into<IdbKey>) -> StorageResult<Self> {
        let (lower, upper) = (lower.into(), upper.into());
        if lower > upper {
            return Err(StorageError::Data(format!("lower bound {lower} is above upper bound {upper}")));
        }
        Ok(Self { lower: Some(lower), upper: Some(upper) })
    }

    pub fn lower_bound(lower: impl Into<IdbKey>) -> Self {
        Self { lower: Some(lower.into()), upper: None }
    }

    pub fn upper_bound(upper: impl Into<IdbKey>) -> Self {
        Self { lower: None, upper: Some(upper.into()) }
    }

    pub fn contains(&self, key: &IdbKey) -> bool {
        self.lower.as_ref().map_or(true, |l| key >= l) && self.upper.as_ref().map_or(true, |u| key <= u)
    }
}

/// Argument of `delete`: one key or a range of keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdbQuery {
    Key(IdbKey),
    Range(IdbKeyRange),
}

impl From<IdbKey> for IdbQuery {
    fn from(key: IdbKey) -> Self {
        IdbQuery::Key(key)
    }
}

impl From<&str> for IdbQuery {
    fn from(key: &str) -> Self {
        IdbQuery::Key(key.into())
    }
}

impl From<String> for IdbQuery {
    fn from(key: String) -> Self {
        IdbQuery::Key(key.into())
    }
}

impl From<f64> for IdbQuery {
    fn from(key: f64) -> Self {
        IdbQuery::Key(key.into())
    }
}

impl From<IdbKeyRange> for IdbQuery {
    fn from(range: IdbKeyRange) -> Self {
        IdbQuery::Range(range)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
}

/// A completed request.
#[derive(Debug)]
pub struct IdbRequest<T> {
    outcome: StorageResult<T>,
}

impl<T> IdbRequest<T> {
    pub fn success(value: T) -> Self {
        Self { outcome: Ok(value) }
    }

    pub fn failure(error: StorageError) -> Self {
        Self { outcome: Err(error) }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// What `onsuccess` would see.
    pub fn result(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    /// What `onerror` would see.
    pub fn error(&self) -> Option<&StorageError> {
        self.outcome.as_ref().err()
    }

    pub fn into_result(self) -> StorageResult<T> {
        self.outcome
    }
}

impl<T> From<StorageResult<T>> for IdbRequest<T> {
    fn from(outcome: StorageResult<T>) -> Self {
        Self { outcome }
    }
}

impl<T> IntoFuture for IdbRequest<T> {
    type Output = StorageResult<T>;
    type IntoFuture = Ready<StorageResult<T>>;

    fn into_future(self) -> Self::IntoFuture {
        ready(self.outcome)
    }
}

/// Options for [`IdbUpgrade::create_object_store`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ObjectStoreParams {
    pub auto_increment: bool,
}

#[derive(Clone, Debug, Default)]
struct StoreData {
    records: BTreeMap<IdbKey, Value>,
    auto_increment: bool,
    next_key: u64,
}

#[derive(Clone, Debug, Default)]
struct DatabaseData {
    version: u32,
    stores: BTreeMap<String, StoreData>,
}

type SharedData = Arc<Mutex<DatabaseData>>;

fn lock(data: &SharedData) -> MutexGuard<'_, DatabaseData> {
    data.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Schema access during a version change.
pub struct IdbUpgrade<'a> {
    data: &'a mut DatabaseData,
    old_version: u32,
    new_version: u32,
}

impl IdbUpgrade<'_> {
    pub fn old_version(&self) -> u32 {
        self.old_version
    }

    pub fn new_version(&self) -> u32 {
        self.new_version
    }

    pub fn contains_store(&self, name: &str) -> bool {
        self.data.stores.contains_key(name)
    }

    pub fn object_store_names(&self) -> Vec<String> {
        self.data.stores.keys().cloned().collect()
    }

    pub fn create_object_store(&mut self, name: &str, params: ObjectStoreParams) -> StorageResult<()> {
        if self.contains_store(name) {
            return Err(StorageError::Constraint(format!("object store `{name}` already exists")));
        }
        self.data.stores.insert(
            name.to_string(),
            StoreData {
                auto_increment: params.auto_increment,
                next_key: 1,
                ..StoreData::default()
            },
        );
        Ok(())
    }

    pub fn delete_object_store(&mut self, name: &str) -> StorageResult<()> {
        self.data
            .stores
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(format!("object store `{name}`")))
    }
}

/// `onupgradeneeded` handler.
pub type UpgradeHandler = Arc<dyn Fn(&mut IdbUpgrade<'_>) -> StorageResult<()> + Send + Sync>;

/// Arguments of [`IdbFactory::open`].
#[derive(Clone)]
pub struct IdbOpenArgs {
    pub name: String,
    pub version: u32,
    pub on_upgrade: Option<UpgradeHandler>,
}

impl fmt::Debug for IdbOpenArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdbOpenArgs")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("on_upgrade", &self.on_upgrade.is_some())
            .finish()
    }
}

/// `window.indexedDB`.
pub struct IdbFactory {
    databases: Mutex<HashMap<String, SharedData>>,
    failure: Option<String>,
    supports_get_all_keys: bool,
    open: Interceptable<IdbOpenArgs, IdbRequest<Arc<IdbDatabase>>>,
}

impl IdbFactory {
    pub fn new() -> Arc<Self> {
        Self::build(None, true)
    }

    /// A factory whose every `open` fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Arc<Self> {
        Self::build(Some(reason.into()), true)
    }

    /// A factory whose object stores lack `getAllKeys`, so keys can only be
    /// enumerated with a cursor.
    pub fn without_get_all_keys() -> Arc<Self> {
        Self::build(None, false)
    }

    fn build(failure: Option<String>, supports_get_all_keys: bool) -> Arc<Self> {
        Arc::new(Self {
            databases: Mutex::new(HashMap::new()),
            failure,
            supports_get_all_keys,
            open: Interceptable::new("open"),
        })
    }

    pub fn open(&self, name: &str, version: u32) -> IdbRequest<Arc<IdbDatabase>> {
        self.open_with(IdbOpenArgs { name: name.to_string(), version, on_upgrade: None })
    }

    pub fn open_with_upgrade<F>(&self, name: &str, version: u32, on_upgrade: F) -> IdbRequest<Arc<IdbDatabase>>
    where
        F: Fn(&mut IdbUpgrade<'_>) -> StorageResult<()> + Send + Sync + 'static,
    {
        self.open_with(IdbOpenArgs {
            name: name.to_string(),
            version,
            on_upgrade: Some(Arc::new(on_upgrade)),
        })
    }

    pub fn open_with(&self, args: IdbOpenArgs) -> IdbRequest<Arc<IdbDatabase>> {
        self.open.invoke(args, &|a: IdbOpenArgs| self.open_database(a).into())
    }

    fn open_database(&self, args: IdbOpenArgs) -> StorageResult<Arc<IdbDatabase>> {
        if let Some(reason) = &self.failure {
            return Err(StorageError::IndexedDb(reason.clone()));
        }
        if args.version == 0 {
            return Err(StorageError::InvalidOptions("database version must be at least 1".into()));
        }

        let data = self
            .databases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(args.name.clone())
            .or_default()
            .clone();

        {
            let mut guard = lock(&data);
            let current = guard.version;
            if args.version < current {
                return Err(StorageError::Version { requested: args.version, current });
            }
            if args.version > current {
                let mut staged = DatabaseData {
                    version: args.version,
                    stores: guard.stores.clone(),
                };
                let outcome = match &args.on_upgrade {
                    Some(handler) => handler(&mut IdbUpgrade {
                        data: &mut staged,
                        old_version: current,
                        new_version: args.version,
                    }),
                    None => Ok(()),
                };
                // An aborted upgrade leaves the schema as it was.
                outcome?;
                *guard = staged;
            }
        }

        Ok(Arc::new(IdbDatabase {
            name: args.name,
            version: args.version,
            data,
            supports_get_all_keys: self.supports_get_all_keys,
            closed: AtomicBool::new(false),
            transaction: Interceptable::new("transaction"),
        }))
    }

    /// Names of every database opened so far.
    pub fn database_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .databases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn delete_database(&self, name: &str) -> IdbRequest<()> {
        self.databases.lock().unwrap_or_else(PoisonError::into_inner).remove(name);
        IdbRequest::success(())
    }

    pub fn open_slot(&self) -> &Interceptable<IdbOpenArgs, IdbRequest<Arc<IdbDatabase>>> {
        &self.open
    }

    pub fn seal(&self) {
        self.open.seal();
    }
}

impl fmt::Debug for IdbFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdbFactory")
            .field("databases", &self.database_names())
            .field("failure", &self.failure)
            .field("supports_get_all_keys", &self.supports_get_all_keys)
            .finish()
    }
}

/// An open database connection.
pub struct IdbDatabase {
    name: String,
    version: u32,
    data: SharedData,
    supports_get_all_keys: bool,
    closed: AtomicBool,
    transaction: Interceptable<(Vec<String>, TransactionMode), StorageResult<Arc<IdbTransaction>>>,
}

impl IdbDatabase {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn object_store_names(&self) -> Vec<String> {
        lock(&self.data).stores.keys().cloned().collect()
    }

    /// Starts a transaction over `stores`.
    pub fn transaction(&self, stores: &[&str], mode: TransactionMode) -> StorageResult<Arc<IdbTransaction>> {
        let names: Vec<String> = stores.iter().map(|s| s.to_string()).collect();
        self.transaction.invoke((names, mode), &|(names, mode): (Vec<String>, TransactionMode)| {
            self.begin(names, mode)
        })
    }

    fn begin(&self, names: Vec<String>, mode: TransactionMode) -> StorageResult<Arc<IdbTransaction>> {
        if self.closed.load(AtomicOrdering::SeqCst) {
            return Err(StorageError::IndexedDb(format!("database `{}` is closed", self.name)));
        }
        if names.is_empty() {
            return Err(StorageError::InvalidOptions("a transaction needs at least one object store".into()));
        }

        let known = lock(&self.data);
        let mut stores = HashMap::new();
        for name in &names {
            if !known.stores.contains_key(name) {
                return Err(StorageError::NotFound(format!("object store `{name}`")));
            }
            stores.insert(
                name.clone(),
                Arc::new(IdbObjectStore {
                    name: name.clone(),
                    mode,
                    data: self.data.clone(),
                    supports_get_all_keys: self.supports_get_all_keys,
                    put: Interceptable::new("put"),
                    add: Interceptable::new("add"),
                    delete: Interceptable::new("delete"),
                    clear: Interceptable::new("clear"),
                }),
            );
        }

        Ok(Arc::new(IdbTransaction {
            db_name: self.name.clone(),
            mode,
            store_names: names,
            stores,
        }))
    }

    /// Closes the connection; later `transaction` calls fail.
    pub fn close(&self) {
        self.closed.store(true, AtomicOrdering::SeqCst);
    }

    pub fn transaction_slot(
        &self,
    ) -> &Interceptable<(Vec<String>, TransactionMode), StorageResult<Arc<IdbTransaction>>> {
        &self.transaction
    }
}

impl fmt::Debug for IdbDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdbDatabase")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("closed", &self.closed.load(AtomicOrdering::SeqCst))
            .finish()
    }
}

/// A transaction scoped to a fixed set of object stores.
#[derive(Debug)]
pub struct IdbTransaction {
    db_name: String,
    mode: TransactionMode,
    store_names: Vec<String>,
    stores: HashMap<String, Arc<IdbObjectStore>>,
}

impl IdbTransaction {
    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    pub fn store_names(&self) -> &[String] {
        &self.store_names
    }

    /// The transaction's handle on `name`. The same handle is returned every time.
    pub fn object_store(&self, name: &str) -> StorageResult<Arc<IdbObjectStore>> {
        self.stores
            .get(name)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("object store `{name}` is not in this transaction")))
    }
}

/// Arguments of `put` and `add`: the value and an optional out-of-line key.
pub type PutArgs = (Value, Option<IdbKey>);

/// An object store as seen through one transaction.
pub struct IdbObjectStore {
    name: String,
    mode: TransactionMode,
    data: SharedData,
    supports_get_all_keys: bool,
    put: Interceptable<PutArgs, IdbRequest<IdbKey>>,
    add: Interceptable<PutArgs, IdbRequest<IdbKey>>,
    delete: Interceptable<IdbQuery, IdbRequest<()>>,
    clear: Interceptable<(), IdbRequest<()>>,
}

impl IdbObjectStore {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Inserts or replaces. `key` may be omitted on auto-increment stores.
    pub fn put(&self, value: Value, key: Option<IdbKey>) -> IdbRequest<IdbKey> {
        self.put
            .invoke((value, key), &|(v, k): PutArgs| self.store_record(v, k, false).into())
    }

    /// Inserts; an existing key is a constraint error.
    pub fn add(&self, value: Value, key: Option<IdbKey>) -> IdbRequest<IdbKey> {
        self.add
            .invoke((value, key), &|(v, k): PutArgs| self.store_record(v, k, true).into())
    }

    pub fn delete(&self, query: impl Into<IdbQuery>) -> IdbRequest<()> {
        self.delete.invoke(query.into(), &|q: IdbQuery| self.delete_records(q).into())
    }

    pub fn clear(&self) -> IdbRequest<()> {
        self.clear.invoke((), &|_: ()| self.clear_records().into())
    }

    pub fn get(&self, key: impl Into<IdbKey>) -> IdbRequest<Option<Value>> {
        let key = key.into();
        self.with_store(|store| Ok(store.records.get(&key).cloned())).into()
    }

    /// `None` when the store has no `getAllKeys`.
    pub fn get_all_keys(&self) -> Option<IdbRequest<Vec<IdbKey>>> {
        if !self.supports_get_all_keys {
            return None;
        }
        Some(self.with_store(|store| Ok(store.records.keys().cloned().collect())).into())
    }

    /// A cursor over the keys, in key order. `None` when the store is empty.
    pub fn open_key_cursor(&self) -> IdbRequest<Option<IdbKeyCursor>> {
        self.with_store(|store| {
            let keys: Vec<IdbKey> = store.records.keys().cloned().collect();
            Ok(IdbKeyCursor::start(keys))
        })
        .into()
    }

    pub fn count(&self) -> IdbRequest<usize> {
        self.with_store(|store| Ok(store.records.len())).into()
    }

    pub fn put_slot(&self) -> &Interceptable<PutArgs, IdbRequest<IdbKey>> {
        &self.put
    }

    pub fn add_slot(&self) -> &Interceptable<PutArgs, IdbRequest<IdbKey>> {
        &self.add
    }

    pub fn delete_slot(&self) -> &Interceptable<IdbQuery, IdbRequest<()>> {
        &self.delete
    }

    pub fn clear_slot(&self) -> &Interceptable<(), IdbRequest<()>> {
        &self.clear
    }

    fn with_store<T>(&self, f: impl FnOnce(&mut StoreData) -> StorageResult<T>) -> StorageResult<T> {
        let mut db = lock(&self.data);
        let store = db
            .stores
            .get_mut(&self.name)
            .ok_or_else(|| StorageError::NotFound(format!("object store `{}` was deleted", self.name)))?;
        f(store)
    }

    fn writable(&self) -> StorageResult<()> {
        match self.mode {
            TransactionMode::ReadWrite => Ok(()),
            TransactionMode::ReadOnly => Err(StorageError::ReadOnly),
        }
    }

    fn store_record(&self, value: Value, key: Option<IdbKey>, no_overwrite: bool) -> StorageResult<IdbKey> {
        self.writable()?;
        self.with_store(|store| {
            let key = match key {
                Some(key) => {
                    if let IdbKey::Number(n) = key {
                        if store.auto_increment && n >= store.next_key as f64 {
                            // Capped at 2^53, which leaves the generator exhausted.
                            store.next_key = n.min(MAX_GENERATED_KEY as f64).floor() as u64 + 1;
                        }
                    }
                    key
                }
                None if store.auto_increment => {
                    if store.next_key > MAX_GENERATED_KEY {
                        return Err(StorageError::Constraint("key generator is exhausted".into()));
                    }
                    let generated = IdbKey::Number(store.next_key as f64);
                    store.next_key += 1;
                    generated
                }
                None => {
                    return Err(StorageError::Data(
                        "no key given and the object store has no key generator".into(),
                    ))
                }
            };
            if no_overwrite && store.records.contains_key(&key) {
                return Err(StorageError::Constraint(format!("key {key} already exists")));
            }
            store.records.insert(key.clone(), value);
            Ok(key)
        })
    }

    fn delete_records(&self, query: IdbQuery) -> StorageResult<()> {
        self.writable()?;
        self.with_store(|store| {
            match query {
                IdbQuery::Key(key) => {
                    store.records.remove(&key);
                }
                IdbQuery::Range(range) => store.records.retain(|k, _| !range.contains(k)),
            }
            Ok(())
        })
    }

    fn clear_records(&self) -> StorageResult<()> {
        self.writable()?;
        self.with_store(|store| {
            store.records.clear();
            Ok(())
        })
    }
}

impl fmt::Debug for IdbObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdbObjectStore")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Key cursor over a snapshot of a store's keys.
#[derive(Clone, Debug)]
pub struct IdbKeyCursor {
    keys: Vec<IdbKey>,
    position: usize,
}

impl IdbKeyCursor {
    fn start(keys: Vec<IdbKey>) -> Option<Self> {
        (!keys.is_empty()).then_some(Self { keys, position: 0 })
    }

    pub fn key(&self) -> &IdbKey {
        &self.keys[self.position]
    }

    /// `cursor.continue()`: the cursor on the next key, or `None` when done.
    pub fn advance(mut self) -> Option<Self> {
        self.position += 1;
        (self.position < self.keys.len()).then_some(self)
    }
}
