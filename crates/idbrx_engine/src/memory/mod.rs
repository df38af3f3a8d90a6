//! In-memory reference engine.
//!
//! [`MemoryFactory`] implements the engine traits entirely in memory,
//! following IndexedDB's observable rules: versioned opens with upgrades
//! and blocked upgrades, scoped read-only/read-write transactions that roll
//! back on abort, key generators, unique and multi-entry indexes, and
//! cursors in all four directions.
//!
//! Every answer is delivered from a task on the factory's [`EventLoop`],
//! which the host must drain.
//!
//! # Example
//!
//! ```rust
//! use idbrx_engine::MemoryFactory;
//!
//! let factory = MemoryFactory::new();
//! assert!(factory.event_loop().is_idle());
//! ```
//!
//! # Differences from a browser
//!
//! - Transactions never auto-commit; they stay active until committed or
//!   aborted (a dropped transaction simply keeps its writes).
//! - Nothing is persisted beyond the factory's lifetime.

mod cursor;
mod database;
mod state;
mod store;
mod transaction;

use crate::engine::{Completion, DatabaseHandle, Factory, OpenCallbacks, TransactionHandle};
use crate::error::{EngineError, EngineResult};
use crate::event_loop::EventLoop;
use crate::types::{DatabaseInfo, VersionChange};
use database::MemoryDatabase;
use state::DbState;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use tracing::{debug, warn};
use transaction::{MemoryTransaction, Phase, TxnState};

/// An engine factory holding its databases in memory.
///
/// Cloning yields another handle to the same set of databases.
#[derive(Clone, Default)]
pub struct MemoryFactory {
    inner: Rc<FactoryInner>,
}

#[derive(Default)]
struct FactoryInner {
    events: EventLoop,
    databases: RefCell<BTreeMap<String, Rc<DbState>>>,
}

impl MemoryFactory {
    /// Creates a factory with its own event loop.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a factory delivering its answers on `events`.
    #[must_use]
    pub fn with_event_loop(events: EventLoop) -> Self {
        Self {
            inner: Rc::new(FactoryInner {
                events,
                databases: RefCell::new(BTreeMap::new()),
            }),
        }
    }

    /// The event loop answers are delivered on.
    #[must_use]
    pub fn event_loop(&self) -> &EventLoop {
        &self.inner.events
    }
}

impl fmt::Debug for MemoryFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryFactory")
            .field("databases", &self.inner.databases.borrow().keys().collect::<Vec<_>>())
            .field("events", &self.inner.events)
            .finish()
    }
}

impl FactoryInner {
    fn database(&self, name: &str) -> Rc<DbState> {
        let mut databases = self.databases.borrow_mut();
        let db = databases
            .entry(name.to_string())
            .or_insert_with(|| Rc::new(DbState::new(name, self.events.clone())));
        Rc::clone(db)
    }

    fn run_open(
        self: &Rc<Self>,
        name: String,
        version: Option<u32>,
        mut callbacks: Box<dyn OpenCallbacks>,
    ) {
        let db = self.database(&name);
        let current = db.version.get();
        let requested = version.unwrap_or(current.max(1));

        if requested < current {
            warn!(db = %name, requested, current, "open rejected: version is lower than stored");
            callbacks.on_error(EngineError::Version { requested, current });
            return;
        }
        if requested == current {
            debug!(db = %name, version = current, "database opened");
            callbacks.on_success(MemoryDatabase::connect(&db, current));
            return;
        }

        let change = VersionChange {
            old_version: current,
            new_version: requested,
        };
        if db.open_connections() > 0 {
            warn!(db = %name, %change, open = db.open_connections(), "upgrade blocked by open connections");
            callbacks.on_blocked(change);
            let inner = Rc::clone(self);
            db.park(move || inner.run_open(name, version, callbacks));
            return;
        }

        Self::upgrade(&db, change, callbacks);
    }

    fn upgrade(db: &Rc<DbState>, change: VersionChange, mut callbacks: Box<dyn OpenCallbacks>) {
        debug!(db = %db.name, %change, "upgrading database");
        let txn = TxnState::version_change(db, change.old_version);
        db.version.set(change.new_version);

        let connection = MemoryDatabase::connect(db, change.new_version);
        connection.begin_upgrade(&txn);
        let handle: Rc<dyn DatabaseHandle> = Rc::clone(&connection) as Rc<dyn DatabaseHandle>;
        let transaction: Rc<dyn TransactionHandle> = MemoryTransaction::new(Rc::clone(&txn));
        let outcome = callbacks.on_upgrade_needed(handle, transaction, change);
        connection.end_upgrade();

        let failure = match (outcome, txn.phase()) {
            (Ok(()), Phase::Active) => txn.commit().err(),
            (Ok(()), Phase::Committed) => None,
            (Ok(()), Phase::Aborted) => Some(EngineError::abort("version change transaction was aborted")),
            (Err(err), phase) => {
                if phase == Phase::Active {
                    // Cannot fail: the transaction is still active.
                    let _ = txn.abort();
                }
                Some(EngineError::abort(format!("upgrade callback failed: {err}")))
            }
        };

        match failure {
            None => {
                debug!(db = %db.name, version = change.new_version, "database upgraded");
                callbacks.on_success(connection);
            }
            Some(err) => {
                warn!(db = %db.name, %change, error = %err, "upgrade aborted");
                connection.set_version(change.old_version);
                connection.close();
                callbacks.on_error(err);
            }
        }
    }

    fn run_delete(self: &Rc<Self>, name: String, done: Completion<()>) {
        let existing = self.databases.borrow().get(&name).cloned();
        if let Some(db) = existing {
            if db.open_connections() > 0 {
                warn!(db = %name, open = db.open_connections(), "delete blocked by open connections");
                let inner = Rc::clone(self);
                db.park(move || inner.run_delete(name, done));
                return;
            }
            self.databases.borrow_mut().remove(&name);
            debug!(db = %name, "database deleted");
        }
        done(Ok(()));
    }
}

impl Factory for MemoryFactory {
    fn open(
        &self,
        name: &str,
        version: Option<u32>,
        callbacks: Box<dyn OpenCallbacks>,
    ) -> EngineResult<()> {
        if version == Some(0) {
            return Err(EngineError::Type("version must be a positive integer".into()));
        }
        let inner = Rc::clone(&self.inner);
        let name = name.to_string();
        self.inner
            .events
            .schedule(move || inner.run_open(name, version, callbacks));
        Ok(())
    }

    fn delete_database(&self, name: &str, done: Completion<()>) -> EngineResult<()> {
        let inner = Rc::clone(&self.inner);
        let name = name.to_string();
        self.inner.events.schedule(move || inner.run_delete(name, done));
        Ok(())
    }

    fn databases(&self, done: Completion<Vec<DatabaseInfo>>) -> EngineResult<()> {
        let inner = Rc::clone(&self.inner);
        self.inner.events.schedule(move || {
            let databases = inner
                .databases
                .borrow()
                .values()
                .filter(|db| db.version.get() > 0)
                .map(|db| DatabaseInfo {
                    name: db.name.clone(),
                    version: db.version.get(),
                })
                .collect();
            done(Ok(databases));
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{CursorHandle, CursorSink, ObjectStoreHandle};
    use crate::key::{Key, KeyRange};
    use crate::types::{Direction, IndexParameters, StoreParameters, TransactionMode};
    use serde_json::json;
    use std::cell::Cell;

    type Setup = Box<dyn FnMut(&Rc<dyn DatabaseHandle>, &Rc<dyn TransactionHandle>) -> EngineResult<()>>;

    #[derive(Default)]
    struct Outcome {
        upgrades: Vec<VersionChange>,
        blocked: Vec<VersionChange>,
        db: Option<Rc<dyn DatabaseHandle>>,
        error: Option<EngineError>,
    }

    struct Recorder {
        outcome: Rc<RefCell<Outcome>>,
        setup: Option<Setup>,
    }

    impl OpenCallbacks for Recorder {
        fn on_upgrade_needed(
            &mut self,
            db: Rc<dyn DatabaseHandle>,
            transaction: Rc<dyn TransactionHandle>,
            change: VersionChange,
        ) -> EngineResult<()> {
            self.outcome.borrow_mut().upgrades.push(change);
            match &mut self.setup {
                Some(setup) => setup(&db, &transaction),
                None => Ok(()),
            }
        }

        fn on_blocked(&mut self, change: VersionChange) {
            self.outcome.borrow_mut().blocked.push(change);
        }

        fn on_success(self: Box<Self>, db: Rc<dyn DatabaseHandle>) {
            self.outcome.borrow_mut().db = Some(db);
        }

        fn on_error(self: Box<Self>, error: EngineError) {
            self.outcome.borrow_mut().error = Some(error);
        }
    }

    fn open(
        factory: &MemoryFactory,
        name: &str,
        version: Option<u32>,
        setup: Option<Setup>,
    ) -> Rc<RefCell<Outcome>> {
        let outcome = Rc::new(RefCell::new(Outcome::default()));
        let recorder = Recorder {
            outcome: Rc::clone(&outcome),
            setup,
        };
        factory.open(name, version, Box::new(recorder)).unwrap();
        outcome
    }

    fn with_store(name: &'static str) -> Setup {
        Box::new(move |db, _| {
            db.create_object_store(name, &StoreParameters::new())?;
            Ok(())
        })
    }

    struct Keys(Rc<RefCell<Vec<Key>>>, Rc<Cell<bool>>);

    impl CursorSink for Keys {
        fn on_success(&mut self, cursor: Option<Rc<dyn CursorHandle>>) {
            match cursor {
                Some(cursor) => {
                    self.0.borrow_mut().push(cursor.primary_key());
                    cursor.advance().unwrap();
                }
                None => self.1.set(true),
            }
        }

        fn on_error(&mut self, error: EngineError) {
            panic!("cursor failed: {error}");
        }
    }

    fn put(store: &Rc<dyn ObjectStoreHandle>, key: i32, value: serde_json::Value) {
        store.put(value, Some(Key::from(key)), Box::new(|r| {
            r.unwrap();
        }))
        .unwrap();
    }

    #[test]
    fn answers_are_never_synchronous() {
        let factory = MemoryFactory::new();
        let outcome = open(&factory, "db", Some(1), None);
        assert!(outcome.borrow().db.is_none());
        factory.event_loop().run_until_idle();
        assert!(outcome.borrow().db.is_some());
    }

    #[test]
    fn factories_can_share_an_event_loop() {
        let events = EventLoop::new();
        let first = MemoryFactory::with_event_loop(events.clone());
        let second = MemoryFactory::with_event_loop(events.clone());

        let a = open(&first, "db", Some(1), None);
        let b = open(&second, "db", Some(1), None);
        assert_eq!(events.pending(), 2);
        events.run_until_idle();

        // Same name, separate registries: both databases are new.
        assert_eq!(a.borrow().upgrades.len(), 1);
        assert_eq!(b.borrow().upgrades.len(), 1);
        assert!(first.event_loop().is_idle());
    }

    #[test]
    fn new_database_upgrades_from_zero() {
        let factory = MemoryFactory::new();
        let outcome = open(&factory, "db", Some(3), Some(with_store("items")));
        factory.event_loop().run_until_idle();

        let outcome = outcome.borrow();
        assert_eq!(
            outcome.upgrades,
            vec![VersionChange {
                old_version: 0,
                new_version: 3
            }]
        );
        let db = outcome.db.as_ref().unwrap();
        assert_eq!(db.version(), 3);
        assert_eq!(db.object_store_names(), vec!["items".to_string()]);
    }

    #[test]
    fn version_zero_fails_immediately() {
        let factory = MemoryFactory::new();
        let recorder = Recorder {
            outcome: Rc::default(),
            setup: None,
        };
        let err = factory.open("db", Some(0), Box::new(recorder)).unwrap_err();
        assert_eq!(err.name(), "TypeError");
    }

    #[test]
    fn lower_version_is_rejected() {
        let factory = MemoryFactory::new();
        let first = open(&factory, "db", Some(2), None);
        factory.event_loop().run_until_idle();
        first.borrow().db.as_ref().unwrap().close();

        let second = open(&factory, "db", Some(1), None);
        factory.event_loop().run_until_idle();
        assert_eq!(
            second.borrow().error,
            Some(EngineError::Version {
                requested: 1,
                current: 2
            })
        );
    }

    #[test]
    fn failed_upgrade_restores_schema_and_version() {
        let factory = MemoryFactory::new();
        let setup: Setup = Box::new(|db, _| {
            db.create_object_store("items", &StoreParameters::new())?;
            Err(EngineError::abort("changed my mind"))
        });
        let outcome = open(&factory, "db", Some(1), Some(setup));
        factory.event_loop().run_until_idle();
        assert!(matches!(outcome.borrow().error, Some(EngineError::Abort(_))));

        let reopened = open(&factory, "db", None, None);
        factory.event_loop().run_until_idle();
        let reopened = reopened.borrow();
        assert_eq!(reopened.upgrades.len(), 1, "version was rolled back to 0");
        assert!(reopened.db.as_ref().unwrap().object_store_names().is_empty());
    }

    #[test]
    fn upgrade_waits_for_open_connections() {
        let factory = MemoryFactory::new();
        let first = open(&factory, "db", Some(1), None);
        factory.event_loop().run_until_idle();

        let second = open(&factory, "db", Some(2), None);
        factory.event_loop().run_until_idle();
        assert_eq!(second.borrow().blocked.len(), 1);
        assert!(second.borrow().db.is_none());

        first.borrow().db.as_ref().unwrap().close();
        factory.event_loop().run_until_idle();
        assert_eq!(second.borrow().db.as_ref().unwrap().version(), 2);
    }

    #[test]
    fn transaction_rules() {
        let factory = MemoryFactory::new();
        let outcome = open(&factory, "db", Some(1), Some(with_store("items")));
        factory.event_loop().run_until_idle();
        let outcome = outcome.borrow();
        let db = outcome.db.as_ref().unwrap();

        assert!(matches!(
            db.transaction(&["missing"], TransactionMode::ReadOnly),
            Err(EngineError::NotFound(_))
        ));
        assert!(matches!(
            db.transaction(&[], TransactionMode::ReadOnly),
            Err(EngineError::InvalidAccess(_))
        ));
        assert!(matches!(
            db.create_object_store("late", &StoreParameters::new()),
            Err(EngineError::InvalidState(_))
        ));

        let txn = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
        let store = txn.object_store("items").unwrap();
        let denied = store.put(json!(1), Some(Key::from(1)), Box::new(|_| {}));
        assert_eq!(denied, Err(EngineError::ReadOnly));
    }

    #[test]
    fn abort_rolls_back_writes() {
        let factory = MemoryFactory::new();
        let outcome = open(&factory, "db", Some(1), Some(with_store("items")));
        factory.event_loop().run_until_idle();
        let db = outcome.borrow().db.clone().unwrap();

        let txn = db.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
        let store = txn.object_store("items").unwrap();
        put(&store, 1, json!("a"));
        txn.commit().unwrap();

        let txn = db.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
        let store = txn.object_store("items").unwrap();
        put(&store, 1, json!("changed"));
        put(&store, 2, json!("b"));
        let finished = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&finished);
        txn.on_finish(Box::new(move |r| *sink.borrow_mut() = Some(r)));
        txn.abort().unwrap();
        factory.event_loop().run_until_idle();
        assert!(matches!(*finished.borrow(), Some(Err(EngineError::Abort(_)))));

        let txn = db.transaction(&["items"], TransactionMode::ReadOnly).unwrap();
        let store = txn.object_store("items").unwrap();
        let value = Rc::new(RefCell::new(None));
        let out = Rc::clone(&value);
        store
            .get(
                &KeyRange::only(1).unwrap(),
                Box::new(move |r| *out.borrow_mut() = Some(r.unwrap())),
            )
            .unwrap();
        let count = Rc::new(Cell::new(0));
        let out = Rc::clone(&count);
        store
            .count(None, Box::new(move |r| out.set(r.unwrap())))
            .unwrap();
        factory.event_loop().run_until_idle();
        assert_eq!(*value.borrow(), Some(Some(json!("a"))));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn add_reports_constraint_errors_asynchronously() {
        let factory = MemoryFactory::new();
        let outcome = open(&factory, "db", Some(1), Some(with_store("items")));
        factory.event_loop().run_until_idle();
        let db = outcome.borrow().db.clone().unwrap();

        let txn = db.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
        let store = txn.object_store("items").unwrap();
        put(&store, 1, json!("a"));
        let result = Rc::new(RefCell::new(None));
        let out = Rc::clone(&result);
        store
            .add(json!("b"), Some(Key::from(1)), Box::new(move |r| *out.borrow_mut() = Some(r)))
            .unwrap();
        assert!(result.borrow().is_none());
        factory.event_loop().run_until_idle();
        assert!(matches!(*result.borrow(), Some(Err(EngineError::Constraint(_)))));
    }

    #[test]
    fn cursor_walks_index_in_direction_order() {
        let factory = MemoryFactory::new();
        let setup: Setup = Box::new(|db, _| {
            let store = db.create_object_store("people", &StoreParameters::new())?;
            store.create_index("by_city", &"city".into(), &IndexParameters::new())?;
            Ok(())
        });
        let outcome = open(&factory, "db", Some(1), Some(setup));
        factory.event_loop().run_until_idle();
        let db = outcome.borrow().db.clone().unwrap();

        let txn = db.transaction(&["people"], TransactionMode::ReadWrite).unwrap();
        let store = txn.object_store("people").unwrap();
        put(&store, 1, json!({"city": "b"}));
        put(&store, 2, json!({"city": "a"}));
        put(&store, 3, json!({"city": "b"}));
        put(&store, 4, json!({"name": "no city"}));
        factory.event_loop().run_until_idle();

        let walk = |direction| {
            let keys = Rc::new(RefCell::new(Vec::new()));
            let done = Rc::new(Cell::new(false));
            let index = store.index("by_city").unwrap();
            index
                .open_cursor(None, direction, Box::new(Keys(Rc::clone(&keys), Rc::clone(&done))))
                .unwrap();
            factory.event_loop().run_until_idle();
            assert!(done.get());
            let walked: Vec<i32> = keys.borrow().iter().map(|k| k.as_number().unwrap() as i32).collect();
            walked
        };

        assert_eq!(walk(Direction::Next), vec![2, 1, 3]);
        assert_eq!(walk(Direction::Prev), vec![3, 1, 2]);
        assert_eq!(walk(Direction::NextUnique), vec![2, 1]);
        assert_eq!(walk(Direction::PrevUnique), vec![1, 2]);
    }

    #[test]
    fn advancing_twice_is_an_error() {
        let factory = MemoryFactory::new();
        let outcome = open(&factory, "db", Some(1), Some(with_store("items")));
        factory.event_loop().run_until_idle();
        let db = outcome.borrow().db.clone().unwrap();
        let txn = db.transaction(&["items"], TransactionMode::ReadWrite).unwrap();
        let store = txn.object_store("items").unwrap();
        put(&store, 1, json!(1));
        put(&store, 2, json!(2));

        struct Twice(Rc<RefCell<Option<EngineError>>>);
        impl CursorSink for Twice {
            fn on_success(&mut self, cursor: Option<Rc<dyn CursorHandle>>) {
                if let Some(cursor) = cursor {
                    if self.0.borrow().is_none() {
                        cursor.advance().unwrap();
                        *self.0.borrow_mut() = cursor.advance().err();
                    }
                }
            }
            fn on_error(&mut self, _: EngineError) {}
        }

        let second = Rc::new(RefCell::new(None));
        store
            .open_cursor(None, Direction::Next, Box::new(Twice(Rc::clone(&second))))
            .unwrap();
        factory.event_loop().run_until_idle();
        assert!(matches!(*second.borrow(), Some(EngineError::InvalidState(_))));
    }

    #[test]
    fn delete_database_and_list() {
        let factory = MemoryFactory::new();
        let outcome = open(&factory, "db", Some(2), None);
        factory.event_loop().run_until_idle();

        let listed = Rc::new(RefCell::new(Vec::new()));
        let out = Rc::clone(&listed);
        factory
            .databases(Box::new(move |r| *out.borrow_mut() = r.unwrap()))
            .unwrap();
        factory.event_loop().run_until_idle();
        assert_eq!(
            *listed.borrow(),
            vec![DatabaseInfo {
                name: "db".into(),
                version: 2
            }]
        );

        let deleted = Rc::new(Cell::new(false));
        let out = Rc::clone(&deleted);
        factory
            .delete_database("db", Box::new(move |r| out.set(r.is_ok())))
            .unwrap();
        factory.event_loop().run_until_idle();
        assert!(!deleted.get(), "delete waits for the open connection");

        outcome.borrow_mut().db.take();
        factory.event_loop().run_until_idle();
        assert!(deleted.get());
    }
}
