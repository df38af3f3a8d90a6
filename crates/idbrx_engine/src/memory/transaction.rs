//! In-memory transactions.
//!
//! Writes are applied to the shared store state as they are issued and
//! recorded in an undo log; aborting replays the log backwards. A
//! version-change transaction instead snapshots the whole schema, since it
//! may create and delete stores.

use super::state::{DbState, StoreData};
use super::store::MemoryObjectStore;
use crate::engine::{Completion, ObjectStoreHandle, TransactionHandle};
use crate::error::{EngineError, EngineResult};
use crate::key::Key;
use crate::types::TransactionMode;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use tracing::debug;

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// Requests may be issued.
    Active,
    /// Changes are kept.
    Committed,
    /// Changes were rolled back.
    Aborted,
}

struct UndoEntry {
    store: String,
    key: Key,
    previous: Option<Value>,
    /// Key generator value before the write.
    generator: u64,
}

struct Snapshot {
    version: u32,
    stores: BTreeMap<String, StoreData>,
}

pub(crate) struct TxnState {
    pub(crate) db: Rc<DbState>,
    pub(crate) mode: TransactionMode,
    scope: Vec<String>,
    phase: Cell<Phase>,
    undo: RefCell<Vec<UndoEntry>>,
    snapshot: RefCell<Option<Snapshot>>,
    listeners: RefCell<Vec<Completion<()>>>,
}

impl TxnState {
    pub(crate) fn new(db: &Rc<DbState>, scope: Vec<String>, mode: TransactionMode) -> Rc<Self> {
        Rc::new(Self {
            db: Rc::clone(db),
            mode,
            scope,
            phase: Cell::new(Phase::Active),
            undo: RefCell::new(Vec::new()),
            snapshot: RefCell::new(None),
            listeners: RefCell::new(Vec::new()),
        })
    }

    /// Starts a version-change transaction, remembering the schema and
    /// version to restore on abort.
    pub(crate) fn version_change(db: &Rc<DbState>, old_version: u32) -> Rc<Self> {
        let txn = Self::new(db, Vec::new(), TransactionMode::VersionChange);
        *txn.snapshot.borrow_mut() = Some(Snapshot {
            version: old_version,
            stores: db.stores.borrow().clone(),
        });
        txn
    }

    pub(crate) fn phase(&self) -> Phase {
        self.phase.get()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.phase.get() == Phase::Active
    }

    pub(crate) fn ensure_active(&self) -> EngineResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(EngineError::TransactionInactive)
        }
    }

    pub(crate) fn ensure_writable(&self) -> EngineResult<()> {
        self.ensure_active()?;
        if self.mode.is_writable() {
            Ok(())
        } else {
            Err(EngineError::ReadOnly)
        }
    }

    pub(crate) fn ensure_version_change(&self) -> EngineResult<()> {
        if self.mode == TransactionMode::VersionChange && self.is_active() {
            Ok(())
        } else {
            Err(EngineError::invalid_state(
                "schema changes require an active version change transaction",
            ))
        }
    }

    /// Stores in scope. A version-change transaction covers every store.
    pub(crate) fn scope(&self) -> Vec<String> {
        if self.mode == TransactionMode::VersionChange {
            self.db.stores.borrow().keys().cloned().collect()
        } else {
            self.scope.clone()
        }
    }

    pub(crate) fn in_scope(&self, store: &str) -> bool {
        self.mode == TransactionMode::VersionChange || self.scope.iter().any(|s| s == store)
    }

    pub(crate) fn record_undo(
        &self,
        store: &str,
        key: Key,
        previous: Option<Value>,
        generator: u64,
    ) {
        // Version-change transactions roll back from their snapshot.
        if self.mode != TransactionMode::VersionChange {
            self.undo.borrow_mut().push(UndoEntry {
                store: store.to_string(),
                key,
                previous,
                generator,
            });
        }
    }

    pub(crate) fn commit(&self) -> EngineResult<()> {
        self.finish(Phase::Committed)?;
        self.undo.borrow_mut().clear();
        self.snapshot.borrow_mut().take();
        debug!(db = %self.db.name, mode = %self.mode, "transaction committed");
        self.notify(Ok(()));
        Ok(())
    }

    pub(crate) fn abort(&self) -> EngineResult<()> {
        self.finish(Phase::Aborted)?;
        self.rollback();
        debug!(db = %self.db.name, mode = %self.mode, "transaction aborted");
        self.notify(Err(EngineError::abort("transaction was aborted")));
        Ok(())
    }

    pub(crate) fn on_finish(&self, done: Completion<()>) {
        match self.phase.get() {
            Phase::Active => self.listeners.borrow_mut().push(done),
            Phase::Committed => self.db.answer(done, Ok(())),
            Phase::Aborted => self
                .db
                .answer(done, Err(EngineError::abort("transaction was aborted"))),
        }
    }

    fn finish(&self, phase: Phase) -> EngineResult<()> {
        if !self.is_active() {
            return Err(EngineError::invalid_state("transaction has already finished"));
        }
        self.phase.set(phase);
        Ok(())
    }

    fn rollback(&self) {
        if let Some(snapshot) = self.snapshot.borrow_mut().take() {
            self.db.version.set(snapshot.version);
            *self.db.stores.borrow_mut() = snapshot.stores;
            return;
        }

        let undo = std::mem::take(&mut *self.undo.borrow_mut());
        let mut stores = self.db.stores.borrow_mut();
        for entry in undo.into_iter().rev() {
            if let Some(store) = stores.get_mut(&entry.store) {
                store.write(entry.key, entry.previous);
                store.restore_generator(entry.generator);
            }
        }
    }

    fn notify(&self, result: EngineResult<()>) {
        let listeners = std::mem::take(&mut *self.listeners.borrow_mut());
        for done in listeners {
            self.db.answer(done, result.clone());
        }
    }
}

/// A transaction handle over [`TxnState`].
pub(crate) struct MemoryTransaction {
    pub(crate) state: Rc<TxnState>,
}

impl MemoryTransaction {
    pub(crate) fn new(state: Rc<TxnState>) -> Rc<Self> {
        Rc::new(Self { state })
    }
}

impl TransactionHandle for MemoryTransaction {
    fn mode(&self) -> TransactionMode {
        self.state.mode
    }

    fn object_store_names(&self) -> Vec<String> {
        self.state.scope()
    }

    fn object_store(&self, name: &str) -> EngineResult<Rc<dyn ObjectStoreHandle>> {
        if !self.state.is_active() {
            return Err(EngineError::invalid_state("transaction has finished"));
        }
        if !self.state.in_scope(name) || !self.state.db.stores.borrow().contains_key(name) {
            return Err(EngineError::not_found(format!(
                "object store '{name}' is not in the transaction's scope"
            )));
        }
        Ok(MemoryObjectStore::new(Rc::clone(&self.state), name))
    }

    fn commit(&self) -> EngineResult<()> {
        self.state.commit()
    }

    fn abort(&self) -> EngineResult<()> {
        self.state.abort()
    }

    fn on_finish(&self, done: Completion<()>) {
        self.state.on_finish(done);
    }
}
