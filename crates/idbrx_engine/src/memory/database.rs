//! In-memory database connections.

use super::state::{DbState, StoreData};
use super::store::MemoryObjectStore;
use super::transaction::{MemoryTransaction, TxnState};
use crate::engine::{DatabaseHandle, ObjectStoreHandle, TransactionHandle};
use crate::error::{EngineError, EngineResult};
use crate::key::KeyPath;
use crate::types::{StoreParameters, TransactionMode};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use tracing::debug;

/// One open connection to a [`DbState`].
///
/// Dropping the last handle closes the connection.
pub(crate) struct MemoryDatabase {
    db: Rc<DbState>,
    version: Cell<u32>,
    closed: Cell<bool>,
    upgrade: RefCell<Option<Rc<TxnState>>>,
}

impl MemoryDatabase {
    pub(crate) fn connect(db: &Rc<DbState>, version: u32) -> Rc<Self> {
        db.connection_opened();
        Rc::new(Self {
            db: Rc::clone(db),
            version: Cell::new(version),
            closed: Cell::new(false),
            upgrade: RefCell::new(None),
        })
    }

    pub(crate) fn begin_upgrade(&self, txn: &Rc<TxnState>) {
        *self.upgrade.borrow_mut() = Some(Rc::clone(txn));
    }

    pub(crate) fn end_upgrade(&self) {
        self.upgrade.borrow_mut().take();
    }

    pub(crate) fn set_version(&self, version: u32) {
        self.version.set(version);
    }

    fn upgrade_transaction(&self) -> EngineResult<Rc<TxnState>> {
        let upgrade = self.upgrade.borrow();
        match upgrade.as_ref() {
            Some(txn) if txn.is_active() => Ok(Rc::clone(txn)),
            _ => Err(EngineError::invalid_state(
                "schema changes are only allowed during an upgrade",
            )),
        }
    }
}

impl DatabaseHandle for MemoryDatabase {
    fn name(&self) -> String {
        self.db.name.clone()
    }

    fn version(&self) -> u32 {
        self.version.get()
    }

    fn object_store_names(&self) -> Vec<String> {
        self.db.stores.borrow().keys().cloned().collect()
    }

    fn transaction(
        &self,
        stores: &[&str],
        mode: TransactionMode,
    ) -> EngineResult<Rc<dyn TransactionHandle>> {
        if self.closed.get() {
            return Err(EngineError::invalid_state("connection is closed"));
        }
        if self.upgrade.borrow().as_ref().is_some_and(|txn| txn.is_active()) {
            return Err(EngineError::invalid_state(
                "a version change transaction is running",
            ));
        }
        if mode == TransactionMode::VersionChange {
            return Err(EngineError::Type(
                "version change transactions are created by upgrades only".into(),
            ));
        }
        if stores.is_empty() {
            return Err(EngineError::invalid_access(
                "a transaction needs at least one object store",
            ));
        }

        let known = self.db.stores.borrow();
        let mut scope = Vec::with_capacity(stores.len());
        for name in stores {
            if !known.contains_key(*name) {
                return Err(EngineError::not_found(format!(
                    "object store '{name}' does not exist"
                )));
            }
            scope.push((*name).to_string());
        }
        drop(known);
        scope.sort();
        scope.dedup();

        debug!(db = %self.db.name, ?scope, %mode, "transaction started");
        Ok(MemoryTransaction::new(TxnState::new(&self.db, scope, mode)))
    }

    fn create_object_store(
        &self,
        name: &str,
        params: &StoreParameters,
    ) -> EngineResult<Rc<dyn ObjectStoreHandle>> {
        let txn = self.upgrade_transaction()?;
        if let Some(key_path) = &params.key_path {
            if !key_path.is_valid() {
                return Err(EngineError::data(format!("invalid key path {key_path}")));
            }
            let generatable = matches!(key_path, KeyPath::Single(path) if !path.is_empty());
            if params.auto_increment && !generatable {
                return Err(EngineError::invalid_access(
                    "auto-increment stores need a non-empty single key path",
                ));
            }
        }

        let mut stores = self.db.stores.borrow_mut();
        if stores.contains_key(name) {
            return Err(EngineError::constraint(format!(
                "object store '{name}' already exists"
            )));
        }
        stores.insert(name.to_string(), StoreData::new(params));
        drop(stores);

        debug!(db = %self.db.name, store = name, "object store created");
        Ok(MemoryObjectStore::new(txn, name))
    }

    fn delete_object_store(&self, name: &str) -> EngineResult<()> {
        self.upgrade_transaction()?;
        if self.db.stores.borrow_mut().remove(name).is_none() {
            return Err(EngineError::not_found(format!(
                "object store '{name}' does not exist"
            )));
        }
        debug!(db = %self.db.name, store = name, "object store deleted");
        Ok(())
    }

    fn close(&self) {
        if !self.closed.replace(true) {
            debug!(db = %self.db.name, "connection closed");
            self.db.connection_closed();
        }
    }
}

impl Drop for MemoryDatabase {
    fn drop(&mut self) {
        self.close();
    }
}
