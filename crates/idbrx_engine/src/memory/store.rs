//! In-memory object store and index handles.

use super::cursor::{CursorSource, MemoryCursor};
use super::state::{IndexData, StoreData};
use super::transaction::{MemoryTransaction, TxnState};
use crate::engine::{Completion, CursorSink, IndexHandle, ObjectStoreHandle, TransactionHandle};
use crate::error::{EngineError, EngineResult};
use crate::key::{Key, KeyPath, KeyRange};
use crate::types::{Direction, IndexParameters};
use serde_json::Value;
use std::rc::Rc;
use tracing::debug;

/// A store as seen through one transaction.
pub(crate) struct MemoryObjectStore {
    txn: Rc<TxnState>,
    name: String,
}

impl MemoryObjectStore {
    pub(crate) fn new(txn: Rc<TxnState>, name: &str) -> Rc<Self> {
        Rc::new(Self {
            txn,
            name: name.to_string(),
        })
    }

    fn read<R>(&self, f: impl FnOnce(&StoreData) -> R) -> EngineResult<R> {
        let stores = self.txn.db.stores.borrow();
        let store = stores.get(&self.name).ok_or_else(|| self.deleted())?;
        Ok(f(store))
    }

    fn write<R>(&self, f: impl FnOnce(&mut StoreData) -> EngineResult<R>) -> EngineResult<R> {
        let mut stores = self.txn.db.stores.borrow_mut();
        let store = stores.get_mut(&self.name).ok_or_else(|| self.deleted())?;
        f(store)
    }

    fn deleted(&self) -> EngineError {
        EngineError::invalid_state(format!("object store '{}' has been deleted", self.name))
    }

    fn store_record(
        &self,
        mut value: Value,
        key: Option<Key>,
        overwrite: bool,
        done: Completion<Key>,
    ) -> EngineResult<()> {
        self.txn.ensure_writable()?;
        let outcome = self.write(|store| {
            let generator = store.generator();
            let key = store.resolve_key(&mut value, key).inspect_err(|_| {
                store.restore_generator(generator);
            })?;
            let clash = if !overwrite && store.records.contains_key(&key) {
                Some(format!("a record with key {key} already exists"))
            } else {
                store
                    .unique_violation(&key, &value)
                    .map(|index| format!("unique index '{index}' already holds this key"))
            };
            if let Some(message) = clash {
                store.restore_generator(generator);
                return Ok(Err(EngineError::constraint(message)));
            }
            let previous = store.write(key.clone(), Some(value));
            Ok(Ok((key, previous, generator)))
        })?;

        // Key problems fail the call; constraint problems fail the request.
        let result = outcome.map(|(key, previous, generator)| {
            self.txn.record_undo(&self.name, key.clone(), previous, generator);
            key
        });
        self.txn.db.answer(done, result);
        Ok(())
    }

    fn remove_keys(&self, keys: Vec<Key>) -> EngineResult<()> {
        self.write(|store| {
            let generator = store.generator();
            for key in keys {
                let previous = store.write(key.clone(), None);
                self.txn.record_undo(&self.name, key, previous, generator);
            }
            Ok(())
        })
    }
}

impl ObjectStoreHandle for MemoryObjectStore {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn key_path(&self) -> Option<KeyPath> {
        self.read(|store| store.key_path.clone()).ok().flatten()
    }

    fn auto_increment(&self) -> bool {
        self.read(|store| store.auto_increment).unwrap_or(false)
    }

    fn index_names(&self) -> Vec<String> {
        self.read(|store| store.indexes.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn transaction(&self) -> Rc<dyn TransactionHandle> {
        MemoryTransaction::new(Rc::clone(&self.txn))
    }

    fn index(&self, name: &str) -> EngineResult<Rc<dyn IndexHandle>> {
        if !self.txn.is_active() {
            return Err(EngineError::invalid_state("transaction has finished"));
        }
        if !self.read(|store| store.indexes.contains_key(name))? {
            return Err(EngineError::not_found(format!(
                "index '{name}' does not exist on '{}'",
                self.name
            )));
        }
        Ok(MemoryIndex::new(Rc::clone(&self.txn), &self.name, name))
    }

    fn create_index(
        &self,
        name: &str,
        key_path: &KeyPath,
        params: &IndexParameters,
    ) -> EngineResult<Rc<dyn IndexHandle>> {
        self.txn.ensure_version_change()?;
        if !key_path.is_valid() {
            return Err(EngineError::data(format!("invalid key path {key_path}")));
        }
        if params.multi_entry && matches!(key_path, KeyPath::Multiple(_)) {
            return Err(EngineError::invalid_access(
                "a multi-entry index cannot use a multiple key path",
            ));
        }
        self.write(|store| {
            if store.indexes.contains_key(name) {
                return Err(EngineError::constraint(format!(
                    "index '{name}' already exists"
                )));
            }
            let index = IndexData::build(name, key_path, params, &store.records)?;
            store.indexes.insert(name.to_string(), index);
            Ok(())
        })?;
        debug!(store = %self.name, index = name, "index created");
        Ok(MemoryIndex::new(Rc::clone(&self.txn), &self.name, name))
    }

    fn delete_index(&self, name: &str) -> EngineResult<()> {
        self.txn.ensure_version_change()?;
        self.write(|store| {
            store
                .indexes
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| EngineError::not_found(format!("index '{name}' does not exist")))
        })
    }

    fn put(&self, value: Value, key: Option<Key>, done: Completion<Key>) -> EngineResult<()> {
        self.store_record(value, key, true, done)
    }

    fn add(&self, value: Value, key: Option<Key>, done: Completion<Key>) -> EngineResult<()> {
        self.store_record(value, key, false, done)
    }

    fn get(&self, range: &KeyRange, done: Completion<Option<Value>>) -> EngineResult<()> {
        self.txn.ensure_active()?;
        let value = self.read(|store| {
            store
                .records
                .range::<Key, _>(range.clone())
                .next()
                .map(|(_, v)| v.clone())
        })?;
        self.txn.db.answer(done, Ok(value));
        Ok(())
    }

    fn delete(&self, range: &KeyRange, done: Completion<()>) -> EngineResult<()> {
        self.txn.ensure_writable()?;
        let keys = self.read(|store| store.keys_in(Some(range)))?;
        self.remove_keys(keys)?;
        self.txn.db.answer(done, Ok(()));
        Ok(())
    }

    fn clear(&self, done: Completion<()>) -> EngineResult<()> {
        self.txn.ensure_writable()?;
        let keys = self.read(|store| store.keys_in(None))?;
        self.remove_keys(keys)?;
        self.txn.db.answer(done, Ok(()));
        Ok(())
    }

    fn count(&self, range: Option<&KeyRange>, done: Completion<u64>) -> EngineResult<()> {
        self.txn.ensure_active()?;
        let count = self.read(|store| store.keys_in(range).len() as u64)?;
        self.txn.db.answer(done, Ok(count));
        Ok(())
    }

    fn open_cursor(
        &self,
        range: Option<&KeyRange>,
        direction: Direction,
        sink: Box<dyn CursorSink>,
    ) -> EngineResult<()> {
        self.read(|_| ())?;
        MemoryCursor::open(
            Rc::clone(&self.txn),
            &self.name,
            CursorSource::Store,
            range.cloned(),
            direction,
            sink,
        )
    }
}

/// An index as seen through one transaction.
pub(crate) struct MemoryIndex {
    txn: Rc<TxnState>,
    store: String,
    name: String,
}

impl MemoryIndex {
    fn new(txn: Rc<TxnState>, store: &str, name: &str) -> Rc<Self> {
        Rc::new(Self {
            txn,
            store: store.to_string(),
            name: name.to_string(),
        })
    }

    fn read<R>(&self, f: impl FnOnce(&StoreData, &IndexData) -> R) -> EngineResult<R> {
        let stores = self.txn.db.stores.borrow();
        let index = stores
            .get(&self.store)
            .and_then(|store| store.indexes.get(&self.name).map(|index| (store, index)));
        match index {
            Some((store, index)) => Ok(f(store, index)),
            None => Err(EngineError::invalid_state(format!(
                "index '{}' has been deleted",
                self.name
            ))),
        }
    }
}

impl IndexHandle for MemoryIndex {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn key_path(&self) -> KeyPath {
        self.read(|_, index| index.key_path.clone())
            .unwrap_or_else(|_| KeyPath::Single(String::new()))
    }

    fn unique(&self) -> bool {
        self.read(|_, index| index.unique).unwrap_or(false)
    }

    fn multi_entry(&self) -> bool {
        self.read(|_, index| index.multi_entry).unwrap_or(false)
    }

    fn object_store(&self) -> Rc<dyn ObjectStoreHandle> {
        MemoryObjectStore::new(Rc::clone(&self.txn), &self.store)
    }

    fn get(&self, range: &KeyRange, done: Completion<Option<Value>>) -> EngineResult<()> {
        self.txn.ensure_active()?;
        let value = self.read(|store, index| {
            index
                .entries
                .range::<Key, _>(range.clone())
                .next()
                .and_then(|(_, owners)| owners.first())
                .and_then(|primary_key| store.records.get(primary_key).cloned())
        })?;
        self.txn.db.answer(done, Ok(value));
        Ok(())
    }

    fn count(&self, range: Option<&KeyRange>, done: Completion<u64>) -> EngineResult<()> {
        self.txn.ensure_active()?;
        let count = self.read(|_, index| index.count(range))?;
        self.txn.db.answer(done, Ok(count));
        Ok(())
    }

    fn open_cursor(
        &self,
        range: Option<&KeyRange>,
        direction: Direction,
        sink: Box<dyn CursorSink>,
    ) -> EngineResult<()> {
        self.read(|_, _| ())?;
        MemoryCursor::open(
            Rc::clone(&self.txn),
            &self.store,
            CursorSource::Index(self.name.clone()),
            range.cloned(),
            direction,
            sink,
        )
    }
}
