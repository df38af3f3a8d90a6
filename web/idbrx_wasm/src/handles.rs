//! Engine handles over the browser's IndexedDB objects.

use crate::convert::{
    direction_to_js, key_from_js, key_path_from_js, key_path_to_js, key_to_js, mode_from_js,
    mode_to_js, query, range_to_js, string_list, value_from_js, value_to_js,
};
use crate::cursor;
use crate::error::dom_error;
use crate::request::{answer, ignore};
use idbrx_engine::{
    Completion, CursorSink, DatabaseHandle, Direction, EngineError, EngineResult, IndexHandle,
    IndexParameters, Key, KeyPath, KeyRange, ObjectStoreHandle, StoreParameters,
    TransactionHandle, TransactionMode, Value,
};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::debug;
use wasm_bindgen::closure::Closure;
use wasm_bindgen::{JsCast, JsValue};
use web_sys::{
    Event, IdbDatabase, IdbIndex, IdbIndexParameters, IdbObjectStore, IdbObjectStoreParameters,
    IdbTransaction,
};

/// A connection wrapping an `IDBDatabase`.
pub(crate) struct WebDatabase {
    db: IdbDatabase,
}

impl WebDatabase {
    pub(crate) fn new(db: IdbDatabase) -> Self {
        Self { db }
    }
}

impl DatabaseHandle for WebDatabase {
    fn name(&self) -> String {
        self.db.name()
    }

    fn version(&self) -> u32 {
        self.db.version() as u32
    }

    fn object_store_names(&self) -> Vec<String> {
        string_list(&self.db.object_store_names())
    }

    fn transaction(
        &self,
        stores: &[&str],
        mode: TransactionMode,
    ) -> EngineResult<Rc<dyn TransactionHandle>> {
        if mode == TransactionMode::VersionChange {
            return Err(EngineError::Type(
                "version change transactions are created by upgrades".into(),
            ));
        }
        let scope: js_sys::Array = stores.iter().map(|s| JsValue::from_str(s)).collect();
        let transaction = self
            .db
            .transaction_with_str_sequence_and_mode(&scope, mode_to_js(mode))
            .map_err(dom_error)?;
        Ok(Rc::new(WebTransaction::new(transaction)))
    }

    fn create_object_store(
        &self,
        name: &str,
        params: &StoreParameters,
    ) -> EngineResult<Rc<dyn ObjectStoreHandle>> {
        let options = IdbObjectStoreParameters::new();
        if let Some(key_path) = &params.key_path {
            options.set_key_path(&key_path_to_js(key_path));
        }
        options.set_auto_increment(params.auto_increment);
        let store = self
            .db
            .create_object_store_with_optional_parameters(name, &options)
            .map_err(dom_error)?;
        Ok(Rc::new(WebObjectStore::new(store)))
    }

    fn delete_object_store(&self, name: &str) -> EngineResult<()> {
        self.db.delete_object_store(name).map_err(dom_error)
    }

    fn close(&self) {
        debug!(db = %self.db.name(), "closing IndexedDB connection");
        self.db.close();
    }
}

/// A transaction wrapping an `IDBTransaction`.
pub(crate) struct WebTransaction {
    transaction: IdbTransaction,
}

impl WebTransaction {
    pub(crate) fn new(transaction: IdbTransaction) -> Self {
        Self { transaction }
    }

    fn listen(&self, event: &str, handler: Closure<dyn FnMut(Event)>) {
        if let Err(err) = self
            .transaction
            .add_event_listener_with_callback(event, handler.as_ref().unchecked_ref())
        {
            tracing::error!(event, error = ?err, "failed to listen for transaction event");
        }
        handler.forget();
    }
}

impl TransactionHandle for WebTransaction {
    fn mode(&self) -> TransactionMode {
        self.transaction
            .mode()
            .map(mode_from_js)
            .unwrap_or(TransactionMode::ReadOnly)
    }

    fn object_store_names(&self) -> Vec<String> {
        string_list(&self.transaction.object_store_names())
    }

    fn object_store(&self, name: &str) -> EngineResult<Rc<dyn ObjectStoreHandle>> {
        let store = self.transaction.object_store(name).map_err(dom_error)?;
        Ok(Rc::new(WebObjectStore::new(store)))
    }

    fn commit(&self) -> EngineResult<()> {
        self.transaction.commit().map_err(dom_error)
    }

    fn abort(&self) -> EngineResult<()> {
        self.transaction.abort().map_err(dom_error)
    }

    fn on_finish(&self, done: Completion<()>) {
        let done = Rc::new(RefCell::new(Some(done)));

        let completed = Rc::clone(&done);
        self.listen(
            "complete",
            Closure::new(move |_event: Event| {
                let done = completed.borrow_mut().take();
                if let Some(done) = done {
                    done(Ok(()));
                }
            }),
        );

        let transaction = self.transaction.clone();
        self.listen(
            "abort",
            Closure::new(move |_event: Event| {
                let err = match transaction.error() {
                    Some(exception) => {
                        EngineError::from_dom(&exception.name(), &exception.message())
                    }
                    None => EngineError::abort("transaction was aborted"),
                };
                let done = done.borrow_mut().take();
                if let Some(done) = done {
                    done(Err(err));
                }
            }),
        );
    }
}

/// A store wrapping an `IDBObjectStore`.
pub(crate) struct WebObjectStore {
    store: IdbObjectStore,
}

impl WebObjectStore {
    pub(crate) fn new(store: IdbObjectStore) -> Self {
        Self { store }
    }

    fn store_record(
        &self,
        value: &Value,
        key: Option<Key>,
        overwrite: bool,
        done: Completion<Key>,
    ) -> EngineResult<()> {
        let value = value_to_js(value)?;
        let request = match (key.map(|k| k.validated()).transpose()?, overwrite) {
            (Some(key), true) => self.store.put_with_key(&value, &key_to_js(&key)),
            (Some(key), false) => self.store.add_with_key(&value, &key_to_js(&key)),
            (None, true) => self.store.put(&value),
            (None, false) => self.store.add(&value),
        }
        .map_err(dom_error)?;
        answer(&request, |key| key_from_js(&key), done);
        Ok(())
    }
}

impl ObjectStoreHandle for WebObjectStore {
    fn name(&self) -> String {
        self.store.name()
    }

    fn key_path(&self) -> Option<KeyPath> {
        self.store
            .key_path()
            .ok()
            .and_then(|path| key_path_from_js(&path))
    }

    fn auto_increment(&self) -> bool {
        self.store.auto_increment()
    }

    fn index_names(&self) -> Vec<String> {
        string_list(&self.store.index_names())
    }

    fn transaction(&self) -> Rc<dyn TransactionHandle> {
        Rc::new(WebTransaction::new(self.store.transaction()))
    }

    fn index(&self, name: &str) -> EngineResult<Rc<dyn IndexHandle>> {
        let index = self.store.index(name).map_err(dom_error)?;
        Ok(Rc::new(WebIndex::new(index)))
    }

    fn create_index(
        &self,
        name: &str,
        key_path: &KeyPath,
        params: &IndexParameters,
    ) -> EngineResult<Rc<dyn IndexHandle>> {
        let options = IdbIndexParameters::new();
        options.set_unique(params.unique);
        options.set_multi_entry(params.multi_entry);
        let index = self
            .store
            .create_index_with_str_sequence_and_optional_parameters(
                name,
                &key_path_to_js(key_path),
                &options,
            )
            .map_err(dom_error)?;
        Ok(Rc::new(WebIndex::new(index)))
    }

    fn delete_index(&self, name: &str) -> EngineResult<()> {
        self.store.delete_index(name).map_err(dom_error)
    }

    fn put(&self, value: Value, key: Option<Key>, done: Completion<Key>) -> EngineResult<()> {
        self.store_record(&value, key, true, done)
    }

    fn add(&self, value: Value, key: Option<Key>, done: Completion<Key>) -> EngineResult<()> {
        self.store_record(&value, key, false, done)
    }

    fn get(&self, range: &KeyRange, done: Completion<Option<Value>>) -> EngineResult<()> {
        let request = self.store.get(&range_to_js(range)?).map_err(dom_error)?;
        answer(&request, read_optional_value, done);
        Ok(())
    }

    fn delete(&self, range: &KeyRange, done: Completion<()>) -> EngineResult<()> {
        let request = self.store.delete(&range_to_js(range)?).map_err(dom_error)?;
        answer(&request, ignore, done);
        Ok(())
    }

    fn clear(&self, done: Completion<()>) -> EngineResult<()> {
        let request = self.store.clear().map_err(dom_error)?;
        answer(&request, ignore, done);
        Ok(())
    }

    fn count(&self, range: Option<&KeyRange>, done: Completion<u64>) -> EngineResult<()> {
        let request = self
            .store
            .count_with_key(&query(range)?)
            .map_err(dom_error)?;
        answer(&request, read_count, done);
        Ok(())
    }

    fn open_cursor(
        &self,
        range: Option<&KeyRange>,
        direction: Direction,
        sink: Box<dyn CursorSink>,
    ) -> EngineResult<()> {
        let request = self
            .store
            .open_cursor_with_range_and_direction(&query(range)?, direction_to_js(direction))
            .map_err(dom_error)?;
        cursor::watch(&request, sink);
        Ok(())
    }
}

/// An index wrapping an `IDBIndex`.
pub(crate) struct WebIndex {
    index: IdbIndex,
}

impl WebIndex {
    pub(crate) fn new(index: IdbIndex) -> Self {
        Self { index }
    }
}

impl IndexHandle for WebIndex {
    fn name(&self) -> String {
        self.index.name()
    }

    fn key_path(&self) -> KeyPath {
        self.index
            .key_path()
            .ok()
            .and_then(|path| key_path_from_js(&path))
            .unwrap_or_else(|| KeyPath::Single(String::new()))
    }

    fn unique(&self) -> bool {
        self.index.unique()
    }

    fn multi_entry(&self) -> bool {
        self.index.multi_entry()
    }

    fn object_store(&self) -> Rc<dyn ObjectStoreHandle> {
        Rc::new(WebObjectStore::new(self.index.object_store()))
    }

    fn get(&self, range: &KeyRange, done: Completion<Option<Value>>) -> EngineResult<()> {
        let request = self.index.get(&range_to_js(range)?).map_err(dom_error)?;
        answer(&request, read_optional_value, done);
        Ok(())
    }

    fn count(&self, range: Option<&KeyRange>, done: Completion<u64>) -> EngineResult<()> {
        let request = self
            .index
            .count_with_key(&query(range)?)
            .map_err(dom_error)?;
        answer(&request, read_count, done);
        Ok(())
    }

    fn open_cursor(
        &self,
        range: Option<&KeyRange>,
        direction: Direction,
        sink: Box<dyn CursorSink>,
    ) -> EngineResult<()> {
        let request = self
            .index
            .open_cursor_with_range_and_direction(&query(range)?, direction_to_js(direction))
            .map_err(dom_error)?;
        cursor::watch(&request, sink);
        Ok(())
    }
}

fn read_optional_value(value: JsValue) -> EngineResult<Option<Value>> {
    if value.is_undefined() {
        Ok(None)
    } else {
        value_from_js(value).map(Some)
    }
}

fn read_count(value: JsValue) -> EngineResult<u64> {
    value
        .as_f64()
        .map(|count| count as u64)
        .ok_or_else(|| EngineError::Unknown("count did not return a number".into()))
}
