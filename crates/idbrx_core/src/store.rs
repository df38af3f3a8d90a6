//! Object store and index wrappers.
//!
//! Every method delegates to the engine. Lookups and argument checks fail
//! synchronously; data requests return a [`Request`] resolving with the
//! engine's answer, and walks return a lazy [`RecordStream`].

use crate::cursor::{CursorSource, RecordStream};
use crate::error::Result;
use crate::request::Request;
use crate::transaction::Transaction;
use idbrx_engine::{
    Direction, IndexHandle, IndexParameters, Key, KeyPath, KeyRange, ObjectStoreHandle, Value,
};
use std::fmt;
use std::rc::Rc;
use tracing::debug;

/// A store inside a transaction.
#[derive(Clone)]
pub struct ObjectStore {
    handle: Rc<dyn ObjectStoreHandle>,
}

impl ObjectStore {
    pub(crate) fn new(handle: Rc<dyn ObjectStoreHandle>) -> Self {
        Self { handle }
    }

    /// Store name.
    #[must_use]
    pub fn name(&self) -> String {
        self.handle.name()
    }

    /// Inline key path, if the store has one.
    #[must_use]
    pub fn key_path(&self) -> Option<KeyPath> {
        self.handle.key_path()
    }

    /// Whether the store generates keys.
    #[must_use]
    pub fn auto_increment(&self) -> bool {
        self.handle.auto_increment()
    }

    /// Names of the store's indexes, sorted.
    #[must_use]
    pub fn index_names(&self) -> Vec<String> {
        self.handle.index_names()
    }

    /// The transaction this store belongs to.
    #[must_use]
    pub fn transaction(&self) -> Transaction {
        Transaction::new(self.handle.transaction())
    }

    /// Returns a named index.
    ///
    /// # Errors
    ///
    /// Fails immediately for an unknown index.
    pub fn index(&self, name: &str) -> Result<Index> {
        Ok(Index::new(self.handle.index(name)?))
    }

    /// Creates an index. Only valid inside an upgrade.
    ///
    /// # Errors
    ///
    /// Fails immediately outside an upgrade, for a duplicate name, or when
    /// existing records violate a unique index.
    pub fn create_index(
        &self,
        name: &str,
        key_path: impl Into<KeyPath>,
        params: IndexParameters,
    ) -> Result<Index> {
        let key_path = key_path.into();
        let handle = self.handle.create_index(name, &key_path, &params)?;
        debug!(store = %self.handle.name(), index = name, %key_path, "index created");
        Ok(Index::new(handle))
    }

    /// Deletes an index. Only valid inside an upgrade.
    ///
    /// # Errors
    ///
    /// Fails immediately outside an upgrade or for an unknown index.
    pub fn delete_index(&self, name: &str) -> Result<()> {
        self.handle.delete_index(name)?;
        debug!(store = %self.handle.name(), index = name, "index deleted");
        Ok(())
    }

    /// Inserts or replaces a record; resolves with its key.
    ///
    /// `key` must be `None` for stores with a key path.
    ///
    /// # Errors
    ///
    /// Fails immediately in a read-only or finished transaction, or when
    /// the key cannot be determined.
    pub fn put(&self, value: Value, key: Option<Key>) -> Result<Request<Key>> {
        Request::issue(|done| self.handle.put(value, key, done))
    }

    /// Inserts a record whose key must not exist yet; resolves with its key.
    ///
    /// # Errors
    ///
    /// As [`ObjectStore::put`]. An existing key fails the request itself.
    pub fn add(&self, value: Value, key: Option<Key>) -> Result<Request<Key>> {
        Request::issue(|done| self.handle.add(value, key, done))
    }

    /// Reads the record stored under `key`.
    ///
    /// # Errors
    ///
    /// Fails immediately for an invalid key or a finished transaction.
    pub fn get(&self, key: impl Into<Key>) -> Result<Request<Option<Value>>> {
        let range = KeyRange::only(key)?;
        self.get_first(&range)
    }

    /// Reads the first record in `range`.
    ///
    /// # Errors
    ///
    /// Fails immediately if the transaction has finished.
    pub fn get_first(&self, range: &KeyRange) -> Result<Request<Option<Value>>> {
        Request::issue(|done| self.handle.get(range, done))
    }

    /// Deletes the record stored under `key`.
    ///
    /// # Errors
    ///
    /// Fails immediately for an invalid key or in a read-only or finished
    /// transaction.
    pub fn delete(&self, key: impl Into<Key>) -> Result<Request<()>> {
        let range = KeyRange::only(key)?;
        self.delete_range(&range)
    }

    /// Deletes every record in `range`.
    ///
    /// # Errors
    ///
    /// Fails immediately in a read-only or finished transaction.
    pub fn delete_range(&self, range: &KeyRange) -> Result<Request<()>> {
        Request::issue(|done| self.handle.delete(range, done))
    }

    /// Deletes every record.
    ///
    /// # Errors
    ///
    /// Fails immediately in a read-only or finished transaction.
    pub fn clear(&self) -> Result<Request<()>> {
        Request::issue(|done| self.handle.clear(done))
    }

    /// Counts the records in `range`, or all records.
    ///
    /// # Errors
    ///
    /// Fails immediately if the transaction has finished.
    pub fn count(&self, range: Option<&KeyRange>) -> Result<Request<u64>> {
        Request::issue(|done| self.handle.count(range, done))
    }

    /// Walks the records in `range` in `direction` (default ascending).
    ///
    /// The cursor is opened when the stream is first polled.
    #[must_use]
    pub fn open_cursor(
        &self,
        range: Option<KeyRange>,
        direction: Option<Direction>,
    ) -> RecordStream {
        RecordStream::new(
            CursorSource::Store(Rc::clone(&self.handle)),
            range,
            direction.unwrap_or_default(),
        )
    }

    /// The engine handle behind this store.
    #[must_use]
    pub fn handle(&self) -> &Rc<dyn ObjectStoreHandle> {
        &self.handle
    }
}

impl fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStore")
            .field("name", &self.handle.name())
            .field("key_path", &self.handle.key_path())
            .field("auto_increment", &self.handle.auto_increment())
            .finish()
    }
}

/// A secondary index of a store.
#[derive(Clone)]
pub struct Index {
    handle: Rc<dyn IndexHandle>,
}

impl Index {
    pub(crate) fn new(handle: Rc<dyn IndexHandle>) -> Self {
        Self { handle }
    }

    /// Index name.
    #[must_use]
    pub fn name(&self) -> String {
        self.handle.name()
    }

    /// Key path evaluated against each record.
    #[must_use]
    pub fn key_path(&self) -> KeyPath {
        self.handle.key_path()
    }

    /// Whether index keys are unique.
    #[must_use]
    pub fn unique(&self) -> bool {
        self.handle.unique()
    }

    /// Whether array keys are indexed element by element.
    #[must_use]
    pub fn multi_entry(&self) -> bool {
        self.handle.multi_entry()
    }

    /// The store this index belongs to.
    #[must_use]
    pub fn object_store(&self) -> ObjectStore {
        ObjectStore::new(self.handle.object_store())
    }

    /// Reads the first record whose index key equals `key`.
    ///
    /// # Errors
    ///
    /// Fails immediately for an invalid key or a finished transaction.
    pub fn get(&self, key: impl Into<Key>) -> Result<Request<Option<Value>>> {
        let range = KeyRange::only(key)?;
        self.get_first(&range)
    }

    /// Reads the first record whose index key lies in `range`.
    ///
    /// # Errors
    ///
    /// Fails immediately if the transaction has finished.
    pub fn get_first(&self, range: &KeyRange) -> Result<Request<Option<Value>>> {
        Request::issue(|done| self.handle.get(range, done))
    }

    /// Counts the index entries in `range`, or all entries.
    ///
    /// # Errors
    ///
    /// Fails immediately if the transaction has finished.
    pub fn count(&self, range: Option<&KeyRange>) -> Result<Request<u64>> {
        Request::issue(|done| self.handle.count(range, done))
    }

    /// Walks the index entries in `range` in `direction`.
    ///
    /// Records from an index walk carry the primary key alongside the
    /// index key.
    #[must_use]
    pub fn open_cursor(
        &self,
        range: Option<KeyRange>,
        direction: Option<Direction>,
    ) -> RecordStream {
        RecordStream::new(
            CursorSource::Index(Rc::clone(&self.handle)),
            range,
            direction.unwrap_or_default(),
        )
    }

    /// The engine handle behind this index.
    #[must_use]
    pub fn handle(&self) -> &Rc<dyn IndexHandle> {
        &self.handle
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index")
            .field("name", &self.handle.name())
            .field("key_path", &self.handle.key_path())
            .field("unique", &self.handle.unique())
            .field("multi_entry", &self.handle.multi_entry())
            .finish()
    }
}
