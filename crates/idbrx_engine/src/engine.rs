//! Engine trait definitions.
//!
//! An engine is the storage subsystem that actually persists data, runs
//! transactions and positions cursors. The traits below describe its
//! request/event model: synchronous calls either fail immediately or accept
//! a request, and accepted requests answer later through a callback invoked
//! from the host's event loop.
//!
//! # Invariants
//!
//! - Callbacks are never invoked synchronously from the call that issued
//!   the request.
//! - Callbacks for one request fire in the order the engine generates them.
//! - Every accepted request answers exactly once (cursor requests answer
//!   once per advance).
//!
//! # Implementors
//!
//! - [`super::MemoryFactory`] - In-memory reference engine

use crate::error::{EngineError, EngineResult};
use crate::key::{Key, KeyPath, KeyRange};
use crate::types::{
    DatabaseInfo, Direction, IndexParameters, StoreParameters, TransactionMode, VersionChange,
};
use serde_json::Value;
use std::rc::Rc;

/// One-shot callback receiving the result of an engine request.
pub type Completion<T> = Box<dyn FnOnce(EngineResult<T>)>;

/// Entry point of an engine: opens and deletes databases.
pub trait Factory {
    /// Starts opening `name` at `version`.
    ///
    /// `None` opens the current version, creating the database at version 1
    /// if it does not exist.
    ///
    /// # Errors
    ///
    /// Fails immediately if the request cannot be issued (for example a
    /// version of 0). Otherwise the outcome is reported to `callbacks`.
    fn open(
        &self,
        name: &str,
        version: Option<u32>,
        callbacks: Box<dyn OpenCallbacks>,
    ) -> EngineResult<()>;

    /// Starts deleting the database `name`.
    ///
    /// # Errors
    ///
    /// Fails immediately if the request cannot be issued.
    fn delete_database(&self, name: &str, done: Completion<()>) -> EngineResult<()>;

    /// Lists existing databases.
    ///
    /// # Errors
    ///
    /// Fails immediately if the engine cannot enumerate databases.
    fn databases(&self, done: Completion<Vec<DatabaseInfo>>) -> EngineResult<()>;
}

/// Receives the events of an open request.
pub trait OpenCallbacks {
    /// Called when the requested version exceeds the stored one.
    ///
    /// `db` is the in-progress connection and `transaction` the
    /// version-change transaction in which stores and indexes may be
    /// created. Returning an error aborts the upgrade.
    fn on_upgrade_needed(
        &mut self,
        db: Rc<dyn DatabaseHandle>,
        transaction: Rc<dyn TransactionHandle>,
        change: VersionChange,
    ) -> EngineResult<()>;

    /// Called when other open connections delay an upgrade.
    fn on_blocked(&mut self, change: VersionChange);

    /// Called once with the open connection.
    fn on_success(self: Box<Self>, db: Rc<dyn DatabaseHandle>);

    /// Called once if the open request failed.
    fn on_error(self: Box<Self>, error: EngineError);
}

/// An open connection to a named, versioned database.
pub trait DatabaseHandle {
    /// Database name.
    fn name(&self) -> String;

    /// Version of the database as seen by this connection.
    fn version(&self) -> u32;

    /// Names of the stores, in sorted order.
    fn object_store_names(&self) -> Vec<String>;

    /// Starts a transaction over `stores`.
    ///
    /// # Errors
    ///
    /// - `NotFound` if a store does not exist
    /// - `InvalidAccess` if `stores` is empty
    /// - `InvalidState` if the connection is closed or upgrading
    /// - `Type` if `mode` is [`TransactionMode::VersionChange`]
    fn transaction(
        &self,
        stores: &[&str],
        mode: TransactionMode,
    ) -> EngineResult<Rc<dyn TransactionHandle>>;

    /// Creates a store. Only valid during an upgrade.
    ///
    /// # Errors
    ///
    /// - `InvalidState` outside an upgrade
    /// - `Constraint` if the store exists
    /// - `InvalidAccess` for an auto-increment store with an empty or
    ///   multiple key path
    /// - `Data` for an invalid key path
    fn create_object_store(
        &self,
        name: &str,
        params: &StoreParameters,
    ) -> EngineResult<Rc<dyn ObjectStoreHandle>>;

    /// Deletes a store. Only valid during an upgrade.
    ///
    /// # Errors
    ///
    /// `InvalidState` outside an upgrade, `NotFound` for an unknown store.
    fn delete_object_store(&self, name: &str) -> EngineResult<()>;

    /// Closes the connection once its transactions finish.
    fn close(&self);
}

/// A transaction scoped to a set of stores.
pub trait TransactionHandle {
    /// Access mode.
    fn mode(&self) -> TransactionMode;

    /// Names of the stores in scope, in sorted order.
    fn object_store_names(&self) -> Vec<String>;

    /// Returns a store in scope.
    ///
    /// # Errors
    ///
    /// `NotFound` if the store is not in scope, `InvalidState` if the
    /// transaction has finished.
    fn object_store(&self, name: &str) -> EngineResult<Rc<dyn ObjectStoreHandle>>;

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the transaction has already finished.
    fn commit(&self) -> EngineResult<()>;

    /// Aborts the transaction, rolling back its writes.
    ///
    /// # Errors
    ///
    /// `InvalidState` if the transaction has already finished.
    fn abort(&self) -> EngineResult<()>;

    /// Registers a callback fired when the transaction commits (`Ok`) or
    /// aborts (`Err`).
    fn on_finish(&self, done: Completion<()>);
}

/// A store inside a transaction.
pub trait ObjectStoreHandle {
    /// Store name.
    fn name(&self) -> String;

    /// Inline key path, if any.
    fn key_path(&self) -> Option<KeyPath>;

    /// Whether the store generates keys.
    fn auto_increment(&self) -> bool;

    /// Names of the store's indexes, in sorted order.
    fn index_names(&self) -> Vec<String>;

    /// The transaction this handle belongs to.
    fn transaction(&self) -> Rc<dyn TransactionHandle>;

    /// Returns a named index.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown index.
    fn index(&self, name: &str) -> EngineResult<Rc<dyn IndexHandle>>;

    /// Creates an index. Only valid during an upgrade.
    ///
    /// # Errors
    ///
    /// - `InvalidState` outside an upgrade
    /// - `Constraint` if the index exists or existing records violate
    ///   uniqueness
    /// - `InvalidAccess` for a multi-entry index with a multiple key path
    fn create_index(
        &self,
        name: &str,
        key_path: &KeyPath,
        params: &IndexParameters,
    ) -> EngineResult<Rc<dyn IndexHandle>>;

    /// Deletes an index. Only valid during an upgrade.
    ///
    /// # Errors
    ///
    /// `InvalidState` outside an upgrade, `NotFound` for an unknown index.
    fn delete_index(&self, name: &str) -> EngineResult<()>;

    /// Inserts or replaces a record; completes with its key.
    ///
    /// # Errors
    ///
    /// Fails immediately with `ReadOnly`, `TransactionInactive` or `Data`.
    fn put(&self, value: Value, key: Option<Key>, done: Completion<Key>) -> EngineResult<()>;

    /// Inserts a record that must not exist yet; completes with its key.
    ///
    /// # Errors
    ///
    /// As [`ObjectStoreHandle::put`]; an existing key fails the request with
    /// `Constraint`.
    fn add(&self, value: Value, key: Option<Key>, done: Completion<Key>) -> EngineResult<()>;

    /// Reads the first record in `range`.
    ///
    /// # Errors
    ///
    /// Fails immediately with `TransactionInactive`.
    fn get(&self, range: &KeyRange, done: Completion<Option<Value>>) -> EngineResult<()>;

    /// Deletes every record in `range`.
    ///
    /// # Errors
    ///
    /// Fails immediately with `ReadOnly` or `TransactionInactive`.
    fn delete(&self, range: &KeyRange, done: Completion<()>) -> EngineResult<()>;

    /// Deletes every record.
    ///
    /// # Errors
    ///
    /// Fails immediately with `ReadOnly` or `TransactionInactive`.
    fn clear(&self, done: Completion<()>) -> EngineResult<()>;

    /// Counts records in `range`, or all records.
    ///
    /// # Errors
    ///
    /// Fails immediately with `TransactionInactive`.
    fn count(&self, range: Option<&KeyRange>, done: Completion<u64>) -> EngineResult<()>;

    /// Opens a cursor over the store; positions are reported to `sink`.
    ///
    /// # Errors
    ///
    /// Fails immediately with `TransactionInactive` or `InvalidState`.
    fn open_cursor(
        &self,
        range: Option<&KeyRange>,
        direction: Direction,
        sink: Box<dyn CursorSink>,
    ) -> EngineResult<()>;
}

/// A secondary index of a store.
pub trait IndexHandle {
    /// Index name.
    fn name(&self) -> String;

    /// Key path evaluated against each record.
    fn key_path(&self) -> KeyPath;

    /// Whether index keys are unique.
    fn unique(&self) -> bool;

    /// Whether array keys are indexed element by element.
    fn multi_entry(&self) -> bool;

    /// The store the index belongs to.
    fn object_store(&self) -> Rc<dyn ObjectStoreHandle>;

    /// Reads the first record whose index key lies in `range`.
    ///
    /// # Errors
    ///
    /// Fails immediately with `TransactionInactive`.
    fn get(&self, range: &KeyRange, done: Completion<Option<Value>>) -> EngineResult<()>;

    /// Counts index entries in `range`, or all entries.
    ///
    /// # Errors
    ///
    /// Fails immediately with `TransactionInactive`.
    fn count(&self, range: Option<&KeyRange>, done: Completion<u64>) -> EngineResult<()>;

    /// Opens a cursor over the index; positions are reported to `sink`.
    ///
    /// # Errors
    ///
    /// Fails immediately with `TransactionInactive` or `InvalidState`.
    fn open_cursor(
        &self,
        range: Option<&KeyRange>,
        direction: Direction,
        sink: Box<dyn CursorSink>,
    ) -> EngineResult<()>;
}

/// Receives the position events of a cursor request.
pub trait CursorSink {
    /// Called with the cursor at its next position, or `None` once the
    /// range is exhausted.
    fn on_success(&mut self, cursor: Option<Rc<dyn CursorHandle>>);

    /// Called if positioning failed. No further events follow.
    fn on_error(&mut self, error: EngineError);
}

/// A cursor positioned on a record.
pub trait CursorHandle {
    /// Key at the current position (the index key for index cursors).
    fn key(&self) -> Key;

    /// Primary key of the current record.
    fn primary_key(&self) -> Key;

    /// Value of the current record.
    fn value(&self) -> Value;

    /// Direction the cursor travels in.
    fn direction(&self) -> Direction;

    /// Requests the next position; the sink hears about it later.
    ///
    /// # Errors
    ///
    /// `InvalidState` if an advance is already pending or the cursor is
    /// exhausted, `TransactionInactive` if the transaction finished.
    fn advance(&self) -> EngineResult<()>;
}
