//! Transaction wrapper.

use crate::error::Result;
use crate::request::Request;
use crate::store::ObjectStore;
use idbrx_engine::{TransactionHandle, TransactionMode};
use std::fmt;
use std::rc::Rc;
use tracing::debug;

/// A transaction over a fixed set of stores.
#[derive(Clone)]
pub struct Transaction {
    handle: Rc<dyn TransactionHandle>,
}

impl Transaction {
    pub(crate) fn new(handle: Rc<dyn TransactionHandle>) -> Self {
        Self { handle }
    }

    /// Access mode.
    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        self.handle.mode()
    }

    /// Names of the stores in scope, sorted.
    #[must_use]
    pub fn object_store_names(&self) -> Vec<String> {
        self.handle.object_store_names()
    }

    /// Returns a store in scope.
    ///
    /// # Errors
    ///
    /// Fails immediately if the store is not in scope or the transaction
    /// has finished.
    pub fn object_store(&self, name: &str) -> Result<ObjectStore> {
        Ok(ObjectStore::new(self.handle.object_store(name)?))
    }

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Fails if the transaction has already finished.
    pub fn commit(&self) -> Result<()> {
        debug!(mode = %self.handle.mode(), "committing transaction");
        Ok(self.handle.commit()?)
    }

    /// Aborts the transaction and rolls back its writes.
    ///
    /// # Errors
    ///
    /// Fails if the transaction has already finished.
    pub fn abort(&self) -> Result<()> {
        debug!(mode = %self.handle.mode(), "aborting transaction");
        Ok(self.handle.abort()?)
    }

    /// Resolves once the transaction commits; errors if it aborts.
    pub fn done(&self) -> Request<()> {
        let (request, done) = Request::pending();
        self.handle.on_finish(done);
        request
    }

    /// The engine handle behind this transaction.
    #[must_use]
    pub fn handle(&self) -> &Rc<dyn TransactionHandle> {
        &self.handle
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("mode", &self.handle.mode())
            .field("stores", &self.handle.object_store_names())
            .finish()
    }
}
