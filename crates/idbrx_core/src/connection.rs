//! Database connection wrapper.

use crate::error::Result;
use crate::transaction::Transaction;
use idbrx_engine::{DatabaseHandle, TransactionMode};
use std::fmt;
use std::rc::Rc;
use tracing::debug;

/// An open connection to a database.
///
/// Produced by [`crate::OpenRequest`]. Cloning yields another handle to the
/// same connection.
#[derive(Clone)]
pub struct Connection {
    handle: Rc<dyn DatabaseHandle>,
}

impl Connection {
    pub(crate) fn new(handle: Rc<dyn DatabaseHandle>) -> Self {
        Self { handle }
    }

    /// Database name.
    #[must_use]
    pub fn name(&self) -> String {
        self.handle.name()
    }

    /// Database version.
    #[must_use]
    pub fn version(&self) -> u32 {
        self.handle.version()
    }

    /// Names of the database's stores, sorted.
    #[must_use]
    pub fn object_store_names(&self) -> Vec<String> {
        self.handle.object_store_names()
    }

    /// Starts a transaction over `stores`.
    ///
    /// # Errors
    ///
    /// Fails immediately if a store does not exist, `stores` is empty, the
    /// connection is closed, or `mode` is `VersionChange`.
    pub fn transaction(&self, stores: &[&str], mode: TransactionMode) -> Result<Transaction> {
        let handle = self.handle.transaction(stores, mode)?;
        debug!(database = %self.handle.name(), ?stores, %mode, "transaction started");
        Ok(Transaction::new(handle))
    }

    /// Closes the connection once its transactions finish.
    pub fn close(&self) {
        debug!(database = %self.handle.name(), "closing connection");
        self.handle.close();
    }

    /// The engine handle behind this connection.
    #[must_use]
    pub fn handle(&self) -> &Rc<dyn DatabaseHandle> {
        &self.handle
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.handle.name())
            .field("version", &self.handle.version())
            .finish()
    }
}
