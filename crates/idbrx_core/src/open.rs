//! Connection opener.
//!
//! [`Context::open`] builds an [`OpenRequest`]; awaiting it runs the
//! engine's open handshake and resolves with a [`Connection`]. When the
//! requested version is newer than the stored one, the request's upgrade
//! callback runs inside the engine's version-change transaction before the
//! connection is handed out.

use crate::config::Context;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::request::Request;
use crate::store::ObjectStore;
use crate::transaction::Transaction;
use futures::channel::oneshot;
use futures::future::{FutureExt, LocalBoxFuture};
use idbrx_engine::{
    DatabaseHandle, DatabaseInfo, EngineError, EngineResult, OpenCallbacks, StoreParameters,
    TransactionHandle, VersionChange,
};
use std::fmt;
use std::future::IntoFuture;
use std::rc::Rc;
use tracing::{debug, error, warn};

type UpgradeCallback = Box<dyn FnOnce(&Upgrade) -> Result<()>>;

impl Context {
    /// Starts building a request to open the database `name`.
    ///
    /// Nothing is sent to the engine until the request is awaited.
    pub fn open(&self, name: impl Into<String>) -> OpenRequest {
        OpenRequest {
            context: self.clone(),
            name: name.into(),
            version: None,
            on_upgrade: None,
        }
    }

    /// Deletes the database `name`, waiting for open connections to close.
    ///
    /// # Errors
    ///
    /// Resolves to an error if no factory is available or the engine fails
    /// the deletion.
    pub async fn delete_database(&self, name: &str) -> Result<()> {
        let factory = self.factory()?;
        debug!(database = name, "deleting database");
        Request::issue(|done| factory.delete_database(name, done))?.await
    }

    /// Lists the existing databases.
    ///
    /// # Errors
    ///
    /// Resolves to an error if no factory is available or the engine cannot
    /// enumerate databases.
    pub async fn databases(&self) -> Result<Vec<DatabaseInfo>> {
        let factory = self.factory()?;
        Request::issue(|done| factory.databases(done))?.await
    }
}

/// A pending request to open a database.
///
/// Await it (it implements [`IntoFuture`]) to get the [`Connection`].
#[must_use = "an open request does nothing unless awaited"]
pub struct OpenRequest {
    context: Context,
    name: String,
    version: Option<u32>,
    on_upgrade: Option<UpgradeCallback>,
}

impl OpenRequest {
    /// Opens at `version` instead of the current version.
    ///
    /// A version of 0 is rejected by the engine.
    pub fn version(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    /// Sets the callback run when the database must be upgraded.
    ///
    /// It is called at most once, inside the version-change transaction.
    /// Returning an error aborts the upgrade and fails the open.
    pub fn on_upgrade(mut self, callback: impl FnOnce(&Upgrade) -> Result<()> + 'static) -> Self {
        self.on_upgrade = Some(Box::new(callback));
        self
    }

    async fn run(self) -> Result<Connection> {
        let Self {
            context,
            name,
            version,
            on_upgrade,
        } = self;
        let factory = context.factory().inspect_err(|err| {
            error!(database = %name, error = %err, "cannot open database");
        })?;

        let (tx, rx) = oneshot::channel();
        let callbacks = OpenHandshake {
            name: name.clone(),
            on_upgrade,
            change: None,
            upgrade_error: None,
            outcome: tx,
        };
        debug!(database = %name, ?version, "opening database");
        if let Err(err) = factory.open(&name, version, Box::new(callbacks)) {
            error!(database = %name, error = %err, "open request rejected");
            return Err(err.into());
        }

        match rx.await {
            Ok(outcome) => outcome,
            Err(oneshot::Canceled) => {
                error!(database = %name, "engine dropped the open request");
                Err(Error::Canceled)
            }
        }
    }
}

impl IntoFuture for OpenRequest {
    type Output = Result<Connection>;
    type IntoFuture = LocalBoxFuture<'static, Result<Connection>>;

    fn into_future(self) -> Self::IntoFuture {
        self.run().boxed_local()
    }
}

impl fmt::Debug for OpenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenRequest")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("on_upgrade", &self.on_upgrade.is_some())
            .finish()
    }
}

/// Engine callbacks of one open request.
struct OpenHandshake {
    name: String,
    on_upgrade: Option<UpgradeCallback>,
    change: Option<VersionChange>,
    upgrade_error: Option<Error>,
    outcome: oneshot::Sender<Result<Connection>>,
}

impl OpenHandshake {
    fn resolve(self, outcome: Result<Connection>) {
        if self.outcome.send(outcome).is_err() {
            debug!(database = %self.name, "open request abandoned; discarding its result");
        }
    }
}

impl OpenCallbacks for OpenHandshake {
    fn on_upgrade_needed(
        &mut self,
        db: Rc<dyn DatabaseHandle>,
        transaction: Rc<dyn TransactionHandle>,
        change: VersionChange,
    ) -> EngineResult<()> {
        debug!(database = %self.name, %change, "upgrading database");
        self.change = Some(change);
        let Some(callback) = self.on_upgrade.take() else {
            return Ok(());
        };

        let upgrade = Upgrade {
            connection: Connection::new(db),
            transaction: Transaction::new(transaction),
            change,
        };
        callback(&upgrade).map_err(|err| {
            let reason = err.to_string();
            self.upgrade_error = Some(err);
            EngineError::abort(reason)
        })
    }

    fn on_blocked(&mut self, change: VersionChange) {
        warn!(
            database = %self.name,
            %change,
            "upgrade blocked by open connections; waiting for them to close"
        );
    }

    fn on_success(self: Box<Self>, db: Rc<dyn DatabaseHandle>) {
        debug!(database = %self.name, version = db.version(), "database open");
        self.resolve(Ok(Connection::new(db)));
    }

    fn on_error(mut self: Box<Self>, err: EngineError) {
        error!(database = %self.name, error = %err, "failed to open database");
        let outcome = match (self.upgrade_error.take(), self.change) {
            (Some(source), Some(change)) => Error::UpgradeFailed {
                old_version: change.old_version,
                new_version: change.new_version,
                source: Box::new(source),
            },
            _ => Error::Engine(err),
        };
        self.resolve(Err(outcome));
    }
}

/// Access to a database while it is being upgraded.
///
/// Handed to the callback set with [`OpenRequest::on_upgrade`].
pub struct Upgrade {
    connection: Connection,
    transaction: Transaction,
    change: VersionChange,
}

impl Upgrade {
    /// Version stored before the upgrade; 0 for a new database.
    #[must_use]
    pub fn old_version(&self) -> u32 {
        self.change.old_version
    }

    /// Version being upgraded to.
    #[must_use]
    pub fn new_version(&self) -> u32 {
        self.change.new_version
    }

    /// The in-progress connection.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// The version-change transaction.
    #[must_use]
    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Creates a store.
    ///
    /// # Errors
    ///
    /// Fails for a duplicate name or invalid parameters.
    pub fn create_object_store(&self, name: &str, params: StoreParameters) -> Result<ObjectStore> {
        let handle = self
            .connection
            .handle()
            .create_object_store(name, &params)?;
        debug!(store = name, ?params, "object store created");
        Ok(ObjectStore::new(handle))
    }

    /// Deletes a store.
    ///
    /// # Errors
    ///
    /// Fails for an unknown store.
    pub fn delete_object_store(&self, name: &str) -> Result<()> {
        self.connection.handle().delete_object_store(name)?;
        debug!(store = name, "object store deleted");
        Ok(())
    }

    /// Returns an existing store through the version-change transaction.
    ///
    /// # Errors
    ///
    /// Fails for an unknown store.
    pub fn object_store(&self, name: &str) -> Result<ObjectStore> {
        self.transaction.object_store(name)
    }
}

impl fmt::Debug for Upgrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upgrade")
            .field("database", &self.connection.name())
            .field("old_version", &self.change.old_version)
            .field("new_version", &self.change.new_version)
            .finish()
    }
}
