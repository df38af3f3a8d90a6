//! Test fixtures on the memory engine.
//!
//! Provides a context wired to a fresh [`MemoryFactory`] and helpers for
//! setting up databases with known contents.

use futures::StreamExt;
use idbrx_core::{
    Connection, Context, ObjectStore, Record, RecordStream, Result, StoreParameters,
    TransactionMode,
};
use idbrx_engine::{EventLoop, Key, MemoryFactory, Value};
use serde_json::json;
use std::future::IntoFuture;

/// A context backed by its own memory engine.
pub struct TestContext {
    /// The adapter context.
    pub context: Context,
    /// The engine the context opens databases on.
    pub factory: MemoryFactory,
    /// The event loop the engine answers on.
    pub events: EventLoop,
}

impl TestContext {
    /// Creates a context on a fresh memory engine.
    pub fn new() -> Self {
        let factory = MemoryFactory::new();
        let events = factory.event_loop().clone();
        Self {
            context: Context::with_factory(factory.clone()),
            factory,
            events,
        }
    }

    /// Drives `future` to completion on the engine's event loop.
    pub fn block_on<F: IntoFuture>(&self, future: F) -> F::Output {
        self.events.block_on(future)
    }

    /// Opens `name` at version 1 with one out-of-line store holding
    /// `records`, committed before returning.
    ///
    /// # Panics
    ///
    /// Panics if any step fails.
    pub fn seeded(
        &self,
        name: &str,
        store: &str,
        records: impl IntoIterator<Item = (Key, Value)>,
    ) -> Connection {
        let store_name = store.to_string();
        let db = self
            .block_on(
                self.context
                    .open(name)
                    .version(1)
                    .on_upgrade(move |upgrade| {
                        upgrade.create_object_store(&store_name, StoreParameters::new())?;
                        Ok(())
                    }),
            )
            .expect("failed to open seeded database");

        let txn = db
            .transaction(&[store], TransactionMode::ReadWrite)
            .expect("failed to start seeding transaction");
        let target = txn.object_store(store).expect("seeded store missing");
        for (key, value) in records {
            let request = target.put(value, Some(key)).expect("failed to issue put");
            self.block_on(request).expect("put failed");
        }
        let done = txn.done();
        txn.commit().expect("failed to commit seed data");
        self.block_on(done).expect("seed transaction aborted");
        db
    }

    /// Collects a whole walk.
    pub fn collect(&self, stream: RecordStream) -> Vec<Result<Record>> {
        self.block_on(stream.collect())
    }

    /// Collects the keys of a walk, panicking on any error item.
    pub fn keys(&self, stream: RecordStream) -> Vec<Key> {
        self.collect(stream)
            .into_iter()
            .map(|record| record.expect("walk failed").key)
            .collect()
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a test with a fresh [`TestContext`].
///
/// # Example
///
/// ```rust
/// use idbrx_testkit::with_test_context;
///
/// with_test_context(|env| {
///     let names = env.block_on(env.context.databases()).unwrap();
///     assert!(names.is_empty());
/// });
/// ```
pub fn with_test_context<F, R>(f: F) -> R
where
    F: FnOnce(&TestContext) -> R,
{
    let env = TestContext::new();
    f(&env)
}

/// Records keyed `1..=count` with values `{"n": key}`.
pub fn numbered_records(count: u32) -> Vec<(Key, Value)> {
    (1..=count)
        .map(|n| (Key::from(n), json!({ "n": n })))
        .collect()
}

/// Opens a read-only transaction on `store` and returns the store.
///
/// # Panics
///
/// Panics if the store does not exist.
pub fn read_store(db: &Connection, store: &str) -> ObjectStore {
    db.transaction(&[store], TransactionMode::ReadOnly)
        .and_then(|txn| txn.object_store(store))
        .expect("failed to open store for reading")
}
