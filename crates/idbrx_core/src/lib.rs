//! # idbrx Core
//!
//! Futures and streams over an IndexedDB-style object-store engine.
//!
//! This crate provides:
//! - [`Context`] holding the engine factory, with late substitution
//! - [`OpenRequest`] resolving to a [`Connection`], running an upgrade
//!   callback when the stored version is older than the requested one
//! - [`Connection`], [`Transaction`], [`ObjectStore`] and [`Index`]
//!   wrappers delegating to the engine
//! - [`RecordStream`], a lazy and cancellable walk over a cursor
//!
//! ## Example
//!
//! ```rust
//! use futures::StreamExt;
//! use idbrx_core::{Context, MemoryFactory, StoreParameters, TransactionMode};
//! use serde_json::json;
//!
//! let factory = MemoryFactory::new();
//! let events = factory.event_loop().clone();
//! let context = Context::with_factory(factory);
//!
//! events.block_on(async {
//!     let db = context
//!         .open("app")
//!         .version(1)
//!         .on_upgrade(|upgrade| {
//!             upgrade.create_object_store("notes", StoreParameters::new())?;
//!             Ok(())
//!         })
//!         .await?;
//!
//!     let txn = db.transaction(&["notes"], TransactionMode::ReadWrite)?;
//!     let notes = txn.object_store("notes")?;
//!     notes.put(json!("hello"), Some(1.into()))?.await?;
//!
//!     let records: Vec<_> = notes.open_cursor(None, None).collect().await;
//!     assert_eq!(records.len(), 1);
//!     Ok::<_, idbrx_core::Error>(())
//! })
//! .unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connection;
mod cursor;
mod error;
mod open;
mod request;
mod store;
mod transaction;

pub use config::{Config, Context, HostFactory};
pub use connection::Connection;
pub use cursor::{Record, RecordStream};
pub use error::{Error, Result};
pub use open::{OpenRequest, Upgrade};
pub use request::Request;
pub use store::{Index, ObjectStore};
pub use transaction::Transaction;

pub use idbrx_engine as engine;
pub use idbrx_engine::{
    DatabaseInfo, Direction, EngineError, EventLoop, Factory, IndexParameters, Key, KeyPath,
    KeyRange, MemoryFactory, StoreParameters, TransactionMode, Value,
};
