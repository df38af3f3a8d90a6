//! # idbrx Engine
//!
//! Object-store engine abstraction and the in-memory reference engine.
//!
//! This crate describes the storage engine underneath the idbrx adapter:
//! the IndexedDB-shaped request/event model (factories, connections,
//! transactions, stores, indexes and cursors) and the vocabulary those
//! requests speak (keys, key ranges, key paths, directions and modes).
//!
//! ## Design Principles
//!
//! - Engines are single-threaded: handles are `Rc`-based and never `Send`
//! - Synchronous calls fail immediately; accepted requests answer later
//!   through a callback run by the host's event loop
//! - Engines own durability, isolation and transaction lifetime
//!
//! ## Available Engines
//!
//! - [`MemoryFactory`] - In-memory engine for tests and ephemeral use
//!
//! A browser engine over `web-sys` lives in the separate `idbrx_wasm`
//! crate.
//!
//! ## Example
//!
//! ```rust
//! use idbrx_engine::{Key, KeyRange};
//!
//! let range = KeyRange::bound(1, 10, false, true).unwrap();
//! assert!(range.includes(&Key::from(1)));
//! assert!(!range.includes(&Key::from(10)));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod engine;
mod error;
mod event_loop;
mod key;
mod memory;
mod types;

pub use engine::{
    Completion, CursorHandle, CursorSink, DatabaseHandle, Factory, IndexHandle,
    ObjectStoreHandle, OpenCallbacks, TransactionHandle,
};
pub use error::{EngineError, EngineResult};
pub use event_loop::EventLoop;
pub use key::{Key, KeyPath, KeyRange};
pub use memory::MemoryFactory;
pub use serde_json::Value;
pub use types::{
    DatabaseInfo, Direction, IndexParameters, StoreParameters, TransactionMode, VersionChange,
};
