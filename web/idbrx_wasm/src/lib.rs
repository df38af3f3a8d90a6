//! # idbrx WASM
//!
//! The browser's IndexedDB as an idbrx engine.
//!
//! This crate provides:
//! - [`WebFactory`], implementing the engine traits over `web-sys`
//! - [`host_factory`], resolving `indexedDB` from the window or worker scope
//! - [`context`], an adapter context that falls back to the host factory
//!
//! ## Usage
//!
//! ```rust,ignore
//! use futures::StreamExt;
//! use idbrx_core::{StoreParameters, TransactionMode};
//!
//! let context = idbrx_wasm::context();
//! let db = context
//!     .open("app")
//!     .version(1)
//!     .on_upgrade(|upgrade| {
//!         upgrade.create_object_store("notes", StoreParameters::new())?;
//!         Ok(())
//!     })
//!     .await?;
//! let notes = db
//!     .transaction(&["notes"], TransactionMode::ReadOnly)?
//!     .object_store("notes")?;
//! let mut records = notes.open_cursor(None, None);
//! while let Some(record) = records.next().await {
//!     web_sys::console::log_1(&format!("{:?}", record?).into());
//! }
//! ```
//!
//! ## Event Loop
//!
//! Requests answer from the browser's own event loop, so futures and
//! streams from `idbrx_core` are driven with `wasm-bindgen-futures`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod convert;
mod cursor;
mod error;
mod factory;
mod handles;
mod request;
mod utils;

pub use error::{WasmError, WasmResult};
pub use factory::WebFactory;

use idbrx_core::{Config, Context, Factory};
use std::rc::Rc;
use wasm_bindgen::prelude::*;

/// Initialize the WASM module.
///
/// This sets up panic hooks for better error messages in the browser console.
#[wasm_bindgen(start)]
pub fn init() {
    utils::set_panic_hook();
}

/// Resolves the host's IndexedDB factory, if the global scope has one.
#[must_use]
pub fn host_factory() -> Option<Rc<dyn Factory>> {
    WebFactory::from_global()
        .ok()
        .map(|factory| Rc::new(factory) as Rc<dyn Factory>)
}

/// Creates a context that opens databases in the host's IndexedDB.
#[must_use]
pub fn context() -> Context {
    Context::new(Config::new().host_factory(host_factory))
}
