//! # idbrx Testkit
//!
//! Test utilities for idbrx.
//!
//! This crate provides:
//! - Fixtures running contexts and seeded databases on the memory engine
//! - Property-based test generators using proptest
//! - Tracing setup for test binaries
//!
//! ## Usage
//!
//! ```rust
//! use idbrx_testkit::prelude::*;
//!
//! let env = TestContext::new();
//! let db = env.seeded("app", "items", numbered_records(3));
//! assert_eq!(db.object_store_names(), vec!["items".to_string()]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

use tracing_subscriber::EnvFilter;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
}

pub use fixtures::*;
pub use generators::*;

/// Installs a `fmt` subscriber for the current test binary.
///
/// The filter comes from `RUST_LOG` and defaults to `warn`. Calling it more
/// than once is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
