//! Error types for the adapter.

use idbrx_engine::EngineError;
use thiserror::Error;

/// Result type for adapter operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the adapter.
///
/// Handle lookups return these synchronously; opens, requests and cursor
/// walks deliver them through their future or stream.
#[derive(Debug, Error)]
pub enum Error {
    /// The engine rejected or failed an operation.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// No engine factory was configured and the host provides none.
    #[error("no engine factory is available: none was configured and the host provides none")]
    NoFactory,

    /// The upgrade callback failed; the engine rolled the upgrade back.
    #[error("upgrade from v{old_version} to v{new_version} failed: {source}")]
    UpgradeFailed {
        /// Version stored before the upgrade.
        old_version: u32,
        /// Version the open asked for.
        new_version: u32,
        /// Error returned by the upgrade callback.
        source: Box<Error>,
    },

    /// The engine dropped a request without answering it.
    #[error("the engine dropped the request without answering")]
    Canceled,
}

impl Error {
    /// Returns the engine error behind this error, if any.
    #[must_use]
    pub fn as_engine(&self) -> Option<&EngineError> {
        match self {
            Self::Engine(err) => Some(err),
            Self::UpgradeFailed { source, .. } => source.as_engine(),
            Self::NoFactory | Self::Canceled => None,
        }
    }
}
