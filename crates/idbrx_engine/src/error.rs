//! Error types for engine operations.

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors reported by an object-store engine.
///
/// Variants mirror the `DOMException` names an IndexedDB implementation
/// raises, so a browser engine can map its failures one to one and callers
/// can match on the same categories regardless of the engine in use.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// A named store, index or database does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation is not allowed in the handle's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The operation is not allowed for this kind of object.
    #[error("invalid access: {0}")]
    InvalidAccess(String),

    /// A write was attempted in a read-only transaction.
    #[error("transaction is read-only")]
    ReadOnly,

    /// The transaction is no longer active.
    #[error("transaction is not active")]
    TransactionInactive,

    /// A uniqueness constraint was violated.
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// A key, key path or key range is invalid.
    #[error("data error: {0}")]
    Data(String),

    /// The requested version is lower than the stored version.
    #[error("requested version {requested} is less than the existing version {current}")]
    Version {
        /// Version asked for by the open request.
        requested: u32,
        /// Version currently stored.
        current: u32,
    },

    /// The transaction or request was aborted.
    #[error("aborted: {0}")]
    Abort(String),

    /// An argument had the wrong type or range.
    #[error("type error: {0}")]
    Type(String),

    /// Any other engine failure.
    #[error("engine error: {0}")]
    Unknown(String),
}

impl EngineError {
    /// Creates a not found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    /// Creates an invalid access error.
    pub fn invalid_access(message: impl Into<String>) -> Self {
        Self::InvalidAccess(message.into())
    }

    /// Creates a constraint error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint(message.into())
    }

    /// Creates a data error.
    pub fn data(message: impl Into<String>) -> Self {
        Self::Data(message.into())
    }

    /// Creates an abort error.
    pub fn abort(reason: impl Into<String>) -> Self {
        Self::Abort(reason.into())
    }

    /// Returns the `DOMException` name this error corresponds to.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NotFoundError",
            Self::InvalidState(_) => "InvalidStateError",
            Self::InvalidAccess(_) => "InvalidAccessError",
            Self::ReadOnly => "ReadOnlyError",
            Self::TransactionInactive => "TransactionInactiveError",
            Self::Constraint(_) => "ConstraintError",
            Self::Data(_) => "DataError",
            Self::Version { .. } => "VersionError",
            Self::Abort(_) => "AbortError",
            Self::Type(_) => "TypeError",
            Self::Unknown(_) => "UnknownError",
        }
    }

    /// Builds an error from a `DOMException` name and message.
    ///
    /// Unrecognised names map to [`EngineError::Unknown`].
    #[must_use]
    pub fn from_dom(name: &str, message: &str) -> Self {
        let message = message.to_string();
        match name {
            "NotFoundError" => Self::NotFound(message),
            "InvalidStateError" => Self::InvalidState(message),
            "InvalidAccessError" => Self::InvalidAccess(message),
            "ReadOnlyError" => Self::ReadOnly,
            "TransactionInactiveError" => Self::TransactionInactive,
            "ConstraintError" => Self::Constraint(message),
            "DataError" => Self::Data(message),
            "VersionError" => Self::Version {
                requested: 0,
                current: 0,
            },
            "AbortError" => Self::Abort(message),
            "TypeError" => Self::Type(message),
            _ => Self::Unknown(format!("{name}: {message}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dom_names_round_trip() {
        let errors = [
            EngineError::not_found("users"),
            EngineError::invalid_state("closed"),
            EngineError::ReadOnly,
            EngineError::TransactionInactive,
            EngineError::constraint("dup"),
            EngineError::data("bad key"),
            EngineError::abort("upgrade"),
        ];
        for err in errors {
            let mapped = EngineError::from_dom(err.name(), "");
            assert_eq!(mapped.name(), err.name());
        }
    }

    #[test]
    fn unknown_dom_name() {
        let err = EngineError::from_dom("QuotaExceededError", "disk full");
        assert_eq!(err, EngineError::Unknown("QuotaExceededError: disk full".into()));
        assert_eq!(err.name(), "UnknownError");
    }

    #[test]
    fn version_error_message() {
        let err = EngineError::Version {
            requested: 1,
            current: 3,
        };
        assert_eq!(
            err.to_string(),
            "requested version 1 is less than the existing version 3"
        );
    }
}
