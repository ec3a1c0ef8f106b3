use std::sync::Arc;

use thiserror::Error;

/// Convenience alias for `std::result::Result` with [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by eventgate operations.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Event configuration was malformed (e.g., empty event id).
    #[error("invalid event configuration: {0}")]
    InvalidConfig(String),
    /// A store delete targeted a key that does not exist.
    ///
    /// Reads of absent keys are never an error; only [`EventStore::remove`] may
    /// return this, and [`EligibilityEngine::reset`] treats it as a no-op.
    ///
    /// [`EventStore::remove`]: crate::EventStore::remove
    /// [`EligibilityEngine::reset`]: crate::EligibilityEngine::reset
    #[error("value not found in store")]
    ValueNotFound,
    // serde_json::Error is not clonable, so we're wrapping it in an Arc.
    /// A stored value failed to serialize or deserialize. The engine never
    /// retries; retry policy is the store's concern.
    #[error("failed to serialize or deserialize a stored value")]
    Serialization(#[source] Arc<serde_json::Error>),
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(Arc::new(value))
    }
}
