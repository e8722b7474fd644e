//! Error taxonomy for the blob cache engine

use thiserror::Error;

/// Error kinds surfaced at the engine's API boundary.
///
/// The engine distinguishes caller errors (`ArgumentNull`, `KeyNotFound`),
/// codec errors (`Serialization`/`Deserialization`), lifecycle errors
/// (`Disposed`), backend errors (`Storage`), and fetch errors (`Fetch`).
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    /// A required parameter was null or empty.
    #[error("argument null or empty: {0}")]
    ArgumentNull(String),

    /// Single-key `Get` on an absent or expired key.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Object layer codec failure while encoding a value.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Object layer codec failure while decoding a value.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// The engine is `ShuttingDown` or `Closed`.
    #[error("engine is disposed")]
    Disposed,

    /// Any underlying database failure; carries the driver's error text.
    #[error("storage error: {0}")]
    Storage(String),

    /// Propagated failure from a caller-supplied fetch function.
    #[error("fetch error: {0}")]
    Fetch(String),
}

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CacheError::KeyNotFound("k".into());
        assert_eq!(err.to_string(), "key not found: k");

        let err = CacheError::ArgumentNull("key".into());
        assert_eq!(err.to_string(), "argument null or empty: key");

        let err = CacheError::Disposed;
        assert_eq!(err.to_string(), "engine is disposed");
    }

    #[test]
    fn error_clone() {
        let err = CacheError::Storage("locked".into());
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
    }
}
