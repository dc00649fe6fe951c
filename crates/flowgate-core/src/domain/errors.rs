//! Store error taxonomy
//!
//! Raw storage failures are translated into this closed set before they
//! cross a component boundary. The HTTP layer is the only place that maps
//! a kind to a status code; everything below it only tags.

use thiserror::Error;

/// Errors produced by the bucket store and the admission service.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No bucket row matched the given client.
    #[error("bucket not found")]
    NotFound,

    /// A bucket with this client id already exists (unique-key violation).
    #[error("bucket '{0}' already exists")]
    Conflict(String),

    /// Input rejected by validation or by a CHECK constraint.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The decrement would drive `tokens` below zero
    /// (`ck_tokens_nonnegative` violated).
    #[error("not enough tokens")]
    NotEnoughTokens,

    /// The update would push `tokens` above `capacity`
    /// (`ck_tokens_le_capacity` violated).
    #[error("tokens exceed capacity")]
    TokensExceedCapacity,

    /// Any other storage failure, with the adapter error as the cause.
    #[error("store failure: {0}")]
    Database(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Wraps an adapter-level failure that has no domain meaning.
    pub fn database<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Database(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(StoreError::NotFound.to_string(), "bucket not found");
        assert_eq!(
            StoreError::Conflict("c1".into()).to_string(),
            "bucket 'c1' already exists"
        );
        assert_eq!(StoreError::NotEnoughTokens.to_string(), "not enough tokens");
        assert_eq!(
            StoreError::InvalidInput("capacity must be positive".into()).to_string(),
            "invalid input: capacity must be positive"
        );
    }

    #[test]
    fn database_wrapper_preserves_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");
        let err = StoreError::database(io);
        assert!(err.to_string().contains("disk on fire"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
