//! Bucket store port (driven/secondary port)
//!
//! The authoritative source of rate-limit state. All concurrency safety for
//! token accounting is delegated to the backing store: implementations must
//! make `try_consume` a single conditional update (never read-then-write),
//! so that N concurrent calls against a bucket holding K tokens produce
//! exactly K successes.
//!
//! ## Design Notes
//!
//! - Returns typed [`StoreError`] kinds rather than `anyhow`, because the
//!   service and the HTTP layer branch on them (429 vs 500 vs 404).
//! - Implementations distinguish `NotEnoughTokens` and
//!   `TokensExceedCapacity` from generic failures by matching the violated
//!   CHECK constraint name; the constraint names are part of the schema
//!   contract.

use chrono::{DateTime, Utc};

use crate::domain::{Bucket, StoreError};

/// Port trait for persistent token-bucket storage.
#[async_trait::async_trait]
pub trait BucketStore: Send + Sync {
    /// Atomically decrements `tokens` by one for the given client.
    ///
    /// Fails with [`StoreError::NotEnoughTokens`] when the decrement would
    /// drive the count below zero, and [`StoreError::NotFound`] when no row
    /// matches.
    async fn try_consume(&self, client_id: &str) -> Result<(), StoreError>;

    /// Adds `amount` tokens, clamped to `capacity`, and moves `last_refill`
    /// to `refilled_at` in the same statement.
    ///
    /// Not idempotent; the caller owns the step accounting that decides
    /// both `amount` and the advanced timestamp.
    async fn refill(
        &self,
        client_id: &str,
        amount: i64,
        refilled_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Inserts a new bucket row.
    ///
    /// Fails with [`StoreError::Conflict`] when the client id is taken and
    /// [`StoreError::InvalidInput`] when a CHECK constraint rejects the
    /// values.
    async fn create_bucket(&self, bucket: &Bucket) -> Result<(), StoreError>;

    /// Deletes the bucket row.
    async fn remove_bucket(&self, client_id: &str) -> Result<(), StoreError>;

    /// Sets a new capacity, leaving tokens untouched.
    async fn update_capacity(&self, client_id: &str, capacity: i64) -> Result<(), StoreError>;

    /// Sets the token count directly.
    async fn update_tokens(&self, client_id: &str, tokens: i64) -> Result<(), StoreError>;

    /// Fetches one bucket.
    async fn get_bucket(&self, client_id: &str) -> Result<Bucket, StoreError>;

    /// Lists buckets ordered by most recent refill, newest first.
    async fn list_buckets(&self, limit: i64, offset: i64) -> Result<Vec<Bucket>, StoreError>;
}
