//! Token bucket entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-client token bucket record.
///
/// One row exists per rate-limited client. `tokens` is decremented by each
/// admission and replenished by lazy refill; the store enforces
/// `0 <= tokens <= capacity` and `capacity > 0` with CHECK constraints, so
/// the struct itself carries no smart setters.
///
/// `last_refill` is the timestamp of the most recent refill *step* applied
/// to the bucket, not the wall-clock time of the refill query. Advancing it
/// by whole steps preserves the fractional remainder of the elapsed time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// Opaque stable client identifier (primary key).
    pub client_id: String,
    /// Maximum tokens the bucket may hold; also the admission burst size.
    pub capacity: i64,
    /// Currently available tokens.
    pub tokens: i64,
    /// When the last refill step was applied.
    ///
    /// Defaults to "now" when absent from an admin payload, so that
    /// `POST /buckets` callers do not have to supply it.
    #[serde(default = "Utc::now")]
    pub last_refill: DateTime<Utc>,
}

impl Bucket {
    /// A bucket filled to capacity, as created on first admission.
    pub fn full(client_id: impl Into<String>, capacity: i64, now: DateTime<Utc>) -> Self {
        Self {
            client_id: client_id.into(),
            capacity,
            tokens: capacity,
            last_refill: now,
        }
    }
}
