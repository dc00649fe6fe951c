//! SQLite implementation of the BucketStore port
//!
//! All token accounting is pushed into single-statement updates so that
//! concurrent admissions serialize at the database rather than in
//! application code. The schema's named CHECK constraints turn illegal
//! transitions into errors this module translates:
//!
//! | Constraint              | Violated by                 | Mapped to              |
//! |-------------------------|-----------------------------|------------------------|
//! | `ck_tokens_nonnegative` | consume on an empty bucket  | `NotEnoughTokens`      |
//! | `ck_tokens_le_capacity` | raising tokens past the cap | `TokensExceedCapacity` |
//! | any CHECK on insert     | invalid bucket payload      | `InvalidInput`         |
//! | unique key on insert    | duplicate client id         | `Conflict`             |

use chrono::{DateTime, Utc};
use sqlx::error::ErrorKind;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use flowgate_core::domain::{Bucket, StoreError};
use flowgate_core::ports::BucketStore;

const CK_TOKENS_NONNEGATIVE: &str = "ck_tokens_nonnegative";
const CK_TOKENS_LE_CAPACITY: &str = "ck_tokens_le_capacity";

/// SQLite-based implementation of the bucket store port.
///
/// All operations go through a shared connection pool; checkouts are
/// short-lived per query and no transaction spans a request.
pub struct SqliteBucketStore {
    pool: SqlitePool,
}

impl SqliteBucketStore {
    /// Creates a new store instance over the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Error mapping helpers
// ============================================================================

/// Whether `err` is a violation of the named CHECK constraint.
///
/// SQLite reports a named CHECK constraint as
/// `CHECK constraint failed: <name>`, so the constraint name in the message
/// is the contract that turns a raw violation into a typed error.
fn violates(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            matches!(db.kind(), ErrorKind::CheckViolation) && db.message().contains(constraint)
        }
        _ => false,
    }
}

fn map_create_error(err: sqlx::Error, client_id: &str) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        match db.kind() {
            ErrorKind::UniqueViolation => return StoreError::Conflict(client_id.to_string()),
            ErrorKind::CheckViolation => return StoreError::InvalidInput(db.message().to_string()),
            _ => {}
        }
    }
    StoreError::database(err)
}

fn bucket_from_row(row: &SqliteRow) -> Result<Bucket, StoreError> {
    let client_id: String = row.get("client_id");
    let capacity: i64 = row.get("capacity");
    let tokens: i64 = row.get("tokens");
    let last_refill_raw: String = row.get("last_refill");

    let last_refill = DateTime::parse_from_rfc3339(&last_refill_raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(StoreError::database)?;

    Ok(Bucket {
        client_id,
        capacity,
        tokens,
        last_refill,
    })
}

// ============================================================================
// BucketStore implementation
// ============================================================================

#[async_trait::async_trait]
impl BucketStore for SqliteBucketStore {
    async fn try_consume(&self, client_id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE token_buckets SET tokens = tokens - 1 WHERE client_id = ?")
            .bind(client_id)
            .execute(&self.pool)
            .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Err(StoreError::NotFound),
            Ok(_) => Ok(()),
            Err(err) if violates(&err, CK_TOKENS_NONNEGATIVE) => Err(StoreError::NotEnoughTokens),
            Err(err) => Err(StoreError::database(err)),
        }
    }

    async fn refill(
        &self,
        client_id: &str,
        amount: i64,
        refilled_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let done = sqlx::query(
            "UPDATE token_buckets \
             SET tokens = MIN(tokens + ?, capacity), last_refill = ? \
             WHERE client_id = ?",
        )
        .bind(amount)
        .bind(refilled_at.to_rfc3339())
        .bind(client_id)
        .execute(&self.pool)
        .await
        .map_err(StoreError::database)?;

        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn create_bucket(&self, bucket: &Bucket) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO token_buckets (client_id, capacity, tokens, last_refill) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(&bucket.client_id)
        .bind(bucket.capacity)
        .bind(bucket.tokens)
        .bind(bucket.last_refill.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|err| map_create_error(err, &bucket.client_id))?;

        tracing::trace!(client_id = %bucket.client_id, "created bucket");
        Ok(())
    }

    async fn remove_bucket(&self, client_id: &str) -> Result<(), StoreError> {
        let done = sqlx::query("DELETE FROM token_buckets WHERE client_id = ?")
            .bind(client_id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::database)?;

        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        tracing::trace!(client_id, "deleted bucket");
        Ok(())
    }

    async fn update_capacity(&self, client_id: &str, capacity: i64) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE token_buckets SET capacity = ? WHERE client_id = ?")
            .bind(capacity)
            .bind(client_id)
            .execute(&self.pool)
            .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Err(StoreError::NotFound),
            Ok(_) => Ok(()),
            Err(err) if violates(&err, CK_TOKENS_LE_CAPACITY) => {
                Err(StoreError::TokensExceedCapacity)
            }
            Err(err) => {
                if let sqlx::Error::Database(db) = &err {
                    if matches!(db.kind(), ErrorKind::CheckViolation) {
                        return Err(StoreError::InvalidInput(db.message().to_string()));
                    }
                }
                Err(StoreError::database(err))
            }
        }
    }

    async fn update_tokens(&self, client_id: &str, tokens: i64) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE token_buckets SET tokens = ? WHERE client_id = ?")
            .bind(tokens)
            .bind(client_id)
            .execute(&self.pool)
            .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Err(StoreError::NotFound),
            Ok(_) => Ok(()),
            Err(err) if violates(&err, CK_TOKENS_LE_CAPACITY) => {
                Err(StoreError::TokensExceedCapacity)
            }
            Err(err) => {
                if let sqlx::Error::Database(db) = &err {
                    if matches!(db.kind(), ErrorKind::CheckViolation) {
                        return Err(StoreError::InvalidInput(db.message().to_string()));
                    }
                }
                Err(StoreError::database(err))
            }
        }
    }

    async fn get_bucket(&self, client_id: &str) -> Result<Bucket, StoreError> {
        let row = sqlx::query(
            "SELECT client_id, capacity, tokens, last_refill \
             FROM token_buckets WHERE client_id = ?",
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::database)?;

        match row {
            Some(ref r) => bucket_from_row(r),
            None => Err(StoreError::NotFound),
        }
    }

    async fn list_buckets(&self, limit: i64, offset: i64) -> Result<Vec<Bucket>, StoreError> {
        let rows = sqlx::query(
            "SELECT client_id, capacity, tokens, last_refill \
             FROM token_buckets \
             ORDER BY last_refill DESC \
             LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::database)?;

        let mut buckets = Vec::with_capacity(rows.len());
        for row in &rows {
            buckets.push(bucket_from_row(row)?);
        }

        Ok(buckets)
    }
}
