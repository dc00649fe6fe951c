//! Bucket service - admission policy on top of the store
//!
//! Thin coordinator over [`BucketStore`]. The interesting operation is
//! [`BucketService::try_consume`], which stitches together three store
//! primitives into the admission decision:
//!
//! 1. Atomic consume at the store.
//! 2. Auto-create on the first admission of an unknown client (a racing
//!    create that loses with a conflict is a benign success).
//! 3. Lazy refill: elapsed whole refill intervals are applied in one step,
//!    advancing `last_refill` by `steps * interval` rather than to "now" so
//!    the fractional remainder keeps accruing.
//!
//! An exhausted bucket gets one refill-and-retry pass before the denial is
//! propagated; without it a bucket that ran dry would stay dry forever,
//! since refill accounting only runs inside admission.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration as ChronoDuration, Utc};
use tracing::{info, warn};

use crate::config::Config;
use crate::domain::{Bucket, StoreError};
use crate::ports::BucketStore;

/// Admission policy and CRUD coordinator for token buckets.
pub struct BucketService {
    store: Arc<dyn BucketStore>,
    default_capacity: i64,
    refill_interval: StdDuration,
    refill_amount: i64,
}

impl BucketService {
    pub fn new(cfg: &Config, store: Arc<dyn BucketStore>) -> Self {
        Self {
            store,
            default_capacity: cfg.bucket.capacity,
            refill_interval: cfg.bucket.refill.interval.as_std(),
            refill_amount: cfg.bucket.refill.amount,
        }
    }

    // -----------------------------------------------------------------
    // Admission
    // -----------------------------------------------------------------

    /// Consumes one token for `client_id`, creating the bucket on first
    /// sight and applying any pending lazy refill.
    ///
    /// Returns [`StoreError::NotEnoughTokens`] when the client is over its
    /// limit; any other error means the admission decision could not be
    /// made at all.
    pub async fn try_consume(&self, client_id: &str) -> Result<(), StoreError> {
        match self.store.try_consume(client_id).await {
            Ok(()) => {
                // The token is already spent; a refill hiccup must not turn
                // an admitted request into a denial.
                if let Err(err) = self.apply_lazy_refill(client_id).await {
                    warn!(client_id, error = %err, "lazy refill failed after consume");
                }
                Ok(())
            }
            Err(StoreError::NotFound) => self.create_on_first_admission(client_id).await,
            Err(StoreError::NotEnoughTokens) => {
                // The bucket may only look empty because no admission has
                // applied the elapsed refill steps yet.
                match self.apply_lazy_refill(client_id).await {
                    Ok(true) => self.store.try_consume(client_id).await,
                    Ok(false) => Err(StoreError::NotEnoughTokens),
                    Err(err) => {
                        warn!(client_id, error = %err, "lazy refill failed on exhausted bucket");
                        Err(StoreError::NotEnoughTokens)
                    }
                }
            }
            Err(err) => Err(err),
        }
    }

    /// First admission for an unknown client: create a full bucket, then
    /// retry the consume against it.
    ///
    /// A racing first admission may win the create; the loser's conflict
    /// is benign and both callers land on the same retry, so every
    /// admission is debited exactly once.
    async fn create_on_first_admission(&self, client_id: &str) -> Result<(), StoreError> {
        info!(client_id, "creating token bucket on first admission");
        let bucket = Bucket::full(client_id, self.default_capacity, Utc::now());
        match self.store.create_bucket(&bucket).await {
            Ok(()) | Err(StoreError::Conflict(_)) => self.store.try_consume(client_id).await,
            Err(err) => Err(err),
        }
    }

    /// Applies all whole refill steps that elapsed since `last_refill`.
    ///
    /// Returns whether at least one step was applied. `last_refill` is
    /// advanced by exactly `steps * interval`, which preserves the
    /// fractional carry of the elapsed time.
    async fn apply_lazy_refill(&self, client_id: &str) -> Result<bool, StoreError> {
        let interval_ms = self.refill_interval.as_millis() as i64;
        if interval_ms <= 0 {
            return Ok(false);
        }

        let bucket = self.store.get_bucket(client_id).await?;
        let now = Utc::now();
        let elapsed_ms = now
            .signed_duration_since(bucket.last_refill)
            .num_milliseconds();
        let steps = elapsed_ms / interval_ms;
        if steps < 1 {
            return Ok(false);
        }

        let amount = steps * self.refill_amount;
        let advanced = bucket.last_refill + ChronoDuration::milliseconds(steps * interval_ms);
        info!(
            client_id,
            steps,
            amount,
            capacity = bucket.capacity,
            "refilling tokens"
        );
        self.store.refill(client_id, amount, advanced).await?;
        Ok(true)
    }

    // -----------------------------------------------------------------
    // CRUD
    // -----------------------------------------------------------------

    pub async fn create_bucket(&self, bucket: &Bucket) -> Result<(), StoreError> {
        if bucket.client_id.is_empty() {
            return Err(StoreError::InvalidInput("client_id required".into()));
        }
        if bucket.capacity <= 0 {
            return Err(StoreError::InvalidInput(
                "capacity must be greater than 0".into(),
            ));
        }
        if bucket.tokens < 0 || bucket.tokens > bucket.capacity {
            return Err(StoreError::InvalidInput(
                "tokens must be in the range [0, capacity]".into(),
            ));
        }
        self.store.create_bucket(bucket).await
    }

    pub async fn remove_bucket(&self, client_id: &str) -> Result<(), StoreError> {
        if client_id.is_empty() {
            return Err(StoreError::InvalidInput("client_id required".into()));
        }
        self.store.remove_bucket(client_id).await
    }

    pub async fn update_capacity(&self, client_id: &str, capacity: i64) -> Result<(), StoreError> {
        if client_id.is_empty() {
            return Err(StoreError::InvalidInput("client_id required".into()));
        }
        if capacity <= 0 {
            return Err(StoreError::InvalidInput(
                "capacity must be greater than 0".into(),
            ));
        }
        self.store.update_capacity(client_id, capacity).await
    }

    pub async fn update_tokens(&self, client_id: &str, tokens: i64) -> Result<(), StoreError> {
        if client_id.is_empty() {
            return Err(StoreError::InvalidInput("client_id required".into()));
        }
        if tokens < 0 {
            return Err(StoreError::InvalidInput(
                "tokens must not be negative".into(),
            ));
        }
        self.store.update_tokens(client_id, tokens).await
    }

    pub async fn get_bucket(&self, client_id: &str) -> Result<Bucket, StoreError> {
        if client_id.is_empty() {
            return Err(StoreError::InvalidInput("client_id required".into()));
        }
        self.store.get_bucket(client_id).await
    }

    pub async fn list_buckets(&self, limit: i64, offset: i64) -> Result<Vec<Bucket>, StoreError> {
        if limit <= 0 {
            return Err(StoreError::InvalidInput(
                "limit must be greater than 0".into(),
            ));
        }
        if offset < 0 {
            return Err(StoreError::InvalidInput(
                "offset must not be negative".into(),
            ));
        }
        self.store.list_buckets(limit, offset).await
    }
}

// ---------------------------------------------------------------------------
// Unit tests against an in-memory fake store
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use chrono::DateTime;

    use crate::config::Duration as ConfigDuration;

    use super::*;

    /// In-memory store with the same observable semantics as the SQL
    /// implementation, plus switches for forcing failure paths.
    #[derive(Default)]
    struct FakeStore {
        buckets: Mutex<HashMap<String, Bucket>>,
        refill_calls: Mutex<Vec<(String, i64, DateTime<Utc>)>>,
        conflict_on_create: bool,
        fail_refill: bool,
        /// Makes the next try_consume report NotFound even though the row
        /// exists, simulating a consume that raced a concurrent create.
        not_found_once: AtomicBool,
    }

    impl FakeStore {
        fn with_bucket(bucket: Bucket) -> Self {
            let store = Self::default();
            store
                .buckets
                .lock()
                .unwrap()
                .insert(bucket.client_id.clone(), bucket);
            store
        }

        fn bucket(&self, client_id: &str) -> Option<Bucket> {
            self.buckets.lock().unwrap().get(client_id).cloned()
        }

        fn refills(&self) -> Vec<(String, i64, DateTime<Utc>)> {
            self.refill_calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl BucketStore for FakeStore {
        async fn try_consume(&self, client_id: &str) -> Result<(), StoreError> {
            if self.not_found_once.swap(false, Ordering::SeqCst) {
                return Err(StoreError::NotFound);
            }
            let mut buckets = self.buckets.lock().unwrap();
            let bucket = buckets.get_mut(client_id).ok_or(StoreError::NotFound)?;
            if bucket.tokens == 0 {
                return Err(StoreError::NotEnoughTokens);
            }
            bucket.tokens -= 1;
            Ok(())
        }

        async fn refill(
            &self,
            client_id: &str,
            amount: i64,
            refilled_at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            if self.fail_refill {
                return Err(StoreError::database(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "refill rejected",
                )));
            }
            self.refill_calls.lock().unwrap().push((
                client_id.to_string(),
                amount,
                refilled_at,
            ));
            let mut buckets = self.buckets.lock().unwrap();
            let bucket = buckets.get_mut(client_id).ok_or(StoreError::NotFound)?;
            bucket.tokens = (bucket.tokens + amount).min(bucket.capacity);
            bucket.last_refill = refilled_at;
            Ok(())
        }

        async fn create_bucket(&self, bucket: &Bucket) -> Result<(), StoreError> {
            if self.conflict_on_create {
                return Err(StoreError::Conflict(bucket.client_id.clone()));
            }
            let mut buckets = self.buckets.lock().unwrap();
            if buckets.contains_key(&bucket.client_id) {
                return Err(StoreError::Conflict(bucket.client_id.clone()));
            }
            buckets.insert(bucket.client_id.clone(), bucket.clone());
            Ok(())
        }

        async fn remove_bucket(&self, client_id: &str) -> Result<(), StoreError> {
            self.buckets
                .lock()
                .unwrap()
                .remove(client_id)
                .map(|_| ())
                .ok_or(StoreError::NotFound)
        }

        async fn update_capacity(&self, client_id: &str, capacity: i64) -> Result<(), StoreError> {
            let mut buckets = self.buckets.lock().unwrap();
            let bucket = buckets.get_mut(client_id).ok_or(StoreError::NotFound)?;
            if bucket.tokens > capacity {
                return Err(StoreError::TokensExceedCapacity);
            }
            bucket.capacity = capacity;
            Ok(())
        }

        async fn update_tokens(&self, client_id: &str, tokens: i64) -> Result<(), StoreError> {
            let mut buckets = self.buckets.lock().unwrap();
            let bucket = buckets.get_mut(client_id).ok_or(StoreError::NotFound)?;
            if tokens > bucket.capacity {
                return Err(StoreError::TokensExceedCapacity);
            }
            bucket.tokens = tokens;
            Ok(())
        }

        async fn get_bucket(&self, client_id: &str) -> Result<Bucket, StoreError> {
            self.bucket(client_id).ok_or(StoreError::NotFound)
        }

        async fn list_buckets(&self, limit: i64, offset: i64) -> Result<Vec<Bucket>, StoreError> {
            let mut all: Vec<Bucket> = self.buckets.lock().unwrap().values().cloned().collect();
            all.sort_by(|a, b| b.last_refill.cmp(&a.last_refill));
            Ok(all
                .into_iter()
                .skip(offset as usize)
                .take(limit as usize)
                .collect())
        }
    }

    fn service_with(
        store: Arc<FakeStore>,
        capacity: i64,
        interval: StdDuration,
        amount: i64,
    ) -> BucketService {
        let mut cfg = Config::default();
        cfg.bucket.capacity = capacity;
        cfg.bucket.refill.interval =
            ConfigDuration::from_millis(interval.as_millis() as u64);
        cfg.bucket.refill.amount = amount;
        BucketService::new(&cfg, store)
    }

    fn tenths_ago(tenths: i64) -> DateTime<Utc> {
        Utc::now() - ChronoDuration::milliseconds(tenths * 100)
    }

    // -- Admission --

    #[tokio::test]
    async fn first_admission_creates_bucket_and_debits_it() {
        let store = Arc::new(FakeStore::default());
        let svc = service_with(Arc::clone(&store), 10, StdDuration::from_secs(1), 1);

        svc.try_consume("10.0.0.1").await.unwrap();

        // Created at full capacity, then the admission's own decrement.
        let bucket = store.bucket("10.0.0.1").unwrap();
        assert_eq!(bucket.capacity, 10);
        assert_eq!(bucket.tokens, 9);
    }

    #[tokio::test]
    async fn capacity_exhausts_after_exactly_capacity_admissions() {
        let store = Arc::new(FakeStore::default());
        let svc = service_with(Arc::clone(&store), 2, StdDuration::from_secs(60), 1);

        svc.try_consume("10.0.0.1").await.unwrap();
        svc.try_consume("10.0.0.1").await.unwrap();
        assert!(matches!(
            svc.try_consume("10.0.0.1").await,
            Err(StoreError::NotEnoughTokens)
        ));
    }

    #[tokio::test]
    async fn losing_create_race_is_benign() {
        // The consume raced a concurrent first admission: NotFound from
        // the decrement, Conflict from the create, then the retry lands
        // on the row the winner inserted.
        let store = Arc::new(FakeStore {
            conflict_on_create: true,
            not_found_once: AtomicBool::new(true),
            ..FakeStore::default()
        });
        store.buckets.lock().unwrap().insert(
            "10.0.0.1".into(),
            Bucket::full("10.0.0.1", 10, Utc::now()),
        );
        let svc = service_with(Arc::clone(&store), 10, StdDuration::from_secs(1), 1);

        svc.try_consume("10.0.0.1").await.unwrap();
        assert_eq!(store.bucket("10.0.0.1").unwrap().tokens, 9);
    }

    #[tokio::test]
    async fn consume_decrements_without_refill_within_interval() {
        let store = Arc::new(FakeStore::with_bucket(Bucket {
            client_id: "c1".into(),
            capacity: 5,
            tokens: 3,
            last_refill: Utc::now(),
        }));
        let svc = service_with(Arc::clone(&store), 5, StdDuration::from_secs(1), 1);

        svc.try_consume("c1").await.unwrap();

        assert_eq!(store.bucket("c1").unwrap().tokens, 2);
        assert!(store.refills().is_empty());
    }

    #[tokio::test]
    async fn refill_applies_whole_steps_and_preserves_carry() {
        let last_refill = tenths_ago(22); // 2.2 intervals of 1s
        let store = Arc::new(FakeStore::with_bucket(Bucket {
            client_id: "c1".into(),
            capacity: 5,
            tokens: 3,
            last_refill,
        }));
        let svc = service_with(Arc::clone(&store), 5, StdDuration::from_secs(1), 1);

        svc.try_consume("c1").await.unwrap();

        let refills = store.refills();
        assert_eq!(refills.len(), 1);
        let (ref client, amount, advanced) = refills[0];
        assert_eq!(client, "c1");
        assert_eq!(amount, 2);
        // Advanced by exactly two whole intervals, not to "now": the 0.2s
        // remainder keeps accruing toward the next step.
        assert_eq!(advanced, last_refill + ChronoDuration::seconds(2));
        // 3 - 1 consumed + 2 refilled, clamped at capacity.
        assert_eq!(store.bucket("c1").unwrap().tokens, 4);
    }

    #[tokio::test]
    async fn refill_is_clamped_at_capacity() {
        let store = Arc::new(FakeStore::with_bucket(Bucket {
            client_id: "c1".into(),
            capacity: 5,
            tokens: 4,
            last_refill: tenths_ago(100), // 10 intervals, amount 2 each
        }));
        let svc = service_with(Arc::clone(&store), 5, StdDuration::from_secs(1), 2);

        svc.try_consume("c1").await.unwrap();

        // Never exceeds capacity no matter how many steps elapsed.
        assert_eq!(store.bucket("c1").unwrap().tokens, 5);
    }

    #[tokio::test]
    async fn exhausted_bucket_refills_then_admits() {
        let last_refill = tenths_ago(35); // 3.5 intervals
        let store = Arc::new(FakeStore::with_bucket(Bucket {
            client_id: "c1".into(),
            capacity: 5,
            tokens: 0,
            last_refill,
        }));
        let svc = service_with(Arc::clone(&store), 5, StdDuration::from_secs(1), 2);

        svc.try_consume("c1").await.unwrap();

        let bucket = store.bucket("c1").unwrap();
        // min(0 + 3*2, 5) = 5 refilled, then one consumed.
        assert_eq!(bucket.tokens, 4);
        assert_eq!(bucket.last_refill, last_refill + ChronoDuration::seconds(3));
    }

    #[tokio::test]
    async fn exhausted_bucket_within_interval_is_denied() {
        let store = Arc::new(FakeStore::with_bucket(Bucket {
            client_id: "c1".into(),
            capacity: 5,
            tokens: 0,
            last_refill: Utc::now(),
        }));
        let svc = service_with(Arc::clone(&store), 5, StdDuration::from_secs(1), 1);

        let err = svc.try_consume("c1").await.unwrap_err();
        assert!(matches!(err, StoreError::NotEnoughTokens));
        assert_eq!(store.bucket("c1").unwrap().tokens, 0);
    }

    #[tokio::test]
    async fn refill_failure_does_not_deny_admitted_request() {
        let store = Arc::new(FakeStore {
            fail_refill: true,
            ..FakeStore::default()
        });
        store.buckets.lock().unwrap().insert(
            "c1".into(),
            Bucket {
                client_id: "c1".into(),
                capacity: 5,
                tokens: 3,
                last_refill: tenths_ago(50),
            },
        );
        let svc = service_with(Arc::clone(&store), 5, StdDuration::from_secs(1), 1);

        svc.try_consume("c1").await.unwrap();
        assert_eq!(store.bucket("c1").unwrap().tokens, 2);
    }

    // -- CRUD validation --

    #[tokio::test]
    async fn create_rejects_empty_client_id() {
        let store = Arc::new(FakeStore::default());
        let svc = service_with(Arc::clone(&store), 10, StdDuration::from_secs(1), 1);

        let bucket = Bucket::full("", 10, Utc::now());
        let err = svc.create_bucket(&bucket).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidInput(_)));
        assert!(store.bucket("").is_none());
    }

    #[tokio::test]
    async fn create_rejects_nonpositive_capacity() {
        let store = Arc::new(FakeStore::default());
        let svc = service_with(store, 10, StdDuration::from_secs(1), 1);

        let bucket = Bucket::full("c1", 0, Utc::now());
        assert!(matches!(
            svc.create_bucket(&bucket).await,
            Err(StoreError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn create_rejects_tokens_out_of_range() {
        let store = Arc::new(FakeStore::default());
        let svc = service_with(store, 10, StdDuration::from_secs(1), 1);

        let mut bucket = Bucket::full("c1", 5, Utc::now());
        bucket.tokens = 6;
        assert!(matches!(
            svc.create_bucket(&bucket).await,
            Err(StoreError::InvalidInput(_))
        ));

        bucket.tokens = -1;
        assert!(matches!(
            svc.create_bucket(&bucket).await,
            Err(StoreError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn update_capacity_validates_before_store() {
        let store = Arc::new(FakeStore::default());
        let svc = service_with(store, 10, StdDuration::from_secs(1), 1);

        assert!(matches!(
            svc.update_capacity("", 5).await,
            Err(StoreError::InvalidInput(_))
        ));
        assert!(matches!(
            svc.update_capacity("c1", 0).await,
            Err(StoreError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn update_tokens_rejects_negative() {
        let store = Arc::new(FakeStore::default());
        let svc = service_with(store, 10, StdDuration::from_secs(1), 1);

        assert!(matches!(
            svc.update_tokens("c1", -3).await,
            Err(StoreError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn list_rejects_bad_paging() {
        let store = Arc::new(FakeStore::default());
        let svc = service_with(store, 10, StdDuration::from_secs(1), 1);

        assert!(matches!(
            svc.list_buckets(0, 0).await,
            Err(StoreError::InvalidInput(_))
        ));
        assert!(matches!(
            svc.list_buckets(10, -1).await,
            Err(StoreError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn crud_passes_through_not_found() {
        let store = Arc::new(FakeStore::default());
        let svc = service_with(store, 10, StdDuration::from_secs(1), 1);

        assert!(matches!(
            svc.get_bucket("ghost").await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            svc.remove_bucket("ghost").await,
            Err(StoreError::NotFound)
        ));
    }
}
