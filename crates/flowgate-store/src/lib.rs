//! Flowgate Store - Durable token bucket state
//!
//! SQLite-backed implementation of the `BucketStore` port. Token accounting
//! correctness is delegated to the database: the consume decrement is a
//! single conditional update guarded by named CHECK constraints, and the
//! store layer translates constraint violations into the typed error kinds
//! the service branches on.

pub mod pool;
pub mod repository;

pub use pool::{DatabasePool, PoolError};
pub use repository::SqliteBucketStore;
