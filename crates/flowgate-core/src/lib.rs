//! Flowgate Core - Domain logic for the rate-limiting reverse proxy
//!
//! This crate holds everything the transport and storage adapters plug into:
//! - The token bucket domain model and its closed error taxonomy
//! - The `BucketStore` port implemented by the persistence layer
//! - The `BucketService` admission policy (consume, auto-create, lazy refill)
//! - Typed YAML configuration with validation

pub mod config;
pub mod domain;
pub mod ports;
pub mod service;

pub use config::Config;
pub use domain::{Bucket, StoreError};
pub use ports::BucketStore;
pub use service::BucketService;
