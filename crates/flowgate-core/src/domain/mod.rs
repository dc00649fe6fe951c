//! Domain types for Flowgate
//!
//! The domain is deliberately small: one persistent entity (the token
//! bucket) and the error taxonomy shared by the store and the service.

pub mod bucket;
pub mod errors;

pub use bucket::Bucket;
pub use errors::StoreError;
