//! Flowgate HTTP - Transport layer
//!
//! Everything that speaks HTTP lives here:
//! - [`proxy::ProxyEngine`]: admission check, backend selection and origin
//!   forwarding for all proxied traffic
//! - [`health::HealthChecker`]: the periodic probe loop that publishes the
//!   live backend set to the balancer
//! - [`api::ApiHandler`]: the administrative bucket CRUD surface under
//!   `/buckets`
//! - [`server::GatewayServer`]: the hyper accept loop with graceful
//!   shutdown and connection draining

pub mod api;
mod body;
pub mod health;
pub mod proxy;
pub mod server;

pub use api::ApiHandler;
pub use body::BoxedBody;
pub use health::HealthChecker;
pub use proxy::ProxyEngine;
pub use server::{AppState, GatewayServer};
