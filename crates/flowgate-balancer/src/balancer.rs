//! Balancer facade

use tracing::debug;

use crate::strategy::{BalanceError, SelectionStrategy};

/// Holds one selection strategy and forwards to it.
///
/// The proxy only calls [`Balancer::next_backend`]; the health checker only
/// calls [`Balancer::reset_backends`]. Neither needs to know which concrete
/// strategy is configured.
pub struct Balancer {
    strategy: Box<dyn SelectionStrategy>,
}

impl Balancer {
    pub fn new(strategy: Box<dyn SelectionStrategy>) -> Self {
        Self { strategy }
    }

    /// The next backend to route to.
    pub fn next_backend(&self) -> Result<String, BalanceError> {
        self.strategy.next()
    }

    /// Publishes a new live set, replacing the previous membership.
    pub fn reset_backends(&self, backends: Vec<String>) {
        debug!(live = backends.len(), "resetting live backend set");
        self.strategy.reset_backends(backends);
    }
}
