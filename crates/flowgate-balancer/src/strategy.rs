//! Selection strategy trait and factory

use thiserror::Error;

use crate::round_robin::RoundRobin;

/// Errors from backend selection.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BalanceError {
    /// The live set is empty; nothing to route to.
    #[error("no backends available")]
    NoBackends,

    /// The configured strategy name matches no registered factory.
    #[error("unknown strategy: {0}")]
    UnknownStrategy(String),
}

/// A backend selection strategy.
///
/// `next` runs on every proxied request while `reset_backends` runs from
/// the health check loop, so implementations must keep the two linearizable:
/// a caller of `next` never observes a half-applied reset.
pub trait SelectionStrategy: Send + Sync + std::fmt::Debug {
    /// Returns the base URL of the next backend to route to.
    fn next(&self) -> Result<String, BalanceError>;

    /// Atomically replaces the live membership.
    fn reset_backends(&self, backends: Vec<String>);
}

/// Builds the strategy registered under `name`.
///
/// The match table is the sole extension point for new strategies.
pub fn create_strategy(
    name: &str,
    backends: Vec<String>,
) -> Result<Box<dyn SelectionStrategy>, BalanceError> {
    match name {
        "round_robin" => Ok(Box::new(RoundRobin::new(backends))),
        other => Err(BalanceError::UnknownStrategy(other.to_string())),
    }
}
