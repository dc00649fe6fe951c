//! Flowgate Balancer - Backend selection
//!
//! A small capability set: strategies answer "which backend next?" and
//! accept membership resets from the health checker. The [`Balancer`]
//! facade decouples the proxy and the health checker from any concrete
//! strategy; new strategies plug in through the name-indexed
//! [`create_strategy`] factory.

mod balancer;
mod round_robin;
mod strategy;

pub use balancer::Balancer;
pub use round_robin::RoundRobin;
pub use strategy::{create_strategy, BalanceError, SelectionStrategy};
