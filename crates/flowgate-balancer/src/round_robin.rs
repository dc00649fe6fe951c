//! Round-robin selection

use std::sync::Mutex;

use crate::strategy::{BalanceError, SelectionStrategy};

/// Rotation state: the live server slice and the cursor into it.
///
/// Both live under one lock. Splitting them into independently guarded
/// cells would let a reader pair a stale cursor with a fresh slice.
#[derive(Debug)]
struct Rotation {
    servers: Vec<String>,
    cursor: usize,
}

/// Classic round-robin: each call returns the backend at the cursor, then
/// advances modulo the current length.
#[derive(Debug)]
pub struct RoundRobin {
    state: Mutex<Rotation>,
}

impl RoundRobin {
    pub fn new(servers: Vec<String>) -> Self {
        Self {
            state: Mutex::new(Rotation { servers, cursor: 0 }),
        }
    }
}

impl SelectionStrategy for RoundRobin {
    fn next(&self) -> Result<String, BalanceError> {
        let mut state = self.state.lock().unwrap();
        if state.servers.is_empty() {
            return Err(BalanceError::NoBackends);
        }
        let server = state.servers[state.cursor].clone();
        state.cursor = (state.cursor + 1) % state.servers.len();
        Ok(server)
    }

    fn reset_backends(&self, backends: Vec<String>) {
        let mut state = self.state.lock().unwrap();
        // Wrap the cursor so it stays in bounds when the set shrinks.
        state.cursor = if backends.is_empty() {
            0
        } else {
            state.cursor % backends.len()
        };
        state.servers = backends;
    }
}
