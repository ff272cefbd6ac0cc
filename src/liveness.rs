//! Connection liveness shared by a connection's reader and writer tasks.
//!
//! The state only moves forward: `Connecting -> Alive -> Closed`, or straight
//! from `Connecting` to `Closed`. Once closed it never reopens.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const CONNECTING: u8 = 0;
const ALIVE: u8 = 1;
const CLOSED: u8 = 2;

/// Lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Alive,
    Closed,
}

/// Atomic tri-state liveness flag.
#[derive(Debug)]
pub struct Liveness {
    state: AtomicU8,
}

impl Default for Liveness {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(CONNECTING),
        }
    }
}

impl Liveness {
    /// Create a flag in the `Connecting` state.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn state(&self) -> LinkState {
        match self.state.load(Ordering::Acquire) {
            CONNECTING => LinkState::Connecting,
            ALIVE => LinkState::Alive,
            _ => LinkState::Closed,
        }
    }

    /// True only while the connection is usable.
    pub fn is_alive(&self) -> bool {
        self.state.load(Ordering::Acquire) == ALIVE
    }

    /// Move `Connecting -> Alive`. Returns `false` if the flag was already closed.
    pub fn mark_alive(&self) -> bool {
        match self
            .state
            .compare_exchange(CONNECTING, ALIVE, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(current) => current == ALIVE,
        }
    }

    /// Close the connection.
    ///
    /// Returns `true` for exactly one caller: the one that observed the
    /// transition into `Closed`.
    pub fn close(&self) -> bool {
        self.state.swap(CLOSED, Ordering::AcqRel) != CLOSED
    }
}
