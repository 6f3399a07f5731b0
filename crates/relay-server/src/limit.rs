//! Concurrent connection cap.
//!
//! A slot is reserved before a connection is handed to the hub and released
//! when its [`ConnectionSlot`] is dropped, so the check and the reservation
//! are one atomic step.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Hands out at most `max` concurrent [`ConnectionSlot`]s. A `max` of 0
/// means unlimited.
#[derive(Debug, Clone)]
pub struct ConnectionLimiter {
    max: usize,
    active: Arc<AtomicUsize>,
}

impl ConnectionLimiter {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Reserve a slot, or `None` when the limit is reached.
    pub fn try_acquire(&self) -> Option<ConnectionSlot> {
        let max = self.max;
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (max == 0 || n < max).then_some(n + 1)
            })
            .ok()?;
        Some(ConnectionSlot {
            counter: self.active.clone(),
        })
    }

    /// Slots currently held.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn max(&self) -> usize {
        self.max
    }
}

/// RAII guard for one reserved slot.
///
/// Owns an `Arc<AtomicUsize>` so it can be moved into the connection's task.
#[derive(Debug)]
pub struct ConnectionSlot {
    counter: Arc<AtomicUsize>,
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}
