//! # ID Generator
//!
//! Source of subscription and receipt ids. Zero means "no id" on the wire,
//! so it is never handed out, including after the counter wraps.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic, wrapping, thread-safe id counter.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: AtomicU64,
}

impl IdGenerator {
    pub const fn new() -> Self {
        Self {
            last: AtomicU64::new(0),
        }
    }

    #[cfg(test)]
    pub(crate) const fn starting_after(last: u64) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    /// Next non-zero id.
    pub fn next_id(&self) -> u64 {
        loop {
            let id = self.last.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
            if id != 0 {
                return id;
            }
        }
    }

    /// Restarts the sequence at 1.
    ///
    /// Only the engine worker calls this, right after a handshake, and only
    /// when no id handed out earlier is still in use.
    pub(crate) fn reset(&self) {
        self.last.store(0, Ordering::Relaxed);
    }
}
