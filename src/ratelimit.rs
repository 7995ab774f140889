//! Counter-based log rate limiting
//!
//! Interrupt context has no clock we can rely on, so limiting works on event
//! counts the same way the spurious-IRQ counters do: the first `burst` events
//! are reported, after that only one in every `interval`.

use core::sync::atomic::{AtomicU32, Ordering};

pub struct RateLimit {
    count: AtomicU32,
    burst: u32,
    interval: u32,
}

impl RateLimit {
    pub const fn new(burst: u32, interval: u32) -> Self {
        Self {
            count: AtomicU32::new(0),
            burst,
            interval,
        }
    }

    /// Record one event; returns true if it should be reported
    pub fn allow(&self) -> bool {
        let n = self.count.fetch_add(1, Ordering::Relaxed);
        if n < self.burst {
            return true;
        }
        self.interval != 0 && (n - self.burst) % self.interval == self.interval - 1
    }

    /// Events seen so far, reported or not
    pub fn events(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::new(10, 100)
    }
}
