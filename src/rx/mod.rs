//! Receive path
//!
//! Buffers cycle between three owners:
//!
//! ```text
//!   unused --(replenish: alloc + map)--> free --(restock)--> ring slot
//!     ^                                   ^                     |
//!     |                                   +---(recycle)---------+
//!     +---------------(consumer stole the page)-----------------+
//! ```
//!
//! - `pool`: handle arena with the unused and free lists
//! - `ring`: descriptor ring shared with the device
//! - `queue`: ring + pool under one lock, restock
//! - `frame`: frame layout inside a buffer
//! - `replenish`: page allocation and the background refill worker
//! - `dispatch`: completion processing

pub mod dispatch;
pub mod frame;
pub mod pool;
pub mod queue;
pub mod replenish;
pub mod ring;

use core::sync::atomic::{AtomicU64, Ordering};

use crate::config::RxConfig;
use crate::drivers::bus::Bus;
use crate::ratelimit::RateLimit;
use crate::sync::Mutex;

use queue::RxQueue;
use replenish::ReplenishWork;

/// Receive path counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RxStats {
    /// Frames delivered to the consumer
    pub frames: u64,
    /// Buffers kept by the consumer
    pub pages_stolen: u64,
    /// Buffers remapped and returned to the free list
    pub pages_recycled: u64,
    /// Page allocations that failed
    pub alloc_failures: u64,
    /// Completed slots that held no buffer
    pub empty_slots: u64,
}

#[derive(Default)]
pub(crate) struct RxCounters {
    frames: AtomicU64,
    pages_stolen: AtomicU64,
    pages_recycled: AtomicU64,
    alloc_failures: AtomicU64,
    empty_slots: AtomicU64,
}

impl RxCounters {
    #[inline]
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RxStats {
        RxStats {
            frames: self.frames.load(Ordering::Relaxed),
            pages_stolen: self.pages_stolen.load(Ordering::Relaxed),
            pages_recycled: self.pages_recycled.load(Ordering::Relaxed),
            alloc_failures: self.alloc_failures.load(Ordering::Relaxed),
            empty_slots: self.empty_slots.load(Ordering::Relaxed),
        }
    }
}

/// Receive-side state of one device
pub struct RxEngine<B: Bus> {
    queue: Mutex<RxQueue<B::Page, B::Coherent>>,
    replenish: ReplenishWork,
    config: RxConfig,
    counters: RxCounters,
    alloc_fail_log: RateLimit,
    alloc_crit_log: RateLimit,
}

impl<B: Bus> RxEngine<B> {
    pub fn new(queue: RxQueue<B::Page, B::Coherent>, config: RxConfig) -> Self {
        Self {
            queue: Mutex::new(queue),
            replenish: ReplenishWork::new(),
            config,
            counters: RxCounters::default(),
            alloc_fail_log: RateLimit::default(),
            alloc_crit_log: RateLimit::default(),
        }
    }

    pub fn config(&self) -> &RxConfig {
        &self.config
    }

    pub fn queue(&self) -> &Mutex<RxQueue<B::Page, B::Coherent>> {
        &self.queue
    }

    pub fn replenish_work(&self) -> &ReplenishWork {
        &self.replenish
    }

    pub fn stats(&self) -> RxStats {
        self.counters.snapshot()
    }

    /// Reset ring and pool, unmapping and dropping every page
    pub fn free_all(&self, bus: &B) {
        let len = self.config.rx_buf_size();
        let pages = {
            let mut q = self.queue.lock();
            let pages = q.pool.reset();
            q.ring.reset();
            pages
        };
        let count = pages.len();
        for (_page, dma) in pages {
            bus.unmap_page(dma, len);
        }
        log::debug!("[RX] released {} buffers", count);
    }
}
