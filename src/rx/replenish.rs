//! Page allocation and background replenish
//!
//! Allocation never happens under the queue lock. The loop takes a handle
//! from the unused list only after the page exists, so a concurrent
//! replenisher that drained the list first just drops its page.
//!
//! Two entry points:
//!
//! - `Urgent`: from the dispatcher in interrupt context; allocation must
//!   not sleep
//! - `Deferred`: from the worker thread; allocation may block
//!
//! `ReplenishWork` collapses any number of requests into one worker run.

use core::sync::atomic::{AtomicBool, Ordering};

use alloc::sync::Arc;

use crate::drivers::bus::{AllocMode, AllocRequest, Bus};
use crate::rx::{RxCounters, RxEngine};
use crate::transport::WorkQueue;

/// Largest bus address the descriptor format can carry
pub const DMA_BIT_MASK_36: u64 = (1 << 36) - 1;

/// Descriptors drop the low 8 bits of the address
pub const DMA_ALIGN_MASK: u64 = 0xFF;

/// Replenish urgency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplenishMode {
    /// Worker context, allocation may block
    Deferred,
    /// Interrupt context, allocation must not block
    Urgent,
}

impl ReplenishMode {
    fn alloc_mode(self) -> AllocMode {
        match self {
            ReplenishMode::Deferred => AllocMode::MayBlock,
            ReplenishMode::Urgent => AllocMode::NonBlocking,
        }
    }
}

/// Abort if a mapping cannot be expressed in a descriptor
///
/// A bad address here means the bus driver ignored the device's DMA mask;
/// handing it to the device would corrupt unrelated memory.
pub fn check_dma_addr(dma: u64) {
    assert!(
        dma & !DMA_BIT_MASK_36 == 0,
        "[RX] DMA address 0x{:X} exceeds 36 bits",
        dma
    );
    assert!(
        dma & DMA_ALIGN_MASK == 0,
        "[RX] DMA address 0x{:X} not 256-byte aligned",
        dma
    );
}

/// Coalescing flag for the background replenish worker
pub struct ReplenishWork {
    pending: AtomicBool,
    running: AtomicBool,
    shutting_down: AtomicBool,
}

impl ReplenishWork {
    pub const fn new() -> Self {
        Self {
            pending: AtomicBool::new(false),
            running: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Request a worker run; only the first request since the last run
    /// reaches the work queue
    pub fn schedule<W: WorkQueue + ?Sized>(&self, work: &W) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        if !self.pending.swap(true, Ordering::SeqCst) {
            work.schedule_replenish();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn begin(&self) -> bool {
        self.running.store(true, Ordering::SeqCst);
        if self.shutting_down.load(Ordering::SeqCst) {
            self.running.store(false, Ordering::SeqCst);
            return false;
        }
        true
    }

    fn take_request(&self) -> bool {
        !self.shutting_down.load(Ordering::SeqCst) && self.pending.swap(false, Ordering::SeqCst)
    }

    fn end(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Refuse new requests and wait for a running worker to finish
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        while self.running.load(Ordering::SeqCst) {
            core::hint::spin_loop();
        }
        self.pending.store(false, Ordering::SeqCst);
    }

    /// Accept requests again after `shutdown`
    pub fn resume(&self) {
        self.shutting_down.store(false, Ordering::SeqCst);
    }
}

/// Marks the worker idle when dropped, also when the run unwinds
struct WorkerRun<'a>(&'a ReplenishWork);

impl Drop for WorkerRun<'_> {
    fn drop(&mut self) {
        self.0.end();
    }
}

impl Default for ReplenishWork {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Bus> RxEngine<B> {
    /// Attach fresh pages to unused handles until the list is empty or the
    /// allocator gives up
    ///
    /// Allocation failure is not an error: the next restock reschedules the
    /// worker if the pool is still short. Returns the number of buffers that
    /// gained a page.
    pub fn allocate(&self, bus: &B, mode: AllocMode) -> usize {
        let len = self.config.rx_buf_size();
        let order = self.config.page_order;
        let watermark = self.config.low_watermark;

        let mut added = 0;
        loop {
            let free_count = {
                let q = self.queue.lock();
                if !q.pool.has_unused() {
                    return added;
                }
                q.pool.free_count()
            };

            let request = AllocRequest {
                order,
                mode,
                quiet: free_count > watermark,
            };
            let Some(page) = bus.alloc_pages(request) else {
                RxCounters::bump(&self.counters.alloc_failures);
                if self.alloc_fail_log.allow() {
                    log::debug!("[RX] alloc_pages failed, order: {}", order);
                }
                if free_count <= watermark && self.alloc_crit_log.allow() {
                    log::error!(
                        "[RX] Failed to allocate page ({:?}), only {} free buffers remaining",
                        mode,
                        free_count
                    );
                }
                return added;
            };

            let handle = {
                let mut q = self.queue.lock();
                match q.pool.acquire_unused() {
                    Some(handle) => handle,
                    None => return added,
                }
            };

            let dma = bus.map_page(&page, len);
            check_dma_addr(dma);

            let mut q = self.queue.lock();
            match q.pool.attach(handle, Arc::new(page), dma) {
                Ok(()) => {
                    q.pool.release_to_free(handle);
                    added += 1;
                }
                Err(page) => {
                    // The handle came off the unused list still carrying
                    // memory; keep it reachable through the free list and
                    // give up ours
                    q.pool.release_to_free(handle);
                    drop(q);
                    bus.unmap_page(dma, len);
                    drop(page);
                }
            }
        }
    }

    /// Allocate what the pool is missing, then restock
    pub fn replenish<W: WorkQueue + ?Sized>(&self, bus: &B, work: &W, mode: ReplenishMode) {
        self.allocate(bus, mode.alloc_mode());
        self.restock(bus, work);
    }

    /// Worker entry point
    ///
    /// Keeps replenishing while requests arrive and pages can be had. A pass
    /// that allocates nothing ends the run; if its restock asked for more,
    /// that request is already back on the work queue.
    pub fn run_replenish_work<W: WorkQueue + ?Sized>(&self, bus: &B, work: &W) {
        if !self.replenish.begin() {
            return;
        }
        let _run = WorkerRun(&self.replenish);
        while self.replenish.take_request() {
            let added = self.allocate(bus, AllocMode::MayBlock);
            self.restock(bus, work);
            if added == 0 {
                break;
            }
        }
    }
}
