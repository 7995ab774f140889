//! Ring and pool under one lock, and restock
//!
//! Restock moves mapped buffers from the free list into empty ring slots and
//! tells the device about them in batches of eight.

use crate::drivers::bus::{Bus, CoherentWords, RegisterIo};
use crate::rx::pool::BufferPool;
use crate::rx::ring::RxRing;
use crate::rx::RxEngine;
use crate::transport::WorkQueue;

/// Consolidated receive queue state
pub struct RxQueue<P, C> {
    pub ring: RxRing<C>,
    pub pool: BufferPool<P>,
}

impl<P, C: CoherentWords> RxQueue<P, C> {
    pub fn new(ring: RxRing<C>, pool: BufferPool<P>) -> Self {
        Self { ring, pool }
    }

    /// Fill empty ring slots from the free list; returns how many moved
    pub fn fill_ring(&mut self) -> usize {
        let mut moved = 0;
        while self.ring.space() > 0 && self.pool.free_count() > 0 {
            let Some(handle) = self.pool.take_free() else {
                break;
            };
            let Some(dma) = self.pool.dma(handle) else {
                // Free-list entry without memory; park it where the
                // replenisher will find it.
                self.pool.release_to_unused(handle);
                continue;
            };
            if !self.ring.push(handle, dma) {
                self.pool.release_to_free(handle);
                break;
            }
            moved += 1;
        }
        moved
    }

    pub fn check_ownership(&self) -> bool {
        self.pool.check_ownership(self.ring.slots())
    }
}

impl<B: Bus> RxEngine<B> {
    /// Refill the ring from pre-allocated buffers
    ///
    /// Schedules the background replenisher when the free list runs low and
    /// publishes the write pointer when a new batch of 8 became visible.
    /// With nothing to move and nothing to publish this touches neither the
    /// ring nor any register.
    pub fn restock<W: WorkQueue + ?Sized>(&self, bus: &B, work: &W) {
        let (moved, free_count, stale) = {
            let mut q = self.queue.lock();
            let moved = q.fill_ring();
            (moved, q.pool.free_count(), q.ring.write_ptr_stale())
        };
        if moved > 0 {
            log::trace!("[RX] restocked {} buffers", moved);
        }

        if free_count <= self.config.low_watermark {
            self.replenish.schedule(work);
        }

        if stale {
            let mut q = self.queue.lock();
            q.ring.set_need_update();
            q.ring.update_write_ptr(bus);
        }
    }

    /// Push the write pointer to the device again
    ///
    /// Used after the device wakes from power-down and may have missed the
    /// last update.
    pub fn update_write_ptr<R: RegisterIo + ?Sized>(&self, regs: &R) {
        let mut q = self.queue.lock();
        q.ring.set_need_update();
        q.ring.update_write_ptr(regs);
    }
}

#[cfg(test)]
mod tests {
    use crate::config::RxConfig;
    use crate::drivers::csr::FH_RSCSR_CHNL0_WPTR;
    use crate::testing::{harness, TestBus};

    #[test]
    fn restock_fills_all_but_guard_slots() {
        let t = harness(RxConfig::new().with_queue_size(16).with_pool_size(32));
        t.transport.rx().allocate(t.transport.bus(), crate::drivers::bus::AllocMode::MayBlock);
        t.transport.rx().restock(t.transport.bus(), t.transport.work());

        let ring = t.transport.ring_state();
        assert_eq!(ring.occupied, 14);
        assert_eq!(ring.write, 14);
        assert_eq!(ring.write_actual, 8);
        assert_eq!(t.transport.pool_stats().free, 18);
        assert_eq!(t.bus.reg_writes(FH_RSCSR_CHNL0_WPTR), [8]);
        assert!(t.transport.check_ownership());
    }

    #[test]
    fn restock_twice_is_idempotent() {
        let t = harness(RxConfig::new().with_queue_size(16).with_pool_size(32));
        let rx = t.transport.rx();
        rx.allocate(t.transport.bus(), crate::drivers::bus::AllocMode::MayBlock);
        rx.restock(t.transport.bus(), t.transport.work());

        let before = t.transport.ring_state();
        let writes = t.bus.write_count();
        rx.restock(t.transport.bus(), t.transport.work());
        assert_eq!(t.transport.ring_state(), before);
        assert_eq!(t.bus.write_count(), writes);
    }

    #[test]
    fn restock_with_empty_free_list_changes_nothing() {
        let t = harness(RxConfig::new().with_queue_size(16).with_pool_size(32));
        let before = t.transport.ring_state();
        t.transport.rx().restock(t.transport.bus(), t.transport.work());
        assert_eq!(t.transport.ring_state(), before);
        assert_eq!(t.bus.write_count(), 0);
        // Free list at the watermark asks for a refill
        assert_eq!(t.work.replenish_requests(), 1);
    }

    #[test]
    fn published_pointer_is_batch_aligned() {
        let t = harness(RxConfig::new().with_queue_size(16).with_pool_size(32));
        t.bus.set_alloc_budget(Some(5));
        t.transport.rx().allocate(t.transport.bus(), crate::drivers::bus::AllocMode::MayBlock);
        t.transport.rx().restock(t.transport.bus(), t.transport.work());

        // Five buffers do not complete a batch
        let ring = t.transport.ring_state();
        assert_eq!(ring.write, 5);
        assert_eq!(ring.write_actual, 0);
        assert!(t.bus.reg_writes(FH_RSCSR_CHNL0_WPTR).is_empty());

        t.bus.set_alloc_budget(None);
        t.transport.rx().allocate(t.transport.bus(), crate::drivers::bus::AllocMode::MayBlock);
        t.transport.rx().restock(t.transport.bus(), t.transport.work());
        for value in t.bus.reg_writes(FH_RSCSR_CHNL0_WPTR) {
            assert_eq!(value % 8, 0);
            assert!(value as usize <= t.transport.ring_state().write);
        }
    }

    #[test]
    fn wakeup_republishes_write_pointer() {
        let t = harness(RxConfig::new().with_queue_size(16).with_pool_size(32));
        let bus: &TestBus = t.transport.bus();
        t.transport.rx().allocate(bus, crate::drivers::bus::AllocMode::MayBlock);
        t.transport.rx().restock(bus, t.transport.work());
        t.transport.rx().update_write_ptr(bus);
        assert_eq!(t.bus.reg_writes(FH_RSCSR_CHNL0_WPTR), [8, 8]);
    }
}
