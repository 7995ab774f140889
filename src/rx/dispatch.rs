//! Completion dispatch
//!
//! Walks the ring from `read` up to the index the device reports as closed,
//! delivers every frame of every buffer to the consumer and recycles the
//! buffers. When more than half of the ring is waiting to be restocked the
//! walk refills it every 8 buffers so the device does not run dry mid-burst.

use alloc::sync::Arc;

use crate::drivers::bus::{Bus, DmaPage};
use crate::rx::frame::{Frames, PendingCommand, RxCmdBuffer};
use crate::rx::pool::BufferHandle;
use crate::rx::replenish::{check_dma_addr, ReplenishMode};
use crate::rx::{RxCounters, RxEngine};
use crate::transport::{OpMode, WorkQueue};

/// Buffers processed between urgent refills while the ring is starved
const REFILL_BATCH: u32 = 8;

impl<B: Bus> RxEngine<B> {
    /// Process every buffer the device has closed since the last call
    pub fn rx_handle<O, W>(&self, bus: &B, op_mode: &O, work: &W)
    where
        O: OpMode<B::Page> + ?Sized,
        W: WorkQueue + ?Sized,
    {
        let (r, mut i, size, fill_rx) = {
            let q = self.queue.lock();
            let size = q.ring.size();
            let r = q.ring.closed_index();
            let total_empty = r.wrapping_sub(q.ring.write_actual()) & (size - 1);
            (r, q.ring.read(), size, total_empty > size / 2)
        };

        if i == r {
            log::debug!("[RX] HW = SW = {}", r);
        }

        // Starts full so a starved ring is refilled after the first buffer
        let mut count = REFILL_BATCH;
        while i != r {
            let slot = self.queue.lock().ring.take_slot(i);
            log::trace!("[RX] rxbuf: HW = {}, SW = {} ({:?})", r, i, slot);
            match slot {
                Some(handle) => self.handle_rxbuf(bus, op_mode, handle),
                None => {
                    RxCounters::bump(&self.counters.empty_slots);
                    log::warn!("[RX] slot {} closed by device but holds no buffer", i);
                }
            }

            i = (i + 1) & (size - 1);
            if fill_rx {
                count += 1;
                if count >= REFILL_BATCH {
                    self.queue.lock().ring.set_read(i);
                    self.replenish(bus, work, ReplenishMode::Urgent);
                    count = 0;
                }
            }
        }

        self.queue.lock().ring.set_read(i);
        if fill_rx {
            self.replenish(bus, work, ReplenishMode::Urgent);
        } else {
            self.restock(bus, work);
        }
    }

    /// Deliver the frames of one buffer and return it to the pool
    fn handle_rxbuf<O>(&self, bus: &B, op_mode: &O, handle: BufferHandle)
    where
        O: OpMode<B::Page> + ?Sized,
    {
        let max_len = self.config.rx_buf_size();
        let Some((page, dma)) = self.queue.lock().pool.detach(handle) else {
            log::warn!("[RX] buffer {} in ring without a page", handle.index());
            self.queue.lock().pool.release_to_unused(handle);
            return;
        };
        bus.unmap_page(dma, max_len);

        let mut page_stolen = false;
        for (offset, hdr) in Frames::new(page.bytes()) {
            let mut rxcb = RxCmdBuffer::new(Arc::clone(&page), offset, max_len);

            log::trace!("[RX] cmd at offset {}: 0x{:02x}", offset, hdr.cmd);

            // Firmware should flag its own frames, but a few responses
            // to commands never carry a host buffer regardless
            let reclaim =
                hdr.is_command_response() && !self.config.no_reclaim_cmds.contains(&hdr.cmd);
            let cmd = reclaim.then_some(PendingCommand {
                index: hdr.index(),
                sequence: hdr.sequence,
                cmd: hdr.cmd,
            });

            let status = op_mode.rx(&mut rxcb, cmd);
            RxCounters::bump(&self.counters.frames);

            if let Some(cmd) = cmd {
                if !rxcb.page_stolen() {
                    op_mode.command_complete(&rxcb, cmd, status);
                } else {
                    log::warn!("[RX] Claim null rxb? cmd 0x{:02x}", cmd.cmd);
                }
            }

            page_stolen |= rxcb.page_stolen();
        }

        if page_stolen {
            drop(page);
            RxCounters::bump(&self.counters.pages_stolen);
            self.queue.lock().pool.release_to_unused(handle);
            return;
        }

        let dma = bus.map_page(&page, max_len);
        check_dma_addr(dma);
        RxCounters::bump(&self.counters.pages_recycled);
        let mut q = self.queue.lock();
        match q.pool.attach(handle, page, dma) {
            Ok(()) => q.pool.release_to_free(handle),
            Err(page) => {
                // Someone else gave the handle memory while it was detached;
                // keep their page reachable through the free list
                q.pool.release_to_free(handle);
                drop(q);
                bus.unmap_page(dma, max_len);
                drop(page);
            }
        }
    }
}
