//! Receive descriptor ring
//!
//! The descriptor array lives in coherent memory: word `i` holds the bus
//! address of the buffer in slot `i`, shifted right by 8. Next to it the
//! device keeps a small status block whose first half-word is the index of
//! the last descriptor it closed.
//!
//! Indices:
//!
//! ```text
//!           read          closed        write_actual   write
//!            |   filled     |   device    |  staged     |   empty
//! -----------+--------------+-------------+-------------+-----------
//! ```
//!
//! - `read`: first slot the driver has not processed yet
//! - `write`: next slot restock fills
//! - `write_actual`: what the device was last told (`write` rounded down to 8)

use alloc::vec::Vec;

use crate::drivers::bus::{CoherentWords, RegisterIo};
use crate::drivers::csr::{FH_RSCSR_CHNL0_WPTR, RB_STTS_CLOSED_MASK};
use crate::rx::pool::BufferHandle;

/// Size of the status block in words
pub const RB_STATUS_WORDS: usize = 4;

/// Slots kept empty so a full ring never looks empty to the device
const RING_GUARD: usize = 2;

/// Encode a bus address as a descriptor word
#[inline]
pub fn dma_to_descriptor(dma: u64) -> u32 {
    (dma >> 8) as u32
}

/// Position snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingState {
    pub read: usize,
    pub write: usize,
    pub write_actual: usize,
    pub need_update: bool,
    /// Slots currently holding a buffer
    pub occupied: usize,
}

pub struct RxRing<C> {
    bd: C,
    rb_status: C,
    slots: Vec<Option<BufferHandle>>,
    read: usize,
    write: usize,
    write_actual: usize,
    need_update: bool,
}

impl<C: CoherentWords> RxRing<C> {
    /// Build a ring over a descriptor array and a status block
    ///
    /// The ring size is the descriptor array length, which must be a power
    /// of two.
    pub fn new(bd: C, rb_status: C) -> Self {
        let size = bd.len();
        debug_assert!(size.is_power_of_two());
        debug_assert!(rb_status.len() >= 1);
        Self {
            bd,
            rb_status,
            slots: alloc::vec![None; size],
            read: 0,
            write: 0,
            write_actual: 0,
            need_update: false,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    fn mask(&self) -> usize {
        self.size() - 1
    }

    pub fn read(&self) -> usize {
        self.read
    }

    pub fn write(&self) -> usize {
        self.write
    }

    pub fn write_actual(&self) -> usize {
        self.write_actual
    }

    /// Move the consumer boundary after processing up to (not including) `index`
    pub fn set_read(&mut self, index: usize) {
        self.read = index & self.mask();
    }

    /// Slots restock may still fill
    pub fn space(&self) -> usize {
        let mut s = self.read as isize - self.write as isize;
        if s <= 0 {
            s += self.size() as isize;
        }
        (s - RING_GUARD as isize).max(0) as usize
    }

    /// Last descriptor index the device reports as closed
    pub fn closed_index(&self) -> usize {
        let closed = self.rb_status.read(0) & 0xFFFF & RB_STTS_CLOSED_MASK;
        closed as usize & self.mask()
    }

    /// Place a buffer in the slot at `write` and advance `write`
    ///
    /// Returns false without touching the ring if the slot still holds a
    /// buffer.
    pub fn push(&mut self, handle: BufferHandle, dma: u64) -> bool {
        let w = self.write;
        if !invariant!(
            self.slots[w].is_none(),
            "[RX] restock overwriting occupied slot {}",
            w
        ) {
            return false;
        }
        self.bd.write(w, dma_to_descriptor(dma));
        self.slots[w] = Some(handle);
        self.write = (w + 1) & self.mask();
        true
    }

    /// Take the buffer out of slot `index`, leaving it empty
    pub fn take_slot(&mut self, index: usize) -> Option<BufferHandle> {
        let i = index & self.mask();
        self.slots[i].take()
    }

    pub fn slots(&self) -> &[Option<BufferHandle>] {
        &self.slots
    }

    /// True when the device has not been told about every 8-slot batch
    pub fn write_ptr_stale(&self) -> bool {
        self.write & !7 != self.write_actual
    }

    pub fn set_need_update(&mut self) {
        self.need_update = true;
    }

    /// Publish the write pointer if an update is pending
    ///
    /// The device expects a multiple of 8, so the value is rounded down;
    /// up to 7 filled slots may stay invisible until the next batch.
    pub fn update_write_ptr<R: RegisterIo + ?Sized>(&mut self, regs: &R) {
        if !self.need_update {
            return;
        }
        self.write_actual = self.write & !7;
        regs.write32(FH_RSCSR_CHNL0_WPTR, self.write_actual as u32);
        self.need_update = false;
    }

    pub fn bd_dma(&self) -> u64 {
        self.bd.dma_addr()
    }

    pub fn rb_status_dma(&self) -> u64 {
        self.rb_status.dma_addr()
    }

    /// Forget every slot and zero device-shared memory
    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.bd.fill(0);
        self.rb_status.fill(0);
        self.read = 0;
        self.write = 0;
        self.write_actual = 0;
        self.need_update = false;
    }

    pub fn state(&self) -> RingState {
        RingState {
            read: self.read,
            write: self.write,
            write_actual: self.write_actual,
            need_update: self.need_update,
            occupied: self.slots.iter().flatten().count(),
        }
    }
}
