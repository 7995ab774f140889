//! Interrupt cause table
//!
//! Instead of reading `CSR_INT` (slow across the bus) the device writes each
//! interrupt's cause word into a page of host memory and advances through it
//! circularly. The top half ORs every non-zero word from the cursor up to
//! the first zero, clears them and moves the cursor past them.
//!
//! Words use a compressed layout: bits 0-7 map to `CSR_INT` bits 0-7 and bits
//! 8-15 map to `CSR_INT` bits 24-31.

use crate::drivers::bus::{CoherentWords, DmaMemory};
use crate::drivers::csr::{IntCause, CSR_DRAM_INIT_TBL_WRAP_CHECK, CSR_DRAM_INT_TBL_ENABLE};
use crate::error::{Result, RxError};

/// The table is one device page, aligned to its own size
pub const ICT_SHIFT: u32 = 12;
pub const ICT_SIZE: usize = 1 << ICT_SHIFT;
pub const ICT_COUNT: usize = ICT_SIZE / core::mem::size_of::<u32>();

pub struct CauseTable<C> {
    table: C,
    index: usize,
    enabled: bool,
}

impl<C: CoherentWords> CauseTable<C> {
    /// Allocate and zero the table
    pub fn allocate<D: DmaMemory<Coherent = C> + ?Sized>(dma: &D) -> Result<Self> {
        let table = dma.alloc_coherent(ICT_COUNT).ok_or(RxError::OutOfMemory)?;
        if table.dma_addr() & (ICT_SIZE as u64 - 1) != 0 {
            log::warn!(
                "[ICT] table at 0x{:X} not aligned to {} bytes",
                table.dma_addr(),
                ICT_SIZE
            );
            return Err(RxError::CauseTableMisaligned);
        }
        log::debug!("[ICT] dma addr 0x{:X}", table.dma_addr());

        table.fill(0);
        Ok(Self {
            table,
            index: 0,
            enabled: false,
        })
    }

    /// Zero the table and rewind the cursor
    pub fn reset(&mut self) {
        self.table.fill(0);
        self.index = 0;
    }

    /// Value for `CSR_DRAM_INT_TBL_REG` pointing the device at this table
    pub fn register_value(&self) -> u32 {
        (self.table.dma_addr() >> ICT_SHIFT) as u32
            | CSR_DRAM_INT_TBL_ENABLE
            | CSR_DRAM_INIT_TBL_WRAP_CHECK
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn cursor(&self) -> usize {
        self.index
    }

    /// Consume the current batch of cause words
    ///
    /// Returns the OR of every word from the cursor to the first zero word,
    /// or 0 if the device wrote nothing since the last call.
    pub fn collect(&mut self) -> u32 {
        let mut val = 0;
        let mut read = self.table.read(self.index);
        while read != 0 {
            log::trace!("[ICT] index {} value 0x{:08X}", self.index, read);
            val |= read;
            self.table.write(self.index, 0);
            self.index = (self.index + 1) % ICT_COUNT;
            read = self.table.read(self.index);
        }
        val
    }
}

/// Convert accumulated table words to `CSR_INT` layout
pub fn fold(mut val: u32) -> IntCause {
    // Device reads all-ones when it is gone; nothing to service
    if val == 0xFFFF_FFFF {
        return IntCause::empty();
    }
    // Interrupt coalescing can drop the RX bit (15) while leaving bits
    // 18 and 19 set
    if val & 0xC0000 != 0 {
        val |= 0x8000;
    }
    IntCause::from_bits_retain((val & 0x00FF_00FF) | ((val & 0xFF00) << 16))
}
