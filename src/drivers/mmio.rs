//! Memory-mapped register window
//!
//! `RegisterIo` over a physical BAR or platform MMIO region, using the
//! `volatile` crate for every access.

use volatile::Volatile;

use super::bus::RegisterIo;

pub struct MmioRegisters {
    base: usize,
    len: usize,
}

impl MmioRegisters {
    /// Wrap a mapped register window
    ///
    /// # Safety
    ///
    /// `base..base + len` must be a device register window mapped as device
    /// memory for the lifetime of the returned value, with 4-byte aligned
    /// registers and no other owner performing conflicting accesses.
    pub const unsafe fn new(base: usize, len: usize) -> Self {
        Self { base, len }
    }

    #[inline]
    fn reg_addr(&self, offset: usize, width: usize) -> usize {
        assert!(
            offset + width <= self.len,
            "register offset 0x{:X} outside window of 0x{:X} bytes",
            offset,
            self.len
        );
        self.base + offset
    }
}

/// Order earlier memory stores (descriptor words) before a register write
#[inline]
fn write_barrier() {
    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    // SAFETY: DMB has no side effects besides ordering.
    unsafe {
        core::arch::asm!("dmb sy", options(nostack));
    }
    #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
}

impl RegisterIo for MmioRegisters {
    fn read32(&self, offset: usize) -> u32 {
        let reg_addr = self.reg_addr(offset, 4);
        // SAFETY: Address is inside the window guaranteed by `new`.
        unsafe {
            let reg = reg_addr as *mut Volatile<u32>;
            (*reg).read()
        }
    }

    fn write32(&self, offset: usize, value: u32) {
        let reg_addr = self.reg_addr(offset, 4);
        write_barrier();
        // SAFETY: Address is inside the window guaranteed by `new`.
        unsafe {
            let reg = reg_addr as *mut Volatile<u32>;
            (*reg).write(value);
        }
    }

    fn write8(&self, offset: usize, value: u8) {
        let reg_addr = self.reg_addr(offset, 1);
        write_barrier();
        // SAFETY: Address is inside the window guaranteed by `new`.
        unsafe {
            let reg = reg_addr as *mut Volatile<u8>;
            (*reg).write(value);
        }
    }
}
