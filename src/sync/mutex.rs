//! Interrupt-masking mutex
//!
//! This module provides `Mutex`, a spinlock that disables interrupts while
//! the lock is held. The receive queue lock is taken both by the interrupt
//! bottom half and by the background replenish worker; the top half takes the
//! interrupt-state lock. Without masking, an interrupt arriving while normal
//! code holds one of these locks would spin forever on the same CPU:
//!
//! ```text
//! 1. Replenish worker acquires the queue lock
//! 2. Interrupt fires (RX descriptors closed)
//! 3. Handler tries to acquire the queue lock
//! 4. DEADLOCK: handler spins forever, worker never resumes
//! ```
//!
//! ## Implementation
//!
//! Same order as Linux `spin_lock_irqsave()`:
//! 1. Save current IRQ state
//! 2. Disable interrupts
//! 3. Acquire the spinlock
//! 4. On drop: release the lock, then restore IRQ state
//!
//! On bare-metal aarch64 the IRQ state is the DAIF register. On hosted
//! targets the operating system owns interrupt masking and only the spinlock
//! part applies.
//!
//! ## Rule
//!
//! Never allocate memory or call into the DMA allocator while holding a
//! `Mutex` from this module. Allocation may sleep (deferred replenish) and the
//! allocator may take its own locks.

use core::ops::{Deref, DerefMut};

/// Mutex that disables interrupts while locked
///
/// # Example
/// ```ignore
/// let queue: Mutex<RxQueue<P, C>> = Mutex::new(queue);
///
/// let mut q = queue.lock();
/// q.fill_ring();
/// // Interrupts re-enabled when guard is dropped
/// ```
pub struct Mutex<T> {
    inner: spin::Mutex<T>,
}

impl<T> Mutex<T> {
    /// Create a new mutex
    pub const fn new(value: T) -> Self {
        Self {
            inner: spin::Mutex::new(value),
        }
    }

    /// Acquire the lock (disables interrupts)
    ///
    /// Returns a guard that will restore interrupts when dropped.
    /// Spins if the lock is already held (should be rare - locks held briefly).
    pub fn lock(&self) -> MutexGuard<'_, T> {
        // Mask first so the holder can never be interrupted by a handler
        // that wants the same lock.
        let irq_state = IrqState::disable();
        let guard = self.inner.lock();

        MutexGuard { guard, irq_state }
    }

    /// Consume the mutex and return the protected value
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

/// Guard returned by `Mutex::lock()`
///
/// Fields drop in declaration order: the spinlock is released before the
/// saved IRQ state is restored.
pub struct MutexGuard<'a, T> {
    guard: spin::MutexGuard<'a, T>,
    irq_state: IrqState,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

/// Saved IRQ state (from DAIF register on bare-metal aarch64)
///
/// DAIF = Debug, SError, IRQ, FIQ mask bits
/// We only care about IRQ (bit 1) for this implementation.
struct IrqState {
    #[cfg_attr(
        not(all(target_arch = "aarch64", target_os = "none")),
        allow(dead_code)
    )]
    daif: u64,
}

impl IrqState {
    /// Disable IRQs and return previous state
    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    fn disable() -> Self {
        let daif: u64;

        // SAFETY: Reading/writing DAIF is safe because:
        // 1. DAIF is accessible at EL1 (our exception level)
        // 2. MSR daifset disables interrupts atomically
        // 3. We save the old value to restore later
        unsafe {
            core::arch::asm!("mrs {}, daif", out(reg) daif, options(nomem, nostack));
            core::arch::asm!("msr daifset, #2", options(nomem, nostack));
        }

        Self { daif }
    }

    #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
    fn disable() -> Self {
        Self { daif: 0 }
    }

    /// Restore previous IRQ state
    #[cfg(all(target_arch = "aarch64", target_os = "none"))]
    fn restore(&self) {
        // SAFETY: Restoring a value we previously saved; single MSR write.
        unsafe {
            core::arch::asm!("msr daif, {}", in(reg) self.daif, options(nomem, nostack));
        }
    }

    #[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
    fn restore(&self) {}
}

impl Drop for IrqState {
    fn drop(&mut self) {
        self.restore();
    }
}
