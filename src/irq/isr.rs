//! Top half
//!
//! Runs in hard-IRQ context with the IRQ lock held. Never touches the
//! receive ring: it only masks the device, records what happened and
//! schedules the bottom half.

use crate::drivers::bus::{CoherentWords, RegisterIo};
use crate::drivers::csr::{IntCause, CSR_INT, CSR_INT_MASK};
use crate::irq::cause_table::fold;
use crate::irq::{IrqEngine, IrqReturn, IrqState, NotificationMode};
use crate::transport::WorkQueue;

/// All-ones or the 0xA5A5A5Ax pattern means the device fell off the bus
fn hardware_gone(inta: u32) -> bool {
    inta == 0xFFFF_FFFF || (inta & 0xFFFF_FFF0) == 0xA5A5_A5A0
}

impl<C: CoherentWords> IrqEngine<C> {
    /// Interrupt entry point
    ///
    /// Uses the cause table once it is enabled, `CSR_INT` before that.
    pub fn isr<R, W>(&self, regs: &R, work: &W) -> IrqReturn
    where
        R: RegisterIo + ?Sized,
        W: WorkQueue + ?Sized,
    {
        let mut st = self.state.lock();
        let use_table =
            matches!(&st.mode, NotificationMode::CauseTable(t) if t.is_enabled());
        if use_table {
            self.isr_cause_table(&mut st, regs, work)
        } else {
            self.isr_direct(&mut st, regs, work)
        }
    }

    /// Re-enable only if interrupts were on and no bottom half is owed
    fn reenable_if_idle<R: RegisterIo + ?Sized>(&self, st: &IrqState<C>, regs: &R) {
        if self.interrupts_enabled() && st.pending.is_empty() {
            self.enable_locked(st.inta_mask, regs);
        }
    }

    fn isr_direct<R, W>(&self, st: &mut IrqState<C>, regs: &R, work: &W) -> IrqReturn
    where
        R: RegisterIo + ?Sized,
        W: WorkQueue + ?Sized,
    {
        // Mask (without acking) so the device stops asserting the line;
        // whoever services the causes unmasks again
        let inta_mask = regs.read32(CSR_INT_MASK);
        regs.write32(CSR_INT_MASK, 0x0000_0000);

        let inta = regs.read32(CSR_INT);

        // Shared line or a spurious assertion
        if inta == 0 {
            log::debug!("[IRQ] Ignore interrupt, inta == 0");
            self.reenable_if_idle(st, regs);
            return IrqReturn::None;
        }

        if hardware_gone(inta) {
            log::warn!("[IRQ] HARDWARE GONE?? INTA == 0x{:08X}", inta);
            return IrqReturn::Handled;
        }

        log::debug!("[IRQ] ISR inta 0x{:08X}, enabled 0x{:08X}", inta, inta_mask);

        st.pending |= IntCause::from_bits_retain(inta);
        work.schedule_bottom_half();
        IrqReturn::Handled
    }

    fn isr_cause_table<R, W>(&self, st: &mut IrqState<C>, regs: &R, work: &W) -> IrqReturn
    where
        R: RegisterIo + ?Sized,
        W: WorkQueue + ?Sized,
    {
        let inta_mask = regs.read32(CSR_INT_MASK);
        regs.write32(CSR_INT_MASK, 0x0000_0000);

        let NotificationMode::CauseTable(table) = &mut st.mode else {
            return IrqReturn::None;
        };
        let val = table.collect();
        if val == 0 {
            log::debug!("[ICT] Ignore interrupt, inta == 0");
            self.reenable_if_idle(st, regs);
            return IrqReturn::None;
        }

        let inta = fold(val);
        log::debug!(
            "[ICT] ISR inta 0x{:08X}, enabled 0x{:08X} ict 0x{:08X}",
            inta.bits(),
            inta_mask,
            val
        );

        st.pending |= inta;
        if !inta.is_empty() {
            work.schedule_bottom_half();
        } else {
            // Only the all-ones pattern folds to nothing; the bottom half
            // will not run, so unmask here
            self.reenable_if_idle(st, regs);
        }
        IrqReturn::Handled
    }
}
