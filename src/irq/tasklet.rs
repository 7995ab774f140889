//! Bottom half
//!
//! Services everything the top half collected. Runs single-threaded per
//! device, outside hard-IRQ context, without the IRQ lock held except for
//! the initial ack.

use crate::drivers::bus::{Bus, CoherentWords};
use crate::drivers::csr::{
    IntCause, CSR_FH_INT_RX_MASK, CSR_FH_INT_STATUS, CSR_FH_INT_TX_MASK,
    CSR_GP_CNTRL, CSR_GP_CNTRL_REG_FLAG_HW_RF_KILL_SW, CSR_INT, CSR_INT_PERIODIC_DIS,
    CSR_INT_PERIODIC_ENA, CSR_INT_PERIODIC_REG,
};
use crate::irq::{bump, IrqEngine};
use crate::rx::RxEngine;
use crate::transport::{OpMode, WorkQueue};

impl<C: CoherentWords> IrqEngine<C> {
    pub fn irq_tasklet<B, O, W>(&self, bus: &B, rx: &RxEngine<B>, op_mode: &O, work: &W)
    where
        B: Bus<Coherent = C>,
        O: OpMode<B::Page> + ?Sized,
        W: WorkQueue + ?Sized,
    {
        let (mut inta, inta_mask) = {
            let mut st = self.state.lock();
            // The mask does not stop every cause (SCD fires regardless) and
            // the cause table can miss masked ones, so ack all of them
            bus.write32(CSR_INT, st.pending.bits() | !st.inta_mask.bits());
            let inta = st.pending;
            st.pending = IntCause::empty();
            (inta, st.inta_mask)
        };
        log::debug!(
            "[IRQ] inta 0x{:08X}, enabled 0x{:08X}",
            inta.bits(),
            inta_mask.bits()
        );

        let mut handled = IntCause::empty();

        if inta.contains(IntCause::HW_ERR) {
            log::error!("[IRQ] Hardware error detected. Restarting.");
            self.disable_interrupts(bus);
            bump(&self.counters.hw);
            op_mode.nic_error();
            return;
        }

        if inta.contains(IntCause::SCD) {
            log::debug!("[IRQ] Scheduler finished to transmit the frame/frames.");
            bump(&self.counters.sch);
        }
        if inta.contains(IntCause::ALIVE) {
            log::debug!("[IRQ] Alive interrupt");
            bump(&self.counters.alive);
        }
        inta.remove(IntCause::SCD | IntCause::ALIVE);

        if inta.contains(IntCause::RF_KILL) {
            let hw_rfkill = bus.read32(CSR_GP_CNTRL) & CSR_GP_CNTRL_REG_FLAG_HW_RF_KILL_SW == 0;
            log::warn!(
                "[IRQ] RF_KILL bit toggled to {}.",
                if hw_rfkill { "disable radio" } else { "enable radio" }
            );
            bump(&self.counters.rfkill);
            op_mode.hw_rf_kill(hw_rfkill);
            handled |= IntCause::RF_KILL;
        }

        if inta.contains(IntCause::CT_KILL) {
            log::error!("[IRQ] Microcode CT kill error detected.");
            bump(&self.counters.ctkill);
            handled |= IntCause::CT_KILL;
        }

        if inta.contains(IntCause::SW_ERR) {
            log::error!(
                "[IRQ] Microcode SW error detected. Restarting 0x{:X}.",
                inta.bits()
            );
            bump(&self.counters.sw);
            op_mode.nic_error();
            handled |= IntCause::SW_ERR;
        }

        if inta.contains(IntCause::WAKEUP) {
            log::debug!("[IRQ] Wakeup interrupt");
            rx.update_write_ptr(bus);
            op_mode.wake_tx_queues();
            bump(&self.counters.wakeup);
            handled |= IntCause::WAKEUP;
        }

        if inta.intersects(IntCause::ANY_RX) {
            log::debug!("[IRQ] Rx interrupt");
            if inta.intersects(IntCause::REAL_RX) {
                handled |= IntCause::REAL_RX;
                bus.write32(CSR_FH_INT_STATUS, CSR_FH_INT_RX_MASK);
            }
            if inta.contains(IntCause::RX_PERIODIC) {
                handled |= IntCause::RX_PERIODIC;
                bus.write32(CSR_INT, IntCause::RX_PERIODIC.bits());
            }

            // The device raises RX before the status block is updated, so
            // an interrupt can arrive with nothing visible yet. The periodic
            // interrupt is a one-shot sweep for such stragglers.
            bus.write8(CSR_INT_PERIODIC_REG, CSR_INT_PERIODIC_DIS);
            rx.rx_handle(bus, op_mode, work);

            // Re-arm only after real RX; a periodic-only wakeup found
            // nothing left behind
            if inta.intersects(IntCause::REAL_RX) {
                bus.write8(CSR_INT_PERIODIC_REG, CSR_INT_PERIODIC_ENA);
            }
            bump(&self.counters.rx);
        }

        if inta.contains(IntCause::FH_TX) {
            bus.write32(CSR_FH_INT_STATUS, CSR_FH_INT_TX_MASK);
            log::debug!("[IRQ] uCode load interrupt");
            bump(&self.counters.tx);
            handled |= IntCause::FH_TX;
            op_mode.control_tx_complete();
        }

        let unhandled = inta.bits() & !handled.bits();
        if unhandled != 0 {
            log::warn!("[IRQ] Unhandled INTA bits 0x{:08X}", unhandled);
            bump(&self.counters.unhandled);
        }

        let disabled = inta.bits() & !inta_mask.bits();
        if disabled != 0 {
            log::warn!("[IRQ] Disabled INTA bits 0x{:08X} were pending", disabled);
        }

        if self.interrupts_enabled() {
            self.enable_interrupts(bus);
        } else if handled.contains(IntCause::RF_KILL) {
            self.enable_rfkill_int(bus);
        }
    }
}
