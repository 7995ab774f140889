//! Interrupt front-end
//!
//! Split the Linux way:
//!
//! - `isr`: top half. Masks the device, collects the cause bits into
//!   `pending` and schedules the bottom half. Runs in hard-IRQ context.
//! - `tasklet`: bottom half. Acks and services every pending cause, then
//!   unmasks the device again.
//! - `cause_table`: host-memory cause delivery used instead of reading
//!   `CSR_INT` once the table is enabled.
//!
//! ## States
//!
//! ```text
//! enabled --(top half)--> masked + pending --(bottom half)--> enabled
//!                                  |
//!                                  +--(HW error)--> disabled until re-enabled
//! ```

pub mod cause_table;
pub mod isr;
pub mod tasklet;

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::drivers::bus::{CoherentWords, RegisterIo};
use crate::drivers::csr::{
    IntCause, CSR_DRAM_INT_TBL_REG, CSR_FH_INT_STATUS, CSR_INT, CSR_INT_MASK,
};
use crate::sync::Mutex;

use cause_table::CauseTable;

/// Top-half verdict, as reported to the interrupt controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqReturn {
    /// Not ours (shared line) or nothing pending
    None,
    Handled,
}

/// How the top half learns the interrupt causes
pub enum NotificationMode<C> {
    Direct,
    CauseTable(CauseTable<C>),
}

/// Per-cause interrupt counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IsrStats {
    pub hw: u64,
    pub sw: u64,
    pub sch: u64,
    pub alive: u64,
    pub rfkill: u64,
    pub ctkill: u64,
    pub wakeup: u64,
    pub rx: u64,
    pub tx: u64,
    pub unhandled: u64,
}

#[derive(Default)]
struct IsrCounters {
    hw: AtomicU64,
    sw: AtomicU64,
    sch: AtomicU64,
    alive: AtomicU64,
    rfkill: AtomicU64,
    ctkill: AtomicU64,
    wakeup: AtomicU64,
    rx: AtomicU64,
    tx: AtomicU64,
    unhandled: AtomicU64,
}

#[inline]
fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// State shared by top and bottom half, guarded by the IRQ lock
pub struct IrqState<C> {
    /// Causes collected by the top half, not yet serviced
    pending: IntCause,
    /// Causes the device is allowed to raise
    inta_mask: IntCause,
    mode: NotificationMode<C>,
}

pub struct IrqEngine<C> {
    state: Mutex<IrqState<C>>,
    int_enabled: AtomicBool,
    counters: IsrCounters,
}

impl<C: CoherentWords> IrqEngine<C> {
    pub fn new(mode: NotificationMode<C>) -> Self {
        let mut inta_mask = IntCause::INI_SET_MASK;
        if matches!(mode, NotificationMode::CauseTable(_)) {
            // Catches RX the device signalled before updating the status block
            inta_mask |= IntCause::RX_PERIODIC;
        }
        Self {
            state: Mutex::new(IrqState {
                pending: IntCause::empty(),
                inta_mask,
                mode,
            }),
            int_enabled: AtomicBool::new(false),
            counters: IsrCounters::default(),
        }
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.int_enabled.load(Ordering::SeqCst)
    }

    pub fn inta_mask(&self) -> IntCause {
        self.state.lock().inta_mask
    }

    /// Causes collected but not yet serviced
    pub fn pending(&self) -> IntCause {
        self.state.lock().pending
    }

    pub fn cause_table_enabled(&self) -> bool {
        matches!(&self.state.lock().mode, NotificationMode::CauseTable(t) if t.is_enabled())
    }

    /// Cursor of the cause table, if one is allocated
    pub fn cause_table_cursor(&self) -> Option<usize> {
        match &self.state.lock().mode {
            NotificationMode::CauseTable(t) => Some(t.cursor()),
            NotificationMode::Direct => None,
        }
    }

    fn enable_locked<R: RegisterIo + ?Sized>(&self, inta_mask: IntCause, regs: &R) {
        log::debug!("[IRQ] Enabling interrupts");
        self.int_enabled.store(true, Ordering::SeqCst);
        regs.write32(CSR_INT_MASK, inta_mask.bits());
    }

    fn disable_locked<R: RegisterIo + ?Sized>(&self, regs: &R) {
        self.int_enabled.store(false, Ordering::SeqCst);

        // Mask, then ack everything already latched
        regs.write32(CSR_INT_MASK, 0x0000_0000);
        regs.write32(CSR_INT, 0xFFFF_FFFF);
        regs.write32(CSR_FH_INT_STATUS, 0xFFFF_FFFF);
        log::debug!("[IRQ] Disabled interrupts");
    }

    pub fn enable_interrupts<R: RegisterIo + ?Sized>(&self, regs: &R) {
        let st = self.state.lock();
        self.enable_locked(st.inta_mask, regs);
    }

    pub fn disable_interrupts<R: RegisterIo + ?Sized>(&self, regs: &R) {
        let _st = self.state.lock();
        self.disable_locked(regs);
    }

    /// Unmask only the RF-kill switch, leaving the rest disabled
    pub fn enable_rfkill_int<R: RegisterIo + ?Sized>(&self, regs: &R) {
        log::debug!("[IRQ] Enabling rfkill interrupt");
        regs.write32(CSR_INT_MASK, IntCause::RF_KILL.bits());
    }

    /// Point the device at a zeroed cause table and switch the top half to it
    ///
    /// In direct mode this only enables interrupts.
    pub fn reset_cause_table<R: RegisterIo + ?Sized>(&self, regs: &R) {
        let mut st = self.state.lock();
        let inta_mask = st.inta_mask;
        let NotificationMode::CauseTable(table) = &mut st.mode else {
            self.enable_locked(inta_mask, regs);
            return;
        };

        self.disable_locked(regs);
        table.reset();
        let val = table.register_value();
        log::debug!("[ICT] CSR_DRAM_INT_TBL_REG = 0x{:08X}", val);
        regs.write32(CSR_DRAM_INT_TBL_REG, val);
        table.set_enabled(true);
        regs.write32(CSR_INT, inta_mask.bits());
        self.enable_locked(inta_mask, regs);
    }

    /// Fall back to reading `CSR_INT` directly; the table stays allocated
    pub fn disable_cause_table(&self) {
        if let NotificationMode::CauseTable(table) = &mut self.state.lock().mode {
            table.set_enabled(false);
        }
    }

    /// Free the cause table memory
    pub fn release_cause_table(&self) {
        let mut st = self.state.lock();
        if matches!(st.mode, NotificationMode::CauseTable(_)) {
            st.mode = NotificationMode::Direct;
            log::debug!("[ICT] table released");
        }
    }

    pub fn stats(&self) -> IsrStats {
        let c = &self.counters;
        IsrStats {
            hw: c.hw.load(Ordering::Relaxed),
            sw: c.sw.load(Ordering::Relaxed),
            sch: c.sch.load(Ordering::Relaxed),
            alive: c.alive.load(Ordering::Relaxed),
            rfkill: c.rfkill.load(Ordering::Relaxed),
            ctkill: c.ctkill.load(Ordering::Relaxed),
            wakeup: c.wakeup.load(Ordering::Relaxed),
            rx: c.rx.load(Ordering::Relaxed),
            tx: c.tx.load(Ordering::Relaxed),
            unhandled: c.unhandled.load(Ordering::Relaxed),
        }
    }
}
