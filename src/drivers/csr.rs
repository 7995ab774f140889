//! Control/status register map
//!
//! Offsets and bit definitions for the registers the receive path touches.
//! Everything else in the device register file belongs to the bus layer.

use bitflags::bitflags;

// Host interrupt registers
pub const CSR_INT: usize = 0x008;
pub const CSR_INT_MASK: usize = 0x00C;
pub const CSR_FH_INT_STATUS: usize = 0x010;
pub const CSR_GP_CNTRL: usize = 0x024;
pub const CSR_DRAM_INT_TBL_REG: usize = 0x0A0;

/// One-shot periodic RX interrupt control (byte register)
pub const CSR_INT_PERIODIC_REG: usize = 0x005;
pub const CSR_INT_PERIODIC_DIS: u8 = 0x00;
/// Fire once roughly 8 ms after enabling
pub const CSR_INT_PERIODIC_ENA: u8 = 0xFF;

/// RF-kill switch state, set while the radio is allowed to transmit
pub const CSR_GP_CNTRL_REG_FLAG_HW_RF_KILL_SW: u32 = 1 << 27;

// Cause table control
pub const CSR_DRAM_INT_TBL_ENABLE: u32 = 1 << 31;
pub const CSR_DRAM_INIT_TBL_WRAP_CHECK: u32 = 1 << 27;

// Flow handler status bits acked through CSR_FH_INT_STATUS
pub const CSR_FH_INT_RX_MASK: u32 = (1 << 30) | (1 << 17) | (1 << 16);
pub const CSR_FH_INT_TX_MASK: u32 = (1 << 1) | (1 << 0);

// Receive DMA channel 0
/// Status block base (device address >> 4)
pub const FH_RSCSR_CHNL0_STTS_WPTR_REG: usize = 0x1BC0;
/// Descriptor array base (device address >> 8)
pub const FH_RSCSR_CHNL0_RBDCB_BASE_REG: usize = 0x1BC4;
/// Write pointer; the device only accepts multiples of 8
pub const FH_RSCSR_CHNL0_WPTR: usize = 0x1BC8;

// Receive frame layout
pub const FH_RSCSR_FRAME_SIZE_MSK: u32 = 0x0000_3FFF;
pub const FH_RSCSR_FRAME_INVALID: u32 = 0x5555_0000;
pub const FH_RSCSR_FRAME_ALIGN: usize = 0x40;

/// Set in a response sequence number when the frame was not triggered by a
/// host command
pub const SEQ_RX_FRAME: u16 = 0x8000;

/// Bits of the status block's first word holding the closed descriptor index
pub const RB_STTS_CLOSED_MASK: u32 = 0x0FFF;

bitflags! {
    /// Interrupt causes as reported in `CSR_INT`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct IntCause: u32 {
        /// Flow handler finished writing receive frames
        const FH_RX = 1 << 31;
        /// Hardware error, device needs a restart
        const HW_ERR = 1 << 29;
        /// Periodic RX sweep fired
        const RX_PERIODIC = 1 << 28;
        /// Flow handler TX channel done (firmware load)
        const FH_TX = 1 << 27;
        /// Scheduler done; redundant with WAKEUP
        const SCD = 1 << 26;
        /// Firmware reported an error
        const SW_ERR = 1 << 25;
        /// RF-kill switch toggled
        const RF_KILL = 1 << 7;
        /// Critical temperature shutdown
        const CT_KILL = 1 << 6;
        /// Firmware-triggered RX
        const SW_RX = 1 << 3;
        /// Device woke from power-down sleep
        const WAKEUP = 1 << 1;
        /// Firmware alive notification
        const ALIVE = 1 << 0;
    }
}

impl IntCause {
    /// Causes enabled at bring-up
    pub const INI_SET_MASK: Self = Self::FH_RX
        .union(Self::HW_ERR)
        .union(Self::FH_TX)
        .union(Self::SW_ERR)
        .union(Self::RF_KILL)
        .union(Self::SW_RX)
        .union(Self::WAKEUP)
        .union(Self::ALIVE);

    /// Causes that mean "look at the receive ring"
    pub const ANY_RX: Self = Self::FH_RX.union(Self::SW_RX).union(Self::RX_PERIODIC);

    /// Receive causes raised by actual DMA activity
    pub const REAL_RX: Self = Self::FH_RX.union(Self::SW_RX);
}
