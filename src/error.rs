//! Receive-path error types
//!
//! Only bring-up can fail with an error value. Everything that happens after
//! the ring is running (allocation failure, stray slots, hardware-reported
//! faults) is handled in place: logged, counted and recovered from, because
//! there is no caller to hand an error to inside an interrupt.

use core::fmt;

pub type Result<T> = core::result::Result<T, RxError>;

/// Errors returned while creating or starting the receive path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxError {
    /// Configuration rejected by `RxConfig::validate`
    InvalidConfiguration(&'static str),

    /// Coherent DMA memory for the descriptor ring, status block or
    /// interrupt-cause table could not be allocated
    OutOfMemory,

    /// The allocator returned a cause table not aligned to its own size
    CauseTableMisaligned,

    /// The transport was stopped and its memory released
    NotRunning,
}

impl fmt::Display for RxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RxError::InvalidConfiguration(why) => write!(f, "Invalid configuration: {}", why),
            RxError::OutOfMemory => write!(f, "Out of DMA memory"),
            RxError::CauseTableMisaligned => write!(f, "Interrupt cause table misaligned"),
            RxError::NotRunning => write!(f, "Receive path not running"),
        }
    }
}

impl core::error::Error for RxError {}

/// Check a programming-error invariant.
///
/// Debug builds abort through `debug_assert!`. Release builds log the
/// violation and evaluate to `false` so the caller can skip the bad entry.
#[macro_export]
#[doc(hidden)]
macro_rules! invariant {
    ($cond:expr, $($arg:tt)+) => {{
        let ok: bool = $cond;
        if !ok {
            debug_assert!(ok, $($arg)+);
            log::error!($($arg)+);
        }
        ok
    }};
}
