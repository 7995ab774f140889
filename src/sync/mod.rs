//! Synchronization primitives for the receive path
//!
//! The ring/pool state and the interrupt-cause state are both touched from
//! the interrupt top half, the bottom half and the replenish worker, so every
//! lock here masks local interrupts while held.

pub mod mutex;

pub use mutex::{Mutex, MutexGuard};
