//! Receive path and interrupt front-end for a DMA network device
//!
//! The device fills host pages through a ring of 256-byte-aligned buffer
//! descriptors and reports completions through a closed-index status word.
//! This crate keeps the ring stocked with mapped pages, walks completed
//! buffers and hands every frame to a consumer, and turns interrupt causes
//! (read from registers or from an in-memory cause table) into bottom-half
//! work.
//!
//! Platform services come in through traits:
//!
//! - `drivers::bus::Bus`: register access and DMA memory
//! - `transport::OpMode`: the consumer of frames and device events
//! - `transport::WorkQueue`: deferred execution
//!
//! `transport::RxTransport` ties them together.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
pub mod error;

pub mod config;
pub mod drivers;
pub mod irq;
pub mod ratelimit;
pub mod rx;
pub mod sync;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{Notification, RxConfig};
pub use error::{Result, RxError};
pub use irq::{IrqReturn, IsrStats};
pub use rx::frame::{FrameHeader, PendingCommand, RxCmdBuffer};
pub use rx::replenish::ReplenishMode;
pub use rx::RxStats;
pub use transport::{HandlerError, OpMode, RxTransport, WorkQueue};
