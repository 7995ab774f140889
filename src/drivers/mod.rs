//! Hardware-facing layer
//!
//! - `bus`: register and DMA capabilities supplied by the bus driver
//! - `mmio`: `RegisterIo` over a memory-mapped register window
//! - `csr`: register offsets and interrupt cause bits

pub mod bus;
pub mod csr;
pub mod mmio;
