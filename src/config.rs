//! Receive-path configuration
//!
//! Defaults follow the sizing the device firmware expects: a 256-entry
//! descriptor ring, 64 spare buffers on top of that, and a refill watermark of
//! eight buffers.

use alloc::vec::Vec;

use crate::error::{Result, RxError};

/// Descriptor ring entries (must be a power of two)
pub const RX_QUEUE_SIZE: usize = 256;

/// Buffers allocated beyond the ring size so restock never waits on the allocator
pub const RX_FREE_BUFFERS: usize = 64;

/// Free-list level at or below which background replenish is scheduled
pub const RX_LOW_WATERMARK: usize = 8;

/// Device page size; receive buffers are `PAGE_SIZE << page_order` bytes
pub const PAGE_SIZE: usize = 4096;

/// Largest accepted page order (64 KiB buffers)
pub const MAX_PAGE_ORDER: u32 = 4;

/// Smallest ring accepted: two write-pointer batches of 8
pub const MIN_QUEUE_SIZE: usize = 16;

/// Largest ring accepted: the closed index reported by the device is 12 bits
pub const MAX_QUEUE_SIZE: usize = 4096;

/// How the device reports interrupt causes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    /// Top half reads the live `CSR_INT` status register
    Direct,
    /// Device writes cause words into a host-memory table
    CauseTable,
}

/// Receive-path configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxConfig {
    /// Descriptor ring entries
    pub queue_size: usize,
    /// Total buffer handles in the pool
    pub pool_size: usize,
    /// Free-list refill threshold
    pub low_watermark: usize,
    /// Buffer size is `PAGE_SIZE << page_order`
    pub page_order: u32,
    /// Interrupt notification mechanism
    pub notification: Notification,
    /// Command ids whose responses never carry a command buffer to reclaim
    pub no_reclaim_cmds: Vec<u8>,
}

impl RxConfig {
    pub const fn new() -> Self {
        Self {
            queue_size: RX_QUEUE_SIZE,
            pool_size: RX_QUEUE_SIZE + RX_FREE_BUFFERS,
            low_watermark: RX_LOW_WATERMARK,
            page_order: 0,
            notification: Notification::CauseTable,
            no_reclaim_cmds: Vec::new(),
        }
    }

    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_low_watermark(mut self, low_watermark: usize) -> Self {
        self.low_watermark = low_watermark;
        self
    }

    pub fn with_page_order(mut self, page_order: u32) -> Self {
        self.page_order = page_order;
        self
    }

    pub fn with_notification(mut self, notification: Notification) -> Self {
        self.notification = notification;
        self
    }

    pub fn with_no_reclaim_cmds(mut self, cmds: &[u8]) -> Self {
        self.no_reclaim_cmds = cmds.to_vec();
        self
    }

    /// Size in bytes of every receive buffer
    pub fn rx_buf_size(&self) -> usize {
        PAGE_SIZE << self.page_order
    }

    /// Reject configurations the ring arithmetic cannot support
    pub fn validate(&self) -> Result<()> {
        if !self.queue_size.is_power_of_two() {
            return Err(RxError::InvalidConfiguration(
                "queue_size must be a power of two",
            ));
        }
        if !(MIN_QUEUE_SIZE..=MAX_QUEUE_SIZE).contains(&self.queue_size) {
            return Err(RxError::InvalidConfiguration(
                "queue_size must be between 16 and 4096",
            ));
        }
        if self.pool_size == 0 || self.pool_size > u16::MAX as usize {
            return Err(RxError::InvalidConfiguration(
                "pool_size must be between 1 and 65535",
            ));
        }
        if self.low_watermark >= self.pool_size {
            return Err(RxError::InvalidConfiguration(
                "low_watermark must be below pool_size",
            ));
        }
        if self.page_order > MAX_PAGE_ORDER {
            return Err(RxError::InvalidConfiguration("page_order above 4"));
        }
        Ok(())
    }
}

impl Default for RxConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = RxConfig::default();
        assert_eq!(cfg.queue_size, 256);
        assert_eq!(cfg.pool_size, 320);
        assert_eq!(cfg.rx_buf_size(), 4096);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_non_power_of_two_ring() {
        let cfg = RxConfig::new().with_queue_size(100);
        assert_eq!(
            cfg.validate(),
            Err(RxError::InvalidConfiguration(
                "queue_size must be a power of two"
            ))
        );
    }

    #[test]
    fn rejects_out_of_range_ring() {
        assert!(RxConfig::new().with_queue_size(8).validate().is_err());
        assert!(RxConfig::new().with_queue_size(8192).validate().is_err());
        assert!(RxConfig::new().with_queue_size(16).validate().is_ok());
    }

    #[test]
    fn rejects_watermark_at_pool_size() {
        let cfg = RxConfig::new().with_pool_size(8).with_low_watermark(8);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn page_order_scales_buffer() {
        let cfg = RxConfig::new().with_page_order(1);
        assert_eq!(cfg.rx_buf_size(), 8192);
        assert!(RxConfig::new().with_page_order(5).validate().is_err());
    }
}
