//! Bus capability traits
//!
//! The receive path never touches hardware directly. Register access and DMA
//! memory come from the bus layer underneath (PCIe, a platform bus, or the
//! simulated device used by the tests) through the traits in this module.
//!
//! ## Memory kinds
//!
//! - **Pages**: streaming DMA buffers the device writes received frames
//!   into. Mapped before being handed to the device, unmapped before the CPU
//!   reads them.
//! - **Coherent words**: small regions shared with the device for its whole
//!   lifetime (descriptor array, status block, interrupt cause table). Both
//!   sides see every store without explicit sync.

/// Register window of one device
///
/// Offsets are byte offsets from the start of the window. Implementations
/// must perform each access exactly once and in program order.
pub trait RegisterIo: Send + Sync {
    fn read32(&self, offset: usize) -> u32;
    fn write32(&self, offset: usize, value: u32);
    fn write8(&self, offset: usize, value: u8);
}

/// Whether a page allocation may sleep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocMode {
    /// Interrupt context: fail instead of waiting for memory
    NonBlocking,
    /// Worker context: the allocator may reclaim or wait
    MayBlock,
}

/// One receive buffer allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocRequest {
    /// Allocation is `PAGE_SIZE << order` bytes
    pub order: u32,
    pub mode: AllocMode,
    /// Suppress allocator warnings on failure (pool still has headroom)
    pub quiet: bool,
}

/// Contents of a receive page
pub trait DmaPage: Send + Sync {
    /// View the page; only valid while it is not mapped for the device
    fn bytes(&self) -> &[u8];
}

/// Device-shared array of little-endian 32-bit words
pub trait CoherentWords: Send + Sync {
    /// Length in words
    fn len(&self) -> usize;

    fn read(&self, index: usize) -> u32;

    fn write(&self, index: usize, value: u32);

    /// Bus address the device uses for word 0
    fn dma_addr(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn fill(&self, value: u32) {
        for i in 0..self.len() {
            self.write(i, value);
        }
    }
}

/// DMA allocator and mapper of one device
pub trait DmaMemory: Send + Sync {
    type Page: DmaPage;
    type Coherent: CoherentWords;

    /// Allocate one receive buffer. `None` is an ordinary, recoverable
    /// outcome under memory pressure.
    fn alloc_pages(&self, request: AllocRequest) -> Option<Self::Page>;

    /// Map a page for device writes and return its bus address
    fn map_page(&self, page: &Self::Page, len: usize) -> u64;

    /// Tear down a mapping made by `map_page`, handing the page back to the CPU
    fn unmap_page(&self, dma: u64, len: usize);

    /// Allocate zeroed coherent memory of `words` 32-bit words
    fn alloc_coherent(&self, words: usize) -> Option<Self::Coherent>;
}

/// Everything the receive path needs from the bus driver
pub trait Bus: RegisterIo + DmaMemory {}

impl<T: RegisterIo + DmaMemory> Bus for T {}
