//! Receive buffer pool
//!
//! Fixed arena of buffer handles. Each handle is in exactly one place at a
//! time:
//!
//! - `unused`: no memory attached, waiting for the replenisher
//! - `free`: page attached and mapped, waiting for restock to hand it over
//! - a ring slot: owned by the device until the dispatcher takes it back
//!
//! The dispatcher briefly holds a taken handle outside all three while it
//! delivers the frames. The pool itself never allocates or schedules
//! anything; that is the replenisher's job.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;

/// Stable index of one receive buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(u16);

impl BufferHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[cfg(test)]
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u16)
    }
}

/// One arena entry
pub struct RxBuffer<P> {
    page: Option<Arc<P>>,
    /// Bus address, meaningful only while `page` is mapped
    dma: u64,
}

/// Occupancy snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total: usize,
    pub unused: usize,
    pub free: usize,
}

pub struct BufferPool<P> {
    buffers: Vec<RxBuffer<P>>,
    unused: VecDeque<BufferHandle>,
    free: VecDeque<BufferHandle>,
    free_count: usize,
}

impl<P> BufferPool<P> {
    /// Create `size` handles, all unused
    pub fn new(size: usize) -> Self {
        let mut buffers = Vec::with_capacity(size);
        let mut unused = VecDeque::with_capacity(size);
        for i in 0..size {
            buffers.push(RxBuffer { page: None, dma: 0 });
            unused.push_back(BufferHandle(i as u16));
        }
        Self {
            buffers,
            unused,
            free: VecDeque::with_capacity(size),
            free_count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn free_count(&self) -> usize {
        self.free_count
    }

    pub fn has_unused(&self) -> bool {
        !self.unused.is_empty()
    }

    pub fn acquire_unused(&mut self) -> Option<BufferHandle> {
        self.unused.pop_front()
    }

    /// Return a memory-less handle to the unused list
    pub fn release_to_unused(&mut self, handle: BufferHandle) {
        if !invariant!(
            self.buffers[handle.index()].page.is_none(),
            "[RX] buffer {} returned to unused with a page attached",
            handle.index()
        ) {
            return;
        }
        self.unused.push_back(handle);
    }

    /// Queue a handle carrying a mapped page for restock
    pub fn release_to_free(&mut self, handle: BufferHandle) {
        if !invariant!(
            self.buffers[handle.index()].page.is_some(),
            "[RX] buffer {} released to free without a page",
            handle.index()
        ) {
            return;
        }
        self.free.push_back(handle);
        self.free_count += 1;
    }

    pub fn take_free(&mut self) -> Option<BufferHandle> {
        let handle = self.free.pop_front()?;
        self.free_count -= 1;
        Some(handle)
    }

    /// Attach a mapped page
    ///
    /// If the handle already carries memory the new page is handed back
    /// untouched so the caller can unmap it.
    pub fn attach(
        &mut self,
        handle: BufferHandle,
        page: Arc<P>,
        dma: u64,
    ) -> core::result::Result<(), Arc<P>> {
        let buf = &mut self.buffers[handle.index()];
        if !invariant!(
            buf.page.is_none(),
            "[RX] buffer {} already has a page attached",
            handle.index()
        ) {
            return Err(page);
        }
        buf.page = Some(page);
        buf.dma = dma;
        Ok(())
    }

    /// Remove the page and its bus address from a handle
    pub fn detach(&mut self, handle: BufferHandle) -> Option<(Arc<P>, u64)> {
        let buf = &mut self.buffers[handle.index()];
        let page = buf.page.take()?;
        let dma = core::mem::take(&mut buf.dma);
        Some((page, dma))
    }

    /// Bus address of an attached page
    pub fn dma(&self, handle: BufferHandle) -> Option<u64> {
        let buf = &self.buffers[handle.index()];
        buf.page.as_ref().map(|_| buf.dma)
    }

    /// Detach every page and move all handles back to unused
    ///
    /// Returns the detached pages with their bus addresses so the caller can
    /// unmap them. Ring slots referring to handles must be cleared by the
    /// caller as well.
    pub fn reset(&mut self) -> Vec<(Arc<P>, u64)> {
        let mut pages = Vec::new();
        for buf in self.buffers.iter_mut() {
            if let Some(page) = buf.page.take() {
                pages.push((page, core::mem::take(&mut buf.dma)));
            }
        }
        self.free.clear();
        self.free_count = 0;
        self.unused.clear();
        self.unused
            .extend((0..self.buffers.len()).map(|i| BufferHandle(i as u16)));
        pages
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            total: self.buffers.len(),
            unused: self.unused.len(),
            free: self.free_count,
        }
    }

    /// Verify that every handle lives in exactly one of unused, free or the
    /// given ring slots, and that memory attachment matches the location.
    pub fn check_ownership(&self, ring_slots: &[Option<BufferHandle>]) -> bool {
        if self.free_count != self.free.len() {
            return false;
        }

        let mut seen = alloc::vec![false; self.buffers.len()];
        let mut claim = |handle: BufferHandle, wants_page: bool| {
            let idx = handle.index();
            if idx >= seen.len() || seen[idx] {
                return false;
            }
            seen[idx] = true;
            self.buffers[idx].page.is_some() == wants_page
        };

        let placed = self.unused.iter().all(|&h| claim(h, false))
            && self.free.iter().all(|&h| claim(h, true))
            && ring_slots.iter().flatten().all(|&h| claim(h, true));

        placed && seen.iter().all(|&s| s)
    }
}
