//! Frames inside a receive buffer
//!
//! The device packs several frames into one buffer. Each starts with a
//! status word and a command header:
//!
//! ```text
//! offset  size  field
//! 0       4     len_n_flags (LE; low 14 bits = length after this word)
//! 4       1     cmd
//! 5       1     flags
//! 6       2     sequence (LE)
//! ```
//!
//! Frames start on 64-byte boundaries. A status word of `FH_RSCSR_FRAME_INVALID`
//! marks the end of the buffer's contents.

use alloc::sync::Arc;

use crate::drivers::bus::DmaPage;
use crate::drivers::csr::{
    FH_RSCSR_FRAME_ALIGN, FH_RSCSR_FRAME_INVALID, FH_RSCSR_FRAME_SIZE_MSK, SEQ_RX_FRAME,
};

/// Status word plus command header
pub const FRAME_HEADER_LEN: usize = 8;

/// Parsed frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub len_n_flags: u32,
    pub cmd: u8,
    pub flags: u8,
    pub sequence: u16,
}

impl FrameHeader {
    /// Parse the header at the start of `bytes`
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let hdr = bytes.get(..FRAME_HEADER_LEN)?;
        Some(Self {
            len_n_flags: u32::from_le_bytes([hdr[0], hdr[1], hdr[2], hdr[3]]),
            cmd: hdr[4],
            flags: hdr[5],
            sequence: u16::from_le_bytes([hdr[6], hdr[7]]),
        })
    }

    pub fn is_invalid(&self) -> bool {
        self.len_n_flags == FH_RSCSR_FRAME_INVALID
    }

    /// Frame length including the status word
    pub fn len(&self) -> usize {
        (self.len_n_flags & FH_RSCSR_FRAME_SIZE_MSK) as usize + 4
    }

    /// Response to a host command (firmware-originated frames set bit 15)
    pub fn is_command_response(&self) -> bool {
        self.sequence & SEQ_RX_FRAME == 0
    }

    /// Command queue entry this response belongs to
    pub fn index(&self) -> u8 {
        (self.sequence & 0xFF) as u8
    }
}

#[inline]
fn align_up(len: usize, align: usize) -> usize {
    (len + align - 1) & !(align - 1)
}

/// Iterator over `(offset, header)` of the frames in one buffer
pub struct Frames<'a> {
    bytes: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> Frames<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            offset: 0,
            done: false,
        }
    }
}

impl Iterator for Frames<'_> {
    type Item = (usize, FrameHeader);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.offset + FRAME_HEADER_LEN >= self.bytes.len() {
            return None;
        }
        let offset = self.offset;
        let hdr = FrameHeader::parse(&self.bytes[offset..])?;
        if hdr.is_invalid() {
            self.done = true;
            return None;
        }
        self.offset += align_up(hdr.len(), FH_RSCSR_FRAME_ALIGN);
        Some((offset, hdr))
    }
}

/// Command-queue slot a response completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCommand {
    pub index: u8,
    pub sequence: u16,
    pub cmd: u8,
}

/// One frame handed to the consumer
///
/// The consumer may keep the whole buffer by calling `steal_page`; the
/// buffer is then not recycled and the handle goes back to the unused list.
pub struct RxCmdBuffer<P> {
    page: Arc<P>,
    offset: usize,
    truesize: usize,
    page_stolen: bool,
}

impl<P: DmaPage> RxCmdBuffer<P> {
    pub fn new(page: Arc<P>, offset: usize, truesize: usize) -> Self {
        Self {
            page,
            offset,
            truesize,
            page_stolen: false,
        }
    }

    /// Bytes of the buffer starting at this frame
    pub fn packet(&self) -> &[u8] {
        &self.page.bytes()[self.offset..]
    }

    pub fn header(&self) -> Option<FrameHeader> {
        FrameHeader::parse(self.packet())
    }

    /// Frame body after the header, bounded by the frame length
    pub fn payload(&self) -> &[u8] {
        let pkt = self.packet();
        let end = self.header().map_or(0, |h| h.len()).min(pkt.len());
        pkt.get(FRAME_HEADER_LEN..end).unwrap_or(&[])
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Size of the whole buffer this frame lives in
    pub fn truesize(&self) -> usize {
        self.truesize
    }

    /// Take ownership of the underlying buffer
    pub fn steal_page(&mut self) -> Arc<P> {
        self.page_stolen = true;
        Arc::clone(&self.page)
    }

    pub fn page_stolen(&self) -> bool {
        self.page_stolen
    }
}
