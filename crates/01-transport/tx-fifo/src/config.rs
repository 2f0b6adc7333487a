use serde::{Deserialize, Serialize};

use crate::wire::{MAX_HDR_BLOCK, MAX_PAYLOAD_LEN, PAYLOAD_ALIGN};
use crate::{FifoError, FifoResult};

/// Default ring capacity in bytes.
pub const DEFAULT_CAPACITY: usize = 32 * 1024;
/// Default transport block alignment.
pub const DEFAULT_BLOCK_ALIGNMENT: usize = 16;

/// Shape of a transmit FIFO.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FifoConfig {
    /// Ring capacity in bytes; a multiple of the payload alignment unit.
    pub capacity: usize,
    /// Every transmitted frame is padded to a multiple of this many bytes.
    pub block_alignment: usize,
    /// Soft ceiling on a frame's size. Once an open frame would grow past it,
    /// the frame is closed and the payload starts a new one.
    pub frame_ceiling: usize,
}

impl Default for FifoConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, DEFAULT_BLOCK_ALIGNMENT)
    }
}

impl FifoConfig {
    /// Config for a ring of `capacity` bytes feeding a transport that needs
    /// `block_alignment`-sized transfers. The frame ceiling defaults to half the ring.
    pub const fn new(capacity: usize, block_alignment: usize) -> Self {
        Self {
            capacity,
            block_alignment,
            frame_ceiling: capacity / 2,
        }
    }

    pub fn with_frame_ceiling(mut self, frame_ceiling: usize) -> Self {
        self.frame_ceiling = frame_ceiling;
        self
    }

    pub fn with_block_alignment(mut self, block_alignment: usize) -> Self {
        self.block_alignment = block_alignment;
        self
    }

    /// Largest frame this configuration can emit.
    pub fn max_frame_len(&self) -> usize {
        let largest_single = MAX_HDR_BLOCK + crate::wire::align_up(MAX_PAYLOAD_LEN, PAYLOAD_ALIGN);
        self.frame_ceiling.max(largest_single) + self.block_alignment
    }

    pub fn validate(&self) -> FifoResult<()> {
        if self.block_alignment == 0 {
            return Err(FifoError::InvalidConfig("block alignment must be nonzero"));
        }
        if self.capacity % PAYLOAD_ALIGN != 0 {
            return Err(FifoError::InvalidConfig(
                "capacity must be a multiple of the payload alignment",
            ));
        }
        if self.capacity < 2 * MAX_HDR_BLOCK + self.block_alignment {
            return Err(FifoError::InvalidConfig(
                "capacity too small for a frame header plus padding",
            ));
        }
        if self.frame_ceiling < MAX_HDR_BLOCK || self.frame_ceiling > self.capacity {
            return Err(FifoError::InvalidConfig(
                "frame ceiling must lie between the header block size and the capacity",
            ));
        }
        if self.max_frame_len() > u16::MAX as usize {
            return Err(FifoError::InvalidConfig(
                "frames could outgrow the 16-bit size field",
            ));
        }
        Ok(())
    }
}
