//! Byte ring with monotonic cursors and contiguous-only allocation.
//!
//! ```text
//!  0                    tail % C               head % C                C
//!  +--------------------+======================+------------------------+
//!  |  free (head room)  |  frames in the ring  |  free (room to end)    |
//!  +--------------------+======================+------------------------+
//! ```
//!
//! `head` (write cursor) and `tail` (read cursor) only ever grow between
//! normalisations; the physical offset is the cursor modulo capacity and
//! `tail <= head <= tail + C` always holds. An allocation never straddles the
//! physical end: when the room left before the end is too small but the head
//! of the buffer has space, [`Ring::push`] reports [`Push::TailFull`] and the
//! caller decides whether to abandon the tail with [`Ring::skip_tail`].

use crate::region::RingMemory;
use crate::wire::MSG_HDR_LEN;
use crate::FifoResult;

const RING_ALIGNMENT: usize = 64;

/// Outcome of a ring allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Push {
    /// Space granted at this physical offset.
    Granted(usize),
    /// Not enough free bytes anywhere in the ring.
    NoSpace,
    /// Room before the physical end is too small, but the buffer head has space.
    TailFull,
}

/// Byte range abandoned at the end of the ring.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SkippedTail {
    /// Physical offset where the skipped range starts.
    pub start: usize,
    /// Number of bytes skipped, up to the physical end.
    pub len: usize,
}

/// Contiguous-allocation byte ring.
#[derive(Debug)]
pub struct Ring {
    memory: RingMemory,
    capacity: usize,
    head: usize,
    tail: usize,
}

impl Ring {
    /// Allocates a zeroed ring of `capacity` bytes.
    pub fn new(capacity: usize) -> FifoResult<Self> {
        let memory = RingMemory::allocate(capacity, RING_ALIGNMENT)?;
        Ok(Self {
            memory,
            capacity,
            head: 0,
            tail: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Write cursor (`in`).
    pub fn head(&self) -> usize {
        self.head
    }

    /// Read cursor (`out`).
    pub fn tail(&self) -> usize {
        self.tail
    }

    /// Bytes between the read and write cursors.
    pub fn used(&self) -> usize {
        self.head - self.tail
    }

    pub fn free(&self) -> usize {
        self.capacity - self.used()
    }

    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// The write cursor sits on the physical end with live bytes behind it.
    /// The next grant lands at offset zero, detached from the previous one.
    pub fn at_boundary(&self) -> bool {
        !self.is_empty() && self.head_offset() == 0
    }

    /// Physical offset of the write cursor.
    pub fn head_offset(&self) -> usize {
        self.head % self.capacity
    }

    /// Physical offset of the read cursor.
    pub fn tail_offset(&self) -> usize {
        self.tail % self.capacity
    }

    /// Requests `size` contiguous bytes, additionally requiring `reserve` more
    /// bytes to be available right after them. Only `size` is consumed.
    pub fn push(&mut self, size: usize, reserve: usize) -> Push {
        // An empty ring has no live bytes to protect; restart at offset zero so
        // a stale mid-buffer cursor cannot turn into a spurious `NoSpace`.
        self.reset_if_empty();
        let needed = size + reserve;
        if self.free() < needed {
            log::trace!(
                "ring push {size}/{reserve}: no space (used {} of {})",
                self.used(),
                self.capacity
            );
            return Push::NoSpace;
        }

        let room_to_end = self.capacity - self.head_offset();
        if room_to_end < needed {
            if self.tail_offset() < self.head_offset() {
                log::trace!("ring push {size}/{reserve}: tail full");
                return Push::TailFull;
            }
            log::trace!("ring push {size}/{reserve}: no head space");
            return Push::NoSpace;
        }

        let offset = self.head_offset();
        self.head += size;
        log::trace!("ring push {size}/{reserve}: granted @{offset}");
        Push::Granted(offset)
    }

    /// Abandons the bytes between the write cursor and the physical end so the
    /// next allocation starts at offset zero. Only valid after [`Push::TailFull`];
    /// returns `None` when the write cursor already sits on the boundary.
    pub fn skip_tail(&mut self) -> Option<SkippedTail> {
        let start = self.head_offset();
        if start == 0 {
            return None;
        }
        let len = self.capacity - start;
        assert!(
            len <= self.free(),
            "skip_tail over live data ({len} bytes @{start}, {} free)",
            self.free()
        );
        if len < MSG_HDR_LEN {
            log::error!(
                "skipping {len} tail bytes @{start}: less than a message header ({MSG_HDR_LEN})"
            );
        }
        self.head += len;
        log::trace!("ring skip tail: {len} bytes @{start}");
        Some(SkippedTail { start, len })
    }

    /// Returns `len` bytes at the read cursor to the free pool.
    pub fn release(&mut self, len: usize) {
        assert!(
            self.tail + len <= self.head,
            "release of {len} bytes overruns write cursor (tail {}, head {})",
            self.tail,
            self.head
        );
        self.tail += len;
    }

    /// Subtracts whole multiples of the capacity from both cursors so the read
    /// cursor lands in `[0, C)`.
    pub fn normalize(&mut self) {
        let wraps = self.tail / self.capacity;
        self.tail -= wraps * self.capacity;
        self.head -= wraps * self.capacity;
    }

    /// Resets both cursors to zero when the ring is empty. Returns true if it was.
    pub fn reset_if_empty(&mut self) -> bool {
        if self.head == self.tail {
            self.head = 0;
            self.tail = 0;
            true
        } else {
            false
        }
    }

    pub fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.memory.as_slice()[offset..offset + len]
    }

    pub fn bytes_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        &mut self.memory.as_mut_slice()[offset..offset + len]
    }
}
