//! Ledger entries for everything the ring holds.
//!
//! Each region between the read and write cursors is described by exactly one
//! [`Slot`]: either a frame or an abandoned tail. A frame has two views once
//! closed. The ledger view starts at the originally reserved header block and
//! is what the retrieval walk uses to find the next slot. The wire view starts
//! `relocation` bytes later, where the compacted header was written, and is
//! what the transport receives.

use smallvec::SmallVec;

use crate::ring::SkippedTail;
use crate::wire::{PayloadDescriptor, MAX_DESC, MAX_HDR_BLOCK};

/// Byte range inside the ring, as a physical offset plus a length.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub len: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FrameState {
    Open,
    Closed,
}

#[derive(Clone, Debug)]
pub(crate) struct FrameSlot {
    pub start: usize,
    pub ledger_len: usize,
    pub relocation: usize,
    pub padding: usize,
    pub descs: SmallVec<[PayloadDescriptor; MAX_DESC]>,
    pub state: FrameState,
}

impl FrameSlot {
    pub fn open(start: usize) -> Self {
        Self {
            start,
            ledger_len: MAX_HDR_BLOCK,
            relocation: 0,
            padding: 0,
            descs: SmallVec::new(),
            state: FrameState::Open,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == FrameState::Open
    }

    pub fn is_full(&self) -> bool {
        self.descs.len() >= MAX_DESC
    }

    /// Original location and length; used to step over the frame.
    pub fn ledger(&self) -> Span {
        Span {
            start: self.start,
            len: self.ledger_len,
        }
    }

    /// Relocated header plus payloads and padding; what goes on the wire.
    pub fn wire(&self) -> Span {
        Span {
            start: self.start + self.relocation,
            len: self.ledger_len - self.relocation,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) enum Slot {
    Frame(FrameSlot),
    Skip(SkippedTail),
}

impl Slot {
    pub fn ledger_len(&self) -> usize {
        match self {
            Slot::Frame(frame) => frame.ledger_len,
            Slot::Skip(skip) => skip.len,
        }
    }
}

/// A closed frame handed to the transport.
///
/// `bytes` borrows the ring; the region stays reserved until
/// [`TxFifo::acknowledge_sent`](crate::TxFifo::acknowledge_sent).
#[derive(Debug, PartialEq, Eq)]
pub struct WireFrame<'a> {
    /// Compacted header, descriptors, payloads and padding.
    pub bytes: &'a [u8],
    /// Sequence number stamped into the header.
    pub sequence: u32,
    /// Payload descriptors carried.
    pub payload_count: usize,
    /// Trailing padding added for block alignment.
    pub padding: usize,
}

impl WireFrame<'_> {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
