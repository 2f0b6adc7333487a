//! Frame builder, closer and retrieval walk on top of [`Ring`].
//!
//! Producers call [`TxFifo::append`]; payloads are packed into the currently
//! open frame until it runs out of descriptors, a singleton payload shows up,
//! or the frame would outgrow the configured ceiling. The transport pulls one
//! closed frame at a time with [`TxFifo::get_next_ready`] and hands the ring
//! space back with [`TxFifo::acknowledge_sent`].
//!
//! Frames are opened with room for [`MAX_DESC`] descriptors. Closing a frame
//! writes a compact header right in front of the payloads (the relocation)
//! and appends fill so the wire length is a multiple of the block alignment:
//!
//! ```text
//!  start                     start + relocation
//!  |<------- MAX_HDR_BLOCK ------->|
//!  +----------------+--------------+-----------+-----------+---------+
//!  | unused         | hdr + plds   | payload 0 | payload 1 | padding |
//!  +----------------+--------------+-----------+-----------+---------+
//!                   |<-------------------- wire view --------------->|
//!  |<----------------------------- ledger view --------------------->|
//! ```

use std::collections::VecDeque;

use crate::config::FifoConfig;
use crate::frame::{FrameSlot, FrameState, Slot, WireFrame};
use crate::ring::{Push, Ring};
use crate::stats::TxStats;
use crate::wire::{
    self, align_up, header_block_len, PayloadDescriptor, PayloadType, MAX_DESC, MAX_HDR_BLOCK,
    MAX_PAYLOAD_LEN, MSG_HDR_LEN, PAD_FILL, PAYLOAD_ALIGN,
};
use crate::{FifoError, FifoResult};

/// Where an appended payload landed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Appended {
    /// Descriptor index inside its frame.
    pub index: usize,
    /// Bytes the payload occupies, including its fill.
    pub padded_len: usize,
    /// The payload closed its frame (singleton payloads always do).
    pub closed_frame: bool,
}

/// Transmit FIFO coalescing payloads into block-aligned frames.
#[derive(Debug)]
pub struct TxFifo {
    config: FifoConfig,
    ring: Ring,
    slots: VecDeque<Slot>,
    in_flight: Option<usize>,
    sequence: u32,
    stats: TxStats,
}

impl TxFifo {
    /// Allocates the ring described by `config`. The sequence counter starts at zero.
    pub fn setup(config: FifoConfig) -> FifoResult<Self> {
        config.validate()?;
        let ring = Ring::new(config.capacity)?;
        log::debug!(
            "tx fifo setup: {} bytes, block alignment {}, frame ceiling {}",
            config.capacity,
            config.block_alignment,
            config.frame_ceiling
        );
        Ok(Self {
            config,
            ring,
            slots: VecDeque::with_capacity(config.capacity / MAX_HDR_BLOCK),
            in_flight: None,
            sequence: 0,
            stats: TxStats::default(),
        })
    }

    /// Frees the ring. Anything still queued is dropped.
    pub fn release(self) {
        log::debug!(
            "tx fifo release: dropping {} queued bytes",
            self.ring.used()
        );
    }

    pub fn config(&self) -> &FifoConfig {
        &self.config
    }

    pub fn stats(&self) -> TxStats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    /// Sequence number the next retrieved frame will carry.
    pub fn next_sequence(&self) -> u32 {
        self.sequence
    }

    /// `(in, out)` ring cursors.
    pub fn cursors(&self) -> (usize, usize) {
        (self.ring.head(), self.ring.tail())
    }

    pub fn free_bytes(&self) -> usize {
        self.ring.free()
    }

    /// A retrieved frame is awaiting [`TxFifo::acknowledge_sent`].
    pub fn has_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// A frame is open and accepting payloads.
    pub fn has_open_frame(&self) -> bool {
        self.open_frame().is_some()
    }

    /// Frames holding payloads that have not been handed out yet.
    pub fn pending_frames(&self) -> usize {
        let skip_in_flight = usize::from(self.in_flight.is_some());
        self.slots
            .iter()
            .skip(skip_in_flight)
            .filter(|slot| matches!(slot, Slot::Frame(frame) if !frame.descs.is_empty()))
            .count()
    }

    /// Copies `payload` into the ring as a `ty` payload of the open frame,
    /// opening and closing frames as needed.
    ///
    /// [`FifoError::NoSpace`] means nothing was queued; stop offering payloads
    /// until an acknowledgement frees ring space.
    pub fn append(&mut self, payload: &[u8], ty: PayloadType) -> FifoResult<Appended> {
        let len = payload.len();
        if len > MAX_PAYLOAD_LEN {
            return Err(FifoError::PayloadTooLarge {
                len,
                max: MAX_PAYLOAD_LEN,
            });
        }
        let padded_len = align_up(len, PAYLOAD_ALIGN);
        let singleton = ty.is_singleton();
        let reserve = self.config.block_alignment;

        let offset = loop {
            self.prepare_frame(singleton, padded_len)?;
            match self.ring.push(padded_len, reserve) {
                Push::Granted(offset) => break offset,
                Push::TailFull => {
                    log::debug!("append {len}b: tail full, restarting at ring head");
                    self.close();
                    self.skip_tail();
                }
                Push::NoSpace => {
                    log::debug!("append {len}b: no space ({} free)", self.ring.free());
                    return Err(FifoError::NoSpace {
                        needed: padded_len + reserve,
                        free: self.ring.free(),
                    });
                }
            }
        };

        let dst = self.ring.bytes_mut(offset, padded_len);
        dst[..len].copy_from_slice(payload);
        dst[len..].fill(PAD_FILL);

        let Some(frame) = open_frame_mut(&mut self.slots) else {
            unreachable!("payload space granted without an open frame");
        };
        debug_assert_eq!(
            frame.start + frame.ledger_len,
            offset,
            "payload not contiguous with its frame"
        );
        let index = frame.descs.len();
        frame.descs.push(PayloadDescriptor {
            len: len as u16,
            ty,
        });
        frame.ledger_len += padded_len;
        log::trace!(
            "appended {len}b ({padded_len}b padded) as pld #{index} of frame @{}, now {}b",
            frame.start,
            frame.ledger_len
        );

        if singleton {
            self.close();
        }
        Ok(Appended {
            index,
            padded_len,
            closed_frame: singleton,
        })
    }

    /// Closes the open frame, if any: compacts its header and pads it to the
    /// block alignment. It can no longer take payloads afterwards.
    pub fn close(&mut self) {
        let block_alignment = self.config.block_alignment;
        let Some(frame) = open_frame_mut(&mut self.slots) else {
            return;
        };
        frame.state = FrameState::Closed;

        // Never transmitted; the retrieval walk steps over it by ledger length.
        if frame.descs.is_empty() {
            log::trace!("closed empty frame @{}", frame.start);
            return;
        }

        let hdr_len = header_block_len(frame.descs.len());
        frame.relocation = MAX_HDR_BLOCK - hdr_len;
        let wire_len = frame.ledger_len - frame.relocation;
        let mut padding = align_up(wire_len, block_alignment) - wire_len;

        if padding > 0 {
            // A grant past the physical end would detach the padding from the frame.
            let grant = if self.ring.at_boundary() {
                Push::TailFull
            } else {
                self.ring.push(padding, 0)
            };
            match grant {
                Push::Granted(offset) => {
                    debug_assert_eq!(
                        frame.start + frame.ledger_len,
                        offset,
                        "padding not contiguous with its frame"
                    );
                    self.ring.bytes_mut(offset, padding).fill(PAD_FILL);
                }
                outcome => {
                    log::error!(
                        "no room for {padding}b of padding after frame @{} ({wire_len}b, {outcome:?}); \
                         sending unaligned (in {} out {})",
                        frame.start,
                        self.ring.head(),
                        self.ring.tail()
                    );
                    padding = 0;
                }
            }
        }

        frame.padding = padding;
        frame.ledger_len += padding;
        let wire = frame.wire();
        wire::write_header(
            self.ring.bytes_mut(wire.start, hdr_len),
            wire.len as u16,
            padding as u16,
            &frame.descs,
        );
        log::trace!(
            "closed frame @{}: {} plds, relocated +{}, {}b on wire ({}b padding)",
            frame.start,
            frame.descs.len(),
            frame.relocation,
            wire.len,
            padding
        );
    }

    /// Hands out the oldest frame holding payloads, closing it first if it is
    /// still open. Returns `None` when nothing is ready or a frame is already
    /// in flight.
    pub fn get_next_ready(&mut self) -> Option<WireFrame<'_>> {
        if self.in_flight.is_some() {
            log::debug!("get_next_ready: frame still in flight");
            return None;
        }

        loop {
            if self.ring.reset_if_empty() {
                log::trace!("get_next_ready: fifo empty, cursors reset");
                return None;
            }
            let Some(front) = self.slots.front() else {
                log::error!(
                    "ring holds {}b but the ledger is empty (in {} out {})",
                    self.ring.used(),
                    self.ring.head(),
                    self.ring.tail()
                );
                return None;
            };
            match front {
                Slot::Skip(skip) => {
                    log::trace!("get_next_ready: skipping {}b @{}", skip.len, skip.start);
                    self.ring.release(skip.len);
                }
                Slot::Frame(frame) if frame.descs.is_empty() => {
                    if frame.is_open() {
                        log::trace!("get_next_ready: open frame without payloads");
                        return None;
                    }
                    log::trace!("get_next_ready: dropping empty frame @{}", frame.start);
                    self.ring.release(frame.ledger_len);
                }
                Slot::Frame(frame) => {
                    if frame.is_open() {
                        self.close();
                    }
                    break;
                }
            }
            self.slots.pop_front();
            self.ring.normalize();
        }

        let Some(Slot::Frame(frame)) = self.slots.front() else {
            unreachable!("retrieval walk stopped on a non-frame slot");
        };
        debug_assert!(
            frame.start + frame.ledger_len <= self.ring.capacity(),
            "frame @{} ({}b) straddles the ring end",
            frame.start,
            frame.ledger_len
        );
        let wire = frame.wire();
        let payload_count = frame.descs.len();
        let padding = frame.padding;
        let ledger_len = frame.ledger_len;

        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        wire::stamp(self.ring.bytes_mut(wire.start, MSG_HDR_LEN), sequence);

        self.in_flight = Some(ledger_len);
        self.stats.record(payload_count, wire.len);
        log::trace!(
            "tx frame #{sequence}: ledger @{} ({ledger_len}b), wire @{} ({}b), {payload_count} plds",
            frame.start,
            wire.start,
            wire.len
        );

        Some(WireFrame {
            bytes: self.ring.bytes(wire.start, wire.len),
            sequence,
            payload_count,
            padding,
        })
    }

    /// Releases the ring space of the frame last returned by
    /// [`TxFifo::get_next_ready`], whether or not the send succeeded.
    /// Returns false when no frame was in flight.
    pub fn acknowledge_sent(&mut self) -> bool {
        let Some(len) = self.in_flight.take() else {
            log::warn!("acknowledge_sent without a frame in flight");
            return false;
        };
        match self.slots.pop_front() {
            Some(Slot::Frame(frame)) => debug_assert_eq!(frame.ledger_len, len),
            other => log::error!("in-flight slot missing from ledger: {other:?}"),
        }
        self.ring.release(len);
        self.ring.normalize();
        log::trace!(
            "sent {len}b, in {} out {}",
            self.ring.head(),
            self.ring.tail()
        );
        true
    }

    fn open_frame(&self) -> Option<&FrameSlot> {
        match self.slots.back() {
            Some(Slot::Frame(frame)) if frame.is_open() => Some(frame),
            _ => None,
        }
    }

    /// Makes sure an open frame can take a `padded_len` payload, closing the
    /// current one and opening a fresh one when it cannot.
    fn prepare_frame(&mut self, singleton: bool, padded_len: usize) -> FifoResult<()> {
        let ceiling = self.config.frame_ceiling;
        let Some(frame) = self.open_frame() else {
            return self.new_frame();
        };
        let has_payloads = !frame.descs.is_empty();
        let full = frame.is_full();
        let singleton_conflict = singleton && has_payloads;
        let too_big = has_payloads && frame.ledger_len + padded_len > ceiling;
        // The frame ends on the physical end; the next grant would wrap.
        let at_end = self.ring.at_boundary();
        if full || singleton_conflict || too_big || at_end {
            log::debug!(
                "closing frame @{} (full {full}, singleton {singleton_conflict}, size {too_big}, at end {at_end})",
                frame.start
            );
            self.close();
            return self.new_frame();
        }
        Ok(())
    }

    fn new_frame(&mut self) -> FifoResult<()> {
        debug_assert!(self.open_frame().is_none());
        loop {
            match self.ring.push(MAX_HDR_BLOCK, 0) {
                Push::Granted(offset) => {
                    self.ring.bytes_mut(offset, MAX_HDR_BLOCK).fill(0);
                    self.slots.push_back(Slot::Frame(FrameSlot::open(offset)));
                    log::trace!("new frame @{offset}");
                    return Ok(());
                }
                Push::TailFull => {
                    log::debug!("new frame: tail full, trying head");
                    self.skip_tail();
                }
                Push::NoSpace => {
                    return Err(FifoError::NoSpace {
                        needed: MAX_HDR_BLOCK,
                        free: self.ring.free(),
                    })
                }
            }
        }
    }

    fn skip_tail(&mut self) {
        if let Some(skipped) = self.ring.skip_tail() {
            self.slots.push_back(Slot::Skip(skipped));
        }
    }
}

fn open_frame_mut(slots: &mut VecDeque<Slot>) -> Option<&mut FrameSlot> {
    match slots.back_mut() {
        Some(Slot::Frame(frame)) if frame.is_open() => Some(frame),
        _ => None,
    }
}

const _: () = assert!(MAX_DESC * crate::wire::PLD_DESC_LEN + MSG_HDR_LEN == MAX_HDR_BLOCK);
