//! On-the-wire layout of a transmitted frame.
//!
//! ```text
//! +---------------------------------------------------------------+
//! | barker u32 | sequence u32 | size u16 | num_pls u16 | rsv u16  |
//! | padding u16                                                   |  16 bytes
//! +---------------------------------------------------------------+
//! | pld[0] u32 | pld[1] u32 | ... | pld[N-1] u32 | zero → 16B     |
//! +---------------------------------------------------------------+
//! | payload 0 [fill → 16B] | payload 1 [fill → 16B] | ...         |
//! +---------------------------------------------------------------+
//! | trailing fill → multiple of block alignment                   |
//! +---------------------------------------------------------------+
//! ```
//!
//! A descriptor packs the raw payload length into bits 0..14 and the payload
//! type into bits 16..20. All integers are little-endian.

use std::fmt;

/// Alignment unit applied to every payload and to the header block.
pub const PAYLOAD_ALIGN: usize = 16;
/// Fixed part of the frame header.
pub const MSG_HDR_LEN: usize = 16;
/// Size of one payload descriptor.
pub const PLD_DESC_LEN: usize = 4;
/// Maximum number of payloads coalesced into one frame.
pub const MAX_DESC: usize = 12;
/// Header block reserved when a frame is opened: room for `MAX_DESC` descriptors.
pub const MAX_HDR_BLOCK: usize = MSG_HDR_LEN + MAX_DESC * PLD_DESC_LEN;
/// Filler written into payload and frame padding.
pub const PAD_FILL: u8 = 0xAD;
/// Preamble stamped into every frame handed to the transport.
pub const PREVIEW_BARKER: u32 = 0xCAFE_900D;
/// Largest raw payload length a descriptor can carry.
pub const MAX_PAYLOAD_LEN: usize = PLD_SIZE_MASK as usize;

const PLD_SIZE_MASK: u32 = 0x0000_3FFF;
const PLD_TYPE_SHIFT: u32 = 16;
const PLD_TYPE_MASK: u32 = 0x000F_0000;

const OFF_BARKER: usize = 0;
const OFF_SEQUENCE: usize = 4;
const OFF_SIZE: usize = 8;
const OFF_NUM_PLS: usize = 10;
const OFF_PADDING: usize = 14;

const _: () = assert!(MAX_HDR_BLOCK % PAYLOAD_ALIGN == 0);

/// Kind of payload carried by a descriptor.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PayloadType {
    /// Network data.
    Data = 0,
    /// Control-plane message.
    Ctrl = 1,
    /// Trace/diagnostic message.
    Trace = 2,
    /// Warm reset request; travels alone.
    ResetWarm = 3,
    /// Cold reset request; travels alone.
    ResetCold = 4,
    /// Extended data.
    EData = 5,
}

impl PayloadType {
    /// Decodes the 4-bit type field of a descriptor.
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0 => PayloadType::Data,
            1 => PayloadType::Ctrl,
            2 => PayloadType::Trace,
            3 => PayloadType::ResetWarm,
            4 => PayloadType::ResetCold,
            5 => PayloadType::EData,
            _ => return None,
        })
    }

    /// Singleton payloads must be the sole occupant of their frame.
    pub fn is_singleton(self) -> bool {
        matches!(self, PayloadType::ResetWarm | PayloadType::ResetCold)
    }
}

/// Length and type of one payload inside a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PayloadDescriptor {
    /// Raw (unpadded) payload length.
    pub len: u16,
    /// Payload type.
    pub ty: PayloadType,
}

impl PayloadDescriptor {
    /// Length the payload occupies inside the frame.
    pub fn padded_len(&self) -> usize {
        align_up(self.len as usize, PAYLOAD_ALIGN)
    }

    pub(crate) fn encode(&self) -> [u8; PLD_DESC_LEN] {
        let val = (self.len as u32 & PLD_SIZE_MASK)
            | (((self.ty as u32) << PLD_TYPE_SHIFT) & PLD_TYPE_MASK);
        val.to_le_bytes()
    }

    fn decode(bytes: [u8; PLD_DESC_LEN]) -> Result<Self, WireError> {
        let val = u32::from_le_bytes(bytes);
        let raw_ty = ((val & PLD_TYPE_MASK) >> PLD_TYPE_SHIFT) as u8;
        let ty = PayloadType::from_u8(raw_ty).ok_or(WireError::UnknownPayloadType(raw_ty))?;
        Ok(Self {
            len: (val & PLD_SIZE_MASK) as u16,
            ty,
        })
    }
}

/// Size of the compacted header block for `num_pls` descriptors.
pub fn header_block_len(num_pls: usize) -> usize {
    align_up(MSG_HDR_LEN + num_pls * PLD_DESC_LEN, PAYLOAD_ALIGN)
}

/// Writes the compact header and descriptors into `dst`, which must be exactly
/// `header_block_len(descs.len())` bytes. Barker and sequence are left zero;
/// they are stamped when the frame is handed out.
pub(crate) fn write_header(dst: &mut [u8], size: u16, padding: u16, descs: &[PayloadDescriptor]) {
    debug_assert_eq!(dst.len(), header_block_len(descs.len()));
    dst.fill(0);
    dst[OFF_SIZE..OFF_SIZE + 2].copy_from_slice(&size.to_le_bytes());
    dst[OFF_NUM_PLS..OFF_NUM_PLS + 2].copy_from_slice(&(descs.len() as u16).to_le_bytes());
    dst[OFF_PADDING..OFF_PADDING + 2].copy_from_slice(&padding.to_le_bytes());
    for (idx, desc) in descs.iter().enumerate() {
        let at = MSG_HDR_LEN + idx * PLD_DESC_LEN;
        dst[at..at + PLD_DESC_LEN].copy_from_slice(&desc.encode());
    }
}

pub(crate) fn stamp(dst: &mut [u8], sequence: u32) {
    dst[OFF_BARKER..OFF_BARKER + 4].copy_from_slice(&PREVIEW_BARKER.to_le_bytes());
    dst[OFF_SEQUENCE..OFF_SEQUENCE + 4].copy_from_slice(&sequence.to_le_bytes());
}

/// Problems found while parsing a transmitted frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WireError {
    /// Fewer bytes than the header or the lengths it announces.
    Truncated { needed: usize, got: usize },
    /// Preamble does not match [`PREVIEW_BARKER`].
    BadBarker(u32),
    /// Header size field disagrees with the buffer length.
    SizeMismatch { header: usize, actual: usize },
    /// More descriptors than a frame can carry.
    TooManyPayloads(usize),
    /// Descriptor type field outside the known set.
    UnknownPayloadType(u8),
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireError::Truncated { needed, got } => {
                write!(f, "frame truncated: need {needed} bytes, got {got}")
            }
            WireError::BadBarker(value) => write!(f, "bad frame barker {value:#010x}"),
            WireError::SizeMismatch { header, actual } => {
                write!(f, "header size {header} does not match frame length {actual}")
            }
            WireError::TooManyPayloads(n) => {
                write!(f, "{n} payload descriptors exceed the limit of {MAX_DESC}")
            }
            WireError::UnknownPayloadType(ty) => write!(f, "unknown payload type {ty}"),
        }
    }
}

impl std::error::Error for WireError {}

/// One payload recovered from a frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedPayload<'a> {
    pub ty: PayloadType,
    pub bytes: &'a [u8],
}

/// A transmitted frame parsed back into its parts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedFrame<'a> {
    pub sequence: u32,
    pub size: usize,
    pub padding: usize,
    pub payloads: Vec<DecodedPayload<'a>>,
}

/// Parses a frame as produced by [`TxFifo::get_next_ready`](crate::TxFifo::get_next_ready).
pub fn decode_frame(frame: &[u8]) -> Result<DecodedFrame<'_>, WireError> {
    if frame.len() < MSG_HDR_LEN {
        return Err(WireError::Truncated {
            needed: MSG_HDR_LEN,
            got: frame.len(),
        });
    }
    let barker = read_u32(frame, OFF_BARKER);
    if barker != PREVIEW_BARKER {
        return Err(WireError::BadBarker(barker));
    }
    let sequence = read_u32(frame, OFF_SEQUENCE);
    let size = read_u16(frame, OFF_SIZE) as usize;
    let num_pls = read_u16(frame, OFF_NUM_PLS) as usize;
    let padding = read_u16(frame, OFF_PADDING) as usize;

    if size != frame.len() {
        return Err(WireError::SizeMismatch {
            header: size,
            actual: frame.len(),
        });
    }
    if num_pls > MAX_DESC {
        return Err(WireError::TooManyPayloads(num_pls));
    }

    let hdr_len = header_block_len(num_pls);
    if frame.len() < hdr_len {
        return Err(WireError::Truncated {
            needed: hdr_len,
            got: frame.len(),
        });
    }

    let mut payloads = Vec::with_capacity(num_pls);
    let mut cursor = hdr_len;
    for idx in 0..num_pls {
        let at = MSG_HDR_LEN + idx * PLD_DESC_LEN;
        let mut raw = [0u8; PLD_DESC_LEN];
        raw.copy_from_slice(&frame[at..at + PLD_DESC_LEN]);
        let desc = PayloadDescriptor::decode(raw)?;
        let end = cursor + desc.len as usize;
        if end > frame.len() {
            return Err(WireError::Truncated {
                needed: end,
                got: frame.len(),
            });
        }
        payloads.push(DecodedPayload {
            ty: desc.ty,
            bytes: &frame[cursor..end],
        });
        cursor += desc.padded_len();
    }

    if cursor + padding != frame.len() {
        return Err(WireError::SizeMismatch {
            header: cursor + padding,
            actual: frame.len(),
        });
    }

    Ok(DecodedFrame {
        sequence,
        size,
        padding,
        payloads,
    })
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

pub(crate) fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}
