//! Transmit-side FIFO that coalesces payloads into block-aligned frames.
//!
//! The pieces, leaves first:
//! * [`Ring`] – contiguous-only byte ring with monotonic cursors and tail skipping.
//! * [`TxFifo`] – frame builder, closer and retrieval walk over the ring.
//! * [`wire`] – frame header/descriptor layout and a decoder for receivers.
//! * [`TxStats`] – frame count and size extrema collected on retrieval.
//! * [`FifoError`] – setup failures and declined appends.
//!
//! `TxFifo` is a plain `&mut self` state machine; callers sharing it between a
//! producer and a transport wrap it in a lock (see the `tx-fabric` crate).

mod config;
mod error;
mod fifo;
mod frame;
mod region;
mod ring;
mod stats;
pub mod wire;

pub use config::{FifoConfig, DEFAULT_BLOCK_ALIGNMENT, DEFAULT_CAPACITY};
pub use error::{FifoError, FifoResult};
pub use fifo::{Appended, TxFifo};
pub use frame::{Span, WireFrame};
pub use region::RingMemory;
pub use ring::{Push, Ring, SkippedTail};
pub use stats::TxStats;
pub use wire::{PayloadType, MAX_DESC, MAX_PAYLOAD_LEN, PAYLOAD_ALIGN};
