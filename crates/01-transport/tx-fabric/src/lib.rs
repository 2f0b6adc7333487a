//! Shared transmit queue: a [`tx_fifo::TxFifo`] behind one lock, with
//! transport notifications raised after the lock is dropped.

mod error;
mod notify;
mod port;

pub use error::{FabricError, FabricResult};
pub use notify::{ChannelNotify, NoopNotify, NotifyReceiver, TxNotify};
pub use port::{FrameInfo, OutboundFrame, QueueMetricsSnapshot, TxQueue};
