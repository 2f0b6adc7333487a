//! Error surface for the transmit FIFO.
//!
//! Only two kinds of failure reach callers: setup problems (bad configuration
//! or no memory for the ring) and a declined append. Internal invariant
//! violations are logged where they happen and never surface here.

use std::fmt;

/// Convenience result alias for fallible FIFO operations.
pub type FifoResult<T, E = FifoError> = Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Errors surfaced by the transmit FIFO.
pub enum FifoError {
    /// The supplied [`FifoConfig`](crate::FifoConfig) cannot describe a usable ring.
    InvalidConfig(&'static str),
    /// Allocation of the ring's backing memory failed.
    AllocationFailed { size: usize, alignment: usize },
    /// No contiguous room is left for the payload; retry after an acknowledgement.
    NoSpace { needed: usize, free: usize },
    /// Payload length cannot be expressed in a payload descriptor.
    PayloadTooLarge { len: usize, max: usize },
}

impl FifoError {
    /// True for the recoverable space-exhaustion outcome.
    pub fn is_no_space(&self) -> bool {
        matches!(self, FifoError::NoSpace { .. })
    }
}

impl fmt::Display for FifoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FifoError::InvalidConfig(reason) => write!(f, "invalid fifo configuration: {reason}"),
            FifoError::AllocationFailed { size, alignment } => {
                write!(
                    f,
                    "failed to allocate ring of {size} bytes aligned to {alignment}"
                )
            }
            FifoError::NoSpace { needed, free } => {
                write!(f, "no space in tx fifo: need {needed} bytes, {free} free")
            }
            FifoError::PayloadTooLarge { len, max } => {
                write!(f, "payload of {len} bytes exceeds descriptor limit of {max}")
            }
        }
    }
}

impl std::error::Error for FifoError {}
