use thiserror::Error;

use tx_fifo::FifoError;

pub type FabricResult<T> = Result<T, FabricError>;

#[derive(Debug, Error)]
pub enum FabricError {
    #[error("tx fifo error: {0}")]
    Fifo(#[from] FifoError),

    #[error("tx queue has been released")]
    Released,
}

impl FabricError {
    /// The append was declined for lack of ring space; retry after an acknowledgement.
    pub fn is_no_space(&self) -> bool {
        matches!(self, FabricError::Fifo(err) if err.is_no_space())
    }
}
