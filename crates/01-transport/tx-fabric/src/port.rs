use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tx_fifo::{Appended, FifoConfig, FifoError, PayloadType, TxFifo, TxStats};

use crate::error::{FabricError, FabricResult};
use crate::notify::{NoopNotify, TxNotify};

struct Shared<N> {
    config: FifoConfig,
    fifo: Mutex<Option<TxFifo>>,
    notify: N,
    metrics: QueueMetrics,
}

/// Clonable handle to a transmit FIFO shared by producers and one transport.
///
/// Every operation takes the lock for its bookkeeping and copies only;
/// notifications and the transport's send run after it is dropped.
pub struct TxQueue<N: TxNotify = NoopNotify> {
    inner: Arc<Shared<N>>,
}

impl<N: TxNotify> Clone for TxQueue<N> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Metadata of a frame copied out by [`TxQueue::next_ready_into`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameInfo {
    pub sequence: u32,
    pub len: usize,
    pub payload_count: usize,
    pub padding: usize,
}

/// Owned copy of a ready frame.
#[derive(Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub bytes: Vec<u8>,
    pub sequence: u32,
    pub payload_count: usize,
    pub padding: usize,
}

impl fmt::Debug for OutboundFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundFrame")
            .field("len", &self.bytes.len())
            .field("sequence", &self.sequence)
            .field("payload_count", &self.payload_count)
            .field("padding", &self.padding)
            .finish()
    }
}

impl TxQueue<NoopNotify> {
    /// Queue without transport notifications.
    pub fn polling(config: FifoConfig) -> FabricResult<Self> {
        Self::setup(config, NoopNotify)
    }
}

impl<N: TxNotify> TxQueue<N> {
    pub fn setup(config: FifoConfig, notify: N) -> FabricResult<Self> {
        let fifo = TxFifo::setup(config)?;
        Ok(Self {
            inner: Arc::new(Shared {
                config,
                fifo: Mutex::new(Some(fifo)),
                notify,
                metrics: QueueMetrics::default(),
            }),
        })
    }

    pub fn config(&self) -> &FifoConfig {
        &self.inner.config
    }

    pub fn notifier(&self) -> &N {
        &self.inner.notify
    }

    /// Queues one payload and kicks the transport, whether or not it fit.
    pub fn append(&self, payload: &[u8], ty: PayloadType) -> FabricResult<Appended> {
        let result = {
            let mut guard = self.inner.fifo.lock();
            let fifo = guard.as_mut().ok_or(FabricError::Released)?;
            fifo.append(payload, ty)
        };
        self.inner.metrics.record_append(&result);
        self.kick();
        result.map_err(FabricError::from)
    }

    /// Copies the next ready frame into `buf` (replacing its contents). The
    /// frame stays in flight until [`TxQueue::acknowledge_sent`].
    pub fn next_ready_into(&self, buf: &mut Vec<u8>) -> FabricResult<Option<FrameInfo>> {
        let info = {
            let mut guard = self.inner.fifo.lock();
            let fifo = guard.as_mut().ok_or(FabricError::Released)?;
            fifo.get_next_ready().map(|frame| {
                buf.clear();
                buf.extend_from_slice(frame.bytes);
                FrameInfo {
                    sequence: frame.sequence,
                    len: frame.len(),
                    payload_count: frame.payload_count,
                    padding: frame.padding,
                }
            })
        };
        if info.is_some() {
            self.inner.metrics.retrieved.fetch_add(1, Ordering::Relaxed);
        }
        Ok(info)
    }

    pub fn next_ready(&self) -> FabricResult<Option<OutboundFrame>> {
        let mut bytes = Vec::new();
        Ok(self
            .next_ready_into(&mut bytes)?
            .map(|info| OutboundFrame {
                bytes,
                sequence: info.sequence,
                payload_count: info.payload_count,
                padding: info.padding,
            }))
    }

    /// Frees the in-flight frame's ring space. Returns false when nothing
    /// was in flight.
    pub fn acknowledge_sent(&self) -> FabricResult<bool> {
        let released = {
            let mut guard = self.inner.fifo.lock();
            let fifo = guard.as_mut().ok_or(FabricError::Released)?;
            fifo.acknowledge_sent()
        };
        if released {
            self.inner.metrics.acked.fetch_add(1, Ordering::Relaxed);
            self.inner.notify.space_available();
        }
        Ok(released)
    }

    /// Drains every ready frame through `send`. Each frame is acknowledged
    /// after `send` returns, success or not; failed frames are dropped.
    /// Returns the number of frames handed to `send`.
    pub fn pump<F, E>(&self, mut send: F) -> FabricResult<usize>
    where
        F: FnMut(&[u8]) -> Result<(), E>,
        E: fmt::Display,
    {
        let mut buf = Vec::new();
        let mut sent = 0;
        while let Some(info) = self.next_ready_into(&mut buf)? {
            if let Err(err) = send(&buf) {
                self.inner.metrics.send_failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    sequence = info.sequence,
                    len = info.len,
                    payloads = info.payload_count,
                    error = %err,
                    "tx frame send failed; dropping"
                );
            }
            self.acknowledge_sent()?;
            sent += 1;
        }
        Ok(sent)
    }

    pub fn stats(&self) -> FabricResult<TxStats> {
        let guard = self.inner.fifo.lock();
        guard
            .as_ref()
            .map(TxFifo::stats)
            .ok_or(FabricError::Released)
    }

    pub fn reset_stats(&self) -> FabricResult<()> {
        let mut guard = self.inner.fifo.lock();
        guard
            .as_mut()
            .map(TxFifo::reset_stats)
            .ok_or(FabricError::Released)
    }

    pub fn free_bytes(&self) -> FabricResult<usize> {
        let guard = self.inner.fifo.lock();
        guard
            .as_ref()
            .map(TxFifo::free_bytes)
            .ok_or(FabricError::Released)
    }

    pub fn is_released(&self) -> bool {
        self.inner.fifo.lock().is_none()
    }

    /// Frees the ring. Later operations fail with [`FabricError::Released`]
    /// until [`TxQueue::restart`]. Returns false if already released.
    pub fn release(&self) -> bool {
        let fifo = self.inner.fifo.lock().take();
        match fifo {
            Some(fifo) => {
                fifo.release();
                tracing::debug!("tx queue released");
                true
            }
            None => false,
        }
    }

    /// Replaces the FIFO with a fresh one (empty ring, sequence zero), as
    /// needed after the device resets. Queued and in-flight frames are lost.
    pub fn restart(&self) -> FabricResult<()> {
        let fresh = TxFifo::setup(self.inner.config)?;
        let old = self.inner.fifo.lock().replace(fresh);
        if let Some(old) = old {
            if old.has_in_flight() || old.pending_frames() > 0 {
                tracing::info!(
                    pending = old.pending_frames(),
                    in_flight = old.has_in_flight(),
                    "tx queue restart discards queued frames"
                );
            }
            old.release();
        }
        self.inner.notify.space_available();
        Ok(())
    }

    pub fn metrics(&self) -> QueueMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    fn kick(&self) {
        self.inner.metrics.kicks.fetch_add(1, Ordering::Relaxed);
        self.inner.notify.kick();
    }
}

#[derive(Default)]
struct QueueMetrics {
    appended: AtomicU64,
    no_space: AtomicU64,
    too_large: AtomicU64,
    retrieved: AtomicU64,
    acked: AtomicU64,
    send_failed: AtomicU64,
    kicks: AtomicU64,
}

impl QueueMetrics {
    fn record_append(&self, result: &Result<Appended, FifoError>) {
        let counter = match result {
            Ok(_) => &self.appended,
            Err(FifoError::NoSpace { .. }) => &self.no_space,
            Err(FifoError::PayloadTooLarge { .. }) => &self.too_large,
            Err(_) => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> QueueMetricsSnapshot {
        QueueMetricsSnapshot {
            appended: self.appended.load(Ordering::Relaxed),
            no_space: self.no_space.load(Ordering::Relaxed),
            too_large: self.too_large.load(Ordering::Relaxed),
            retrieved: self.retrieved.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            send_failed: self.send_failed.load(Ordering::Relaxed),
            kicks: self.kicks.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueMetricsSnapshot {
    pub appended: u64,
    pub no_space: u64,
    pub too_large: u64,
    pub retrieved: u64,
    pub acked: u64,
    pub send_failed: u64,
    pub kicks: u64,
}
