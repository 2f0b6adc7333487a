use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

/// Callbacks from the queue to its transport. Always invoked with the queue
/// lock released, so implementations may call straight back into the queue.
pub trait TxNotify: Send + Sync + 'static {
    /// New payloads were offered (accepted or not); the transport should
    /// drain ready frames.
    fn kick(&self);

    /// An acknowledgement returned ring space; producers held back by
    /// `NoSpace` may retry.
    fn space_available(&self) {}
}

impl<N: TxNotify> TxNotify for Arc<N> {
    fn kick(&self) {
        (**self).kick();
    }

    fn space_available(&self) {
        (**self).space_available();
    }
}

/// Notifications are dropped; the transport polls on its own schedule.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotify;

impl TxNotify for NoopNotify {
    fn kick(&self) {}
}

/// Forwards notifications over single-slot channels. Repeated events collapse
/// into one pending token until the receiving side takes it.
#[derive(Clone, Debug)]
pub struct ChannelNotify {
    kick: Sender<()>,
    space: Sender<()>,
}

/// Receiving ends for a [`ChannelNotify`].
#[derive(Clone, Debug)]
pub struct NotifyReceiver {
    /// Woken when the transport should drain.
    pub kick: Receiver<()>,
    /// Woken when producers may retry.
    pub space: Receiver<()>,
}

impl ChannelNotify {
    pub fn new() -> (Self, NotifyReceiver) {
        let (kick_tx, kick_rx) = bounded(1);
        let (space_tx, space_rx) = bounded(1);
        (
            Self {
                kick: kick_tx,
                space: space_tx,
            },
            NotifyReceiver {
                kick: kick_rx,
                space: space_rx,
            },
        )
    }
}

fn signal(tx: &Sender<()>, what: &'static str) {
    match tx.try_send(()) {
        Ok(()) | Err(TrySendError::Full(())) => {}
        Err(TrySendError::Disconnected(())) => {
            tracing::trace!(event = what, "notify receiver dropped");
        }
    }
}

impl TxNotify for ChannelNotify {
    fn kick(&self) {
        signal(&self.kick, "kick");
    }

    fn space_available(&self) {
        signal(&self.space, "space");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bursts of notifications leave exactly one pending token per channel.
    #[test]
    fn channel_notify_coalesces() {
        let (notify, rx) = ChannelNotify::new();
        for _ in 0..5 {
            notify.kick();
        }
        notify.space_available();

        assert!(rx.kick.try_recv().is_ok());
        assert!(rx.kick.try_recv().is_err());
        assert!(rx.space.try_recv().is_ok());
        assert!(rx.space.try_recv().is_err());
    }

    #[test]
    fn dropped_receiver_is_ignored() {
        let (notify, rx) = ChannelNotify::new();
        drop(rx);
        notify.kick();
        notify.space_available();
    }
}
