//! The channel abstraction the session protocol runs over.
//!
//! A channel has `postMessage`-style semantics: fire-and-forget sends and a
//! non-blocking receive. The in-process loopback pair here is the reference
//! implementation; cross-process transports plug in behind the same trait.

use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The far endpoint is gone and the inbound queue is drained.
    #[error("channel disconnected")]
    Disconnected,
}

/// One endpoint of a bidirectional message channel.
///
/// Delivery is FIFO per channel; there is no cross-channel ordering.
pub trait MessageChannel {
    /// Queue a message toward the peer.
    fn post(&mut self, data: String) -> Result<(), ChannelError>;

    /// Take the next pending inbound message, if any.
    ///
    /// `Ok(None)` means the queue is momentarily empty;
    /// `Err(Disconnected)` means the peer endpoint has been dropped and
    /// nothing further will arrive.
    fn try_take(&mut self) -> Result<Option<String>, ChannelError>;
}

/// In-process loopback endpoint backed by a pair of crossed mpsc queues.
pub struct LoopbackChannel {
    tx: UnboundedSender<String>,
    rx: UnboundedReceiver<String>,
}

/// Create two connected loopback endpoints.
pub fn loopback_pair() -> (LoopbackChannel, LoopbackChannel) {
    let (a_tx, b_rx) = unbounded_channel();
    let (b_tx, a_rx) = unbounded_channel();
    (
        LoopbackChannel { tx: a_tx, rx: a_rx },
        LoopbackChannel { tx: b_tx, rx: b_rx },
    )
}

impl MessageChannel for LoopbackChannel {
    fn post(&mut self, data: String) -> Result<(), ChannelError> {
        self.tx.send(data).map_err(|_| ChannelError::Disconnected)
    }

    fn try_take(&mut self) -> Result<Option<String>, ChannelError> {
        match self.rx.try_recv() {
            Ok(data) => Ok(Some(data)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(ChannelError::Disconnected),
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────
