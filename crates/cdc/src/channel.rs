//! In-process bidirectional CDC channel
//!
//! A pair of connected endpoints carrying JSON frames, standing in for the
//! persistent shard ↔ coordinator connection. Dropping an endpoint closes
//! the channel; the peer observes the close on its next send or receive,
//! which is the disconnect signal the coordinator acts on.

use crate::wire::WireMessage;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;
use trellis_core::{Error, Result};

/// One endpoint of a duplex frame channel.
pub struct ChannelEnd {
    tx: Sender<String>,
    rx: Receiver<String>,
}

/// Create a connected endpoint pair.
pub fn duplex() -> (ChannelEnd, ChannelEnd) {
    let (a_tx, b_rx) = channel();
    let (b_tx, a_rx) = channel();
    (
        ChannelEnd { tx: a_tx, rx: a_rx },
        ChannelEnd { tx: b_tx, rx: b_rx },
    )
}

impl ChannelEnd {
    /// Send a frame; fails with a transient error once the peer is gone.
    pub fn send(&self, msg: &WireMessage) -> Result<()> {
        let raw = msg.encode()?;
        self.tx
            .send(raw)
            .map_err(|_| Error::transient("Connection closed"))
    }

    /// Send a pre-encoded frame.
    pub fn send_raw(&self, raw: String) -> Result<()> {
        self.tx
            .send(raw)
            .map_err(|_| Error::transient("Connection closed"))
    }

    /// Block for the next frame.
    pub fn recv(&self) -> Result<WireMessage> {
        let raw = self
            .rx
            .recv()
            .map_err(|_| Error::transient("Connection closed"))?;
        WireMessage::decode(&raw)
    }

    /// Block up to `timeout` for the next frame; `Ok(None)` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<WireMessage>> {
        match self.rx.recv_timeout(timeout) {
            Ok(raw) => Ok(Some(WireMessage::decode(&raw)?)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::transient("Connection closed")),
        }
    }

    /// Non-blocking receive; `Ok(None)` when no frame is waiting.
    pub fn try_recv(&self) -> Result<Option<WireMessage>> {
        match self.rx.try_recv() {
            Ok(raw) => Ok(Some(WireMessage::decode(&raw)?)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(Error::transient("Connection closed")),
        }
    }

    /// Split into raw sender/receiver halves (coordinator plumbing).
    pub(crate) fn into_parts(self) -> (Sender<String>, Receiver<String>) {
        (self.tx, self.rx)
    }
}
