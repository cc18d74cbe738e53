//! Shard CDC producer
//!
//! Owns the shard's sequence counter and unacked-event buffer, and speaks
//! the wire protocol toward a coordinator. The sequence counter starts at
//! the last acknowledged value the shard has persisted; on reconnect the
//! producer re-registers with that value and retransmits everything the
//! coordinator has not acknowledged.

use crate::buffer::CdcBuffer;
use crate::channel::ChannelEnd;
use crate::event::{CdcEvent, SequencedEvent};
use crate::wire::WireMessage;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use trellis_core::{CdcConfig, Error, Result};

/// The shard side of the CDC channel.
pub struct ShardProducer {
    shard_id: String,
    namespace: String,
    buffer: CdcBuffer,
    /// Last assigned sequence
    sequence: u64,
    /// Highest durably acknowledged sequence
    last_acked: u64,
    channel: Option<ChannelEnd>,
    /// Most recent error frame from the coordinator
    last_error: Option<String>,
}

impl ShardProducer {
    /// A producer resuming from a persisted watermark.
    pub fn new(
        shard_id: impl Into<String>,
        namespace: impl Into<String>,
        config: &CdcConfig,
        last_acked: u64,
    ) -> Self {
        ShardProducer {
            shard_id: shard_id.into(),
            namespace: namespace.into(),
            buffer: CdcBuffer::new(config.max_buffer_size),
            sequence: last_acked,
            last_acked,
            channel: None,
            last_error: None,
        }
    }

    /// Record a mutation, assigning it the next sequence.
    pub fn record(&mut self, event: CdcEvent) -> u64 {
        self.sequence += 1;
        self.buffer.push(SequencedEvent {
            sequence: self.sequence,
            event,
        });
        self.sequence
    }

    /// Attach a channel and declare the resume point.
    ///
    /// Used for both the initial connection and reconnects; the register
    /// frame always carries the persisted watermark, and registration is
    /// idempotent for the same value.
    pub fn connect(&mut self, channel: ChannelEnd) -> Result<()> {
        channel.send(&WireMessage::Register {
            shard_id: self.shard_id.clone(),
            namespace: self.namespace.clone(),
            last_sequence: self.last_acked,
        })?;
        info!(
            target: "trellis::cdc",
            shard_id = %self.shard_id,
            last_sequence = self.last_acked,
            "producer registered"
        );
        self.channel = Some(channel);
        Ok(())
    }

    /// Drop the channel (simulates a connection loss).
    pub fn disconnect(&mut self) {
        self.channel = None;
    }

    /// True when a channel is attached.
    pub fn is_connected(&self) -> bool {
        self.channel.is_some()
    }

    /// Send every unacknowledged event as one batch.
    ///
    /// Returns the number of events sent; an empty buffer sends nothing.
    pub fn flush(&mut self) -> Result<usize> {
        let events = self.buffer.unacked();
        if events.is_empty() {
            return Ok(0);
        }
        let sequence = events.last().map(|e| e.sequence).unwrap_or(self.last_acked);
        let count = events.len();
        let channel = self
            .channel
            .as_ref()
            .ok_or_else(|| Error::transient("WebSocket not connected"))?;
        channel.send(&WireMessage::Cdc {
            shard_id: self.shard_id.clone(),
            events,
            sequence,
        })?;
        debug!(
            target: "trellis::cdc",
            shard_id = %self.shard_id,
            events = count,
            sequence,
            "batch sent"
        );
        Ok(count)
    }

    /// Drain and handle every frame waiting on the channel.
    pub fn poll(&mut self) -> Result<usize> {
        let mut handled = 0;
        loop {
            let msg = match &self.channel {
                Some(channel) => channel.try_recv()?,
                None => return Ok(handled),
            };
            match msg {
                Some(msg) => {
                    self.handle(msg)?;
                    handled += 1;
                }
                None => return Ok(handled),
            }
        }
    }

    /// Handle frames until the watermark reaches `sequence` or `timeout`
    /// elapses. Returns whether the watermark was reached.
    pub fn wait_for_ack(&mut self, sequence: u64, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        while self.last_acked < sequence {
            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) => remaining,
                None => return Ok(false),
            };
            let msg = match &self.channel {
                Some(channel) => channel.recv_timeout(remaining)?,
                None => return Err(Error::transient("WebSocket not connected")),
            };
            match msg {
                Some(msg) => self.handle(msg)?,
                None => return Ok(false),
            }
        }
        Ok(true)
    }

    fn handle(&mut self, msg: WireMessage) -> Result<()> {
        match msg {
            WireMessage::Registered {
                shard_id,
                last_sequence,
            } => {
                debug!(
                    target: "trellis::cdc",
                    shard_id = %shard_id,
                    last_sequence,
                    "registration confirmed"
                );
                self.buffer.ack(last_sequence);
                self.last_acked = self.last_acked.max(last_sequence);
            }
            WireMessage::Ack {
                sequence,
                events_acked,
                ..
            } => {
                let released = self.buffer.ack(sequence);
                self.last_acked = self.last_acked.max(sequence);
                debug!(
                    target: "trellis::cdc",
                    shard_id = %self.shard_id,
                    sequence,
                    events_acked,
                    released,
                    "ack received"
                );
            }
            WireMessage::Error { message } => {
                warn!(
                    target: "trellis::cdc",
                    shard_id = %self.shard_id,
                    message = %message,
                    "coordinator error frame"
                );
                let out_of_order = message.contains("Out of order");
                self.last_error = Some(message);
                if out_of_order {
                    // Correct ourselves: retransmit everything past the
                    // durable watermark.
                    self.flush()?;
                }
            }
            other => {
                warn!(
                    target: "trellis::cdc",
                    shard_id = %self.shard_id,
                    frame = ?other,
                    "unexpected frame on producer channel"
                );
            }
        }
        Ok(())
    }

    /// Events awaiting acknowledgement.
    pub fn pending_count(&self) -> usize {
        self.buffer.len()
    }

    /// The unacknowledged events themselves, oldest first.
    pub fn pending_events(&self) -> Vec<SequencedEvent> {
        self.buffer.unacked()
    }

    /// The durable watermark (persist this across restarts).
    pub fn last_acked(&self) -> u64 {
        self.last_acked
    }

    /// The last assigned sequence.
    pub fn current_sequence(&self) -> u64 {
        self.sequence
    }

    /// Most recent coordinator error frame, if any.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Events dropped to buffer overflow.
    pub fn dropped(&self) -> u64 {
        self.buffer.dropped()
    }
}
