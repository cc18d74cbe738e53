//! Shard-side CDC buffer
//!
//! A bounded FIFO of sequenced events awaiting durable acknowledgement.
//! On overflow the oldest entries are discarded; the truncated prefix is
//! the event-loss boundary the coordinator detects as a sequence gap.

use crate::event::SequencedEvent;
use std::collections::VecDeque;
use tracing::warn;

/// Bounded FIFO of unacknowledged events.
#[derive(Debug)]
pub struct CdcBuffer {
    events: VecDeque<SequencedEvent>,
    capacity: usize,
    dropped: u64,
}

impl CdcBuffer {
    /// A buffer holding at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        CdcBuffer {
            events: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        }
    }

    /// Append an event, evicting the oldest entry when full.
    pub fn push(&mut self, event: SequencedEvent) {
        if self.events.len() == self.capacity {
            if let Some(lost) = self.events.pop_front() {
                self.dropped += 1;
                warn!(
                    target: "trellis::cdc",
                    sequence = lost.sequence,
                    "CDC buffer overflow, oldest event dropped"
                );
            }
        }
        self.events.push_back(event);
    }

    /// Remove every event with sequence ≤ `sequence` (durably acked).
    ///
    /// Returns how many events were released.
    pub fn ack(&mut self, sequence: u64) -> usize {
        let before = self.events.len();
        while matches!(self.events.front(), Some(e) if e.sequence <= sequence) {
            self.events.pop_front();
        }
        before - self.events.len()
    }

    /// All unacknowledged events, oldest first.
    pub fn unacked(&self) -> Vec<SequencedEvent> {
        self.events.iter().cloned().collect()
    }

    /// Unacknowledged events with sequence > `after`.
    pub fn unacked_after(&self, after: u64) -> Vec<SequencedEvent> {
        self.events
            .iter()
            .filter(|e| e.sequence > after)
            .cloned()
            .collect()
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events lost to overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::CdcEvent;
    use trellis_core::{ObjectValue, Triple, TxId};

    fn event(sequence: u64) -> SequencedEvent {
        SequencedEvent {
            sequence,
            event: CdcEvent::Insert {
                triple: Triple::new(
                    "http://x/a",
                    "value",
                    ObjectValue::Int32(sequence as i32),
                    sequence,
                    TxId::parse("01ARZ3NDEKTSV4RRFFQ69G5FAV").unwrap(),
                )
                .unwrap(),
            },
        }
    }

    #[test]
    fn test_push_and_len() {
        let mut buf = CdcBuffer::new(10);
        for s in 1..=5 {
            buf.push(event(s));
        }
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.dropped(), 0);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mut buf = CdcBuffer::new(3);
        for s in 1..=5 {
            buf.push(event(s));
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.dropped(), 2);
        let unacked = buf.unacked();
        assert_eq!(unacked[0].sequence, 3);
        assert_eq!(unacked[2].sequence, 5);
    }

    #[test]
    fn test_ack_releases_prefix() {
        let mut buf = CdcBuffer::new(10);
        for s in 1..=5 {
            buf.push(event(s));
        }
        assert_eq!(buf.ack(3), 3);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.unacked()[0].sequence, 4);

        // Acking the same watermark again is a no-op
        assert_eq!(buf.ack(3), 0);
    }

    #[test]
    fn test_unacked_after() {
        let mut buf = CdcBuffer::new(10);
        for s in 1..=5 {
            buf.push(event(s));
        }
        let tail = buf.unacked_after(2);
        assert_eq!(tail.len(), 3);
        assert_eq!(tail[0].sequence, 3);
    }

    #[test]
    fn test_ack_beyond_everything_empties() {
        let mut buf = CdcBuffer::new(10);
        for s in 1..=5 {
            buf.push(event(s));
        }
        assert_eq!(buf.ack(u64::MAX), 5);
        assert!(buf.is_empty());
    }
}
