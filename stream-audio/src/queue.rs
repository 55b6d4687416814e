//! # Pending Packet Queue and Backpressure Gate
//!
//! The bounded mailbox between the parsing loop (producer) and the output
//! device's fill callback (consumer), plus the counting permit that throttles
//! the producer when the consumer falls behind.
//!
//! ## Backpressure policy
//!
//! Acquisition is coarse-grained: the parsing loop takes one permit per fill
//! burst and then parses until the queue length exceeds the configured limit
//! or input runs out. The fill callback releases a permit on every pop (and
//! when it runs dry, so a gate-blocked producer always wakes). Memory stays
//! bounded at O(limit) packets without per-packet synchronization.

use crate::traits::AudioPacket;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Semaphore;

/// Outcome of a single [`PacketQueue::pop_front`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoppedPacket {
    /// The oldest queued packet.
    Packet(AudioPacket),
    /// Queue is empty but the parser is still producing.
    Pending,
    /// Queue is empty and all input has been parsed.
    Eof,
}

struct QueueState {
    packets: VecDeque<AudioPacket>,
    all_input_parsed: bool,
}

/// FIFO of parsed packets with an "all input parsed" end marker.
///
/// Pushed only by the parsing loop, popped only by the fill callback; both
/// sides hold the internal lock just long enough to move a packet.
pub struct PacketQueue {
    state: Mutex<QueueState>,
}

impl PacketQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                packets: VecDeque::new(),
                all_input_parsed: false,
            }),
        }
    }

    /// Append packets at the tail in parse order.
    pub fn push_all(&self, packets: Vec<AudioPacket>) {
        if packets.is_empty() {
            return;
        }
        let mut state = self.state.lock();
        state.packets.extend(packets);
    }

    /// Remove and return the oldest packet.
    ///
    /// Returns [`PoppedPacket::Eof`] only after
    /// [`PacketQueue::mark_all_input_parsed`] has run and the queue drained.
    pub fn pop_front(&self) -> PoppedPacket {
        let mut state = self.state.lock();
        match state.packets.pop_front() {
            Some(packet) => PoppedPacket::Packet(packet),
            None if state.all_input_parsed => PoppedPacket::Eof,
            None => PoppedPacket::Pending,
        }
    }

    /// One-way transition: no further input will ever be parsed.
    pub fn mark_all_input_parsed(&self) {
        self.state.lock().all_input_parsed = true;
    }

    /// Returns `true` once the end marker is set.
    pub fn is_all_input_parsed(&self) -> bool {
        self.state.lock().all_input_parsed
    }

    /// Number of packets currently queued.
    pub fn len(&self) -> usize {
        self.state.lock().packets.len()
    }

    /// Returns `true` if no packets are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Counting permit limiting how far ahead the parsing loop may run.
///
/// Starts with a single permit. [`BackpressureGate::acquire`] suspends the
/// calling task; [`BackpressureGate::release`] is non-blocking and safe to
/// call from the device callback thread.
pub struct BackpressureGate {
    permits: Semaphore,
}

impl BackpressureGate {
    /// Create a gate holding one initial permit.
    pub fn new() -> Self {
        Self {
            permits: Semaphore::new(1),
        }
    }

    /// Take one permit, suspending until one is available.
    ///
    /// The permit is consumed; it comes back only via
    /// [`BackpressureGate::release`].
    pub async fn acquire(&self) {
        // The semaphore is never closed, so acquisition cannot fail.
        match self.permits.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => unreachable!("backpressure gate semaphore is never closed"),
        }
    }

    /// Add one permit, waking a suspended producer if any.
    pub fn release(&self) {
        self.permits.add_permits(1);
    }

    /// Permits currently available (diagnostics only).
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

impl Default for BackpressureGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;

    fn packet(tag: u8) -> AudioPacket {
        AudioPacket::new(Bytes::from(vec![tag; 4]))
    }

    #[test]
    fn pop_is_fifo() {
        let queue = PacketQueue::new();
        queue.push_all(vec![packet(1), packet(2)]);
        queue.push_all(vec![packet(3)]);

        for tag in 1..=3u8 {
            match queue.pop_front() {
                PoppedPacket::Packet(p) => assert_eq!(p.data[0], tag),
                other => panic!("expected packet {tag}, got {:?}", other),
            }
        }
        assert_eq!(queue.pop_front(), PoppedPacket::Pending);
    }

    #[test]
    fn eof_requires_end_marker() {
        let queue = PacketQueue::new();
        assert_eq!(queue.pop_front(), PoppedPacket::Pending);

        queue.push_all(vec![packet(9)]);
        queue.mark_all_input_parsed();

        // Queued packets drain before EOF is reported.
        assert!(matches!(queue.pop_front(), PoppedPacket::Packet(_)));
        assert_eq!(queue.pop_front(), PoppedPacket::Eof);
        assert_eq!(queue.pop_front(), PoppedPacket::Eof);
    }

    #[test]
    fn empty_push_is_a_no_op() {
        let queue = PacketQueue::new();
        queue.push_all(Vec::new());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn gate_starts_with_one_permit() {
        let gate = BackpressureGate::new();
        gate.acquire().await;
        assert_eq!(gate.available_permits(), 0);

        gate.release();
        gate.acquire().await;
        assert_eq!(gate.available_permits(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_suspends_until_release() {
        let gate = Arc::new(BackpressureGate::new());
        gate.acquire().await;

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                gate.acquire().await;
            })
        };

        // Give the waiter a chance to suspend; it cannot finish yet.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        gate.release();
        waiter.await.unwrap();
    }
}
