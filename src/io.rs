//! External I/O Integration
//!
//! Lock-free plumbing between event ingestion (MIDI, network, host
//! automation) and the control cycle:
//!
//! - [`AtomicF64`] for single parameter values shared across threads
//! - [`EngineEvent`] for discrete control events
//! - [`event_channel`], a bounded single-producer/single-consumer queue
//!   built on `rtrb` that drops the newest event when full

use crate::node::PokeEvent;
use crate::params::ParamId;
use core::sync::atomic::{AtomicU64, Ordering};
use rtrb::{Consumer, Producer, PushError, RingBuffer};

/// Default event queue capacity
pub const DEFAULT_EVENT_CAPACITY: usize = 16;

/// Atomic f64 for lock-free communication between threads
///
/// Uses AtomicU64 internally since there's no native AtomicF64.
#[derive(Debug)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn load(&self, ordering: Ordering) -> f64 {
        f64::from_bits(self.0.load(ordering))
    }

    pub fn store(&self, value: f64, ordering: Ordering) {
        self.0.store(value.to_bits(), ordering);
    }
}

impl Default for AtomicF64 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Clone for AtomicF64 {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

/// A discrete control event, applied at the start of the next control tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineEvent {
    /// Note on; velocity 0 is treated as note off
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
    /// Normalized bend in [-1, 1]
    PitchBend(f64),
    /// Poke every active voice
    Poke(PokeEvent),
    /// Poke a single voice by index
    PokeVoice { voice: usize, poke: PokeEvent },
    Parameter { id: ParamId, value: f64 },
    AllNotesOff,
    Panic,
}

/// Create a bounded event queue
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (producer, consumer) = RingBuffer::new(capacity.max(1));
    (
        EventSender {
            producer,
            dropped: 0,
        },
        EventReceiver { consumer },
    )
}

/// Producer half, owned by the ingestion side
pub struct EventSender {
    producer: Producer<EngineEvent>,
    dropped: u64,
}

impl EventSender {
    /// Enqueue without blocking. A full queue drops `event` and returns false.
    pub fn send(&mut self, event: EngineEvent) -> bool {
        match self.producer.push(event) {
            Ok(()) => true,
            Err(PushError::Full(dropped)) => {
                self.dropped += 1;
                tracing::warn!(?dropped, total_dropped = self.dropped, "event queue full, dropping newest event");
                false
            }
        }
    }

    /// Events rejected so far because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Free slots right now
    pub fn slots(&self) -> usize {
        self.producer.slots()
    }
}

/// Consumer half, drained by the control cycle
pub struct EventReceiver {
    consumer: Consumer<EngineEvent>,
}

impl EventReceiver {
    pub fn try_recv(&mut self) -> Option<EngineEvent> {
        self.consumer.pop().ok()
    }

    /// Number of queued events
    pub fn len(&self) -> usize {
        self.consumer.slots()
    }

    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }
}

impl core::fmt::Debug for EventSender {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventSender")
            .field("slots", &self.producer.slots())
            .field("dropped", &self.dropped)
            .finish()
    }
}

impl core::fmt::Debug for EventReceiver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventReceiver")
            .field("len", &self.consumer.slots())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_atomic_f64() {
        let value = Arc::new(AtomicF64::new(0.5));
        let other = value.clone();

        other.set(0.25);
        assert_eq!(value.get(), 0.25);

        value.store(-1.0, Ordering::SeqCst);
        assert_eq!(other.load(Ordering::SeqCst), -1.0);
    }

    #[test]
    fn test_atomic_f64_clone_is_independent() {
        let a = AtomicF64::new(1.0);
        let b = a.clone();
        a.set(2.0);
        assert_eq!(b.get(), 1.0);
    }

    #[test]
    fn test_event_channel_fifo() {
        let (mut tx, mut rx) = event_channel(4);
        assert!(tx.send(EngineEvent::NoteOn { note: 60, velocity: 100 }));
        assert!(tx.send(EngineEvent::NoteOff { note: 60 }));

        assert_eq!(rx.len(), 2);
        assert_eq!(rx.try_recv(), Some(EngineEvent::NoteOn { note: 60, velocity: 100 }));
        assert_eq!(rx.try_recv(), Some(EngineEvent::NoteOff { note: 60 }));
        assert_eq!(rx.try_recv(), None);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_event_channel_drops_newest_when_full() {
        let (mut tx, mut rx) = event_channel(DEFAULT_EVENT_CAPACITY);

        for note in 0..DEFAULT_EVENT_CAPACITY as u8 {
            assert!(tx.send(EngineEvent::NoteOn { note, velocity: 1 }));
        }
        assert!(!tx.send(EngineEvent::NoteOn { note: 100, velocity: 1 }));
        assert_eq!(tx.dropped(), 1);

        let mut received = Vec::new();
        while let Some(event) = rx.try_recv() {
            received.push(event);
        }
        assert_eq!(received.len(), DEFAULT_EVENT_CAPACITY);
        assert_eq!(received.last(), Some(&EngineEvent::NoteOn { note: 15, velocity: 1 }));
    }

    #[test]
    fn test_event_channel_across_threads() {
        let (mut tx, mut rx) = event_channel(64);
        let handle = std::thread::spawn(move || {
            for note in 0..32u8 {
                tx.send(EngineEvent::NoteOff { note });
            }
        });
        handle.join().ok();

        let mut count = 0;
        while rx.try_recv().is_some() {
            count += 1;
        }
        assert_eq!(count, 32);
    }
}
