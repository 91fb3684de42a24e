//! Single-producer/single-consumer byte ring shared between an interrupt
//! handler and the service loop.
//!
//! The producer owns `write`, the consumer owns `read`. Neither side ever
//! stores to the other's index, so the only synchronization is the
//! release/acquire pairing on the index each side publishes. One slot is
//! always left unused: the ring is empty when `read == write` and full when
//! advancing `write` would land on `read`.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

/// Capacity used for both the infrared and the PS/2 receive rings.
pub const CHANNEL_CAPACITY: usize = 64;

pub struct ByteChannel<const N: usize = CHANNEL_CAPACITY> {
    slots: [AtomicU8; N],
    write: AtomicUsize,
    read: AtomicUsize,
}

impl<const N: usize> Default for ByteChannel<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> ByteChannel<N> {
    /// Usable as a `static` initializer; `N` must be at least 2.
    pub const fn new() -> Self {
        assert!(N >= 2, "a ring needs one spare slot");
        Self {
            slots: [const { AtomicU8::new(0) }; N],
            write: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
        }
    }

    /// Number of bytes the ring can hold at once.
    pub const fn capacity(&self) -> usize {
        N - 1
    }

    /// Producer side. Returns `false` and leaves the ring untouched when full.
    pub fn try_push(&self, byte: u8) -> bool {
        let write = self.write.load(Ordering::Relaxed);
        let next = (write + 1) % N;
        if next == self.read.load(Ordering::Acquire) {
            return false;
        }
        self.slots[write].store(byte, Ordering::Relaxed);
        self.write.store(next, Ordering::Release);
        true
    }

    /// Consumer side.
    pub fn try_pop(&self) -> Option<u8> {
        let read = self.read.load(Ordering::Relaxed);
        if read == self.write.load(Ordering::Acquire) {
            return None;
        }
        let byte = self.slots[read].load(Ordering::Relaxed);
        self.read.store((read + 1) % N, Ordering::Release);
        Some(byte)
    }

    pub fn is_empty(&self) -> bool {
        self.read.load(Ordering::Acquire) == self.write.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        (write + N - read) % N
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_fifo_order() {
        let ring = ByteChannel::<8>::new();
        for b in [0x10, 0x20, 0x30] {
            assert!(ring.try_push(b));
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.try_pop(), Some(0x10));
        assert_eq!(ring.try_pop(), Some(0x20));
        assert_eq!(ring.try_pop(), Some(0x30));
        assert_eq!(ring.try_pop(), None);
        assert!(ring.is_empty());
    }

    #[test]
    fn test_full_ring_drops_newest() {
        let ring = ByteChannel::<CHANNEL_CAPACITY>::new();
        assert_eq!(ring.capacity(), CHANNEL_CAPACITY - 1);
        for i in 0..ring.capacity() {
            assert!(ring.try_push(i as u8), "push {i} should fit");
        }
        assert!(!ring.try_push(0xEE));
        assert!(!ring.try_push(0xEF));
        assert_eq!(ring.len(), ring.capacity());
        for i in 0..ring.capacity() {
            assert_eq!(ring.try_pop(), Some(i as u8));
        }
        assert_eq!(ring.try_pop(), None);
    }

    #[test]
    fn test_wraparound() {
        let ring = ByteChannel::<4>::new();
        for round in 0..10u8 {
            assert!(ring.try_push(round));
            assert!(ring.try_push(round.wrapping_add(100)));
            assert_eq!(ring.try_pop(), Some(round));
            assert_eq!(ring.try_pop(), Some(round.wrapping_add(100)));
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn test_static_instance() {
        static RING: ByteChannel = ByteChannel::new();
        assert!(RING.try_push(0xAA));
        assert_eq!(RING.try_pop(), Some(0xAA));
    }

    #[test]
    fn test_threaded_producer_consumer() {
        let ring = Arc::new(ByteChannel::<16>::new());
        let producer = {
            let ring = ring.clone();
            thread::spawn(move || {
                for b in 0..=255u8 {
                    while !ring.try_push(b) {
                        thread::yield_now();
                    }
                }
            })
        };

        let mut seen = Vec::with_capacity(256);
        while seen.len() < 256 {
            match ring.try_pop() {
                Some(b) => seen.push(b),
                None => thread::yield_now(),
            }
        }
        producer.join().unwrap();
        assert_eq!(seen, (0..=255u8).collect::<Vec<_>>());
    }
}
