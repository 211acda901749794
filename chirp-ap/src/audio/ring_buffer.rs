//! Lock-free per-stream sample ring
//!
//! Single-producer single-consumer queue of 16-bit samples shared between
//! the fill context (producer) and the mixer running on the hardware clock
//! (consumer).
//!
//! Design:
//! - Capacity is a power of two; cursors wrap with a mask
//! - One slot always stays unused, so `read == write` means empty and
//!   `available_to_read() + available_to_write() == capacity - 1` always holds
//! - Only the producer side writes the write cursor. The consumer advances
//!   the read cursor with a compare-exchange; `clear` (producer side) moves
//!   it up to the write cursor, and a pop racing a clear loses and returns
//!   `None` instead of a discarded sample
//! - Cursor stores use Release, the opposite side loads with Acquire, so a
//!   sample is visible before the cursor that publishes it
//! - Full buffer: `push` refuses the sample and leaves unread data untouched
//! - Empty buffer: `pop` returns `None`; the mixer turns that into silence

use std::sync::atomic::{AtomicI16, AtomicUsize, Ordering};

/// Fixed-capacity SPSC ring of i16 samples
pub struct SampleRing {
    /// Sample storage, allocated once at engine initialization
    slots: Box<[AtomicI16]>,

    /// capacity - 1
    mask: usize,

    /// Next slot to read (advanced by the consumer, jumped forward by `clear`)
    read: AtomicUsize,

    /// Next slot to write (written by producer only)
    write: AtomicUsize,
}

impl SampleRing {
    /// Create a ring with `capacity` slots (`capacity - 1` usable)
    ///
    /// # Panics
    /// Panics if `capacity` is not a power of two >= 2. Engine configuration
    /// validates this before any ring is built.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity >= 2 && capacity.is_power_of_two(),
            "ring capacity must be a power of two >= 2, got {capacity}"
        );

        let slots: Vec<AtomicI16> = (0..capacity).map(|_| AtomicI16::new(0)).collect();

        Self {
            slots: slots.into_boxed_slice(),
            mask: capacity - 1,
            read: AtomicUsize::new(0),
            write: AtomicUsize::new(0),
        }
    }

    /// Total slots, including the reserved one
    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Push one sample (producer side)
    ///
    /// Returns false without touching the buffer when it is full.
    pub fn push(&self, sample: i16) -> bool {
        let write = self.write.load(Ordering::Relaxed);
        let next = (write + 1) & self.mask;
        if next == self.read.load(Ordering::Acquire) {
            return false;
        }
        self.slots[write].store(sample, Ordering::Relaxed);
        self.write.store(next, Ordering::Release);
        true
    }

    /// Push a whole interleaved frame, or nothing (producer side)
    ///
    /// Keeps multi-channel streams aligned: a frame is never split across
    /// a full buffer.
    pub fn push_frame(&self, frame: &[i16]) -> bool {
        if self.available_to_write() < frame.len() {
            return false;
        }
        for &sample in frame {
            // Cannot fail: space was checked and only this side adds samples
            self.push(sample);
        }
        true
    }

    /// Pop one sample (consumer side)
    ///
    /// Returns `None` when empty. No stale sample is ever returned.
    pub fn pop(&self) -> Option<i16> {
        let read = self.read.load(Ordering::Acquire);
        if read == self.write.load(Ordering::Acquire) {
            return None;
        }
        let sample = self.slots[read].load(Ordering::Relaxed);
        self.advance_read(read).then_some(sample)
    }

    /// Commit a pop of the slot at `read`; false if a clear moved the cursor
    fn advance_read(&self, read: usize) -> bool {
        self.read
            .compare_exchange(read, (read + 1) & self.mask, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Pop exactly `out.len()` samples, or nothing (consumer side)
    pub fn pop_frame(&self, out: &mut [i16]) -> bool {
        if self.available_to_read() < out.len() {
            return false;
        }
        for slot in out.iter_mut() {
            *slot = self.pop().unwrap_or(0);
        }
        true
    }

    /// Samples waiting to be consumed
    pub fn available_to_read(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        write.wrapping_sub(read) & self.mask
    }

    /// Free slots the producer may fill
    pub fn available_to_write(&self) -> usize {
        self.mask - self.available_to_read()
    }

    pub fn is_empty(&self) -> bool {
        self.available_to_read() == 0
    }

    /// Discard all unread samples (producer side)
    ///
    /// Safe while the consumer is mixing: the read cursor jumps to the write
    /// cursor and a pop that loaded the old cursor fails its commit.
    pub fn clear(&self) {
        let write = self.write.load(Ordering::Relaxed);
        self.read.store(write, Ordering::Release);
    }
}

impl std::fmt::Debug for SampleRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleRing")
            .field("capacity", &self.capacity())
            .field("available_to_read", &self.available_to_read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn assert_invariant(ring: &SampleRing) {
        assert_eq!(
            ring.available_to_read() + ring.available_to_write(),
            ring.capacity() - 1
        );
    }

    #[test]
    fn test_ring_buffer_basic() {
        let ring = SampleRing::new(8);
        assert!(ring.push(100));
        assert!(ring.push(-200));

        assert_eq!(ring.available_to_read(), 2);
        assert_eq!(ring.pop(), Some(100));
        assert_eq!(ring.pop(), Some(-200));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn test_one_slot_reserved() {
        let ring = SampleRing::new(8);
        for i in 0..7 {
            assert!(ring.push(i));
        }
        assert!(!ring.push(99), "8th push into capacity 8 must fail");
        assert_eq!(ring.available_to_read(), 7);
        assert_eq!(ring.available_to_write(), 0);
    }

    #[test]
    fn test_overflow_leaves_data_unchanged() {
        let ring = SampleRing::new(4);
        assert!(ring.push(1));
        assert!(ring.push(2));
        assert!(ring.push(3));

        assert!(!ring.push(4));
        assert!(!ring.push(5));

        assert_eq!(ring.pop(), Some(1));
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), Some(3));
        assert_eq!(ring.pop(), None);
    }

    #[test]
    fn test_invariant_over_mixed_sequence() {
        let ring = SampleRing::new(16);
        // Deterministic LCG so the sequence is reproducible
        let mut seed: u32 = 0x1234_5678;
        for step in 0..10_000 {
            seed = seed.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            if seed >> 31 == 0 {
                ring.push(step as i16);
            } else {
                ring.pop();
            }
            assert_invariant(&ring);
        }
    }

    #[test]
    fn test_wraparound_preserves_order() {
        let ring = SampleRing::new(4);
        let mut expected = 0i16;
        let mut next = 0i16;
        for _ in 0..50 {
            while ring.push(next) {
                next += 1;
            }
            while let Some(sample) = ring.pop() {
                assert_eq!(sample, expected);
                expected += 1;
            }
        }
        assert_eq!(expected, next);
    }

    #[test]
    fn test_push_frame_is_all_or_nothing() {
        let ring = SampleRing::new(4);
        assert!(ring.push_frame(&[1, 2]));
        assert!(!ring.push_frame(&[3, 4]), "only one slot left");
        assert_eq!(ring.available_to_read(), 2);

        let mut frame = [0i16; 2];
        assert!(ring.pop_frame(&mut frame));
        assert_eq!(frame, [1, 2]);
        assert!(!ring.pop_frame(&mut frame));
    }

    #[test]
    fn test_clear_discards_unread() {
        let ring = SampleRing::new(8);
        ring.push(1);
        ring.push(2);
        ring.clear();
        assert_eq!(ring.available_to_read(), 0);
        assert_eq!(ring.pop(), None);
        assert_invariant(&ring);
    }

    #[test]
    fn test_clear_beats_pop_in_flight() {
        let ring = SampleRing::new(8);
        for i in 1..=3 {
            ring.push(i);
        }
        // Consumer loaded the cursor for sample 1, then the slot was cleared
        let stale = ring.read.load(Ordering::Acquire);
        ring.clear();

        assert!(!ring.advance_read(stale));
        assert_eq!(ring.available_to_read(), 0);
        assert_invariant(&ring);

        assert!(ring.push(7));
        assert_eq!(ring.pop(), Some(7));
        assert_eq!(ring.pop(), None);
        assert_invariant(&ring);
    }

    #[test]
    fn test_clear_while_consuming_keeps_later_samples() {
        let ring = Arc::new(SampleRing::new(64));
        let done = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let consumer_ring = Arc::clone(&ring);
        let consumer_done = Arc::clone(&done);

        // Each round pushes a batch, clears it mid-consumption, then pushes
        // one negative marker that must arrive exactly once
        let consumer = std::thread::spawn(move || {
            let mut seen = Vec::new();
            while !consumer_done.load(Ordering::Acquire) || !consumer_ring.is_empty() {
                match consumer_ring.pop() {
                    Some(sample) => seen.push(sample),
                    None => std::thread::yield_now(),
                }
            }
            seen
        });

        for round in 0..2_000i32 {
            for i in 0..32 {
                ring.push((i + 1) as i16);
            }
            ring.clear();
            assert_invariant(&ring);
            ring.push(-((round % 30_000) as i16) - 1);
            while !ring.is_empty() {
                std::thread::yield_now();
            }
        }
        done.store(true, Ordering::Release);

        let seen = consumer.join().unwrap();
        let markers: Vec<i16> = seen.iter().copied().filter(|&s| s < 0).collect();
        assert_eq!(markers.len(), 2_000);
        assert!(ring.is_empty());
    }

    #[test]
    #[should_panic]
    fn test_rejects_non_power_of_two() {
        let _ = SampleRing::new(12);
    }

    #[test]
    fn test_spsc_across_threads() {
        let ring = Arc::new(SampleRing::new(64));
        let producer_ring = Arc::clone(&ring);

        let producer = std::thread::spawn(move || {
            let mut next = 0i32;
            while next < 20_000 {
                if producer_ring.push((next % 30_000) as i16) {
                    next += 1;
                } else {
                    std::thread::yield_now();
                }
            }
        });

        let mut expected = 0i32;
        while expected < 20_000 {
            match ring.pop() {
                Some(sample) => {
                    assert_eq!(sample as i32, expected % 30_000);
                    expected += 1;
                }
                None => std::thread::yield_now(),
            }
        }

        producer.join().unwrap();
        assert!(ring.is_empty());
    }
}
