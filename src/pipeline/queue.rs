//! Fixed-capacity queues between producers and the encode thread
//!
//! This module implements the bounded ring that carries frames and audio
//! packets across threads without ever blocking a producer or growing.
//!
//! # Design
//!
//! Each slot carries its own sequence counter (the classic bounded-MPMC
//! discipline): a slot is writable when its sequence equals the head
//! position and readable when it equals position + 1. Producers and the
//! consumer claim positions with compare-exchange, so `try_push` is safe
//! under arbitrary producer concurrency and `try_pop` stays safe even when
//! an audio producer evicts the oldest packet concurrently with the encode
//! thread.
//!
//! # Safety
//!
//! `UnsafeCell` gives interior mutability without locks. The invariants:
//!
//! 1. A slot's value is written only by the thread that claimed its
//!    position via CAS on `head`, and read only by the thread that claimed
//!    it via CAS on `tail`
//! 2. The sequence store with `Release` publishes the value; the matching
//!    `Acquire` load observes it before any access
//! 3. Occupancy can never exceed `N`: a push position is only claimable
//!    while its slot's sequence marks it empty

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use super::types::{AudioPacket, VideoFrame};

/// Video queue depth. Normative: at most five frames in flight.
pub const VIDEO_QUEUE_DEPTH: usize = 5;

/// Audio queue depth: ~160 ms of headroom at 10 ms packets.
pub const AUDIO_QUEUE_DEPTH: usize = 16;

/// Queue carrying captured video frames to the encode thread.
pub type FrameQueue = BoundedQueue<VideoFrame, VIDEO_QUEUE_DEPTH>;

/// Queue carrying PCM packets to the encode thread.
pub type AudioQueue = BoundedQueue<AudioPacket, AUDIO_QUEUE_DEPTH>;

struct Slot<T> {
    seq: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Fixed-capacity multi-producer ring buffer.
///
/// Capacity is a compile-time constant; the queue never allocates after
/// construction and producers never block. A full queue rejects the push so
/// the producer can apply its drop policy: video drops the newest frame,
/// audio evicts the oldest packet via [`BoundedQueue::push_evicting`].
pub struct BoundedQueue<T, const N: usize> {
    slots: [Slot<T>; N],
    /// Next position to push.
    head: AtomicUsize,
    /// Next position to pop.
    tail: AtomicUsize,
}

// Safety: values move through slots with release/acquire hand-off; a slot is
// only ever accessed by the thread that claimed it.
unsafe impl<T: Send, const N: usize> Send for BoundedQueue<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for BoundedQueue<T, N> {}

impl<T, const N: usize> BoundedQueue<T, N> {
    // Compile-time guard against accidental unbounded or degenerate config.
    const CAPACITY_OK: () = assert!(N >= 1 && N <= 256);

    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let _ = Self::CAPACITY_OK;
        Self {
            slots: std::array::from_fn(|i| Slot {
                seq: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            }),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        }
    }

    /// Non-blocking push. On a full queue the item is handed back so the
    /// producer can apply its drop policy.
    pub fn try_push(&self, item: T) -> Result<(), T> {
        let mut pos = self.head.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos % N];
            let seq = slot.seq.load(Ordering::Acquire);
            let dif = seq as isize - pos as isize;
            if dif == 0 {
                match self.head.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // Safety: this thread claimed `pos`; no other thread
                        // touches the slot until the sequence store below.
                        unsafe { (*slot.value.get()).write(item) };
                        slot.seq.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if dif < 0 {
                return Err(item); // full
            } else {
                pos = self.head.load(Ordering::Relaxed);
            }
        }
    }

    /// Non-blocking pop; `None` on an empty queue, with no side effects.
    pub fn try_pop(&self) -> Option<T> {
        let mut pos = self.tail.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos % N];
            let seq = slot.seq.load(Ordering::Acquire);
            let dif = seq as isize - pos.wrapping_add(1) as isize;
            if dif == 0 {
                match self.tail.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // Safety: this thread claimed `pos`; the value was
                        // published by the release store in `try_push`.
                        let item = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.seq.store(pos.wrapping_add(N), Ordering::Release);
                        return Some(item);
                    }
                    Err(current) => pos = current,
                }
            } else if dif < 0 {
                return None; // empty
            } else {
                pos = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    /// Push that evicts the oldest item when the queue is full (the audio
    /// drop policy). Returns the evicted item, if any.
    pub fn push_evicting(&self, item: T) -> Option<T> {
        let mut item = item;
        let mut evicted = None;
        loop {
            match self.try_push(item) {
                Ok(()) => return evicted,
                Err(back) => {
                    item = back;
                    if let Some(old) = self.try_pop() {
                        evicted = Some(old);
                    }
                }
            }
        }
    }

    /// Bounded-wait pop: polls cooperatively (~100 µs) until an item
    /// arrives or the timeout elapses.
    pub fn wait_pop(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_micros(100));
        }
    }

    /// Approximate occupancy; never exceeds [`BoundedQueue::capacity`].
    pub fn size(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail).min(N)
    }

    pub fn empty(&self) -> bool {
        self.size() == 0
    }

    pub fn full(&self) -> bool {
        self.size() == N
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<T, const N: usize> Default for BoundedQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for BoundedQueue<T, N> {
    fn drop(&mut self) {
        while self.try_pop().is_some() {}
    }
}
