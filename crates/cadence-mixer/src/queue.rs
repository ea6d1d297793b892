//! Lock-free per-channel queue of scheduled sounds.
//!
//! Each channel owns a fixed ring of slots. Producers (any caller thread)
//! fill the slot at the producer index; the mixing callback is the only
//! consumer and clears the slot at the consumer index once its sound has
//! been fully played. A slot found non-empty by a producer means the queue
//! is full: there is no index arithmetic for fullness.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use cadence_core::{Error, Result, Sound, StartTime};

use crate::atomic::AtomicF64;

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const FULL: u8 = 2;

/// A sound bound to a start time, waiting in (or playing from) a queue slot.
#[derive(Debug, Clone)]
pub struct ScheduledSound {
    sound: Sound,
    start: StartTime,
}

impl ScheduledSound {
    pub const fn new(sound: Sound, start: StartTime) -> Self {
        Self { sound, start }
    }

    /// Schedule to start as soon as the mixer reaches it.
    pub const fn asap(sound: Sound) -> Self {
        Self::new(sound, StartTime::Asap)
    }

    pub const fn sound(&self) -> &Sound {
        &self.sound
    }

    pub const fn start(&self) -> StartTime {
        self.start
    }

    pub const fn frames(&self) -> usize {
        self.sound.frames()
    }
}

/// One ring slot.
///
/// `consumed` and `frames` live beside the sound rather than inside it so a
/// producer can force-complete the head sound without touching the cell the
/// consumer may be reading.
struct Slot {
    state: AtomicU8,
    consumed: AtomicUsize,
    frames: AtomicUsize,
    sound: UnsafeCell<Option<ScheduledSound>>,
}

impl Slot {
    const fn new() -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            consumed: AtomicUsize::new(0),
            frames: AtomicUsize::new(0),
            sound: UnsafeCell::new(None),
        }
    }
}

/// Fixed-capacity ring of scheduled sounds for one mixer channel.
pub struct ChannelQueue {
    slots: Box<[Slot]>,
    consumer_index: AtomicUsize,
    producer_index: AtomicUsize,
    paused: AtomicBool,
    /// Advisory estimate (stream time) of when this channel next runs dry.
    free_at: AtomicF64,
}

impl ChannelQueue {
    /// Create a queue with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity.max(1)).map(|_| Slot::new()).collect();
        Self {
            slots,
            consumer_index: AtomicUsize::new(0),
            producer_index: AtomicUsize::new(0),
            paused: AtomicBool::new(false),
            free_at: AtomicF64::new(0.0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn producer_index(&self) -> usize {
        self.producer_index.load(Ordering::Acquire)
    }

    pub fn consumer_index(&self) -> usize {
        self.consumer_index.load(Ordering::Acquire)
    }

    /// Number of slots currently holding a sound.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.state.load(Ordering::Acquire) == FULL)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the slot at the producer index is free.
    pub fn has_room(&self) -> bool {
        let index = self.producer_index();
        self.slots[index].state.load(Ordering::Acquire) == EMPTY
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    pub fn free_at(&self) -> f64 {
        self.free_at.load(Ordering::Relaxed)
    }

    pub fn set_free_at(&self, time: f64) {
        self.free_at.store(time, Ordering::Relaxed);
    }

    /// Frames already mixed from the sound at the head of the queue.
    pub fn head_consumed_frames(&self) -> Option<usize> {
        let slot = &self.slots[self.consumer_index()];
        (slot.state.load(Ordering::Acquire) == FULL).then(|| slot.consumed.load(Ordering::Acquire))
    }

    /// Place a sound in the slot at the producer index.
    ///
    /// Returns the slot index used, or [`Error::QueueFull`] if that slot is
    /// still occupied. Never overwrites.
    pub fn enqueue(&self, scheduled: ScheduledSound) -> Result<usize> {
        let capacity = self.capacity();
        loop {
            let index = self.producer_index.load(Ordering::Acquire);
            let slot = &self.slots[index];
            if slot
                .state
                .compare_exchange(EMPTY, WRITING, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return Err(Error::QueueFull);
            }
            if self
                .producer_index
                .compare_exchange(index, (index + 1) % capacity, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                // Another producer moved the index under us; give the slot back.
                slot.state.store(EMPTY, Ordering::Release);
                continue;
            }

            slot.frames.store(scheduled.frames(), Ordering::Relaxed);
            slot.consumed.store(0, Ordering::Relaxed);
            // SAFETY: the slot is in the WRITING state, which only this producer
            // could have entered; the consumer ignores it until it is FULL.
            #[allow(unsafe_code)]
            unsafe {
                *slot.sound.get() = Some(scheduled);
            }
            slot.state.store(FULL, Ordering::Release);
            return Ok(index);
        }
    }

    /// Mark the head sound as fully played so the consumer frees it next pass.
    ///
    /// Returns false if the queue head is empty, or if the head slot was
    /// recycled for another sound meanwhile. The recycling check keys on
    /// the consumed counter, so a streaming channel should be fed by one
    /// producer: a refill of a head whose sound never started is not caught.
    pub fn force_complete_head(&self) -> bool {
        let index = self.consumer_index();
        let slot = &self.slots[index];
        if slot.state.load(Ordering::Acquire) != FULL {
            return false;
        }
        self.complete_from(index, slot.consumed.load(Ordering::Acquire))
    }

    /// Move slot `index`'s consumed counter from `observed` up to its frame
    /// count. Gives up once the counter is seen below `observed`.
    fn complete_from(&self, index: usize, mut observed: usize) -> bool {
        let slot = &self.slots[index];
        let frames = slot.frames.load(Ordering::Acquire);
        loop {
            match slot.consumed.compare_exchange_weak(
                observed,
                frames.max(observed),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) if actual >= observed => observed = actual,
                Err(_) => return false,
            }
        }
    }

    /// The sound at the head of the queue and the frames consumed from it.
    ///
    /// # Safety
    /// Only the single consumer may call this, and the reference must be
    /// dropped before [`Self::release_head`] is called.
    #[allow(unsafe_code)]
    pub(crate) unsafe fn head(&self) -> Option<(&ScheduledSound, usize)> {
        let slot = &self.slots[self.consumer_index.load(Ordering::Relaxed)];
        if slot.state.load(Ordering::Acquire) != FULL {
            return None;
        }
        // SAFETY: FULL slots are never written by producers, and the caller
        // guarantees it is the only consumer.
        let sound = unsafe { (*slot.sound.get()).as_ref() }?;
        Some((sound, slot.consumed.load(Ordering::Acquire)))
    }

    /// Advance the head sound's consumed counter from `from` to `to`.
    ///
    /// The counter is clamped to the sound's frame count. If a producer
    /// force-completed the sound meanwhile, the forced value wins. Returns the
    /// resulting counter.
    pub(crate) fn advance_head(&self, from: usize, to: usize) -> usize {
        let slot = &self.slots[self.consumer_index.load(Ordering::Relaxed)];
        let to = to.min(slot.frames.load(Ordering::Relaxed));
        match slot
            .consumed
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => to,
            Err(actual) => actual.max(to),
        }
    }

    /// Drop the head sound, clear its slot, and move the consumer index on.
    ///
    /// # Safety
    /// Only the single consumer may call this, with no outstanding reference
    /// obtained from [`Self::head`].
    #[allow(unsafe_code)]
    pub(crate) unsafe fn release_head(&self) {
        let index = self.consumer_index.load(Ordering::Relaxed);
        let slot = &self.slots[index];
        if slot.state.load(Ordering::Acquire) != FULL {
            return;
        }
        // SAFETY: see above; producers cannot touch a FULL slot.
        unsafe {
            (*slot.sound.get()).take();
        }
        slot.consumed.store(0, Ordering::Relaxed);
        slot.state.store(EMPTY, Ordering::Release);
        self.consumer_index
            .store((index + 1) % self.capacity(), Ordering::Release);
    }

    /// Discard every queued sound, head first.
    ///
    /// # Safety
    /// Same contract as [`Self::release_head`].
    #[allow(unsafe_code)]
    pub(crate) unsafe fn drain(&self) -> usize {
        let mut dropped = 0;
        while self.head_consumed_frames().is_some() {
            // SAFETY: forwarded from the caller.
            unsafe { self.release_head() };
            dropped += 1;
        }
        dropped
    }
}

// SAFETY: every access to a slot's `UnsafeCell` is gated by its atomic state:
// producers only write a slot they moved EMPTY -> WRITING, and the single
// consumer only reads or clears FULL slots.
#[allow(unsafe_code)]
unsafe impl Sync for ChannelQueue {}

impl std::fmt::Debug for ChannelQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelQueue")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .field("consumer_index", &self.consumer_index())
            .field("producer_index", &self.producer_index())
            .field("paused", &self.is_paused())
            .field("free_at", &self.free_at())
            .finish()
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn sound(frames: usize) -> ScheduledSound {
        ScheduledSound::asap(Sound::silence(frames))
    }

    #[test]
    fn test_enqueue_until_full() {
        let queue = ChannelQueue::new(3);
        assert_eq!(queue.enqueue(sound(1)).unwrap(), 0);
        assert_eq!(queue.enqueue(sound(2)).unwrap(), 1);
        assert_eq!(queue.enqueue(sound(3)).unwrap(), 2);
        assert!(!queue.has_room());
        assert!(matches!(queue.enqueue(sound(4)), Err(Error::QueueFull)));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.producer_index(), 0);
    }

    #[test]
    fn test_release_frees_slot_in_fifo_order() {
        let queue = ChannelQueue::new(2);
        queue.enqueue(sound(10)).unwrap();
        queue.enqueue(sound(20)).unwrap();

        unsafe {
            assert_eq!(queue.head().unwrap().0.frames(), 10);
            queue.release_head();
            assert_eq!(queue.head().unwrap().0.frames(), 20);
        }
        assert_eq!(queue.consumer_index(), 1);
        assert!(queue.has_room());
        assert_eq!(queue.enqueue(sound(30)).unwrap(), 0);
    }

    #[test]
    fn test_advance_head_clamps() {
        let queue = ChannelQueue::new(2);
        queue.enqueue(sound(50)).unwrap();
        assert_eq!(queue.advance_head(0, 32), 32);
        assert_eq!(queue.advance_head(32, 64), 50);
        assert_eq!(queue.head_consumed_frames(), Some(50));
    }

    #[test]
    fn test_force_complete_wins_over_consumer() {
        let queue = ChannelQueue::new(2);
        queue.enqueue(sound(50)).unwrap();
        queue.advance_head(0, 10);
        assert!(queue.force_complete_head());
        // A stale consumer update must not roll the counter back.
        assert_eq!(queue.advance_head(10, 20), 50);
        assert_eq!(queue.head_consumed_frames(), Some(50));
    }

    #[test]
    fn test_force_complete_skips_recycled_slot() {
        let queue = ChannelQueue::new(1);
        queue.enqueue(sound(10)).unwrap();
        queue.advance_head(0, 4);
        let observed = queue.head_consumed_frames().unwrap();

        // The consumer finishes the sound and another producer refills the slot.
        unsafe { queue.release_head() };
        queue.enqueue(sound(8)).unwrap();

        assert!(!queue.complete_from(0, observed));
        assert_eq!(queue.head_consumed_frames(), Some(0));
        assert!(queue.force_complete_head());
        assert_eq!(queue.head_consumed_frames(), Some(8));
    }

    #[test]
    fn test_force_complete_empty_queue() {
        let queue = ChannelQueue::new(2);
        assert!(!queue.force_complete_head());
    }

    #[test]
    fn test_drain() {
        let queue = ChannelQueue::new(4);
        for frames in 1..=3 {
            queue.enqueue(sound(frames)).unwrap();
        }
        assert_eq!(unsafe { queue.drain() }, 3);
        assert!(queue.is_empty());
        assert_eq!(queue.consumer_index(), queue.producer_index());
    }

    #[test]
    fn test_pause_flag_is_idempotent() {
        let queue = ChannelQueue::new(2);
        queue.enqueue(sound(5)).unwrap();
        queue.set_paused(true);
        queue.set_paused(true);
        assert!(queue.is_paused());
        queue.set_paused(false);
        queue.set_paused(false);
        assert!(!queue.is_paused());
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.head_consumed_frames(), Some(0));
    }

    #[test]
    fn test_zero_capacity_is_promoted() {
        assert_eq!(ChannelQueue::new(0).capacity(), 1);
    }

    #[test]
    fn test_concurrent_access() {
        use std::thread;

        const TOTAL: usize = 2000;
        let queue = Arc::new(ChannelQueue::new(8));
        let producer_queue = queue.clone();

        // The frame count doubles as a sequence number.
        let producer = thread::spawn(move || {
            for seq in 1..=TOTAL {
                while producer_queue.enqueue(sound(seq)).is_err() {
                    thread::yield_now();
                }
            }
        });

        let mut expected = 1;
        while expected <= TOTAL {
            let head = unsafe { queue.head().map(|(s, _)| s.frames()) };
            match head {
                Some(frames) => {
                    assert_eq!(frames, expected);
                    unsafe { queue.release_head() };
                    expected += 1;
                }
                None => thread::yield_now(),
            }
        }

        producer.join().unwrap();
        assert!(queue.is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Enqueue,
        Consume,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![Just(Op::Enqueue), Just(Op::Consume)]
    }

    proptest! {
        #[test]
        fn indices_stay_in_range_and_track_occupancy(
            capacity in 1usize..6,
            ops in proptest::collection::vec(op(), 0..64),
        ) {
            let queue = ChannelQueue::new(capacity);
            let mut model = 0usize;
            for op in ops {
                match op {
                    Op::Enqueue => {
                        let ok = queue.enqueue(sound(1)).is_ok();
                        prop_assert_eq!(ok, model < capacity);
                        if ok { model += 1; }
                    }
                    Op::Consume => {
                        unsafe { queue.release_head() };
                        model = model.saturating_sub(1);
                    }
                }
                let p = queue.producer_index();
                let c = queue.consumer_index();
                prop_assert!(p < capacity && c < capacity);
                prop_assert_eq!(queue.len(), model);
                if model < capacity {
                    prop_assert_eq!((p + capacity - c) % capacity, model);
                } else {
                    prop_assert_eq!(p, c);
                }
            }
        }
    }
}
