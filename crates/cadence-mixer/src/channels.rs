//! The full set of mixer channels plus callback diagnostics.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use cadence_core::{ChannelTarget, Error, Result};

use crate::atomic::AtomicF64;
use crate::queue::{ChannelQueue, ScheduledSound};

/// Queue capacity of every streaming channel.
pub const STREAMING_QUEUE_CAPACITY: usize = 2;

/// One-shot channels followed by the same number of streaming channels.
///
/// Shared between producers and the mixing callback behind an `Arc`; every
/// field is either a lock-free queue or a best-effort atomic scalar.
#[derive(Debug)]
pub struct ChannelSet {
    channels: Box<[ChannelQueue]>,
    one_shot: usize,
    sample_rate: u32,
    frame_duration: f64,
    last_buffer_frames: AtomicUsize,
    last_latency: AtomicF64,
    /// Most recent late start, in frames (negative), or 0.
    timing_error: AtomicI64,
    /// Held by whichever thread is currently consuming.
    pub(crate) consuming: AtomicBool,
}

impl ChannelSet {
    /// Create `one_shot` one-shot channels with `queue_capacity` slots each,
    /// plus `one_shot` streaming channels.
    pub fn new(sample_rate: u32, one_shot: usize, queue_capacity: usize) -> Self {
        let channels = (0..one_shot)
            .map(|_| ChannelQueue::new(queue_capacity))
            .chain((0..one_shot).map(|_| ChannelQueue::new(STREAMING_QUEUE_CAPACITY)))
            .collect();
        Self {
            channels,
            one_shot,
            sample_rate,
            frame_duration: 1.0 / f64::from(sample_rate),
            last_buffer_frames: AtomicUsize::new(0),
            last_latency: AtomicF64::new(0.0),
            timing_error: AtomicI64::new(0),
            consuming: AtomicBool::new(false),
        }
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Seconds per frame.
    pub const fn frame_duration(&self) -> f64 {
        self.frame_duration
    }

    pub const fn one_shot_count(&self) -> usize {
        self.one_shot
    }

    pub fn streaming_count(&self) -> usize {
        self.channels.len() - self.one_shot
    }

    /// Total number of channels, both halves.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChannelQueue> {
        self.channels.iter()
    }

    /// Any channel by absolute index.
    pub fn channel(&self, index: usize) -> Result<&ChannelQueue> {
        self.channels.get(index).ok_or(Error::InvalidChannel {
            index,
            count: self.channels.len(),
        })
    }

    pub fn one_shot(&self, index: usize) -> Result<&ChannelQueue> {
        if index >= self.one_shot {
            return Err(Error::InvalidChannel {
                index,
                count: self.one_shot,
            });
        }
        self.channel(index)
    }

    /// Absolute index of streaming channel `stream`.
    pub fn streaming_index(&self, stream: usize) -> Result<usize> {
        if stream >= self.streaming_count() {
            return Err(Error::InvalidChannel {
                index: stream,
                count: self.streaming_count(),
            });
        }
        Ok(self.one_shot + stream)
    }

    pub fn streaming(&self, stream: usize) -> Result<&ChannelQueue> {
        self.channel(self.streaming_index(stream)?)
    }

    /// Pick the unpaused one-shot channel with room that frees up soonest.
    ///
    /// `free_at` may be mid-update by the callback; the choice is a
    /// least-loaded heuristic, not a guarantee the enqueue will succeed.
    pub fn select_channel(&self) -> Result<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (index, queue) in self.channels[..self.one_shot].iter().enumerate() {
            if queue.is_paused() || !queue.has_room() {
                continue;
            }
            let free_at = queue.free_at();
            if best.map_or(true, |(_, min)| free_at < min) {
                best = Some((index, free_at));
            }
        }
        best.map(|(index, _)| index).ok_or(Error::NoChannelAvailable)
    }

    /// Enqueue onto channel `index`, returning the slot used.
    pub fn enqueue(&self, index: usize, scheduled: ScheduledSound) -> Result<usize> {
        self.channel(index)?.enqueue(scheduled)
    }

    /// Set or clear the pause flag on the targeted channels.
    pub fn set_paused(&self, target: ChannelTarget, paused: bool) -> Result<()> {
        match target {
            ChannelTarget::All => {
                for queue in self.channels.iter() {
                    queue.set_paused(paused);
                }
            }
            ChannelTarget::OneShot(index) => self.one_shot(index)?.set_paused(paused),
            ChannelTarget::Streaming(stream) => self.streaming(stream)?.set_paused(paused),
        }
        Ok(())
    }

    /// Record the size and latency of the buffer the callback is filling.
    pub fn record_callback(&self, frames: usize, latency: f64) {
        self.last_buffer_frames.store(frames, Ordering::Relaxed);
        self.last_latency.store(latency, Ordering::Relaxed);
    }

    pub fn last_buffer_frames(&self) -> usize {
        self.last_buffer_frames.load(Ordering::Relaxed)
    }

    pub fn last_latency(&self) -> f64 {
        self.last_latency.load(Ordering::Relaxed)
    }

    /// Seconds between handing audio to the mixer and it reaching the device.
    pub fn current_latency(&self) -> f64 {
        self.last_buffer_frames() as f64 / f64::from(self.sample_rate) + self.last_latency()
    }

    pub(crate) fn record_timing_error(&self, frames: i64) {
        self.timing_error.store(frames, Ordering::Relaxed);
    }

    /// The most recent late start in frames (negative), without clearing it.
    pub fn timing_error(&self) -> i64 {
        self.timing_error.load(Ordering::Relaxed)
    }

    /// Read and clear the most recent late start.
    pub fn take_timing_error(&self) -> i64 {
        self.timing_error.swap(0, Ordering::Relaxed)
    }
}
