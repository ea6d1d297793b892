//! The real-time mixing pass.
//!
//! Runs once per output buffer on the backend's callback thread. It never
//! blocks, locks, or allocates; the only deallocation is dropping a sound
//! that has just finished playing.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::sync::atomic::{AtomicBool, Ordering};

use cadence_core::StartTime;

use crate::channels::ChannelSet;
use crate::queue::ChannelQueue;

/// Exclusive right to consume from every queue of a [`ChannelSet`].
struct ConsumerGuard<'a>(&'a AtomicBool);

impl<'a> ConsumerGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ConsumerGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ChannelSet {
    /// Full callback body: record diagnostics, then render `out`.
    ///
    /// `out` is interleaved stereo; `buffer_start` is the stream time at which
    /// its first frame reaches the device and `current_time` the stream time
    /// of the callback itself.
    pub fn mix(&self, out: &mut [i16], buffer_start: f64, current_time: f64) {
        self.record_callback(out.len() / 2, buffer_start - current_time);
        self.render(out, buffer_start);
    }

    /// Zero `out` and additively mix every due sound of every unpaused channel.
    ///
    /// If another thread is already consuming, `out` is left silent.
    pub fn render(&self, out: &mut [i16], buffer_start: f64) {
        out.fill(0);
        let Some(_guard) = ConsumerGuard::try_acquire(&self.consuming) else {
            return;
        };
        for queue in self.iter() {
            if queue.is_paused() {
                continue;
            }
            self.mix_channel(queue, out, buffer_start);
        }
    }

    /// Drop every sound still queued on every channel.
    ///
    /// Returns the number of sounds discarded, or `None` if a mixing pass is
    /// in progress.
    pub fn drain(&self) -> Option<usize> {
        let _guard = ConsumerGuard::try_acquire(&self.consuming)?;
        // SAFETY: the guard makes this thread the only consumer.
        #[allow(unsafe_code)]
        let dropped: usize = self.iter().map(|queue| unsafe { queue.drain() }).sum();
        Some(dropped)
    }

    fn mix_channel(&self, queue: &ChannelQueue, out: &mut [i16], buffer_start: f64) {
        let len = out.len() / 2;
        let rate = f64::from(self.sample_rate());
        let dt = self.frame_duration();
        let buffer_end = buffer_start + len as f64 * dt;

        // SAFETY (all `head`/`release_head` calls below): the caller holds the
        // consumer guard, and no head reference outlives the release.
        #[allow(unsafe_code)]
        let idle = unsafe { queue.head() }.is_none();
        if idle {
            queue.set_free_at(buffer_end);
            return;
        }

        let mut cursor = 0usize;
        while cursor < len {
            #[allow(unsafe_code)]
            let Some((scheduled, consumed)) = (unsafe { queue.head() }) else {
                break;
            };
            let frames = scheduled.frames();

            let padding = if consumed == 0 {
                match scheduled.start() {
                    StartTime::At(start) => {
                        if start >= buffer_end {
                            break;
                        }
                        let wanted = ((start - buffer_start) * rate).floor() as i64;
                        queue.set_free_at(start + frames as f64 * dt);
                        if wanted < cursor as i64 {
                            self.record_timing_error(wanted - cursor as i64);
                            queue.set_free_at(buffer_start + (cursor + frames) as f64 * dt);
                            cursor
                        } else {
                            (wanted as usize).min(len)
                        }
                    }
                    StartTime::Asap => {
                        queue.set_free_at(buffer_start + (cursor + frames) as f64 * dt);
                        cursor
                    }
                }
            } else {
                cursor
            };

            let remaining = frames.saturating_sub(consumed);
            let count = remaining.min(len - padding);
            if count > 0 {
                let sound = scheduled.sound();
                let left = &sound.left()[consumed..consumed + count];
                let right = &sound.right()[consumed..consumed + count];
                let dest = &mut out[padding * 2..(padding + count) * 2];
                for ((frame, &l), &r) in dest.chunks_exact_mut(2).zip(left).zip(right) {
                    frame[0] = frame[0].saturating_add(l);
                    frame[1] = frame[1].saturating_add(r);
                }
            }

            let consumed = queue.advance_head(consumed, consumed + count);
            cursor = padding + count;
            if consumed >= frames {
                #[allow(unsafe_code)]
                unsafe {
                    queue.release_head();
                }
            } else {
                cursor = len;
            }
        }
    }
}
