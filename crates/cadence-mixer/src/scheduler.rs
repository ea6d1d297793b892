//! Producer-side API: scheduling sounds from any thread.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::sync::Arc;

use cadence_core::{ChannelTarget, Error, Result, Sound, StartTime};
use crossbeam_channel::Receiver;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::channels::ChannelSet;
use crate::clock::StreamClock;
use crate::queue::ScheduledSound;

/// Last errors seen by the engine, kept for text reporting.
#[derive(Debug, Default)]
pub(crate) struct ErrorLog {
    backend: Mutex<Option<String>>,
    domain: Mutex<Option<String>>,
    /// Asynchronous errors raised by the output stream.
    stream_errors: Option<Receiver<String>>,
}

impl ErrorLog {
    pub(crate) fn with_stream_errors(stream_errors: Receiver<String>) -> Self {
        Self {
            stream_errors: Some(stream_errors),
            ..Self::default()
        }
    }

    pub(crate) fn record(&self, error: &Error) {
        let slot = if error.is_backend() {
            &self.backend
        } else {
            &self.domain
        };
        *slot.lock() = Some(error.to_string());
    }

    fn message(&self) -> String {
        if let Some(stream_errors) = &self.stream_errors {
            if let Some(latest) = stream_errors.try_iter().last() {
                *self.backend.lock() = Some(Error::Backend(latest).to_string());
            }
        }
        if let Some(message) = self.backend.lock().clone() {
            return message;
        }
        self.domain.lock().clone().unwrap_or_default()
    }

    fn clear(&self) {
        *self.backend.lock() = None;
        *self.domain.lock() = None;
    }
}

/// Cloneable, thread-safe handle for scheduling sounds on an engine.
///
/// All times passed in are in the caller's clock; they are translated into
/// the stream clock with a one-shot offset sampled at each call.
#[derive(Clone)]
pub struct Scheduler {
    channels: Arc<ChannelSet>,
    clock: Arc<dyn StreamClock>,
    errors: Arc<ErrorLog>,
}

impl Scheduler {
    pub(crate) fn new(
        channels: Arc<ChannelSet>,
        clock: Arc<dyn StreamClock>,
        errors: Arc<ErrorLog>,
    ) -> Self {
        Self {
            channels,
            clock,
            errors,
        }
    }

    pub fn channels(&self) -> &Arc<ChannelSet> {
        &self.channels
    }

    /// Current stream time in seconds.
    pub fn stream_time(&self) -> f64 {
        self.clock.now()
    }

    pub fn sample_rate(&self) -> u32 {
        self.channels.sample_rate()
    }

    /// Schedule `sound` to start at `play_at` (caller clock, where the caller's
    /// current time is `now`).
    ///
    /// With `channel: None` the least-loaded unpaused one-shot channel with
    /// room is picked. Returns the channel used.
    pub fn play(&self, now: f64, play_at: f64, channel: Option<usize>, sound: Sound) -> Result<usize> {
        let start = StartTime::from_stream_time(self.clock.now() + (play_at - now));

        let channel = match channel {
            Some(index) => {
                self.channels.one_shot(index).map_err(|e| self.fail(e))?;
                index
            }
            None => {
                let index = self.channels.select_channel().map_err(|e| self.fail(e))?;
                debug!("Selected channel {index} for sound starting at {start:?}");
                index
            }
        };

        self.channels
            .enqueue(channel, ScheduledSound::new(sound, start))
            .map_err(|e| self.fail(e))?;
        Ok(channel)
    }

    /// Queue the next chunk of a stream on streaming channel `stream`.
    ///
    /// A paused streaming channel has its current sound cut short and is
    /// resumed. Returns the caller-clock instant at which the new chunk is
    /// predicted to finish, or [`Error::QueueFull`] if the caller should retry
    /// later.
    pub fn play_next(&self, now: f64, stream: usize, sound: Sound) -> Result<f64> {
        let index = self
            .channels
            .streaming_index(stream)
            .map_err(|e| self.fail(e))?;
        let queue = self.channels.channel(index)?;
        let stream_now = self.clock.now();

        if queue.is_paused() {
            queue.force_complete_head();
            queue.set_paused(false);
            debug!("Streaming channel {stream} interrupted and resumed");
        }

        let done_at = queue.free_at() + sound.frames() as f64 * self.channels.frame_duration();
        match queue.enqueue(ScheduledSound::asap(sound)) {
            Ok(_) => Ok(done_at - stream_now + now),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Pause or resume the targeted channels. Queued sounds are kept.
    pub fn pause(&self, target: ChannelTarget, paused: bool) -> Result<()> {
        self.channels
            .set_paused(target, paused)
            .map_err(|e| self.fail(e))
    }

    /// Output latency in seconds, as observed by the last callback.
    pub fn current_latency(&self) -> f64 {
        self.channels.current_latency()
    }

    /// Describe and clear the most recent late start, if any.
    pub fn take_timing_warning(&self) -> Option<String> {
        let frames = self.channels.take_timing_error();
        if frames >= 0 {
            return None;
        }
        let late_ms = -frames as f64 * self.channels.frame_duration() * 1000.0;
        Some(format!(
            "A previously played sound occurred {late_ms:.2}ms after it should have."
        ))
    }

    /// The last backend error, else the last scheduling error, as text.
    ///
    /// Empty when nothing has gone wrong.
    pub fn last_error_message(&self) -> String {
        self.errors.message()
    }

    pub fn clear_errors(&self) {
        self.errors.clear();
    }

    /// Log `error` and keep it for [`Self::last_error_message`].
    ///
    /// A full queue is backpressure, not a failure, and is not kept.
    fn fail(&self, error: Error) -> Error {
        match &error {
            Error::QueueFull => {
                debug!("Channel queue full");
                return error;
            }
            Error::NoChannelAvailable => warn!("No channel available for sound"),
            other => warn!("Scheduling failed: {other}"),
        }
        self.errors.record(&error);
        error
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("channels", &self.channels)
            .field("stream_time", &self.stream_time())
            .finish_non_exhaustive()
    }
}
