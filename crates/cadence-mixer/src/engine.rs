//! The engine handle: channel set, stream clock, and output stream.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::sync::Arc;

use cadence_core::{ChannelTarget, Error, Result, Sound};
use crossbeam_channel::bounded;
use tracing::{debug, info, warn};

use crate::channels::ChannelSet;
use crate::clock::{MonotonicClock, StreamClock};
use crate::config::EngineConfig;
use crate::output::AudioOutput;
use crate::scheduler::{ErrorLog, Scheduler};

/// Stream errors buffered between error reports.
const STREAM_ERROR_BACKLOG: usize = 16;

/// A sound scheduling and mixing session.
///
/// Producer operations are also available from any thread through
/// [`Engine::scheduler`]; the engine itself owns the output stream, which
/// some platforms pin to the creating thread.
pub struct Engine {
    scheduler: Scheduler,
    errors: Arc<ErrorLog>,
    output: Option<AudioOutput>,
    config: EngineConfig,
}

impl Engine {
    /// Open the configured output device and start mixing.
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let clock = MonotonicClock::new();
        let channels = Arc::new(ChannelSet::new(
            config.sample_rate,
            config.channels,
            config.queue_capacity,
        ));
        let (error_tx, error_rx) = bounded(STREAM_ERROR_BACKLOG);
        let errors = Arc::new(ErrorLog::with_stream_errors(error_rx));

        let output = AudioOutput::open(&config, channels.clone(), clock, error_tx)?;
        info!(
            "Engine started: {} Hz, {} one-shot + {} streaming channels on {}",
            config.sample_rate,
            channels.one_shot_count(),
            channels.streaming_count(),
            output.device_name()
        );

        Ok(Self {
            scheduler: Scheduler::new(channels, Arc::new(clock), errors.clone()),
            errors,
            output: Some(output),
            config,
        })
    }

    /// Build an engine with no output device.
    ///
    /// The host drives the mixer itself through [`Engine::mix`], with buffer
    /// times taken from `clock`.
    pub fn offline(config: EngineConfig, clock: Arc<dyn StreamClock>) -> Result<Self> {
        config.validate()?;

        let channels = Arc::new(ChannelSet::new(
            config.sample_rate,
            config.channels,
            config.queue_capacity,
        ));
        let errors = Arc::new(ErrorLog::default());
        debug!("Offline engine created: {config:?}");

        Ok(Self {
            scheduler: Scheduler::new(channels, clock, errors.clone()),
            errors,
            output: None,
            config,
        })
    }

    /// A cloneable producer handle usable from any thread.
    pub fn scheduler(&self) -> Scheduler {
        self.scheduler.clone()
    }

    pub fn channels(&self) -> &Arc<ChannelSet> {
        self.scheduler.channels()
    }

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.output.is_some()
    }

    pub fn device_name(&self) -> Option<&str> {
        self.output.as_ref().map(AudioOutput::device_name)
    }

    /// Current stream time in seconds.
    pub fn stream_time(&self) -> f64 {
        self.scheduler.stream_time()
    }

    /// See [`Scheduler::play`].
    pub fn play(&self, now: f64, play_at: f64, channel: Option<usize>, sound: Sound) -> Result<usize> {
        self.scheduler.play(now, play_at, channel, sound)
    }

    /// See [`Scheduler::play_next`].
    pub fn play_next(&self, now: f64, stream: usize, sound: Sound) -> Result<f64> {
        self.scheduler.play_next(now, stream, sound)
    }

    pub fn pause(&self, target: ChannelTarget) -> Result<()> {
        self.scheduler.pause(target, true)
    }

    pub fn resume(&self, target: ChannelTarget) -> Result<()> {
        self.scheduler.pause(target, false)
    }

    pub fn current_latency(&self) -> f64 {
        self.scheduler.current_latency()
    }

    pub fn take_timing_warning(&self) -> Option<String> {
        self.scheduler.take_timing_warning()
    }

    pub fn last_error_message(&self) -> String {
        self.scheduler.last_error_message()
    }

    /// Run one mixing pass into `out` (interleaved stereo).
    ///
    /// Meant for offline engines; while a device stream is running the
    /// callback owns the mixer and `out` comes back silent if they overlap.
    pub fn mix(&self, out: &mut [i16], buffer_start: f64, current_time: f64) {
        self.channels().mix(out, buffer_start, current_time);
    }

    /// Stop and close the output stream, then discard all queued sounds.
    ///
    /// On a backend failure the error is recorded and returned; the engine
    /// stays inspectable.
    pub fn close(&mut self) -> Result<()> {
        if let Some(output) = self.output.take() {
            if let Err(e) = output.stop() {
                warn!("Failed to stop output stream: {e}");
                self.errors.record(&e);
                self.output = Some(output);
                return Err(e);
            }
            drop(output);
            info!("Output stream closed");
        }

        match self.channels().drain() {
            Some(dropped) => {
                debug!("Discarded {dropped} queued sounds");
                Ok(())
            }
            None => {
                let err = Error::Backend("Mixer still running during close".to_string());
                self.errors.record(&err);
                Err(err)
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Engine teardown incomplete: {e}");
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("device", &self.device_name())
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const RATE: u32 = 1024;
    const DT: f64 = 1.0 / RATE as f64;

    fn engine(channels: usize, capacity: usize) -> Engine {
        let clock = Arc::new(ManualClock::new(1.0));
        Engine::offline(EngineConfig::new(RATE, channels, capacity), clock).unwrap()
    }

    fn ramp(frames: usize) -> Sound {
        let left = (1..=frames as i16).collect::<Vec<_>>();
        Sound::new([left.clone(), left].concat(), frames).unwrap()
    }

    #[test]
    fn test_offline_rejects_bad_config() {
        let clock = Arc::new(ManualClock::new(0.0));
        let result = Engine::offline(EngineConfig::new(RATE, 0, 4), clock);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_offline_engine_layout() {
        let engine = engine(3, 5);
        assert!(!engine.is_running());
        assert_eq!(engine.device_name(), None);
        assert_eq!(engine.channels().len(), 6);
        assert_eq!(engine.channels().channel(0).unwrap().capacity(), 5);
    }

    #[test]
    fn test_sample_accurate_schedule() {
        let engine = engine(2, 4);
        // Caller's clock reads 0.0 while the stream clock reads 1.0.
        engine.play(0.0, 3.0 * DT, Some(0), ramp(4)).unwrap();
        engine.play(0.0, 5.0 * DT, Some(1), ramp(2)).unwrap();

        let mut out = vec![0i16; 16];
        engine.mix(&mut out, 1.0, 1.0 - 8.0 * DT);
        let left: Vec<i16> = out.iter().step_by(2).copied().collect();
        assert_eq!(left, vec![0, 0, 0, 1, 2, 4, 6, 0]);
        assert_eq!(engine.current_latency(), 16.0 * DT);
        assert_eq!(engine.take_timing_warning(), None);
    }

    #[test]
    fn test_streaming_gapless() {
        let engine = engine(1, 4);
        engine.play_next(0.0, 0, ramp(3)).unwrap();
        engine.play_next(0.0, 0, ramp(3)).unwrap();
        let mut out = vec![0i16; 16];
        engine.mix(&mut out, 1.0, 1.0);
        let left: Vec<i16> = out.iter().step_by(2).copied().collect();
        assert_eq!(left, vec![1, 2, 3, 1, 2, 3, 0, 0]);
    }

    #[test]
    fn test_pause_resume_through_engine() {
        let engine = engine(1, 4);
        engine.play(0.0, 0.0, Some(0), ramp(8)).unwrap();
        engine.pause(ChannelTarget::All).unwrap();
        let mut out = vec![0i16; 8];
        engine.mix(&mut out, 1.0, 1.0);
        assert!(out.iter().all(|&s| s == 0));

        engine.resume(ChannelTarget::OneShot(0)).unwrap();
        engine.mix(&mut out, 1.0 + 4.0 * DT, 1.0);
        assert_eq!(out[0], 1);
        assert!(engine.channels().streaming(0).unwrap().is_paused());
    }

    #[test]
    fn test_scheduler_handle_across_threads() {
        let engine = engine(4, 8);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let scheduler = engine.scheduler();
                std::thread::spawn(move || {
                    (0..4)
                        .filter(|_| scheduler.play(0.0, 0.0, None, ramp(1)).is_ok())
                        .count()
                })
            })
            .collect();
        let played: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        let queued: usize = engine.channels().iter().map(|q| q.len()).sum();
        assert_eq!(played, queued);
        assert!(played > 0);
    }

    #[test]
    fn test_close_drains_queues() {
        let mut engine = engine(2, 4);
        engine.play(0.0, 10.0, Some(0), ramp(4)).unwrap();
        engine.play_next(0.0, 1, ramp(4)).unwrap();
        engine.close().unwrap();
        assert!(engine.channels().iter().all(|q| q.is_empty()));
        assert_eq!(engine.last_error_message(), "");
        // Closing twice is harmless.
        engine.close().unwrap();
    }

    #[test]
    fn test_error_message_reports_domain_error() {
        let engine = engine(1, 1);
        engine.pause(ChannelTarget::OneShot(0)).unwrap();
        assert!(engine.play(0.0, 0.0, None, ramp(1)).is_err());
        assert_eq!(
            engine.last_error_message(),
            "All unpaused channels have full buffers."
        );
    }
}
