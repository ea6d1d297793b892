//! Cadence - metronome and streaming demo for the sound scheduler.
//!
//! Usage:
//!   cadence [CONFIG.json]   play a metronome over a streamed drone
//!   cadence devices         list output devices

use std::f64::consts::TAU;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use cadence_core::{ChannelTarget, Error, Sound};
use cadence_mixer::{default_device_name, list_output_devices, Engine, EngineConfig};
use directories::ProjectDirs;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Metronome beats scheduled up front.
const BEATS: usize = 16;
/// Seconds between beats.
const BEAT_INTERVAL: f64 = 0.25;
/// Length of each streamed drone chunk in seconds.
const CHUNK_SECS: f64 = 0.1;

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence=debug,cadence_mixer=info".into()),
        )
        .init();

    info!("Starting Cadence v{}", env!("CARGO_PKG_VERSION"));

    let arg = std::env::args().nth(1);
    if arg.as_deref() == Some("devices") {
        let default = default_device_name();
        for name in list_output_devices()? {
            let marker = if Some(&name) == default.as_ref() { "*" } else { " " };
            println!("{marker} {name}");
        }
        return Ok(());
    }

    let config = load_config(arg.map(PathBuf::from))?;
    run(config)
}

/// Load the engine config from `path`, or from the user config directory.
fn load_config(path: Option<PathBuf>) -> Result<EngineConfig> {
    let path = path.or_else(|| {
        ProjectDirs::from("com", "cadence", "Cadence")
            .map(|dirs| dirs.config_dir().join("engine.json"))
    });
    match path {
        Some(path) if path.exists() => {
            info!("Loading config from {}", path.display());
            EngineConfig::from_json_file(&path)
                .with_context(|| format!("Failed to load {}", path.display()))
        }
        _ => Ok(EngineConfig::default()),
    }
}

fn run(config: EngineConfig) -> Result<()> {
    let sample_rate = config.sample_rate;
    let mut engine = Engine::new(config).context("Failed to start audio engine")?;

    // The caller clock is deliberately unrelated to the stream clock.
    let origin = Instant::now();
    let now = || origin.elapsed().as_secs_f64();

    let click = tone(sample_rate, 1760.0, 0.03, 0.5);
    let accent = tone(sample_rate, 2640.0, 0.03, 0.6);
    let drone_chunk = tone(sample_rate, 110.0, CHUNK_SECS, 0.15);

    let start = now() + 0.2;
    for beat in 0..BEATS {
        let sound = if beat % 4 == 0 { &accent } else { &click };
        let at = start + beat as f64 * BEAT_INTERVAL;
        if let Err(e) = engine.play(now(), at, None, sound.clone()) {
            warn!("Beat {beat} dropped: {e}");
        }
    }

    let stop_at = start + BEATS as f64 * BEAT_INTERVAL;
    let pause_at = start + BEATS as f64 * BEAT_INTERVAL / 2.0;
    let mut paused = false;
    while now() < stop_at {
        if !paused && now() >= pause_at {
            // The next play_next interrupts the current chunk and resumes.
            engine.pause(ChannelTarget::Streaming(0))?;
            paused = true;
        }
        match engine.play_next(now(), 0, drone_chunk.clone()) {
            Ok(done_at) => {
                let wait = (done_at - now() - CHUNK_SECS).max(0.0);
                thread::sleep(Duration::from_secs_f64(wait.min(CHUNK_SECS)));
            }
            Err(Error::QueueFull) => thread::sleep(Duration::from_millis(5)),
            Err(e) => return Err(e.into()),
        }
        if let Some(warning) = engine.take_timing_warning() {
            warn!("{warning}");
        }
    }

    info!("Output latency: {:.2}ms", engine.current_latency() * 1000.0);
    let last_error = engine.last_error_message();
    if !last_error.is_empty() {
        warn!("Last engine error: {last_error}");
    }

    thread::sleep(Duration::from_millis(200));
    engine.close()?;
    Ok(())
}

/// A sine burst with a linear fade-out.
fn tone(sample_rate: u32, freq: f64, secs: f64, gain: f64) -> Sound {
    let rate = f64::from(sample_rate);
    let frames = (secs * rate) as usize;
    let left: Vec<i16> = (0..frames)
        .map(|i| {
            let t = i as f64 / rate;
            let fade = 1.0 - i as f64 / frames as f64;
            ((TAU * freq * t).sin() * gain * fade * f64::from(i16::MAX)) as i16
        })
        .collect();
    let samples = [left.as_slice(), left.as_slice()].concat();
    Sound::new(samples, frames).unwrap_or_else(|_| Sound::silence(frames))
}
