//! Audio output using cpal.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::sync::Arc;
use std::time::{Duration, Instant};

use cadence_core::{Error, Result};
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BufferSize, Device, SampleFormat, SampleRate, Stream, StreamConfig,
};
use crossbeam_channel::Sender;
use tracing::{debug, error, info};

use crate::channels::ChannelSet;
use crate::clock::MonotonicClock;
use crate::config::EngineConfig;

/// Output is always interleaved stereo.
pub const OUTPUT_CHANNELS: u16 = 2;

/// Frames mixed per pass when the device format needs conversion.
const SCRATCH_FRAMES: usize = 1024;

/// A running cpal output stream driving the mixer.
pub struct AudioOutput {
    stream: Stream,
    device_name: String,
    sample_format: SampleFormat,
    sample_rate: u32,
}

impl AudioOutput {
    /// Open and start an output stream feeding from `channels`.
    pub fn open(
        config: &EngineConfig,
        channels: Arc<ChannelSet>,
        clock: MonotonicClock,
        errors: Sender<String>,
    ) -> Result<Self> {
        let host = cpal::default_host();
        let device = match &config.device {
            Some(name) => find_device(&host, name)?,
            None => host
                .default_output_device()
                .ok_or_else(|| Error::Backend("No output device found".to_string()))?,
        };

        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using audio output device: {device_name}");

        let sample_format = device
            .default_output_config()
            .map_err(|e| Error::Backend(format!("Failed to get output config: {e}")))?
            .sample_format();

        let stream_config = StreamConfig {
            channels: OUTPUT_CHANNELS,
            sample_rate: SampleRate(config.sample_rate),
            buffer_size: config
                .buffer_frames
                .map_or(BufferSize::Default, BufferSize::Fixed),
        };
        debug!(
            "Output config: {}Hz, {} channels, {:?}, {:?}",
            config.sample_rate, OUTPUT_CHANNELS, stream_config.buffer_size, sample_format
        );

        let stream = match sample_format {
            SampleFormat::I16 => {
                build_stream::<i16>(&device, &stream_config, channels, clock, errors)?
            }
            SampleFormat::F32 => {
                build_stream::<f32>(&device, &stream_config, channels, clock, errors)?
            }
            SampleFormat::U16 => {
                build_stream::<u16>(&device, &stream_config, channels, clock, errors)?
            }
            _ => {
                return Err(Error::Backend(format!(
                    "Unsupported sample format: {sample_format:?}"
                )));
            }
        };

        stream
            .play()
            .map_err(|e| Error::Backend(format!("Failed to start stream: {e}")))?;
        info!("Output stream started");

        Ok(Self {
            stream,
            device_name,
            sample_format,
            sample_rate: config.sample_rate,
        })
    }

    /// Stop the stream. It is closed when dropped.
    pub fn stop(&self) -> Result<()> {
        self.stream
            .pause()
            .map_err(|e| Error::Backend(format!("Failed to stop stream: {e}")))?;
        info!("Output stream stopped");
        Ok(())
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub const fn sample_format(&self) -> SampleFormat {
        self.sample_format
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

fn find_device(host: &cpal::Host, name: &str) -> Result<Device> {
    host.output_devices()
        .map_err(|e| Error::Backend(format!("Failed to list devices: {e}")))?
        .find(|d| d.name().is_ok_and(|n| n == name))
        .ok_or_else(|| Error::Backend(format!("Output device not found: {name}")))
}

/// Build the output stream whose callback runs the mixer.
///
/// The mixer works in i16; other device formats are mixed through a scratch
/// block allocated here, before the stream starts, and converted per chunk.
fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    channels: Arc<ChannelSet>,
    clock: MonotonicClock,
    errors: Sender<String>,
) -> Result<Stream>
where
    T: cpal::SizedSample + cpal::FromSample<i16>,
{
    let width = usize::from(OUTPUT_CHANNELS);
    let mut scratch = vec![0i16; SCRATCH_FRAMES * width];

    let err_fn = move |err: cpal::StreamError| {
        error!("Audio stream error: {err}");
        let _ = errors.try_send(err.to_string());
    };

    device
        .build_output_stream(
            config,
            move |data: &mut [T], info: &cpal::OutputCallbackInfo| {
                let current_time = clock.at(Instant::now());
                let timestamp = info.timestamp();
                let delay = timestamp
                    .playback
                    .duration_since(&timestamp.callback)
                    .unwrap_or(Duration::ZERO);
                let buffer_start = current_time + delay.as_secs_f64();

                channels.record_callback(data.len() / width, buffer_start - current_time);
                render_chunked(&channels, data, &mut scratch, buffer_start);
            },
            err_fn,
            None,
        )
        .map_err(|e| Error::Backend(format!("Failed to build stream: {e}")))
}

/// Render `data` through the i16 `scratch` block, one block-sized chunk at a
/// time, converting into the device format.
///
/// Chunk `n` starts `n * scratch frames` after `buffer_start`, so the result
/// is the same as rendering the whole buffer in one pass.
fn render_chunked<T>(channels: &ChannelSet, data: &mut [T], scratch: &mut [i16], buffer_start: f64)
where
    T: cpal::FromSample<i16>,
{
    let width = usize::from(OUTPUT_CHANNELS);
    let chunk_frames = scratch.len() / width;
    if chunk_frames == 0 {
        return;
    }
    let frame_duration = channels.frame_duration();
    for (n, chunk) in data.chunks_mut(chunk_frames * width).enumerate() {
        let mixed = &mut scratch[..chunk.len()];
        let chunk_start = buffer_start + (n * chunk_frames) as f64 * frame_duration;
        channels.render(mixed, chunk_start);
        for (sample, &value) in chunk.iter_mut().zip(mixed.iter()) {
            *sample = T::from_sample_(value);
        }
    }
}

/// List available output devices.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();

    let devices: Vec<String> = host
        .output_devices()
        .map_err(|e| Error::Backend(format!("Failed to list devices: {e}")))?
        .filter_map(|d| d.name().ok())
        .collect();

    Ok(devices)
}

/// Get the default output device name.
pub fn default_device_name() -> Option<String> {
    let host = cpal::default_host();
    host.default_output_device().and_then(|d| d.name().ok())
}
