//! # cadence-mixer
//!
//! Sample-accurate sound scheduler and mixer for Cadence.
//!
//! Features:
//! - Lock-free per-channel queues between caller threads and the audio callback
//! - Caller-clock to stream-clock time translation
//! - Least-loaded automatic channel selection
//! - Gapless streaming channels with backpressure
//! - Low-latency cpal output

mod atomic;
pub mod channels;
pub mod clock;
pub mod config;
pub mod engine;
mod mixer;
pub mod output;
pub mod queue;
pub mod scheduler;

pub use channels::{ChannelSet, STREAMING_QUEUE_CAPACITY};
pub use clock::{ManualClock, MonotonicClock, StreamClock};
pub use config::EngineConfig;
pub use engine::Engine;
pub use output::{default_device_name, list_output_devices, AudioOutput};
pub use queue::{ChannelQueue, ScheduledSound};
pub use scheduler::Scheduler;
