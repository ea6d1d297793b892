//! Engine configuration.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::path::Path;

use cadence_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Engine construction parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Number of one-shot channels (and, equally, of streaming channels).
    pub channels: usize,
    /// Slots per one-shot channel queue.
    pub queue_capacity: usize,
    /// Fixed callback buffer size in frames; `None` lets the backend choose.
    pub buffer_frames: Option<u32>,
    /// Output device name; `None` uses the host default.
    pub device: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            channels: 8,
            queue_capacity: 16,
            buffer_frames: None,
            device: None,
        }
    }
}

impl EngineConfig {
    pub fn new(sample_rate: u32, channels: usize, queue_capacity: usize) -> Self {
        Self {
            sample_rate,
            channels,
            queue_capacity,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be positive".to_string()));
        }
        if self.channels == 0 {
            return Err(Error::Config("channels must be positive".to_string()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be positive".to_string()));
        }
        if self.buffer_frames == Some(0) {
            return Err(Error::Config("buffer_frames must be positive".to_string()));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration; missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
