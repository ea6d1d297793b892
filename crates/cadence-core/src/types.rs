//! Core domain types for Cadence.

pub mod channel;
pub mod sound;

pub use channel::ChannelTarget;
pub use sound::{Sound, StartTime};
