//! # cadence-core
//!
//! Core types and error handling for the Cadence sound scheduler.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;
