//! Pre-decoded sounds and their scheduled start times.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::sync::Arc;

use crate::{Error, Result};

/// An immutable block of pre-decoded 16-bit stereo samples.
///
/// Samples are stored planar: all `frames` left samples first, followed by
/// all `frames` right samples. Cloning a `Sound` only bumps a reference
/// count; the sample data itself is never copied by the mixer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sound {
    samples: Arc<[i16]>,
    frames: usize,
}

impl Sound {
    /// Create a sound from planar samples (`[left..., right...]`).
    pub fn new(samples: impl Into<Arc<[i16]>>, frames: usize) -> Result<Self> {
        let samples = samples.into();
        if samples.len() != frames * 2 {
            return Err(Error::InvalidArgument(format!(
                "expected {} planar samples for {frames} frames, got {}",
                frames * 2,
                samples.len()
            )));
        }
        Ok(Self { samples, frames })
    }

    /// Create a sound from interleaved `L R L R ...` samples.
    pub fn from_interleaved(interleaved: &[i16]) -> Result<Self> {
        if interleaved.len() % 2 != 0 {
            return Err(Error::InvalidArgument(format!(
                "interleaved stereo needs an even sample count, got {}",
                interleaved.len()
            )));
        }
        let frames = interleaved.len() / 2;
        let mut planar = vec![0i16; interleaved.len()];
        for (i, frame) in interleaved.chunks_exact(2).enumerate() {
            planar[i] = frame[0];
            planar[frames + i] = frame[1];
        }
        Self::new(planar, frames)
    }

    /// A silent sound of the given length.
    pub fn silence(frames: usize) -> Self {
        Self {
            samples: vec![0i16; frames * 2].into(),
            frames,
        }
    }

    /// Number of stereo frames.
    pub const fn frames(&self) -> usize {
        self.frames
    }

    pub const fn is_empty(&self) -> bool {
        self.frames == 0
    }

    /// Left channel samples.
    pub fn left(&self) -> &[i16] {
        &self.samples[..self.frames]
    }

    /// Right channel samples.
    pub fn right(&self) -> &[i16] {
        &self.samples[self.frames..]
    }

    /// The raw planar sample block.
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Duration in seconds at the given sample rate.
    pub fn duration_secs(&self, sample_rate: u32) -> f64 {
        self.frames as f64 / f64::from(sample_rate)
    }
}

/// When a scheduled sound should start, in the stream clock domain.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum StartTime {
    /// Start as soon as the mixer reaches the sound in its queue.
    #[default]
    Asap,
    /// Start at this stream-clock instant (seconds).
    At(f64),
}

impl StartTime {
    /// Map a stream-clock instant to a start time.
    ///
    /// Non-positive (or non-finite) instants mean "as soon as possible".
    pub fn from_stream_time(time: f64) -> Self {
        if time.is_finite() && time > 0.0 {
            Self::At(time)
        } else {
            Self::Asap
        }
    }

    pub const fn is_asap(&self) -> bool {
        matches!(self, Self::Asap)
    }

    /// The explicit instant, if any.
    pub const fn instant(&self) -> Option<f64> {
        match self {
            Self::Asap => None,
            Self::At(t) => Some(*t),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_planar_layout() {
        let sound = Sound::new(vec![1, 2, 3, 10, 20, 30], 3).unwrap();
        assert_eq!(sound.frames(), 3);
        assert_eq!(sound.left(), &[1, 2, 3]);
        assert_eq!(sound.right(), &[10, 20, 30]);
    }

    #[test]
    fn test_rejects_mismatched_length() {
        assert!(Sound::new(vec![1, 2, 3], 2).is_err());
        assert!(Sound::from_interleaved(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_from_interleaved() {
        let sound = Sound::from_interleaved(&[1, 10, 2, 20]).unwrap();
        assert_eq!(sound.samples(), &[1, 2, 10, 20]);
    }

    #[test]
    fn test_clone_shares_samples() {
        let sound = Sound::silence(4);
        let other = sound.clone();
        assert!(std::ptr::eq(sound.samples(), other.samples()));
        assert!(Sound::silence(0).is_empty());
    }

    #[test]
    fn test_start_time_sentinel() {
        assert_eq!(StartTime::from_stream_time(0.0), StartTime::Asap);
        assert_eq!(StartTime::from_stream_time(-1.5), StartTime::Asap);
        assert_eq!(StartTime::from_stream_time(f64::NAN), StartTime::Asap);
        assert_eq!(StartTime::from_stream_time(2.5), StartTime::At(2.5));
        assert_eq!(StartTime::At(2.5).instant(), Some(2.5));
    }

    #[test]
    fn test_duration() {
        let sound = Sound::silence(22050);
        assert!((sound.duration_secs(44100) - 0.5).abs() < f64::EPSILON);
    }

    proptest! {
        #[test]
        fn interleaved_conversion_preserves_channels(
            frames in proptest::collection::vec((any::<i16>(), any::<i16>()), 0..64)
        ) {
            let interleaved: Vec<i16> = frames.iter().flat_map(|&(l, r)| [l, r]).collect();
            let sound = Sound::from_interleaved(&interleaved).unwrap();
            let left: Vec<i16> = frames.iter().map(|f| f.0).collect();
            let right: Vec<i16> = frames.iter().map(|f| f.1).collect();
            prop_assert_eq!(sound.left(), left.as_slice());
            prop_assert_eq!(sound.right(), right.as_slice());
        }
    }
}
