//! Time-related types for audio processing

use serde::{Deserialize, Serialize};

/// Sample position on the engine timeline (samples since start)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SamplePosition(pub u64);

impl SamplePosition {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub fn from_seconds(seconds: f64, sample_rate: f32) -> Self {
        Self((seconds * sample_rate as f64) as u64)
    }

    #[inline]
    pub fn to_seconds(self, sample_rate: f32) -> f64 {
        self.0 as f64 / sample_rate as f64
    }

    #[inline]
    pub fn advance(&mut self, samples: u64) {
        self.0 += samples;
    }
}

impl std::ops::Add<u64> for SamplePosition {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl std::ops::Sub for SamplePosition {
    type Output = u64;

    fn sub(self, rhs: Self) -> Self::Output {
        self.0.saturating_sub(rhs.0)
    }
}

/// Time duration in samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SampleDuration(pub u64);

impl SampleDuration {
    pub const ZERO: Self = Self(0);

    #[inline]
    pub fn from_seconds(seconds: f64, sample_rate: f32) -> Self {
        Self((seconds * sample_rate as f64) as u64)
    }

    #[inline]
    pub fn from_ms(ms: f64, sample_rate: f32) -> Self {
        Self::from_seconds(ms / 1000.0, sample_rate)
    }

    #[inline]
    pub fn to_seconds(self, sample_rate: f32) -> f64 {
        self.0 as f64 / sample_rate as f64
    }
}

/// Tempo in BPM
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tempo(pub f32);

impl Tempo {
    pub const DEFAULT: Self = Self(120.0);

    #[inline]
    pub fn beat_duration_samples(self, sample_rate: f32) -> f64 {
        (60.0 / self.0 as f64) * sample_rate as f64
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Musical time signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: u8,
    pub denominator: u8,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }
}

/// Engine play state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayState {
    #[default]
    Stopped,
    Playing,
    Recording,
}

impl PlayState {
    /// True if the position should advance while in this state
    #[inline]
    pub fn is_rolling(self) -> bool {
        matches!(self, PlayState::Playing | PlayState::Recording)
    }
}
