//! reef-core: Shared types for the reef audio host
//!
//! This crate provides the foundational types used across all reef crates:
//! object identity, sample-domain time, parameter descriptors and the
//! RT-owned value store, MIDI wire codec, block buffers, and the status
//! code taxonomy.

mod buffer;
mod error;
mod id;
pub mod midi;
mod params;
mod time;

pub use buffer::*;
pub use error::*;
pub use id::*;
pub use midi::{MidiChannel, MidiMessage};
pub use params::*;
pub use time::*;

/// Standard sample rate options
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[repr(u32)]
pub enum SampleRate {
    Hz44100 = 44100,
    Hz48000 = 48000,
    Hz88200 = 88200,
    Hz96000 = 96000,
    Hz176400 = 176400,
    Hz192000 = 192000,
}

impl SampleRate {
    /// Closest standard rate for an arbitrary value, if it is one
    pub fn from_hz(hz: f32) -> Option<Self> {
        match hz as u32 {
            44100 => Some(Self::Hz44100),
            48000 => Some(Self::Hz48000),
            88200 => Some(Self::Hz88200),
            96000 => Some(Self::Hz96000),
            176400 => Some(Self::Hz176400),
            192000 => Some(Self::Hz192000),
            _ => None,
        }
    }

    #[inline]
    pub fn as_f32(self) -> f32 {
        self as u32 as f32
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl Default for SampleRate {
    fn default() -> Self {
        Self::Hz48000
    }
}
