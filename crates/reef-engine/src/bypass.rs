//! Engine-level bypass with a ramped crossfade
//!
//! Toggling bypass arms a short crossfade between the processor's own
//! output and a pass-through copy of its input. Weights are a convex
//! blend: processed + pass-through sum to exactly 1.0 at every sample.
//! Once fully ramped out, the engine substitutes a pass-through and stops
//! calling the processor (unless it supports soft bypass).

use reef_core::SampleBuffer;

/// Crossfade length in milliseconds
pub const BYPASS_RAMP_MS: f64 = 32.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BypassState {
    Active,
    RampingOut,
    Bypassed,
    RampingIn,
}

#[derive(Debug, Clone)]
pub struct BypassRamp {
    state: BypassState,
    ramp_samples: u32,
    /// Samples into the current ramp
    position: u32,
}

impl BypassRamp {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            state: BypassState::Active,
            ramp_samples: ((BYPASS_RAMP_MS / 1000.0) * sample_rate as f64) as u32,
            position: 0,
        }
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.ramp_samples = ((BYPASS_RAMP_MS / 1000.0) * sample_rate as f64) as u32;
    }

    #[inline]
    pub fn state(&self) -> BypassState {
        self.state
    }

    /// True once the ramp has fully landed on the pass-through side
    #[inline]
    pub fn fully_bypassed(&self) -> bool {
        self.state == BypassState::Bypassed
    }

    #[inline]
    pub fn ramping(&self) -> bool {
        matches!(self.state, BypassState::RampingOut | BypassState::RampingIn)
    }

    /// Arm a transition. Mid-ramp toggles reverse from the current blend
    /// position so the output stays continuous.
    pub fn set_bypassed(&mut self, bypassed: bool) {
        self.state = match (self.state, bypassed) {
            (BypassState::Active, true) => {
                self.position = 0;
                BypassState::RampingOut
            }
            (BypassState::Bypassed, false) => {
                self.position = 0;
                BypassState::RampingIn
            }
            (BypassState::RampingOut, false) => {
                self.position = self.ramp_samples.saturating_sub(self.position);
                BypassState::RampingIn
            }
            (BypassState::RampingIn, true) => {
                self.position = self.ramp_samples.saturating_sub(self.position);
                BypassState::RampingOut
            }
            (state, _) => state,
        };
    }

    /// Processed-signal weight at `offset` samples into the current block
    #[inline]
    fn processed_weight(&self, offset: u32) -> f32 {
        let progress =
            ((self.position + offset).min(self.ramp_samples)) as f32 / self.ramp_samples as f32;
        match self.state {
            BypassState::Active => 1.0,
            BypassState::Bypassed => 0.0,
            BypassState::RampingOut => 1.0 - progress,
            BypassState::RampingIn => progress,
        }
    }

    /// Blend the processed block (`processed`, mutated in place) with the
    /// pass-through input (`dry`), advancing the ramp by one block.
    pub fn blend(&mut self, dry: &SampleBuffer, processed: &mut SampleBuffer) {
        if !self.ramping() {
            if self.fully_bypassed() {
                processed.passthrough_from(dry);
            }
            return;
        }

        let frames = processed.frames() as u32;
        let shared = processed.channel_count().min(dry.channel_count());
        for ch in 0..shared {
            let wet = processed.channel_mut(ch);
            let dry_ch = dry.channel(ch);
            for (i, (w, d)) in wet.iter_mut().zip(dry_ch).enumerate() {
                let weight = self.processed_weight(i as u32);
                *w = *w * weight + *d * (1.0 - weight);
            }
        }

        self.position += frames;
        if self.position >= self.ramp_samples {
            self.position = 0;
            self.state = match self.state {
                BypassState::RampingOut => BypassState::Bypassed,
                BypassState::RampingIn => BypassState::Active,
                state => state,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffers(frames: usize) -> (SampleBuffer, SampleBuffer) {
        let mut dry = SampleBuffer::new(1, frames);
        dry.channel_mut(0).fill(1.0);
        // "Processed" signal is silence, so the blend output equals the
        // pass-through weight directly
        let processed = SampleBuffer::new(1, frames);
        (dry, processed)
    }

    #[test]
    fn ramp_length_at_48k() {
        let ramp = BypassRamp::new(48000.0);
        assert_eq!(ramp.ramp_samples, 1536);
    }

    #[test]
    fn weights_sum_to_unity_through_the_ramp() {
        let mut ramp = BypassRamp::new(48000.0);
        ramp.set_bypassed(true);

        let (dry, mut processed) = buffers(1536);
        processed.channel_mut(0).fill(2.0);
        ramp.blend(&dry, &mut processed);

        // Output = 2w + 1(1-w); with weights in [0,1] the blend must sit
        // between the two sources at every sample
        for &sample in processed.channel(0) {
            assert!((1.0..=2.0).contains(&sample));
        }
        // Sample 0: full processed weight
        assert!((processed.channel(0)[0] - 2.0).abs() < 1e-6);
        assert!(ramp.fully_bypassed());
    }

    #[test]
    fn ramp_endpoint_is_pure_passthrough() {
        let mut ramp = BypassRamp::new(48000.0);
        ramp.set_bypassed(true);

        let (dry, mut processed) = buffers(1536);
        ramp.blend(&dry, &mut processed);
        assert!(ramp.fully_bypassed());

        // Next block: pass-through substitution is bit-exact
        let (dry, mut processed) = buffers(64);
        ramp.blend(&dry, &mut processed);
        assert_eq!(processed.channel(0), dry.channel(0));
    }

    #[test]
    fn mid_ramp_reversal_keeps_continuity() {
        let mut ramp = BypassRamp::new(48000.0);
        ramp.set_bypassed(true);

        let (dry, mut processed) = buffers(768);
        ramp.blend(&dry, &mut processed);
        assert!(ramp.ramping());

        // Reverse halfway: processed weight should resume near 0.5
        ramp.set_bypassed(false);
        let w = ramp.processed_weight(0);
        assert!((w - 0.5).abs() < 1e-3);
    }

    #[test]
    fn toggles_in_steady_states() {
        let mut ramp = BypassRamp::new(48000.0);
        assert_eq!(ramp.state(), BypassState::Active);
        ramp.set_bypassed(false);
        assert_eq!(ramp.state(), BypassState::Active);
        ramp.set_bypassed(true);
        assert_eq!(ramp.state(), BypassState::RampingOut);
    }
}
