//! Transport state machine
//!
//! Mutated only on the RT thread, at block boundaries, in response to
//! transport events. Processors read it through the per-call context.

use reef_core::{PlayState, SamplePosition, Tempo, TimeSignature};
use reef_event::TransportChange;

#[derive(Debug, Clone)]
pub struct Transport {
    position: SamplePosition,
    tempo: Tempo,
    time_signature: TimeSignature,
    play_state: PlayState,
    state_changed: bool,
    sample_rate: f32,
}

impl Transport {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            position: SamplePosition::ZERO,
            tempo: Tempo::DEFAULT,
            time_signature: TimeSignature::default(),
            play_state: PlayState::Stopped,
            state_changed: false,
            sample_rate,
        }
    }

    #[inline]
    pub fn position(&self) -> SamplePosition {
        self.position
    }

    #[inline]
    pub fn tempo(&self) -> Tempo {
        self.tempo
    }

    #[inline]
    pub fn time_signature(&self) -> TimeSignature {
        self.time_signature
    }

    #[inline]
    pub fn play_state(&self) -> PlayState {
        self.play_state
    }

    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// True if the play state changed at this block boundary; processors
    /// may flush tails on it
    #[inline]
    pub fn state_changed(&self) -> bool {
        self.state_changed
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
    }

    /// Apply a transport event at the block boundary (RT thread)
    pub fn apply(&mut self, change: TransportChange) {
        match change {
            TransportChange::Tempo(tempo) => self.tempo = tempo,
            TransportChange::TimeSignature(sig) => self.time_signature = sig,
            TransportChange::PlayState(state) => {
                if state != self.play_state {
                    self.state_changed = true;
                }
                if state == PlayState::Stopped {
                    self.position = SamplePosition::ZERO;
                }
                self.play_state = state;
            }
        }
    }

    /// Advance by one block; position only moves while rolling
    pub fn advance_block(&mut self, samples: u64) {
        if self.play_state.is_rolling() {
            self.position.advance(samples);
        }
    }

    /// Clear the per-block change flag; the engine calls this after the
    /// last track has processed
    pub fn end_block(&mut self) {
        self.state_changed = false;
    }
}
