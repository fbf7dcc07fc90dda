//! Mono summing processor
//!
//! Sums every input channel and writes the sum to every output channel.
//! Handles bypass internally (soft bypass) so it keeps receiving process
//! calls while bypassed.

use reef_core::{SampleBuffer, MAX_ENGINE_CHANNELS};
use reef_event::RtEvent;

use crate::processor::{ProcessContext, Processor, ProcessorData};

pub struct MonoSummer {
    data: ProcessorData,
}

impl MonoSummer {
    pub const UID: &'static str = "reef.mono_summer";

    pub fn new(name: &str, label: &str) -> Self {
        Self {
            data: ProcessorData::new(name, label, Vec::new())
                .with_max_channels(MAX_ENGINE_CHANNELS, MAX_ENGINE_CHANNELS),
        }
    }
}

impl Processor for MonoSummer {
    fn data(&self) -> &ProcessorData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ProcessorData {
        &mut self.data
    }

    fn process_event(&mut self, event: RtEvent) {
        self.data.handle_common_event(&event);
    }

    fn supports_soft_bypass(&self) -> bool {
        true
    }

    fn process_audio(
        &mut self,
        _ctx: &ProcessContext,
        input: &SampleBuffer,
        output: &mut SampleBuffer,
    ) {
        if self.data.bypassed() {
            output.passthrough_from(input);
            return;
        }

        for out_ch in 0..output.channel_count() {
            output.channel_mut(out_ch).fill(0.0);
            for in_ch in 0..input.channel_count() {
                output.add_channel_from(out_ch, input, in_ch);
            }
        }
    }
}
