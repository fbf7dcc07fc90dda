//! Gain processor

use reef_core::{ParameterDescriptor, SampleBuffer, MAX_ENGINE_CHANNELS};
use reef_event::RtEvent;

use crate::processor::{ProcessContext, Processor, ProcessorData};

const PARAM_GAIN: u32 = 0;

pub struct Gain {
    data: ProcessorData,
}

impl Gain {
    pub const UID: &'static str = "reef.gain";

    pub fn new(name: &str, label: &str) -> Self {
        let descriptors = vec![ParameterDescriptor::float(
            PARAM_GAIN,
            "gain",
            "Gain",
            "dB",
            -60.0,
            12.0,
        )];
        let data = ProcessorData::new(name, label, descriptors)
            .with_max_channels(MAX_ENGINE_CHANNELS, MAX_ENGINE_CHANNELS);
        data.parameters().init(PARAM_GAIN, 0.0);
        Self { data }
    }
}

impl Processor for Gain {
    fn data(&self) -> &ProcessorData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ProcessorData {
        &mut self.data
    }

    fn process_event(&mut self, event: RtEvent) {
        self.data.handle_common_event(&event);
    }

    fn process_audio(
        &mut self,
        _ctx: &ProcessContext,
        input: &SampleBuffer,
        output: &mut SampleBuffer,
    ) {
        let linear = db_to_linear(self.data.parameter(PARAM_GAIN));
        let shared = input.channel_count().min(output.channel_count());
        for ch in 0..shared {
            let out = output.channel_mut(ch);
            out.copy_from_slice(input.channel(ch));
            for sample in out {
                *sample *= linear;
            }
        }
        for ch in shared..output.channel_count() {
            output.channel_mut(ch).fill(0.0);
        }
    }
}

#[inline]
fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::run_block;
    use reef_core::ObjectId;
    use reef_event::{ParameterValue, RtEventPayload};

    #[test]
    fn unity_at_zero_db() {
        let mut plugin = Gain::new("g", "Gain");
        plugin.data_mut().set_input_channels(1);
        plugin.data_mut().set_output_channels(1);

        let mut input = SampleBuffer::new(1, 4);
        input.channel_mut(0).fill(0.5);
        let output = run_block(&mut plugin, &input);
        assert_eq!(output.channel(0), &[0.5; 4]);
    }

    #[test]
    fn minus_six_db_halves() {
        let mut plugin = Gain::new("g", "Gain");
        plugin.data_mut().set_input_channels(1);
        plugin.data_mut().set_output_channels(1);
        plugin.process_event(RtEvent::new(
            0,
            RtEventPayload::ParameterChange {
                target: ObjectId::NONE,
                index: PARAM_GAIN,
                value: ParameterValue::Float(-6.0),
            },
        ));

        let mut input = SampleBuffer::new(1, 4);
        input.channel_mut(0).fill(1.0);
        let output = run_block(&mut plugin, &input);
        for &sample in output.channel(0) {
            assert!((sample - 0.501).abs() < 1e-3);
        }
    }
}
