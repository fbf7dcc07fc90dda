//! Single-band peaking equalizer

use reef_core::{ParameterDescriptor, SampleBuffer, MAX_ENGINE_CHANNELS};
use reef_event::{RtEvent, RtEventPayload};

use crate::processor::{ProcessContext, Processor, ProcessorData};

const PARAM_FREQUENCY: u32 = 0;
const PARAM_GAIN: u32 = 1;
const PARAM_Q: u32 = 2;

/// Direct-form biquad state per channel
#[derive(Debug, Clone, Copy, Default)]
struct BiquadState {
    z1: f32,
    z2: f32,
}

#[derive(Debug, Clone, Copy)]
struct Coefficients {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl Default for Coefficients {
    fn default() -> Self {
        // Identity filter
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }
}

pub struct Equalizer {
    data: ProcessorData,
    coeffs: Coefficients,
    state: [BiquadState; MAX_ENGINE_CHANNELS],
    sample_rate: f32,
}

impl Equalizer {
    pub const UID: &'static str = "reef.equalizer";

    pub fn new(name: &str, label: &str) -> Self {
        let descriptors = vec![
            ParameterDescriptor::float(PARAM_FREQUENCY, "frequency", "Frequency", "Hz", 20.0, 20000.0),
            ParameterDescriptor::float(PARAM_GAIN, "gain", "Gain", "dB", -24.0, 24.0),
            ParameterDescriptor::float(PARAM_Q, "q", "Q", "", 0.1, 10.0),
        ];
        let data = ProcessorData::new(name, label, descriptors)
            .with_max_channels(MAX_ENGINE_CHANNELS, MAX_ENGINE_CHANNELS);
        data.parameters().init(PARAM_FREQUENCY, 1000.0);
        data.parameters().init(PARAM_GAIN, 0.0);
        data.parameters().init(PARAM_Q, 1.0);
        Self {
            data,
            coeffs: Coefficients::default(),
            state: [BiquadState::default(); MAX_ENGINE_CHANNELS],
            sample_rate: 48000.0,
        }
    }

    /// RBJ peaking filter coefficients from the current parameter values
    fn update_coefficients(&mut self) {
        let freq = self
            .data
            .parameter(PARAM_FREQUENCY)
            .clamp(20.0, self.sample_rate * 0.49);
        let gain_db = self.data.parameter(PARAM_GAIN);
        let q = self.data.parameter(PARAM_Q).max(0.1);

        let a = 10f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / self.sample_rate;
        let alpha = w0.sin() / (2.0 * q);
        let cos_w0 = w0.cos();

        let a0 = 1.0 + alpha / a;
        self.coeffs = Coefficients {
            b0: (1.0 + alpha * a) / a0,
            b1: (-2.0 * cos_w0) / a0,
            b2: (1.0 - alpha * a) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha / a) / a0,
        };
    }
}

impl Processor for Equalizer {
    fn data(&self) -> &ProcessorData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ProcessorData {
        &mut self.data
    }

    fn configure(&mut self, sample_rate: f32, _block_size: usize) {
        self.sample_rate = sample_rate;
        self.state = [BiquadState::default(); MAX_ENGINE_CHANNELS];
        self.update_coefficients();
    }

    fn process_event(&mut self, event: RtEvent) {
        if self.data.handle_common_event(&event) {
            if matches!(event.payload, RtEventPayload::ParameterChange { .. }) {
                self.update_coefficients();
            }
        }
    }

    fn process_audio(
        &mut self,
        _ctx: &ProcessContext,
        input: &SampleBuffer,
        output: &mut SampleBuffer,
    ) {
        let c = self.coeffs;
        let shared = input.channel_count().min(output.channel_count());
        for ch in 0..shared {
            let state = &mut self.state[ch];
            let out = output.channel_mut(ch);
            for (o, &x) in out.iter_mut().zip(input.channel(ch)) {
                // Transposed direct form II
                let y = c.b0 * x + state.z1;
                state.z1 = c.b1 * x - c.a1 * y + state.z2;
                state.z2 = c.b2 * x - c.a2 * y;
                *o = y;
            }
        }
        for ch in shared..output.channel_count() {
            output.channel_mut(ch).fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::run_block;

    #[test]
    fn flat_at_zero_gain() {
        let mut plugin = Equalizer::new("eq", "Equalizer");
        plugin.configure(48000.0, 64);
        plugin.data_mut().set_input_channels(1);
        plugin.data_mut().set_output_channels(1);

        let mut input = SampleBuffer::new(1, 64);
        for (i, sample) in input.channel_mut(0).iter_mut().enumerate() {
            *sample = (i as f32 * 0.3).sin();
        }
        let output = run_block(&mut plugin, &input);
        for (o, i) in output.channel(0).iter().zip(input.channel(0)) {
            assert!((o - i).abs() < 1e-4);
        }
    }

    #[test]
    fn boost_raises_level_at_center() {
        let mut plugin = Equalizer::new("eq", "Equalizer");
        plugin.configure(48000.0, 64);
        plugin.data_mut().set_input_channels(1);
        plugin.data_mut().set_output_channels(1);
        plugin.data().parameters().init(PARAM_GAIN, 12.0);
        plugin.update_coefficients();

        // 1 kHz sine at the filter center frequency
        let frames = 4800;
        let mut input = SampleBuffer::new(1, frames);
        for (i, sample) in input.channel_mut(0).iter_mut().enumerate() {
            *sample = (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / 48000.0).sin();
        }
        let mut output = SampleBuffer::new(1, frames);
        let transport = crate::transport::Transport::new(48000.0);
        let ctx = ProcessContext {
            transport: &transport,
            sample_rate: 48000.0,
            block_size: frames,
        };
        plugin.process_audio(&ctx, &input, &mut output);

        // Skip the filter settle, then compare peaks
        let peak_out = output.channel(0)[1000..]
            .iter()
            .fold(0f32, |m, &s| m.max(s.abs()));
        assert!(peak_out > 2.0, "expected boost, peak was {peak_out}");
    }
}
