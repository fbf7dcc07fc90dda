//! Pass-through processor
//!
//! Copies audio straight through and forwards incoming keyboard events to
//! its outbox, which makes it useful for wiring and event-flow tests.

use reef_core::{SampleBuffer, MAX_ENGINE_CHANNELS};
use reef_event::{RtEvent, RtEventPayload};

use crate::processor::{ProcessContext, Processor, ProcessorData};

pub struct Passthrough {
    data: ProcessorData,
}

impl Passthrough {
    pub const UID: &'static str = "reef.passthrough";

    pub fn new(name: &str, label: &str) -> Self {
        Self {
            data: ProcessorData::new(name, label, Vec::new())
                .with_max_channels(MAX_ENGINE_CHANNELS, MAX_ENGINE_CHANNELS),
        }
    }
}

impl Processor for Passthrough {
    fn data(&self) -> &ProcessorData {
        &self.data
    }

    fn data_mut(&mut self) -> &mut ProcessorData {
        &mut self.data
    }

    fn process_event(&mut self, event: RtEvent) {
        if self.data.handle_common_event(&event) {
            return;
        }
        if let RtEventPayload::Keyboard { event: kb, .. } = event.payload {
            let source = self.data.id();
            self.data.output_event(RtEvent::new(
                event.sample_offset,
                RtEventPayload::KeyboardNotification { source, event: kb },
            ));
        }
    }

    fn process_audio(
        &mut self,
        _ctx: &ProcessContext,
        input: &SampleBuffer,
        output: &mut SampleBuffer,
    ) {
        output.passthrough_from(input);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::run_block;
    use reef_core::ObjectId;
    use reef_event::KeyboardEvent;

    #[test]
    fn audio_is_copied() {
        let mut plugin = Passthrough::new("pt", "Passthrough");
        plugin.data_mut().set_input_channels(1);
        plugin.data_mut().set_output_channels(1);

        let mut input = SampleBuffer::new(1, 8);
        input.channel_mut(0).copy_from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let output = run_block(&mut plugin, &input);
        assert_eq!(output.channel(0), input.channel(0));
    }

    #[test]
    fn keyboard_events_are_forwarded() {
        let mut plugin = Passthrough::new("pt", "Passthrough");
        let (tx, mut rx) = rtrb::RingBuffer::new(8);
        plugin
            .data_mut()
            .attach(tx, std::sync::Arc::new(reef_event::BlobStore::new(4)));

        plugin.process_event(RtEvent::new(
            5,
            RtEventPayload::Keyboard {
                target: ObjectId::NONE,
                event: KeyboardEvent::NoteOn {
                    note: 60,
                    velocity: 0.8,
                },
            },
        ));

        let out = rx.pop().unwrap();
        assert_eq!(out.sample_offset, 5);
        assert!(matches!(
            out.payload,
            RtEventPayload::KeyboardNotification {
                event: KeyboardEvent::NoteOn { note: 60, .. },
                ..
            }
        ));
    }
}
