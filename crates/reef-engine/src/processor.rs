//! The processor contract
//!
//! Anything that processes audio and events — internal plugins, third-party
//! wrappers, and tracks themselves — conforms to `Processor`. The engine
//! calls `process_event` for every event addressed to a processor strictly
//! before its `process_audio` for the same block.
//!
//! RT rules for implementors: no allocation, no blocking, no syscalls in
//! `process_event` / `process_audio`. Anything slow goes through a deferred
//! work request.

use std::sync::Arc;

use reef_core::{ObjectId, ParameterDescriptor, ParameterStore, SampleBuffer};
use reef_event::{BlobStore, InlineBlob, RtEvent, RtEventPayload};

use crate::host_control::HostControl;
use crate::transport::Transport;

/// Per-processor outbox capacity (events per block)
pub const OUTBOX_CAPACITY: usize = 64;

/// Snapshot context handed to every process call; processors never retain
/// engine references across calls
pub struct ProcessContext<'a> {
    pub transport: &'a Transport,
    pub sample_rate: f32,
    pub block_size: usize,
}

/// Contract between the engine and anything that processes audio
pub trait Processor: Send {
    fn data(&self) -> &ProcessorData;
    fn data_mut(&mut self) -> &mut ProcessorData;

    /// Non-RT setup before the processor joins the graph
    fn configure(&mut self, _sample_rate: f32, _block_size: usize) {}

    /// RT event delivery, at most once per event, before `process_audio`
    /// of the same block
    fn process_event(&mut self, event: RtEvent);

    /// RT audio processing, once per block. `input` and `output` hold the
    /// processor's current channel counts and never alias.
    fn process_audio(
        &mut self,
        ctx: &ProcessContext,
        input: &SampleBuffer,
        output: &mut SampleBuffer,
    );

    /// True if the processor passes audio through internally while
    /// bypassed and must keep receiving process calls
    fn supports_soft_bypass(&self) -> bool {
        false
    }
}

/// Common addressable state every processor carries
pub struct ProcessorData {
    id: ObjectId,
    name: String,
    label: String,
    enabled: bool,
    bypassed: bool,
    input_channels: usize,
    output_channels: usize,
    max_input_channels: usize,
    max_output_channels: usize,
    program: u8,
    descriptors: Arc<Vec<ParameterDescriptor>>,
    parameters: Arc<ParameterStore>,
    outbox: Option<rtrb::Producer<RtEvent>>,
    outbox_dropped: u64,
    blobs: Option<Arc<BlobStore>>,
    host: Option<HostControl>,
}

impl ProcessorData {
    pub fn new(name: &str, label: &str, descriptors: Vec<ParameterDescriptor>) -> Self {
        let parameters = Arc::new(ParameterStore::from_descriptors(&descriptors));
        Self {
            id: ObjectId::new(),
            name: name.to_string(),
            label: label.to_string(),
            enabled: true,
            bypassed: false,
            input_channels: 2,
            output_channels: 2,
            max_input_channels: 2,
            max_output_channels: 2,
            program: 0,
            descriptors: Arc::new(descriptors),
            parameters,
            outbox: None,
            outbox_dropped: 0,
            blobs: None,
            host: None,
        }
    }

    pub fn with_max_channels(mut self, inputs: usize, outputs: usize) -> Self {
        self.max_input_channels = inputs;
        self.max_output_channels = outputs;
        self.input_channels = self.input_channels.min(inputs);
        self.output_channels = self.output_channels.min(outputs);
        self
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[inline]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    #[inline]
    pub fn bypassed(&self) -> bool {
        self.bypassed
    }

    pub fn set_bypassed(&mut self, bypassed: bool) {
        self.bypassed = bypassed;
    }

    #[inline]
    pub fn input_channels(&self) -> usize {
        self.input_channels
    }

    #[inline]
    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    /// Only valid while the processor is not in the active graph, or
    /// between blocks
    pub fn set_input_channels(&mut self, channels: usize) {
        self.input_channels = channels.min(self.max_input_channels);
    }

    pub fn set_output_channels(&mut self, channels: usize) {
        self.output_channels = channels.min(self.max_output_channels);
    }

    #[inline]
    pub fn program(&self) -> u8 {
        self.program
    }

    pub fn descriptors(&self) -> &Arc<Vec<ParameterDescriptor>> {
        &self.descriptors
    }

    pub fn parameters(&self) -> &Arc<ParameterStore> {
        &self.parameters
    }

    /// Current domain value of a parameter (RT read)
    #[inline]
    pub fn parameter(&self, index: u32) -> f32 {
        self.parameters.value(index)
    }

    /// Engine wiring at add time: outbox producer and blob table
    pub fn attach(&mut self, outbox: rtrb::Producer<RtEvent>, blobs: Arc<BlobStore>) {
        self.outbox = Some(outbox);
        self.blobs = Some(blobs);
    }

    pub fn blobs(&self) -> Option<&Arc<BlobStore>> {
        self.blobs.as_ref()
    }

    /// Engine wiring at construction time (non-RT)
    pub fn set_host(&mut self, host: HostControl) {
        self.host = Some(host);
    }

    /// The host facade, present once the engine has adopted the processor
    pub fn host(&self) -> Option<&HostControl> {
        self.host.as_ref()
    }

    /// Push an event into the outbox; drops (and counts) when full
    pub fn output_event(&mut self, event: RtEvent) {
        match self.outbox.as_mut() {
            Some(outbox) => {
                if outbox.push(event).is_err() {
                    self.outbox_dropped += 1;
                }
            }
            None => self.outbox_dropped += 1,
        }
    }

    pub fn outbox_dropped(&self) -> u64 {
        self.outbox_dropped
    }

    /// Post a deferred work request from the RT thread; the handler must
    /// have been registered with the pipeline at configure time
    pub fn request_non_rt_work(&mut self, callback_id: u32, data: &[u8]) {
        let source = self.id;
        self.output_event(RtEvent::new(
            0,
            RtEventPayload::AsyncWorkRequest {
                source,
                callback_id,
                data: InlineBlob::from_slice(data),
            },
        ));
    }

    /// Handle the event kinds every processor treats the same way.
    /// Returns true if the event was consumed.
    ///
    /// Parameter changes land in the RT value store and are echoed to the
    /// control plane as normalized notifications.
    pub fn handle_common_event(&mut self, event: &RtEvent) -> bool {
        match event.payload {
            RtEventPayload::ParameterChange { index, value, .. } => {
                self.parameters.set(index, value.as_f32());
                if let Some(desc) = self.descriptors.get(index as usize) {
                    let normalized = desc.normalize(value.as_f32());
                    let source = self.id;
                    self.output_event(RtEvent::new(
                        event.sample_offset,
                        RtEventPayload::ParameterNotification {
                            source,
                            index,
                            normalized,
                        },
                    ));
                }
                true
            }
            RtEventPayload::ProgramChange { program, .. } => {
                self.program = program;
                true
            }
            RtEventPayload::SetBypass { bypassed, .. } => {
                self.bypassed = bypassed;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reef_event::ParameterValue;

    fn data_with_gain() -> ProcessorData {
        ProcessorData::new(
            "test",
            "Test",
            vec![ParameterDescriptor::float(0, "gain", "Gain", "dB", -60.0, 12.0)],
        )
    }

    #[test]
    fn names_and_ids() {
        let data = data_with_gain();
        assert_eq!(data.name(), "test");
        assert!(!data.id().is_none());
    }

    #[test]
    fn channel_counts_respect_maxima() {
        let mut data = data_with_gain().with_max_channels(2, 2);
        data.set_input_channels(8);
        assert_eq!(data.input_channels(), 2);
    }

    #[test]
    fn common_events_update_the_store() {
        let mut data = data_with_gain();
        let (tx, mut rx) = rtrb::RingBuffer::new(8);
        data.attach(tx, Arc::new(BlobStore::new(4)));

        let consumed = data.handle_common_event(&RtEvent::new(
            3,
            RtEventPayload::ParameterChange {
                target: data.id(),
                index: 0,
                value: ParameterValue::Float(-24.0),
            },
        ));
        assert!(consumed);
        assert!((data.parameter(0) - -24.0).abs() < 1e-6);

        // A normalized notification went out
        let note = rx.pop().unwrap();
        match note.payload {
            RtEventPayload::ParameterNotification {
                index, normalized, ..
            } => {
                assert_eq!(index, 0);
                assert!((normalized - 0.5).abs() < 1e-6);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(note.sample_offset, 3);
    }

    #[test]
    fn outbox_overflow_is_counted() {
        let mut data = data_with_gain();
        let (tx, _rx) = rtrb::RingBuffer::new(1);
        data.attach(tx, Arc::new(BlobStore::new(4)));

        let event = RtEvent::new(
            0,
            RtEventPayload::ProcessorRemoved { id: ObjectId::NONE },
        );
        data.output_event(event);
        data.output_event(event);
        assert_eq!(data.outbox_dropped(), 1);
    }
}
