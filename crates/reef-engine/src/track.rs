//! Tracks
//!
//! A track is a processor whose body is an ordered sequence of child
//! processors running on an internal bus. Input routes add engine input
//! channels into the bus, children run in order over two swapped scratch
//! buffers, and output routes add the result into engine output channels.
//! Routes targeting the same destination are additive.

use reef_core::{ObjectId, Sample, SampleBuffer, MAX_ENGINE_CHANNELS};
use reef_event::{RtEvent, RtEventPayload};
use smallvec::SmallVec;

use crate::bypass::BypassRamp;
use crate::processor::{ProcessContext, Processor, ProcessorData};

/// Maximum processors per track
pub const MAX_TRACK_PROCESSORS: usize = 16;

/// Maximum routes per direction per track
pub const MAX_TRACK_ROUTES: usize = 8;

/// One engine-channel to track-channel association
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRoute {
    pub engine_channel: usize,
    pub track_channel: usize,
}

/// A child processor with its outbox consumer and bypass ramp
pub struct ChildSlot {
    pub processor: Box<dyn Processor>,
    pub outbox_rx: rtrb::Consumer<RtEvent>,
    pub bypass: BypassRamp,
}

pub struct Track {
    data: ProcessorData,
    channels: usize,
    sample_rate: f32,
    children: Vec<ChildSlot>,
    /// Ping-pong scratch pair for chaining children
    bufs: [SampleBuffer; 2],
    input_routes: SmallVec<[ChannelRoute; MAX_TRACK_ROUTES]>,
    output_routes: SmallVec<[ChannelRoute; MAX_TRACK_ROUTES]>,
}

impl Track {
    pub fn new(name: &str, channels: usize, sample_rate: f32, block_size: usize) -> Self {
        let channels = channels.clamp(1, MAX_ENGINE_CHANNELS);
        let mut data = ProcessorData::new(name, name, Vec::new())
            .with_max_channels(MAX_ENGINE_CHANNELS, MAX_ENGINE_CHANNELS);
        data.set_input_channels(channels);
        data.set_output_channels(channels);
        Self {
            data,
            channels,
            sample_rate,
            children: Vec::with_capacity(MAX_TRACK_PROCESSORS),
            bufs: [
                SampleBuffer::new(channels, block_size),
                SampleBuffer::new(channels, block_size),
            ],
            input_routes: SmallVec::new(),
            output_routes: SmallVec::new(),
        }
    }

    #[inline]
    pub fn channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn id(&self) -> ObjectId {
        self.data.id()
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn input_routes(&self) -> &[ChannelRoute] {
        &self.input_routes
    }

    pub fn output_routes(&self) -> &[ChannelRoute] {
        &self.output_routes
    }

    /// RT-safe: pushes within preallocated capacity only
    pub fn add_input_route(&mut self, route: ChannelRoute) -> bool {
        if self.input_routes.len() >= MAX_TRACK_ROUTES || route.track_channel >= self.channels {
            return false;
        }
        self.input_routes.push(route);
        true
    }

    pub fn add_output_route(&mut self, route: ChannelRoute) -> bool {
        if self.output_routes.len() >= MAX_TRACK_ROUTES || route.track_channel >= self.channels {
            return false;
        }
        self.output_routes.push(route);
        true
    }

    /// RT-safe: append a prepared child. The processor arrives with its
    /// channel counts already matched to the track bus. On failure the
    /// processor is handed back so the caller can dispose of it off-thread.
    #[allow(clippy::type_complexity)]
    pub fn add_child(
        &mut self,
        processor: Box<dyn Processor>,
        outbox_rx: rtrb::Consumer<RtEvent>,
    ) -> Result<(), (Box<dyn Processor>, rtrb::Consumer<RtEvent>)> {
        if self.children.len() >= MAX_TRACK_PROCESSORS
            || processor.data().input_channels() != self.channels
            || processor.data().output_channels() != self.channels
        {
            return Err((processor, outbox_rx));
        }
        self.children.push(ChildSlot {
            processor,
            outbox_rx,
            bypass: BypassRamp::new(self.sample_rate),
        });
        Ok(())
    }

    /// RT-safe removal; the caller ships the slot off for non-RT teardown
    pub fn remove_child(&mut self, id: ObjectId) -> Option<ChildSlot> {
        let index = self
            .children
            .iter()
            .position(|slot| slot.processor.data().id() == id)?;
        Some(self.children.remove(index))
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        for slot in &mut self.children {
            slot.bypass.set_sample_rate(sample_rate);
        }
    }

    /// Route an event to this track or one of its children. Returns false
    /// if the target is not resident here.
    pub fn deliver_event(&mut self, target: ObjectId, event: RtEvent) -> bool {
        if target == self.data.id() {
            self.process_event(event);
            return true;
        }
        for slot in &mut self.children {
            if slot.processor.data().id() == target {
                if let RtEventPayload::SetBypass { bypassed, .. } = event.payload {
                    slot.bypass.set_bypassed(bypassed);
                }
                slot.processor.process_event(event);
                return true;
            }
        }
        false
    }

    /// Drain every child outbox into `f`
    pub fn flush_outboxes(&mut self, mut f: impl FnMut(RtEvent)) {
        for slot in &mut self.children {
            while let Ok(event) = slot.outbox_rx.pop() {
                f(event);
            }
        }
    }

    /// Sum of child outbox drop counters
    pub fn outbox_dropped(&self) -> u64 {
        self.children
            .iter()
            .map(|slot| slot.processor.data().outbox_dropped())
            .sum()
    }
}

fn run_child(slot: &mut ChildSlot, ctx: &ProcessContext, src: &SampleBuffer, dst: &mut SampleBuffer) {
    let soft = slot.processor.supports_soft_bypass();
    if !slot.processor.data().enabled() {
        dst.passthrough_from(src);
        return;
    }
    if slot.bypass.fully_bypassed() {
        if soft {
            slot.processor.process_audio(ctx, src, dst);
        } else {
            dst.passthrough_from(src);
        }
        return;
    }
    slot.processor.process_audio(ctx, src, dst);
    if slot.bypass.ramping() {
        slot.bypass.blend(src, dst);
    }
}

impl Processor for Track {
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
        // Keyboard events addressed to the track fan out to every child,
        // still ahead of this block's process_audio calls
        if matches!(event.payload, RtEventPayload::Keyboard { .. }) {
            for slot in &mut self.children {
                slot.processor.process_event(event);
            }
        }
    }

    fn process_audio(
        &mut self,
        ctx: &ProcessContext,
        input: &SampleBuffer,
        output: &mut SampleBuffer,
    ) {
        if self.data.bypassed() {
            output.passthrough_from(input);
            return;
        }

        self.bufs[0].passthrough_from(input);
        let (front, back) = self.bufs.split_at_mut(1);
        let mut flipped = false;
        for slot in &mut self.children {
            let (src, dst) = if !flipped {
                (&front[0], &mut back[0])
            } else {
                (&back[0], &mut front[0])
            };
            run_child(slot, ctx, src, dst);
            flipped = !flipped;
        }

        let result = if flipped { &back[0] } else { &front[0] };
        output.passthrough_from(result);
    }
}

/// Expand a bus index into its channel pair (bus b = channels 2b, 2b+1)
#[inline]
pub fn bus_channels(bus: usize) -> (usize, usize) {
    (bus * 2, bus * 2 + 1)
}

/// Input gather used by the graph: the track's declared input routes add
/// engine channels into a cleared bus buffer.
pub fn assemble_input(track: &Track, engine_input: &[Sample], bus: &mut SampleBuffer) {
    bus.clear();
    let engine_channels = if bus.frames() == 0 {
        0
    } else {
        engine_input.len() / bus.frames()
    };
    for route in track.input_routes() {
        if route.engine_channel < engine_channels {
            bus.add_channel_from_slice(route.track_channel, engine_input, route.engine_channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{Gain, Passthrough};
    use crate::testing::run_block;

    fn child(track: &Track, plugin: impl Processor + 'static) -> (Box<dyn Processor>, rtrb::Consumer<RtEvent>) {
        let mut plugin: Box<dyn Processor> = Box::new(plugin);
        plugin.data_mut().set_input_channels(track.channels());
        plugin.data_mut().set_output_channels(track.channels());
        let (tx, rx) = rtrb::RingBuffer::new(16);
        plugin
            .data_mut()
            .attach(tx, std::sync::Arc::new(reef_event::BlobStore::new(4)));
        (plugin, rx)
    }

    #[test]
    fn children_run_in_order() {
        let mut track = Track::new("left", 1, 48000.0, 8);
        let (p1, rx1) = child(&track, Passthrough::new("p1", "P1"));
        let (p2, rx2) = child(&track, Gain::new("g1", "G1"));
        assert!(track.add_child(p1, rx1).is_ok());
        assert!(track.add_child(p2, rx2).is_ok());
        assert_eq!(track.child_count(), 2);

        let mut input = SampleBuffer::new(1, 8);
        input.channel_mut(0).fill(0.5);
        let output = run_block(&mut track, &input);
        assert_eq!(output.channel(0), &[0.5; 8]);
    }

    #[test]
    fn channel_mismatch_is_rejected() {
        let mut track = Track::new("t", 2, 48000.0, 8);
        let mut plugin: Box<dyn Processor> = Box::new(Gain::new("g", "G"));
        plugin.data_mut().set_input_channels(1);
        plugin.data_mut().set_output_channels(1);
        let (_tx, rx) = rtrb::RingBuffer::new(4);
        assert!(track.add_child(plugin, rx).is_err());
    }

    #[test]
    fn route_bounds_are_enforced() {
        let mut track = Track::new("t", 1, 48000.0, 8);
        assert!(track.add_input_route(ChannelRoute {
            engine_channel: 0,
            track_channel: 0
        }));
        assert!(!track.add_input_route(ChannelRoute {
            engine_channel: 0,
            track_channel: 1
        }));
    }

    #[test]
    fn keyboard_events_fan_out_to_children() {
        let mut track = Track::new("t", 1, 48000.0, 8);
        let (p1, rx1) = child(&track, Passthrough::new("p1", "P1"));
        let id = p1.data().id();
        assert!(track.add_child(p1, rx1).is_ok());

        track.process_event(RtEvent::new(
            0,
            RtEventPayload::Keyboard {
                target: track.id(),
                event: reef_event::KeyboardEvent::NoteOn {
                    note: 60,
                    velocity: 1.0,
                },
            },
        ));

        // The passthrough child forwarded the note to its outbox
        let mut found = false;
        track.flush_outboxes(|event| {
            if let RtEventPayload::KeyboardNotification { source, .. } = event.payload {
                assert_eq!(source, id);
                found = true;
            }
        });
        assert!(found);
    }

    #[test]
    fn removal_returns_the_slot() {
        let mut track = Track::new("t", 1, 48000.0, 8);
        let (p1, rx1) = child(&track, Gain::new("g", "G"));
        let id = p1.data().id();
        assert!(track.add_child(p1, rx1).is_ok());

        let slot = track.remove_child(id).unwrap();
        assert_eq!(slot.processor.data().id(), id);
        assert_eq!(track.child_count(), 0);
        assert!(track.remove_child(id).is_none());
    }

    #[test]
    fn bus_channel_expansion() {
        assert_eq!(bus_channels(0), (0, 1));
        assert_eq!(bus_channels(2), (4, 5));
    }
}
