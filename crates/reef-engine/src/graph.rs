//! The audio graph
//!
//! RT half of the engine: an ordered set of tracks with global channel
//! routing, processed once per fixed-size block. Per block, in this order:
//!
//! 1. apply queued engine commands, then drain inbound events up to the
//!    block horizon and dispatch them by target
//! 2. advance the transport by the block size
//! 3. run tracks in declaration order: gather inputs, process, sum outputs
//! 4. publish processor outboxes to the outbound queue
//!
//! Everything here is preallocated; nothing on this path allocates, blocks
//! or takes a contended lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use reef_core::{ObjectId, Sample, SampleBuffer, MAX_ENGINE_CHANNELS};
use reef_event::{
    Event, EventPayload, OutboundRtEvent, PipelineShared, RtEvent, RtEventDrain, RtEventPayload,
    PENDING_CAPACITY,
};

use crate::processor::{ProcessContext, Processor};
use crate::track::{assemble_input, Track};
use crate::transport::Transport;

/// Maximum tracks in the graph
pub const MAX_TRACKS: usize = 16;

/// Engine command queue capacity
pub const COMMAND_QUEUE_CAPACITY: usize = 256;

/// Removed-unit garbage ring capacity
pub const GARBAGE_CAPACITY: usize = 64;

/// Command application status codes reported back to waiters
pub mod status {
    pub const OK: i32 = 0;
    pub const NO_SUCH_TARGET: i32 = 1;
    pub const CAPACITY_EXCEEDED: i32 = 2;
    pub const BAD_CHANNEL: i32 = 3;
}

/// A track prepared off-thread, ready to splice into the graph
pub struct TrackSlot {
    pub track: Box<Track>,
    pub outbox_rx: rtrb::Consumer<RtEvent>,
    pub in_buf: SampleBuffer,
    pub out_buf: SampleBuffer,
}

/// Graph mutations, built and validated on the control thread, applied on
/// the RT thread at the next block boundary
pub enum EngineCommand {
    AddTrack {
        slot: TrackSlot,
        command_id: u64,
    },
    RemoveTrack {
        id: ObjectId,
        command_id: u64,
    },
    AddProcessor {
        track: ObjectId,
        processor: Box<dyn Processor>,
        outbox_rx: rtrb::Consumer<RtEvent>,
        command_id: u64,
    },
    RemoveProcessor {
        id: ObjectId,
        command_id: u64,
    },
    ConnectInput {
        track: ObjectId,
        engine_channel: usize,
        track_channel: usize,
        command_id: u64,
    },
    ConnectOutput {
        track: ObjectId,
        engine_channel: usize,
        track_channel: usize,
        command_id: u64,
    },
    SetInputChannels {
        channels: usize,
        command_id: u64,
    },
    SetOutputChannels {
        channels: usize,
        command_id: u64,
    },
    SetSampleRate {
        sample_rate: f32,
        command_id: u64,
    },
}

/// Ownership handed back from RT for non-RT destruction
pub enum RemovedUnit {
    Track(TrackSlot),
    Processor(Box<dyn Processor>, rtrb::Consumer<RtEvent>),
}

pub struct AudioGraph {
    tracks: Vec<TrackSlot>,
    transport: Transport,
    /// Monotonic engine clock in samples; never resets
    clock: u64,
    clock_shared: Arc<AtomicU64>,
    block_size: usize,
    input_channels: usize,
    output_channels: usize,
    sample_rate: f32,
    command_rx: rtrb::Consumer<EngineCommand>,
    garbage_tx: rtrb::Producer<RemovedUnit>,
    pipeline: Arc<PipelineShared>,
    drain: RtEventDrain,
    /// Inbound events whose target was not resident
    dropped_events: u64,
    /// Removed units lost because the garbage ring was full
    leaked_units: u64,
}

impl AudioGraph {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        sample_rate: f32,
        block_size: usize,
        command_rx: rtrb::Consumer<EngineCommand>,
        garbage_tx: rtrb::Producer<RemovedUnit>,
        pipeline: Arc<PipelineShared>,
        clock_shared: Arc<AtomicU64>,
    ) -> Self {
        Self {
            tracks: Vec::with_capacity(MAX_TRACKS),
            transport: Transport::new(sample_rate),
            clock: 0,
            clock_shared,
            block_size,
            input_channels: 2,
            output_channels: 2,
            sample_rate,
            command_rx,
            garbage_tx,
            pipeline,
            drain: RtEventDrain::new(PENDING_CAPACITY),
            dropped_events: 0,
            leaked_units: 0,
        }
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events + self.drain.overflowed()
    }

    /// Removed units that could not be handed back for destruction
    pub fn leaked_units(&self) -> u64 {
        self.leaked_units
    }

    /// Process one block. `input` holds `input_channels * block_size`
    /// samples channel-major; `output` symmetric. Buffers never alias.
    pub fn process(&mut self, input: &[Sample], output: &mut [Sample]) {
        debug_assert!(input.len() >= self.input_channels * self.block_size);
        debug_assert!(output.len() >= self.output_channels * self.block_size);

        output.fill(0.0);

        // 1. commands, then events up to this block's horizon
        self.apply_commands();
        let block_start = self.clock;
        let horizon_end = block_start + self.block_size as u64;
        let drain = &mut self.drain;
        let tracks = &mut self.tracks;
        let transport = &mut self.transport;
        let mut dropped = 0u64;
        drain.drain(&self.pipeline.to_rt, horizon_end, |event| {
            dispatch_event(tracks, transport, block_start, event, &mut dropped)
        });
        self.dropped_events += dropped;

        // 2. advance transport
        self.transport.advance_block(self.block_size as u64);

        // 3. tracks in declaration order
        let transport = &self.transport;
        let ctx = ProcessContext {
            transport,
            sample_rate: self.sample_rate,
            block_size: self.block_size,
        };
        for slot in self.tracks.iter_mut() {
            if !slot.track.data().enabled() {
                continue;
            }
            assemble_input(&slot.track, input, &mut slot.in_buf);
            slot.track.process_audio(&ctx, &slot.in_buf, &mut slot.out_buf);
            for route in slot.track.output_routes() {
                if route.engine_channel < self.output_channels {
                    slot.out_buf
                        .add_channel_to_slice(route.track_channel, output, route.engine_channel);
                }
            }
        }

        // 4. publish outboxes
        let pipeline = &self.pipeline;
        for slot in self.tracks.iter_mut() {
            while let Ok(event) = slot.outbox_rx.pop() {
                pipeline.from_rt.push(OutboundRtEvent { event, block_start });
            }
            slot.track.flush_outboxes(|event| {
                pipeline.from_rt.push(OutboundRtEvent { event, block_start });
            });
        }

        self.transport.end_block();
        self.clock = horizon_end;
        self.clock_shared.store(self.clock, Ordering::Release);
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.command_rx.pop() {
            let (command_id, status) = self.apply_command(command);
            self.pipeline.from_rt.push(OutboundRtEvent {
                event: RtEvent::new(
                    0,
                    RtEventPayload::CommandCompleted { command_id, status },
                ),
                block_start: self.clock,
            });
        }
    }

    fn apply_command(&mut self, command: EngineCommand) -> (u64, i32) {
        match command {
            EngineCommand::AddTrack { slot, command_id } => {
                if self.tracks.len() >= MAX_TRACKS {
                    self.discard(RemovedUnit::Track(slot));
                    return (command_id, status::CAPACITY_EXCEEDED);
                }
                self.tracks.push(slot);
                (command_id, status::OK)
            }
            EngineCommand::RemoveTrack { id, command_id } => {
                let Some(index) = self.tracks.iter().position(|slot| slot.track.id() == id)
                else {
                    return (command_id, status::NO_SUCH_TARGET);
                };
                let slot = self.tracks.remove(index);
                self.discard(RemovedUnit::Track(slot));
                self.notify_removed(id);
                (command_id, status::OK)
            }
            EngineCommand::AddProcessor {
                track,
                processor,
                outbox_rx,
                command_id,
            } => {
                let Some(index) = self.tracks.iter().position(|slot| slot.track.id() == track)
                else {
                    self.discard(RemovedUnit::Processor(processor, outbox_rx));
                    return (command_id, status::NO_SUCH_TARGET);
                };
                match self.tracks[index].track.add_child(processor, outbox_rx) {
                    Ok(()) => (command_id, status::OK),
                    Err((processor, outbox_rx)) => {
                        self.discard(RemovedUnit::Processor(processor, outbox_rx));
                        (command_id, status::CAPACITY_EXCEEDED)
                    }
                }
            }
            EngineCommand::RemoveProcessor { id, command_id } => {
                let mut removed = None;
                for slot in self.tracks.iter_mut() {
                    if let Some(child) = slot.track.remove_child(id) {
                        removed = Some(child);
                        break;
                    }
                }
                match removed {
                    Some(child) => {
                        self.discard(RemovedUnit::Processor(child.processor, child.outbox_rx));
                        self.notify_removed(id);
                        (command_id, status::OK)
                    }
                    None => (command_id, status::NO_SUCH_TARGET),
                }
            }
            EngineCommand::ConnectInput {
                track,
                engine_channel,
                track_channel,
                command_id,
            } => {
                if engine_channel >= self.input_channels {
                    return (command_id, status::BAD_CHANNEL);
                }
                match self.tracks.iter_mut().find(|slot| slot.track.id() == track) {
                    Some(slot) => {
                        if slot.track.add_input_route(crate::track::ChannelRoute {
                            engine_channel,
                            track_channel,
                        }) {
                            (command_id, status::OK)
                        } else {
                            (command_id, status::BAD_CHANNEL)
                        }
                    }
                    None => (command_id, status::NO_SUCH_TARGET),
                }
            }
            EngineCommand::ConnectOutput {
                track,
                engine_channel,
                track_channel,
                command_id,
            } => {
                if engine_channel >= self.output_channels {
                    return (command_id, status::BAD_CHANNEL);
                }
                match self.tracks.iter_mut().find(|slot| slot.track.id() == track) {
                    Some(slot) => {
                        if slot.track.add_output_route(crate::track::ChannelRoute {
                            engine_channel,
                            track_channel,
                        }) {
                            (command_id, status::OK)
                        } else {
                            (command_id, status::BAD_CHANNEL)
                        }
                    }
                    None => (command_id, status::NO_SUCH_TARGET),
                }
            }
            EngineCommand::SetInputChannels {
                channels,
                command_id,
            } => {
                if channels > MAX_ENGINE_CHANNELS {
                    return (command_id, status::BAD_CHANNEL);
                }
                self.input_channels = channels;
                (command_id, status::OK)
            }
            EngineCommand::SetOutputChannels {
                channels,
                command_id,
            } => {
                if channels > MAX_ENGINE_CHANNELS {
                    return (command_id, status::BAD_CHANNEL);
                }
                self.output_channels = channels;
                (command_id, status::OK)
            }
            EngineCommand::SetSampleRate {
                sample_rate,
                command_id,
            } => {
                self.sample_rate = sample_rate;
                self.transport.set_sample_rate(sample_rate);
                for slot in self.tracks.iter_mut() {
                    slot.track.set_sample_rate(sample_rate);
                }
                (command_id, status::OK)
            }
        }
    }

    /// Hand a removed unit back for non-RT destruction. If the garbage
    /// ring is full the unit is leaked rather than deallocated here.
    fn discard(&mut self, unit: RemovedUnit) {
        if let Err(rtrb::PushError::Full(unit)) = self.garbage_tx.push(unit) {
            std::mem::forget(unit);
            self.leaked_units += 1;
        }
    }

    fn notify_removed(&mut self, id: ObjectId) {
        self.pipeline.from_rt.push(OutboundRtEvent {
            event: RtEvent::new(0, RtEventPayload::ProcessorRemoved { id }),
            block_start: self.clock,
        });
    }
}

/// Dispatch one due inbound event. Graph-level events mutate the
/// transport; addressed events convert to the RT form and route to their
/// resident target. Unresolvable targets are counted and dropped.
fn dispatch_event(
    tracks: &mut [TrackSlot],
    transport: &mut Transport,
    block_start: u64,
    event: Event,
    dropped: &mut u64,
) {
    if let EventPayload::Transport(change) = event.payload {
        transport.apply(change);
        return;
    }

    let Some(target) = event.target() else {
        *dropped += 1;
        return;
    };
    let Some(rt_event) = event.to_rt(block_start) else {
        *dropped += 1;
        return;
    };
    for slot in tracks.iter_mut() {
        if slot.track.deliver_event(target, rt_event) {
            return;
        }
    }
    *dropped += 1;
}
