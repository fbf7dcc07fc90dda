//! Engine control side
//!
//! The thread-safe half of the engine. Control threads validate every
//! operation here, then apply it on the RT thread through the bounded
//! command queue; synchronous callers wait on a completion notification
//! with a millisecond timeout. Once a command is accepted it runs to
//! completion whether or not the caller is still waiting.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reef_core::{
    EngineError, EngineResult, ObjectId, SampleRate, DEFAULT_BLOCK_SIZE, MAX_ENGINE_CHANNELS,
};
use reef_event::{Event, EventListener, EventPipeline, PipelineCounters};

use crate::graph::{
    status, AudioGraph, EngineCommand, RemovedUnit, TrackSlot, COMMAND_QUEUE_CAPACITY,
    GARBAGE_CAPACITY, MAX_TRACKS,
};
use crate::host_control::HostControl;
use crate::plugins::{PluginCatalog, PluginType};
use crate::processor::{Processor, OUTBOX_CAPACITY};
use crate::registry::{ProcessorRegistry, RegistryEntry};
use crate::track::{bus_channels, Track, MAX_TRACK_PROCESSORS};
use reef_core::SampleBuffer;

/// Default wait for synchronous control operations
pub const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_millis(1000);

pub struct Engine {
    pipeline: Arc<EventPipeline>,
    registry: Arc<ProcessorRegistry>,
    catalog: PluginCatalog,
    command_tx: Mutex<rtrb::Producer<EngineCommand>>,
    garbage_rx: Mutex<rtrb::Consumer<RemovedUnit>>,
    clock: Arc<AtomicU64>,
    sample_rate: Mutex<f32>,
    block_size: usize,
    input_channels: AtomicUsize,
    output_channels: AtomicUsize,
    timeout: Mutex<Duration>,
    /// Control-side mirror of applied routes, for export and inspection:
    /// track id -> (input routes, output routes) as (engine, track) pairs
    routes: Mutex<std::collections::HashMap<u64, TrackRoutes>>,
}

/// Applied channel routes of one track, control-plane copy
#[derive(Debug, Clone, Default)]
pub struct TrackRoutes {
    pub inputs: Vec<(usize, usize)>,
    pub outputs: Vec<(usize, usize)>,
}

impl Engine {
    /// Build the engine pair: the thread-safe control side and the RT
    /// graph the audio backend will drive
    pub fn new(sample_rate: f32, block_size: usize) -> (Arc<Engine>, AudioGraph) {
        let pipeline = Arc::new(EventPipeline::new());
        let (command_tx, command_rx) = rtrb::RingBuffer::new(COMMAND_QUEUE_CAPACITY);
        let (garbage_tx, garbage_rx) = rtrb::RingBuffer::new(GARBAGE_CAPACITY);
        let clock = Arc::new(AtomicU64::new(0));

        let graph = AudioGraph::new(
            sample_rate,
            block_size,
            command_rx,
            garbage_tx,
            pipeline.shared(),
            clock.clone(),
        );

        let engine = Arc::new(Self {
            pipeline,
            registry: Arc::new(ProcessorRegistry::new()),
            catalog: PluginCatalog::with_internal_plugins(),
            command_tx: Mutex::new(command_tx),
            garbage_rx: Mutex::new(garbage_rx),
            clock,
            sample_rate: Mutex::new(sample_rate),
            block_size,
            input_channels: AtomicUsize::new(2),
            output_channels: AtomicUsize::new(2),
            timeout: Mutex::new(DEFAULT_CONTROL_TIMEOUT),
            routes: Mutex::new(std::collections::HashMap::new()),
        });
        log::info!(
            "engine up: {sample_rate} Hz, block {block_size}, max {MAX_TRACKS} tracks x {MAX_TRACK_PROCESSORS} plugins"
        );
        (engine, graph)
    }

    pub fn with_defaults() -> (Arc<Engine>, AudioGraph) {
        Self::new(SampleRate::default().as_f32(), DEFAULT_BLOCK_SIZE)
    }

    pub fn sample_rate(&self) -> f32 {
        *self.sample_rate.lock()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn input_channels(&self) -> usize {
        self.input_channels.load(Ordering::Relaxed)
    }

    pub fn output_channels(&self) -> usize {
        self.output_channels.load(Ordering::Relaxed)
    }

    pub fn registry(&self) -> &Arc<ProcessorRegistry> {
        &self.registry
    }

    pub fn pipeline(&self) -> &Arc<EventPipeline> {
        &self.pipeline
    }

    pub fn counters(&self) -> PipelineCounters {
        self.pipeline.counters()
    }

    pub fn set_control_timeout(&self, timeout: Duration) {
        *self.timeout.lock() = timeout;
    }

    /// Host facade for processors and frontends
    pub fn host_control(&self) -> HostControl {
        HostControl::new(
            self.pipeline.clone(),
            self.clock.clone(),
            self.sample_rate(),
            self.block_size,
        )
    }

    /// Engine clock in samples since start, as of the last block
    pub fn current_time(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    /// Post an event; the usual entry for MIDI, control surfaces and
    /// scheduled events
    pub fn post_event(&self, event: Event) -> EngineResult<()> {
        if self.pipeline.post(event) {
            Ok(())
        } else {
            Err(EngineError::QueueFull)
        }
    }

    pub fn register_listener(&self, listener: Box<dyn EventListener>) {
        self.pipeline.register_listener(listener);
    }

    // ── Graph operations ───────────────────────────────────────────────

    pub fn create_track(&self, name: &str, channels: usize) -> EngineResult<ObjectId> {
        if channels == 0 || channels > MAX_ENGINE_CHANNELS {
            return Err(EngineError::InvalidChannelCount(channels));
        }
        if self.registry.contains_name(name) {
            return Err(EngineError::InvalidTrackName(name.to_string()));
        }

        let sample_rate = self.sample_rate();
        let mut track = Box::new(Track::new(name, channels, sample_rate, self.block_size));
        let (outbox_tx, outbox_rx) = rtrb::RingBuffer::new(OUTBOX_CAPACITY);
        track
            .data_mut()
            .attach(outbox_tx, self.pipeline.shared().blobs.clone());
        track.data_mut().set_host(self.host_control());
        track.configure(sample_rate, self.block_size);

        let id = track.id();
        let entry = RegistryEntry {
            id,
            name: name.to_string(),
            label: name.to_string(),
            is_track: true,
            track: None,
            channels,
            uid: String::new(),
            plugin_type: None,
            descriptors: track.data().descriptors().clone(),
            parameters: track.data().parameters().clone(),
        };

        let slot = TrackSlot {
            track,
            outbox_rx,
            in_buf: SampleBuffer::new(channels, self.block_size),
            out_buf: SampleBuffer::new(channels, self.block_size),
        };
        self.apply(|command_id| EngineCommand::AddTrack { slot, command_id })?;
        self.registry.insert(entry);
        log::info!("created track \"{name}\" with {channels} channels");
        Ok(id)
    }

    pub fn delete_track(&self, name: &str) -> EngineResult<()> {
        let entry = self.registry.resolve_track(name)?;
        self.apply(|command_id| EngineCommand::RemoveTrack {
            id: entry.id,
            command_id,
        })?;
        for plugin in self.registry.plugins_of(entry.id) {
            self.pipeline.unregister_work_callbacks(plugin.id);
        }
        self.registry.remove(entry.id);
        self.routes.lock().remove(&entry.id.raw());
        self.collect_garbage();
        log::info!("deleted track \"{name}\"");
        Ok(())
    }

    pub fn add_plugin_to_track(
        &self,
        track_name: &str,
        uid: &str,
        name: &str,
        path: &str,
        kind: PluginType,
    ) -> EngineResult<ObjectId> {
        let track_entry = self.registry.resolve_track(track_name)?;
        if self.registry.contains_name(name) {
            return Err(EngineError::InvalidPluginName(name.to_string()));
        }

        let mut processor = self.catalog.create(kind, uid, name, path)?;
        let sample_rate = self.sample_rate();
        processor.data_mut().set_input_channels(track_entry.channels);
        processor
            .data_mut()
            .set_output_channels(track_entry.channels);
        if processor.data().input_channels() != track_entry.channels
            || processor.data().output_channels() != track_entry.channels
        {
            return Err(EngineError::InvalidChannelCount(track_entry.channels));
        }
        let (outbox_tx, outbox_rx) = rtrb::RingBuffer::new(OUTBOX_CAPACITY);
        processor
            .data_mut()
            .attach(outbox_tx, self.pipeline.shared().blobs.clone());
        processor.data_mut().set_host(self.host_control());
        processor.configure(sample_rate, self.block_size);

        let id = processor.data().id();
        let entry = RegistryEntry {
            id,
            name: name.to_string(),
            label: processor.data().label().to_string(),
            is_track: false,
            track: Some(track_entry.id),
            channels: track_entry.channels,
            uid: if uid.is_empty() { path.to_string() } else { uid.to_string() },
            plugin_type: Some(kind),
            descriptors: processor.data().descriptors().clone(),
            parameters: processor.data().parameters().clone(),
        };

        let status = self.apply_status(|command_id| EngineCommand::AddProcessor {
            track: track_entry.id,
            processor,
            outbox_rx,
            command_id,
        })?;
        match status {
            status::OK => {
                self.registry.insert(entry);
                log::info!("added plugin \"{name}\" ({uid}) to track \"{track_name}\"");
                Ok(id)
            }
            status::NO_SUCH_TARGET => Err(EngineError::InvalidTrackName(track_name.to_string())),
            _ => Err(EngineError::InvalidChannelCount(track_entry.channels)),
        }
    }

    pub fn remove_plugin_from_track(&self, name: &str) -> EngineResult<()> {
        let entry = self.registry.resolve(name)?;
        if entry.is_track || entry.track.is_none() {
            return Err(EngineError::InvalidProcessor(name.to_string()));
        }
        self.apply(|command_id| EngineCommand::RemoveProcessor {
            id: entry.id,
            command_id,
        })?;
        self.pipeline.unregister_work_callbacks(entry.id);
        self.registry.remove(entry.id);
        self.collect_garbage();
        log::info!("removed plugin \"{name}\"");
        Ok(())
    }

    pub fn connect_audio_input_channel(
        &self,
        engine_channel: usize,
        track_channel: usize,
        track_name: &str,
    ) -> EngineResult<()> {
        let entry = self.registry.resolve_track(track_name)?;
        if engine_channel >= self.input_channels() || track_channel >= entry.channels {
            return Err(EngineError::InvalidChannelCount(engine_channel.max(track_channel)));
        }
        let status = self.apply_status(|command_id| EngineCommand::ConnectInput {
            track: entry.id,
            engine_channel,
            track_channel,
            command_id,
        })?;
        self.check_route_status(status, engine_channel)?;
        self.routes
            .lock()
            .entry(entry.id.raw())
            .or_default()
            .inputs
            .push((engine_channel, track_channel));
        Ok(())
    }

    pub fn connect_audio_output_channel(
        &self,
        engine_channel: usize,
        track_channel: usize,
        track_name: &str,
    ) -> EngineResult<()> {
        let entry = self.registry.resolve_track(track_name)?;
        if engine_channel >= self.output_channels() || track_channel >= entry.channels {
            return Err(EngineError::InvalidChannelCount(engine_channel.max(track_channel)));
        }
        let status = self.apply_status(|command_id| EngineCommand::ConnectOutput {
            track: entry.id,
            engine_channel,
            track_channel,
            command_id,
        })?;
        self.check_route_status(status, engine_channel)?;
        self.routes
            .lock()
            .entry(entry.id.raw())
            .or_default()
            .outputs
            .push((engine_channel, track_channel));
        Ok(())
    }

    /// Bus shorthand: bus b covers channels 2b and 2b+1 on both sides
    pub fn connect_audio_input_bus(
        &self,
        engine_bus: usize,
        track_bus: usize,
        track_name: &str,
    ) -> EngineResult<()> {
        let (engine_left, engine_right) = bus_channels(engine_bus);
        let (track_left, track_right) = bus_channels(track_bus);
        self.connect_audio_input_channel(engine_left, track_left, track_name)?;
        self.connect_audio_input_channel(engine_right, track_right, track_name)
    }

    pub fn connect_audio_output_bus(
        &self,
        engine_bus: usize,
        track_bus: usize,
        track_name: &str,
    ) -> EngineResult<()> {
        let (engine_left, engine_right) = bus_channels(engine_bus);
        let (track_left, track_right) = bus_channels(track_bus);
        self.connect_audio_output_channel(engine_left, track_left, track_name)?;
        self.connect_audio_output_channel(engine_right, track_right, track_name)
    }

    pub fn set_audio_input_channels(&self, channels: usize) -> EngineResult<()> {
        if channels > MAX_ENGINE_CHANNELS {
            return Err(EngineError::InvalidChannelCount(channels));
        }
        self.apply(|command_id| EngineCommand::SetInputChannels {
            channels,
            command_id,
        })?;
        self.input_channels.store(channels, Ordering::Relaxed);
        Ok(())
    }

    pub fn set_audio_output_channels(&self, channels: usize) -> EngineResult<()> {
        if channels > MAX_ENGINE_CHANNELS {
            return Err(EngineError::InvalidChannelCount(channels));
        }
        self.apply(|command_id| EngineCommand::SetOutputChannels {
            channels,
            command_id,
        })?;
        self.output_channels.store(channels, Ordering::Relaxed);
        Ok(())
    }

    pub fn set_sample_rate(&self, sample_rate: f32) -> EngineResult<()> {
        if !self.registry.tracks().is_empty() {
            log::warn!("sample rate change with resident tracks; processors keep their configured rate");
        }
        self.apply(|command_id| EngineCommand::SetSampleRate {
            sample_rate,
            command_id,
        })?;
        *self.sample_rate.lock() = sample_rate;
        log::info!("engine sample rate set to {sample_rate}");
        Ok(())
    }

    /// Applied routes of a track, control-plane copy
    pub fn routes_of(&self, track: ObjectId) -> TrackRoutes {
        self.routes
            .lock()
            .get(&track.raw())
            .cloned()
            .unwrap_or_default()
    }

    /// Drop processors the RT thread has handed back
    pub fn collect_garbage(&self) {
        let mut garbage = self.garbage_rx.lock();
        while let Ok(unit) = garbage.pop() {
            match unit {
                RemovedUnit::Track(slot) => {
                    log::debug!("destroying removed track \"{}\"", slot.track.data().name())
                }
                RemovedUnit::Processor(processor, _outbox) => {
                    log::debug!("destroying removed processor \"{}\"", processor.data().name())
                }
            }
        }
    }

    // ── Command plumbing ───────────────────────────────────────────────

    fn apply(&self, build: impl FnOnce(u64) -> EngineCommand) -> EngineResult<()> {
        let status = self.apply_status(build)?;
        if status == status::OK {
            Ok(())
        } else {
            Err(command_error(status))
        }
    }

    /// Push a command and wait for the RT thread to report it applied
    fn apply_status(&self, build: impl FnOnce(u64) -> EngineCommand) -> EngineResult<i32> {
        let completions = self.pipeline.shared();
        let (command_id, waiter) = completions.completions().register();
        {
            let mut tx = self.command_tx.lock();
            if tx.push(build(command_id)).is_err() {
                completions.completions().cancel(command_id);
                return Err(EngineError::QueueFull);
            }
        }
        match waiter.wait(*self.timeout.lock()) {
            Some(status) => Ok(status),
            None => Err(EngineError::TimedOut),
        }
    }

    fn check_route_status(&self, status_code: i32, channel: usize) -> EngineResult<()> {
        match status_code {
            status::OK => Ok(()),
            status::BAD_CHANNEL => Err(EngineError::InvalidChannelCount(channel)),
            other => Err(command_error(other)),
        }
    }
}

/// Map an RT command status to the control-API error it implies. These
/// only fire when the graph disagrees with the registry view, e.g. a
/// target removed between validation and application.
fn command_error(status_code: i32) -> EngineError {
    match status_code {
        status::NO_SUCH_TARGET => EngineError::InvalidProcessor("target not resident".to_string()),
        status::CAPACITY_EXCEEDED => EngineError::QueueFull,
        status::BAD_CHANNEL => EngineError::InvalidChannelCount(0),
        _ => EngineError::QueueFull,
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.collect_garbage();
    }
}
