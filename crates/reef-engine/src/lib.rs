//! reef-engine: Audio graph and routing engine for the reef host
//!
//! The core of the host:
//! - the `Processor` contract and common processor state
//! - `Track`: ordered processor chains over an internal bus
//! - `AudioGraph`: RT block processing with the command queue
//! - `Engine`: the thread-safe control side
//! - `Transport`, engine bypass ramps, MIDI routing and the control
//!   surface facade

mod bypass;
mod controller;
mod engine;
mod graph;
mod host_control;
mod midi_dispatcher;
mod plugins;
mod processor;
mod registry;
mod track;
mod transport;

pub use bypass::{BypassRamp, BypassState, BYPASS_RAMP_MS};
pub use controller::{Controller, ProcessorInfo};
pub use engine::{Engine, TrackRoutes, DEFAULT_CONTROL_TIMEOUT};
pub use graph::{
    status, AudioGraph, EngineCommand, RemovedUnit, TrackSlot, COMMAND_QUEUE_CAPACITY,
    GARBAGE_CAPACITY, MAX_TRACKS,
};
pub use host_control::HostControl;
pub use midi_dispatcher::{
    MidiConnectionDump, MidiDispatcher, MidiEgress, MidiOutputSink, OutputConnection,
    ParamConnection, TrackConnection,
};
pub use plugins::{Equalizer, Gain, MonoSummer, Passthrough, PluginCatalog, PluginType};
pub use processor::{ProcessContext, Processor, ProcessorData, OUTBOX_CAPACITY};
pub use registry::{ProcessorRegistry, RegistryEntry};
pub use track::{
    bus_channels, ChannelRoute, ChildSlot, Track, MAX_TRACK_PROCESSORS, MAX_TRACK_ROUTES,
};
pub use transport::Transport;
