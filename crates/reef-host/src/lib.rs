//! reef-host: Configuration and host plumbing for the reef engine
//!
//! - `JsonConfigurator`: loads and validates the four-section JSON config
//!   (host_config, tracks, midi, events) and applies it through the
//!   control surface, with JSON-pointer error reporting
//! - config export for round-tripping a running graph
//! - parameter dump to JSON
//! - an offline frontend that drives the graph without an audio backend

mod config;
mod dump;
mod offline;

pub use config::{
    CcMappingConfig, ChannelSpec, EventConfig, JsonConfigurator, MidiSection, PluginConfig,
    PluginKind, ProgramChangeMappingConfig, RouteConfig, TrackConfig, TrackConnectionConfig,
    TrackMode, TrackOutConnectionConfig, TracksSection,
};
pub use dump::dump_parameters;
pub use offline::OfflineFrontend;
