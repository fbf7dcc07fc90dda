//! JSON configuration
//!
//! A configuration document has four top-level sections: `host_config`,
//! `tracks`, `midi` and `events`. Each loader validates its whole section
//! before touching the engine, so a rejected document never leaves a
//! partially-built graph behind; validation failures report a JSON
//! pointer to the offending node.

use std::path::Path;

use reef_core::{midi, EngineError, EngineResult, PlayState};
use reef_engine::{Controller, PluginType};
use reef_event::{Event, EventPayload, KeyboardEvent, ParameterValue, TransportChange};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ─── Section types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracksSection {
    pub tracks: Vec<TrackConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackConfig {
    pub name: String,
    pub mode: TrackMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<usize>,
    pub inputs: Vec<RouteConfig>,
    pub outputs: Vec<RouteConfig>,
    pub plugins: Vec<PluginConfig>,
}

impl TrackConfig {
    pub fn channel_count(&self) -> usize {
        match self.mode {
            TrackMode::Mono => 1,
            TrackMode::Stereo => 2,
            TrackMode::Multichannel => self.channels.unwrap_or(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackMode {
    Mono,
    Stereo,
    Multichannel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RouteConfig {
    Bus { engine_bus: usize, track_bus: usize },
    Channel {
        engine_channel: usize,
        track_channel: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PluginKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    Internal,
    Vst2x,
    Vst3x,
    Lv2,
}

impl From<PluginKind> for PluginType {
    fn from(kind: PluginKind) -> Self {
        match kind {
            PluginKind::Internal => PluginType::Internal,
            PluginKind::Vst2x => PluginType::Vst2x,
            PluginKind::Vst3x => PluginType::Vst3x,
            PluginKind::Lv2 => PluginType::Lv2,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MidiSection {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub track_connections: Vec<TrackConnectionConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub track_out_connections: Vec<TrackOutConnectionConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cc_mappings: Vec<CcMappingConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub program_change_mappings: Vec<ProgramChangeMappingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackConnectionConfig {
    pub port: u16,
    pub track: String,
    pub channel: ChannelSpec,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub raw_midi: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackOutConnectionConfig {
    pub port: u16,
    pub track: String,
    pub channel: ChannelSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CcMappingConfig {
    pub port: u16,
    pub plugin_name: String,
    pub parameter_name: String,
    pub cc_number: u8,
    pub min_range: f32,
    pub max_range: f32,
    pub channel: ChannelSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramChangeMappingConfig {
    pub port: u16,
    pub plugin_name: String,
    pub channel: ChannelSpec,
}

/// A channel number 0-16, or the string "omni"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChannelSpec {
    Number(u8),
    Keyword(String),
}

impl ChannelSpec {
    pub fn channel(&self) -> u8 {
        match self {
            ChannelSpec::Number(n) => *n,
            ChannelSpec::Keyword(_) => midi::OMNI,
        }
    }

    pub fn omni() -> Self {
        ChannelSpec::Keyword("omni".to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventConfig {
    ParameterChange {
        time: f64,
        processor: String,
        parameter: String,
        /// Normalized [0, 1]
        value: f64,
    },
    NoteOn {
        time: f64,
        track: String,
        note: u8,
        velocity: f64,
    },
    NoteOff {
        time: f64,
        track: String,
        note: u8,
        velocity: f64,
    },
    ProgramChange {
        time: f64,
        processor: String,
        program: u8,
    },
    PlayStateChange {
        time: f64,
        playing: bool,
    },
}

// ─── Configurator ───────────────────────────────────────────────────────────

enum JsonSection {
    HostConfig,
    Tracks,
    Midi,
    Events,
}

pub struct JsonConfigurator<'a> {
    controller: &'a Controller,
}

impl<'a> JsonConfigurator<'a> {
    pub fn new(controller: &'a Controller) -> Self {
        Self { controller }
    }

    pub fn load_host_config(&self, path: &Path) -> EngineResult<()> {
        let root = self.parse_file(path, JsonSection::HostConfig)?;
        self.apply_host_config(&root)
    }

    pub fn load_tracks(&self, path: &Path) -> EngineResult<()> {
        let root = self.parse_file(path, JsonSection::Tracks)?;
        self.apply_tracks(&root)
    }

    pub fn load_midi(&self, path: &Path) -> EngineResult<()> {
        let root = self.parse_file(path, JsonSection::Midi)?;
        self.apply_midi(&root)
    }

    pub fn load_events(&self, path: &Path) -> EngineResult<()> {
        let root = self.parse_file(path, JsonSection::Events)?;
        self.apply_events(&root)
    }

    fn parse_file(&self, path: &Path, section: JsonSection) -> EngineResult<Value> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| EngineError::InvalidFile(format!("{}: {e}", path.display())))?;
        let root: Value = serde_json::from_str(&contents)
            .map_err(|e| EngineError::InvalidFile(format!("{}: {e}", path.display())))?;

        match section {
            JsonSection::Midi if root.get("midi").is_none() => {
                log::debug!("config file has no midi definitions");
                return Err(EngineError::NoMidiDefinitions);
            }
            JsonSection::Events if root.get("events").is_none() => {
                log::debug!("config file has no events definitions");
                return Err(EngineError::NoEventsDefinitions);
            }
            _ => {}
        }

        if let Err(error) = validate_section(&root, &section) {
            log::error!("config file {} rejected: {error}", path.display());
            return Err(error);
        }
        log::info!("parsed config file {}", path.display());
        Ok(root)
    }

    // ── Apply ──────────────────────────────────────────────────────────

    pub fn apply_host_config(&self, root: &Value) -> EngineResult<()> {
        validate_section(root, &JsonSection::HostConfig)?;
        let samplerate = root["host_config"]["samplerate"]
            .as_f64()
            .unwrap_or_default() as f32;
        log::info!("setting engine sample rate to {samplerate}");
        self.controller.engine().set_sample_rate(samplerate)
    }

    pub fn apply_tracks(&self, root: &Value) -> EngineResult<()> {
        validate_section(root, &JsonSection::Tracks)?;
        let section: TracksSection = serde_json::from_value(root.clone())
            .map_err(|e| invalid("/tracks", e.to_string()))?;

        let engine = self.controller.engine();
        for track in &section.tracks {
            engine.create_track(&track.name, track.channel_count())?;

            for route in &track.inputs {
                match *route {
                    RouteConfig::Bus {
                        engine_bus,
                        track_bus,
                    } => engine.connect_audio_input_bus(engine_bus, track_bus, &track.name)?,
                    RouteConfig::Channel {
                        engine_channel,
                        track_channel,
                    } => engine.connect_audio_input_channel(
                        engine_channel,
                        track_channel,
                        &track.name,
                    )?,
                }
            }
            for route in &track.outputs {
                match *route {
                    RouteConfig::Bus {
                        engine_bus,
                        track_bus,
                    } => engine.connect_audio_output_bus(engine_bus, track_bus, &track.name)?,
                    RouteConfig::Channel {
                        engine_channel,
                        track_channel,
                    } => engine.connect_audio_output_channel(
                        engine_channel,
                        track_channel,
                        &track.name,
                    )?,
                }
            }

            for plugin in &track.plugins {
                let uid = match plugin.kind {
                    PluginKind::Internal | PluginKind::Vst3x => {
                        plugin.uid.clone().unwrap_or_default()
                    }
                    PluginKind::Lv2 => plugin.uri.clone().unwrap_or_default(),
                    PluginKind::Vst2x => String::new(),
                };
                let path = plugin.path.clone().unwrap_or_default();
                engine.add_plugin_to_track(
                    &track.name,
                    &uid,
                    &plugin.name,
                    &path,
                    plugin.kind.into(),
                )?;
            }
            log::debug!("configured track \"{}\"", track.name);
        }
        Ok(())
    }

    pub fn apply_midi(&self, root: &Value) -> EngineResult<()> {
        validate_section(root, &JsonSection::Midi)?;
        let section: MidiSection = serde_json::from_value(root["midi"].clone())
            .map_err(|e| invalid("/midi", e.to_string()))?;

        let midi = self.controller.midi();
        for connection in &section.track_connections {
            if connection.raw_midi {
                midi.connect_raw_midi_to_track(
                    connection.port,
                    &connection.track,
                    connection.channel.channel(),
                )?;
            } else {
                midi.connect_kb_to_track(
                    connection.port,
                    &connection.track,
                    connection.channel.channel(),
                )?;
            }
        }
        for connection in &section.track_out_connections {
            midi.connect_track_to_output(
                connection.port,
                &connection.track,
                connection.channel.channel(),
            )?;
        }
        for mapping in &section.cc_mappings {
            midi.connect_cc_to_parameter(
                mapping.port,
                &mapping.plugin_name,
                &mapping.parameter_name,
                mapping.cc_number,
                mapping.min_range,
                mapping.max_range,
                mapping.channel.channel(),
            )?;
        }
        for mapping in &section.program_change_mappings {
            midi.connect_pc_to_processor(
                mapping.port,
                &mapping.plugin_name,
                mapping.channel.channel(),
            )?;
        }
        Ok(())
    }

    /// Post the scheduled events with their absolute sample timestamps
    pub fn apply_events(&self, root: &Value) -> EngineResult<()> {
        validate_section(root, &JsonSection::Events)?;
        let events: Vec<EventConfig> = serde_json::from_value(root["events"].clone())
            .map_err(|e| invalid("/events", e.to_string()))?;

        let engine = self.controller.engine();
        let registry = engine.registry();
        let sample_rate = engine.sample_rate();
        for event in &events {
            let (time, payload) = match event {
                EventConfig::ParameterChange {
                    time,
                    processor,
                    parameter,
                    value,
                } => {
                    let entry = registry.resolve(processor)?;
                    let index = registry.parameter_index(processor, parameter)?;
                    let descriptor = entry
                        .descriptors
                        .get(index as usize)
                        .ok_or_else(|| EngineError::InvalidParameter(parameter.clone()))?;
                    (
                        *time,
                        EventPayload::ParameterChange {
                            target: entry.id,
                            index,
                            value: ParameterValue::Float(descriptor.denormalize(*value as f32)),
                        },
                    )
                }
                EventConfig::NoteOn {
                    time,
                    track,
                    note,
                    velocity,
                } => {
                    let entry = registry.resolve_track(track)?;
                    (
                        *time,
                        EventPayload::Keyboard {
                            target: entry.id,
                            event: KeyboardEvent::NoteOn {
                                note: *note,
                                velocity: *velocity as f32,
                            },
                        },
                    )
                }
                EventConfig::NoteOff {
                    time,
                    track,
                    note,
                    velocity,
                } => {
                    let entry = registry.resolve_track(track)?;
                    (
                        *time,
                        EventPayload::Keyboard {
                            target: entry.id,
                            event: KeyboardEvent::NoteOff {
                                note: *note,
                                velocity: *velocity as f32,
                            },
                        },
                    )
                }
                EventConfig::ProgramChange {
                    time,
                    processor,
                    program,
                } => {
                    let entry = registry.resolve(processor)?;
                    (
                        *time,
                        EventPayload::ProgramChange {
                            target: entry.id,
                            program: *program,
                        },
                    )
                }
                EventConfig::PlayStateChange { time, playing } => (
                    *time,
                    EventPayload::Transport(TransportChange::PlayState(if *playing {
                        PlayState::Playing
                    } else {
                        PlayState::Stopped
                    })),
                ),
            };
            let timestamp = (time * sample_rate as f64) as u64;
            engine.post_event(Event::new(timestamp, payload))?;
        }
        log::info!("scheduled {} events", events.len());
        Ok(())
    }

    // ── Export ─────────────────────────────────────────────────────────

    /// Serialize the resident graph back into a tracks document that is
    /// semantically equal to what was loaded (bus routes come back as
    /// their expanded channel pairs)
    pub fn export_tracks(&self) -> Value {
        let engine = self.controller.engine();
        let registry = engine.registry();
        let tracks: Vec<TrackConfig> = registry
            .tracks()
            .iter()
            .map(|track| {
                let routes = engine.routes_of(track.id);
                let plugins = registry
                    .plugins_of(track.id)
                    .iter()
                    .map(|plugin| {
                        let kind = match plugin.plugin_type {
                            Some(PluginType::Vst2x) => PluginKind::Vst2x,
                            Some(PluginType::Vst3x) => PluginKind::Vst3x,
                            Some(PluginType::Lv2) => PluginKind::Lv2,
                            _ => PluginKind::Internal,
                        };
                        PluginConfig {
                            name: plugin.name.clone(),
                            kind,
                            uid: match kind {
                                PluginKind::Internal | PluginKind::Vst3x => {
                                    Some(plugin.uid.clone())
                                }
                                _ => None,
                            },
                            path: match kind {
                                PluginKind::Vst2x | PluginKind::Vst3x => Some(plugin.uid.clone()),
                                _ => None,
                            },
                            uri: match kind {
                                PluginKind::Lv2 => Some(plugin.uid.clone()),
                                _ => None,
                            },
                        }
                    })
                    .collect();
                let (mode, channels) = match track.channels {
                    1 => (TrackMode::Mono, None),
                    2 => (TrackMode::Stereo, None),
                    n => (TrackMode::Multichannel, Some(n)),
                };
                TrackConfig {
                    name: track.name.clone(),
                    mode,
                    channels,
                    inputs: routes
                        .inputs
                        .iter()
                        .map(|&(engine_channel, track_channel)| RouteConfig::Channel {
                            engine_channel,
                            track_channel,
                        })
                        .collect(),
                    outputs: routes
                        .outputs
                        .iter()
                        .map(|&(engine_channel, track_channel)| RouteConfig::Channel {
                            engine_channel,
                            track_channel,
                        })
                        .collect(),
                    plugins,
                }
            })
            .collect();
        json!({ "tracks": tracks })
    }

    /// Serialize the MIDI routing tables back into a midi document
    pub fn export_midi(&self) -> Value {
        let engine = self.controller.engine();
        let registry = engine.registry();
        let dump = self.controller.midi().dump_connections();

        let name_of = |id| {
            registry
                .by_id(id)
                .map(|entry| entry.name.clone())
                .unwrap_or_default()
        };
        let spec = |channel: u8| {
            if channel >= midi::OMNI {
                ChannelSpec::omni()
            } else {
                ChannelSpec::Number(channel)
            }
        };

        let mut section = MidiSection::default();
        for (port, channel, target) in &dump.kb_in {
            section.track_connections.push(TrackConnectionConfig {
                port: *port,
                track: name_of(*target),
                channel: spec(*channel),
                raw_midi: false,
            });
        }
        for (port, channel, target) in &dump.raw_in {
            section.track_connections.push(TrackConnectionConfig {
                port: *port,
                track: name_of(*target),
                channel: spec(*channel),
                raw_midi: true,
            });
        }
        for (port, channel, target) in &dump.kb_out {
            section.track_out_connections.push(TrackOutConnectionConfig {
                port: *port,
                track: name_of(*target),
                channel: spec(*channel),
            });
        }
        for (port, cc, channel, connection) in &dump.cc_in {
            let parameter_name = registry
                .by_id(connection.target)
                .and_then(|entry| {
                    entry
                        .descriptors
                        .get(connection.parameter as usize)
                        .map(|d| d.name.clone())
                })
                .unwrap_or_default();
            section.cc_mappings.push(CcMappingConfig {
                port: *port,
                plugin_name: name_of(connection.target),
                parameter_name,
                cc_number: *cc,
                min_range: connection.min,
                max_range: connection.max,
                channel: spec(*channel),
            });
        }
        for (port, channel, target) in &dump.pc_in {
            section.program_change_mappings.push(ProgramChangeMappingConfig {
                port: *port,
                plugin_name: name_of(*target),
                channel: spec(*channel),
            });
        }
        json!({ "midi": section })
    }
}

// ─── Validation ─────────────────────────────────────────────────────────────

fn invalid(pointer: impl Into<String>, reason: impl Into<String>) -> EngineError {
    EngineError::InvalidConfiguration {
        pointer: pointer.into(),
        reason: reason.into(),
    }
}

fn validate_section(root: &Value, section: &JsonSection) -> EngineResult<()> {
    if !root.is_object() {
        return Err(invalid("", "document root must be an object"));
    }
    match section {
        JsonSection::HostConfig => validate_host_config(root),
        JsonSection::Tracks => validate_tracks(root),
        JsonSection::Midi => validate_midi(root),
        JsonSection::Events => validate_events(root),
    }
}

fn validate_host_config(root: &Value) -> EngineResult<()> {
    let section = root
        .get("host_config")
        .ok_or_else(|| invalid("", "missing host_config section"))?;
    let object = section
        .as_object()
        .ok_or_else(|| invalid("/host_config", "must be an object"))?;
    match object.get("samplerate") {
        Some(v) if v.as_f64().map(|sr| sr > 0.0).unwrap_or(false) => Ok(()),
        Some(_) => Err(invalid(
            "/host_config/samplerate",
            "must be a positive number",
        )),
        None => Err(invalid("/host_config", "missing samplerate")),
    }
}

fn validate_tracks(root: &Value) -> EngineResult<()> {
    let tracks = root
        .get("tracks")
        .ok_or_else(|| invalid("", "missing tracks section"))?
        .as_array()
        .ok_or_else(|| invalid("/tracks", "must be an array"))?;

    for (i, track) in tracks.iter().enumerate() {
        let pointer = format!("/tracks/{i}");
        let track = track
            .as_object()
            .ok_or_else(|| invalid(&pointer, "must be an object"))?;

        if !track.get("name").map(Value::is_string).unwrap_or(false) {
            return Err(invalid(&pointer, "missing or non-string name"));
        }
        let mode = track
            .get("mode")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid(&pointer, "missing mode"))?;
        match mode {
            "mono" | "stereo" => {}
            "multichannel" => {
                if !track
                    .get("channels")
                    .and_then(Value::as_u64)
                    .map(|n| n >= 1)
                    .unwrap_or(false)
                {
                    return Err(invalid(
                        &pointer,
                        "multichannel mode requires a channels field",
                    ));
                }
            }
            _ => return Err(invalid(format!("{pointer}/mode"), "unknown track mode")),
        }

        for field in ["inputs", "outputs", "plugins"] {
            if !track.get(field).map(Value::is_array).unwrap_or(false) {
                return Err(invalid(&pointer, format!("missing {field} array")));
            }
        }

        for (j, route) in track["inputs"]
            .as_array()
            .into_iter()
            .flatten()
            .enumerate()
        {
            validate_route(route, &format!("{pointer}/inputs/{j}"))?;
        }
        for (j, route) in track["outputs"]
            .as_array()
            .into_iter()
            .flatten()
            .enumerate()
        {
            validate_route(route, &format!("{pointer}/outputs/{j}"))?;
        }
        for (j, plugin) in track["plugins"]
            .as_array()
            .into_iter()
            .flatten()
            .enumerate()
        {
            validate_plugin(plugin, &format!("{pointer}/plugins/{j}"))?;
        }
    }
    Ok(())
}

fn validate_route(route: &Value, pointer: &str) -> EngineResult<()> {
    let object = route
        .as_object()
        .ok_or_else(|| invalid(pointer, "must be an object"))?;
    let has_bus = object.contains_key("engine_bus");
    let (a, b) = if has_bus {
        ("engine_bus", "track_bus")
    } else {
        ("engine_channel", "track_channel")
    };
    for field in [a, b] {
        if !object.get(field).map(Value::is_u64).unwrap_or(false) {
            return Err(invalid(
                pointer,
                format!("route needs integer {a} and {b}"),
            ));
        }
    }
    Ok(())
}

fn validate_plugin(plugin: &Value, pointer: &str) -> EngineResult<()> {
    let object = plugin
        .as_object()
        .ok_or_else(|| invalid(pointer, "must be an object"))?;
    if !object.get("name").map(Value::is_string).unwrap_or(false) {
        return Err(invalid(pointer, "missing or non-string name"));
    }
    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid(pointer, "missing type"))?;
    let required: &[&str] = match kind {
        "internal" => &["uid"],
        "vst2x" => &["path"],
        "vst3x" => &["uid", "path"],
        "lv2" => &["uri"],
        _ => return Err(invalid(format!("{pointer}/type"), "unknown plugin type")),
    };
    for field in required {
        if !object.get(*field).map(Value::is_string).unwrap_or(false) {
            return Err(invalid(
                pointer,
                format!("plugin type {kind} requires field {field}"),
            ));
        }
    }
    Ok(())
}

fn validate_channel(value: Option<&Value>, pointer: &str) -> EngineResult<()> {
    match value {
        Some(v) if v.is_u64() => {
            let channel = v.as_u64().unwrap_or(u64::MAX);
            if channel <= midi::OMNI as u64 {
                Ok(())
            } else {
                Err(invalid(pointer, "channel must be 0-16"))
            }
        }
        Some(v) if v.as_str() == Some("omni") => Ok(()),
        Some(_) => Err(invalid(pointer, "channel must be an integer or \"omni\"")),
        None => Err(invalid(pointer, "missing channel")),
    }
}

fn validate_midi(root: &Value) -> EngineResult<()> {
    let section = root
        .get("midi")
        .ok_or_else(|| invalid("", "missing midi section"))?
        .as_object()
        .ok_or_else(|| invalid("/midi", "must be an object"))?;

    for (name, required) in [
        ("track_connections", &["port", "track"][..]),
        ("track_out_connections", &["port", "track"][..]),
        (
            "cc_mappings",
            &[
                "port",
                "plugin_name",
                "parameter_name",
                "cc_number",
                "min_range",
                "max_range",
            ][..],
        ),
        ("program_change_mappings", &["port", "plugin_name"][..]),
    ] {
        let Some(list) = section.get(name) else {
            continue;
        };
        let list = list
            .as_array()
            .ok_or_else(|| invalid(format!("/midi/{name}"), "must be an array"))?;
        for (i, item) in list.iter().enumerate() {
            let pointer = format!("/midi/{name}/{i}");
            let object = item
                .as_object()
                .ok_or_else(|| invalid(&pointer, "must be an object"))?;
            for field in required {
                let ok = match *field {
                    "track" | "plugin_name" | "parameter_name" => {
                        object.get(*field).map(Value::is_string).unwrap_or(false)
                    }
                    "min_range" | "max_range" => {
                        object.get(*field).map(Value::is_number).unwrap_or(false)
                    }
                    _ => object.get(*field).map(Value::is_u64).unwrap_or(false),
                };
                if !ok {
                    return Err(invalid(&pointer, format!("missing or invalid {field}")));
                }
            }
            validate_channel(object.get("channel"), &format!("{pointer}/channel"))?;
        }
    }
    Ok(())
}

fn validate_events(root: &Value) -> EngineResult<()> {
    let events = root
        .get("events")
        .ok_or_else(|| invalid("", "missing events section"))?
        .as_array()
        .ok_or_else(|| invalid("/events", "must be an array"))?;

    for (i, event) in events.iter().enumerate() {
        let pointer = format!("/events/{i}");
        let object = event
            .as_object()
            .ok_or_else(|| invalid(&pointer, "must be an object"))?;
        if !object
            .get("time")
            .and_then(Value::as_f64)
            .map(|t| t >= 0.0)
            .unwrap_or(false)
        {
            return Err(invalid(&pointer, "missing or negative time"));
        }
        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid(&pointer, "missing type"))?;
        let required: &[&str] = match kind {
            "parameter_change" => &["processor", "parameter", "value"],
            "note_on" | "note_off" => &["track", "note", "velocity"],
            "program_change" => &["processor", "program"],
            "play_state_change" => &["playing"],
            _ => return Err(invalid(format!("{pointer}/type"), "unknown event type")),
        };
        for field in required {
            if object.get(*field).is_none() {
                return Err(invalid(&pointer, format!("missing field {field}")));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_config_validation() {
        assert!(validate_section(
            &json!({"host_config": {"samplerate": 48000.0}}),
            &JsonSection::HostConfig
        )
        .is_ok());

        let err = validate_section(&json!({}), &JsonSection::HostConfig).unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfiguration { .. }));

        let err = validate_section(
            &json!({"host_config": {"samplerate": "fast"}}),
            &JsonSection::HostConfig,
        )
        .unwrap_err();
        match err {
            EngineError::InvalidConfiguration { pointer, .. } => {
                assert_eq!(pointer, "/host_config/samplerate");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn track_missing_plugins_points_at_the_track() {
        let doc = json!({"tracks": [{
            "name": "left", "mode": "mono", "inputs": [], "outputs": []
        }]});
        let err = validate_section(&doc, &JsonSection::Tracks).unwrap_err();
        match err {
            EngineError::InvalidConfiguration { pointer, .. } => {
                assert_eq!(pointer, "/tracks/0");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn multichannel_requires_channels() {
        let doc = json!({"tracks": [{
            "name": "surround", "mode": "multichannel",
            "inputs": [], "outputs": [], "plugins": []
        }]});
        assert!(validate_section(&doc, &JsonSection::Tracks).is_err());

        let doc = json!({"tracks": [{
            "name": "surround", "mode": "multichannel", "channels": 6,
            "inputs": [], "outputs": [], "plugins": []
        }]});
        assert!(validate_section(&doc, &JsonSection::Tracks).is_ok());
    }

    #[test]
    fn plugin_type_field_requirements() {
        let base = |plugin: Value| json!({"tracks": [{"name": "t", "mode": "stereo", "inputs": [], "outputs": [], "plugins": [plugin]}]});

        assert!(validate_section(
            &base(json!({"name": "g", "type": "internal", "uid": "reef.gain"})),
            &JsonSection::Tracks
        )
        .is_ok());
        assert!(validate_section(
            &base(json!({"name": "g", "type": "internal"})),
            &JsonSection::Tracks
        )
        .is_err());
        assert!(validate_section(
            &base(json!({"name": "v", "type": "vst3x", "uid": "x", "path": "/p.vst3"})),
            &JsonSection::Tracks
        )
        .is_ok());
        assert!(validate_section(
            &base(json!({"name": "v", "type": "vst3x", "uid": "x"})),
            &JsonSection::Tracks
        )
        .is_err());
        assert!(validate_section(
            &base(json!({"name": "l", "type": "lv2", "uri": "urn:x"})),
            &JsonSection::Tracks
        )
        .is_ok());
        assert!(validate_section(
            &base(json!({"name": "q", "type": "clap"})),
            &JsonSection::Tracks
        )
        .is_err());
    }

    #[test]
    fn midi_channel_spec() {
        let doc = json!({"midi": {"track_connections": [
            {"port": 0, "track": "t", "channel": "omni"}
        ]}});
        assert!(validate_section(&doc, &JsonSection::Midi).is_ok());

        let doc = json!({"midi": {"track_connections": [
            {"port": 0, "track": "t", "channel": 17}
        ]}});
        assert!(validate_section(&doc, &JsonSection::Midi).is_err());

        let spec: ChannelSpec = serde_json::from_value(json!("omni")).unwrap();
        assert_eq!(spec.channel(), midi::OMNI);
        let spec: ChannelSpec = serde_json::from_value(json!(3)).unwrap();
        assert_eq!(spec.channel(), 3);
    }

    #[test]
    fn event_validation() {
        let doc = json!({"events": [
            {"time": 0.5, "type": "note_on", "track": "t", "note": 60, "velocity": 1.0}
        ]});
        assert!(validate_section(&doc, &JsonSection::Events).is_ok());

        let doc = json!({"events": [{"time": 0.5, "type": "warp"}]});
        let err = validate_section(&doc, &JsonSection::Events).unwrap_err();
        match err {
            EngineError::InvalidConfiguration { pointer, .. } => {
                assert_eq!(pointer, "/events/0/type");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn route_shapes() {
        let bus: RouteConfig =
            serde_json::from_value(json!({"engine_bus": 0, "track_bus": 0})).unwrap();
        assert!(matches!(bus, RouteConfig::Bus { .. }));
        let channel: RouteConfig =
            serde_json::from_value(json!({"engine_channel": 3, "track_channel": 1})).unwrap();
        assert!(matches!(channel, RouteConfig::Channel { .. }));
    }
}
