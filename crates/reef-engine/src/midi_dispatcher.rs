//! MIDI routing
//!
//! Translates raw MIDI into engine events and back out. Four inbound
//! tables (keyboard, CC, program change, raw) keyed by port with a
//! 17-way channel bucket (16 channels + OMNI), and a keyboard-out table
//! keyed by source processor. On dispatch the OMNI bucket fires first,
//! then the message's channel bucket; every matching connection fires.
//! A connection registered under both receives the message twice — the
//! configurator is responsible for not double-registering.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use reef_core::{
    midi, EngineError, EngineResult, MidiChannel, MidiMessage, ObjectId, ParameterIndex,
};
use reef_event::{
    Event, EventListener, EventPayload, KeyboardEvent, ParameterValue,
};
use smallvec::SmallVec;

use crate::engine::Engine;

/// Inbound keyboard/program/raw connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackConnection {
    pub target: ObjectId,
}

/// Inbound CC-to-parameter connection with its domain range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamConnection {
    pub target: ObjectId,
    pub parameter: ParameterIndex,
    pub min: f32,
    pub max: f32,
}

/// Outbound keyboard connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputConnection {
    pub port: u16,
    pub channel: MidiChannel,
}

/// Sink for encoded outbound MIDI bytes
pub trait MidiOutputSink: Send {
    fn send_midi(&mut self, port: u16, data: &[u8]);
}

/// Flat view of the routing tables: (port, channel, target) rows, with
/// the CC table adding its controller number and range
#[derive(Debug, Clone, Default)]
pub struct MidiConnectionDump {
    pub kb_in: Vec<(u16, MidiChannel, ObjectId)>,
    pub raw_in: Vec<(u16, MidiChannel, ObjectId)>,
    pub cc_in: Vec<(u16, u8, MidiChannel, ParamConnection)>,
    pub pc_in: Vec<(u16, MidiChannel, ObjectId)>,
    pub kb_out: Vec<(u16, MidiChannel, ObjectId)>,
}

type Buckets<T> = [SmallVec<[T; 2]>; midi::CHANNEL_BUCKETS];

fn empty_buckets<T>() -> Buckets<T> {
    std::array::from_fn(|_| SmallVec::new())
}

#[derive(Default)]
struct RoutingTables {
    kb_in: HashMap<u16, Buckets<TrackConnection>>,
    raw_in: HashMap<u16, Buckets<TrackConnection>>,
    cc_in: HashMap<u16, HashMap<u8, Buckets<ParamConnection>>>,
    pc_in: HashMap<u16, Buckets<TrackConnection>>,
    kb_out: HashMap<u64, SmallVec<[OutputConnection; 2]>>,
}

pub struct MidiDispatcher {
    inputs: u16,
    outputs: u16,
    tables: Mutex<RoutingTables>,
    sink: Mutex<Option<Box<dyn MidiOutputSink>>>,
    /// Undecodable or unmapped inbound messages
    unhandled: AtomicU64,
    engine: Arc<Engine>,
}

impl MidiDispatcher {
    pub fn new(engine: Arc<Engine>, inputs: u16, outputs: u16) -> Arc<Self> {
        Arc::new(Self {
            inputs,
            outputs,
            tables: Mutex::new(RoutingTables::default()),
            sink: Mutex::new(None),
            unhandled: AtomicU64::new(0),
            engine,
        })
    }

    pub fn set_output_sink(&self, sink: Box<dyn MidiOutputSink>) {
        *self.sink.lock() = Some(sink);
    }

    pub fn unhandled(&self) -> u64 {
        self.unhandled.load(Ordering::Relaxed)
    }

    fn check_input_port(&self, port: u16) -> EngineResult<()> {
        if port >= self.inputs {
            return Err(EngineError::InvalidMidiPort(port));
        }
        Ok(())
    }

    fn check_channel(channel: MidiChannel) -> EngineResult<()> {
        if channel > midi::OMNI {
            return Err(EngineError::InvalidChannel(channel));
        }
        Ok(())
    }

    // ── Connection CRUD ────────────────────────────────────────────────

    pub fn connect_kb_to_track(
        &self,
        port: u16,
        track_name: &str,
        channel: MidiChannel,
    ) -> EngineResult<()> {
        self.check_input_port(port)?;
        Self::check_channel(channel)?;
        let entry = self.engine.registry().resolve_track(track_name)?;
        let mut tables = self.tables.lock();
        tables.kb_in.entry(port).or_insert_with(empty_buckets)[midi::channel_bucket(channel)]
            .push(TrackConnection { target: entry.id });
        log::debug!("connected midi port {port} ch {channel} to track \"{track_name}\"");
        Ok(())
    }

    pub fn connect_raw_midi_to_track(
        &self,
        port: u16,
        track_name: &str,
        channel: MidiChannel,
    ) -> EngineResult<()> {
        self.check_input_port(port)?;
        Self::check_channel(channel)?;
        let entry = self.engine.registry().resolve_track(track_name)?;
        let mut tables = self.tables.lock();
        tables.raw_in.entry(port).or_insert_with(empty_buckets)[midi::channel_bucket(channel)]
            .push(TrackConnection { target: entry.id });
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn connect_cc_to_parameter(
        &self,
        port: u16,
        processor_name: &str,
        parameter_name: &str,
        cc_number: u8,
        min: f32,
        max: f32,
        channel: MidiChannel,
    ) -> EngineResult<()> {
        self.check_input_port(port)?;
        Self::check_channel(channel)?;
        if cc_number > midi::MAX_VALUE {
            return Err(EngineError::InvalidParameter(format!("cc {cc_number}")));
        }
        let entry = self.engine.registry().resolve(processor_name)?;
        let parameter = self
            .engine
            .registry()
            .parameter_index(processor_name, parameter_name)?;
        let mut tables = self.tables.lock();
        tables
            .cc_in
            .entry(port)
            .or_default()
            .entry(cc_number)
            .or_insert_with(empty_buckets)[midi::channel_bucket(channel)]
        .push(ParamConnection {
            target: entry.id,
            parameter,
            min,
            max,
        });
        log::debug!(
            "connected cc {cc_number} on port {port} to \"{processor_name}\".\"{parameter_name}\""
        );
        Ok(())
    }

    pub fn connect_pc_to_processor(
        &self,
        port: u16,
        processor_name: &str,
        channel: MidiChannel,
    ) -> EngineResult<()> {
        self.check_input_port(port)?;
        Self::check_channel(channel)?;
        let entry = self.engine.registry().resolve(processor_name)?;
        let mut tables = self.tables.lock();
        tables.pc_in.entry(port).or_insert_with(empty_buckets)[midi::channel_bucket(channel)]
            .push(TrackConnection { target: entry.id });
        Ok(())
    }

    /// Outbound: processor-emitted keyboard events to a MIDI output port.
    /// OMNI is not a valid output channel.
    pub fn connect_track_to_output(
        &self,
        port: u16,
        track_name: &str,
        channel: MidiChannel,
    ) -> EngineResult<()> {
        if channel >= midi::OMNI {
            return Err(EngineError::InvalidChannel(channel));
        }
        if port >= self.outputs {
            return Err(EngineError::InvalidMidiPort(port));
        }
        let entry = self.engine.registry().resolve_track(track_name)?;
        let mut tables = self.tables.lock();
        tables
            .kb_out
            .entry(entry.id.raw())
            .or_default()
            .push(OutputConnection { port, channel });
        Ok(())
    }

    pub fn clear_connections(&self) {
        let mut tables = self.tables.lock();
        *tables = RoutingTables::default();
    }

    /// Flat copy of every registered connection, for config export
    pub fn dump_connections(&self) -> MidiConnectionDump {
        let tables = self.tables.lock();
        let mut dump = MidiConnectionDump::default();
        for (port, buckets) in &tables.kb_in {
            for (bucket, connections) in buckets.iter().enumerate() {
                for connection in connections {
                    dump.kb_in.push((*port, bucket as MidiChannel, connection.target));
                }
            }
        }
        for (port, buckets) in &tables.raw_in {
            for (bucket, connections) in buckets.iter().enumerate() {
                for connection in connections {
                    dump.raw_in.push((*port, bucket as MidiChannel, connection.target));
                }
            }
        }
        for (port, ccs) in &tables.cc_in {
            for (cc, buckets) in ccs {
                for (bucket, connections) in buckets.iter().enumerate() {
                    for connection in connections {
                        dump.cc_in.push((*port, *cc, bucket as MidiChannel, *connection));
                    }
                }
            }
        }
        for (port, buckets) in &tables.pc_in {
            for (bucket, connections) in buckets.iter().enumerate() {
                for connection in connections {
                    dump.pc_in.push((*port, bucket as MidiChannel, connection.target));
                }
            }
        }
        for (source, connections) in &tables.kb_out {
            for connection in connections {
                dump.kb_out.push((
                    connection.port,
                    connection.channel,
                    ObjectId::from_raw(*source),
                ));
            }
        }
        dump
    }

    // ── Ingress ────────────────────────────────────────────────────────

    /// Decode one inbound message and post the events it maps to. Called
    /// from the MIDI backend's (non-RT) thread; `_host_time_nanos` is the
    /// backend capture time, unused until input latency compensation.
    pub fn receive(&self, port: u16, bytes: &[u8], _host_time_nanos: u64) {
        if port >= self.inputs {
            self.unhandled.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let Some(message) = midi::decode(bytes) else {
            self.unhandled.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let timestamp = self.engine.current_time();
        let mut routed = false;
        let tables = self.tables.lock();

        if let Some(kb_event) = keyboard_event_for(&message) {
            if let Some(buckets) = tables.kb_in.get(&port) {
                routed |= self.post_to_buckets(buckets, message.channel(), |target| {
                    Event::new(
                        timestamp,
                        EventPayload::Keyboard {
                            target,
                            event: kb_event,
                        },
                    )
                });
            }
            if let Some(buckets) = tables.raw_in.get(&port) {
                routed |= self.post_to_buckets(buckets, message.channel(), |target| {
                    Event::new(
                        timestamp,
                        EventPayload::Keyboard {
                            target,
                            event: kb_event,
                        },
                    )
                });
            }
        }

        match message {
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => {
                if let Some(ccs) = tables.cc_in.get(&port).and_then(|p| p.get(&controller)) {
                    for bucket in [midi::channel_bucket(midi::OMNI), midi::channel_bucket(channel)] {
                        for connection in &ccs[bucket] {
                            let mapped = value as f32 / midi::MAX_VALUE as f32
                                * (connection.max - connection.min)
                                + connection.min;
                            self.engine
                                .post_event(Event::new(
                                    timestamp,
                                    EventPayload::ParameterChange {
                                        target: connection.target,
                                        index: connection.parameter,
                                        value: ParameterValue::Float(mapped),
                                    },
                                ))
                                .ok();
                            routed = true;
                        }
                    }
                }
            }
            MidiMessage::ProgramChange { channel, program } => {
                if let Some(buckets) = tables.pc_in.get(&port) {
                    routed |= self.post_to_buckets(buckets, channel, |target| {
                        Event::new(timestamp, EventPayload::ProgramChange { target, program })
                    });
                }
            }
            _ => {}
        }

        if !routed {
            self.unhandled.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn post_to_buckets(
        &self,
        buckets: &Buckets<TrackConnection>,
        channel: MidiChannel,
        make: impl Fn(ObjectId) -> Event,
    ) -> bool {
        let mut routed = false;
        for bucket in [midi::channel_bucket(midi::OMNI), midi::channel_bucket(channel)] {
            for connection in &buckets[bucket] {
                self.engine.post_event(make(connection.target)).ok();
                routed = true;
            }
        }
        routed
    }

    // ── Egress ─────────────────────────────────────────────────────────

    /// Handle a keyboard notification surfaced from the RT thread
    fn dispatch_output(&self, source: ObjectId, event: &KeyboardEvent) {
        let tables = self.tables.lock();
        let Some(connections) = tables.kb_out.get(&source.raw()) else {
            return;
        };
        let mut sink = self.sink.lock();
        let Some(sink) = sink.as_mut() else {
            return;
        };
        for connection in connections {
            let bytes = match *event {
                KeyboardEvent::NoteOn { note, velocity } => {
                    midi::encode_note_on(connection.channel, note, velocity)
                }
                KeyboardEvent::NoteOff { note, velocity } => {
                    midi::encode_note_off(connection.channel, note, velocity)
                }
                KeyboardEvent::NoteAftertouch { note, value } => {
                    midi::encode_poly_pressure(connection.channel, note, value)
                }
                _ => continue,
            };
            sink.send_midi(connection.port, &bytes);
        }
    }
}

/// Listener adapter: plugs the dispatcher's egress path into the event
/// pipeline's dispatcher thread
pub struct MidiEgress {
    dispatcher: Arc<MidiDispatcher>,
}

impl MidiEgress {
    pub fn new(dispatcher: Arc<MidiDispatcher>) -> Box<Self> {
        Box::new(Self { dispatcher })
    }
}

impl EventListener for MidiEgress {
    fn notify(&mut self, event: &Event) {
        if let EventPayload::KeyboardNotification { source, event: kb } = &event.payload {
            self.dispatcher.dispatch_output(*source, kb);
        }
    }
}

/// The keyboard-class event a decoded message maps to, if any
fn keyboard_event_for(message: &MidiMessage) -> Option<KeyboardEvent> {
    match *message {
        MidiMessage::NoteOn { note, velocity, .. } => Some(KeyboardEvent::NoteOn {
            note,
            velocity: midi::normalize_value(velocity),
        }),
        MidiMessage::NoteOff { note, velocity, .. } => Some(KeyboardEvent::NoteOff {
            note,
            velocity: midi::normalize_value(velocity),
        }),
        MidiMessage::PolyPressure { note, pressure, .. } => Some(KeyboardEvent::NoteAftertouch {
            note,
            value: midi::normalize_value(pressure),
        }),
        MidiMessage::ChannelPressure { pressure, .. } => Some(KeyboardEvent::Aftertouch {
            value: midi::normalize_value(pressure),
        }),
        MidiMessage::PitchBend { value, .. } => Some(KeyboardEvent::PitchBend {
            value: value as f32 / 8192.0,
        }),
        MidiMessage::ControlChange {
            controller, value, ..
        } if controller == 1 => Some(KeyboardEvent::Modulation {
            value: midi::normalize_value(value),
        }),
        _ => None,
    }
}
