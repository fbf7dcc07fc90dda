//! Control surface
//!
//! Thin synchronous API over the engine, pipeline and MIDI dispatcher for
//! configuration loaders and remote frontends. Reads resolve against the
//! registry and the seqlock parameter snapshots; writes post events and
//! return once they are accepted.

use std::sync::Arc;

use reef_core::{
    EngineError, EngineResult, ObjectId, ParameterDescriptor, PlayState, Tempo, TimeSignature,
};
use reef_event::{Event, EventPayload, KeyboardEvent, ParameterValue, TransportChange};

use crate::engine::Engine;
use crate::midi_dispatcher::MidiDispatcher;

/// Published snapshot of one processor for UIs and dumps
#[derive(Debug, Clone)]
pub struct ProcessorInfo {
    pub id: ObjectId,
    pub name: String,
    pub label: String,
    pub is_track: bool,
    pub channels: usize,
    pub parameter_count: usize,
}

pub struct Controller {
    engine: Arc<Engine>,
    midi: Arc<MidiDispatcher>,
}

impl Controller {
    pub fn new(engine: Arc<Engine>, midi: Arc<MidiDispatcher>) -> Self {
        Self { engine, midi }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn midi(&self) -> &Arc<MidiDispatcher> {
        &self.midi
    }

    // ── Queries ────────────────────────────────────────────────────────

    pub fn tracks(&self) -> Vec<ProcessorInfo> {
        self.engine
            .registry()
            .tracks()
            .iter()
            .map(|entry| ProcessorInfo {
                id: entry.id,
                name: entry.name.clone(),
                label: entry.label.clone(),
                is_track: true,
                channels: entry.channels,
                parameter_count: entry.descriptors.len(),
            })
            .collect()
    }

    pub fn processors_on_track(&self, track_name: &str) -> EngineResult<Vec<ProcessorInfo>> {
        let track = self.engine.registry().resolve_track(track_name)?;
        Ok(self
            .engine
            .registry()
            .plugins_of(track.id)
            .iter()
            .map(|entry| ProcessorInfo {
                id: entry.id,
                name: entry.name.clone(),
                label: entry.label.clone(),
                is_track: false,
                channels: entry.channels,
                parameter_count: entry.descriptors.len(),
            })
            .collect())
    }

    pub fn parameter_descriptors(
        &self,
        processor_name: &str,
    ) -> EngineResult<Vec<ParameterDescriptor>> {
        let entry = self.engine.registry().resolve(processor_name)?;
        Ok(entry.descriptors.as_ref().clone())
    }

    /// Normalized [0, 1] value via a seqlock snapshot; safe against a
    /// concurrent RT writer
    pub fn parameter_value(
        &self,
        processor_name: &str,
        parameter_name: &str,
    ) -> EngineResult<f32> {
        let entry = self.engine.registry().resolve(processor_name)?;
        let index = self
            .engine
            .registry()
            .parameter_index(processor_name, parameter_name)?;
        let domain = entry.parameters.read(index);
        let descriptor = entry
            .descriptors
            .get(index as usize)
            .ok_or_else(|| EngineError::InvalidParameter(parameter_name.to_string()))?;
        Ok(descriptor.normalize(domain))
    }

    // ── Parameter and processor control ────────────────────────────────

    /// Set a parameter from a normalized [0, 1] value. The value is
    /// converted to the declared domain before it crosses to RT.
    pub fn set_parameter(
        &self,
        processor_name: &str,
        parameter_name: &str,
        normalized: f32,
    ) -> EngineResult<()> {
        let entry = self.engine.registry().resolve(processor_name)?;
        let index = self
            .engine
            .registry()
            .parameter_index(processor_name, parameter_name)?;
        let descriptor = entry
            .descriptors
            .get(index as usize)
            .ok_or_else(|| EngineError::InvalidParameter(parameter_name.to_string()))?;
        self.engine.post_event(Event::new(
            self.engine.current_time(),
            EventPayload::ParameterChange {
                target: entry.id,
                index,
                value: ParameterValue::Float(descriptor.denormalize(normalized)),
            },
        ))
    }

    pub fn set_string_property(
        &self,
        processor_name: &str,
        parameter_name: &str,
        value: &str,
    ) -> EngineResult<()> {
        let entry = self.engine.registry().resolve(processor_name)?;
        let index = self
            .engine
            .registry()
            .parameter_index(processor_name, parameter_name)?;
        self.engine.post_event(Event::new(
            self.engine.current_time(),
            EventPayload::StringParameterChange {
                target: entry.id,
                index,
                value: value.into(),
            },
        ))
    }

    pub fn set_bypass(&self, processor_name: &str, bypassed: bool) -> EngineResult<()> {
        let entry = self.engine.registry().resolve(processor_name)?;
        self.engine.post_event(Event::new(
            self.engine.current_time(),
            EventPayload::SetBypass {
                target: entry.id,
                bypassed,
            },
        ))
    }

    pub fn set_program(&self, processor_name: &str, program: u8) -> EngineResult<()> {
        let entry = self.engine.registry().resolve(processor_name)?;
        self.engine.post_event(Event::new(
            self.engine.current_time(),
            EventPayload::ProgramChange {
                target: entry.id,
                program,
            },
        ))
    }

    // ── Keyboard injection ─────────────────────────────────────────────

    pub fn note_on(&self, track_name: &str, note: u8, velocity: f32) -> EngineResult<()> {
        self.keyboard_event(track_name, KeyboardEvent::NoteOn { note, velocity })
    }

    pub fn note_off(&self, track_name: &str, note: u8, velocity: f32) -> EngineResult<()> {
        self.keyboard_event(track_name, KeyboardEvent::NoteOff { note, velocity })
    }

    fn keyboard_event(&self, track_name: &str, event: KeyboardEvent) -> EngineResult<()> {
        let entry = self.engine.registry().resolve_track(track_name)?;
        self.engine.post_event(Event::new(
            self.engine.current_time(),
            EventPayload::Keyboard {
                target: entry.id,
                event,
            },
        ))
    }

    // ── Transport ──────────────────────────────────────────────────────

    pub fn set_tempo(&self, bpm: f32) -> EngineResult<()> {
        self.transport_event(TransportChange::Tempo(Tempo(bpm)))
    }

    pub fn set_time_signature(&self, numerator: u8, denominator: u8) -> EngineResult<()> {
        self.transport_event(TransportChange::TimeSignature(TimeSignature {
            numerator,
            denominator,
        }))
    }

    pub fn set_play_state(&self, state: PlayState) -> EngineResult<()> {
        self.transport_event(TransportChange::PlayState(state))
    }

    pub fn play(&self) -> EngineResult<()> {
        self.set_play_state(PlayState::Playing)
    }

    pub fn stop(&self) -> EngineResult<()> {
        self.set_play_state(PlayState::Stopped)
    }

    fn transport_event(&self, change: TransportChange) -> EngineResult<()> {
        self.engine.post_event(Event::new(
            self.engine.current_time(),
            EventPayload::Transport(change),
        ))
    }
}
