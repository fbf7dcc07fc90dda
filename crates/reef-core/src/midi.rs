//! MIDI 1.0 wire codec and message types
//!
//! Provides the typed message set the dispatcher routes on:
//! - decode of the channel-voice messages (note on/off, poly/channel
//!   pressure, CC, program change, pitch bend)
//! - encoders for the outbound keyboard messages
//! - the OMNI channel wildcard

/// MIDI 1.0 status bytes
pub mod status {
    pub const NOTE_OFF: u8 = 0x80;
    pub const NOTE_ON: u8 = 0x90;
    pub const POLY_PRESSURE: u8 = 0xA0;
    pub const CONTROL_CHANGE: u8 = 0xB0;
    pub const PROGRAM_CHANGE: u8 = 0xC0;
    pub const CHANNEL_PRESSURE: u8 = 0xD0;
    pub const PITCH_BEND: u8 = 0xE0;
    pub const SYSTEM: u8 = 0xF0;
}

/// MIDI channel (0-15)
pub type MidiChannel = u8;

/// Channel wildcard matching any of 0-15
pub const OMNI: MidiChannel = 16;

/// Number of channel buckets in a routing table: 16 channels + OMNI
pub const CHANNEL_BUCKETS: usize = 17;

/// Maximum data byte value
pub const MAX_VALUE: u8 = 127;

/// A decoded channel-voice message
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MidiMessage {
    NoteOn {
        channel: MidiChannel,
        note: u8,
        velocity: u8,
    },
    NoteOff {
        channel: MidiChannel,
        note: u8,
        velocity: u8,
    },
    PolyPressure {
        channel: MidiChannel,
        note: u8,
        pressure: u8,
    },
    ControlChange {
        channel: MidiChannel,
        controller: u8,
        value: u8,
    },
    ProgramChange {
        channel: MidiChannel,
        program: u8,
    },
    ChannelPressure {
        channel: MidiChannel,
        pressure: u8,
    },
    PitchBend {
        channel: MidiChannel,
        /// 14-bit value re-centered to -8192..8191
        value: i16,
    },
}

impl MidiMessage {
    #[inline]
    pub fn channel(&self) -> MidiChannel {
        match *self {
            MidiMessage::NoteOn { channel, .. }
            | MidiMessage::NoteOff { channel, .. }
            | MidiMessage::PolyPressure { channel, .. }
            | MidiMessage::ControlChange { channel, .. }
            | MidiMessage::ProgramChange { channel, .. }
            | MidiMessage::ChannelPressure { channel, .. }
            | MidiMessage::PitchBend { channel, .. } => channel,
        }
    }
}

/// Decode a raw MIDI 1.0 byte sequence into a typed message.
///
/// Note-on with velocity 0 decodes as note-off with release velocity 64.
/// System messages and truncated messages return `None`.
pub fn decode(bytes: &[u8]) -> Option<MidiMessage> {
    let status_byte = *bytes.first()?;
    if status_byte < 0x80 || status_byte >= status::SYSTEM {
        return None;
    }
    let channel = status_byte & 0x0F;
    let msg_type = status_byte & 0xF0;

    let message = match msg_type {
        status::NOTE_OFF if bytes.len() >= 3 => MidiMessage::NoteOff {
            channel,
            note: bytes[1] & 0x7F,
            velocity: bytes[2] & 0x7F,
        },
        status::NOTE_ON if bytes.len() >= 3 => {
            let velocity = bytes[2] & 0x7F;
            if velocity == 0 {
                MidiMessage::NoteOff {
                    channel,
                    note: bytes[1] & 0x7F,
                    velocity: 64,
                }
            } else {
                MidiMessage::NoteOn {
                    channel,
                    note: bytes[1] & 0x7F,
                    velocity,
                }
            }
        }
        status::POLY_PRESSURE if bytes.len() >= 3 => MidiMessage::PolyPressure {
            channel,
            note: bytes[1] & 0x7F,
            pressure: bytes[2] & 0x7F,
        },
        status::CONTROL_CHANGE if bytes.len() >= 3 => MidiMessage::ControlChange {
            channel,
            controller: bytes[1] & 0x7F,
            value: bytes[2] & 0x7F,
        },
        status::PROGRAM_CHANGE if bytes.len() >= 2 => MidiMessage::ProgramChange {
            channel,
            program: bytes[1] & 0x7F,
        },
        status::CHANNEL_PRESSURE if bytes.len() >= 2 => MidiMessage::ChannelPressure {
            channel,
            pressure: bytes[1] & 0x7F,
        },
        status::PITCH_BEND if bytes.len() >= 3 => {
            let lsb = (bytes[1] & 0x7F) as i16;
            let msb = (bytes[2] & 0x7F) as i16;
            MidiMessage::PitchBend {
                channel,
                value: ((msb << 7) | lsb) - 8192,
            }
        }
        _ => return None,
    };
    Some(message)
}

/// Encode a note-on with normalized velocity [0, 1]
#[inline]
pub fn encode_note_on(channel: MidiChannel, note: u8, velocity: f32) -> [u8; 3] {
    [
        status::NOTE_ON | (channel & 0x0F),
        note & 0x7F,
        denormalize_value(velocity),
    ]
}

/// Encode a note-off with normalized release velocity [0, 1]
#[inline]
pub fn encode_note_off(channel: MidiChannel, note: u8, velocity: f32) -> [u8; 3] {
    [
        status::NOTE_OFF | (channel & 0x0F),
        note & 0x7F,
        denormalize_value(velocity),
    ]
}

/// Encode a polyphonic pressure message with normalized pressure [0, 1]
#[inline]
pub fn encode_poly_pressure(channel: MidiChannel, note: u8, pressure: f32) -> [u8; 3] {
    [
        status::POLY_PRESSURE | (channel & 0x0F),
        note & 0x7F,
        denormalize_value(pressure),
    ]
}

/// Normalized [0, 1] value from a 7-bit data byte
#[inline]
pub fn normalize_value(value: u8) -> f32 {
    value.min(MAX_VALUE) as f32 / MAX_VALUE as f32
}

/// 7-bit data byte from a normalized [0, 1] value
#[inline]
pub fn denormalize_value(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * MAX_VALUE as f32).round() as u8
}

/// Bucket index for a routing table: channels map to themselves, OMNI to 16
#[inline]
pub fn channel_bucket(channel: MidiChannel) -> usize {
    (channel.min(OMNI)) as usize
}
