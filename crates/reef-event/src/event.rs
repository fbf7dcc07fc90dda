//! Event types
//!
//! Two forms, converted explicitly:
//! - `Event`: the rich non-RT form with an absolute sample timestamp,
//!   allowed to own heap payloads (strings, blobs, work closures)
//! - `RtEvent`: the fixed-size, trivially copyable form crossing the RT
//!   queue, with a sample offset into the current block

use std::sync::Arc;

use reef_core::{ObjectId, ParameterIndex, PlayState, Tempo, TimeSignature};

use crate::blob::BlobHandle;

/// Correlation id for deferred work requests
pub type CallbackId = u32;

/// Keyboard-class event data, shared between both event forms
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KeyboardEvent {
    NoteOn { note: u8, velocity: f32 },
    NoteOff { note: u8, velocity: f32 },
    /// Per-note (polyphonic) aftertouch
    NoteAftertouch { note: u8, value: f32 },
    /// Channel aftertouch
    Aftertouch { value: f32 },
    Modulation { value: f32 },
    /// Normalized bend, -1.0 to 1.0
    PitchBend { value: f32 },
}

/// Numeric parameter payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParameterValue {
    Float(f32),
    Int(i32),
    Bool(bool),
}

impl ParameterValue {
    /// Collapse to f32 for the RT value store
    #[inline]
    pub fn as_f32(self) -> f32 {
        match self {
            ParameterValue::Float(v) => v,
            ParameterValue::Int(v) => v as f32,
            ParameterValue::Bool(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

/// Transport mutation payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransportChange {
    Tempo(Tempo),
    TimeSignature(TimeSignature),
    PlayState(PlayState),
}

/// Handler for deferred work; runs on a worker thread, returns a status code
pub type AsyncWorkFn = dyn Fn(&[u8]) -> i32 + Send + Sync;

/// Cloneable wrapper so events holding handlers stay `Clone`
#[derive(Clone)]
pub struct WorkCallback(pub Arc<AsyncWorkFn>);

impl WorkCallback {
    pub fn new(f: impl Fn(&[u8]) -> i32 + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }
}

impl std::fmt::Debug for WorkCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WorkCallback")
    }
}

/// Inline argument blob for RT-originated work requests
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineBlob {
    bytes: [u8; Self::CAPACITY],
    len: u8,
}

impl InlineBlob {
    pub const CAPACITY: usize = 24;

    /// Copy in at most `CAPACITY` bytes; the rest is truncated
    pub fn from_slice(data: &[u8]) -> Self {
        let len = data.len().min(Self::CAPACITY);
        let mut bytes = [0u8; Self::CAPACITY];
        bytes[..len].copy_from_slice(&data[..len]);
        Self {
            bytes,
            len: len as u8,
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

/// Rich event with an absolute timestamp in samples since engine start
#[derive(Debug, Clone)]
pub struct Event {
    pub timestamp: u64,
    pub payload: EventPayload,
}

/// Closed sum of everything that can cross between threads
#[derive(Debug, Clone)]
pub enum EventPayload {
    Keyboard {
        target: ObjectId,
        event: KeyboardEvent,
    },
    ParameterChange {
        target: ObjectId,
        index: ParameterIndex,
        value: ParameterValue,
    },
    StringParameterChange {
        target: ObjectId,
        index: ParameterIndex,
        value: Box<str>,
    },
    DataParameterChange {
        target: ObjectId,
        index: ParameterIndex,
        data: Box<[u8]>,
    },
    /// String change whose payload was staged into the blob store at post
    /// time. Produced by the pipeline; posters use `StringParameterChange`.
    StagedStringParameterChange {
        target: ObjectId,
        index: ParameterIndex,
        blob: BlobHandle,
    },
    /// Data change whose payload was staged into the blob store at post time
    StagedDataParameterChange {
        target: ObjectId,
        index: ParameterIndex,
        blob: BlobHandle,
    },
    ProgramChange {
        target: ObjectId,
        program: u8,
    },
    SetBypass {
        target: ObjectId,
        bypassed: bool,
    },
    Transport(TransportChange),
    /// Deferred work request; runs on the worker pool, never on RT
    AsyncWork {
        target: ObjectId,
        callback_id: CallbackId,
        callback: WorkCallback,
        data: Box<[u8]>,
    },
    /// Completion of deferred work, routed back to the requesting processor
    AsyncWorkResponse {
        target: ObjectId,
        callback_id: CallbackId,
        status: i32,
    },
    /// A processor's parameter moved; surfaced to non-RT listeners
    ParameterNotification {
        source: ObjectId,
        index: ParameterIndex,
        normalized: f32,
    },
    /// Processor-emitted keyboard data headed for a MIDI output
    KeyboardNotification {
        source: ObjectId,
        event: KeyboardEvent,
    },
    /// Removal completed on the RT thread; destruction is now authorized
    ProcessorRemoved {
        id: ObjectId,
    },
}

impl Event {
    pub fn new(timestamp: u64, payload: EventPayload) -> Self {
        Self { timestamp, payload }
    }

    /// The processor this event is addressed to, if any
    pub fn target(&self) -> Option<ObjectId> {
        match self.payload {
            EventPayload::Keyboard { target, .. }
            | EventPayload::ParameterChange { target, .. }
            | EventPayload::StringParameterChange { target, .. }
            | EventPayload::DataParameterChange { target, .. }
            | EventPayload::StagedStringParameterChange { target, .. }
            | EventPayload::StagedDataParameterChange { target, .. }
            | EventPayload::ProgramChange { target, .. }
            | EventPayload::SetBypass { target, .. }
            | EventPayload::AsyncWork { target, .. }
            | EventPayload::AsyncWorkResponse { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Convert to the fixed-size RT form, clamping the sample offset into
    /// the current block. Payloads that never cross to the RT thread
    /// (unstaged blobs, work requests, notifications) return `None`.
    pub fn to_rt(&self, block_start: u64) -> Option<RtEvent> {
        let offset = self.timestamp.saturating_sub(block_start).min(u32::MAX as u64) as u32;
        let payload = match self.payload {
            EventPayload::Keyboard { target, event } => RtEventPayload::Keyboard { target, event },
            EventPayload::ParameterChange {
                target,
                index,
                value,
            } => RtEventPayload::ParameterChange {
                target,
                index,
                value,
            },
            EventPayload::StagedStringParameterChange {
                target,
                index,
                blob,
            } => RtEventPayload::StringParameterChange {
                target,
                index,
                blob,
            },
            EventPayload::StagedDataParameterChange {
                target,
                index,
                blob,
            } => RtEventPayload::DataParameterChange {
                target,
                index,
                blob,
            },
            EventPayload::ProgramChange { target, program } => {
                RtEventPayload::ProgramChange { target, program }
            }
            EventPayload::SetBypass { target, bypassed } => {
                RtEventPayload::SetBypass { target, bypassed }
            }
            EventPayload::Transport(change) => RtEventPayload::Transport(change),
            EventPayload::AsyncWorkResponse {
                target,
                callback_id,
                status,
            } => RtEventPayload::AsyncWorkResponse {
                target,
                callback_id,
                status,
            },
            _ => return None,
        };
        Some(RtEvent::new(offset, payload))
    }
}

/// Fixed-size event for the RT fast path
#[derive(Debug, Clone, Copy)]
pub struct RtEvent {
    /// Offset into the current block, in samples
    pub sample_offset: u32,
    pub payload: RtEventPayload,
}

#[derive(Debug, Clone, Copy)]
pub enum RtEventPayload {
    Keyboard {
        target: ObjectId,
        event: KeyboardEvent,
    },
    ParameterChange {
        target: ObjectId,
        index: ParameterIndex,
        value: ParameterValue,
    },
    StringParameterChange {
        target: ObjectId,
        index: ParameterIndex,
        blob: BlobHandle,
    },
    DataParameterChange {
        target: ObjectId,
        index: ParameterIndex,
        blob: BlobHandle,
    },
    ProgramChange {
        target: ObjectId,
        program: u8,
    },
    SetBypass {
        target: ObjectId,
        bypassed: bool,
    },
    Transport(TransportChange),
    AsyncWorkResponse {
        target: ObjectId,
        callback_id: CallbackId,
        status: i32,
    },
    /// RT-originated request for deferred work
    AsyncWorkRequest {
        source: ObjectId,
        callback_id: CallbackId,
        data: InlineBlob,
    },
    ParameterNotification {
        source: ObjectId,
        index: ParameterIndex,
        normalized: f32,
    },
    KeyboardNotification {
        source: ObjectId,
        event: KeyboardEvent,
    },
    ProcessorRemoved {
        id: ObjectId,
    },
    /// Engine command applied on the RT thread; wakes a synchronous waiter
    CommandCompleted {
        command_id: u64,
        status: i32,
    },
}

impl RtEvent {
    pub fn new(sample_offset: u32, payload: RtEventPayload) -> Self {
        Self {
            sample_offset,
            payload,
        }
    }

    /// The resident processor this event is addressed to, if any
    pub fn target(&self) -> Option<ObjectId> {
        match self.payload {
            RtEventPayload::Keyboard { target, .. }
            | RtEventPayload::ParameterChange { target, .. }
            | RtEventPayload::StringParameterChange { target, .. }
            | RtEventPayload::DataParameterChange { target, .. }
            | RtEventPayload::ProgramChange { target, .. }
            | RtEventPayload::SetBypass { target, .. }
            | RtEventPayload::AsyncWorkResponse { target, .. } => Some(target),
            _ => None,
        }
    }
}

/// An RT-side event paired with the block it was emitted in, so the
/// dispatcher can recover absolute time
#[derive(Debug, Clone, Copy)]
pub struct OutboundRtEvent {
    pub event: RtEvent,
    pub block_start: u64,
}

impl OutboundRtEvent {
    #[inline]
    pub fn timestamp(&self) -> u64 {
        self.block_start + self.event.sample_offset as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameter_value_collapse() {
        assert_eq!(ParameterValue::Float(0.5).as_f32(), 0.5);
        assert_eq!(ParameterValue::Int(3).as_f32(), 3.0);
        assert_eq!(ParameterValue::Bool(true).as_f32(), 1.0);
    }

    #[test]
    fn inline_blob_truncates() {
        let long = [7u8; 40];
        let blob = InlineBlob::from_slice(&long);
        assert_eq!(blob.as_slice().len(), InlineBlob::CAPACITY);
        assert!(blob.as_slice().iter().all(|&b| b == 7));
    }

    #[test]
    fn event_targets() {
        let ev = Event::new(
            0,
            EventPayload::SetBypass {
                target: ObjectId::new(),
                bypassed: true,
            },
        );
        assert!(ev.target().is_some());

        let ev = Event::new(0, EventPayload::Transport(TransportChange::Tempo(Tempo(100.0))));
        assert!(ev.target().is_none());
    }

    #[test]
    fn rt_event_is_small() {
        // The RT queue moves these by value; keep them compact
        assert!(std::mem::size_of::<RtEvent>() <= 64);
    }
}
