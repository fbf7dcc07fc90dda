//! reef-event: Event system for the reef audio host
//!
//! Dual event pipeline between the RT audio thread and non-RT posters and
//! listeners:
//! - closed-sum `Event` / fixed-size `RtEvent` types with explicit
//!   conversion
//! - bounded lock-free queues in both directions with drop accounting
//! - a dispatcher thread fanning RT notifications out to listeners
//! - a worker pool running deferred work with per-processor serialization
//! - a blob slot table carrying string/data payloads past the fixed-size
//!   RT events

mod blob;
mod event;
mod pipeline;
mod queue;
mod worker;

pub use blob::{BlobHandle, BlobStore, BlobValue};
pub use event::{
    CallbackId, Event, EventPayload, InlineBlob, KeyboardEvent, OutboundRtEvent, ParameterValue,
    RtEvent, RtEventPayload, TransportChange, WorkCallback,
};
pub use pipeline::{
    CompletionRegistry, CompletionWaiter, EventListener, EventPipeline, PipelineCounters,
    PipelineShared, BLOB_CAPACITY,
};
pub use queue::{
    EventFifo, OutboundFifo, RtEventDrain, IN_QUEUE_CAPACITY, OUT_QUEUE_CAPACITY, PENDING_CAPACITY,
};
pub use worker::{WorkRequest, WorkerPool, DEFAULT_WORKER_THREADS};
