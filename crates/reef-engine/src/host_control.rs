//! Host facade handed to processors
//!
//! Non-RT half of the processor/engine contract: posting events, deferred
//! work registration, and engine facts. Transport state deliberately does
//! not live here; it arrives per process call through `ProcessContext` so
//! processors never hold stale engine references.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use reef_core::ObjectId;
use reef_event::{CallbackId, Event, EventPayload, EventPipeline, WorkCallback};

/// Cloneable, thread-safe handle for processors and frontends. All
/// methods are non-RT; on the RT thread processors use their outbox.
#[derive(Clone)]
pub struct HostControl {
    pipeline: Arc<EventPipeline>,
    clock: Arc<AtomicU64>,
    sample_rate: f32,
    block_size: usize,
}

impl HostControl {
    pub(crate) fn new(
        pipeline: Arc<EventPipeline>,
        clock: Arc<AtomicU64>,
        sample_rate: f32,
        block_size: usize,
    ) -> Self {
        Self {
            pipeline,
            clock,
            sample_rate,
            block_size,
        }
    }

    #[inline]
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Engine clock at the last completed block, in samples since start
    #[inline]
    pub fn current_time(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    /// Post an event into the engine; returns false if it was dropped
    pub fn post_event(&self, event: Event) -> bool {
        self.pipeline.post(event)
    }

    /// Register a handler for work requests this processor will post from
    /// the RT thread
    pub fn register_work_callback(&self, id: ObjectId, callback_id: CallbackId, cb: WorkCallback) {
        self.pipeline.register_work_callback(id, callback_id, cb);
    }

    /// Request deferred work directly from a non-RT context
    pub fn request_non_rt_work(
        &self,
        target: ObjectId,
        callback_id: CallbackId,
        callback: WorkCallback,
        data: &[u8],
    ) -> bool {
        self.post_event(Event::new(
            self.current_time(),
            EventPayload::AsyncWork {
                target,
                callback_id,
                callback,
                data: data.into(),
            },
        ))
    }
}
