//! The event pipeline
//!
//! Bidirectional bridge between the RT audio thread and everything else:
//!
//! - non-RT posters push rich `Event`s onto the bounded inbound queue; the
//!   RT thread drains it once per block
//! - the RT thread pushes `RtEvent`s onto the bounded outbound queue; the
//!   dispatcher thread drains it, fans notifications out to listeners,
//!   hands work requests to the worker pool, and wakes synchronous waiters
//!
//! The pipeline owns the dispatcher thread and the worker pool; both are
//! created at engine construction and joined on drop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use reef_core::ObjectId;

use crate::blob::{BlobStore, BlobValue};
use crate::event::{
    CallbackId, Event, EventPayload, OutboundRtEvent, RtEventPayload, WorkCallback,
};
use crate::queue::{EventFifo, OutboundFifo, IN_QUEUE_CAPACITY, OUT_QUEUE_CAPACITY};
use crate::worker::{WorkRequest, WorkerPool, DEFAULT_WORKER_THREADS};

/// Default blob slot count
pub const BLOB_CAPACITY: usize = 256;

/// Idle sleep for the dispatcher loop
const DISPATCHER_IDLE: Duration = Duration::from_micros(500);

/// Receives events surfaced from the RT thread, in RT emission order
pub trait EventListener: Send {
    fn notify(&mut self, event: &Event);
}

// ─── Completion registry ────────────────────────────────────────────────────

struct CompletionSlot {
    value: Mutex<Option<i32>>,
    cv: Condvar,
}

/// Handle for one synchronous waiter
#[derive(Clone)]
pub struct CompletionWaiter {
    slot: Arc<CompletionSlot>,
}

impl CompletionWaiter {
    /// Block up to `timeout` for the RT thread to apply the command.
    /// Returns the status code, or `None` on timeout (the command still
    /// runs to completion; the queues are fire-and-forget once accepted).
    pub fn wait(&self, timeout: Duration) -> Option<i32> {
        let mut guard = self.slot.value.lock();
        if guard.is_none() {
            let _ = self.slot.cv.wait_for(&mut guard, timeout);
        }
        *guard
    }
}

/// Maps command ids to waiters; completion is signalled by the dispatcher
/// thread when the RT thread reports a command as applied
pub struct CompletionRegistry {
    slots: Mutex<HashMap<u64, Arc<CompletionSlot>>>,
    next_id: AtomicU64,
}

impl CompletionRegistry {
    fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocate a command id and a waiter for it
    pub fn register(&self) -> (u64, CompletionWaiter) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(CompletionSlot {
            value: Mutex::new(None),
            cv: Condvar::new(),
        });
        self.slots.lock().insert(id, slot.clone());
        (id, CompletionWaiter { slot })
    }

    /// Drop a registration whose command never made it onto the queue
    pub fn cancel(&self, id: u64) {
        self.slots.lock().remove(&id);
    }

    fn complete(&self, id: u64, status: i32) {
        if let Some(slot) = self.slots.lock().remove(&id) {
            *slot.value.lock() = Some(status);
            slot.cv.notify_all();
        }
    }
}

// ─── Shared state ───────────────────────────────────────────────────────────

/// State shared between the posting side, the RT thread, and the
/// dispatcher thread
pub struct PipelineShared {
    pub to_rt: Arc<EventFifo>,
    pub from_rt: OutboundFifo,
    pub blobs: Arc<BlobStore>,
    completions: CompletionRegistry,
    listeners: Mutex<Vec<Box<dyn EventListener>>>,
    callbacks: RwLock<HashMap<(u64, CallbackId), WorkCallback>>,
    unroutable: AtomicU64,
    exit: AtomicBool,
}

impl PipelineShared {
    pub fn completions(&self) -> &CompletionRegistry {
        &self.completions
    }
}

/// Queue drop/overflow counters for telemetry
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineCounters {
    pub inbound_dropped: u64,
    pub outbound_dropped: u64,
    pub blobs_rejected: u64,
    pub unroutable: u64,
}

// ─── Pipeline ───────────────────────────────────────────────────────────────

pub struct EventPipeline {
    shared: Arc<PipelineShared>,
    /// Taken in Drop so the work channel closes before the workers join
    pool: Option<WorkerPool>,
    dispatcher: Option<JoinHandle<()>>,
    worker_handles: Vec<JoinHandle<()>>,
}

impl EventPipeline {
    pub fn new() -> Self {
        Self::with_capacity(IN_QUEUE_CAPACITY, OUT_QUEUE_CAPACITY, DEFAULT_WORKER_THREADS)
    }

    pub fn with_capacity(inbound: usize, outbound: usize, workers: usize) -> Self {
        let to_rt = Arc::new(EventFifo::new(inbound));
        let shared = Arc::new(PipelineShared {
            to_rt: to_rt.clone(),
            from_rt: OutboundFifo::new(outbound),
            blobs: Arc::new(BlobStore::new(BLOB_CAPACITY)),
            completions: CompletionRegistry::new(),
            listeners: Mutex::new(Vec::new()),
            callbacks: RwLock::new(HashMap::new()),
            unroutable: AtomicU64::new(0),
            exit: AtomicBool::new(false),
        });

        // Worker replies feed straight back into the inbound queue
        let (pool, worker_handles) = WorkerPool::spawn(workers, to_rt);

        let dispatcher = {
            let shared = shared.clone();
            let pool = pool.clone();
            std::thread::Builder::new()
                .name("reef-dispatcher".into())
                .spawn(move || dispatcher_loop(shared, pool))
                .expect("spawn dispatcher thread")
        };

        Self {
            shared,
            pool: Some(pool),
            dispatcher: Some(dispatcher),
            worker_handles,
        }
    }

    /// Shared handles for the RT side and the engine control side
    pub fn shared(&self) -> Arc<PipelineShared> {
        self.shared.clone()
    }

    /// Post an event from a non-RT thread.
    ///
    /// Blob payloads are staged into the slot table here so the queued
    /// event is already fixed-size-convertible; deferred work goes straight
    /// to the worker pool without an RT round trip.
    pub fn post(&self, event: Event) -> bool {
        let Some(pool) = self.pool.as_ref() else {
            return false;
        };
        post_via(&self.shared, pool, event)
    }

    pub fn register_listener(&self, listener: Box<dyn EventListener>) {
        self.shared.listeners.lock().push(listener);
    }

    /// Register a handler for RT-originated work requests from `id`
    pub fn register_work_callback(&self, id: ObjectId, callback_id: CallbackId, cb: WorkCallback) {
        self.shared
            .callbacks
            .write()
            .insert((id.raw(), callback_id), cb);
    }

    /// Drop every handler registered by a removed processor
    pub fn unregister_work_callbacks(&self, id: ObjectId) {
        self.shared
            .callbacks
            .write()
            .retain(|(owner, _), _| *owner != id.raw());
    }

    pub fn completions(&self) -> &CompletionRegistry {
        &self.shared.completions
    }

    pub fn counters(&self) -> PipelineCounters {
        PipelineCounters {
            inbound_dropped: self.shared.to_rt.dropped(),
            outbound_dropped: self.shared.from_rt.dropped(),
            blobs_rejected: self.shared.blobs.rejected(),
            unroutable: self.shared.unroutable.load(Ordering::Relaxed),
        }
    }
}

impl Drop for EventPipeline {
    fn drop(&mut self) {
        self.shared.exit.store(true, Ordering::Release);
        if let Some(handle) = self.dispatcher.take() {
            let _ = handle.join();
        }
        // Dropping the last sender closes the work channel and releases
        // the worker threads (the dispatcher's clone is already gone)
        self.pool.take();
        for handle in self.worker_handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn post_via(shared: &Arc<PipelineShared>, pool: &WorkerPool, event: Event) -> bool {
    let Event { timestamp, payload } = event;
    let staged = match payload {
        EventPayload::AsyncWork {
            target,
            callback_id,
            callback,
            data,
        } => {
            pool.submit(WorkRequest {
                target,
                callback_id,
                callback,
                data,
            });
            return true;
        }
        EventPayload::StringParameterChange {
            target,
            index,
            value,
        } => match shared.blobs.post(BlobValue::Text(value)) {
            Some(blob) => EventPayload::StagedStringParameterChange {
                target,
                index,
                blob,
            },
            None => return false,
        },
        EventPayload::DataParameterChange {
            target,
            index,
            data,
        } => match shared.blobs.post(BlobValue::Bytes(data)) {
            Some(blob) => EventPayload::StagedDataParameterChange {
                target,
                index,
                blob,
            },
            None => return false,
        },
        other => other,
    };
    shared.to_rt.push(Event::new(timestamp, staged))
}

// ─── Dispatcher thread ──────────────────────────────────────────────────────

fn dispatcher_loop(shared: Arc<PipelineShared>, pool: WorkerPool) {
    log::debug!("event dispatcher running");
    loop {
        let mut worked = false;
        while let Some(outbound) = shared.from_rt.pop() {
            worked = true;
            handle_outbound(&shared, &pool, outbound);
        }
        shared.blobs.sweep();

        if shared.exit.load(Ordering::Acquire) {
            break;
        }
        if !worked {
            std::thread::sleep(DISPATCHER_IDLE);
        }
    }
    log::debug!("event dispatcher stopped");
}

fn handle_outbound(shared: &Arc<PipelineShared>, pool: &WorkerPool, outbound: OutboundRtEvent) {
    let timestamp = outbound.timestamp();
    match outbound.event.payload {
        RtEventPayload::AsyncWorkRequest {
            source,
            callback_id,
            data,
        } => {
            let callback = shared
                .callbacks
                .read()
                .get(&(source.raw(), callback_id))
                .cloned();
            match callback {
                Some(callback) => pool.submit(WorkRequest {
                    target: source,
                    callback_id,
                    callback,
                    data: data.as_slice().into(),
                }),
                None => {
                    shared.unroutable.fetch_add(1, Ordering::Relaxed);
                    log::warn!("work request from {source} with unregistered callback {callback_id}");
                }
            }
        }
        RtEventPayload::CommandCompleted { command_id, status } => {
            shared.completions.complete(command_id, status);
        }
        RtEventPayload::ProcessorRemoved { id } => {
            shared.callbacks.write().retain(|(owner, _), _| *owner != id.raw());
            pool.forget(id);
            notify_listeners(
                shared,
                &Event::new(timestamp, EventPayload::ProcessorRemoved { id }),
            );
        }
        RtEventPayload::ParameterNotification {
            source,
            index,
            normalized,
        } => notify_listeners(
            shared,
            &Event::new(
                timestamp,
                EventPayload::ParameterNotification {
                    source,
                    index,
                    normalized,
                },
            ),
        ),
        RtEventPayload::KeyboardNotification { source, event } => notify_listeners(
            shared,
            &Event::new(timestamp, EventPayload::KeyboardNotification { source, event }),
        ),
        _ => {
            shared.unroutable.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn notify_listeners(shared: &Arc<PipelineShared>, event: &Event) {
    let mut listeners = shared.listeners.lock();
    for listener in listeners.iter_mut() {
        listener.notify(event);
    }
}
