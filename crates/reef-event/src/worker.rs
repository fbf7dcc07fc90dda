//! Worker pool for deferred (non-RT) work
//!
//! Processors never block or touch I/O on the audio thread; anything slow
//! is shipped here as a work request and answered with an async-work
//! response event. At most one handler runs concurrently per processor.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use reef_core::ObjectId;

use crate::event::{CallbackId, Event, EventPayload, WorkCallback};
use crate::queue::EventFifo;

/// Default worker thread count
pub const DEFAULT_WORKER_THREADS: usize = 2;

/// A unit of deferred work bound to one processor
pub struct WorkRequest {
    pub target: ObjectId,
    pub callback_id: CallbackId,
    pub callback: WorkCallback,
    pub data: Box<[u8]>,
}

struct PoolShared {
    /// One mutex per processor with in-flight work, held for the duration
    /// of a handler so a processor never sees two concurrent handlers
    locks: Mutex<HashMap<ObjectId, Arc<Mutex<()>>>>,
    /// Completions are posted back onto the inbound event queue
    replies: Arc<EventFifo>,
}

/// Cloneable handle feeding the pool; worker threads exit when every
/// handle (and with it the channel sender) is gone
#[derive(Clone)]
pub struct WorkerPool {
    tx: Sender<WorkRequest>,
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    pub fn spawn(threads: usize, replies: Arc<EventFifo>) -> (Self, Vec<JoinHandle<()>>) {
        let (tx, rx) = crossbeam_channel::bounded::<WorkRequest>(256);
        let shared = Arc::new(PoolShared {
            locks: Mutex::new(HashMap::new()),
            replies,
        });

        let handles = (0..threads.max(1))
            .map(|index| {
                let rx = rx.clone();
                let shared = shared.clone();
                std::thread::Builder::new()
                    .name(format!("reef-worker-{index}"))
                    .spawn(move || worker_loop(rx, shared))
                    .expect("spawn worker thread")
            })
            .collect();

        (Self { tx, shared }, handles)
    }

    /// Queue a work request. Fails silently (with a log line) if the pool
    /// backlog is full; the requesting processor simply never hears back.
    pub fn submit(&self, request: WorkRequest) {
        if self.tx.try_send(request).is_err() {
            log::warn!("worker pool backlog full, dropping work request");
        }
    }

    /// Forget the serialization lock of a removed processor
    pub fn forget(&self, id: ObjectId) {
        self.shared.locks.lock().remove(&id);
    }
}

fn worker_loop(rx: Receiver<WorkRequest>, shared: Arc<PoolShared>) {
    while let Ok(request) = rx.recv() {
        let lock = {
            let mut locks = shared.locks.lock();
            locks.entry(request.target).or_default().clone()
        };
        let _guard = lock.lock();

        let status = (request.callback.0)(&request.data);

        shared.replies.push(Event::new(
            0,
            EventPayload::AsyncWorkResponse {
                target: request.target,
                callback_id: request.callback_id,
                status,
            },
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn wait_for_reply(fifo: &EventFifo) -> Event {
        for _ in 0..500 {
            if let Some(event) = fifo.pop() {
                return event;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        panic!("no reply from worker pool");
    }

    #[test]
    fn work_runs_and_replies() {
        let replies = Arc::new(EventFifo::new(16));
        let (pool, handles) = WorkerPool::spawn(1, replies.clone());

        let target = ObjectId::new();
        pool.submit(WorkRequest {
            target,
            callback_id: 7,
            callback: WorkCallback::new(|data| data.len() as i32),
            data: vec![1, 2, 3].into(),
        });

        let reply = wait_for_reply(&replies);
        match reply.payload {
            EventPayload::AsyncWorkResponse {
                target: t,
                callback_id,
                status,
            } => {
                assert_eq!(t, target);
                assert_eq!(callback_id, 7);
                assert_eq!(status, 3);
            }
            other => panic!("unexpected reply: {other:?}"),
        }

        drop(pool);
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn handlers_for_one_processor_are_serialized() {
        let replies = Arc::new(EventFifo::new(64));
        let (pool, handles) = WorkerPool::spawn(4, replies.clone());

        let target = ObjectId::new();
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for i in 0..8 {
            let concurrent = concurrent.clone();
            let peak = peak.clone();
            pool.submit(WorkRequest {
                target,
                callback_id: i,
                callback: WorkCallback::new(move |_| {
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(2));
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                    0
                }),
                data: Box::default(),
            });
        }

        for _ in 0..8 {
            wait_for_reply(&replies);
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);

        drop(pool);
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
