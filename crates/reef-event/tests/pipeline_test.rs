//! Pipeline integration tests: queue accounting under contention,
//! dispatcher fan-out ordering, and completion waits.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reef_core::ObjectId;
use reef_event::{
    Event, EventFifo, EventListener, EventPayload, EventPipeline, OutboundRtEvent, ParameterValue,
    RtEvent, RtEventPayload,
};

#[test]
fn multi_producer_accounting_and_per_producer_fifo() {
    const PRODUCERS: u32 = 4;
    const EVENTS_PER_PRODUCER: i32 = 50_000;

    let fifo = Arc::new(EventFifo::new(1024));
    let mut handles = Vec::new();
    for producer in 0..PRODUCERS {
        let fifo = fifo.clone();
        handles.push(std::thread::spawn(move || {
            let mut accepted = 0u64;
            for seq in 0..EVENTS_PER_PRODUCER {
                let ok = fifo.push(Event::new(
                    0,
                    EventPayload::ParameterChange {
                        target: ObjectId::NONE,
                        index: producer,
                        value: ParameterValue::Int(seq),
                    },
                ));
                if ok {
                    accepted += 1;
                }
            }
            accepted
        }));
    }

    // Single consumer drains while producers hammer the queue
    let mut received = 0u64;
    let mut last_seq = [-1i32; PRODUCERS as usize];
    loop {
        while let Some(event) = fifo.pop() {
            record(&event, &mut received, &mut last_seq);
        }
        if handles.iter().all(|h| h.is_finished()) {
            // Producers are done; one final sweep empties the queue
            while let Some(event) = fifo.pop() {
                record(&event, &mut received, &mut last_seq);
            }
            break;
        }
        std::thread::yield_now();
    }

    let accepted: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    let pushed = PRODUCERS as u64 * EVENTS_PER_PRODUCER as u64;
    assert_eq!(received, accepted);
    assert_eq!(accepted + fifo.dropped(), pushed);
}

fn record(event: &Event, received: &mut u64, last_seq: &mut [i32; 4]) {
    if let EventPayload::ParameterChange {
        index,
        value: ParameterValue::Int(seq),
        ..
    } = event.payload
    {
        assert!(
            seq > last_seq[index as usize],
            "producer {index} reordered: {seq} after {}",
            last_seq[index as usize]
        );
        last_seq[index as usize] = seq;
        *received += 1;
    }
}

struct Recorder(Arc<Mutex<Vec<(u64, f32)>>>);

impl EventListener for Recorder {
    fn notify(&mut self, event: &Event) {
        if let EventPayload::ParameterNotification { normalized, .. } = event.payload {
            self.0.lock().push((event.timestamp, normalized));
        }
    }
}

#[test]
fn outbound_events_reach_listeners_in_order_with_absolute_time() {
    let pipeline = EventPipeline::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    pipeline.register_listener(Box::new(Recorder(seen.clone())));

    let shared = pipeline.shared();
    let source = ObjectId::new();
    for (offset, value) in [(0u32, 0.1f32), (16, 0.2), (32, 0.3)] {
        shared.from_rt.push(OutboundRtEvent {
            event: RtEvent::new(
                offset,
                RtEventPayload::ParameterNotification {
                    source,
                    index: 0,
                    normalized: value,
                },
            ),
            block_start: 256,
        });
    }

    for _ in 0..500 {
        if seen.lock().len() == 3 {
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    let seen = seen.lock().clone();
    assert_eq!(
        seen,
        vec![(256, 0.1), (272, 0.2), (288, 0.3)],
        "listener order or timestamps wrong"
    );
}

#[test]
fn command_completion_wakes_the_waiter() {
    let pipeline = EventPipeline::new();
    let shared = pipeline.shared();

    let (command_id, waiter) = shared.completions().register();
    shared.from_rt.push(OutboundRtEvent {
        event: RtEvent::new(0, RtEventPayload::CommandCompleted { command_id, status: 0 }),
        block_start: 0,
    });
    assert_eq!(waiter.wait(Duration::from_millis(500)), Some(0));

    // A command that never completes times out instead of hanging
    let (_never, waiter) = shared.completions().register();
    assert_eq!(waiter.wait(Duration::from_millis(10)), None);
}

#[test]
fn blob_payloads_round_trip_through_the_staging_table() {
    let pipeline = EventPipeline::new();
    let shared = pipeline.shared();
    let target = ObjectId::new();

    assert!(pipeline.post(Event::new(
        64,
        EventPayload::StringParameterChange {
            target,
            index: 2,
            value: "program:clean".into(),
        },
    )));

    // The queued event already carries a staged handle
    let event = shared.to_rt.pop().unwrap();
    let rt = event.to_rt(0).unwrap();
    let RtEventPayload::StringParameterChange { blob, index, .. } = rt.payload else {
        panic!("expected a staged string change, got {:?}", rt.payload);
    };
    assert_eq!(index, 2);
    assert_eq!(rt.sample_offset, 64);

    let text = shared
        .blobs
        .consume(blob, |value| match value {
            reef_event::BlobValue::Text(s) => s.to_string(),
            other => panic!("expected text, got {other:?}"),
        })
        .unwrap();
    assert_eq!(text, "program:clean");
}

#[test]
fn async_work_posted_from_non_rt_runs_and_replies_inbound() {
    let pipeline = EventPipeline::new();
    let shared = pipeline.shared();
    let target = ObjectId::new();

    assert!(pipeline.post(Event::new(
        0,
        EventPayload::AsyncWork {
            target,
            callback_id: 9,
            callback: reef_event::WorkCallback::new(|data| data.len() as i32),
            data: vec![5, 6, 7].into(),
        },
    )));

    // The response lands on the inbound queue for the RT thread
    let mut reply = None;
    for _ in 0..500 {
        if let Some(event) = shared.to_rt.pop() {
            reply = Some(event);
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    match reply.expect("no reply").payload {
        EventPayload::AsyncWorkResponse {
            target: t,
            callback_id,
            status,
        } => {
            assert_eq!(t, target);
            assert_eq!(callback_id, 9);
            assert_eq!(status, 3);
        }
        other => panic!("unexpected reply {other:?}"),
    }
}
