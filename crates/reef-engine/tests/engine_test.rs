//! End-to-end engine tests
//!
//! Each test owns the graph on the test thread (standing in for the audio
//! callback) and runs blocking control operations on a helper thread,
//! pumping blocks until they complete — the same shape as a real host
//! with an audio backend driving `process`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reef_core::{midi, PlayState, Sample, SamplePosition};
use reef_engine::{
    AudioGraph, Controller, Engine, Equalizer, MidiDispatcher, MidiEgress, PluginType,
};
use reef_event::{Event, EventListener, EventPayload, ParameterValue, WorkCallback};

const BLOCK: usize = 64;
const SAMPLE_RATE: f32 = 48000.0;
const CHANNELS: usize = 8;

struct Fixture {
    engine: Arc<Engine>,
    controller: Controller,
    graph: AudioGraph,
    input: Vec<Sample>,
    output: Vec<Sample>,
}

impl Fixture {
    fn new() -> Self {
        let (engine, graph) = Engine::new(SAMPLE_RATE, BLOCK);
        let midi = MidiDispatcher::new(engine.clone(), 8, 8);
        engine.register_listener(MidiEgress::new(midi.clone()));
        let controller = Controller::new(engine.clone(), midi);
        Self {
            engine,
            controller,
            graph,
            input: vec![0.0; CHANNELS * BLOCK],
            output: vec![0.0; CHANNELS * BLOCK],
        }
    }

    fn process(&mut self) {
        self.graph.process(&self.input, &mut self.output);
    }

    fn process_blocks(&mut self, count: usize) {
        for _ in 0..count {
            self.process();
        }
    }

    /// Run a blocking control operation while pumping audio blocks
    fn ctl<T: Send + 'static>(
        &mut self,
        op: impl FnOnce(&Engine) -> T + Send + 'static,
    ) -> T {
        let engine = self.engine.clone();
        let handle = std::thread::spawn(move || op(&engine));
        while !handle.is_finished() {
            self.process();
            std::thread::sleep(Duration::from_micros(100));
        }
        handle.join().expect("control op panicked")
    }

    fn fill_input(&mut self, channel: usize, value: Sample) {
        self.input[channel * BLOCK..(channel + 1) * BLOCK].fill(value);
    }

    fn output_channel(&self, channel: usize) -> &[Sample] {
        &self.output[channel * BLOCK..(channel + 1) * BLOCK]
    }

    /// One mono track with a passthrough and a gain plugin, routed from
    /// engine channel 0 back to engine channel 0
    fn mono_chain(&mut self) {
        self.ctl(|engine| {
            engine.create_track("main", 1)?;
            engine.add_plugin_to_track("main", "reef.passthrough", "pt", "", PluginType::Internal)?;
            engine.add_plugin_to_track("main", "reef.gain", "gain", "", PluginType::Internal)?;
            engine.connect_audio_input_channel(0, 0, "main")?;
            engine.connect_audio_output_channel(0, 0, "main")
        })
        .unwrap();
    }
}

struct NoteCounter(Arc<AtomicUsize>);

impl EventListener for NoteCounter {
    fn notify(&mut self, event: &Event) {
        if matches!(event.payload, EventPayload::KeyboardNotification { .. }) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn wait_for(mut predicate: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if predicate() {
            return;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    panic!("condition not reached within 1s");
}

// ─── Scenarios ──────────────────────────────────────────────────────────────

#[test]
fn empty_engine_produces_silence() {
    let mut fx = Fixture::new();
    assert_eq!(fx.engine.sample_rate(), SAMPLE_RATE);

    fx.fill_input(0, 0.8);
    fx.process();
    assert!(fx.output.iter().all(|&s| s == 0.0));
}

#[test]
fn tracks_and_plugins_assemble_in_order() {
    let mut fx = Fixture::new();
    fx.ctl(|engine| {
        engine.create_track("left", 1)?;
        engine.create_track("right", 1)?;
        for track in ["left", "right"] {
            let suffix = &track[..1];
            engine.add_plugin_to_track(
                track,
                "reef.passthrough",
                &format!("passthrough_0_{suffix}"),
                "",
                PluginType::Internal,
            )?;
            engine.add_plugin_to_track(
                track,
                "reef.gain",
                &format!("gain_0_{suffix}"),
                "",
                PluginType::Internal,
            )?;
            engine.add_plugin_to_track(
                track,
                "reef.equalizer",
                &format!("equalizer_0_{suffix}"),
                "",
                PluginType::Internal,
            )?;
        }
        Ok::<_, reef_core::EngineError>(())
    })
    .unwrap();

    let tracks = fx.controller.tracks();
    let names: Vec<&str> = tracks.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["left", "right"]);
    assert_eq!(tracks[0].channels, 1);
    assert_eq!(tracks[1].channels, 1);

    for track in ["left", "right"] {
        let plugins = fx.controller.processors_on_track(track).unwrap();
        assert_eq!(plugins.len(), 3);
        assert!(plugins[0].name.starts_with("passthrough"));
        assert!(plugins[2].name.starts_with("equalizer"));
    }
    assert_eq!(fx.graph.track_count(), 2);
}

#[test]
fn duplicate_names_are_rejected() {
    let mut fx = Fixture::new();
    fx.ctl(|engine| engine.create_track("t", 1)).unwrap();

    let err = fx.ctl(|engine| engine.create_track("t", 1)).unwrap_err();
    assert!(matches!(err, reef_core::EngineError::InvalidTrackName(_)));

    fx.ctl(|engine| {
        engine.add_plugin_to_track("t", "reef.gain", "g", "", PluginType::Internal)
    })
    .unwrap();
    let err = fx
        .ctl(|engine| engine.add_plugin_to_track("t", "reef.gain", "g", "", PluginType::Internal))
        .unwrap_err();
    assert!(matches!(err, reef_core::EngineError::InvalidPluginName(_)));
}

#[test]
fn audio_flows_through_routes_additively() {
    let mut fx = Fixture::new();
    fx.mono_chain();
    // A second identical output route doubles the contribution
    fx.ctl(|engine| engine.connect_audio_output_channel(1, 0, "main"))
        .unwrap();
    fx.ctl(|engine| engine.connect_audio_output_channel(1, 0, "main"))
        .unwrap();

    fx.fill_input(0, 0.25);
    fx.process();
    for &sample in fx.output_channel(0) {
        assert!((sample - 0.25).abs() < 1e-6);
    }
    for &sample in fx.output_channel(1) {
        assert!((sample - 0.5).abs() < 1e-6);
    }
    // Unrouted channels stay silent
    assert!(fx.output_channel(2).iter().all(|&s| s == 0.0));
}

#[test]
fn parameter_changes_reach_the_store_and_the_audio() {
    let mut fx = Fixture::new();
    fx.mono_chain();

    // Normalized 0.5 over [-60, 12] is -24 dB
    fx.controller.set_parameter("gain", "gain", 0.5).unwrap();
    fx.process();

    let value = fx.controller.parameter_value("gain", "gain").unwrap();
    assert!((value - 0.5).abs() < 1e-6);

    fx.fill_input(0, 1.0);
    fx.process();
    let expected = 10f32.powf(-24.0 / 20.0);
    for &sample in fx.output_channel(0) {
        assert!((sample - expected).abs() < 1e-4);
    }
}

#[test]
fn future_events_wait_for_their_block() {
    let mut fx = Fixture::new();
    fx.mono_chain();

    let entry = fx.engine.registry().by_name("gain").unwrap();
    // Two blocks ahead of the current clock
    let when = fx.engine.current_time() + 2 * BLOCK as u64;
    fx.engine
        .post_event(Event::new(
            when,
            EventPayload::ParameterChange {
                target: entry.id,
                index: 0,
                value: ParameterValue::Float(-60.0),
            },
        ))
        .unwrap();

    fx.process();
    assert_eq!(entry.parameters.read(0), 0.0);
    fx.process();
    assert_eq!(entry.parameters.read(0), 0.0);
    fx.process();
    assert_eq!(entry.parameters.read(0), -60.0);
}

#[test]
fn bypass_ramp_blends_to_passthrough() {
    let mut fx = Fixture::new();
    fx.mono_chain();

    // Drive the gain way down so processed and dry are distinguishable
    fx.controller.set_parameter("gain", "gain", 0.0).unwrap();
    fx.process();
    let quiet = 10f32.powf(-60.0 / 20.0);

    fx.fill_input(0, 1.0);
    fx.process();
    assert!((fx.output_channel(0)[0] - quiet).abs() < 1e-4);

    fx.controller.set_bypass("gain", true).unwrap();

    // First ramp block: sample 0 still carries full processed weight
    fx.process();
    assert!((fx.output_channel(0)[0] - quiet).abs() < 1e-4);
    // Blend stays inside the hull of the two sources
    for &sample in fx.output_channel(0) {
        assert!(sample >= quiet - 1e-4 && sample <= 1.0 + 1e-4);
    }

    // 32 ms at 48 kHz is 1536 samples = 24 blocks; run past the ramp
    fx.process_blocks(24);
    fx.process();
    for &sample in fx.output_channel(0) {
        assert_eq!(sample, 1.0);
    }

    // And back in
    fx.controller.set_bypass("gain", false).unwrap();
    fx.process_blocks(25);
    fx.process();
    for &sample in fx.output_channel(0) {
        assert!((sample - quiet).abs() < 1e-4);
    }
}

#[test]
fn transport_follows_play_state() {
    let mut fx = Fixture::new();
    assert_eq!(fx.graph.transport().play_state(), PlayState::Stopped);

    fx.controller.play().unwrap();
    fx.process();
    assert_eq!(fx.graph.transport().play_state(), PlayState::Playing);
    assert!(!fx.graph.transport().state_changed());
    assert_eq!(fx.graph.transport().position().0, BLOCK as u64);

    fx.process_blocks(3);
    assert_eq!(fx.graph.transport().position().0, 4 * BLOCK as u64);

    fx.controller.stop().unwrap();
    fx.process();
    assert_eq!(fx.graph.transport().position(), SamplePosition::ZERO);

    fx.controller.set_tempo(140.0).unwrap();
    fx.process();
    assert_eq!(fx.graph.transport().tempo().0, 140.0);
}

#[test]
fn omni_keyboard_connection_fires_once_per_connection() {
    let mut fx = Fixture::new();
    fx.ctl(|engine| {
        engine.create_track("keys", 2)?;
        engine.add_plugin_to_track("keys", "reef.passthrough", "fwd", "", PluginType::Internal)
    })
    .unwrap();

    let notes = Arc::new(AtomicUsize::new(0));
    fx.engine
        .register_listener(Box::new(NoteCounter(notes.clone())));

    let midi = fx.controller.midi().clone();
    midi.connect_kb_to_track(0, "keys", midi::OMNI).unwrap();

    // Note-on on channel 3 matches the OMNI bucket exactly once
    midi.receive(0, &[0x93, 60, 100], 0);
    fx.process();
    wait_for(|| notes.load(Ordering::SeqCst) == 1);

    // Adding a channel-3 connection makes the same message fire twice
    midi.connect_kb_to_track(0, "keys", 3).unwrap();
    midi.receive(0, &[0x93, 60, 100], 0);
    fx.process();
    wait_for(|| notes.load(Ordering::SeqCst) == 3);

    // A message on another channel only hits OMNI
    midi.receive(0, &[0x95, 60, 100], 0);
    fx.process();
    wait_for(|| notes.load(Ordering::SeqCst) == 4);
}

#[test]
fn cc_mapping_scales_into_the_declared_range() {
    let mut fx = Fixture::new();
    fx.mono_chain();

    let midi = fx.controller.midi().clone();
    midi.connect_cc_to_parameter(0, "gain", "gain", 7, -60.0, 12.0, midi::OMNI)
        .unwrap();

    // CC 7 value 64: 64/127 * 72 - 60 = -23.71...
    midi.receive(0, &[0xB0, 7, 64], 0);
    fx.process();

    let entry = fx.engine.registry().by_name("gain").unwrap();
    let domain = entry.parameters.read(0);
    assert!((domain + 23.716).abs() < 0.01, "mapped value was {domain}");
}

#[test]
fn midi_validation_errors() {
    let mut fx = Fixture::new();
    fx.ctl(|engine| engine.create_track("t", 1)).unwrap();
    let midi = fx.controller.midi().clone();

    assert!(matches!(
        midi.connect_kb_to_track(64, "t", 0),
        Err(reef_core::EngineError::InvalidMidiPort(64))
    ));
    assert!(matches!(
        midi.connect_kb_to_track(0, "t", 17),
        Err(reef_core::EngineError::InvalidChannel(17))
    ));
    assert!(matches!(
        midi.connect_kb_to_track(0, "missing", 0),
        Err(reef_core::EngineError::InvalidTrackName(_))
    ));
    assert!(matches!(
        midi.connect_track_to_output(0, "t", midi::OMNI),
        Err(reef_core::EngineError::InvalidChannel(_))
    ));
    assert!(matches!(
        midi.connect_cc_to_parameter(0, "t", "nope", 7, 0.0, 1.0, 0),
        Err(reef_core::EngineError::InvalidParameter(_))
    ));
}

#[test]
fn removed_processor_discards_inflight_work_response() {
    let mut fx = Fixture::new();
    fx.mono_chain();

    let entry = fx.engine.registry().by_name("gain").unwrap();
    let ran = Arc::new(AtomicUsize::new(0));
    let ran_in_cb = ran.clone();

    let dropped_before = fx.graph.dropped_events();
    fx.engine
        .post_event(Event::new(
            0,
            EventPayload::AsyncWork {
                target: entry.id,
                callback_id: 1,
                callback: WorkCallback::new(move |_| {
                    std::thread::sleep(Duration::from_millis(20));
                    ran_in_cb.fetch_add(1, Ordering::SeqCst);
                    0
                }),
                data: Box::default(),
            },
        ))
        .unwrap();

    // Remove the processor while the handler is still running
    fx.ctl(|engine| engine.remove_plugin_from_track("gain"))
        .unwrap();
    assert!(fx.engine.registry().by_name("gain").is_none());

    // The handler completes, but its response has nowhere to land
    wait_for(|| ran.load(Ordering::SeqCst) == 1);
    let mut settled = false;
    for _ in 0..200 {
        fx.process();
        if fx.graph.dropped_events() > dropped_before {
            settled = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(settled, "work response should be dropped for a gone target");
}

#[test]
fn rt_work_requests_run_registered_handlers() {
    let mut fx = Fixture::new();
    fx.mono_chain();

    let entry = fx.engine.registry().by_name("gain").unwrap();
    let ran = Arc::new(AtomicUsize::new(0));
    let ran_in_cb = ran.clone();
    let host = fx.engine.host_control();
    host.register_work_callback(
        entry.id,
        3,
        WorkCallback::new(move |data| {
            ran_in_cb.fetch_add(1, Ordering::SeqCst);
            data.first().copied().unwrap_or(0) as i32
        }),
    );

    // Stand in for the processor's outbox flush: an RT-side work request
    // as the graph would publish it at the end of a block
    let shared = fx.engine.pipeline().shared();
    shared.from_rt.push(reef_event::OutboundRtEvent {
        event: reef_event::RtEvent::new(
            0,
            reef_event::RtEventPayload::AsyncWorkRequest {
                source: entry.id,
                callback_id: 3,
                data: reef_event::InlineBlob::from_slice(&[42]),
            },
        ),
        block_start: fx.engine.current_time(),
    });

    wait_for(|| ran.load(Ordering::SeqCst) == 1);

    // The response targets a resident processor, so nothing is dropped
    let dropped_before = fx.graph.dropped_events();
    fx.process_blocks(4);
    assert_eq!(fx.graph.dropped_events(), dropped_before);
}

#[test]
fn delete_track_removes_everything() {
    let mut fx = Fixture::new();
    fx.mono_chain();
    assert_eq!(fx.graph.track_count(), 1);

    fx.ctl(|engine| engine.delete_track("main")).unwrap();
    assert_eq!(fx.graph.track_count(), 0);
    assert!(fx.engine.registry().by_name("main").is_none());
    assert!(fx.engine.registry().by_name("gain").is_none());

    // Audio keeps flowing as silence
    fx.fill_input(0, 1.0);
    fx.process();
    assert!(fx.output.iter().all(|&s| s == 0.0));
}

#[test]
fn equalizer_loads_and_processes() {
    let mut fx = Fixture::new();
    fx.ctl(|engine| {
        engine.create_track("eq_track", 2)?;
        engine.connect_audio_input_channel(0, 0, "eq_track")?;
        engine.connect_audio_input_channel(1, 1, "eq_track")?;
        engine.connect_audio_output_channel(0, 0, "eq_track")?;
        engine.connect_audio_output_channel(1, 1, "eq_track")?;
        engine.add_plugin_to_track("eq_track", Equalizer::UID, "eq", "", PluginType::Internal)
    })
    .unwrap();

    // Flat EQ passes a DC-free signal through nearly untouched
    for i in 0..BLOCK {
        let sample = (i as f32 * 0.37).sin() * 0.5;
        fx.input[i] = sample;
        fx.input[BLOCK + i] = sample;
    }
    fx.process();
    for i in 0..BLOCK {
        assert!((fx.output_channel(0)[i] - fx.input[i]).abs() < 1e-3);
    }
    // Internal uids resolve; unknown ones do not
    let err = fx
        .ctl(|engine| {
            engine.add_plugin_to_track("eq_track", "reef.unknown", "x", "", PluginType::Internal)
        })
        .unwrap_err();
    assert!(matches!(err, reef_core::EngineError::InvalidPluginUid(_)));
}
