//! reef: headless audio plugin host
//!
//! Loads a JSON configuration, builds the track graph, wires MIDI
//! routing, schedules configured events and runs the engine offline for
//! the requested duration.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use clap::Parser;
use reef_core::EngineError;
use reef_engine::{Controller, Engine, MidiDispatcher, MidiEgress};
use reef_host::{dump_parameters, JsonConfigurator, OfflineFrontend};

#[derive(Parser)]
#[command(name = "reef", about = "Headless real-time audio plugin host", version)]
struct Args {
    /// JSON configuration file
    config: PathBuf,

    /// Seconds of audio to process before exiting
    #[arg(long, default_value_t = 1.0)]
    duration: f64,

    /// Engine block size in samples
    #[arg(long, default_value_t = 64)]
    block_size: usize,

    /// Number of MIDI input/output ports to expose
    #[arg(long, default_value_t = 8)]
    midi_ports: u16,

    /// Print the parameter dump after loading and exit
    #[arg(long)]
    dump_parameters: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    std::process::exit(run(args));
}

fn run(args: Args) -> i32 {
    let (engine, graph) = Engine::new(48000.0, args.block_size);
    let midi = MidiDispatcher::new(engine.clone(), args.midi_ports, args.midi_ports);
    engine.register_listener(MidiEgress::new(midi.clone()));
    let controller = Controller::new(engine.clone(), midi);

    // The engine applies control operations at block boundaries, so the
    // frontend must already be running while the configuration loads
    let stop = Arc::new(AtomicBool::new(false));
    let blocks = Arc::new(AtomicU64::new(0));
    let pump = {
        let stop = stop.clone();
        let blocks = blocks.clone();
        let mut frontend = OfflineFrontend::new(graph);
        std::thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                frontend.process_block();
                blocks.store(frontend.blocks_processed(), Ordering::Release);
            }
            frontend
        })
    };

    // Widen the engine edge to the frontend's full channel count so
    // configured routes can address any of its channels
    let channels = reef_core::MAX_ENGINE_CHANNELS;
    let code = match engine
        .set_audio_input_channels(channels)
        .and_then(|()| engine.set_audio_output_channels(channels))
    {
        Ok(()) => load_and_run(&args, &engine, &controller, &blocks),
        Err(error) => {
            log::error!("engine channel setup failed: {error}");
            error.exit_code()
        }
    };

    stop.store(true, Ordering::Release);
    let frontend = match pump.join() {
        Ok(frontend) => frontend,
        Err(_) => {
            log::error!("audio pump thread panicked");
            return 1;
        }
    };

    let counters = engine.counters();
    log::info!(
        "done: {} blocks, {} inbound drops, {} outbound drops, {} graph drops",
        frontend.blocks_processed(),
        counters.inbound_dropped,
        counters.outbound_dropped,
        frontend.graph().dropped_events()
    );
    code
}

fn load_and_run(
    args: &Args,
    engine: &Arc<Engine>,
    controller: &Controller,
    blocks: &Arc<AtomicU64>,
) -> i32 {
    let configurator = JsonConfigurator::new(controller);

    if let Err(error) = configurator.load_host_config(&args.config) {
        log::error!("host config rejected: {error}");
        return error.exit_code();
    }
    if let Err(error) = configurator.load_tracks(&args.config) {
        log::error!("track configuration rejected: {error}");
        return error.exit_code();
    }
    match configurator.load_midi(&args.config) {
        Ok(()) | Err(EngineError::NoMidiDefinitions) => {}
        Err(error) => {
            log::error!("midi configuration rejected: {error}");
            return error.exit_code();
        }
    }
    match configurator.load_events(&args.config) {
        Ok(()) | Err(EngineError::NoEventsDefinitions) => {}
        Err(error) => {
            log::error!("events rejected: {error}");
            return error.exit_code();
        }
    }

    if args.dump_parameters {
        match serde_json::to_string_pretty(&dump_parameters(controller)) {
            Ok(dump) => println!("{dump}"),
            Err(error) => log::error!("parameter dump failed: {error}"),
        }
        return 0;
    }

    // Run the requested duration's worth of blocks from here on
    let start = blocks.load(Ordering::Acquire);
    let target = start
        + (args.duration * engine.sample_rate() as f64 / args.block_size as f64).ceil() as u64;
    while blocks.load(Ordering::Acquire) < target {
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
    0
}
