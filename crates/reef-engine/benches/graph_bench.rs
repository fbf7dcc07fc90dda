//! Track processing throughput

use criterion::{criterion_group, criterion_main, Criterion};
use reef_core::SampleBuffer;
use reef_engine::{Gain, Passthrough, ProcessContext, Processor, Track, Transport};

const BLOCK: usize = 64;

fn build_track(children: usize) -> Track {
    let mut track = Track::new("bench", 2, 48000.0, BLOCK);
    for i in 0..children {
        let mut plugin: Box<dyn Processor> = if i % 2 == 0 {
            Box::new(Gain::new(&format!("gain_{i}"), "Gain"))
        } else {
            Box::new(Passthrough::new(&format!("pt_{i}"), "Passthrough"))
        };
        plugin.data_mut().set_input_channels(2);
        plugin.data_mut().set_output_channels(2);
        let (_tx, rx) = rtrb::RingBuffer::new(64);
        assert!(track.add_child(plugin, rx).is_ok());
    }
    track
}

fn bench_track(c: &mut Criterion) {
    let transport = Transport::new(48000.0);
    let ctx = ProcessContext {
        transport: &transport,
        sample_rate: 48000.0,
        block_size: BLOCK,
    };
    let mut input = SampleBuffer::new(2, BLOCK);
    for ch in 0..2 {
        for (i, sample) in input.channel_mut(ch).iter_mut().enumerate() {
            *sample = (i as f32 * 0.13).sin() * 0.5;
        }
    }
    let mut output = SampleBuffer::new(2, BLOCK);

    for children in [1usize, 4, 8] {
        let mut track = build_track(children);
        c.bench_function(&format!("track_process_{children}_plugins"), |b| {
            b.iter(|| {
                track.process_audio(&ctx, &input, &mut output);
                std::hint::black_box(output.channel(0)[0])
            })
        });
    }
}

criterion_group!(benches, bench_track);
criterion_main!(benches);
