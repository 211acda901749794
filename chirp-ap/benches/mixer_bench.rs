//! Mixer callback cost
//!
//! Renders one 512-frame device block, first with idle slots and then with
//! every slot playing a chirp that the fill engine tops up before each block.

use chirp_ap::playback::{ChirpParams, Mixer, OutputControl, SlotShared};
use chirp_ap::AudioEngine;
use chirp_common::EngineConfig;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;

const BLOCK_FRAMES: usize = 512;

fn start_chirps(engine: &mut AudioEngine) {
    let params = ChirpParams {
        duration_ms: 60_000,
        ..Default::default()
    };
    for slot in 0..engine.slot_count() {
        engine.start_chirp(slot, params).expect("chirp");
    }
}

fn bench_mixer(c: &mut Criterion) {
    let mut group = c.benchmark_group("mixer");
    group.throughput(Throughput::Elements(BLOCK_FRAMES as u64));

    group.bench_function("render_block_idle", |b| {
        let slots = (0..3).map(|_| Arc::new(SlotShared::new(4096))).collect();
        let mut mixer = Mixer::new(slots, Arc::new(OutputControl::new(1.0)));
        let mut block = vec![0i16; BLOCK_FRAMES * 2];
        b.iter(|| {
            mixer.render(black_box(&mut block));
        });
    });

    for streams in [1usize, 3] {
        group.bench_function(format!("tick_and_render_{}_chirps", streams), |b| {
            let config = EngineConfig {
                max_streams: streams,
                ring_capacity: Some(4096),
                ..Default::default()
            };
            let mut engine = AudioEngine::new(config).expect("engine");
            let mut mixer = engine.mixer();
            let mut block = vec![0i16; BLOCK_FRAMES * 2];
            start_chirps(&mut engine);

            b.iter(|| {
                if engine.is_idle() {
                    start_chirps(&mut engine);
                }
                black_box(engine.tick());
                mixer.render(black_box(&mut block));
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_mixer);
criterion_main!(benches);
