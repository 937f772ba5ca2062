//! Benchmarks for per-frame run-ahead overhead

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use oc_core::{AvGate, CoreInstance, CoreSource, DEVICE_JOYPAD, QueueNotifier, RunAheadConfig};
use oc_runahead::sim::{presenting_callbacks, SimCore, SimLoader};
use oc_runahead::{HookedCore, InputTracker, RunAhead};
use std::fs;
use std::rc::Rc;
use tempfile::TempDir;

struct Setup {
    _dir: TempDir,
    primary: HookedCore,
    runahead: RunAhead,
    config: RunAheadConfig,
}

fn setup(frames: u32, secondary_instance: bool) -> Setup {
    let dir = TempDir::new().unwrap();
    let library = dir.path().join("sim_libretro.so");
    fs::write(&library, b"core").unwrap();

    let av = AvGate::new();
    let (callbacks, _presented) = presenting_callbacks(&av);
    let mut core = SimCore::new();
    core.set_callbacks(callbacks);

    let config = RunAheadConfig {
        enabled: true,
        frames,
        secondary_instance,
        hide_warnings: true,
        temp_directory: Some(dir.path().join("tmp")),
    };
    let source = CoreSource {
        library_path: library,
        game: None,
    };

    Setup {
        runahead: RunAhead::new(av, source, Box::new(SimLoader::new())),
        primary: HookedCore::new(Box::new(core)),
        config,
        _dir: dir,
    }
}

fn bench_run_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("run_frame");

    for frames in [0u32, 1, 2, 4].iter() {
        for (name, secondary) in [("single", false), ("dual", true)] {
            group.bench_with_input(BenchmarkId::new(name, frames), frames, |b, &frames| {
                let mut s = setup(frames, secondary);
                let mut notifier = QueueNotifier::new();
                let mut frame = 0u64;

                b.iter(|| {
                    frame += 1;
                    s.runahead
                        .run_frame(&mut s.primary, &s.config, black_box(frame), &mut notifier);
                });
            });
        }
    }

    group.finish();
}

fn bench_input_tracking(c: &mut Criterion) {
    let mut group = c.benchmark_group("input_tracking");

    group.bench_function("observe_unchanged", |b| {
        let tracker = InputTracker::new().unwrap();
        b.iter(|| {
            for port in 0..2 {
                for id in 0..16 {
                    tracker.observe(port, DEVICE_JOYPAD, 0, black_box(id), 0);
                }
            }
        });
    });

    group.bench_function("hooked_query", |b| {
        let mut core = HookedCore::new(Box::new(SimCore::new()));
        core.install_hooks(Rc::new(InputTracker::new().unwrap()));
        b.iter(|| black_box(core.callbacks().input(0, DEVICE_JOYPAD, 0, black_box(8))));
    });

    group.finish();
}

criterion_group!(benches, bench_run_frame, bench_input_tracking);
criterion_main!(benches);
