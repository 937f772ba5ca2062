//! End-to-end run-ahead behaviour against the deterministic reference core

use oc_core::{
    AvGate, CoreInstance, CoreSource, GameInfo, QueueNotifier, RunAheadConfig, DEVICE_ANALOG,
    DEVICE_JOYPAD,
};
use oc_runahead::sim::{presenting_callbacks, Presented, SimCore, SimLoader, SimOptions, SimProbe, SimState};
use oc_runahead::{HookedCore, InputTracker, RunAhead, RunAheadState, SaveStateManager, Strategy};
use std::cell::Cell;
use std::fs;
use std::rc::Rc;
use tempfile::TempDir;

/// Button the tests press, libretro's A
const BUTTON_ID: u32 = 8;

struct Frontend {
    dir: TempDir,
    primary: HookedCore,
    probe: Rc<SimProbe>,
    runahead: RunAhead,
    presented: Rc<Presented>,
    input: Rc<Cell<i16>>,
    loader: SimLoader,
    notifier: QueueNotifier,
    frame: u64,
}

fn button_input(value: Rc<Cell<i16>>) -> oc_core::InputStateFn {
    Rc::new(move |_, _, _, id| if id == BUTTON_ID { value.get() } else { 0 })
}

fn frontend_with(options: SimOptions, loader: SimLoader) -> Frontend {
    let dir = TempDir::new().unwrap();
    let library = dir.path().join("sim_libretro.so");
    fs::write(&library, b"core image").unwrap();

    let av = AvGate::new();
    let (mut callbacks, presented) = presenting_callbacks(&av);
    let input = Rc::new(Cell::new(0));
    callbacks.input_state = Some(button_input(input.clone()));

    let mut core = SimCore::with_options(options);
    let probe = core.probe();
    core.set_callbacks(callbacks);

    let source = CoreSource {
        library_path: library,
        game: Some(GameInfo::from_path("/roms/sample.bin")),
    };
    Frontend {
        runahead: RunAhead::new(av, source, Box::new(loader.clone())),
        dir,
        primary: HookedCore::new(Box::new(core)),
        probe,
        presented,
        input,
        loader,
        notifier: QueueNotifier::new(),
        frame: 0,
    }
}

fn frontend() -> Frontend {
    frontend_with(SimOptions::default(), SimLoader::new())
}

impl Frontend {
    fn config(&self, frames: u32, secondary_instance: bool) -> RunAheadConfig {
        RunAheadConfig {
            enabled: true,
            frames,
            secondary_instance,
            hide_warnings: false,
            temp_directory: Some(self.dir.path().join("tmp")),
        }
    }

    fn run_frame(&mut self, config: &RunAheadConfig) {
        self.frame += 1;
        self.runahead
            .run_frame(&mut self.primary, config, self.frame, &mut self.notifier);
    }

    /// Persistent state of the primary instance
    fn primary_state(&mut self) -> SimState {
        let mut buf = vec![0u8; self.primary.serialize_size()];
        assert!(self.primary.serialize(&mut buf));
        SimState::from_bytes(&buf).unwrap()
    }

    fn temp_files(&self) -> usize {
        fs::read_dir(self.dir.path().join("tmp"))
            .map(|d| d.count())
            .unwrap_or(0)
    }
}

/// State after the given real inputs followed by `ahead` frames holding
/// the last of them
fn reference(inputs: &[i16], ahead: usize) -> SimState {
    let value = Rc::new(Cell::new(0));
    let mut core = SimCore::new();
    core.set_input_state(button_input(value.clone()));
    for &input in inputs {
        value.set(input);
        core.run();
    }
    for _ in 0..ahead {
        core.run();
    }
    core.snapshot()
}

const INPUT_SEQUENCE: [i16; 12] = [0, 0, 1, 1, 1, 0, 1, 0, 0, 0, 1, 1];

fn check_presented_matches_reference(frames: u32, secondary_instance: bool) {
    let mut fe = frontend();
    let config = fe.config(frames, secondary_instance);

    for (i, &input) in INPUT_SEQUENCE.iter().enumerate() {
        fe.input.set(input);
        fe.run_frame(&config);

        let real = &INPUT_SEQUENCE[..=i];
        assert_eq!(fe.presented.count(), i + 1, "one frame presented per call");
        assert_eq!(
            fe.presented.last(),
            Some(reference(real, frames as usize)),
            "presented frame {} with {} frames ahead",
            i,
            frames
        );
        assert_eq!(fe.primary_state(), reference(real, 0));
    }
}

#[test]
fn test_single_instance_matches_reference() {
    for frames in 1..=4 {
        check_presented_matches_reference(frames, false);
    }
}

#[test]
fn test_dual_instance_matches_reference() {
    for frames in 1..=4 {
        check_presented_matches_reference(frames, true);
    }
}

#[test]
fn test_strategy_switch_keeps_prediction_exact() {
    let mut fe = frontend();
    let single = fe.config(2, false);
    let dual = fe.config(2, true);
    let mut real: Vec<i16> = Vec::new();

    for (i, &input) in INPUT_SEQUENCE.iter().enumerate() {
        let config = if i % 3 == 0 { &single } else { &dual };
        fe.input.set(input);
        real.push(input);
        fe.run_frame(config);
        assert_eq!(fe.presented.last(), Some(reference(&real, 2)));
    }
}

#[test]
fn test_save_load_round_trip_is_transparent() {
    let av = AvGate::new();
    let tracker = InputTracker::new().unwrap();
    let mut manager = SaveStateManager::new();
    let mut core = SimCore::new();
    let mut untouched = SimCore::new();

    manager.create(&mut core, &av).unwrap();
    core.run();
    untouched.run();

    manager.save(&mut core, &av).unwrap();
    manager.load(&mut core, &av, &tracker).unwrap();

    for _ in 0..5 {
        core.run();
        untouched.run();
        assert_eq!(core.snapshot(), untouched.snapshot());
    }
}

#[test]
fn test_frame_counter_jump_resyncs() {
    let mut fe = frontend();
    let config = fe.config(2, true);
    fe.run_frame(&config);
    fe.run_frame(&config);
    let resyncs = fe.runahead.stats().resyncs;

    // Frames shown by a menu advance the counter without running the core
    fe.frame += 10;
    fe.run_frame(&config);
    assert_eq!(fe.runahead.stats().resyncs, resyncs + 1);
    assert_eq!(fe.presented.last(), Some(reference(&[0, 0, 0], 2)));
}

#[test]
fn test_dirty_flag_set_by_changed_input() {
    let mut fe = frontend();
    let config = fe.config(1, true);
    fe.run_frame(&config);
    let tracker = fe.runahead.session().tracker().unwrap().clone();
    assert!(!tracker.is_dirty());

    fe.input.set(1);
    fe.primary.callbacks().input(0, DEVICE_JOYPAD, 0, BUTTON_ID);
    assert!(tracker.is_dirty());

    // Same value again never clears it
    fe.primary.callbacks().input(0, DEVICE_JOYPAD, 0, BUTTON_ID);
    assert!(tracker.is_dirty());
}

#[test]
fn test_failed_session_never_retries() {
    let mut fe = frontend_with(
        SimOptions {
            fail_serialize: true,
            ..Default::default()
        },
        SimLoader::new(),
    );
    let config = fe.config(2, false);

    for _ in 0..10 {
        fe.run_frame(&config);
    }
    assert_eq!(fe.runahead.state(&config), RunAheadState::Failed);
    assert_eq!(fe.probe.size_queries.get(), 1);
    assert!(!fe.primary.hooks_installed());
    assert_eq!(fe.notifier.messages().len(), 1);
    // Only the failing frame went unpresented
    assert_eq!(fe.presented.count(), 9);
}

#[test]
fn test_unserialize_failure_disables_runahead() {
    let mut fe = frontend_with(
        SimOptions {
            fail_unserialize: true,
            ..Default::default()
        },
        SimLoader::new(),
    );
    let config = fe.config(1, false);
    fe.run_frame(&config);
    assert!(!fe.runahead.session().runahead_available());

    fe.run_frame(&config);
    assert_eq!(fe.probe.unserializes.get(), 0);
    assert_eq!(fe.notifier.messages().len(), 1);
}

#[test]
fn test_secondary_failure_warns_once() {
    let mut fe = frontend_with(SimOptions::default(), SimLoader::failing());
    let config = fe.config(2, true);
    let mut real: Vec<i16> = Vec::new();

    for _ in 0..6 {
        real.push(0);
        fe.run_frame(&config);
    }
    assert_eq!(fe.notifier.messages().len(), 1);
    assert_eq!(
        fe.runahead.state(&config),
        RunAheadState::Active(Strategy::SingleInstance)
    );
    assert_eq!(fe.presented.last(), Some(reference(&real, 2)));
    assert_eq!(fe.temp_files(), 0);
}

#[test]
fn test_secondary_state_load_failure_falls_back_to_single() {
    let loader = SimLoader::with_options(SimOptions {
        fail_unserialize: true,
        ..Default::default()
    });
    let mut fe = frontend_with(SimOptions::default(), loader);
    let config = fe.config(2, true);
    let mut real: Vec<i16> = Vec::new();

    for &input in &INPUT_SEQUENCE[..5] {
        fe.input.set(input);
        real.push(input);
        fe.run_frame(&config);
    }

    let session = fe.runahead.session();
    assert!(!session.secondary_available());
    assert!(session.runahead_available());
    assert_eq!(fe.notifier.messages().len(), 1);
    assert_eq!(
        fe.runahead.state(&config),
        RunAheadState::Active(Strategy::SingleInstance)
    );
    // The failing frame goes unpresented, the rest run single-instance
    assert_eq!(fe.presented.count(), 4);
    assert_eq!(fe.presented.last(), Some(reference(&real, 2)));
    assert_eq!(fe.primary_state(), reference(&real, 0));
    assert_eq!(fe.temp_files(), 0);
}

#[test]
fn test_secondary_lifecycle_leaves_nothing_behind() {
    let mut fe = frontend();
    fe.runahead
        .set_controller_port_device(&mut fe.primary, 0, DEVICE_ANALOG);
    fe.runahead
        .set_controller_port_device(&mut fe.primary, 1, DEVICE_JOYPAD);

    let dual = fe.config(1, true);
    let single = fe.config(1, false);
    fe.run_frame(&dual);
    assert_eq!(fe.temp_files(), 1);

    fe.run_frame(&single);
    assert_eq!(fe.temp_files(), 0);
    fe.run_frame(&dual);
    assert_eq!(fe.temp_files(), 1);

    let probes = fe.loader.instances();
    assert_eq!(probes.len(), 2);
    assert_eq!(probes[0].deinits.get(), 1);
    assert!(!probes[0].game_loaded.get());
    assert!(probes[1].game_loaded.get());
    assert_eq!(*probes[0].port_devices.borrow(), *probes[1].port_devices.borrow());
    assert_eq!(*probes[0].last_game.borrow(), *probes[1].last_game.borrow());

    fe.runahead.reset(&mut fe.primary);
    assert_eq!(fe.temp_files(), 0);
    assert_eq!(probes[1].deinits.get(), 1);
}

#[test]
fn test_variable_update_reaches_secondary() {
    let mut fe = frontend();
    let config = fe.config(1, true);
    fe.run_frame(&config);

    fe.runahead.notify_variable_update();
    fe.run_frame(&config);
    fe.run_frame(&config);
    assert_eq!(fe.loader.instances()[0].variable_updates.get(), 1);
}

#[test]
fn test_disabled_feature_runs_core_once_per_frame() {
    let mut fe = frontend();
    let config = RunAheadConfig::default();
    for _ in 0..5 {
        fe.run_frame(&config);
    }
    assert_eq!(fe.probe.runs.get(), 5);
    assert_eq!(fe.probe.size_queries.get(), 0);
    assert_eq!(fe.runahead.state(&config), RunAheadState::Disabled);
    assert_eq!(fe.presented.last(), Some(reference(&[0; 5], 0)));
}
