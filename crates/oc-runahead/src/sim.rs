//! Deterministic reference core
//!
//! [`SimCore`] implements the full capability interface with a small,
//! fully serializable state that depends on every input it reads. It is
//! used by the tests and benchmarks, where bit-exact comparison against a
//! run without run-ahead is the point. [`SimLoader`] plays the part of the
//! dynamic loader for secondary instances.

use oc_core::{
    AvEnable, AvGate, CoreCallbacks, CoreInstance, CoreLoader, EnvironmentFn, EnvironmentRequest,
    GameInfo, LoaderError, SavestateContext, VideoFrame, DEVICE_JOYPAD, MAX_PORTS,
};
use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Bytes the state actually occupies
pub const STATE_SIZE: usize = 24;

/// Ports and button ids read every frame
const SIM_PORTS: u32 = 2;
const SIM_BUTTONS: u32 = 16;

/// Behaviour switches for failure testing
#[derive(Debug, Clone)]
pub struct SimOptions {
    /// Reported serialize size, 0 means save states are unsupported
    pub serialize_size: usize,
    pub fail_serialize: bool,
    pub fail_unserialize: bool,
    pub fail_load_game: bool,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            serialize_size: STATE_SIZE,
            fail_serialize: false,
            fail_unserialize: false,
            fail_load_game: false,
        }
    }
}

/// Emulated machine state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimState {
    pub frame: u64,
    pub accumulator: u64,
    pub rng: u64,
}

impl SimState {
    fn to_bytes(self) -> [u8; STATE_SIZE] {
        let mut bytes = [0u8; STATE_SIZE];
        bytes[0..8].copy_from_slice(&self.frame.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.accumulator.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.rng.to_le_bytes());
        bytes
    }

    /// Decode a serialized state or presented frame
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let word = |range: std::ops::Range<usize>| -> Option<u64> {
            Some(u64::from_le_bytes(bytes.get(range)?.try_into().ok()?))
        };
        Some(Self {
            frame: word(0..8)?,
            accumulator: word(8..16)?,
            rng: word(16..24)?,
        })
    }
}

/// Counters and observations shared with the test that created the core
#[derive(Debug, Default)]
pub struct SimProbe {
    pub inits: Cell<u32>,
    pub deinits: Cell<u32>,
    pub runs: Cell<u32>,
    pub resets: Cell<u32>,
    pub size_queries: Cell<u32>,
    pub serializes: Cell<u32>,
    pub unserializes: Cell<u32>,
    pub polls: Cell<u32>,
    pub variable_updates: Cell<u32>,
    pub saw_fast_savestate: Cell<bool>,
    pub last_context: Cell<SavestateContext>,
    pub game_loaded: Cell<bool>,
    pub last_game: RefCell<Option<GameInfo>>,
    pub port_devices: RefCell<[Option<u32>; MAX_PORTS]>,
    pub library_path: RefCell<Option<PathBuf>>,
}

/// Deterministic core
pub struct SimCore {
    options: SimOptions,
    state: SimState,
    callbacks: CoreCallbacks,
    probe: Rc<SimProbe>,
}

impl Default for SimCore {
    fn default() -> Self {
        Self::new()
    }
}

impl SimCore {
    pub fn new() -> Self {
        Self::with_options(SimOptions::default())
    }

    pub fn with_options(options: SimOptions) -> Self {
        Self {
            options,
            state: SimState {
                rng: 0x2545_F491_4F6C_DD1D,
                ..Default::default()
            },
            callbacks: CoreCallbacks::default(),
            probe: Rc::new(SimProbe::default()),
        }
    }

    pub fn probe(&self) -> Rc<SimProbe> {
        self.probe.clone()
    }

    /// Current machine state
    pub fn snapshot(&self) -> SimState {
        self.state
    }

    fn observe_savestate_environment(&self) {
        let mut flags = AvEnable::empty();
        if self
            .callbacks
            .environment(EnvironmentRequest::AudioVideoEnable(&mut flags))
            && flags.contains(AvEnable::FAST_SAVESTATES)
        {
            self.probe.saw_fast_savestate.set(true);
        }

        let mut context = SavestateContext::Normal;
        if self
            .callbacks
            .environment(EnvironmentRequest::SavestateContext(&mut context))
        {
            self.probe.last_context.set(context);
        }
    }

    fn step(&mut self) {
        let mut mix = 0u64;
        for port in 0..SIM_PORTS {
            for id in 0..SIM_BUTTONS {
                let value = self.callbacks.input(port, DEVICE_JOYPAD, 0, id);
                mix = mix
                    .wrapping_mul(31)
                    .wrapping_add(u64::from(value as u16) + u64::from(id));
            }
        }

        let mut rng = self.state.rng;
        rng ^= rng << 13;
        rng ^= rng >> 7;
        rng ^= rng << 17;

        self.state.frame += 1;
        self.state.rng = rng;
        self.state.accumulator = (self.state.accumulator ^ mix ^ rng)
            .wrapping_mul(0x9E37_79B9_7F4A_7C15)
            .rotate_left(17);
    }
}

impl CoreInstance for SimCore {
    fn init(&mut self) {
        self.probe.inits.set(self.probe.inits.get() + 1);
    }

    fn deinit(&mut self) {
        self.probe.deinits.set(self.probe.deinits.get() + 1);
    }

    fn load_game(&mut self, game: Option<&GameInfo>) -> bool {
        if self.options.fail_load_game {
            return false;
        }
        *self.probe.last_game.borrow_mut() = game.cloned();
        self.probe.game_loaded.set(true);
        true
    }

    fn unload_game(&mut self) {
        self.probe.game_loaded.set(false);
    }

    fn run(&mut self) {
        let mut updated = false;
        if self
            .callbacks
            .environment(EnvironmentRequest::VariableUpdate(&mut updated))
            && updated
        {
            self.probe
                .variable_updates
                .set(self.probe.variable_updates.get() + 1);
        }

        self.callbacks.poll();
        self.probe.polls.set(self.probe.polls.get() + 1);
        self.step();

        let bytes = self.state.to_bytes();
        self.callbacks.present(VideoFrame {
            data: Some(&bytes),
            width: (STATE_SIZE / 4) as u32,
            height: 1,
            pitch: STATE_SIZE,
        });
        self.callbacks
            .play(&[self.state.accumulator as i16, self.state.frame as i16]);

        self.probe.runs.set(self.probe.runs.get() + 1);
    }

    fn reset(&mut self) {
        self.state = SimCore::new().state;
        self.probe.resets.set(self.probe.resets.get() + 1);
    }

    fn serialize_size(&mut self) -> usize {
        self.observe_savestate_environment();
        self.probe.size_queries.set(self.probe.size_queries.get() + 1);
        self.options.serialize_size
    }

    fn serialize(&mut self, data: &mut [u8]) -> bool {
        self.observe_savestate_environment();
        if self.options.fail_serialize || data.len() < STATE_SIZE {
            return false;
        }
        data[..STATE_SIZE].copy_from_slice(&self.state.to_bytes());
        self.probe.serializes.set(self.probe.serializes.get() + 1);
        true
    }

    fn unserialize(&mut self, data: &[u8]) -> bool {
        self.observe_savestate_environment();
        if self.options.fail_unserialize {
            return false;
        }
        match SimState::from_bytes(data) {
            Some(state) => {
                self.state = state;
                self.probe
                    .unserializes
                    .set(self.probe.unserializes.get() + 1);
                true
            }
            None => false,
        }
    }

    fn set_controller_port_device(&mut self, port: u32, device: u32) {
        if let Some(slot) = self.probe.port_devices.borrow_mut().get_mut(port as usize) {
            *slot = Some(device);
        }
    }

    fn callbacks(&self) -> &CoreCallbacks {
        &self.callbacks
    }

    fn set_callbacks(&mut self, callbacks: CoreCallbacks) {
        self.callbacks = callbacks;
    }
}

/// Loader handing out [`SimCore`]s for any existing file
#[derive(Clone, Default)]
pub struct SimLoader {
    options: SimOptions,
    fail: bool,
    instances: Rc<RefCell<Vec<Rc<SimProbe>>>>,
}

impl SimLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cores created by this loader use `options`
    pub fn with_options(options: SimOptions) -> Self {
        Self {
            options,
            ..Default::default()
        }
    }

    /// A loader whose every load fails
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Probes of every core loaded so far
    pub fn instances(&self) -> Vec<Rc<SimProbe>> {
        self.instances.borrow().clone()
    }
}

impl CoreLoader for SimLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn CoreInstance>, LoaderError> {
        if self.fail || !path.is_file() {
            return Err(LoaderError::LibraryOpen {
                path: path.display().to_string(),
                message: "cannot open shared object".to_string(),
            });
        }

        let core = SimCore::with_options(self.options.clone());
        *core.probe.library_path.borrow_mut() = Some(path.to_path_buf());
        self.instances.borrow_mut().push(core.probe());
        Ok(Box::new(core))
    }
}

/// What reached the frontend's video and audio sinks
#[derive(Debug, Default)]
pub struct Presented {
    pub frames: RefCell<Vec<SimState>>,
    pub audio_batches: Cell<u32>,
}

impl Presented {
    /// Most recent presented frame
    pub fn last(&self) -> Option<SimState> {
        self.frames.borrow().last().copied()
    }

    pub fn count(&self) -> usize {
        self.frames.borrow().len()
    }
}

/// Frontend callbacks that honour the gate and record what was presented
pub fn presenting_callbacks(av: &AvGate) -> (CoreCallbacks, Rc<Presented>) {
    let presented = Rc::new(Presented::default());

    let video_gate = av.clone();
    let video_sink = presented.clone();
    let audio_gate = av.clone();
    let audio_sink = presented.clone();

    let callbacks = CoreCallbacks {
        environment: Some(gate_environment(av)),
        video_refresh: Some(Rc::new(move |frame: VideoFrame<'_>| {
            if !video_gate.video_enabled() {
                return;
            }
            if let Some(state) = frame.data.and_then(SimState::from_bytes) {
                video_sink.frames.borrow_mut().push(state);
            }
        })),
        audio_sample_batch: Some(Rc::new(move |samples: &[i16]| {
            if audio_gate.audio_enabled() {
                audio_sink.audio_batches.set(audio_sink.audio_batches.get() + 1);
            }
            samples.len()
        })),
        input_poll: None,
        input_state: None,
    };
    (callbacks, presented)
}

/// Environment answering audio/video and savestate queries from a gate
pub fn gate_environment(av: &AvGate) -> EnvironmentFn {
    let av = av.clone();
    Rc::new(move |request: EnvironmentRequest<'_>| match request {
        EnvironmentRequest::AudioVideoEnable(flags) => {
            *flags = av.flags();
            true
        }
        EnvironmentRequest::SavestateContext(context) => {
            *context = av.savestate_context();
            true
        }
        EnvironmentRequest::VariableUpdate(updated) => {
            *updated = false;
            true
        }
        EnvironmentRequest::Other(_) => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_is_deterministic() {
        let mut a = SimCore::new();
        let mut b = SimCore::new();
        for _ in 0..10 {
            a.run();
            b.run();
        }
        assert_eq!(a.snapshot(), b.snapshot());
        assert_eq!(a.snapshot().frame, 10);
    }

    #[test]
    fn test_input_changes_state() {
        let mut a = SimCore::new();
        let mut b = SimCore::new();
        b.set_input_state(Rc::new(|_, _, _, id| if id == 3 { 1 } else { 0 }));
        a.run();
        b.run();
        assert_ne!(a.snapshot(), b.snapshot());
    }

    #[test]
    fn test_serialize_round_trip() {
        let mut core = SimCore::new();
        core.run();
        let mut buf = vec![0u8; core.serialize_size()];
        assert!(core.serialize(&mut buf));
        let saved = core.snapshot();
        core.run();
        assert!(core.unserialize(&buf));
        assert_eq!(core.snapshot(), saved);
    }

    #[test]
    fn test_presenting_callbacks_respect_gate() {
        let av = AvGate::new();
        let (callbacks, presented) = presenting_callbacks(&av);
        let mut core = SimCore::new();
        core.set_callbacks(callbacks);

        core.run();
        {
            let _suspend = av.suspend_all();
            core.run();
        }
        assert_eq!(presented.count(), 1);
        assert_eq!(presented.audio_batches.get(), 1);
        assert_eq!(presented.last().map(|s| s.frame), Some(1));
    }

    #[test]
    fn test_loader_requires_existing_file() {
        let loader = SimLoader::new();
        assert!(loader.load(Path::new("/nonexistent/core.so")).is_err());
        assert!(loader.instances().is_empty());
    }
}
