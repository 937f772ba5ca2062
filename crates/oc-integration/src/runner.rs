//! Frontend runner that drives a core frame by frame
//!
//! This module provides the FrontendRunner which ties together:
//! - The primary core instance, wrapped for run-ahead
//! - The run-ahead orchestrator and its secondary instance
//! - Controller input and the configured poll timing
//! - The video/audio sinks and the gate that mutes them
//! - Frame pacing

use oc_core::{
    AvGate, Config, CoreCallbacks, CoreInstance, CoreLoader, CoreSource, EmulatorError,
    EnvironmentRequest, LoaderError, LogNotifier, Notifier, PollType, Result, RunAheadConfig,
    VideoFrame, DEVICE_JOYPAD,
};
use oc_input::InputManager;
use oc_runahead::{HookedCore, RunAhead, RunAheadState, RunAheadStats};
use std::cell::{Cell, RefCell, RefMut};
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Frontend runner state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerState {
    /// Runner is stopped
    Stopped,
    /// Runner is running
    Running,
    /// Runner is paused, frames are menu frames
    Paused,
}

/// Last frame that reached the video sink
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresentedFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub pitch: usize,
    /// The core asked to show the previous frame again
    pub duplicate: bool,
}

/// Output collected by the frontend callbacks
#[derive(Debug, Default)]
struct Sinks {
    last_frame: RefCell<Option<PresentedFrame>>,
    presented: Cell<u64>,
    audio_frames: Cell<u64>,
}

/// Input shared between the runner and the core's input callbacks
struct InputShared {
    manager: RefCell<InputManager>,
    late_poll_pending: Cell<bool>,
}

/// Main frontend runner
pub struct FrontendRunner {
    /// Configuration
    config: Config,
    /// Current state
    state: RunnerState,
    /// Primary core instance
    primary: HookedCore,
    /// Run-ahead orchestrator
    runahead: RunAhead,
    /// Video/audio enable gate
    av: AvGate,
    input: Rc<InputShared>,
    sinks: Rc<Sinks>,
    variables_updated: Rc<Cell<bool>>,
    notifier: Box<dyn Notifier>,
    /// Presented frames, menu frames included
    frame_count: u64,
    game_loaded: bool,
    /// Last frame time
    last_frame_time: Instant,
    /// Target frame time, `None` runs unthrottled
    target_frame_time: Option<Duration>,
}

fn frontend_environment(av: AvGate, variables_updated: Rc<Cell<bool>>) -> oc_core::EnvironmentFn {
    Rc::new(move |request: EnvironmentRequest<'_>| match request {
        EnvironmentRequest::VariableUpdate(updated) => {
            *updated = variables_updated.replace(false);
            true
        }
        EnvironmentRequest::AudioVideoEnable(flags) => {
            *flags = av.flags();
            true
        }
        EnvironmentRequest::SavestateContext(context) => {
            *context = av.savestate_context();
            true
        }
        EnvironmentRequest::Other(_) => false,
    })
}

impl FrontendRunner {
    /// Create a runner for a freshly loaded core.
    ///
    /// Installs the frontend callbacks, initializes the core and loads
    /// `source.game`.
    pub fn new(
        config: Config,
        primary: Box<dyn CoreInstance>,
        source: CoreSource,
        loader: Box<dyn CoreLoader>,
    ) -> Result<Self> {
        tracing::info!("Initializing frontend runner");

        let av = AvGate::new();
        let input = Rc::new(InputShared {
            manager: RefCell::new(InputManager::new(config.input.max_users as usize)),
            late_poll_pending: Cell::new(false),
        });
        let sinks = Rc::new(Sinks::default());
        let variables_updated = Rc::new(Cell::new(false));

        let mut primary = HookedCore::new(primary);
        primary.set_callbacks(Self::callbacks(
            &config,
            &av,
            &input,
            &sinks,
            &variables_updated,
        ));

        primary.init();
        if !primary.load_game(source.game.as_ref()) {
            primary.deinit();
            let what = source
                .game
                .as_ref()
                .and_then(|game| game.path.as_ref())
                .map_or_else(|| "contentless start".to_string(), |p| p.display().to_string());
            return Err(EmulatorError::Loader(LoaderError::InvalidContent(what)));
        }

        let runahead = RunAhead::new(av.clone(), source, loader);
        let target_frame_time = match config.general.frame_limit {
            0 => None,
            fps => Some(Duration::from_secs_f64(1.0 / f64::from(fps))),
        };

        let mut runner = Self {
            state: RunnerState::Stopped,
            primary,
            runahead,
            av,
            input,
            sinks,
            variables_updated,
            notifier: Box::new(LogNotifier),
            frame_count: 0,
            game_loaded: true,
            last_frame_time: Instant::now(),
            target_frame_time,
            config,
        };

        for port in 0..runner.config.input.max_users {
            runner.set_controller_port_device(port, DEVICE_JOYPAD);
        }

        Ok(runner)
    }

    fn callbacks(
        config: &Config,
        av: &AvGate,
        input: &Rc<InputShared>,
        sinks: &Rc<Sinks>,
        variables_updated: &Rc<Cell<bool>>,
    ) -> CoreCallbacks {
        let video_gate = av.clone();
        let video_sink = sinks.clone();
        let audio_gate = av.clone();
        let audio_sink = sinks.clone();
        let poll_input = input.clone();
        let state_input = input.clone();
        let poll_type = config.input.poll_type;

        CoreCallbacks {
            environment: Some(frontend_environment(av.clone(), variables_updated.clone())),
            video_refresh: Some(Rc::new(move |frame: VideoFrame<'_>| {
                if !video_gate.video_enabled() {
                    return;
                }
                let mut last = video_sink.last_frame.borrow_mut();
                match frame.data {
                    Some(data) => {
                        *last = Some(PresentedFrame {
                            data: data.to_vec(),
                            width: frame.width,
                            height: frame.height,
                            pitch: frame.pitch,
                            duplicate: false,
                        });
                    }
                    None => {
                        if let Some(previous) = last.as_mut() {
                            previous.duplicate = true;
                        }
                    }
                }
                video_sink.presented.set(video_sink.presented.get() + 1);
            })),
            audio_sample_batch: Some(Rc::new(move |samples: &[i16]| {
                if audio_gate.audio_enabled() {
                    let frames = (samples.len() / 2) as u64;
                    audio_sink.audio_frames.set(audio_sink.audio_frames.get() + frames);
                }
                samples.len()
            })),
            input_poll: Some(Rc::new(move || match poll_type {
                PollType::Early => {}
                PollType::Normal => poll_input.manager.borrow_mut().poll(),
                PollType::Late => poll_input.late_poll_pending.set(true),
            })),
            input_state: Some(Rc::new(move |port, device, index, id| {
                if state_input.late_poll_pending.replace(false) {
                    state_input.manager.borrow_mut().poll();
                }
                state_input.manager.borrow().state(port, device, index, id)
            })),
        }
    }

    /// Get the current state
    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Start the frontend
    pub fn start(&mut self) -> Result<()> {
        if self.state == RunnerState::Running {
            return Ok(());
        }
        if !self.game_loaded {
            return Err(EmulatorError::Unsupported(
                "cannot start after the core was unloaded".to_string(),
            ));
        }

        tracing::info!("Starting frontend");
        self.state = if self.config.general.start_paused {
            RunnerState::Paused
        } else {
            RunnerState::Running
        };
        self.last_frame_time = Instant::now();

        Ok(())
    }

    /// Pause the frontend
    pub fn pause(&mut self) -> Result<()> {
        if self.state == RunnerState::Running {
            tracing::info!("Pausing frontend");
            self.state = RunnerState::Paused;
        }
        Ok(())
    }

    /// Resume the frontend
    pub fn resume(&mut self) -> Result<()> {
        if self.state == RunnerState::Paused {
            tracing::info!("Resuming frontend");
            self.state = RunnerState::Running;
            self.last_frame_time = Instant::now();
        }
        Ok(())
    }

    /// Stop the frontend
    pub fn stop(&mut self) -> Result<()> {
        tracing::info!("Stopping frontend");
        self.state = RunnerState::Stopped;
        Ok(())
    }

    /// Check if the frontend is running
    pub fn is_running(&self) -> bool {
        self.state == RunnerState::Running
    }

    /// Check if the frontend is paused
    pub fn is_paused(&self) -> bool {
        self.state == RunnerState::Paused
    }

    /// Check if the frontend is stopped
    pub fn is_stopped(&self) -> bool {
        self.state == RunnerState::Stopped
    }

    /// Execute a single frame.
    ///
    /// While paused the frame is a menu frame: the counter advances but the
    /// core does not run.
    pub fn run_frame(&mut self) -> Result<()> {
        match self.state {
            RunnerState::Stopped => return Ok(()),
            RunnerState::Paused => {
                self.frame_count += 1;
                tracing::trace!("Menu frame {}", self.frame_count);
                self.pace();
                return Ok(());
            }
            RunnerState::Running => {}
        }

        if self.config.input.poll_type == PollType::Early {
            self.input.manager.borrow_mut().poll();
        }
        self.input.late_poll_pending.set(false);

        self.frame_count += 1;
        self.runahead.run_frame(
            &mut self.primary,
            &self.config.runahead,
            self.frame_count,
            &mut *self.notifier,
        );

        self.pace();
        Ok(())
    }

    /// Sleep to maintain the target frame rate
    fn pace(&mut self) {
        if let Some(target) = self.target_frame_time {
            let frame_time = self.last_frame_time.elapsed();
            if frame_time < target {
                std::thread::sleep(target - frame_time);
            }
        }
        self.last_frame_time = Instant::now();
    }

    /// Soft-reset the core
    pub fn reset(&mut self) {
        tracing::info!("Resetting core");
        self.primary.reset();
    }

    /// Core options changed
    pub fn update_variables(&mut self) {
        self.variables_updated.set(true);
        self.runahead.notify_variable_update();
    }

    /// Plug a device into a port on every instance
    pub fn set_controller_port_device(&mut self, port: u32, device: u32) {
        self.runahead
            .set_controller_port_device(&mut self.primary, port, device);
    }

    /// Replace the run-ahead settings; they take effect on the next frame
    pub fn set_runahead_config(&mut self, runahead: RunAheadConfig) {
        self.config.runahead = runahead;
    }

    /// Where notifications go, the log by default
    pub fn set_notifier(&mut self, notifier: Box<dyn Notifier>) {
        self.notifier = notifier;
    }

    /// Tear down run-ahead, unload content and deinitialize the core
    pub fn unload(&mut self) {
        if !self.game_loaded {
            return;
        }
        self.runahead.reset(&mut self.primary);
        self.primary.unload_game();
        self.primary.deinit();
        self.game_loaded = false;
        self.state = RunnerState::Stopped;
        tracing::info!("Core unloaded");
    }

    /// Presented frames, menu frames included
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Frames that reached the video sink
    pub fn presented_frames(&self) -> u64 {
        self.sinks.presented.get()
    }

    /// Audio frames that reached the audio sink
    pub fn audio_frames(&self) -> u64 {
        self.sinks.audio_frames.get()
    }

    pub fn last_frame(&self) -> Option<PresentedFrame> {
        self.sinks.last_frame.borrow().clone()
    }

    /// Controller state the core reads on its next poll
    pub fn input_mut(&self) -> RefMut<'_, InputManager> {
        self.input.manager.borrow_mut()
    }

    pub fn runahead_state(&self) -> RunAheadState {
        self.runahead.state(&self.config.runahead)
    }

    pub fn runahead_stats(&self) -> RunAheadStats {
        self.runahead.stats()
    }

    pub fn av(&self) -> &AvGate {
        &self.av
    }

    /// Get configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for FrontendRunner {
    fn drop(&mut self) {
        self.unload();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oc_runahead::sim::{SimCore, SimLoader};

    fn runner() -> FrontendRunner {
        let mut config = Config::default();
        config.general.frame_limit = 0;
        let source = CoreSource {
            library_path: "/nonexistent/sim_libretro.so".into(),
            game: None,
        };
        FrontendRunner::new(
            config,
            Box::new(SimCore::new()),
            source,
            Box::new(SimLoader::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_runner_creation() {
        let runner = runner();
        assert_eq!(runner.state(), RunnerState::Stopped);
        assert_eq!(runner.frame_count(), 0);
        assert_eq!(runner.presented_frames(), 0);
    }

    #[test]
    fn test_runner_state_transitions() {
        let mut runner = runner();

        assert!(runner.is_stopped());

        runner.start().unwrap();
        assert!(runner.is_running());

        runner.pause().unwrap();
        assert!(runner.is_paused());

        runner.resume().unwrap();
        assert!(runner.is_running());

        runner.stop().unwrap();
        assert!(runner.is_stopped());
    }

    #[test]
    fn test_stopped_runner_does_nothing() {
        let mut runner = runner();
        runner.run_frame().unwrap();
        assert_eq!(runner.frame_count(), 0);
    }

    #[test]
    fn test_paused_frames_advance_counter_only() {
        let mut runner = runner();
        runner.start().unwrap();
        runner.run_frame().unwrap();
        runner.pause().unwrap();
        runner.run_frame().unwrap();
        runner.run_frame().unwrap();
        assert_eq!(runner.frame_count(), 3);
        assert_eq!(runner.presented_frames(), 1);
    }

    #[test]
    fn test_start_after_unload_fails() {
        let mut runner = runner();
        runner.unload();
        assert!(runner.start().is_err());
    }
}
