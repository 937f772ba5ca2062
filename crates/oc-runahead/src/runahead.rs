//! Run-ahead orchestrator
//!
//! Called once per presented frame in place of the primary core's `run()`.
//! With run-ahead active the frame the player sees is `N` frames ahead of
//! real time, computed from the last known input, while the core's
//! persistent state only ever advances by real frames.
//!
//! Two strategies are available:
//!
//! - **Single instance**: the primary runs the real frame, its state is
//!   saved, `N` further frames are run on replayed input (only the last one
//!   presented) and the saved state is loaded back.
//! - **Dual instance**: the primary runs the real frame with video
//!   suspended. A secondary instance is kept `N` frames ahead of it and is
//!   only resynchronized from the primary when real input diverged from what
//!   the prediction assumed.
//!
//! Every failure degrades to running the core without run-ahead. Failures
//! are sticky until [`RunAhead::reset`].

use crate::hooks::HookedCore;
use crate::input::InputTracker;
use crate::savestate::{SaveStateManager, StateSize};
use crate::secondary::SecondaryCore;
use oc_core::{
    AvGate, CoreInstance, CoreLoader, CoreSource, FailureClass, Notifier, RunAheadConfig,
    RunAheadError,
};
use std::rc::Rc;

/// How long warnings stay on screen, in frames
const WARNING_DURATION: u32 = 180;
const WARNING_PRIORITY: u32 = 0;

/// Speculation strategy in use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    SingleInstance,
    DualInstance,
}

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunAheadState {
    /// Feature off or zero frames
    Disabled,
    /// Enabled, buffers and hooks not set up yet
    Uninitialized,
    Active(Strategy),
    /// A failure disabled run-ahead until the next reset
    Failed,
}

/// Counters since the last reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunAheadStats {
    /// Calls to `run_frame`
    pub frames: u64,
    /// Frames run on replayed input
    pub speculative_frames: u64,
    /// Secondary instance resynchronizations
    pub resyncs: u64,
    pub saves: u64,
    pub loads: u64,
}

/// Everything run-ahead owns for one loaded piece of content
pub struct RunAheadSession {
    save_states: SaveStateManager,
    tracker: Option<Rc<InputTracker>>,
    secondary: SecondaryCore,
    runahead_available: bool,
    secondary_available: bool,
    force_input_dirty: bool,
    last_frame_count: Option<u64>,
    last_frames: u32,
    warned: FailureClass,
    stats: RunAheadStats,
}

impl RunAheadSession {
    pub fn new(source: CoreSource, loader: Box<dyn CoreLoader>) -> Self {
        Self {
            save_states: SaveStateManager::new(),
            tracker: None,
            secondary: SecondaryCore::new(source, loader),
            runahead_available: true,
            secondary_available: true,
            force_input_dirty: true,
            last_frame_count: None,
            last_frames: 0,
            warned: FailureClass::empty(),
            stats: RunAheadStats::default(),
        }
    }

    pub fn runahead_available(&self) -> bool {
        self.runahead_available
    }

    pub fn secondary_available(&self) -> bool {
        self.secondary_available
    }

    pub fn force_input_dirty(&self) -> bool {
        self.force_input_dirty
    }

    pub fn state_size(&self) -> StateSize {
        self.save_states.size()
    }

    pub fn secondary(&self) -> &SecondaryCore {
        &self.secondary
    }

    /// Input log, present while run-ahead is active
    pub fn tracker(&self) -> Option<&Rc<InputTracker>> {
        self.tracker.as_ref()
    }

    fn is_active(&self) -> bool {
        self.tracker.is_some() && self.save_states.is_allocated()
    }
}

/// Run-ahead driver for one primary core
pub struct RunAhead {
    av: AvGate,
    session: RunAheadSession,
}

impl RunAhead {
    /// `av` is the gate the frontend's video and audio callbacks honour
    pub fn new(av: AvGate, source: CoreSource, loader: Box<dyn CoreLoader>) -> Self {
        Self {
            av,
            session: RunAheadSession::new(source, loader),
        }
    }

    pub fn session(&self) -> &RunAheadSession {
        &self.session
    }

    pub fn av(&self) -> &AvGate {
        &self.av
    }

    pub fn state(&self, config: &RunAheadConfig) -> RunAheadState {
        let session = &self.session;
        if !session.runahead_available {
            RunAheadState::Failed
        } else if config.effective_frames() == 0 {
            RunAheadState::Disabled
        } else if !session.is_active() {
            RunAheadState::Uninitialized
        } else if config.secondary_instance && session.secondary_available {
            RunAheadState::Active(Strategy::DualInstance)
        } else {
            RunAheadState::Active(Strategy::SingleInstance)
        }
    }

    pub fn stats(&self) -> RunAheadStats {
        RunAheadStats {
            saves: self.session.save_states.saves(),
            loads: self.session.save_states.loads(),
            ..self.session.stats
        }
    }

    /// A core option changed. The secondary instance sees it on its next
    /// variable query.
    pub fn notify_variable_update(&self) {
        self.session.secondary.notify_variable_update();
    }

    /// Set a port's device on the primary and mirror it to the secondary
    pub fn set_controller_port_device(&mut self, primary: &mut HookedCore, port: u32, device: u32) {
        primary.set_controller_port_device(port, device);
        self.session.secondary.remember_port_device(port, device);
    }

    /// Forget everything about the current content: release all resources
    /// and make run-ahead available again.
    pub fn reset(&mut self, primary: &mut HookedCore) {
        self.deactivate(primary);
        self.session.secondary.destroy();

        let session = &mut self.session;
        session.save_states = SaveStateManager::new();
        session.runahead_available = true;
        session.secondary_available = true;
        session.force_input_dirty = true;
        session.last_frame_count = None;
        session.last_frames = 0;
        session.warned = FailureClass::empty();
        session.stats = RunAheadStats::default();
        tracing::debug!("Run-ahead session reset");
    }

    /// Run one presented frame. `frame_count` is the frontend's presented
    /// frame counter, including frames shown while the core was not running.
    pub fn run_frame(
        &mut self,
        primary: &mut HookedCore,
        config: &RunAheadConfig,
        frame_count: u64,
        notifier: &mut dyn Notifier,
    ) {
        self.session.stats.frames += 1;
        let frames = config.effective_frames();

        if frames == 0 || !self.session.runahead_available {
            if frames == 0 {
                self.deactivate(primary);
            }
            self.run_normally(primary, frame_count);
            return;
        }

        if !self.session.is_active() {
            if let Err(e) = self.activate(primary) {
                self.fail(primary, e, config, notifier);
                self.run_normally(primary, frame_count);
                return;
            }
        }

        if let Some(last) = self.session.last_frame_count {
            if frame_count != last.wrapping_add(1) {
                tracing::trace!("Frame counter jumped from {} to {}", last, frame_count);
                self.session.force_input_dirty = true;
            }
        }
        self.session.last_frame_count = Some(frame_count);

        if frames != self.session.last_frames {
            self.session.force_input_dirty = true;
            self.session.last_frames = frames;
        }

        if !config.secondary_instance && self.session.secondary.exists() {
            self.session.secondary.destroy();
        }

        let Some(tracker) = self.session.tracker.clone() else {
            self.run_normally(primary, frame_count);
            return;
        };

        let result = if config.secondary_instance && self.session.secondary_available {
            if !self.session.secondary.exists() {
                if let Err(e) = self
                    .session
                    .secondary
                    .ensure_exists(primary, &config.temp_root())
                {
                    self.fail(primary, e, config, notifier);
                    self.run_normally(primary, frame_count);
                    return;
                }
                self.session.force_input_dirty = true;
            }
            self.run_dual(primary, &tracker, frames)
        } else {
            self.run_single(primary, &tracker, frames)
        };

        match result {
            Ok(()) => self.session.force_input_dirty = false,
            Err(e) => self.fail(primary, e, config, notifier),
        }
    }

    fn run_normally(&mut self, primary: &mut HookedCore, frame_count: u64) {
        primary.run();
        self.session.force_input_dirty = true;
        self.session.last_frame_count = Some(frame_count);
    }

    /// Probe and allocate the state buffer, then hook the primary
    fn activate(&mut self, primary: &mut HookedCore) -> Result<(), RunAheadError> {
        let session = &mut self.session;
        session.save_states.create(primary, &self.av)?;

        let tracker = Rc::new(InputTracker::new()?);
        primary.install_hooks(tracker.clone());
        session.tracker = Some(tracker);
        session.force_input_dirty = true;

        tracing::info!(
            "Run-ahead active, state size {:?}",
            session.save_states.size()
        );
        Ok(())
    }

    /// Release hooks, buffers and the secondary instance, keeping availability
    fn deactivate(&mut self, primary: &mut HookedCore) {
        let session = &mut self.session;
        let was_active = primary.remove_hooks()
            | session.tracker.take().is_some()
            | session.save_states.is_allocated()
            | session.secondary.exists();

        session.save_states.release();
        session.secondary.destroy();
        session.force_input_dirty = true;

        if was_active {
            tracing::info!("Run-ahead deactivated");
        }
    }

    fn run_single(
        &mut self,
        primary: &mut HookedCore,
        tracker: &Rc<InputTracker>,
        frames: u32,
    ) -> Result<(), RunAheadError> {
        for frame in 0..=frames {
            let last = frame == frames;
            {
                let _suspend = (!last).then(|| self.av.suspend_all());
                if frame == 0 {
                    primary.run();
                } else {
                    primary.run_with_last_input(tracker);
                    self.session.stats.speculative_frames += 1;
                }
            }

            if frame == 0 {
                self.session.save_states.save(primary, &self.av)?;
            }
            if last {
                self.session.save_states.load(primary, &self.av, tracker)?;
            }
        }
        Ok(())
    }

    fn run_dual(
        &mut self,
        primary: &mut HookedCore,
        tracker: &Rc<InputTracker>,
        frames: u32,
    ) -> Result<(), RunAheadError> {
        {
            let _video = self.av.suspend_video();
            primary.run();
        }

        let session = &mut self.session;
        if tracker.is_dirty() || session.force_input_dirty {
            tracker.clear_dirty();
            session.save_states.save(primary, &self.av)?;

            let state = session
                .save_states
                .state()
                .ok_or(RunAheadError::SerializeFailure)?;
            session
                .secondary
                .load_state(state, &self.av)
                .map_err(|e| RunAheadError::SecondaryProvisionFailure(e.to_string()))?;

            for _ in 1..frames {
                let _suspend = self.av.suspend_all();
                session.secondary.run_with_last_input(tracker);
                session.stats.speculative_frames += 1;
            }
            session.stats.resyncs += 1;
        }

        let _audio = self.av.suspend_audio();
        session.secondary.run_with_last_input(tracker);
        session.stats.speculative_frames += 1;
        Ok(())
    }

    /// Degrade after a failure and surface it once per class
    fn fail(
        &mut self,
        primary: &mut HookedCore,
        error: RunAheadError,
        config: &RunAheadConfig,
        notifier: &mut dyn Notifier,
    ) {
        tracing::warn!("Run-ahead: {}", error);

        let class = error.failure_class();
        if class == FailureClass::SECONDARY_INSTANCE {
            self.session.secondary.destroy();
            self.session.secondary_available = false;
        } else {
            self.deactivate(primary);
            self.session.save_states.reset();
            self.session.runahead_available = false;
        }
        self.session.force_input_dirty = true;

        if self.session.warned.contains(class) {
            return;
        }
        self.session.warned.insert(class);
        if !config.hide_warnings {
            notifier.push(error.user_message(), WARNING_PRIORITY, WARNING_DURATION);
        }
    }
}
