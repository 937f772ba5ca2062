//! Audio/video enable gate
//!
//! The frontend's video and audio callbacks only present output while the
//! gate is open. Run-ahead closes it around speculative frames. The same
//! state is what a core observes through the audio/video-enable and
//! savestate-context environment queries.

use bitflags::bitflags;
use std::cell::Cell;
use std::rc::Rc;

bitflags! {
    /// Audio/video enable mask as reported to cores
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AvEnable: u32 {
        const VIDEO              = 0x1;
        const AUDIO              = 0x2;
        /// State never leaves memory, the core may skip compatibility work
        const FAST_SAVESTATES    = 0x4;
        const HARD_DISABLE_AUDIO = 0x8;
    }
}

impl Default for AvEnable {
    fn default() -> Self {
        AvEnable::VIDEO | AvEnable::AUDIO
    }
}

/// Why a save state is being taken or loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i32)]
pub enum SavestateContext {
    #[default]
    Normal = 0,
    /// Loaded back into the instance that produced it
    RunaheadSameInstance = 1,
    /// Loaded into another instance of the same binary
    RunaheadSameBinary = 2,
    RollbackNetplay = 3,
}

#[derive(Debug, Default)]
struct GateState {
    flags: Cell<AvEnable>,
    context: Cell<SavestateContext>,
}

/// Shared audio/video switch
///
/// Cheap to clone; clones observe the same state. Single-threaded.
#[derive(Debug, Clone, Default)]
pub struct AvGate {
    state: Rc<GateState>,
}

/// Restores the gate's previous mask when dropped
#[must_use = "the gate reopens as soon as the guard is dropped"]
pub struct AvGuard {
    gate: AvGate,
    previous: AvEnable,
    previous_context: SavestateContext,
}

impl Drop for AvGuard {
    fn drop(&mut self) {
        self.gate.state.flags.set(self.previous);
        self.gate.state.context.set(self.previous_context);
    }
}

impl AvGate {
    /// Create an open gate (video and audio enabled)
    pub fn new() -> Self {
        Self::default()
    }

    /// Current mask
    pub fn flags(&self) -> AvEnable {
        self.state.flags.get()
    }

    /// Current savestate context
    pub fn savestate_context(&self) -> SavestateContext {
        self.state.context.get()
    }

    pub fn video_enabled(&self) -> bool {
        self.flags().contains(AvEnable::VIDEO)
    }

    pub fn audio_enabled(&self) -> bool {
        let flags = self.flags();
        flags.contains(AvEnable::AUDIO) && !flags.contains(AvEnable::HARD_DISABLE_AUDIO)
    }

    pub fn fast_savestates(&self) -> bool {
        self.flags().contains(AvEnable::FAST_SAVESTATES)
    }

    /// Permanently set or clear a flag (frontend-level switches)
    pub fn set(&self, flag: AvEnable, enabled: bool) {
        let mut flags = self.flags();
        flags.set(flag, enabled);
        self.state.flags.set(flags);
    }

    fn guard(&self, clear: AvEnable, set: AvEnable, context: Option<SavestateContext>) -> AvGuard {
        let previous = self.flags();
        let previous_context = self.savestate_context();
        self.state.flags.set((previous - clear) | set);
        if let Some(context) = context {
            self.state.context.set(context);
        }
        AvGuard {
            gate: self.clone(),
            previous,
            previous_context,
        }
    }

    /// Stop presenting video until the guard drops
    pub fn suspend_video(&self) -> AvGuard {
        self.guard(AvEnable::VIDEO, AvEnable::empty(), None)
    }

    /// Stop playing audio until the guard drops
    pub fn suspend_audio(&self) -> AvGuard {
        self.guard(AvEnable::AUDIO, AvEnable::empty(), None)
    }

    /// Suspend both video and audio until the guard drops
    pub fn suspend_all(&self) -> AvGuard {
        self.guard(AvEnable::VIDEO | AvEnable::AUDIO, AvEnable::empty(), None)
    }

    /// Advertise fast savestates with the given context until the guard drops
    pub fn fast_savestate(&self, context: SavestateContext) -> AvGuard {
        self.guard(AvEnable::empty(), AvEnable::FAST_SAVESTATES, Some(context))
    }
}
