//! Core instance capability interface
//!
//! A core is the dynamically loaded module that implements the emulated
//! machine. The frontend only sees it through [`CoreInstance`]; callbacks the
//! core invokes are carried in [`CoreCallbacks`] so a set can be saved,
//! swapped and restored.

use crate::av::{AvEnable, SavestateContext};
use crate::error::LoaderError;
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Highest number of controller ports tracked for mirroring
pub const MAX_PORTS: usize = 16;

/// Libretro device classes used by the frontend
pub const DEVICE_NONE: u32 = 0;
pub const DEVICE_JOYPAD: u32 = 1;
pub const DEVICE_ANALOG: u32 = 5;

/// A presented video frame
#[derive(Debug, Clone, Copy)]
pub struct VideoFrame<'a> {
    /// Pixel data, `None` for a duped frame
    pub data: Option<&'a [u8]>,
    pub width: u32,
    pub height: u32,
    pub pitch: usize,
}

/// Typed environment query
pub enum EnvironmentRequest<'a> {
    /// Has a core option changed since the last query
    VariableUpdate(&'a mut bool),
    /// Which outputs are currently presented
    AudioVideoEnable(&'a mut AvEnable),
    /// Why the next serialize/unserialize is happening
    SavestateContext(&'a mut SavestateContext),
    /// Any other command, identified by its raw number
    Other(u32),
}

pub type EnvironmentFn = Rc<dyn Fn(EnvironmentRequest<'_>) -> bool>;
pub type VideoRefreshFn = Rc<dyn Fn(VideoFrame<'_>)>;
pub type AudioSampleBatchFn = Rc<dyn Fn(&[i16]) -> usize>;
pub type InputPollFn = Rc<dyn Fn()>;
pub type InputStateFn = Rc<dyn Fn(u32, u32, u32, u32) -> i16>;

/// Callbacks a core invokes
#[derive(Clone, Default)]
pub struct CoreCallbacks {
    pub environment: Option<EnvironmentFn>,
    pub video_refresh: Option<VideoRefreshFn>,
    pub audio_sample_batch: Option<AudioSampleBatchFn>,
    pub input_poll: Option<InputPollFn>,
    pub input_state: Option<InputStateFn>,
}

impl std::fmt::Debug for CoreCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreCallbacks")
            .field("environment", &self.environment.is_some())
            .field("video_refresh", &self.video_refresh.is_some())
            .field("audio_sample_batch", &self.audio_sample_batch.is_some())
            .field("input_poll", &self.input_poll.is_some())
            .field("input_state", &self.input_state.is_some())
            .finish()
    }
}

impl CoreCallbacks {
    /// Query the environment callback, false when none is set
    pub fn environment(&self, request: EnvironmentRequest<'_>) -> bool {
        match &self.environment {
            Some(env) => env(request),
            None => false,
        }
    }

    pub fn poll(&self) {
        if let Some(poll) = &self.input_poll {
            poll();
        }
    }

    /// Query input, 0 when no input callback is set
    pub fn input(&self, port: u32, device: u32, index: u32, id: u32) -> i16 {
        match &self.input_state {
            Some(state) => state(port, device, index, id),
            None => 0,
        }
    }

    pub fn present(&self, frame: VideoFrame<'_>) {
        if let Some(video) = &self.video_refresh {
            video(frame);
        }
    }

    pub fn play(&self, samples: &[i16]) -> usize {
        match &self.audio_sample_batch {
            Some(audio) => audio(samples),
            None => 0,
        }
    }
}

/// Content handed to `load_game`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameInfo {
    pub path: Option<PathBuf>,
    pub data: Option<Vec<u8>>,
    pub meta: Option<String>,
}

impl GameInfo {
    /// Content referenced by path only
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Content read into memory
    pub fn from_file(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let data = std::fs::read(&path)?;
        Ok(Self {
            path: Some(path),
            data: Some(data),
            meta: None,
        })
    }
}

/// Where a running core came from, needed to bring up a second copy
#[derive(Debug, Clone)]
pub struct CoreSource {
    /// Backing dynamic library of the primary instance
    pub library_path: PathBuf,
    /// The `load_game` argument used for the primary, `None` if contentless
    pub game: Option<GameInfo>,
}

/// Capability set of one loaded core
pub trait CoreInstance {
    fn init(&mut self);
    fn deinit(&mut self);
    fn load_game(&mut self, game: Option<&GameInfo>) -> bool;
    fn unload_game(&mut self);
    fn run(&mut self);
    fn reset(&mut self);
    fn serialize_size(&mut self) -> usize;
    fn serialize(&mut self, data: &mut [u8]) -> bool;
    fn unserialize(&mut self, data: &[u8]) -> bool;
    fn set_controller_port_device(&mut self, port: u32, device: u32);

    /// Callbacks currently installed
    fn callbacks(&self) -> &CoreCallbacks;
    fn set_callbacks(&mut self, callbacks: CoreCallbacks);

    fn set_environment(&mut self, environment: EnvironmentFn) {
        let mut callbacks = self.callbacks().clone();
        callbacks.environment = Some(environment);
        self.set_callbacks(callbacks);
    }

    fn set_input_poll(&mut self, poll: InputPollFn) {
        let mut callbacks = self.callbacks().clone();
        callbacks.input_poll = Some(poll);
        self.set_callbacks(callbacks);
    }

    fn set_input_state(&mut self, state: InputStateFn) {
        let mut callbacks = self.callbacks().clone();
        callbacks.input_state = Some(state);
        self.set_callbacks(callbacks);
    }
}

impl<C: CoreInstance + ?Sized> CoreInstance for Box<C> {
    fn init(&mut self) {
        (**self).init()
    }

    fn deinit(&mut self) {
        (**self).deinit()
    }

    fn load_game(&mut self, game: Option<&GameInfo>) -> bool {
        (**self).load_game(game)
    }

    fn unload_game(&mut self) {
        (**self).unload_game()
    }

    fn run(&mut self) {
        (**self).run()
    }

    fn reset(&mut self) {
        (**self).reset()
    }

    fn serialize_size(&mut self) -> usize {
        (**self).serialize_size()
    }

    fn serialize(&mut self, data: &mut [u8]) -> bool {
        (**self).serialize(data)
    }

    fn unserialize(&mut self, data: &[u8]) -> bool {
        (**self).unserialize(data)
    }

    fn set_controller_port_device(&mut self, port: u32, device: u32) {
        (**self).set_controller_port_device(port, device)
    }

    fn callbacks(&self) -> &CoreCallbacks {
        (**self).callbacks()
    }

    fn set_callbacks(&mut self, callbacks: CoreCallbacks) {
        (**self).set_callbacks(callbacks)
    }
}

/// Opens a core library as an independent instance
pub trait CoreLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn CoreInstance>, LoaderError>;
}
