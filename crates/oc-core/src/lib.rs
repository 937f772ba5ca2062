//! Core types for the oxidized-runahead frontend
//!
//! This crate provides the foundational types, error handling,
//! configuration, and logging infrastructure shared by the loader,
//! the run-ahead subsystem and the frontend runner.

pub mod av;
pub mod config;
pub mod error;
pub mod instance;
pub mod logging;
pub mod notify;

pub use av::{AvEnable, AvGate, SavestateContext};
pub use config::{Config, PollType, RunAheadConfig};
pub use error::{EmulatorError, FailureClass, LoaderError, Result, RunAheadError};
pub use instance::{
    AudioSampleBatchFn, CoreCallbacks, CoreInstance, CoreLoader, CoreSource, EnvironmentFn,
    EnvironmentRequest, GameInfo, InputPollFn, InputStateFn, VideoFrame, VideoRefreshFn,
    DEVICE_ANALOG, DEVICE_JOYPAD, DEVICE_NONE, MAX_PORTS,
};
pub use notify::{LogNotifier, Notification, Notifier, QueueNotifier};
