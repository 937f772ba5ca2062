//! Frontend integration layer for oxidized-runahead
//!
//! This crate ties a loaded core, controller input and the run-ahead
//! subsystem into a single frame-by-frame runner.

pub mod runner;

pub use runner::{FrontendRunner, PresentedFrame, RunnerState};
