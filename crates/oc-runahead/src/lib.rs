//! Run-ahead for oxidized-runahead
//!
//! This crate hides input latency by speculatively running a deterministic
//! core ahead of real time, either by rolling the primary instance back
//! every frame or by keeping a secondary instance of the same core ahead.

pub mod hooks;
pub mod input;
pub mod list;
pub mod runahead;
pub mod savestate;
pub mod secondary;
#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use hooks::HookedCore;
pub use input::{
    null_input_poll, replay_input_state, run_with_last_input, InputRecord, InputTracker,
    MAX_TRACKED_ID,
};
pub use list::DynamicList;
pub use runahead::{RunAhead, RunAheadSession, RunAheadState, RunAheadStats, Strategy};
pub use savestate::{SaveStateManager, SerializedState, StateSize};
pub use secondary::{
    copy_library_to_temp, copy_library_to_temp_with, SecondaryCore, MAX_COPY_ATTEMPTS,
};
