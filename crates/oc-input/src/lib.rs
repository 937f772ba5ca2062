//! Input handling for oxidized-runahead
//!
//! Holds the host-side controller state and answers a core's input
//! queries from it.

pub mod manager;
pub mod pad;

pub use manager::InputManager;
pub use pad::{AnalogStick, JoypadButtons, Pad, PadState, ANALOG_X, ANALOG_Y, JOYPAD_MASK};
