//! Controller/gamepad state

use bitflags::bitflags;

bitflags! {
    /// Joypad buttons, bit `n` is libretro joypad id `n`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct JoypadButtons: u16 {
        const B      = 1 << 0;
        const Y      = 1 << 1;
        const SELECT = 1 << 2;
        const START  = 1 << 3;
        const UP     = 1 << 4;
        const DOWN   = 1 << 5;
        const LEFT   = 1 << 6;
        const RIGHT  = 1 << 7;
        const A      = 1 << 8;
        const X      = 1 << 9;
        const L      = 1 << 10;
        const R      = 1 << 11;
        const L2     = 1 << 12;
        const R2     = 1 << 13;
        const L3     = 1 << 14;
        const R3     = 1 << 15;
    }
}

/// Joypad id answering with every button as a bitmask
pub const JOYPAD_MASK: u32 = 256;

/// Analog axis ids
pub const ANALOG_X: u32 = 0;
pub const ANALOG_Y: u32 = 1;

/// Analog stick index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalogStick {
    Left = 0,
    Right = 1,
}

/// Controller state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PadState {
    pub buttons: JoypadButtons,
    /// `[stick][axis]`, -0x8000..=0x7fff with 0 at center
    pub analog: [[i16; 2]; 2],
}

impl PadState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_button_pressed(&self, button: JoypadButtons) -> bool {
        self.buttons.contains(button)
    }

    pub fn set_button(&mut self, button: JoypadButtons, pressed: bool) {
        self.buttons.set(button, pressed);
    }

    pub fn set_axis(&mut self, stick: AnalogStick, axis: u32, value: i16) {
        if let Some(slot) = self.analog[stick as usize].get_mut(axis as usize) {
            *slot = value;
        }
    }

    /// Value of a joypad id: 0/1 for buttons, the whole mask for [`JOYPAD_MASK`]
    pub fn joypad(&self, id: u32) -> i16 {
        match id {
            JOYPAD_MASK => self.buttons.bits() as i16,
            0..=15 => i16::from(self.buttons.bits() & (1 << id) != 0),
            _ => 0,
        }
    }

    /// Value of an analog axis, 0 for unknown sticks or axes
    pub fn axis(&self, index: u32, id: u32) -> i16 {
        self.analog
            .get(index as usize)
            .and_then(|stick| stick.get(id as usize))
            .copied()
            .unwrap_or(0)
    }
}

/// Pad handler for a single controller
#[derive(Debug, Clone)]
pub struct Pad {
    pub port: u32,
    /// Current state
    pub state: PadState,
    /// Connected flag
    pub connected: bool,
}

impl Pad {
    pub fn new(port: u32) -> Self {
        Self {
            port,
            state: PadState::new(),
            connected: false,
        }
    }

    pub fn connect(&mut self) {
        self.connected = true;
        tracing::debug!("Pad {} connected", self.port);
    }

    pub fn disconnect(&mut self) {
        self.connected = false;
        self.state = PadState::new();
        tracing::debug!("Pad {} disconnected", self.port);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_creation() {
        let pad = Pad::new(0);
        assert_eq!(pad.port, 0);
        assert!(!pad.connected);
    }

    #[test]
    fn test_pad_state() {
        let mut state = PadState::new();
        assert!(!state.is_button_pressed(JoypadButtons::A));

        state.set_button(JoypadButtons::A, true);
        assert!(state.is_button_pressed(JoypadButtons::A));

        state.set_button(JoypadButtons::A, false);
        assert!(!state.is_button_pressed(JoypadButtons::A));
    }

    #[test]
    fn test_joypad_ids() {
        let mut state = PadState::new();
        state.set_button(JoypadButtons::START, true);
        state.set_button(JoypadButtons::R, true);

        assert_eq!(state.joypad(3), 1);
        assert_eq!(state.joypad(11), 1);
        assert_eq!(state.joypad(8), 0);
        assert_eq!(state.joypad(JOYPAD_MASK), (1 << 3) | (1 << 11));
        assert_eq!(state.joypad(40), 0);
    }

    #[test]
    fn test_axes() {
        let mut state = PadState::new();
        state.set_axis(AnalogStick::Right, ANALOG_Y, -300);
        assert_eq!(state.axis(1, ANALOG_Y), -300);
        assert_eq!(state.axis(0, ANALOG_Y), 0);
        assert_eq!(state.axis(7, ANALOG_X), 0);
    }

    #[test]
    fn test_disconnect_clears_state() {
        let mut pad = Pad::new(1);
        pad.connect();
        pad.state.set_button(JoypadButtons::B, true);
        pad.disconnect();
        assert_eq!(pad.state, PadState::new());
    }
}
