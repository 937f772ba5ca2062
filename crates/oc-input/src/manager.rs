//! Host controller state as seen by a core
//!
//! The frontend writes to the pads at any time. `poll()` latches what the
//! pads hold, and input queries only ever read the latched copy, so a core
//! sees one consistent snapshot per poll.

use crate::pad::{Pad, PadState};
use oc_core::{DEVICE_ANALOG, DEVICE_JOYPAD};

/// Controllers plugged into the frontend
#[derive(Debug, Clone)]
pub struct InputManager {
    pads: Vec<Pad>,
    latched: Vec<PadState>,
    polls: u64,
}

impl InputManager {
    /// `max_users` pads, the first one connected
    pub fn new(max_users: usize) -> Self {
        let mut pads: Vec<Pad> = (0..max_users as u32).map(Pad::new).collect();
        if let Some(first) = pads.first_mut() {
            first.connect();
        }
        Self {
            latched: vec![PadState::new(); pads.len()],
            pads,
            polls: 0,
        }
    }

    pub fn pad(&self, port: u32) -> Option<&Pad> {
        self.pads.get(port as usize)
    }

    pub fn pad_mut(&mut self, port: u32) -> Option<&mut Pad> {
        self.pads.get_mut(port as usize)
    }

    pub fn pad_count(&self) -> usize {
        self.pads.len()
    }

    /// Number of polls so far
    pub fn polls(&self) -> u64 {
        self.polls
    }

    /// Latch the current pad state
    pub fn poll(&mut self) {
        for (latched, pad) in self.latched.iter_mut().zip(&self.pads) {
            *latched = if pad.connected {
                pad.state
            } else {
                PadState::new()
            };
        }
        self.polls += 1;
    }

    /// Answer a core's input query from the latched state
    pub fn state(&self, port: u32, device: u32, index: u32, id: u32) -> i16 {
        let Some(state) = self.latched.get(port as usize) else {
            return 0;
        };
        match device {
            DEVICE_JOYPAD => state.joypad(id),
            DEVICE_ANALOG => state.axis(index, id),
            _ => 0,
        }
    }
}

impl Default for InputManager {
    fn default() -> Self {
        Self::new(2)
    }
}
