//! Input-dirtiness hooks on the primary instance
//!
//! [`HookedCore`] wraps the primary core and exposes the same capability
//! interface. While hooks are installed, real input queries are logged into
//! the [`InputTracker`], and `reset`/`unserialize` mark input dirty before
//! delegating, since both change emulated state behind the speculation's back.

use crate::input::{run_with_last_input, InputTracker};
use oc_core::{CoreCallbacks, CoreInstance, GameInfo, InputStateFn, MAX_PORTS};
use std::rc::Rc;

/// Originals replaced while hooks are installed
struct HookState {
    tracker: Rc<InputTracker>,
    original_input_state: Option<InputStateFn>,
}

/// Primary core decorated with run-ahead hooks
pub struct HookedCore {
    inner: Box<dyn CoreInstance>,
    hooks: Option<HookState>,
    port_devices: [Option<u32>; MAX_PORTS],
}

fn logging_input_state(original: Option<InputStateFn>, tracker: Rc<InputTracker>) -> InputStateFn {
    Rc::new(move |port, device, index, id| {
        let value = original
            .as_ref()
            .map_or(0, |state| state(port, device, index, id));
        tracker.observe(port, device, index, id, value);
        value
    })
}

impl HookedCore {
    pub fn new(inner: Box<dyn CoreInstance>) -> Self {
        Self {
            inner,
            hooks: None,
            port_devices: [None; MAX_PORTS],
        }
    }

    pub fn hooks_installed(&self) -> bool {
        self.hooks.is_some()
    }

    /// Install the hooks. Returns false if they were already installed.
    pub fn install_hooks(&mut self, tracker: Rc<InputTracker>) -> bool {
        if self.hooks.is_some() {
            return false;
        }

        let mut callbacks = self.inner.callbacks().clone();
        let original_input_state = callbacks.input_state.take();
        callbacks.input_state = Some(logging_input_state(
            original_input_state.clone(),
            tracker.clone(),
        ));
        self.inner.set_callbacks(callbacks);

        self.hooks = Some(HookState {
            tracker,
            original_input_state,
        });
        tracing::debug!("Run-ahead hooks installed");
        true
    }

    /// Restore the original callbacks and drop the input log.
    /// Returns false if no hooks were installed.
    pub fn remove_hooks(&mut self) -> bool {
        let Some(hooks) = self.hooks.take() else {
            return false;
        };

        let mut callbacks = self.inner.callbacks().clone();
        callbacks.input_state = hooks.original_input_state;
        self.inner.set_callbacks(callbacks);
        hooks.tracker.clear();

        tracing::debug!("Run-ahead hooks removed");
        true
    }

    /// Callbacks as the frontend installed them, without the logging wrapper
    pub fn original_callbacks(&self) -> CoreCallbacks {
        let mut callbacks = self.inner.callbacks().clone();
        if let Some(hooks) = &self.hooks {
            callbacks.input_state = hooks.original_input_state.clone();
        }
        callbacks
    }

    /// Devices set on each port, in port order
    pub fn port_devices(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.port_devices
            .iter()
            .enumerate()
            .filter_map(|(port, device)| device.map(|device| (port as u32, device)))
    }

    /// Run one frame fed with the last known input, bypassing the hooks
    pub fn run_with_last_input(&mut self, tracker: &Rc<InputTracker>) {
        run_with_last_input(self.inner.as_mut(), tracker);
    }

    fn mark_dirty(&self) {
        if let Some(hooks) = &self.hooks {
            hooks.tracker.mark_dirty();
        }
    }
}

impl CoreInstance for HookedCore {
    fn init(&mut self) {
        self.inner.init()
    }

    fn deinit(&mut self) {
        self.inner.deinit()
    }

    fn load_game(&mut self, game: Option<&GameInfo>) -> bool {
        self.inner.load_game(game)
    }

    fn unload_game(&mut self) {
        self.inner.unload_game()
    }

    fn run(&mut self) {
        self.inner.run()
    }

    fn reset(&mut self) {
        self.mark_dirty();
        self.inner.reset()
    }

    fn serialize_size(&mut self) -> usize {
        self.inner.serialize_size()
    }

    fn serialize(&mut self, data: &mut [u8]) -> bool {
        self.inner.serialize(data)
    }

    fn unserialize(&mut self, data: &[u8]) -> bool {
        self.mark_dirty();
        self.inner.unserialize(data)
    }

    fn set_controller_port_device(&mut self, port: u32, device: u32) {
        if let Some(slot) = self.port_devices.get_mut(port as usize) {
            *slot = Some(device);
        }
        self.inner.set_controller_port_device(port, device)
    }

    fn callbacks(&self) -> &CoreCallbacks {
        self.inner.callbacks()
    }

    fn set_callbacks(&mut self, mut callbacks: CoreCallbacks) {
        if let Some(hooks) = self.hooks.as_mut() {
            hooks.original_input_state = callbacks.input_state.take();
            callbacks.input_state = Some(logging_input_state(
                hooks.original_input_state.clone(),
                hooks.tracker.clone(),
            ));
        }
        self.inner.set_callbacks(callbacks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimCore;
    use oc_core::DEVICE_JOYPAD;
    use std::cell::Cell;

    fn hooked_with_input(value: Rc<Cell<i16>>) -> HookedCore {
        let mut core = HookedCore::new(Box::new(SimCore::new()));
        core.set_input_state(Rc::new(move |_, _, _, _| value.get()));
        core
    }

    fn tracker() -> Rc<InputTracker> {
        let tracker = Rc::new(InputTracker::new().unwrap());
        tracker.clear_dirty();
        tracker
    }

    #[test]
    fn test_install_is_idempotent() {
        let mut core = hooked_with_input(Rc::new(Cell::new(0)));
        let tracker = tracker();
        assert!(core.install_hooks(tracker.clone()));
        assert!(!core.install_hooks(tracker));
        assert!(core.hooks_installed());
    }

    #[test]
    fn test_remove_without_install_is_noop() {
        let mut core = hooked_with_input(Rc::new(Cell::new(0)));
        assert!(!core.remove_hooks());
        assert!(core.callbacks().input_state.is_some());
    }

    #[test]
    fn test_hooked_input_is_logged() {
        let value = Rc::new(Cell::new(0));
        let mut core = hooked_with_input(value.clone());
        let tracker = tracker();
        core.install_hooks(tracker.clone());

        value.set(1);
        assert_eq!(core.callbacks().input(0, DEVICE_JOYPAD, 0, 4), 1);
        assert!(tracker.is_dirty());
        assert_eq!(tracker.last_value(0, DEVICE_JOYPAD, 0, 4), 1);
    }

    #[test]
    fn test_remove_restores_original_callback() {
        let value = Rc::new(Cell::new(3));
        let mut core = hooked_with_input(value);
        let tracker = tracker();
        core.install_hooks(tracker.clone());
        core.callbacks().input(0, DEVICE_JOYPAD, 0, 1);
        assert_eq!(tracker.record_count(), 1);

        assert!(core.remove_hooks());
        tracker.clear_dirty();
        assert_eq!(core.callbacks().input(0, DEVICE_JOYPAD, 0, 1), 3);
        assert!(!tracker.is_dirty());
        assert_eq!(tracker.record_count(), 0);
    }

    #[test]
    fn test_reset_and_unserialize_mark_dirty() {
        let mut core = hooked_with_input(Rc::new(Cell::new(0)));
        let tracker = tracker();
        core.install_hooks(tracker.clone());

        core.reset();
        assert!(tracker.is_dirty());

        tracker.clear_dirty();
        let mut state = vec![0u8; core.serialize_size()];
        assert!(core.serialize(&mut state));
        assert!(!tracker.is_dirty());
        assert!(core.unserialize(&state));
        assert!(tracker.is_dirty());
    }

    #[test]
    fn test_replacing_input_callback_keeps_hook() {
        let mut core = hooked_with_input(Rc::new(Cell::new(0)));
        let tracker = tracker();
        core.install_hooks(tracker.clone());

        core.set_input_state(Rc::new(|_, _, _, _| 9));
        assert_eq!(core.callbacks().input(2, DEVICE_JOYPAD, 0, 0), 9);
        assert!(tracker.is_dirty());
        assert_eq!(core.original_callbacks().input(2, DEVICE_JOYPAD, 0, 0), 9);
    }

    #[test]
    fn test_port_devices_are_remembered() {
        let mut core = HookedCore::new(Box::new(SimCore::new()));
        core.set_controller_port_device(1, DEVICE_JOYPAD);
        core.set_controller_port_device(0, 5);
        core.set_controller_port_device(99, DEVICE_JOYPAD);
        let ports: Vec<_> = core.port_devices().collect();
        assert_eq!(ports, vec![(0, 5), (1, DEVICE_JOYPAD)]);
    }
}
