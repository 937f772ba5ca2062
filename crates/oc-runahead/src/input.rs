//! Last-seen input records and dirtiness tracking
//!
//! Every real input query made by the primary instance is logged here. The
//! log serves two purposes: replaying the last known input to speculative
//! frames without polling the host, and noticing when real input changed
//! from what the speculative frames assumed.

use crate::list::DynamicList;
use oc_core::{CoreInstance, InputPollFn, InputStateFn, RunAheadError};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Ids at or above this value are neither cached nor counted as dirty
pub const MAX_TRACKED_ID: u32 = 65536;

/// Last-seen values for one (port, device, index)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InputRecord {
    pub port: u32,
    pub device: u32,
    pub index: u32,
    /// Indexed by input id
    values: Vec<i16>,
}

impl InputRecord {
    fn matches(&self, port: u32, device: u32, index: u32) -> bool {
        self.port == port && self.device == device && self.index == index
    }

    /// Cached value for `id`, 0 if never seen
    pub fn get(&self, id: u32) -> i16 {
        self.values.get(id as usize).copied().unwrap_or(0)
    }

    /// Store a value, growing the value array (doubling) as needed
    pub fn set(&mut self, id: u32, value: i16) -> Result<(), RunAheadError> {
        let id = id as usize;
        if id >= self.values.len() {
            let new_len = (id + 1).max(self.values.len() * 2);
            self.values
                .try_reserve_exact(new_len - self.values.len())
                .map_err(|e| RunAheadError::AllocationFailure(e.to_string()))?;
            self.values.resize(new_len, 0);
        }
        self.values[id] = value;
        Ok(())
    }

    /// Number of ids with storage
    pub fn tracked_ids(&self) -> usize {
        self.values.len()
    }
}

/// Input log shared by the hook layer, the replay source and the session
pub struct InputTracker {
    records: RefCell<DynamicList<InputRecord>>,
    dirty: Cell<bool>,
}

impl InputTracker {
    pub fn new() -> Result<Self, RunAheadError> {
        let records = DynamicList::create(4, || Some(InputRecord::default()), None)?;
        Ok(Self {
            records: RefCell::new(records),
            dirty: Cell::new(true),
        })
    }

    /// Has real input diverged since the flag was last cleared
    pub fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    pub fn mark_dirty(&self) {
        self.dirty.set(true);
    }

    pub fn clear_dirty(&self) {
        self.dirty.set(false);
    }

    /// Overwrite the flag, used to restore it around state loads
    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.set(dirty);
    }

    /// Cached value, 0 if unseen. Never polls real input.
    pub fn last_value(&self, port: u32, device: u32, index: u32, id: u32) -> i16 {
        self.records
            .borrow()
            .iter()
            .find(|r| r.matches(port, device, index))
            .map_or(0, |r| r.get(id))
    }

    /// Log a real input value and flag divergence from the cache.
    ///
    /// The flag is only ever set here, a matching value leaves it alone.
    pub fn observe(&self, port: u32, device: u32, index: u32, id: u32, value: i16) {
        if id >= MAX_TRACKED_ID {
            return;
        }

        if value != self.last_value(port, device, index, id) {
            self.dirty.set(true);
        }

        if let Err(e) = self.store(port, device, index, id, value) {
            tracing::trace!("Dropping input record for port {} id {}: {}", port, id, e);
        }
    }

    fn store(
        &self,
        port: u32,
        device: u32,
        index: u32,
        id: u32,
        value: i16,
    ) -> Result<(), RunAheadError> {
        let mut records = self.records.borrow_mut();
        if let Some(record) = records.iter_mut().find(|r| r.matches(port, device, index)) {
            return record.set(id, value);
        }

        let record = records.add_element()?;
        record.port = port;
        record.device = device;
        record.index = index;
        record.set(id, value)
    }

    /// Number of (port, device, index) records
    pub fn record_count(&self) -> usize {
        self.records.borrow().len()
    }

    /// Forget every cached value
    pub fn clear(&self) {
        // Shrinking never allocates.
        let _ = self.records.borrow_mut().resize(0, false);
    }
}

/// Replay-only input source backed by the tracker
pub fn replay_input_state(tracker: &Rc<InputTracker>) -> InputStateFn {
    let tracker = tracker.clone();
    Rc::new(move |port, device, index, id| tracker.last_value(port, device, index, id))
}

/// Input poll that does nothing
pub fn null_input_poll() -> InputPollFn {
    Rc::new(|| {})
}

/// Run one frame on `core` fed with the last known input.
///
/// The previously installed poll and state callbacks are put back afterwards.
pub fn run_with_last_input<C: CoreInstance + ?Sized>(core: &mut C, tracker: &Rc<InputTracker>) {
    let previous = core.callbacks().clone();

    let mut replay = previous.clone();
    replay.input_poll = Some(null_input_poll());
    replay.input_state = Some(replay_input_state(tracker));
    core.set_callbacks(replay);

    core.run();

    core.set_callbacks(previous);
}

#[cfg(test)]
mod tests {
    use super::*;
    use oc_core::DEVICE_JOYPAD;

    fn tracker() -> Rc<InputTracker> {
        let tracker = Rc::new(InputTracker::new().unwrap());
        tracker.clear_dirty();
        tracker
    }

    #[test]
    fn test_starts_dirty() {
        let tracker = InputTracker::new().unwrap();
        assert!(tracker.is_dirty());
    }

    #[test]
    fn test_unseen_input_reads_zero() {
        let tracker = tracker();
        assert_eq!(tracker.last_value(0, DEVICE_JOYPAD, 0, 5), 0);
    }

    #[test]
    fn test_changed_value_marks_dirty() {
        let tracker = tracker();
        tracker.observe(0, DEVICE_JOYPAD, 0, 8, 1);
        assert!(tracker.is_dirty());
        assert_eq!(tracker.last_value(0, DEVICE_JOYPAD, 0, 8), 1);
    }

    #[test]
    fn test_same_value_never_clears_flag() {
        let tracker = tracker();
        tracker.observe(0, DEVICE_JOYPAD, 0, 8, 1);
        tracker.observe(0, DEVICE_JOYPAD, 0, 8, 1);
        assert!(tracker.is_dirty());

        tracker.clear_dirty();
        tracker.observe(0, DEVICE_JOYPAD, 0, 8, 1);
        assert!(!tracker.is_dirty());
    }

    #[test]
    fn test_zero_matches_unseen() {
        let tracker = tracker();
        tracker.observe(1, DEVICE_JOYPAD, 0, 3, 0);
        assert!(!tracker.is_dirty());
    }

    #[test]
    fn test_records_keyed_by_port_device_index() {
        let tracker = tracker();
        tracker.observe(0, DEVICE_JOYPAD, 0, 0, 1);
        tracker.observe(1, DEVICE_JOYPAD, 0, 0, 2);
        tracker.observe(0, DEVICE_JOYPAD, 1, 0, 3);
        tracker.observe(0, DEVICE_JOYPAD, 0, 4, 4);

        assert_eq!(tracker.record_count(), 3);
        assert_eq!(tracker.last_value(0, DEVICE_JOYPAD, 0, 0), 1);
        assert_eq!(tracker.last_value(1, DEVICE_JOYPAD, 0, 0), 2);
        assert_eq!(tracker.last_value(0, DEVICE_JOYPAD, 1, 0), 3);
        assert_eq!(tracker.last_value(0, DEVICE_JOYPAD, 0, 4), 4);
    }

    #[test]
    fn test_ids_past_cap_are_ignored() {
        let tracker = tracker();
        tracker.observe(0, DEVICE_JOYPAD, 0, MAX_TRACKED_ID, 7);
        assert!(!tracker.is_dirty());
        assert_eq!(tracker.last_value(0, DEVICE_JOYPAD, 0, MAX_TRACKED_ID), 0);
    }

    #[test]
    fn test_record_value_array_doubles() {
        let mut record = InputRecord::default();
        record.set(0, 1).unwrap();
        assert_eq!(record.tracked_ids(), 1);
        record.set(1, 1).unwrap();
        assert_eq!(record.tracked_ids(), 2);
        record.set(2, 1).unwrap();
        assert_eq!(record.tracked_ids(), 4);
        record.set(100, 1).unwrap();
        assert_eq!(record.tracked_ids(), 101);
    }

    #[test]
    fn test_replay_source_reads_cache() {
        let tracker = tracker();
        tracker.observe(0, DEVICE_JOYPAD, 0, 2, -5);
        let replay = replay_input_state(&tracker);
        assert_eq!(replay(0, DEVICE_JOYPAD, 0, 2), -5);
        assert_eq!(replay(0, DEVICE_JOYPAD, 0, 3), 0);
    }

    #[test]
    fn test_clear_forgets_values() {
        let tracker = tracker();
        tracker.observe(0, DEVICE_JOYPAD, 0, 2, 9);
        tracker.clear();
        assert_eq!(tracker.record_count(), 0);
        assert_eq!(tracker.last_value(0, DEVICE_JOYPAD, 0, 2), 0);
    }
}
