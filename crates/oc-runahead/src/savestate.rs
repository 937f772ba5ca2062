//! Reusable save-state buffers
//!
//! The serialize size is probed once per session and a single buffer of that
//! size is kept for the whole session. Saves and loads advertise fast
//! savestates to the core because the state never leaves memory.

use crate::input::InputTracker;
use crate::list::DynamicList;
use oc_core::{AvGate, CoreInstance, RunAheadError, SavestateContext};

/// Serialized core state
#[derive(Debug)]
pub struct SerializedState {
    data: Vec<u8>,
}

impl SerializedState {
    /// Allocate a zeroed buffer, `None` if the allocation fails
    pub fn with_size(size: usize) -> Option<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(size).ok()?;
        data.resize(size, 0);
        Some(Self { data })
    }

    /// Copy of an existing serialized state
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: bytes.to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// What is known about the core's serialize size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateSize {
    Unknown,
    Known(usize),
}

/// Owner of the session's save-state buffers
pub struct SaveStateManager {
    size: StateSize,
    states: Option<DynamicList<SerializedState>>,
    saves: u64,
    loads: u64,
}

impl Default for SaveStateManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SaveStateManager {
    pub fn new() -> Self {
        Self {
            size: StateSize::Unknown,
            states: None,
            saves: 0,
            loads: 0,
        }
    }

    pub fn size(&self) -> StateSize {
        self.size
    }

    /// Buffers are allocated and ready for `save`
    pub fn is_allocated(&self) -> bool {
        self.states.as_ref().is_some_and(|states| !states.is_empty())
    }

    pub fn saves(&self) -> u64 {
        self.saves
    }

    pub fn loads(&self) -> u64 {
        self.loads
    }

    /// Query the serialize size. Only calls the core while the size is unknown.
    pub fn probe<C: CoreInstance + ?Sized>(
        &mut self,
        core: &mut C,
        av: &AvGate,
    ) -> Result<usize, RunAheadError> {
        let size = match self.size {
            StateSize::Known(size) => size,
            StateSize::Unknown => {
                let size = {
                    let _fast = av.fast_savestate(SavestateContext::RunaheadSameInstance);
                    core.serialize_size()
                };
                self.size = StateSize::Known(size);
                tracing::debug!("Core serialize size: {} bytes", size);
                size
            }
        };

        if size == 0 {
            return Err(RunAheadError::ConfigurationUnsupported);
        }
        Ok(size)
    }

    /// Allocate one reusable buffer of the probed size
    pub fn allocate(&mut self, size: usize) -> Result<(), RunAheadError> {
        if let Some(states) = self.states.take() {
            states.destroy();
        }

        let mut states = DynamicList::create(1, move || SerializedState::with_size(size), None)?;
        states.add_element()?;
        self.states = Some(states);
        Ok(())
    }

    /// Probe (first time only) and allocate
    pub fn create<C: CoreInstance + ?Sized>(
        &mut self,
        core: &mut C,
        av: &AvGate,
    ) -> Result<(), RunAheadError> {
        let size = self.probe(core, av)?;
        self.allocate(size)
    }

    /// The buffer holding the last save
    pub fn state(&self) -> Option<&SerializedState> {
        self.states.as_ref().and_then(|states| states.get(0))
    }

    /// Serialize the core into the buffer
    pub fn save<C: CoreInstance + ?Sized>(
        &mut self,
        core: &mut C,
        av: &AvGate,
    ) -> Result<(), RunAheadError> {
        let state = self
            .states
            .as_mut()
            .and_then(|states| states.get_mut(0))
            .ok_or(RunAheadError::SerializeFailure)?;

        let ok = {
            let _fast = av.fast_savestate(SavestateContext::RunaheadSameInstance);
            core.serialize(state.as_bytes_mut())
        };

        if !ok {
            return Err(RunAheadError::SerializeFailure);
        }
        self.saves += 1;
        Ok(())
    }

    /// Restore the buffer into the core.
    ///
    /// A rollback load is not a real state change, so the tracker's dirty
    /// flag is put back to its value from before the load.
    pub fn load<C: CoreInstance + ?Sized>(
        &mut self,
        core: &mut C,
        av: &AvGate,
        tracker: &InputTracker,
    ) -> Result<(), RunAheadError> {
        let state = self
            .states
            .as_ref()
            .and_then(|states| states.get(0))
            .ok_or(RunAheadError::DeserializeFailure)?;

        let was_dirty = tracker.is_dirty();
        let ok = {
            let _fast = av.fast_savestate(SavestateContext::RunaheadSameInstance);
            core.unserialize(state.as_bytes())
        };
        tracker.set_dirty(was_dirty);

        if !ok {
            return Err(RunAheadError::DeserializeFailure);
        }
        self.loads += 1;
        Ok(())
    }

    /// Release the buffers, keeping what is known about the size
    pub fn release(&mut self) {
        if let Some(states) = self.states.take() {
            states.destroy();
        }
    }

    /// Release the buffers and forget the size
    pub fn reset(&mut self) {
        self.release();
        self.size = StateSize::Unknown;
    }
}
