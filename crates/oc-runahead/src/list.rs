//! Growable list of constructed elements
//!
//! Slots beyond `len()` are empty. Growing allocates at least double the
//! previous capacity; shrinking runs the destructor on trailing elements
//! before the size is updated. Allocation failure is reported, never aborts.

use oc_core::RunAheadError;

type Constructor<T> = Box<dyn FnMut() -> Option<T>>;
type Destructor<T> = Box<dyn FnMut(T)>;

/// List of owned elements with constructor/destructor hooks
pub struct DynamicList<T> {
    /// `slots.len()` is the capacity
    slots: Vec<Option<T>>,
    size: usize,
    ctor: Constructor<T>,
    dtor: Option<Destructor<T>>,
}

impl<T> DynamicList<T> {
    /// Create an empty list with room for `initial_capacity` elements.
    ///
    /// `ctor` returns `None` when it cannot allocate the element.
    pub fn create(
        initial_capacity: usize,
        ctor: impl FnMut() -> Option<T> + 'static,
        dtor: Option<Box<dyn FnMut(T)>>,
    ) -> Result<Self, RunAheadError> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(initial_capacity)
            .map_err(|e| RunAheadError::AllocationFailure(e.to_string()))?;
        slots.resize_with(initial_capacity, || None);

        Ok(Self {
            slots,
            size: 0,
            ctor: Box::new(ctor),
            dtor,
        })
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Element at `index`, `None` past the end or for an unconstructed slot
    pub fn get(&self, index: usize) -> Option<&T> {
        if index < self.size {
            self.slots[index].as_ref()
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if index < self.size {
            self.slots[index].as_mut()
        } else {
            None
        }
    }

    /// Live elements in order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots[..self.size].iter().filter_map(Option::as_ref)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.slots[..self.size].iter_mut().filter_map(Option::as_mut)
    }

    /// Change the number of elements.
    ///
    /// New slots start empty and are filled by the constructor when
    /// `run_ctor` is set. If the constructor fails the list keeps the
    /// elements built so far.
    pub fn resize(&mut self, new_size: usize, run_ctor: bool) -> Result<(), RunAheadError> {
        let old_size = self.size;

        if new_size > self.capacity() {
            let new_capacity = new_size.max(self.capacity() * 2);
            let additional = new_capacity - self.slots.len();
            self.slots
                .try_reserve_exact(additional)
                .map_err(|e| RunAheadError::AllocationFailure(e.to_string()))?;
            self.slots.resize_with(new_capacity, || None);
        }

        if new_size > old_size {
            if run_ctor {
                for index in old_size..new_size {
                    match (self.ctor)() {
                        Some(element) => {
                            self.slots[index] = Some(element);
                            self.size = index + 1;
                        }
                        None => {
                            return Err(RunAheadError::AllocationFailure(format!(
                                "element {} of {}",
                                index, new_size
                            )))
                        }
                    }
                }
            }
        } else {
            for index in new_size..old_size {
                if let Some(element) = self.slots[index].take() {
                    if let Some(dtor) = self.dtor.as_mut() {
                        dtor(element);
                    }
                }
            }
        }

        self.size = new_size;
        Ok(())
    }

    /// Append a constructed element and return it
    pub fn add_element(&mut self) -> Result<&mut T, RunAheadError> {
        let index = self.size;
        self.resize(index + 1, true)?;
        self.slots[index]
            .as_mut()
            .ok_or_else(|| RunAheadError::AllocationFailure("unconstructed element".to_string()))
    }

    /// Destroy every element and release the backing storage
    pub fn destroy(mut self) {
        self.clear();
    }

    fn clear(&mut self) {
        // Shrinking never allocates, so this cannot fail.
        let _ = self.resize(0, false);
        self.slots = Vec::new();
    }
}

impl<T> Drop for DynamicList<T> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for DynamicList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicList")
            .field("size", &self.size)
            .field("capacity", &self.capacity())
            .finish()
    }
}
