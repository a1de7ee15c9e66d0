use crate::error::Result;

/// Per-slot stage state. Grows to the largest slot count seen and never
/// shrinks, so indices handed out earlier stay valid for the stage lifetime.
#[derive(Clone, Debug, Default)]
pub struct SlotArena<T> {
    slots: Vec<T>,
}

impl<T: Default> SlotArena<T> {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn ensure(&mut self, count: usize) -> Result<()> {
        if count > self.slots.len() {
            self.slots.try_reserve(count - self.slots.len())?;
            self.slots.resize_with(count, T::default);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, slot: usize) -> Option<&T> {
        self.slots.get(slot)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut T> {
        self.slots.get_mut(slot)
    }

    pub fn iter(&self) -> core::slice::Iter<'_, T> {
        self.slots.iter()
    }

    pub fn iter_mut(&mut self) -> core::slice::IterMut<'_, T> {
        self.slots.iter_mut()
    }
}
