use std::collections::HashMap;

use super::entity_store::{BodyParams, EntityKind, EntityStore, Slot};
use super::StoreError;

pub const MAX_ID_LEN: usize = u8::MAX as usize;

/// Slot plus the generation it was issued under. A handle stops resolving
/// once its slot is released, even if the slot is later reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    slot: Slot,
    generation: u16,
}

impl Handle {
    pub fn slot(self) -> Slot {
        self.slot
    }

    pub fn generation(self) -> u16 {
        self.generation
    }
}

/// Maps network ids to dense slots. Strings live here and only here; the
/// store and every per-frame path work on [`Slot`]s.
#[derive(Debug)]
pub struct EntityRegistry {
    by_id: HashMap<String, Slot>,
    ids: Vec<Option<String>>,
    generations: Vec<u16>,
    free: Vec<u32>,
    in_free: Vec<bool>,
    marks: Vec<u32>,
    epoch: u32,
}

impl EntityRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            by_id: HashMap::with_capacity(capacity),
            ids: vec![None; capacity],
            generations: vec![0; capacity],
            free: (0..capacity as u32).rev().collect(),
            in_free: vec![true; capacity],
            marks: vec![0; capacity],
            epoch: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.ids.len()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Assigns the next free slot to `id`, or returns the existing handle
    /// if `id` is already live.
    pub fn acquire(
        &mut self,
        id: &str,
        store: &mut EntityStore,
        kind: EntityKind,
        params: BodyParams,
    ) -> Result<Handle, StoreError> {
        validate_id(id)?;
        if let Some(&slot) = self.by_id.get(id) {
            return Ok(self.handle(slot));
        }

        while let Some(index) = self.free.pop() {
            self.in_free[index as usize] = false;
            if self.ids[index as usize].is_none() {
                let slot = Slot::new(index);
                self.occupy(id, slot, store, kind, params);
                return Ok(self.handle(slot));
            }
        }

        Err(StoreError::Full {
            capacity: self.capacity(),
        })
    }

    /// Binds `id` to a slot chosen by the peer. Whatever occupied that slot
    /// before, and any slot `id` held before, is released first.
    pub fn bind(
        &mut self,
        id: &str,
        slot: Slot,
        store: &mut EntityStore,
        kind: EntityKind,
        params: BodyParams,
    ) -> Result<Handle, StoreError> {
        validate_id(id)?;
        if slot.index() >= self.capacity() {
            return Err(StoreError::SlotOutOfRange {
                slot: slot.raw(),
                capacity: self.capacity(),
            });
        }

        match self.by_id.get(id) {
            Some(&current) if current == slot => return Ok(self.handle(slot)),
            Some(&current) => self.release_slot(current, store),
            None => {}
        }

        if self.ids[slot.index()].is_some() {
            self.release_slot(slot, store);
        }

        self.occupy(id, slot, store, kind, params);
        Ok(self.handle(slot))
    }

    fn occupy(
        &mut self,
        id: &str,
        slot: Slot,
        store: &mut EntityStore,
        kind: EntityKind,
        params: BodyParams,
    ) {
        self.ids[slot.index()] = Some(id.to_owned());
        self.by_id.insert(id.to_owned(), slot);
        self.marks[slot.index()] = self.epoch;
        store.activate(slot, kind, params);
    }

    pub fn release(&mut self, id: &str, store: &mut EntityStore) -> Option<Slot> {
        let slot = *self.by_id.get(id)?;
        self.release_slot(slot, store);
        Some(slot)
    }

    pub fn release_slot(&mut self, slot: Slot, store: &mut EntityStore) {
        let index = slot.index();
        let Some(id) = self.ids.get_mut(index).and_then(Option::take) else {
            return;
        };

        self.by_id.remove(&id);
        self.generations[index] = self.generations[index].wrapping_add(1);
        store.deactivate(slot);

        if !self.in_free[index] {
            self.in_free[index] = true;
            self.free.push(slot.raw());
        }
    }

    pub fn clear(&mut self, store: &mut EntityStore) {
        for index in 0..self.capacity() {
            self.release_slot(Slot::new(index as u32), store);
        }
    }

    pub fn slot_of(&self, id: &str) -> Option<Slot> {
        self.by_id.get(id).copied()
    }

    pub fn handle_of(&self, id: &str) -> Option<Handle> {
        self.slot_of(id).map(|slot| self.handle(slot))
    }

    pub fn id_of(&self, slot: Slot) -> Option<&str> {
        self.ids.get(slot.index())?.as_deref()
    }

    pub fn resolve(&self, handle: Handle) -> Option<Slot> {
        let index = handle.slot.index();
        let live = self.ids.get(index)?.is_some();
        (live && self.generations[index] == handle.generation).then_some(handle.slot)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Slot)> + '_ {
        self.ids
            .iter()
            .enumerate()
            .filter_map(|(index, id)| id.as_deref().map(|id| (id, Slot::new(index as u32))))
    }

    /// Live handles in slot order, without touching the id strings.
    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.ids
            .iter()
            .enumerate()
            .filter(|(_, id)| id.is_some())
            .map(|(index, _)| self.handle(Slot::new(index as u32)))
    }

    fn handle(&self, slot: Slot) -> Handle {
        Handle {
            slot,
            generation: self.generations[slot.index()],
        }
    }

    /// Starts a sweep: slots not [`mark`](Self::mark)ed before the matching
    /// [`sweep`](Self::sweep) are released.
    pub fn begin_mark(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
    }

    pub fn mark(&mut self, slot: Slot) {
        if let Some(mark) = self.marks.get_mut(slot.index()) {
            *mark = self.epoch;
        }
    }

    pub fn sweep(&mut self, store: &mut EntityStore) -> usize {
        let mut released = 0;
        for index in 0..self.capacity() {
            if self.ids[index].is_some() && self.marks[index] != self.epoch {
                self.release_slot(Slot::new(index as u32), store);
                released += 1;
            }
        }
        released
    }
}

fn validate_id(id: &str) -> Result<(), StoreError> {
    if id.is_empty() {
        return Err(StoreError::EmptyId);
    }
    if id.len() > MAX_ID_LEN {
        return Err(StoreError::IdTooLong { len: id.len() });
    }
    Ok(())
}
