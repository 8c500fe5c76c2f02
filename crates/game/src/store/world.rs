use glam::Vec2;

use super::entity_store::{BodyParams, EntityKind, EntityStore, MAX_ENTITIES, Slot};
use super::registry::{EntityRegistry, Handle};
use super::StoreError;

/// Component store plus the id map that owns its slots. Constructed once by
/// whoever runs the simulation and passed down by reference.
#[derive(Debug)]
pub struct World {
    tick: u32,
    store: EntityStore,
    registry: EntityRegistry,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    pub fn new() -> Self {
        Self::with_capacity(MAX_ENTITIES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tick: 0,
            store: EntityStore::with_capacity(capacity),
            registry: EntityRegistry::new(capacity),
        }
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn set_tick(&mut self, tick: u32) {
        self.tick = tick;
    }

    pub fn advance_tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut EntityStore {
        &mut self.store
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut EntityRegistry {
        &mut self.registry
    }

    pub fn parts_mut(&mut self) -> (&mut EntityStore, &mut EntityRegistry) {
        (&mut self.store, &mut self.registry)
    }

    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    pub fn entity_count(&self) -> usize {
        self.registry.len()
    }

    pub fn spawn(
        &mut self,
        id: &str,
        kind: EntityKind,
        params: BodyParams,
        position: Vec2,
    ) -> Result<Handle, StoreError> {
        let handle = self
            .registry
            .acquire(id, &mut self.store, kind, params)?;
        self.store.set_position(handle.slot(), position);
        self.store.set_previous_position(handle.slot(), position);
        Ok(handle)
    }

    pub fn bind(
        &mut self,
        id: &str,
        slot: Slot,
        kind: EntityKind,
        params: BodyParams,
    ) -> Result<Handle, StoreError> {
        self.registry.bind(id, slot, &mut self.store, kind, params)
    }

    pub fn despawn(&mut self, id: &str) -> Option<Slot> {
        self.registry.release(id, &mut self.store)
    }

    pub fn slot_of(&self, id: &str) -> Option<Slot> {
        self.registry.slot_of(id)
    }

    pub fn handle_of(&self, id: &str) -> Option<Handle> {
        self.registry.handle_of(id)
    }

    pub fn resolve(&self, handle: Handle) -> Option<Slot> {
        self.registry.resolve(handle)
    }

    pub fn reset(&mut self) {
        self.registry.clear(&mut self.store);
        self.store.reset();
        self.tick = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_places_entity() {
        let mut world = World::with_capacity(8);
        let handle = world
            .spawn(
                "bot-1",
                EntityKind::Bot,
                BodyParams::default(),
                Vec2::new(12.0, -3.0),
            )
            .unwrap();

        let slot = world.resolve(handle).unwrap();
        assert_eq!(world.store().position(slot), Vec2::new(12.0, -3.0));
        assert_eq!(world.store().previous_position(slot), Vec2::new(12.0, -3.0));
        assert_eq!(world.slot_of("bot-1"), Some(slot));
    }

    #[test]
    fn despawn_then_respawn_clears_components() {
        let mut world = World::with_capacity(1);
        let first = world
            .spawn("a", EntityKind::Player, BodyParams::default(), Vec2::ONE)
            .unwrap();
        world
            .store_mut()
            .set_velocity(first.slot(), Vec2::new(9.0, 9.0));
        world.despawn("a");

        let second = world
            .spawn("b", EntityKind::Player, BodyParams::default(), Vec2::ZERO)
            .unwrap();
        assert_eq!(world.store().velocity(second.slot()), Vec2::ZERO);
        assert!(world.resolve(first).is_none());
    }

    #[test]
    fn reset_empties_world() {
        let mut world = World::with_capacity(4);
        world
            .spawn("a", EntityKind::Player, BodyParams::default(), Vec2::ONE)
            .unwrap();
        world.advance_tick();
        world.reset();

        assert_eq!(world.entity_count(), 0);
        assert_eq!(world.store().active_count(), 0);
        assert_eq!(world.tick(), 0);
    }
}
