use glam::Vec2;
use serde::{Deserialize, Serialize};

pub const MAX_ENTITIES: usize = 1024;

/// Dense index into the struct-of-arrays storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Slot(u32);

impl Slot {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[repr(u8)]
pub enum EntityKind {
    #[default]
    Player = 0,
    Bot = 1,
    Projectile = 2,
    Pickup = 3,
}

impl TryFrom<u8> for EntityKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Player),
            1 => Ok(Self::Bot),
            2 => Ok(Self::Projectile),
            3 => Ok(Self::Pickup),
            other => Err(other),
        }
    }
}

/// Physics parameters applied when a slot is activated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BodyParams {
    pub mass: f32,
    pub radius: f32,
    pub restitution: f32,
    pub friction: f32,
}

impl Default for BodyParams {
    fn default() -> Self {
        Self {
            mass: 1.0,
            radius: 20.0,
            restitution: 0.5,
            friction: 0.9,
        }
    }
}

#[derive(Debug, Clone)]
struct Transforms {
    x: Vec<f32>,
    y: Vec<f32>,
    prev_x: Vec<f32>,
    prev_y: Vec<f32>,
    rotation: Vec<f32>,
    scale: Vec<f32>,
}

#[derive(Debug, Clone)]
struct Bodies {
    vx: Vec<f32>,
    vy: Vec<f32>,
    mass: Vec<f32>,
    radius: Vec<f32>,
    restitution: Vec<f32>,
    friction: Vec<f32>,
}

#[derive(Debug, Clone)]
struct Stats {
    kind: Vec<EntityKind>,
    health: Vec<f32>,
    max_health: Vec<f32>,
}

/// Fixed-capacity struct-of-arrays component storage addressed by [`Slot`].
///
/// Storage never grows after construction. Addressing a slot at or past
/// `capacity()` panics in every build profile: the decoder and the
/// integrator both rely on the layout, so a bad index is a bug upstream,
/// never something to paper over by clamping.
#[derive(Debug, Clone)]
pub struct EntityStore {
    capacity: usize,
    active: Vec<bool>,
    active_count: usize,
    transform: Transforms,
    body: Bodies,
    stats: Stats,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    pub fn new() -> Self {
        Self::with_capacity(MAX_ENTITIES)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        assert!(
            capacity <= u16::MAX as usize,
            "store capacity {capacity} exceeds the wire slot range"
        );

        Self {
            capacity,
            active: vec![false; capacity],
            active_count: 0,
            transform: Transforms {
                x: vec![0.0; capacity],
                y: vec![0.0; capacity],
                prev_x: vec![0.0; capacity],
                prev_y: vec![0.0; capacity],
                rotation: vec![0.0; capacity],
                scale: vec![0.0; capacity],
            },
            body: Bodies {
                vx: vec![0.0; capacity],
                vy: vec![0.0; capacity],
                mass: vec![0.0; capacity],
                radius: vec![0.0; capacity],
                restitution: vec![0.0; capacity],
                friction: vec![0.0; capacity],
            },
            stats: Stats {
                kind: vec![EntityKind::default(); capacity],
                health: vec![0.0; capacity],
                max_health: vec![0.0; capacity],
            },
        }
    }

    #[inline]
    fn check(&self, slot: Slot) -> usize {
        let index = slot.index();
        assert!(
            index < self.capacity,
            "slot {index} out of range (capacity {})",
            self.capacity
        );
        index
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn active_count(&self) -> usize {
        self.active_count
    }

    /// Returns false for out-of-range slots instead of panicking, so wire
    /// input can be probed before it is trusted.
    pub fn is_active(&self, slot: Slot) -> bool {
        self.active.get(slot.index()).copied().unwrap_or(false)
    }

    pub fn active_slots(&self) -> impl Iterator<Item = Slot> + '_ {
        self.active
            .iter()
            .enumerate()
            .filter(|(_, active)| **active)
            .map(|(index, _)| Slot(index as u32))
    }

    /// Zeroes every component of `slot` and marks it live.
    pub fn activate(&mut self, slot: Slot, kind: EntityKind, params: BodyParams) {
        let i = self.check(slot);
        self.zero(i);
        if !self.active[i] {
            self.active[i] = true;
            self.active_count += 1;
        }

        self.transform.scale[i] = 1.0;
        self.body.mass[i] = params.mass;
        self.body.radius[i] = params.radius;
        self.body.restitution[i] = params.restitution;
        self.body.friction[i] = params.friction;
        self.stats.kind[i] = kind;
        self.stats.health[i] = 100.0;
        self.stats.max_health[i] = 100.0;
    }

    pub fn deactivate(&mut self, slot: Slot) {
        let i = self.check(slot);
        self.zero(i);
        if self.active[i] {
            self.active[i] = false;
            self.active_count -= 1;
        }
    }

    pub fn reset(&mut self) {
        for i in 0..self.capacity {
            self.zero(i);
        }
        self.active.fill(false);
        self.active_count = 0;
    }

    fn zero(&mut self, i: usize) {
        self.transform.x[i] = 0.0;
        self.transform.y[i] = 0.0;
        self.transform.prev_x[i] = 0.0;
        self.transform.prev_y[i] = 0.0;
        self.transform.rotation[i] = 0.0;
        self.transform.scale[i] = 0.0;
        self.body.vx[i] = 0.0;
        self.body.vy[i] = 0.0;
        self.body.mass[i] = 0.0;
        self.body.radius[i] = 0.0;
        self.body.restitution[i] = 0.0;
        self.body.friction[i] = 0.0;
        self.stats.kind[i] = EntityKind::default();
        self.stats.health[i] = 0.0;
        self.stats.max_health[i] = 0.0;
    }

    #[inline]
    pub fn position(&self, slot: Slot) -> Vec2 {
        let i = self.check(slot);
        Vec2::new(self.transform.x[i], self.transform.y[i])
    }

    #[inline]
    pub fn set_position(&mut self, slot: Slot, position: Vec2) {
        let i = self.check(slot);
        self.transform.x[i] = position.x;
        self.transform.y[i] = position.y;
    }

    #[inline]
    pub fn previous_position(&self, slot: Slot) -> Vec2 {
        let i = self.check(slot);
        Vec2::new(self.transform.prev_x[i], self.transform.prev_y[i])
    }

    #[inline]
    pub fn set_previous_position(&mut self, slot: Slot, position: Vec2) {
        let i = self.check(slot);
        self.transform.prev_x[i] = position.x;
        self.transform.prev_y[i] = position.y;
    }

    pub fn rotation(&self, slot: Slot) -> f32 {
        self.transform.rotation[self.check(slot)]
    }

    pub fn set_rotation(&mut self, slot: Slot, rotation: f32) {
        let i = self.check(slot);
        self.transform.rotation[i] = rotation;
    }

    pub fn scale(&self, slot: Slot) -> f32 {
        self.transform.scale[self.check(slot)]
    }

    pub fn set_scale(&mut self, slot: Slot, scale: f32) {
        let i = self.check(slot);
        self.transform.scale[i] = scale;
    }

    #[inline]
    pub fn velocity(&self, slot: Slot) -> Vec2 {
        let i = self.check(slot);
        Vec2::new(self.body.vx[i], self.body.vy[i])
    }

    #[inline]
    pub fn set_velocity(&mut self, slot: Slot, velocity: Vec2) {
        let i = self.check(slot);
        self.body.vx[i] = velocity.x;
        self.body.vy[i] = velocity.y;
    }

    pub fn mass(&self, slot: Slot) -> f32 {
        self.body.mass[self.check(slot)]
    }

    pub fn set_mass(&mut self, slot: Slot, mass: f32) {
        let i = self.check(slot);
        self.body.mass[i] = mass;
    }

    #[inline]
    pub fn radius(&self, slot: Slot) -> f32 {
        self.body.radius[self.check(slot)]
    }

    pub fn set_radius(&mut self, slot: Slot, radius: f32) {
        let i = self.check(slot);
        self.body.radius[i] = radius;
    }

    pub fn restitution(&self, slot: Slot) -> f32 {
        self.body.restitution[self.check(slot)]
    }

    pub fn set_restitution(&mut self, slot: Slot, restitution: f32) {
        let i = self.check(slot);
        self.body.restitution[i] = restitution;
    }

    pub fn friction(&self, slot: Slot) -> f32 {
        self.body.friction[self.check(slot)]
    }

    pub fn set_friction(&mut self, slot: Slot, friction: f32) {
        let i = self.check(slot);
        self.body.friction[i] = friction;
    }

    pub fn kind(&self, slot: Slot) -> EntityKind {
        self.stats.kind[self.check(slot)]
    }

    pub fn set_kind(&mut self, slot: Slot, kind: EntityKind) {
        let i = self.check(slot);
        self.stats.kind[i] = kind;
    }

    pub fn health(&self, slot: Slot) -> f32 {
        self.stats.health[self.check(slot)]
    }

    pub fn set_health(&mut self, slot: Slot, health: f32) {
        let i = self.check(slot);
        self.stats.health[i] = health.min(self.stats.max_health[i]);
    }

    pub fn max_health(&self, slot: Slot) -> f32 {
        self.stats.max_health[self.check(slot)]
    }

    pub fn set_max_health(&mut self, slot: Slot, max_health: f32) {
        let i = self.check(slot);
        self.stats.max_health[i] = max_health;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activate_zeroes_previous_occupant() {
        let mut store = EntityStore::with_capacity(8);
        let slot = Slot::new(3);

        store.activate(slot, EntityKind::Bot, BodyParams::default());
        store.set_position(slot, Vec2::new(10.0, -4.0));
        store.set_velocity(slot, Vec2::new(1.0, 2.0));
        store.deactivate(slot);
        store.activate(slot, EntityKind::Player, BodyParams::default());

        assert_eq!(store.position(slot), Vec2::ZERO);
        assert_eq!(store.velocity(slot), Vec2::ZERO);
        assert_eq!(store.kind(slot), EntityKind::Player);
        assert_eq!(store.active_count(), 1);
    }

    #[test]
    fn reset_clears_everything() {
        let mut store = EntityStore::with_capacity(4);
        for i in 0..4 {
            store.activate(Slot::new(i), EntityKind::Pickup, BodyParams::default());
            store.set_position(Slot::new(i), Vec2::splat(i as f32));
        }

        store.reset();

        assert_eq!(store.active_count(), 0);
        assert_eq!(store.active_slots().count(), 0);
        assert_eq!(store.position(Slot::new(2)), Vec2::ZERO);
        assert_eq!(store.radius(Slot::new(2)), 0.0);
    }

    #[test]
    fn components_do_not_alias() {
        let mut store = EntityStore::with_capacity(2);
        let a = Slot::new(0);
        let b = Slot::new(1);
        store.activate(a, EntityKind::Player, BodyParams::default());
        store.activate(b, EntityKind::Player, BodyParams::default());

        store.set_radius(a, 55.0);
        store.set_mass(a, 9.0);

        assert_eq!(store.radius(b), BodyParams::default().radius);
        assert_eq!(store.mass(b), BodyParams::default().mass);
        assert_eq!(store.velocity(a), Vec2::ZERO);
    }

    #[test]
    fn probing_out_of_range_is_inactive() {
        let store = EntityStore::with_capacity(4);
        assert!(!store.is_active(Slot::new(4)));
        assert!(!store.is_active(Slot::new(900)));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn indexing_past_capacity_panics() {
        let store = EntityStore::with_capacity(4);
        let _ = store.position(Slot::new(4));
    }
}
