use bitflags::bitflags;
use glam::Vec2;

use crate::store::{EntityStore, Slot};

use super::{PhysicsConfig, integrate};

const STEER_DEADZONE: f32 = 0.5;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ActionFlags: u16 {
        const BOOST = 1 << 0;
        const FIRE = 1 << 1;
        const ABILITY = 1 << 2;
    }
}

/// One tick of player intent: steer toward `target` for `dt` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MoveIntent {
    pub target: Vec2,
    pub actions: ActionFlags,
    pub dt: f32,
}

/// Accelerates the slot toward the intent's world-space target. Easing starts
/// inside `steer_slow_radius` so the entity settles instead of orbiting.
pub fn steer(store: &mut EntityStore, slot: Slot, intent: &MoveIntent, config: &PhysicsConfig) {
    let offset = intent.target - store.position(slot);
    let distance = offset.length();
    if distance <= STEER_DEADZONE {
        return;
    }

    let direction = offset / distance;
    let throttle = (distance / config.steer_slow_radius).min(1.0);
    let mut acceleration = config.acceleration * throttle;
    if intent.actions.contains(ActionFlags::BOOST) {
        acceleration *= config.boost_factor;
    }

    let velocity = store.velocity(slot) + direction * (acceleration * intent.dt * config.time_scale);
    store.set_velocity(slot, velocity);
}

/// Steering followed by integration: the single pipeline a player input goes
/// through, on the authority and in client replay alike.
pub fn advance(store: &mut EntityStore, slot: Slot, intent: &MoveIntent, config: &PhysicsConfig) {
    steer(store, slot, intent, config);
    integrate(store, slot, intent.dt, config.friction, config);
}
