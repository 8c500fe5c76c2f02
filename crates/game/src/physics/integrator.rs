use crate::store::{EntityStore, Slot};

use super::PhysicsConfig;

/// Advances one slot by `dt` seconds.
///
/// Order: rest check, friction decay, previous-position capture, Euler step,
/// circular boundary, speed ceiling. A resting slot skips everything but
/// the boundary. The authority and client replay both go through here, so
/// the order and constants are part of the protocol.
///
/// Inputs must be finite. NaN or infinite state is a caller bug and is not
/// checked for here.
pub fn integrate(store: &mut EntityStore, slot: Slot, dt: f32, friction: f32, config: &PhysicsConfig) {
    let position = store.position(slot);
    let velocity = store.velocity(slot);

    let limit = (config.map_radius - store.radius(slot)).max(0.0);

    if velocity.x.abs() < config.rest_epsilon && velocity.y.abs() < config.rest_epsilon {
        store.set_previous_position(slot, position);
        let distance_sq = position.length_squared();
        if distance_sq > limit * limit {
            store.set_position(slot, position / distance_sq.sqrt() * limit);
        }
        return;
    }

    let frames = dt * config.time_scale;
    let decay = if frames == 1.0 {
        friction
    } else {
        friction.powf(frames)
    };
    let mut velocity = velocity * decay;

    store.set_previous_position(slot, position);
    let mut position = position + velocity * (dt * config.physics_scale);

    let distance_sq = position.length_squared();
    if distance_sq > limit * limit {
        let normal = position / distance_sq.sqrt();
        position = normal * limit;

        let outward = velocity.dot(normal);
        if outward > 0.0 {
            velocity -= normal * (outward * config.boundary_bounce);
        }
    }

    let ceiling = config.speed_ceiling();
    let speed_sq = velocity.length_squared();
    if speed_sq > ceiling * ceiling {
        velocity *= ceiling / speed_sq.sqrt();
    }

    store.set_position(slot, position);
    store.set_velocity(slot, velocity);
}
