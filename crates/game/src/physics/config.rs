use serde::{Deserialize, Serialize};

/// Tuning constants shared verbatim by the authority and client replay.
/// Any difference between the two sides shows up as rubber-banding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicsConfig {
    pub map_radius: f32,
    /// Velocity multiplier per 1/`time_scale` seconds.
    pub friction: f32,
    /// Frames per second of `dt`; friction and acceleration are tuned per frame.
    pub time_scale: f32,
    /// Velocity units to world units.
    pub physics_scale: f32,
    pub max_speed: f32,
    pub speed_tolerance: f32,
    /// Share of the outward normal velocity removed on a wall hit. Above 1
    /// the entity bounces back.
    pub boundary_bounce: f32,
    pub acceleration: f32,
    pub boost_factor: f32,
    /// Distance to the target under which steering eases off.
    pub steer_slow_radius: f32,
    pub rest_epsilon: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            map_radius: 3000.0,
            friction: 0.9,
            time_scale: 60.0,
            physics_scale: 10.0,
            max_speed: 40.0,
            speed_tolerance: 1.15,
            boundary_bounce: 1.5,
            acceleration: 2.0,
            boost_factor: 1.6,
            steer_slow_radius: 100.0,
            rest_epsilon: 1e-4,
        }
    }
}

impl PhysicsConfig {
    pub fn speed_ceiling(&self) -> f32 {
        self.max_speed * self.speed_tolerance
    }
}
