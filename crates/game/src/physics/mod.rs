mod config;
mod integrator;
mod movement;

pub use config::PhysicsConfig;
pub use integrator::integrate;
pub use movement::{ActionFlags, MoveIntent, advance, steer};
