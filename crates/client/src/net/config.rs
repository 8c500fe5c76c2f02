use arena::{MAX_ENTITIES, PhysicsConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// How far behind the newest snapshot remote entities are drawn.
    pub interpolation_delay_ms: f64,
    pub snapshot_capacity: usize,
    /// At 10 inputs per second, 256 entries cover 25 s of unacknowledged
    /// input; any round trip longer than that loses the oldest inputs.
    pub input_capacity: usize,
    pub input_limit: u32,
    pub input_window_ms: f64,
    pub input_tick_rate: u32,
    pub world_capacity: usize,
    /// Exponential decay rate of the visual correction offset, per second.
    pub correction_speed: f32,
    /// Corrections larger than this snap instead of smoothing.
    pub snap_distance: f32,
    pub physics: PhysicsConfig,
    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            interpolation_delay_ms: 100.0,
            snapshot_capacity: 20,
            input_capacity: 256,
            input_limit: 60,
            input_window_ms: 1000.0,
            input_tick_rate: 10,
            world_capacity: MAX_ENTITIES,
            correction_speed: 20.0,
            snap_distance: 50.0,
            physics: PhysicsConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn input_dt(&self) -> f32 {
        1.0 / self.input_tick_rate.max(1) as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fraction of the delay added or removed at random.
    pub jitter: f64,
    /// Drop to offline mode instead of an error once attempts run out.
    pub offline_fallback: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 250,
            max_delay_ms: 8000,
            jitter: 0.3,
            offline_fallback: true,
        }
    }
}
