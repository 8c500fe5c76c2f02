mod client;
mod config;
mod connection;
mod input;
mod interpolation;
mod prediction;
mod throttle;

pub use client::{ClientError, ClientStats, NetworkClient};
pub use config::{ClientConfig, RetryConfig};
pub use connection::{
    ConnectError, ConnectionState, ConnectionStatus, ConnectionSupervisor, Connector, Joined,
    TransportError,
};
pub use input::{InputRecord, InputRing};
pub use interpolation::{
    Bracket, Capture, EntitySample, InterpolationStats, Interpolator, NetworkSnapshot,
    RenderEntity, RenderFrame, SnapshotRing,
};
pub use prediction::{PredictionStats, Reconciler, Reconciliation};
pub use throttle::InputThrottle;
