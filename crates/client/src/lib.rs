pub mod net;

pub use net::{
    ClientConfig, ConnectError, ConnectionStatus, ConnectionSupervisor, Connector, InputRing,
    Interpolator, NetworkClient, Reconciler, RetryConfig, SnapshotRing,
};
