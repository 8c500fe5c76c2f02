pub mod net;
pub mod physics;
pub mod simulation;
pub mod store;

pub use net::{
    encode_delta, encode_full, sequence_greater_than, ClientId, DecodeError, DecodedFrame,
    FrameKind, FrameOptions, InputAck, InputCommand, InputLimiter, LinkConditions, Packet,
    PacketError, PacketHeader, PacketType, SimulatedLink, SnapshotDecoder, VirtualClock,
};
pub use physics::{advance, integrate, steer, ActionFlags, MoveIntent, PhysicsConfig};
pub use simulation::{Authority, AuthorityConfig, FixedTimestep};
pub use store::{
    BodyParams, EntityKind, EntityRegistry, EntityStore, Handle, Slot, StoreError, World,
    MAX_ENTITIES,
};
