mod codec;
mod limit;
mod link;
mod protocol;

pub use codec::{
    encode_delta, encode_full, read_header, DecodeError, DecodedFrame, FrameFlags, FrameHeader,
    FrameKind, FrameOptions, SnapshotDecoder, FRAME_HEADER_LEN, FRAME_VERSION,
};
pub use limit::{ClientId, InputLimiter, VirtualClock};
pub use link::{LinkConditions, LinkStats, SimulatedLink};
pub use protocol::{
    sequence_greater_than, ArchivedPacket, InputAck, InputCommand, Packet, PacketError,
    PacketHeader, PacketType, PROTOCOL_MAGIC, PROTOCOL_VERSION,
};
