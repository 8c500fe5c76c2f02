use glam::Vec2;
use rkyv::{rancor, Archive, Deserialize, Serialize};

use crate::physics::{ActionFlags, MoveIntent};

pub const PROTOCOL_VERSION: u32 = 1;
pub const PROTOCOL_MAGIC: u32 = 0x4152_4e41;

const SEQUENCE_WRAP_THRESHOLD: u32 = u32::MAX / 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct PacketHeader {
    pub magic: u32,
    pub version: u32,
    pub sequence: u32,
}

impl PacketHeader {
    pub fn new(sequence: u32) -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
            sequence,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == PROTOCOL_MAGIC && self.version == PROTOCOL_VERSION
    }
}

#[inline]
pub fn sequence_greater_than(s1: u32, s2: u32) -> bool {
    ((s1 > s2) && (s1 - s2 <= SEQUENCE_WRAP_THRESHOLD))
        || ((s1 < s2) && (s2 - s1 > SEQUENCE_WRAP_THRESHOLD))
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum PacketType {
    Join {
        identity: String,
    },
    Accepted {
        entity_id: String,
        slot: u32,
    },
    Denied {
        reason: String,
    },
    RateLimited,
    Input(InputCommand),
    InputAck(InputAck),
    /// Binary frame produced by [`encode_full`](super::encode_full) or
    /// [`encode_delta`](super::encode_delta).
    Snapshot(Vec<u8>),
    Ping {
        timestamp: u64,
    },
    Pong {
        timestamp: u64,
    },
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct InputCommand {
    pub sequence: u32,
    pub target: [f32; 2],
    pub actions: u16,
    pub dt: f32,
}

impl InputCommand {
    pub fn new(sequence: u32, intent: &MoveIntent) -> Self {
        Self {
            sequence,
            target: intent.target.to_array(),
            actions: intent.actions.bits(),
            dt: intent.dt,
        }
    }

    pub fn intent(&self) -> MoveIntent {
        MoveIntent {
            target: Vec2::from_array(self.target),
            actions: ActionFlags::from_bits_truncate(self.actions),
            dt: self.dt,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.target.iter().all(|v| v.is_finite()) && self.dt.is_finite() && self.dt >= 0.0
    }
}

/// Authoritative state of the receiver's own entity after processing every
/// input up to and including `sequence`.
#[derive(Debug, Clone, Copy, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct InputAck {
    pub sequence: u32,
    pub position: [f32; 2],
    pub velocity: [f32; 2],
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: PacketType,
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
    #[error("bad magic or version")]
    InvalidHeader,
}

impl Packet {
    pub fn new(header: PacketHeader, payload: PacketType) -> Self {
        Self { header, payload }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, PacketError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(PacketError::Serialize)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, PacketError> {
        let packet =
            rkyv::from_bytes::<Self, rancor::Error>(data).map_err(PacketError::Deserialize)?;
        if !packet.header.is_valid() {
            return Err(PacketError::InvalidHeader);
        }
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_comparison() {
        assert!(sequence_greater_than(2, 1));
        assert!(!sequence_greater_than(1, 2));
        assert!(sequence_greater_than(0, u32::MAX));
        assert!(!sequence_greater_than(u32::MAX, 0));
    }

    #[test]
    fn test_input_command_intent() {
        let intent = MoveIntent {
            target: Vec2::new(120.5, -3.25),
            actions: ActionFlags::BOOST | ActionFlags::FIRE,
            dt: 1.0 / 60.0,
        };
        let command = InputCommand::new(9, &intent);

        assert_eq!(command.intent(), intent);
        assert!(command.is_finite());
        assert!(!InputCommand { dt: f32::NAN, ..command }.is_finite());
    }

    #[test]
    fn test_packet_serialization() {
        let packet = Packet::new(
            PacketHeader::new(1),
            PacketType::InputAck(InputAck {
                sequence: 12,
                position: [1.0, 2.0],
                velocity: [-0.5, 0.0],
            }),
        );

        let serialized = packet.serialize().unwrap();
        let deserialized = Packet::deserialize(&serialized).unwrap();

        assert_eq!(packet, deserialized);
    }

    #[test]
    fn test_rejects_foreign_magic() {
        let mut packet = Packet::new(PacketHeader::new(1), PacketType::Disconnect);
        packet.header.magic = 0xdead_beef;

        let serialized = packet.serialize().unwrap();
        assert!(matches!(
            Packet::deserialize(&serialized),
            Err(PacketError::InvalidHeader)
        ));
    }
}
