use std::collections::HashSet;

use bitflags::bitflags;
use bytes::{Buf, BufMut};
use glam::Vec2;
use log::{trace, warn};

use crate::store::{BodyParams, EntityKind, Slot, StoreError, World};

pub const FRAME_VERSION: u16 = 1;
pub const FRAME_HEADER_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// Records keyed by string id plus slot; authoritative on the entity set.
    Full = 1,
    /// Records keyed by dense slot only.
    Delta = 2,
}

impl TryFrom<u8> for FrameKind {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Full),
            2 => Ok(Self::Delta),
            other => Err(DecodeError::UnknownKind(other)),
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FrameFlags: u8 {
        const TIMESTAMP = 1 << 0;
        const ACK = 1 << 1;
        const VELOCITY = 1 << 2;
        const RADIUS = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameOptions {
    pub timestamp_ms: Option<f64>,
    pub ack: Option<u32>,
    pub velocity: bool,
    pub radius: bool,
}

impl FrameOptions {
    fn flags(&self) -> FrameFlags {
        let mut flags = FrameFlags::empty();
        flags.set(FrameFlags::TIMESTAMP, self.timestamp_ms.is_some());
        flags.set(FrameFlags::ACK, self.ack.is_some());
        flags.set(FrameFlags::VELOCITY, self.velocity);
        flags.set(FrameFlags::RADIUS, self.radius);
        flags
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DecodeError {
    #[error("frame truncated: needed {needed} more bytes, {remaining} left")]
    Truncated { needed: usize, remaining: usize },
    #[error("unknown frame kind {0}")]
    UnknownKind(u8),
    #[error("unknown entity kind {0}")]
    UnknownEntityKind(u8),
    #[error("unsupported frame version {0}")]
    UnsupportedVersion(u16),
    #[error("unknown flag bits {0:#04x}")]
    UnknownFlags(u8),
    #[error("{extra} trailing bytes after last record")]
    TrailingBytes { extra: usize },
    #[error("slot {slot} exceeds store capacity {capacity}")]
    SlotOutOfRange { slot: u32, capacity: usize },
    #[error("entity id is empty")]
    EmptyId,
    #[error("entity id is not valid UTF-8")]
    InvalidId,
    #[error("non-finite value in frame")]
    NonFinite,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub flags: FrameFlags,
    pub tick: u32,
    pub timestamp_ms: Option<f64>,
    pub ack: Option<u32>,
    pub count: u16,
}

/// What a successful decode did to the world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedFrame {
    pub kind: FrameKind,
    pub tick: u32,
    pub timestamp_ms: Option<f64>,
    pub ack: Option<u32>,
    pub applied: usize,
    pub missed: usize,
    pub released: usize,
}

struct Record<'a> {
    slot: Slot,
    kind: EntityKind,
    id: Option<&'a str>,
    position: Vec2,
    velocity: Option<Vec2>,
    radius: Option<f32>,
}

/// Writes every registered entity, keyed by id and slot.
pub fn encode_full(world: &World, options: &FrameOptions, out: &mut Vec<u8>) -> usize {
    let count_at = put_header(FrameKind::Full, world.tick(), options, out);
    let store = world.store();
    let mut count: u16 = 0;

    for (id, slot) in world.registry().iter() {
        out.put_u16_le(slot.raw() as u16);
        out.put_u8(store.kind(slot) as u8);
        out.put_u8(id.len() as u8);
        out.put_slice(id.as_bytes());
        put_fields(world, slot, options, out);
        count += 1;
    }

    patch_count(out, count_at, count);
    count as usize
}

/// Writes the given slots keyed by slot only. Inactive slots are skipped.
pub fn encode_delta(
    world: &World,
    slots: impl IntoIterator<Item = Slot>,
    options: &FrameOptions,
    out: &mut Vec<u8>,
) -> usize {
    let count_at = put_header(FrameKind::Delta, world.tick(), options, out);
    let mut count: u16 = 0;

    for slot in slots {
        if !world.store().is_active(slot) || count == u16::MAX {
            continue;
        }
        out.put_u16_le(slot.raw() as u16);
        put_fields(world, slot, options, out);
        count += 1;
    }

    patch_count(out, count_at, count);
    count as usize
}

fn put_header(kind: FrameKind, tick: u32, options: &FrameOptions, out: &mut Vec<u8>) -> usize {
    out.put_u8(kind as u8);
    out.put_u8(options.flags().bits());
    out.put_u16_le(FRAME_VERSION);
    out.put_u32_le(tick);
    if let Some(timestamp) = options.timestamp_ms {
        out.put_f64_le(timestamp);
    }
    if let Some(ack) = options.ack {
        out.put_u32_le(ack);
    }
    let count_at = out.len();
    out.put_u16_le(0);
    count_at
}

fn put_fields(world: &World, slot: Slot, options: &FrameOptions, out: &mut Vec<u8>) {
    let store = world.store();
    let position = store.position(slot);
    out.put_f32_le(position.x);
    out.put_f32_le(position.y);
    if options.velocity {
        let velocity = store.velocity(slot);
        out.put_f32_le(velocity.x);
        out.put_f32_le(velocity.y);
    }
    if options.radius {
        out.put_f32_le(store.radius(slot));
    }
}

fn patch_count(out: &mut [u8], at: usize, count: u16) {
    out[at..at + 2].copy_from_slice(&count.to_le_bytes());
}

fn need(buf: &[u8], needed: usize) -> Result<(), DecodeError> {
    if buf.remaining() < needed {
        return Err(DecodeError::Truncated {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

fn finite(value: f32) -> Result<f32, DecodeError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(DecodeError::NonFinite)
    }
}

/// Parses the fixed header. `buf` is left at the first record.
pub fn read_header(buf: &mut &[u8]) -> Result<FrameHeader, DecodeError> {
    need(buf, FRAME_HEADER_LEN)?;
    let kind = FrameKind::try_from(buf.get_u8())?;
    let raw_flags = buf.get_u8();
    let flags = FrameFlags::from_bits(raw_flags)
        .ok_or(DecodeError::UnknownFlags(raw_flags & !FrameFlags::all().bits()))?;
    let version = buf.get_u16_le();
    if version != FRAME_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    let tick = buf.get_u32_le();

    let timestamp_ms = if flags.contains(FrameFlags::TIMESTAMP) {
        need(buf, 8)?;
        let timestamp = buf.get_f64_le();
        if !timestamp.is_finite() {
            return Err(DecodeError::NonFinite);
        }
        Some(timestamp)
    } else {
        None
    };

    let ack = if flags.contains(FrameFlags::ACK) {
        need(buf, 4)?;
        Some(buf.get_u32_le())
    } else {
        None
    };

    need(buf, 2)?;
    let count = buf.get_u16_le();

    Ok(FrameHeader {
        kind,
        flags,
        tick,
        timestamp_ms,
        ack,
        count,
    })
}

fn read_record<'a>(
    buf: &mut &'a [u8],
    header: &FrameHeader,
    capacity: usize,
) -> Result<Record<'a>, DecodeError> {
    need(buf, 2)?;
    let raw = buf.get_u16_le() as u32;
    if raw as usize >= capacity {
        return Err(DecodeError::SlotOutOfRange {
            slot: raw,
            capacity,
        });
    }
    let slot = Slot::new(raw);

    let (kind, id) = match header.kind {
        FrameKind::Full => {
            need(buf, 2)?;
            let kind = EntityKind::try_from(buf.get_u8()).map_err(DecodeError::UnknownEntityKind)?;
            let len = buf.get_u8() as usize;
            if len == 0 {
                return Err(DecodeError::EmptyId);
            }
            need(buf, len)?;
            let rest: &'a [u8] = *buf;
            let (bytes, tail) = rest.split_at(len);
            let id = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidId)?;
            *buf = tail;
            (kind, Some(id))
        }
        FrameKind::Delta => (EntityKind::default(), None),
    };

    let mut stride = 8;
    if header.flags.contains(FrameFlags::VELOCITY) {
        stride += 8;
    }
    if header.flags.contains(FrameFlags::RADIUS) {
        stride += 4;
    }
    need(buf, stride)?;

    let position = Vec2::new(finite(buf.get_f32_le())?, finite(buf.get_f32_le())?);
    let velocity = if header.flags.contains(FrameFlags::VELOCITY) {
        Some(Vec2::new(finite(buf.get_f32_le())?, finite(buf.get_f32_le())?))
    } else {
        None
    };
    let radius = if header.flags.contains(FrameFlags::RADIUS) {
        Some(finite(buf.get_f32_le())?)
    } else {
        None
    };

    Ok(Record {
        slot,
        kind,
        id,
        position,
        velocity,
        radius,
    })
}

/// Applies snapshot frames to a [`World`]. Server values overwrite whatever
/// the store holds, including the locally predicted entity; reconciling that
/// entity afterwards is the caller's job.
#[derive(Debug, Default)]
pub struct SnapshotDecoder {
    reported_misses: HashSet<u32>,
}

impl SnapshotDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets which missing slots were already logged. Call on reconnect.
    pub fn reset_session(&mut self) {
        self.reported_misses.clear();
    }

    /// Validates the whole frame before touching the world. On error the
    /// world is exactly as it was.
    pub fn decode(&mut self, frame: &[u8], world: &mut World) -> Result<DecodedFrame, DecodeError> {
        let capacity = world.capacity();

        let mut cursor = frame;
        let header = read_header(&mut cursor)?;
        let records = cursor;
        for _ in 0..header.count {
            read_record(&mut cursor, &header, capacity)?;
        }
        if !cursor.is_empty() {
            return Err(DecodeError::TrailingBytes {
                extra: cursor.len(),
            });
        }

        let mut decoded = DecodedFrame {
            kind: header.kind,
            tick: header.tick,
            timestamp_ms: header.timestamp_ms,
            ack: header.ack,
            applied: 0,
            missed: 0,
            released: 0,
        };

        let mut cursor = records;
        match header.kind {
            FrameKind::Full => {
                world.registry_mut().begin_mark();
                for _ in 0..header.count {
                    let record = read_record(&mut cursor, &header, capacity)?;
                    self.apply_full(&record, world)?;
                    decoded.applied += 1;
                }
                let (store, registry) = world.parts_mut();
                decoded.released = registry.sweep(store);
            }
            FrameKind::Delta => {
                for _ in 0..header.count {
                    let record = read_record(&mut cursor, &header, capacity)?;
                    if world.store().is_active(record.slot) {
                        write_fields(&record, world);
                        decoded.applied += 1;
                    } else {
                        decoded.missed += 1;
                        if self.reported_misses.insert(record.slot.raw()) {
                            warn!("delta frame names inactive slot {}, skipping", record.slot.raw());
                        }
                    }
                }
            }
        }

        world.set_tick(header.tick);
        trace!(
            "decoded {:?} frame tick {} applied {} missed {} released {}",
            decoded.kind, decoded.tick, decoded.applied, decoded.missed, decoded.released
        );
        Ok(decoded)
    }

    fn apply_full(&mut self, record: &Record<'_>, world: &mut World) -> Result<(), DecodeError> {
        let Some(id) = record.id else {
            return Err(DecodeError::EmptyId);
        };
        let fresh = world.slot_of(id) != Some(record.slot);

        let mut params = BodyParams::default();
        if let Some(radius) = record.radius {
            params.radius = radius;
        }
        world.bind(id, record.slot, record.kind, params)?;
        world.registry_mut().mark(record.slot);
        world.store_mut().set_kind(record.slot, record.kind);

        write_fields(record, world);
        if fresh {
            self.reported_misses.remove(&record.slot.raw());
            world
                .store_mut()
                .set_previous_position(record.slot, record.position);
        }
        Ok(())
    }
}

fn write_fields(record: &Record<'_>, world: &mut World) {
    let store = world.store_mut();
    store.set_position(record.slot, record.position);
    if let Some(velocity) = record.velocity {
        store.set_velocity(record.slot, velocity);
    }
    if let Some(radius) = record.radius {
        store.set_radius(record.slot, radius);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world_with(ids: &[&str]) -> World {
        let mut world = World::with_capacity(16);
        for (i, id) in ids.iter().enumerate() {
            world
                .spawn(
                    id,
                    EntityKind::Bot,
                    BodyParams::default(),
                    Vec2::new(i as f32 * 10.0, -(i as f32)),
                )
                .unwrap();
        }
        world
    }

    fn options() -> FrameOptions {
        FrameOptions {
            timestamp_ms: Some(1234.5),
            ack: Some(77),
            velocity: true,
            radius: true,
        }
    }

    #[test]
    fn full_frame_builds_mirror_world() {
        let mut server = world_with(&["alice", "bob", "carol"]);
        server.set_tick(42);
        let bob = server.slot_of("bob").unwrap();
        server.store_mut().set_velocity(bob, Vec2::new(3.0, -4.0));
        server.store_mut().set_radius(bob, 31.0);

        let mut frame = Vec::new();
        assert_eq!(encode_full(&server, &options(), &mut frame), 3);

        let mut client = World::with_capacity(16);
        let decoded = SnapshotDecoder::new().decode(&frame, &mut client).unwrap();

        assert_eq!(decoded.kind, FrameKind::Full);
        assert_eq!(decoded.tick, 42);
        assert_eq!(decoded.timestamp_ms, Some(1234.5));
        assert_eq!(decoded.ack, Some(77));
        assert_eq!(decoded.applied, 3);
        assert_eq!(client.tick(), 42);
        assert_eq!(client.slot_of("bob"), Some(bob));
        assert_eq!(client.store().velocity(bob), Vec2::new(3.0, -4.0));
        assert_eq!(client.store().radius(bob), 31.0);
        assert_eq!(client.store().kind(bob), EntityKind::Bot);
    }

    #[test]
    fn full_frame_releases_absent_ids() {
        let mut server = world_with(&["a", "b", "c"]);
        let mut client = World::with_capacity(16);
        let mut decoder = SnapshotDecoder::new();
        let mut frame = Vec::new();
        encode_full(&server, &FrameOptions::default(), &mut frame);
        decoder.decode(&frame, &mut client).unwrap();

        server.despawn("b");
        frame.clear();
        encode_full(&server, &FrameOptions::default(), &mut frame);
        let decoded = decoder.decode(&frame, &mut client).unwrap();

        assert_eq!(decoded.released, 1);
        assert_eq!(client.slot_of("b"), None);
        assert_eq!(client.entity_count(), 2);
    }

    #[test]
    fn delta_frame_updates_by_slot() {
        let mut server = world_with(&["a", "b"]);
        let mut client = World::with_capacity(16);
        let mut decoder = SnapshotDecoder::new();
        let mut frame = Vec::new();
        encode_full(&server, &FrameOptions::default(), &mut frame);
        decoder.decode(&frame, &mut client).unwrap();

        let b = server.slot_of("b").unwrap();
        server.store_mut().set_position(b, Vec2::new(99.0, 98.0));
        server.advance_tick();
        frame.clear();
        let opts = FrameOptions {
            velocity: true,
            ..FrameOptions::default()
        };
        encode_delta(&server, [b], &opts, &mut frame);
        let decoded = decoder.decode(&frame, &mut client).unwrap();

        assert_eq!(decoded.kind, FrameKind::Delta);
        assert_eq!(decoded.timestamp_ms, None);
        assert_eq!(decoded.ack, None);
        assert_eq!(client.store().position(b), Vec2::new(99.0, 98.0));
        assert_eq!(client.tick(), 1);
    }

    #[test]
    fn delta_miss_is_skipped() {
        let server = world_with(&["a", "b"]);
        let mut client = World::with_capacity(16);
        let mut frame = Vec::new();
        encode_delta(&server, server.store().active_slots(), &FrameOptions::default(), &mut frame);

        let mut decoder = SnapshotDecoder::new();
        let decoded = decoder.decode(&frame, &mut client).unwrap();
        assert_eq!(decoded.applied, 0);
        assert_eq!(decoded.missed, 2);

        let again = decoder.decode(&frame, &mut client).unwrap();
        assert_eq!(again.missed, 2);
        assert_eq!(decoder.reported_misses.len(), 2);
    }

    #[test]
    fn truncated_frame_leaves_world_untouched() {
        let mut server = world_with(&["a", "b"]);
        let mut client = World::with_capacity(16);
        let mut decoder = SnapshotDecoder::new();
        let mut frame = Vec::new();
        encode_full(&server, &options(), &mut frame);
        decoder.decode(&frame, &mut client).unwrap();

        server.store_mut().set_position(Slot::new(0), Vec2::new(500.0, 500.0));
        server.store_mut().set_position(Slot::new(1), Vec2::new(600.0, 600.0));
        frame.clear();
        encode_delta(&server, [Slot::new(0), Slot::new(1)], &options(), &mut frame);
        frame.truncate(frame.len() - 1);

        let before = client.store().position(Slot::new(0));
        let err = decoder.decode(&frame, &mut client).unwrap_err();

        assert!(matches!(err, DecodeError::Truncated { .. }));
        assert_eq!(client.store().position(Slot::new(0)), before);
        assert_eq!(client.tick(), 0);
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let server = world_with(&["a"]);
        let mut frame = Vec::new();
        encode_full(&server, &FrameOptions::default(), &mut frame);
        frame.push(0);

        let mut client = World::with_capacity(16);
        let err = SnapshotDecoder::new().decode(&frame, &mut client).unwrap_err();
        assert_eq!(err, DecodeError::TrailingBytes { extra: 1 });
        assert_eq!(client.entity_count(), 0);
    }

    #[test]
    fn rejects_bad_headers() {
        let mut client = World::with_capacity(4);
        let mut decoder = SnapshotDecoder::new();

        let mut frame = vec![9, 0, 1, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(decoder.decode(&frame, &mut client), Err(DecodeError::UnknownKind(9)));

        frame[0] = 2;
        frame[1] = 0x80;
        assert_eq!(decoder.decode(&frame, &mut client), Err(DecodeError::UnknownFlags(0x80)));

        frame[1] = 0;
        frame[2] = 7;
        assert_eq!(
            decoder.decode(&frame, &mut client),
            Err(DecodeError::UnsupportedVersion(7))
        );

        assert!(matches!(
            decoder.decode(&frame[..3], &mut client),
            Err(DecodeError::Truncated { .. })
        ));
    }

    #[test]
    fn rejects_slot_past_capacity() {
        let server = world_with(&["a", "b", "c", "d", "e"]);
        let mut frame = Vec::new();
        encode_full(&server, &FrameOptions::default(), &mut frame);

        let mut small = World::with_capacity(4);
        let err = SnapshotDecoder::new().decode(&frame, &mut small).unwrap_err();
        assert_eq!(err, DecodeError::SlotOutOfRange { slot: 4, capacity: 4 });
        assert_eq!(small.entity_count(), 0);
    }

    #[test]
    fn rejects_non_finite_fields() {
        let mut server = world_with(&["a", "b"]);
        server
            .store_mut()
            .set_position(Slot::new(1), Vec2::new(f32::NAN, 0.0));
        let mut frame = Vec::new();
        encode_full(&server, &FrameOptions::default(), &mut frame);

        let mut client = World::with_capacity(16);
        let err = SnapshotDecoder::new().decode(&frame, &mut client).unwrap_err();
        assert_eq!(err, DecodeError::NonFinite);
        assert_eq!(client.slot_of("a"), None);
    }

    #[test]
    fn rejects_invalid_utf8_id() {
        let server = world_with(&["ab"]);
        let mut frame = Vec::new();
        encode_full(&server, &FrameOptions::default(), &mut frame);
        let id_at = FRAME_HEADER_LEN + 2 + 2 + 1 + 1;
        frame[id_at] = 0xff;

        let mut client = World::with_capacity(16);
        let err = SnapshotDecoder::new().decode(&frame, &mut client).unwrap_err();
        assert_eq!(err, DecodeError::InvalidId);
    }

    #[test]
    fn full_frame_rebinds_moved_id() {
        let mut client = World::with_capacity(8);
        let mut decoder = SnapshotDecoder::new();

        let mut first = World::with_capacity(8);
        first
            .bind("a", Slot::new(3), EntityKind::Player, BodyParams::default())
            .unwrap();
        let mut frame = Vec::new();
        encode_full(&first, &FrameOptions::default(), &mut frame);
        decoder.decode(&frame, &mut client).unwrap();

        let mut second = World::with_capacity(8);
        second
            .bind("a", Slot::new(5), EntityKind::Player, BodyParams::default())
            .unwrap();
        frame.clear();
        encode_full(&second, &FrameOptions::default(), &mut frame);
        decoder.decode(&frame, &mut client).unwrap();

        assert_eq!(client.slot_of("a"), Some(Slot::new(5)));
        assert!(!client.store().is_active(Slot::new(3)));
        assert_eq!(client.entity_count(), 1);
    }
}
