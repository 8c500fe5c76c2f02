use arena::{
    Authority, AuthorityConfig, FrameKind, LinkConditions, Packet, PacketHeader, PacketType,
    SimulatedLink, SnapshotDecoder, World,
};

const CLIENT: u32 = 1;

fn send(link: &mut SimulatedLink<Vec<u8>>, now_ms: f64, sequence: u32, payload: PacketType) {
    let bytes = Packet::new(PacketHeader::new(sequence), payload)
        .serialize()
        .unwrap();
    link.send_reliable(now_ms, bytes);
}

#[test]
fn mirror_world_tracks_authority_over_latent_link() {
    let config = AuthorityConfig {
        max_entities: 64,
        snapshot_interval: 1,
        ..AuthorityConfig::default()
    };
    let mut authority = Authority::new(config);
    for i in 0..6 {
        authority.spawn_bot(&format!("bot-{i}")).unwrap();
    }

    let conditions = LinkConditions {
        latency_ms: 40,
        jitter_ms: 10,
        loss_percent: 0.0,
        ordered: true,
    };
    let mut up: SimulatedLink<Vec<u8>> = SimulatedLink::new(conditions, 11);
    let mut down: SimulatedLink<Vec<u8>> = SimulatedLink::new(conditions, 12);

    send(
        &mut up,
        0.0,
        0,
        PacketType::Join {
            identity: "watcher".into(),
        },
    );

    let mut mirror = World::with_capacity(64);
    let mut decoder = SnapshotDecoder::new();
    let mut full_frames = 0;
    let mut delta_frames = 0;
    let mut sequence = 1;
    let step_ms = 1000.0 / 60.0;

    for frame in 0..600 {
        let now = frame as f64 * step_ms;

        for bytes in up.drain(now) {
            let packet = Packet::deserialize(&bytes).unwrap();
            if let Some(reply) = authority.handle(CLIENT, packet.payload) {
                send(&mut down, now, sequence, reply);
                sequence += 1;
            }
        }

        for (client, payload) in authority.update((step_ms / 1000.0) as f32, now) {
            assert_eq!(client, CLIENT);
            let bytes = Packet::new(PacketHeader::new(sequence), payload)
                .serialize()
                .unwrap();
            down.send(now, bytes);
            sequence += 1;
        }

        for bytes in down.drain(now) {
            let packet = Packet::deserialize(&bytes).unwrap();
            if let PacketType::Snapshot(frame) = packet.payload {
                let decoded = decoder.decode(&frame, &mut mirror).unwrap();
                match decoded.kind {
                    FrameKind::Full => full_frames += 1,
                    FrameKind::Delta => delta_frames += 1,
                }
            }
        }
    }

    for bytes in down.drain(f64::MAX) {
        let packet = Packet::deserialize(&bytes).unwrap();
        if let PacketType::Snapshot(frame) = packet.payload {
            decoder.decode(&frame, &mut mirror).unwrap();
        }
    }

    assert!(full_frames >= 1);
    assert!(delta_frames > 100);
    assert_eq!(mirror.entity_count(), authority.world().entity_count());
    assert_eq!(mirror.tick(), authority.tick());

    let server = authority.world();
    for (id, slot) in server.registry().iter() {
        assert_eq!(mirror.slot_of(id), Some(slot));
        assert_eq!(mirror.store().position(slot), server.store().position(slot));
        assert_eq!(mirror.store().velocity(slot), server.store().velocity(slot));
    }
}

#[test]
fn malformed_frame_is_discarded_whole() {
    let mut authority = Authority::new(AuthorityConfig {
        max_entities: 16,
        ..AuthorityConfig::default()
    });
    authority.join(CLIENT, "p").unwrap();
    authority.spawn_bot("b").unwrap();
    authority.step();

    let mut mirror = World::with_capacity(16);
    let mut decoder = SnapshotDecoder::new();
    let full = authority.snapshot_for(CLIENT, 0.0).unwrap();
    decoder.decode(&full, &mut mirror).unwrap();
    let before: Vec<_> = mirror
        .store()
        .active_slots()
        .map(|slot| mirror.store().position(slot))
        .collect();

    authority.step();
    let mut delta = authority.snapshot_for(CLIENT, 33.0).unwrap();
    delta.push(0xAA);
    assert!(decoder.decode(&delta, &mut mirror).is_err());

    let after: Vec<_> = mirror
        .store()
        .active_slots()
        .map(|slot| mirror.store().position(slot))
        .collect();
    assert_eq!(before, after);
}
