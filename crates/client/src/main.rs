use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use arena::{
    ActionFlags, Authority, AuthorityConfig, ClientId, LinkConditions, Packet, PacketHeader,
    PacketType, SimulatedLink, VirtualClock,
};
use arena_client::net::{Joined, TransportError};
use arena_client::{ClientConfig, ConnectionSupervisor, Connector, NetworkClient};
use clap::Parser;
use glam::Vec2;
use log::{debug, info, warn};
use tokio::sync::mpsc;

const CLIENT: ClientId = 1;
const FRAME_MS: f64 = 1000.0 / 60.0;

#[derive(Parser)]
#[command(name = "arena-client")]
#[command(about = "Runs an authority and a predicting client over a simulated link")]
struct Args {
    #[arg(long, default_value_t = 300, help = "Server ticks to simulate")]
    ticks: u32,

    #[arg(long, default_value_t = 60)]
    latency_ms: u32,

    #[arg(long, default_value_t = 10)]
    jitter_ms: u32,

    #[arg(long, default_value_t = 0.0)]
    loss_percent: f32,

    #[arg(long, default_value_t = 7)]
    seed: u64,

    #[arg(long, default_value_t = 8, help = "Wandering bots to spawn")]
    bots: usize,

    #[arg(long, default_value = "player")]
    identity: String,
}

/// Joins through the in-process authority after one simulated round trip.
struct Loopback {
    authority: Rc<RefCell<Authority<VirtualClock>>>,
    round_trip: Duration,
}

impl Connector for Loopback {
    async fn connect(&self, identity: &str) -> Result<Joined, TransportError> {
        tokio::time::sleep(self.round_trip).await;
        let reply = self.authority.borrow_mut().handle(
            CLIENT,
            PacketType::Join {
                identity: identity.to_owned(),
            },
        );
        match reply {
            Some(PacketType::Accepted { entity_id, slot }) => Ok(Joined { entity_id, slot }),
            Some(PacketType::Denied { reason }) => Err(TransportError::Rejected(reason)),
            Some(PacketType::RateLimited) => Err(TransportError::RateLimited),
            other => Err(TransportError::Unavailable(format!("unexpected reply {other:?}"))),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let clock = VirtualClock::default();
    let authority = Rc::new(RefCell::new(Authority::with_clock(
        AuthorityConfig {
            seed: args.seed,
            ..AuthorityConfig::default()
        },
        clock.clone(),
    )));
    for i in 0..args.bots {
        authority.borrow_mut().spawn_bot(&format!("bot-{i}"))?;
    }

    let config = ClientConfig::default();
    let supervisor = ConnectionSupervisor::with_seed(
        Loopback {
            authority: Rc::clone(&authority),
            round_trip: Duration::from_millis(u64::from(args.latency_ms) * 2),
        },
        config.retry,
        args.seed,
    );
    let status = supervisor.subscribe();
    let joined = supervisor.connect_with_retry(&args.identity).await?;
    info!("status {:?}", *status.borrow());

    let conditions = LinkConditions {
        latency_ms: args.latency_ms,
        jitter_ms: args.jitter_ms,
        loss_percent: args.loss_percent,
        ordered: true,
    };
    let mut up: SimulatedLink<Vec<u8>> = SimulatedLink::new(conditions, args.seed);
    let mut down: SimulatedLink<Vec<u8>> = SimulatedLink::new(conditions, args.seed.wrapping_add(1));

    let (to_client, inbound) = mpsc::unbounded_channel();
    let (outbound, mut from_client) = mpsc::unbounded_channel();
    let mut client = NetworkClient::new(config, inbound, outbound);
    client.on_joined(&joined);

    let input_interval_ms = 1000.0 / f64::from(config.input_tick_rate.max(1));
    let mut next_input_ms = 0.0;
    let mut server_sequence = 0u32;
    let mut frame = 0u64;
    let settle_ticks = args.ticks.saturating_add(30);

    while authority.borrow().tick() < settle_ticks {
        let now = frame as f64 * FRAME_MS;
        frame += 1;
        clock.advance(Duration::from_secs_f64(FRAME_MS / 1000.0));

        for bytes in up.drain(now) {
            match Packet::deserialize(&bytes) {
                Ok(packet) => {
                    if let Some(reply) = authority.borrow_mut().handle(CLIENT, packet.payload) {
                        server_sequence = server_sequence.wrapping_add(1);
                        let bytes =
                            Packet::new(PacketHeader::new(server_sequence), reply).serialize()?;
                        down.send(now, bytes);
                    }
                }
                Err(err) => warn!("authority dropped packet: {}", err),
            }
        }

        let outgoing = authority.borrow_mut().update((FRAME_MS / 1000.0) as f32, now);
        for (_, payload) in outgoing {
            server_sequence = server_sequence.wrapping_add(1);
            let bytes = Packet::new(PacketHeader::new(server_sequence), payload).serialize()?;
            down.send(now, bytes);
        }

        for bytes in down.drain(now) {
            // receiver lives as long as the client
            let _ = to_client.send(bytes);
        }
        client.poll(now);

        let steering = authority.borrow().tick() < args.ticks;
        if steering && now >= next_input_ms {
            next_input_ms += input_interval_ms;
            let angle = (now / 1000.0) as f32 * 0.8;
            let target = Vec2::from_angle(angle) * 900.0;
            let actions = if (frame / 120) % 2 == 0 {
                ActionFlags::empty()
            } else {
                ActionFlags::BOOST
            };
            client.tick_input(now, target, actions)?;
        }
        while let Ok(bytes) = from_client.try_recv() {
            up.send(now, bytes);
        }

        let rendered = client.render(now, (FRAME_MS / 1000.0) as f32).len();
        if frame % 60 == 0 {
            debug!(
                "t {:.0} ms: {} remote entities, local {:?}",
                now,
                rendered,
                client.local_position(1.0)
            );
        }
    }

    let authority = authority.borrow();
    let server_position = authority
        .slot_of_client(CLIENT)
        .map(|slot| authority.world().store().position(slot));
    let local_position = client.local_position(1.0);
    let drift = match (server_position, local_position) {
        (Some(server), Some(local)) => server.distance(local),
        _ => f32::NAN,
    };

    let stats = client.stats();
    let prediction = client.prediction_stats();
    info!(
        "ticks {} snapshots {} acks {} discarded {} inputs sent {} throttled {}",
        authority.tick(),
        stats.snapshots,
        stats.acks,
        stats.discarded,
        stats.inputs_sent,
        stats.inputs_throttled
    );
    info!(
        "reconciliations {} replayed {} corrections {} max error {:.3}",
        prediction.reconciliations,
        prediction.replayed,
        prediction.corrections,
        prediction.max_error
    );
    info!("link up {:?} down {:?}", up.stats(), down.stats());
    println!(
        "local {:?} server {:?} drift {:.4}",
        local_position, server_position, drift
    );

    Ok(())
}
