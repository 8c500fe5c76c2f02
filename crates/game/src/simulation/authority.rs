use std::collections::{BTreeMap, VecDeque};

use glam::Vec2;
use governor::clock::{Clock, DefaultClock};
use log::{debug, info, trace, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::net::{
    encode_delta, encode_full, sequence_greater_than, ClientId, FrameOptions, InputAck,
    InputCommand, InputLimiter, PacketType,
};
use crate::physics::{advance, integrate, steer, ActionFlags, MoveIntent, PhysicsConfig};
use crate::store::{BodyParams, EntityKind, Handle, Slot, StoreError, World, MAX_ENTITIES};

use super::FixedTimestep;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AuthorityConfig {
    pub tick_rate: u32,
    pub max_entities: usize,
    pub input_bucket_capacity: u32,
    pub input_refill_per_second: u32,
    pub join_bucket_capacity: u32,
    pub join_refill_per_second: u32,
    pub max_queued_inputs: usize,
    pub max_inputs_per_tick: usize,
    /// Ticks between world snapshots. Off ticks carry an `InputAck` instead.
    pub snapshot_interval: u32,
    /// Ticks between forced full frames for every session.
    pub full_frame_interval: u32,
    pub seed: u64,
    pub physics: PhysicsConfig,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            tick_rate: 30,
            max_entities: MAX_ENTITIES,
            input_bucket_capacity: 20,
            input_refill_per_second: 10,
            join_bucket_capacity: 5,
            join_refill_per_second: 1,
            max_queued_inputs: 64,
            max_inputs_per_tick: 4,
            snapshot_interval: 2,
            full_frame_interval: 300,
            seed: 0x5eed,
            physics: PhysicsConfig::default(),
        }
    }
}

#[derive(Debug)]
struct Session {
    identity: String,
    handle: Handle,
    queue: VecDeque<InputCommand>,
    last_processed: Option<u32>,
    processed_this_tick: bool,
    needs_full: bool,
}

/// Authoritative simulation: owns the world, applies client input through
/// the shared movement pipeline and produces per-client snapshots.
pub struct Authority<C: Clock = DefaultClock> {
    config: AuthorityConfig,
    world: World,
    timestep: FixedTimestep,
    sessions: BTreeMap<ClientId, Session>,
    input_limiter: InputLimiter<C>,
    join_limiter: InputLimiter<C>,
    wander: BTreeMap<Slot, Vec2>,
    rng: StdRng,
    frame: Vec<u8>,
}

impl Authority<DefaultClock> {
    pub fn new(config: AuthorityConfig) -> Self {
        Self::with_clock(config, DefaultClock::default())
    }
}

impl<C: Clock> Authority<C> {
    pub fn with_clock(config: AuthorityConfig, clock: C) -> Self {
        Self {
            world: World::with_capacity(config.max_entities),
            timestep: FixedTimestep::new(config.tick_rate),
            sessions: BTreeMap::new(),
            input_limiter: InputLimiter::with_clock(
                config.input_bucket_capacity,
                config.input_refill_per_second,
                clock.clone(),
            ),
            join_limiter: InputLimiter::with_clock(
                config.join_bucket_capacity,
                config.join_refill_per_second,
                clock,
            ),
            wander: BTreeMap::new(),
            rng: StdRng::seed_from_u64(config.seed),
            frame: Vec::new(),
            config,
        }
    }

    pub fn config(&self) -> &AuthorityConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn tick(&self) -> u32 {
        self.world.tick()
    }

    pub fn dt(&self) -> f32 {
        self.timestep.dt()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn slot_of_client(&self, client: ClientId) -> Option<Slot> {
        let session = self.sessions.get(&client)?;
        self.world.resolve(session.handle)
    }

    pub fn last_processed(&self, client: ClientId) -> Option<u32> {
        self.sessions.get(&client)?.last_processed
    }

    pub fn queued_inputs(&self, client: ClientId) -> usize {
        self.sessions.get(&client).map_or(0, |s| s.queue.len())
    }

    fn spawn_point(&mut self) -> Vec2 {
        let reach = self.config.physics.map_radius * 0.5;
        Vec2::new(
            self.rng.gen_range(-reach..reach),
            self.rng.gen_range(-reach..reach),
        )
    }

    /// Registers `client` under `identity` and spawns its player. Joining
    /// again with the same identity returns the existing entity.
    pub fn join(&mut self, client: ClientId, identity: &str) -> Result<Handle, StoreError> {
        if let Some(session) = self.sessions.get(&client) {
            if session.identity == identity {
                return Ok(session.handle);
            }
            self.leave(client);
        }

        if self.world.slot_of(identity).is_some() {
            return Err(StoreError::IdTaken(identity.to_owned()));
        }

        let position = self.spawn_point();
        let handle = self
            .world
            .spawn(identity, EntityKind::Player, BodyParams::default(), position)?;

        info!(
            "client {} joined as {} in slot {}",
            client,
            identity,
            handle.slot().raw()
        );
        self.sessions.insert(
            client,
            Session {
                identity: identity.to_owned(),
                handle,
                queue: VecDeque::with_capacity(self.config.max_queued_inputs),
                last_processed: None,
                processed_this_tick: false,
                needs_full: true,
            },
        );
        for session in self.sessions.values_mut() {
            session.needs_full = true;
        }
        Ok(handle)
    }

    pub fn leave(&mut self, client: ClientId) {
        let Some(session) = self.sessions.remove(&client) else {
            return;
        };
        self.world.despawn(&session.identity);
        self.input_limiter.remove(client);
        self.join_limiter.remove(client);
        info!("client {} ({}) left", client, session.identity);
    }

    pub fn spawn_bot(&mut self, id: &str) -> Result<Handle, StoreError> {
        let position = self.spawn_point();
        let handle = self
            .world
            .spawn(id, EntityKind::Bot, BodyParams::default(), position)?;
        let target = self.spawn_point();
        self.wander.insert(handle.slot(), target);
        Ok(handle)
    }

    /// Removes a bot and its wander target. Returns false when `id` is not
    /// a bot.
    pub fn despawn_bot(&mut self, id: &str) -> bool {
        let Some(slot) = self.world.slot_of(id) else {
            return false;
        };
        if self.world.store().kind(slot) != EntityKind::Bot {
            return false;
        }
        self.world.despawn(id);
        self.wander.remove(&slot);
        true
    }

    /// Queues one input. Returns false when the input was dropped: unknown
    /// client, non-finite values, stale sequence or rate limited. Drops are
    /// never reported back to the sender.
    pub fn receive_input(&mut self, client: ClientId, command: InputCommand) -> bool {
        let Some(session) = self.sessions.get_mut(&client) else {
            return false;
        };
        if !command.is_finite() {
            warn!("client {} sent non-finite input {}", client, command.sequence);
            return false;
        }
        if !self.input_limiter.check(client) {
            trace!("client {} input {} rate limited", client, command.sequence);
            return false;
        }

        let newest = session
            .queue
            .back()
            .map(|queued| queued.sequence)
            .or(session.last_processed);
        if let Some(newest) = newest {
            if !sequence_greater_than(command.sequence, newest) {
                trace!("client {} input {} is stale", client, command.sequence);
                return false;
            }
        }

        if session.queue.len() >= self.config.max_queued_inputs {
            session.queue.pop_front();
        }
        session.queue.push_back(command);
        true
    }

    /// Runs one tick: queued inputs for players, wandering for bots,
    /// plain integration for everything else.
    pub fn step(&mut self) {
        let physics = self.config.physics;
        let dt = self.timestep.dt();

        for session in self.sessions.values_mut() {
            session.processed_this_tick = false;
            let Some(slot) = self.world.resolve(session.handle) else {
                session.queue.clear();
                continue;
            };

            for _ in 0..self.config.max_inputs_per_tick {
                let Some(command) = session.queue.pop_front() else {
                    break;
                };
                advance(self.world.store_mut(), slot, &command.intent(), &physics);
                session.last_processed = Some(command.sequence);
                session.processed_this_tick = true;
            }
        }

        let slots: Vec<Slot> = self.world.store().active_slots().collect();
        for slot in slots {
            let kind = self.world.store().kind(slot);
            if kind == EntityKind::Player {
                continue;
            }
            if kind == EntityKind::Bot {
                let intent = MoveIntent {
                    target: self.wander_target(slot),
                    actions: ActionFlags::empty(),
                    dt,
                };
                steer(self.world.store_mut(), slot, &intent, &physics);
            }
            let store = self.world.store_mut();
            let friction = store.friction(slot);
            integrate(store, slot, dt, friction, &physics);
        }

        self.world.advance_tick();
    }

    fn wander_target(&mut self, slot: Slot) -> Vec2 {
        let position = self.world.store().position(slot);
        let current = self.wander.get(&slot).copied();
        match current {
            Some(target) if target.distance(position) > self.config.physics.steer_slow_radius => {
                target
            }
            _ => {
                let target = self.spawn_point();
                self.wander.insert(slot, target);
                target
            }
        }
    }

    /// Binary frame for `client`: full on join and every
    /// `full_frame_interval` ticks, delta otherwise.
    pub fn snapshot_for(&mut self, client: ClientId, now_ms: f64) -> Option<Vec<u8>> {
        let full_due = self.config.full_frame_interval > 0
            && self.world.tick() % self.config.full_frame_interval == 0;
        let session = self.sessions.get_mut(&client)?;

        let options = FrameOptions {
            timestamp_ms: Some(now_ms),
            ack: session.last_processed,
            velocity: true,
            radius: session.needs_full || full_due,
        };

        self.frame.clear();
        if session.needs_full || full_due {
            session.needs_full = false;
            encode_full(&self.world, &options, &mut self.frame);
        } else {
            encode_delta(
                &self.world,
                self.world.store().active_slots(),
                &options,
                &mut self.frame,
            );
        }
        Some(self.frame.clone())
    }

    fn input_ack(&self, client: ClientId) -> Option<InputAck> {
        let session = self.sessions.get(&client)?;
        let sequence = session.last_processed?;
        let slot = self.world.resolve(session.handle)?;
        let store = self.world.store();
        Some(InputAck {
            sequence,
            position: store.position(slot).to_array(),
            velocity: store.velocity(slot).to_array(),
        })
    }

    /// Messages due after the tick that just ran.
    pub fn outgoing(&mut self, now_ms: f64) -> Vec<(ClientId, PacketType)> {
        let snapshot_due = self.config.snapshot_interval <= 1
            || self.world.tick() % self.config.snapshot_interval == 0;
        let clients: Vec<ClientId> = self.sessions.keys().copied().collect();

        let mut messages = Vec::with_capacity(clients.len());
        for client in clients {
            let needs_full = self.sessions.get(&client).is_some_and(|s| s.needs_full);
            if snapshot_due || needs_full {
                if let Some(frame) = self.snapshot_for(client, now_ms) {
                    messages.push((client, PacketType::Snapshot(frame)));
                }
            } else if self.sessions.get(&client).is_some_and(|s| s.processed_this_tick) {
                if let Some(ack) = self.input_ack(client) {
                    messages.push((client, PacketType::InputAck(ack)));
                }
            }
        }
        messages
    }

    /// Advances by wall-clock `delta` seconds, running as many fixed ticks
    /// as are due, and returns everything to send.
    pub fn update(&mut self, delta: f32, now_ms: f64) -> Vec<(ClientId, PacketType)> {
        self.timestep.accumulate(delta);
        let mut messages = Vec::new();
        while self.timestep.consume_tick() {
            self.step();
            messages.extend(self.outgoing(now_ms));
        }
        messages
    }

    /// Handles one inbound packet. Returns the immediate reply, if any.
    pub fn handle(&mut self, client: ClientId, payload: PacketType) -> Option<PacketType> {
        match payload {
            PacketType::Join { identity } => {
                if !self.join_limiter.check(client) {
                    debug!("client {} join rate limited", client);
                    return Some(PacketType::RateLimited);
                }
                match self.join(client, &identity) {
                    Ok(handle) => Some(PacketType::Accepted {
                        entity_id: identity,
                        slot: handle.slot().raw(),
                    }),
                    Err(err) => {
                        warn!("client {} join as {} denied: {}", client, identity, err);
                        Some(PacketType::Denied {
                            reason: err.to_string(),
                        })
                    }
                }
            }
            PacketType::Input(command) => {
                self.receive_input(client, command);
                None
            }
            PacketType::Ping { timestamp } => Some(PacketType::Pong { timestamp }),
            PacketType::Disconnect => {
                self.leave(client);
                None
            }
            other => {
                warn!("client {} sent unexpected {:?}", client, other);
                None
            }
        }
    }
}
