use arena::{
    ActionFlags, DecodeError, Handle, Packet, PacketError, PacketHeader, PacketType,
    SnapshotDecoder, World,
};
use glam::Vec2;
use log::{debug, info, trace, warn};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use super::config::ClientConfig;
use super::connection::Joined;
use super::input::InputRecord;
use super::interpolation::{Interpolator, RenderFrame, SnapshotRing};
use super::prediction::{PredictionStats, Reconciler};
use super::throttle::InputThrottle;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Packet(#[from] PacketError),
    #[error("outbound channel closed")]
    ChannelClosed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClientStats {
    pub messages: u64,
    pub snapshots: u64,
    pub acks: u64,
    pub discarded: u64,
    pub inputs_sent: u64,
    pub inputs_throttled: u64,
    pub last_rtt_ms: Option<f64>,
}

/// Client networking core. Owns the mirrored world and every piece of
/// sync state; the host application constructs one and drives it from its
/// event loop. Inbound packets queue on a channel and are drained once per
/// turn by [`NetworkClient::poll`].
pub struct NetworkClient {
    config: ClientConfig,
    world: World,
    decoder: SnapshotDecoder,
    reconciler: Reconciler,
    ring: SnapshotRing,
    interpolator: Interpolator,
    throttle: InputThrottle,
    inbound: UnboundedReceiver<Vec<u8>>,
    outbound: UnboundedSender<Vec<u8>>,
    local_id: Option<String>,
    local: Option<Handle>,
    input_sequence: u32,
    packet_sequence: u32,
    stats: ClientStats,
}

impl NetworkClient {
    pub fn new(
        config: ClientConfig,
        inbound: UnboundedReceiver<Vec<u8>>,
        outbound: UnboundedSender<Vec<u8>>,
    ) -> Self {
        Self {
            world: World::with_capacity(config.world_capacity),
            decoder: SnapshotDecoder::new(),
            reconciler: Reconciler::new(config.physics, config.input_capacity)
                .with_smoothing(config.correction_speed, config.snap_distance),
            ring: SnapshotRing::new(config.snapshot_capacity),
            interpolator: Interpolator::new(config.interpolation_delay_ms),
            throttle: InputThrottle::new(config.input_limit, config.input_window_ms),
            inbound,
            outbound,
            local_id: None,
            local: None,
            input_sequence: 0,
            packet_sequence: 0,
            stats: ClientStats::default(),
            config,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn snapshots(&self) -> &SnapshotRing {
        &self.ring
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn stats(&self) -> ClientStats {
        self.stats
    }

    pub fn prediction_stats(&self) -> PredictionStats {
        self.reconciler.stats()
    }

    pub fn local_id(&self) -> Option<&str> {
        self.local_id.as_deref()
    }

    /// Handle of the local entity, once a snapshot has spawned it.
    pub fn local_handle(&self) -> Option<Handle> {
        self.local
    }

    pub fn on_joined(&mut self, joined: &Joined) {
        if self.local_id.as_deref() != Some(joined.entity_id.as_str()) {
            info!("local entity is {}", joined.entity_id);
            self.local_id = Some(joined.entity_id.clone());
            self.refresh_local();
        }
    }

    fn refresh_local(&mut self) {
        let handle = self
            .local_id
            .as_deref()
            .and_then(|id| self.world.handle_of(id));
        if handle != self.local {
            self.local = handle;
            self.reconciler.set_local(handle.map(Handle::slot));
            self.interpolator.set_local(handle);
        }
    }

    /// Drains every queued inbound packet in arrival order.
    pub fn poll(&mut self, now_ms: f64) -> usize {
        let mut handled = 0;
        while let Ok(bytes) = self.inbound.try_recv() {
            self.receive(&bytes, now_ms);
            handled += 1;
        }
        handled
    }

    pub fn receive(&mut self, bytes: &[u8], now_ms: f64) {
        self.stats.messages += 1;
        let packet = match Packet::deserialize(bytes) {
            Ok(packet) => packet,
            Err(err) => {
                self.stats.discarded += 1;
                warn!("discarding malformed packet: {}", err);
                return;
            }
        };

        match packet.payload {
            PacketType::Snapshot(frame) => {
                if let Err(err) = self.apply_snapshot(&frame, now_ms) {
                    self.stats.discarded += 1;
                    warn!("discarding snapshot: {}", err);
                }
            }
            PacketType::InputAck(ack) => {
                self.stats.acks += 1;
                self.reconciler.apply_ack(self.world.store_mut(), &ack);
            }
            PacketType::Accepted { entity_id, slot } => {
                self.on_joined(&Joined { entity_id, slot });
            }
            PacketType::Denied { reason } => warn!("join denied: {}", reason),
            PacketType::RateLimited => debug!("join rate limited"),
            PacketType::Pong { timestamp } => {
                let rtt = now_ms - timestamp as f64;
                self.stats.last_rtt_ms = Some(rtt);
                debug!("rtt {:.1} ms", rtt);
            }
            PacketType::Disconnect => {
                info!("server closed the session");
                self.reset_session();
            }
            other => trace!("ignoring {:?}", other),
        }
    }

    /// Decode, then reconcile the local entity, then capture for
    /// interpolation. A frame that fails to decode changes nothing.
    fn apply_snapshot(&mut self, frame: &[u8], now_ms: f64) -> Result<(), DecodeError> {
        let decoded = self.decoder.decode(frame, &mut self.world)?;
        self.stats.snapshots += 1;
        trace!(
            "{:?} frame tick {} applied {} missed {} released {}",
            decoded.kind,
            decoded.tick,
            decoded.applied,
            decoded.missed,
            decoded.released
        );

        self.refresh_local();
        self.reconciler.reconcile(self.world.store_mut(), decoded.ack);
        self.ring.capture(&self.world, now_ms);
        Ok(())
    }

    /// Samples one input at the client tick rate: predicts it locally and
    /// sends it. Returns the sequence used, or `None` when not joined or
    /// when the send limiter refused it.
    pub fn tick_input(
        &mut self,
        now_ms: f64,
        target: Vec2,
        actions: ActionFlags,
    ) -> Result<Option<u32>, ClientError> {
        if self.local_id.is_none() {
            return Ok(None);
        }
        if !self.throttle.try_send(now_ms) {
            self.stats.inputs_throttled += 1;
            return Ok(None);
        }

        self.input_sequence = self.input_sequence.wrapping_add(1);
        let record = InputRecord {
            sequence: self.input_sequence,
            target,
            actions,
            dt: self.config.input_dt(),
        };
        self.reconciler.predict(self.world.store_mut(), record);
        self.send(PacketType::Input(record.command()))?;
        self.stats.inputs_sent += 1;
        Ok(Some(record.sequence))
    }

    pub fn ping(&mut self, now_ms: f64) -> Result<(), ClientError> {
        self.send(PacketType::Ping {
            timestamp: now_ms.max(0.0) as u64,
        })
    }

    pub fn send(&mut self, payload: PacketType) -> Result<(), ClientError> {
        self.packet_sequence = self.packet_sequence.wrapping_add(1);
        let bytes = Packet::new(PacketHeader::new(self.packet_sequence), payload).serialize()?;
        self.outbound
            .send(bytes)
            .map_err(|_| ClientError::ChannelClosed)
    }

    /// Per render frame: decays the local correction and interpolates
    /// every remote entity.
    pub fn render(&mut self, now_ms: f64, frame_dt: f32) -> &RenderFrame {
        self.reconciler.update(frame_dt);
        self.interpolator
            .interpolate_state(&self.ring, &self.world, now_ms)
    }

    pub fn local_position(&self, alpha: f32) -> Option<Vec2> {
        self.reconciler.render_position(self.world.store(), alpha)
    }

    pub fn reset_session(&mut self) {
        self.world.reset();
        self.decoder.reset_session();
        self.reconciler.reset();
        self.ring.clear();
        self.interpolator.reset_session();
        self.throttle.reset();
        self.local_id = None;
        self.local = None;
    }
}
