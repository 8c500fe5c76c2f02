use arena::{EntityStore, InputAck, PhysicsConfig, Slot, advance, sequence_greater_than};
use glam::Vec2;
use log::{debug, trace, warn};

use super::input::{InputRecord, InputRing};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reconciliation {
    pub server_position: Vec2,
    pub server_velocity: Vec2,
    pub predicted_position: Vec2,
    pub predicted_velocity: Vec2,
    pub acknowledged: Option<u32>,
    pub dropped: usize,
    pub replayed: usize,
    /// Distance between the prediction before and after this pass.
    pub error: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PredictionStats {
    pub predicted: u64,
    pub reconciliations: u64,
    pub replayed: u64,
    pub corrections: u64,
    pub overwritten: u64,
    pub max_error: f32,
}

/// Client-side prediction for the local entity. Inputs are applied to the
/// store as soon as they are made; each authoritative update resets the
/// entity to server truth and replays whatever the server has not yet
/// acknowledged. The store is the only copy of the predicted state.
#[derive(Debug)]
pub struct Reconciler {
    physics: PhysicsConfig,
    inputs: InputRing,
    slot: Option<Slot>,
    last_ack: Option<u32>,
    last_predicted: Option<Vec2>,
    correction: Vec2,
    correction_speed: f32,
    snap_distance: f32,
    stats: PredictionStats,
}

impl Reconciler {
    pub fn new(physics: PhysicsConfig, input_capacity: usize) -> Self {
        Self {
            physics,
            inputs: InputRing::new(input_capacity),
            slot: None,
            last_ack: None,
            last_predicted: None,
            correction: Vec2::ZERO,
            correction_speed: 20.0,
            snap_distance: 50.0,
            stats: PredictionStats::default(),
        }
    }

    pub fn with_smoothing(mut self, correction_speed: f32, snap_distance: f32) -> Self {
        self.correction_speed = correction_speed;
        self.snap_distance = snap_distance;
        self
    }

    pub fn slot(&self) -> Option<Slot> {
        self.slot
    }

    pub fn set_local(&mut self, slot: Option<Slot>) {
        if self.slot != slot {
            self.last_predicted = None;
            self.correction = Vec2::ZERO;
        }
        self.slot = slot;
    }

    pub fn inputs(&self) -> &InputRing {
        &self.inputs
    }

    pub fn last_ack(&self) -> Option<u32> {
        self.last_ack
    }

    pub fn stats(&self) -> PredictionStats {
        self.stats
    }

    pub fn correction(&self) -> Vec2 {
        self.correction
    }

    fn local(&self, store: &EntityStore) -> Option<Slot> {
        self.slot.filter(|&slot| store.is_active(slot))
    }

    /// Buffers `record` and applies it to the local entity right away.
    pub fn predict(&mut self, store: &mut EntityStore, record: InputRecord) {
        if let Some(evicted) = self.inputs.push(record) {
            self.stats.overwritten += 1;
            warn!(
                "input {} overwritten before acknowledgment; ring too small for the round trip",
                evicted.sequence
            );
        }

        let Some(slot) = self.local(store) else {
            return;
        };
        advance(store, slot, &record.intent(), &self.physics);
        self.last_predicted = Some(store.position(slot));
        self.stats.predicted += 1;
    }

    /// Runs right after the decoder wrote server truth into the store.
    /// With no `ack`, every buffered input is replayed.
    pub fn reconcile(&mut self, store: &mut EntityStore, ack: Option<u32>) -> Option<Reconciliation> {
        let Some(slot) = self.local(store) else {
            trace!("local entity not spawned yet, skipping reconciliation");
            return None;
        };

        let server_position = store.position(slot);
        let server_velocity = store.velocity(slot);

        let mut dropped = 0;
        if let Some(ack) = ack {
            if let Some(last) = self.last_ack {
                if sequence_greater_than(last, ack) {
                    debug!("ack {} older than {}, replaying without dropping", ack, last);
                }
            }
            dropped = self.inputs.drop_through(ack);
            if self.last_ack.is_none_or(|last| sequence_greater_than(ack, last)) {
                self.last_ack = Some(ack);
            }
        }

        let mut replayed = 0;
        for record in self.inputs.iter() {
            advance(store, slot, &record.intent(), &self.physics);
            replayed += 1;
        }

        let predicted_position = store.position(slot);
        let error = self
            .last_predicted
            .map_or(0.0, |before| before.distance(predicted_position));
        if let Some(before) = self.last_predicted {
            let shift = predicted_position - before;
            if error > self.snap_distance {
                self.correction = Vec2::ZERO;
            } else {
                self.correction -= shift;
            }
        }
        if error > 1e-4 {
            self.stats.corrections += 1;
            debug!(
                "corrected local prediction by {:.3} (ack {:?}, replayed {})",
                error, ack, replayed
            );
        }
        self.last_predicted = Some(predicted_position);

        self.stats.reconciliations += 1;
        self.stats.replayed += replayed as u64;
        self.stats.max_error = self.stats.max_error.max(error);

        Some(Reconciliation {
            server_position,
            server_velocity,
            predicted_position,
            predicted_velocity: store.velocity(slot),
            acknowledged: ack,
            dropped,
            replayed,
            error,
        })
    }

    /// Applies a structured acknowledgment: writes its state into the local
    /// slot, then reconciles. Acks older than one already applied are ignored.
    pub fn apply_ack(&mut self, store: &mut EntityStore, ack: &InputAck) -> Option<Reconciliation> {
        if let Some(last) = self.last_ack {
            if sequence_greater_than(last, ack.sequence) {
                trace!("ignoring stale ack {}", ack.sequence);
                return None;
            }
        }
        let slot = self.local(store)?;
        store.set_position(slot, Vec2::from_array(ack.position));
        store.set_velocity(slot, Vec2::from_array(ack.velocity));
        self.reconcile(store, Some(ack.sequence))
    }

    /// Decays the visual correction offset.
    pub fn update(&mut self, dt: f32) {
        self.correction *= (-self.correction_speed * dt).exp();
        if self.correction.length_squared() < 1e-8 {
            self.correction = Vec2::ZERO;
        }
    }

    /// Where to draw the local entity: blended between its last two
    /// integration steps, plus the decaying correction offset.
    pub fn render_position(&self, store: &EntityStore, alpha: f32) -> Option<Vec2> {
        let slot = self.local(store)?;
        let blended = store
            .previous_position(slot)
            .lerp(store.position(slot), alpha.clamp(0.0, 1.0));
        Some(blended + self.correction)
    }

    pub fn reset(&mut self) {
        self.inputs.clear();
        self.slot = None;
        self.last_ack = None;
        self.last_predicted = None;
        self.correction = Vec2::ZERO;
    }
}
