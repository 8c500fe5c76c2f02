use std::collections::{HashMap, HashSet};

use arena::{Handle, Slot, World};
use glam::Vec2;
use log::{trace, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntitySample {
    pub position: Vec2,
    pub velocity: Option<Vec2>,
    pub radius: Option<f32>,
    seen: u64,
}

/// One captured world state. Allocated once per ring slot and rewritten in
/// place on every capture that lands in it.
#[derive(Debug, Clone, Default)]
pub struct NetworkSnapshot {
    time_ms: f64,
    tick: u32,
    epoch: u64,
    entities: HashMap<Handle, EntitySample>,
}

impl NetworkSnapshot {
    pub fn time_ms(&self) -> f64 {
        self.time_ms
    }

    pub fn tick(&self) -> u32 {
        self.tick
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, handle: Handle) -> Option<&EntitySample> {
        self.entities.get(&handle)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Handle, &EntitySample)> + '_ {
        self.entities.iter().map(|(&handle, sample)| (handle, sample))
    }
}

/// Fixed-capacity ring of recent snapshots. `head` is always the next slot
/// to write; when full the oldest snapshot is overwritten.
#[derive(Debug)]
pub struct SnapshotRing {
    snapshots: Vec<NetworkSnapshot>,
    head: usize,
    count: usize,
    epoch: u64,
}

impl SnapshotRing {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "snapshot ring needs at least one slot");
        Self {
            snapshots: vec![NetworkSnapshot::default(); capacity],
            head: 0,
            count: 0,
            epoch: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.snapshots.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn head(&self) -> usize {
        self.head
    }

    /// `age` 0 is the newest snapshot.
    pub fn get(&self, age: usize) -> Option<&NetworkSnapshot> {
        if age >= self.count {
            return None;
        }
        let capacity = self.capacity();
        Some(&self.snapshots[(self.head + capacity - 1 - age) % capacity])
    }

    pub fn newest(&self) -> Option<&NetworkSnapshot> {
        self.get(0)
    }

    /// Starts writing the next snapshot. Entries not recorded before the
    /// returned guard drops are pruned, and the snapshot becomes visible.
    pub fn acquire(&mut self, time_ms: f64, tick: u32) -> Capture<'_> {
        self.epoch += 1;
        let index = self.head;
        let snapshot = &mut self.snapshots[index];
        snapshot.time_ms = time_ms;
        snapshot.tick = tick;
        snapshot.epoch = self.epoch;
        Capture { ring: self, index }
    }

    /// Captures every registered entity of `world` from its dense store.
    pub fn capture(&mut self, world: &World, time_ms: f64) {
        let store = world.store();
        let mut capture = self.acquire(time_ms, world.tick());
        for handle in world.registry().handles() {
            let slot = handle.slot();
            capture.record(
                handle,
                store.position(slot),
                Some(store.velocity(slot)),
                Some(store.radius(slot)),
            );
        }
    }

    pub fn clear(&mut self) {
        for snapshot in &mut self.snapshots {
            snapshot.entities.clear();
        }
        self.head = 0;
        self.count = 0;
    }
}

pub struct Capture<'a> {
    ring: &'a mut SnapshotRing,
    index: usize,
}

impl Capture<'_> {
    pub fn record(&mut self, handle: Handle, position: Vec2, velocity: Option<Vec2>, radius: Option<f32>) {
        let snapshot = &mut self.ring.snapshots[self.index];
        let seen = snapshot.epoch;
        let sample = EntitySample {
            position,
            velocity,
            radius,
            seen,
        };
        snapshot.entities.insert(handle, sample);
    }
}

impl Drop for Capture<'_> {
    fn drop(&mut self) {
        let ring = &mut *self.ring;
        let snapshot = &mut ring.snapshots[self.index];
        let epoch = snapshot.epoch;
        snapshot.entities.retain(|_, sample| sample.seen == epoch);

        ring.head = (self.index + 1) % ring.snapshots.len();
        ring.count = (ring.count + 1).min(ring.snapshots.len());
    }
}

/// Which ring entries a render time falls between, by age.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bracket {
    Empty,
    /// Apply one snapshot as is.
    Snap { age: usize },
    Between { older: usize, newer: usize, t: f32 },
}

impl Bracket {
    /// Walks from the newest snapshot back to the first one at or before
    /// `render_time_ms`. With nothing newer than that one, or nothing old
    /// enough at all, the newest snapshot is applied directly.
    pub fn find(ring: &SnapshotRing, render_time_ms: f64) -> Self {
        if ring.is_empty() {
            return Self::Empty;
        }

        for age in 0..ring.len() {
            let Some(snapshot) = ring.get(age) else {
                break;
            };
            if snapshot.time_ms() > render_time_ms {
                continue;
            }
            if age == 0 {
                return Self::Snap { age: 0 };
            }

            let newer = age - 1;
            let (older_time, newer_time) = match ring.get(newer) {
                Some(next) => (snapshot.time_ms(), next.time_ms()),
                None => return Self::Snap { age },
            };
            let span = newer_time - older_time;
            let t = if span > 0.0 {
                ((render_time_ms - older_time) / span).clamp(0.0, 1.0) as f32
            } else {
                1.0
            };
            return Self::Between {
                older: age,
                newer,
                t,
            };
        }

        Self::Snap { age: 0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderEntity {
    pub slot: Slot,
    pub position: Vec2,
    pub velocity: Vec2,
    pub radius: f32,
}

/// Interpolated remote entities, one column per field.
#[derive(Debug, Clone, Default)]
pub struct RenderFrame {
    pub render_time_ms: f64,
    pub t: f32,
    pub bracket: Option<Bracket>,
    slots: Vec<Slot>,
    x: Vec<f32>,
    y: Vec<f32>,
    vx: Vec<f32>,
    vy: Vec<f32>,
    radius: Vec<f32>,
}

impl RenderFrame {
    fn clear(&mut self) {
        self.slots.clear();
        self.x.clear();
        self.y.clear();
        self.vx.clear();
        self.vy.clear();
        self.radius.clear();
    }

    fn push(&mut self, entity: RenderEntity) {
        self.slots.push(entity.slot);
        self.x.push(entity.position.x);
        self.y.push(entity.position.y);
        self.vx.push(entity.velocity.x);
        self.vy.push(entity.velocity.y);
        self.radius.push(entity.radius);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn entity(&self, i: usize) -> RenderEntity {
        RenderEntity {
            slot: self.slots[i],
            position: Vec2::new(self.x[i], self.y[i]),
            velocity: Vec2::new(self.vx[i], self.vy[i]),
            radius: self.radius[i],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = RenderEntity> + '_ {
        (0..self.len()).map(|i| self.entity(i))
    }

    pub fn get(&self, slot: Slot) -> Option<RenderEntity> {
        let i = self.slots.iter().position(|&s| s == slot)?;
        Some(self.entity(i))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterpolationStats {
    pub frames: u64,
    pub snaps: u64,
    pub misses: u64,
}

/// Produces the delayed, smoothed view of every remote entity. The local
/// entity is never touched here; prediction owns it.
#[derive(Debug)]
pub struct Interpolator {
    delay_ms: f64,
    local: Option<Handle>,
    reported_misses: HashSet<Handle>,
    frame: RenderFrame,
    stats: InterpolationStats,
}

impl Interpolator {
    pub fn new(delay_ms: f64) -> Self {
        Self {
            delay_ms,
            local: None,
            reported_misses: HashSet::new(),
            frame: RenderFrame::default(),
            stats: InterpolationStats::default(),
        }
    }

    pub fn delay_ms(&self) -> f64 {
        self.delay_ms
    }

    pub fn set_local(&mut self, local: Option<Handle>) {
        self.local = local;
    }

    pub fn stats(&self) -> InterpolationStats {
        self.stats
    }

    pub fn frame(&self) -> &RenderFrame {
        &self.frame
    }

    pub fn reset_session(&mut self) {
        self.reported_misses.clear();
        self.frame.clear();
    }

    pub fn interpolate_state(&mut self, ring: &SnapshotRing, world: &World, now_ms: f64) -> &RenderFrame {
        let render_time_ms = now_ms - self.delay_ms;
        let bracket = Bracket::find(ring, render_time_ms);

        self.frame.clear();
        self.frame.render_time_ms = render_time_ms;
        self.frame.bracket = Some(bracket);
        self.stats.frames += 1;

        let (older, newer, t) = match bracket {
            Bracket::Empty => {
                self.frame.t = 0.0;
                return &self.frame;
            }
            Bracket::Snap { age } => {
                self.stats.snaps += 1;
                (None, ring.get(age), 1.0)
            }
            Bracket::Between { older, newer, t } => (ring.get(older), ring.get(newer), t),
        };
        self.frame.t = t;
        let Some(newer) = newer else {
            return &self.frame;
        };
        trace!(
            "render time {:.1} between {:?} and {:.1}, t {:.3}",
            render_time_ms,
            older.map(NetworkSnapshot::time_ms),
            newer.time_ms(),
            t
        );

        for (handle, to) in newer.iter() {
            if Some(handle) == self.local {
                continue;
            }
            let Some(slot) = world.resolve(handle) else {
                self.stats.misses += 1;
                if self.reported_misses.insert(handle) {
                    warn!(
                        "snapshot entity in slot {} is no longer live, skipping",
                        handle.slot().raw()
                    );
                }
                continue;
            };

            let from = older.and_then(|snapshot| snapshot.get(handle));
            let position = match from {
                Some(from) => from.position + (to.position - from.position) * t,
                None => to.position,
            };
            let velocity = match (from.and_then(|f| f.velocity), to.velocity) {
                (Some(a), Some(b)) => a + (b - a) * t,
                (_, Some(b)) => b,
                _ => Vec2::ZERO,
            };
            let radius = to
                .radius
                .or(from.and_then(|f| f.radius))
                .unwrap_or_else(|| world.store().radius(slot));

            self.frame.push(RenderEntity {
                slot,
                position,
                velocity,
                radius,
            });
        }

        &self.frame
    }
}
