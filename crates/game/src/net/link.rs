use std::cmp::Ordering;
use std::collections::BinaryHeap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkConditions {
    pub latency_ms: u32,
    pub jitter_ms: u32,
    pub loss_percent: f32,
    /// Hold back packets that would overtake an earlier one.
    pub ordered: bool,
}

impl Default for LinkConditions {
    fn default() -> Self {
        Self {
            latency_ms: 0,
            jitter_ms: 0,
            loss_percent: 0.0,
            ordered: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub sent: u64,
    pub dropped: u64,
    pub delivered: u64,
}

#[derive(Debug)]
struct DelayedPacket<T> {
    release_ms: f64,
    order: u64,
    payload: T,
}

impl<T> PartialEq for DelayedPacket<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for DelayedPacket<T> {}

impl<T> PartialOrd for DelayedPacket<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for DelayedPacket<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // min-heap on release time, then send order
        other
            .release_ms
            .total_cmp(&self.release_ms)
            .then_with(|| other.order.cmp(&self.order))
    }
}

/// One direction of an in-process link running on caller-supplied virtual
/// time in milliseconds. Seeded, so a run is reproducible.
#[derive(Debug)]
pub struct SimulatedLink<T> {
    conditions: LinkConditions,
    rng: StdRng,
    queue: BinaryHeap<DelayedPacket<T>>,
    next_order: u64,
    last_release_ms: f64,
    stats: LinkStats,
}

impl<T> SimulatedLink<T> {
    pub fn new(conditions: LinkConditions, seed: u64) -> Self {
        Self {
            conditions,
            rng: StdRng::seed_from_u64(seed),
            queue: BinaryHeap::new(),
            next_order: 0,
            last_release_ms: f64::NEG_INFINITY,
            stats: LinkStats::default(),
        }
    }

    pub fn conditions(&self) -> &LinkConditions {
        &self.conditions
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    pub fn in_flight(&self) -> usize {
        self.queue.len()
    }

    /// Best-effort send; may be lost.
    pub fn send(&mut self, now_ms: f64, payload: T) {
        self.stats.sent += 1;
        let loss = self.conditions.loss_percent;
        if loss > 0.0 && self.rng.gen_range(0.0f32..100.0) < loss {
            self.stats.dropped += 1;
            return;
        }
        self.enqueue(now_ms, payload);
    }

    /// Never lost, still delayed.
    pub fn send_reliable(&mut self, now_ms: f64, payload: T) {
        self.stats.sent += 1;
        self.enqueue(now_ms, payload);
    }

    fn enqueue(&mut self, now_ms: f64, payload: T) {
        let jitter = if self.conditions.jitter_ms > 0 {
            self.rng.gen_range(0..=self.conditions.jitter_ms)
        } else {
            0
        };
        let mut release_ms = now_ms + f64::from(self.conditions.latency_ms + jitter);
        if self.conditions.ordered {
            release_ms = release_ms.max(self.last_release_ms);
            self.last_release_ms = release_ms;
        }

        self.queue.push(DelayedPacket {
            release_ms,
            order: self.next_order,
            payload,
        });
        self.next_order += 1;
    }

    /// Next packet due at or before `now_ms`.
    pub fn poll(&mut self, now_ms: f64) -> Option<T> {
        if self.queue.peek()?.release_ms > now_ms {
            return None;
        }
        let delayed = self.queue.pop()?;
        self.stats.delivered += 1;
        Some(delayed.payload)
    }

    pub fn drain(&mut self, now_ms: f64) -> Vec<T> {
        let mut packets = Vec::new();
        while let Some(payload) = self.poll(now_ms) {
            packets.push(payload);
        }
        packets
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_after_latency() {
        let mut link = SimulatedLink::new(
            LinkConditions {
                latency_ms: 50,
                ..LinkConditions::default()
            },
            1,
        );
        link.send(0.0, "a");

        assert_eq!(link.poll(49.0), None);
        assert_eq!(link.poll(50.0), Some("a"));
        assert_eq!(link.in_flight(), 0);
    }

    #[test]
    fn ordered_link_never_reorders() {
        let mut link = SimulatedLink::new(
            LinkConditions {
                latency_ms: 20,
                jitter_ms: 80,
                ..LinkConditions::default()
            },
            7,
        );
        for i in 0..200u32 {
            link.send(f64::from(i), i);
        }

        let delivered = link.drain(10_000.0);
        assert_eq!(delivered, (0..200).collect::<Vec<_>>());
    }

    #[test]
    fn loss_is_seeded() {
        let conditions = LinkConditions {
            loss_percent: 30.0,
            ..LinkConditions::default()
        };
        let run = || {
            let mut link = SimulatedLink::new(conditions, 99);
            for i in 0..500u32 {
                link.send(0.0, i);
            }
            link.drain(0.0)
        };

        let first = run();
        assert_eq!(first, run());
        assert!(first.len() > 250 && first.len() < 450);
    }

    #[test]
    fn reliable_send_ignores_loss() {
        let mut link = SimulatedLink::new(
            LinkConditions {
                loss_percent: 100.0,
                ..LinkConditions::default()
            },
            3,
        );
        link.send(0.0, 1);
        link.send_reliable(0.0, 2);

        assert_eq!(link.drain(0.0), vec![2]);
        assert_eq!(link.stats().dropped, 1);
    }
}
