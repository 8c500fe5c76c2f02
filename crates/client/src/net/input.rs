use arena::{ActionFlags, InputCommand, MoveIntent, sequence_greater_than};
use glam::Vec2;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InputRecord {
    pub sequence: u32,
    pub target: Vec2,
    pub actions: ActionFlags,
    pub dt: f32,
}

impl InputRecord {
    pub fn intent(&self) -> MoveIntent {
        MoveIntent {
            target: self.target,
            actions: self.actions,
            dt: self.dt,
        }
    }

    pub fn command(&self) -> InputCommand {
        InputCommand::new(self.sequence, &self.intent())
    }
}

/// Fixed-capacity ring of the local player's unacknowledged inputs, oldest
/// first. When full, a push overwrites the oldest record.
#[derive(Debug, Clone)]
pub struct InputRing {
    records: Vec<InputRecord>,
    head: usize,
    len: usize,
}

impl InputRing {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "input ring needs at least one slot");
        Self {
            records: vec![InputRecord::default(); capacity],
            head: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn start(&self) -> usize {
        (self.head + self.capacity() - self.len) % self.capacity()
    }

    /// Appends a record. Returns the record it overwrote, if the ring was full.
    pub fn push(&mut self, record: InputRecord) -> Option<InputRecord> {
        let evicted = (self.len == self.capacity()).then(|| self.records[self.head]);
        self.records[self.head] = record;
        self.head = (self.head + 1) % self.capacity();
        if evicted.is_none() {
            self.len += 1;
        }
        evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &InputRecord> + '_ {
        let start = self.start();
        let capacity = self.capacity();
        (0..self.len).map(move |i| &self.records[(start + i) % capacity])
    }

    pub fn for_each(&self, mut f: impl FnMut(&InputRecord)) {
        for record in self.iter() {
            f(record);
        }
    }

    pub fn oldest(&self) -> Option<&InputRecord> {
        (self.len > 0).then(|| &self.records[self.start()])
    }

    pub fn newest(&self) -> Option<&InputRecord> {
        let capacity = self.capacity();
        (self.len > 0).then(|| &self.records[(self.head + capacity - 1) % capacity])
    }

    /// Removes every record whose sequence is at or before `sequence`,
    /// comparing with wrap-around. Returns how many were removed.
    pub fn drop_through(&mut self, sequence: u32) -> usize {
        let mut dropped = 0;
        while let Some(oldest) = self.oldest() {
            if sequence_greater_than(oldest.sequence, sequence) {
                break;
            }
            self.len -= 1;
            dropped += 1;
        }
        dropped
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sequence: u32) -> InputRecord {
        InputRecord {
            sequence,
            target: Vec2::new(sequence as f32, 0.0),
            actions: ActionFlags::empty(),
            dt: 0.1,
        }
    }

    #[test]
    fn overflow_keeps_newest() {
        let mut ring = InputRing::new(256);
        for sequence in 1..=300 {
            ring.push(record(sequence));
        }

        let sequences: Vec<u32> = ring.iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, (45..=300).collect::<Vec<_>>());
        assert_eq!(ring.len(), 256);
    }

    #[test]
    fn push_reports_eviction() {
        let mut ring = InputRing::new(2);
        assert_eq!(ring.push(record(1)), None);
        assert_eq!(ring.push(record(2)), None);
        assert_eq!(ring.push(record(3)).map(|r| r.sequence), Some(1));
    }

    #[test]
    fn drop_through_removes_acknowledged() {
        let mut ring = InputRing::new(8);
        for sequence in 10..16 {
            ring.push(record(sequence));
        }

        assert_eq!(ring.drop_through(12), 3);
        assert_eq!(ring.oldest().map(|r| r.sequence), Some(13));
        assert_eq!(ring.drop_through(12), 0);
        assert_eq!(ring.drop_through(99), 3);
        assert!(ring.is_empty());
    }

    #[test]
    fn drop_through_handles_wrap() {
        let mut ring = InputRing::new(8);
        for sequence in [u32::MAX - 1, u32::MAX, 0, 1] {
            ring.push(record(sequence));
        }

        assert_eq!(ring.drop_through(u32::MAX), 2);
        let left: Vec<u32> = ring.iter().map(|r| r.sequence).collect();
        assert_eq!(left, vec![0, 1]);
    }

    #[test]
    fn for_each_is_chronological_after_wrap() {
        let mut ring = InputRing::new(3);
        for sequence in 1..=5 {
            ring.push(record(sequence));
        }
        ring.drop_through(3);
        ring.push(record(6));

        let mut seen = Vec::new();
        ring.for_each(|r| seen.push(r.sequence));
        assert_eq!(seen, vec![4, 5, 6]);
        assert_eq!(ring.newest().map(|r| r.sequence), Some(6));
    }
}
