use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

/// A retransmit deadline for one sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Deadline {
    pub at: Instant,
    pub seq: u16,
    pub generation: u64,
}

/// Min-heap of retransmit deadlines.
///
/// Entries are never removed when a message is acknowledged or re-armed;
/// the owner checks `generation` against its table and drops stale ones.
#[derive(Debug, Default)]
pub(crate) struct TimerHeap {
    heap: BinaryHeap<Reverse<Deadline>>,
    next_generation: u64,
}

impl TimerHeap {
    /// Arm a deadline and return its generation.
    pub fn schedule(&mut self, at: Instant, seq: u16) -> u64 {
        self.next_generation += 1;
        let generation = self.next_generation;
        self.heap.push(Reverse(Deadline {
            at,
            seq,
            generation,
        }));
        generation
    }

    pub fn peek(&self) -> Option<Deadline> {
        self.heap.peek().map(|Reverse(d)| *d)
    }

    pub fn pop(&mut self) -> Option<Deadline> {
        self.heap.pop().map(|Reverse(d)| d)
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn pops_earliest_first() {
        let now = Instant::now();
        let mut heap = TimerHeap::default();
        let g1 = heap.schedule(now + Duration::from_millis(30), 1);
        let g2 = heap.schedule(now + Duration::from_millis(10), 2);
        assert_ne!(g1, g2);
        assert_eq!(heap.peek().unwrap().seq, 2);
        assert_eq!(heap.pop().unwrap().generation, g2);
        assert_eq!(heap.pop().unwrap().seq, 1);
        assert!(heap.pop().is_none());
    }
}
