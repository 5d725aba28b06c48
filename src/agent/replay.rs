use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One transition as observed by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayRecord {
    pub state: Vec<f64>,
    pub action: usize,
    pub reward: f64,
    pub next_state: Vec<f64>,
    pub done: bool,
}

/// Fixed-capacity FIFO of transitions; the oldest is evicted when full.
#[derive(Debug, Clone)]
pub struct ReplayBuffer {
    buffer: VecDeque<ReplayRecord>,
    capacity: usize,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, record: ReplayRecord) {
        if self.capacity == 0 {
            return;
        }
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(record);
    }

    /// `batch_size` distinct records, or `None` when the buffer holds fewer.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R, batch_size: usize) -> Option<Vec<&ReplayRecord>> {
        if self.buffer.len() < batch_size {
            return None;
        }
        let picked = index::sample(rng, self.buffer.len(), batch_size);
        Some(picked.iter().map(|i| &self.buffer[i]).collect())
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn oldest(&self) -> Option<&ReplayRecord> {
        self.buffer.front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn record(action: usize) -> ReplayRecord {
        ReplayRecord {
            state: vec![0.0],
            action,
            reward: action as f64,
            next_state: vec![0.0],
            done: false,
        }
    }

    #[test]
    fn evicts_oldest_when_full() {
        let mut buf = ReplayBuffer::new(3);
        for a in 0..5 {
            buf.push(record(a));
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.oldest().unwrap().action, 2);
    }

    #[test]
    fn sample_is_without_replacement() {
        let mut buf = ReplayBuffer::new(10);
        for a in 0..10 {
            buf.push(record(a));
        }
        let mut rng = StdRng::seed_from_u64(7);
        let batch = buf.sample(&mut rng, 10).unwrap();
        let mut actions: Vec<usize> = batch.iter().map(|r| r.action).collect();
        actions.sort_unstable();
        assert_eq!(actions, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn sample_refuses_short_buffer() {
        let mut buf = ReplayBuffer::new(10);
        buf.push(record(0));
        let mut rng = StdRng::seed_from_u64(1);
        assert!(buf.sample(&mut rng, 2).is_none());
    }
}
