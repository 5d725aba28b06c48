/// Maps a continuous state vector onto a Q-table row.
pub trait StateDiscretizer: Send + Sync {
    fn buckets(&self) -> usize;
    fn bucket(&self, state: &[f64]) -> usize;
}

/// Bins only the first state component (cash over initial capital), clipped
/// to [-1, 1] and split into `buckets` equal-width bins.
#[derive(Debug, Clone, Copy)]
pub struct FirstComponentDiscretizer {
    buckets: usize,
}

impl FirstComponentDiscretizer {
    pub fn new(buckets: usize) -> Self {
        Self {
            buckets: buckets.max(1),
        }
    }
}

impl StateDiscretizer for FirstComponentDiscretizer {
    fn buckets(&self) -> usize {
        self.buckets
    }

    fn bucket(&self, state: &[f64]) -> usize {
        let x = state.first().copied().unwrap_or(0.0);
        let x = if x.is_nan() { 0.0 } else { x.clamp(-1.0, 1.0) };
        let idx = ((x + 1.0) * self.buckets as f64 / 2.0).floor() as usize;
        idx.min(self.buckets - 1)
    }
}
