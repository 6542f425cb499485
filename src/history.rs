use crate::sample::Sample;
use std::collections::VecDeque;
use std::sync::Arc;

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Fixed-capacity FIFO of samples, oldest first.
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    capacity: usize,
    samples: VecDeque<Arc<Sample>>,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
        }
    }

    /// Appends `sample`, evicting the single oldest entry when full.
    pub fn append(&mut self, sample: Arc<Sample>) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Owned copy, oldest to newest. Changing it never touches the buffer.
    pub fn snapshot(&self) -> Vec<Arc<Sample>> {
        self.samples.iter().cloned().collect()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
