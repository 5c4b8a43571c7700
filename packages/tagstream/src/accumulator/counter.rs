use super::AccumulationStrategy;
use crate::partition::EpochSlice;
use crate::types::Tag;

/// Counts every tag it receives
#[derive(Debug, Clone, Default)]
pub struct Counter {
    count: u64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

impl AccumulationStrategy for Counter {
    type Snapshot = u64;

    fn kind(&self) -> &'static str {
        "counter"
    }

    fn clear(&mut self) {
        self.count = 0;
    }

    fn ingest(&mut self, _slice: &EpochSlice, tags: &[Tag]) {
        self.count += tags.len() as u64;
    }

    fn snapshot(&self) -> u64 {
        self.count
    }

    fn index(&self) -> Vec<i64> {
        vec![0]
    }

    fn data(&self) -> Vec<u64> {
        vec![self.count]
    }
}
