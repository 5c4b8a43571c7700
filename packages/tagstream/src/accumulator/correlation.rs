// Correlation - histogram of arrival-time differences between two channels
//
// Every pair (t1 on channel_1, t2 on channel_2) with |t2 - t1| inside the
// histogram window contributes one count at `t2 - t1`. Recent tags of both
// channels are kept in deques so pairs can span batch boundaries.

use super::{AccumulationStrategy, MAX_HISTOGRAM_ENTRIES};
use crate::error::{Result, TagStreamError};
use crate::partition::EpochSlice;
use crate::types::{Channel, Tag, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CorrelationConfig {
    pub channel_1: Channel,
    pub channel_2: Channel,
    pub binwidth: Timestamp,
    pub n_bins: usize,
}

impl CorrelationConfig {
    pub fn validate(&self) -> Result<()> {
        for ch in [self.channel_1, self.channel_2] {
            if ch == 0 {
                return Err(TagStreamError::InvalidChannel(ch));
            }
        }
        if self.binwidth <= 0 {
            return Err(TagStreamError::InvalidParameter(format!(
                "binwidth must be positive, got {}",
                self.binwidth
            )));
        }
        if self.n_bins == 0 || self.n_bins > MAX_HISTOGRAM_ENTRIES {
            return Err(TagStreamError::InvalidParameter(format!(
                "n_bins must be in 1..={}, got {}",
                MAX_HISTOGRAM_ENTRIES, self.n_bins
            )));
        }
        Ok(())
    }

    pub fn channels(&self) -> Vec<Channel> {
        if self.channel_1 == self.channel_2 {
            vec![self.channel_1]
        } else {
            vec![self.channel_1, self.channel_2]
        }
    }

    fn half_range(&self) -> Timestamp {
        (self.n_bins as i64 / 2) * self.binwidth
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrelationSnapshot {
    pub binwidth: Timestamp,
    pub n_bins: usize,
    pub histogram: Arc<Vec<u64>>,
    pub pairs: u64,
}

pub struct Correlation {
    config: CorrelationConfig,
    histogram: Arc<Vec<u64>>,
    recent_1: VecDeque<Timestamp>,
    recent_2: VecDeque<Timestamp>,
    pairs: u64,
}

impl Correlation {
    pub fn new(config: CorrelationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            histogram: Arc::new(vec![0; config.n_bins]),
            config,
            recent_1: VecDeque::new(),
            recent_2: VecDeque::new(),
            pairs: 0,
        })
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    fn bin(&self, delta: Timestamp) -> Option<usize> {
        let bin = (delta + self.config.half_range()).div_euclid(self.config.binwidth);
        (0..self.config.n_bins as i64)
            .contains(&bin)
            .then_some(bin as usize)
    }

    fn add(&mut self, delta: Timestamp) {
        if let Some(bin) = self.bin(delta) {
            Arc::make_mut(&mut self.histogram)[bin] += 1;
            self.pairs += 1;
        }
    }

    fn prune(&mut self, now: Timestamp) {
        let horizon = now - self.config.half_range() - self.config.binwidth;
        while self.recent_1.front().is_some_and(|&t| t < horizon) {
            self.recent_1.pop_front();
        }
        while self.recent_2.front().is_some_and(|&t| t < horizon) {
            self.recent_2.pop_front();
        }
    }

    fn push(&mut self, tag: &Tag) {
        let auto = self.config.channel_1 == self.config.channel_2;

        if auto {
            if tag.channel != self.config.channel_1 {
                return;
            }
            let deltas: Vec<Timestamp> = self.recent_1.iter().map(|&t| tag.time - t).collect();
            for delta in deltas {
                self.add(delta);
                self.add(-delta);
            }
            self.recent_1.push_back(tag.time);
            return;
        }

        if tag.channel == self.config.channel_1 {
            // Earlier channel_2 tags give negative delays
            let deltas: Vec<Timestamp> = self.recent_2.iter().map(|&t2| t2 - tag.time).collect();
            for delta in deltas {
                self.add(delta);
            }
            self.recent_1.push_back(tag.time);
        } else if tag.channel == self.config.channel_2 {
            let deltas: Vec<Timestamp> = self.recent_1.iter().map(|&t1| tag.time - t1).collect();
            for delta in deltas {
                self.add(delta);
            }
            self.recent_2.push_back(tag.time);
        }
    }
}

impl AccumulationStrategy for Correlation {
    type Snapshot = CorrelationSnapshot;

    fn kind(&self) -> &'static str {
        "correlation"
    }

    fn clear(&mut self) {
        self.histogram = Arc::new(vec![0; self.config.n_bins]);
        self.recent_1.clear();
        self.recent_2.clear();
        self.pairs = 0;
    }

    fn ingest(&mut self, _slice: &EpochSlice, tags: &[Tag]) {
        for tag in tags {
            self.prune(tag.time);
            self.push(tag);
        }
    }

    fn snapshot(&self) -> CorrelationSnapshot {
        CorrelationSnapshot {
            binwidth: self.config.binwidth,
            n_bins: self.config.n_bins,
            histogram: Arc::clone(&self.histogram),
            pairs: self.pairs,
        }
    }

    fn index(&self) -> Vec<i64> {
        let center = self.config.n_bins as i64 / 2;
        (0..self.config.n_bins as i64)
            .map(|i| (i - center) * self.config.binwidth)
            .collect()
    }

    fn data(&self) -> Vec<u64> {
        self.histogram.as_ref().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EpochCoordinate;

    fn flat(len: usize) -> EpochSlice {
        EpochSlice {
            coordinate: EpochCoordinate::FLAT,
            epoch_begin: None,
            range: 0..len,
        }
    }

    fn correlation() -> Correlation {
        Correlation::new(CorrelationConfig {
            channel_1: 1,
            channel_2: 2,
            binwidth: 10,
            n_bins: 10,
        })
        .unwrap()
    }

    #[test]
    fn test_index_is_centered() {
        let c = correlation();
        assert_eq!(c.index(), vec![-50, -40, -30, -20, -10, 0, 10, 20, 30, 40]);
    }

    #[test]
    fn test_positive_and_negative_delays() {
        let mut c = correlation();
        let tags = [Tag::new(1, 100), Tag::new(2, 125), Tag::new(1, 160)];
        c.ingest(&flat(tags.len()), &tags);

        // +25 -> bin 7, -35 -> bin 1
        let data = c.data();
        assert_eq!(data[7], 1);
        assert_eq!(data[1], 1);
        assert_eq!(c.snapshot().pairs, 2);
    }

    #[test]
    fn test_pairs_span_batches() {
        let mut c = correlation();
        c.ingest(&flat(1), &[Tag::new(1, 100)]);
        c.ingest(&flat(1), &[Tag::new(2, 104)]);
        assert_eq!(c.data()[5], 1);
    }

    #[test]
    fn test_far_pairs_ignored() {
        let mut c = correlation();
        let tags = [Tag::new(1, 0), Tag::new(2, 1000)];
        c.ingest(&flat(2), &tags);
        assert_eq!(c.snapshot().pairs, 0);
    }

    #[test]
    fn test_autocorrelation_is_symmetric() {
        let mut c = Correlation::new(CorrelationConfig {
            channel_1: 3,
            channel_2: 3,
            binwidth: 10,
            n_bins: 10,
        })
        .unwrap();
        let tags = [Tag::new(3, 0), Tag::new(3, 20)];
        c.ingest(&flat(2), &tags);
        let data = c.data();
        assert_eq!(data[7], 1);
        assert_eq!(data[3], 1);
    }

    #[test]
    fn test_clear_resets_history() {
        let mut c = correlation();
        c.ingest(&flat(1), &[Tag::new(1, 100)]);
        c.clear();
        c.ingest(&flat(1), &[Tag::new(2, 104)]);
        assert!(c.data().iter().all(|&v| v == 0));
    }
}
