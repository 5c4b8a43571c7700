// Accumulation strategies
//
// A strategy owns the aggregate of one measurement. The engine shell in
// `measurement.rs` holds the lock, drives the partitioner and calls into the
// strategy; strategies never synchronize on their own.
//
// Current implementations:
// - Counter: total tag count, used for transfer-rate probing
// - FlimHistogram: per-pixel lifetime histograms over frame/line/pixel epochs
// - Correlation: time-difference histogram between two channels

mod correlation;
mod counter;
mod flim;

use crate::partition::{ClosedEpoch, EpochSlice};
use crate::types::Tag;
use serde::Serialize;

pub use correlation::{Correlation, CorrelationConfig, CorrelationSnapshot};
pub use counter::Counter;
pub use flim::{FlimConfig, FlimHistogram, FlimSnapshot, MAX_HISTOGRAM_ENTRIES};

/// Mutable aggregate fed by the engine.
///
/// `ingest` receives the tags of one epoch slice; `close_epoch` is called in
/// stream order between slices whenever the partitioner closes an epoch.
pub trait AccumulationStrategy: Send + 'static {
    type Snapshot: Clone + Send + Serialize;

    /// Short name used in logs and by the remoting layer
    fn kind(&self) -> &'static str;

    /// Reset the aggregate to its identity value
    fn clear(&mut self);

    fn ingest(&mut self, slice: &EpochSlice, tags: &[Tag]);

    fn close_epoch(&mut self, _closed: &ClosedEpoch) {}

    fn snapshot(&self) -> Self::Snapshot;

    /// Axis of `data()`, e.g. bin start times
    fn index(&self) -> Vec<i64>;

    /// Flat copy of the aggregate
    fn data(&self) -> Vec<u64>;
}
