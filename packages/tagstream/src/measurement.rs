// Measurement engine - run state machine around an accumulation strategy
//
// A single mutex guards the strategy, the partitioner and the run state, so a
// snapshot observes either all or none of a batch. The condvar is only used by
// callers waiting for a timed run to finish; ingestion never blocks on it.
//
// The tagger holds a weak reference to the engine. Dropping the last strong
// reference stops the run and unsubscribes from the tagger.

use crate::accumulator::{
    AccumulationStrategy, Correlation, CorrelationConfig, Counter, FlimConfig, FlimHistogram,
};
use crate::error::{Result, TagStreamError};
use crate::partition::{BoundaryChannels, EpochPartitioner, OutsidePolicy, PartitionEvent};
use crate::tagger::{BatchSink, SubscriptionId, TimeTagger};
use crate::types::{Channel, EpochCoordinate, Tag, TagBatch, Timestamp};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Idle,
    Running,
}

/// Data-quality side of a snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EpochStatus {
    /// Innermost epoch that has begun but not yet closed
    pub open_epoch: Option<EpochCoordinate>,
    /// Epochs force-closed by an outer boundary
    pub incomplete_epochs: u64,
    /// Tags outside of any epoch
    pub discarded: u64,
    /// Acquisition time accumulated since the last clear, in picoseconds
    pub capture_duration: Timestamp,
}

#[derive(Debug, Clone, Serialize)]
pub struct MeasurementSnapshot<D> {
    pub data: D,
    pub status: EpochStatus,
    pub running: bool,
}

struct Inner<S> {
    strategy: S,
    partitioner: EpochPartitioner,
    state: RunState,
    /// Acquisition time limit of the current run
    limit: Option<Timestamp>,
    /// `begin_time` of the first batch seen in the current run
    run_origin: Option<Timestamp>,
    capture_duration: Timestamp,
    discarded: u64,
    incomplete_epochs: u64,
}

impl<S: AccumulationStrategy> Inner<S> {
    fn clear(&mut self) {
        self.strategy.clear();
        self.partitioner.reset();
        self.capture_duration = 0;
        self.discarded = 0;
        self.incomplete_epochs = 0;
    }

    fn ingest(&mut self, tags: &[Tag]) {
        let partition = self.partitioner.partition_tags(tags);
        self.discarded += partition.discarded as u64;

        for event in partition.events() {
            match event {
                PartitionEvent::Slice(slice) => {
                    self.strategy.ingest(slice, slice.tags(tags));
                }
                PartitionEvent::Closed(closed) => {
                    if !closed.complete {
                        self.incomplete_epochs += 1;
                    }
                    self.strategy.close_epoch(closed);
                }
            }
        }
    }

    fn status(&self) -> EpochStatus {
        EpochStatus {
            open_epoch: self.partitioner.open_epoch(),
            incomplete_epochs: self.incomplete_epochs,
            discarded: self.discarded,
            capture_duration: self.capture_duration,
        }
    }
}

struct Attachment {
    tagger: Arc<dyn TimeTagger>,
    subscription: SubscriptionId,
}

pub struct Measurement<S: AccumulationStrategy> {
    inner: Mutex<Inner<S>>,
    finished: Condvar,
    channels: Vec<Channel>,
    attachment: Mutex<Option<Attachment>>,
}

impl<S: AccumulationStrategy> Measurement<S> {
    /// Engine that is fed manually through `on_batch`
    pub fn detached(
        strategy: S,
        boundaries: BoundaryChannels,
        policy: OutsidePolicy,
    ) -> Result<Self> {
        let partitioner = EpochPartitioner::new(boundaries, policy)?;
        Ok(Self {
            inner: Mutex::new(Inner {
                strategy,
                partitioner,
                state: RunState::Idle,
                limit: None,
                run_origin: None,
                capture_duration: 0,
                discarded: 0,
                incomplete_epochs: 0,
            }),
            finished: Condvar::new(),
            channels: Vec::new(),
            attachment: Mutex::new(None),
        })
    }

    /// Engine subscribed to `channels` of `tagger`
    pub fn attach(
        tagger: Arc<dyn TimeTagger>,
        strategy: S,
        boundaries: BoundaryChannels,
        policy: OutsidePolicy,
        channels: Vec<Channel>,
    ) -> Result<Arc<Self>> {
        if channels.is_empty() {
            return Err(TagStreamError::InvalidParameter(
                "a measurement needs at least one channel".to_string(),
            ));
        }

        let mut measurement = Self::detached(strategy, boundaries, policy)?;
        measurement.channels = channels;
        let measurement = Arc::new(measurement);

        let sink: Weak<dyn BatchSink> = Arc::downgrade(&measurement) as Weak<dyn BatchSink>;
        let subscription = tagger.subscribe(&measurement.channels, sink)?;
        *measurement.attachment.lock() = Some(Attachment {
            tagger,
            subscription,
        });

        log::debug!(
            "Attached {} measurement to channels {:?}",
            measurement.kind(),
            measurement.channels
        );
        Ok(measurement)
    }

    pub fn kind(&self) -> &'static str {
        self.inner.lock().strategy.kind()
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Start accumulating into the existing aggregate
    pub fn start(&self) {
        self.start_with(false);
    }

    pub fn start_with(&self, clear: bool) {
        let mut inner = self.inner.lock();
        if clear {
            inner.clear();
        }
        inner.state = RunState::Running;
        inner.limit = None;
        inner.run_origin = None;
        log::debug!("{} measurement started (clear={})", inner.strategy.kind(), clear);
    }

    /// Run until the acquisition clock has advanced by `duration` picoseconds
    pub fn start_for(&self, duration: Timestamp, clear: bool) -> Result<()> {
        if duration <= 0 {
            return Err(TagStreamError::InvalidParameter(format!(
                "duration must be positive, got {}",
                duration
            )));
        }

        let mut inner = self.inner.lock();
        if clear {
            inner.clear();
        }
        inner.state = RunState::Running;
        inner.limit = Some(duration);
        inner.run_origin = None;
        log::debug!(
            "{} measurement started for {} ps (clear={})",
            inner.strategy.kind(),
            duration,
            clear
        );
        Ok(())
    }

    pub fn stop(&self) {
        let mut inner = self.inner.lock();
        if inner.state == RunState::Running {
            inner.state = RunState::Idle;
            inner.limit = None;
            self.finished.notify_all();
            log::debug!("{} measurement stopped", inner.strategy.kind());
        }
    }

    /// Reset the aggregate; the run state is left as is
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().state == RunState::Running
    }

    /// Block until the engine is idle. Returns `false` on timeout.
    pub fn wait_until_finished(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        while inner.state == RunState::Running {
            if self.finished.wait_until(&mut inner, deadline).timed_out() {
                return inner.state == RunState::Idle;
            }
        }
        true
    }

    pub fn capture_duration(&self) -> Timestamp {
        self.inner.lock().capture_duration
    }

    pub fn status(&self) -> EpochStatus {
        self.inner.lock().status()
    }

    pub fn snapshot(&self) -> MeasurementSnapshot<S::Snapshot> {
        let inner = self.inner.lock();
        MeasurementSnapshot {
            data: inner.strategy.snapshot(),
            status: inner.status(),
            running: inner.state == RunState::Running,
        }
    }

    pub fn index(&self) -> Vec<i64> {
        self.inner.lock().strategy.index()
    }

    pub fn data(&self) -> Vec<u64> {
        self.inner.lock().strategy.data()
    }

    fn detach(&self) {
        if let Some(attachment) = self.attachment.lock().take() {
            if let Err(e) = attachment.tagger.unsubscribe(attachment.subscription) {
                log::warn!("Failed to unsubscribe measurement: {}", e);
            }
        }
    }
}

impl Measurement<Counter> {
    pub fn counter(tagger: Arc<dyn TimeTagger>, channels: &[Channel]) -> Result<Arc<Self>> {
        Self::attach(
            tagger,
            Counter::new(),
            BoundaryChannels::none(),
            OutsidePolicy::Discard,
            channels.to_vec(),
        )
    }
}

impl Measurement<FlimHistogram> {
    pub fn flim(tagger: Arc<dyn TimeTagger>, config: FlimConfig) -> Result<Arc<Self>> {
        let channels = config.channels();
        let boundaries = config.boundaries;
        let policy = config.outside_policy;
        Self::attach(tagger, FlimHistogram::new(config)?, boundaries, policy, channels)
    }
}

impl Measurement<Correlation> {
    pub fn correlation(tagger: Arc<dyn TimeTagger>, config: CorrelationConfig) -> Result<Arc<Self>> {
        Self::attach(
            tagger,
            Correlation::new(config)?,
            BoundaryChannels::none(),
            OutsidePolicy::Discard,
            config.channels(),
        )
    }
}

impl<S: AccumulationStrategy> BatchSink for Measurement<S> {
    fn on_batch(&self, batch: &TagBatch) {
        let mut inner = self.inner.lock();
        if inner.state != RunState::Running {
            return;
        }

        let origin = *inner.run_origin.get_or_insert(batch.begin_time);
        // A limit past the end of the time axis is never reached
        let stop_at = inner.limit.and_then(|limit| origin.checked_add(limit));
        let (tags, end, expired) = match stop_at {
            Some(stop_at) if batch.end_time >= stop_at => {
                let cut = batch.tags.partition_point(|t| t.time < stop_at);
                (&batch.tags[..cut], stop_at, true)
            }
            _ => (&batch.tags[..], batch.end_time, false),
        };

        inner.capture_duration += (end - batch.begin_time).max(0);
        inner.ingest(tags);

        if expired {
            inner.state = RunState::Idle;
            inner.limit = None;
            self.finished.notify_all();
            log::debug!("{} measurement reached its acquisition time", inner.strategy.kind());
        }
    }
}

impl<S: AccumulationStrategy> Drop for Measurement<S> {
    fn drop(&mut self) {
        self.stop();
        self.detach();
    }
}

/// Object-safe control surface used by the handle registry
pub trait MeasurementControl: Send + Sync {
    fn kind(&self) -> &'static str;
    fn channels(&self) -> Vec<Channel>;
    fn start_with(&self, clear: bool);
    fn start_for(&self, duration: Timestamp, clear: bool) -> Result<()>;
    fn stop(&self);
    fn clear(&self);
    fn is_running(&self) -> bool;
    fn wait_until_finished(&self, timeout: Duration) -> bool;
    fn status(&self) -> EpochStatus;
    fn index(&self) -> Vec<i64>;
    fn data(&self) -> Vec<u64>;
}

impl<S: AccumulationStrategy> MeasurementControl for Measurement<S> {
    fn kind(&self) -> &'static str {
        Measurement::kind(self)
    }

    fn channels(&self) -> Vec<Channel> {
        self.channels.clone()
    }

    fn start_with(&self, clear: bool) {
        Measurement::start_with(self, clear)
    }

    fn start_for(&self, duration: Timestamp, clear: bool) -> Result<()> {
        Measurement::start_for(self, duration, clear)
    }

    fn stop(&self) {
        Measurement::stop(self)
    }

    fn clear(&self) {
        Measurement::clear(self)
    }

    fn is_running(&self) -> bool {
        Measurement::is_running(self)
    }

    fn wait_until_finished(&self, timeout: Duration) -> bool {
        Measurement::wait_until_finished(self, timeout)
    }

    fn status(&self) -> EpochStatus {
        Measurement::status(self)
    }

    fn index(&self) -> Vec<i64> {
        Measurement::index(self)
    }

    fn data(&self) -> Vec<u64> {
        Measurement::data(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn counter() -> Measurement<Counter> {
        Measurement::detached(Counter::new(), BoundaryChannels::none(), OutsidePolicy::Discard)
            .unwrap()
    }

    fn batch(times: &[Timestamp], begin: Timestamp, end: Timestamp) -> TagBatch {
        TagBatch::new(times.iter().map(|&t| Tag::new(1, t)).collect(), begin, end)
    }

    #[test]
    fn test_idle_engine_ignores_batches() {
        let m = counter();
        m.on_batch(&batch(&[1, 2, 3], 0, 10));
        assert_eq!(m.data(), vec![0]);
        assert!(!m.is_running());
    }

    #[test]
    fn test_stop_start_keeps_counts() {
        let m = counter();
        m.start();
        m.on_batch(&batch(&[1, 2], 0, 10));
        m.stop();
        m.on_batch(&batch(&[11], 10, 20));
        m.start_with(false);
        m.on_batch(&batch(&[21, 22, 23], 20, 30));
        assert_eq!(m.data(), vec![5]);
    }

    #[test]
    fn test_clear_yields_identity_while_running() {
        let m = counter();
        m.start();
        m.on_batch(&batch(&[1, 2], 0, 10));
        m.clear();
        assert_eq!(m.data(), vec![0]);
        assert!(m.is_running());
        assert_eq!(m.snapshot().status, EpochStatus::default());
    }

    #[test]
    fn test_start_for_cuts_at_limit() {
        let m = counter();
        m.start_for(25, true).unwrap();
        m.on_batch(&batch(&[1, 5], 0, 10));
        m.on_batch(&batch(&[12, 19], 10, 20));
        assert!(m.is_running());
        m.on_batch(&batch(&[21, 24, 25, 29], 20, 30));

        assert!(!m.is_running());
        assert_eq!(m.data(), vec![6]);
        assert_eq!(m.capture_duration(), 25);
        assert!(m.wait_until_finished(Duration::from_millis(1)));
    }

    #[test]
    fn test_start_for_measures_from_first_batch() {
        let m = counter();
        m.start_for(10, false).unwrap();
        m.on_batch(&batch(&[1_000, 1_004], 1_000, 1_005));
        assert!(m.is_running());
        m.on_batch(&batch(&[1_009, 1_010], 1_005, 1_015));
        assert!(!m.is_running());
        assert_eq!(m.data(), vec![3]);
    }

    #[test]
    fn test_start_for_unbounded_duration_keeps_running() {
        let m = counter();
        m.start_for(Timestamp::MAX, true).unwrap();
        m.on_batch(&batch(&[1_000, 2_000], 1_000, 3_000));
        m.on_batch(&batch(&[3_500], 3_000, 4_000));

        assert!(m.is_running());
        assert_eq!(m.data(), vec![3]);
        assert_eq!(m.capture_duration(), 3_000);
    }

    #[test]
    fn test_start_for_rejects_non_positive_duration() {
        let m = counter();
        assert!(m.start_for(0, false).is_err());
        assert!(!m.is_running());
    }

    #[test]
    fn test_wait_until_finished_wakes_on_stop() {
        let m = Arc::new(counter());
        m.start();
        let waiter = {
            let m = Arc::clone(&m);
            thread::spawn(move || m.wait_until_finished(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        m.stop();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_snapshot_never_sees_partial_batch() {
        const TAGS_PER_BATCH: u64 = 7;
        const BATCHES: i64 = 5_000;

        let m = Arc::new(counter());
        m.start();
        let writer = {
            let m = Arc::clone(&m);
            thread::spawn(move || {
                for i in 0..BATCHES {
                    let begin = i * 10;
                    let times: Vec<Timestamp> =
                        (0..TAGS_PER_BATCH as i64).map(|k| begin + k).collect();
                    m.on_batch(&batch(&times, begin, begin + 10));
                }
            })
        };

        loop {
            let done = writer.is_finished();
            let count = m.snapshot().data;
            assert_eq!(count % TAGS_PER_BATCH, 0, "observed {} tags", count);
            if done {
                break;
            }
        }
        writer.join().unwrap();

        assert_eq!(m.snapshot().data, TAGS_PER_BATCH * BATCHES as u64);
    }

    #[test]
    fn test_wait_until_finished_times_out() {
        let m = counter();
        m.start();
        assert!(!m.wait_until_finished(Duration::from_millis(10)));
    }

    #[test]
    fn test_incomplete_epochs_are_reported() {
        let boundaries = BoundaryChannels {
            frame_begin: Some(3),
            pixel_begin: Some(5),
            pixel_end: Some(-5),
            ..BoundaryChannels::none()
        };
        let m = Measurement::detached(Counter::new(), boundaries, OutsidePolicy::Discard).unwrap();
        m.start();
        m.on_batch(&TagBatch::from_tags(vec![
            Tag::new(3, 0),
            Tag::new(5, 1),
            Tag::new(1, 2),
            Tag::new(3, 3),
            Tag::new(5, 4),
        ]));

        let status = m.status();
        assert_eq!(status.incomplete_epochs, 1);
        assert_eq!(status.open_epoch, Some(EpochCoordinate::new(1, 0, 0)));
    }

    #[test]
    fn test_control_trait_object() {
        let m: Arc<dyn MeasurementControl> = Arc::new(counter());
        m.start_with(true);
        assert!(m.is_running());
        assert_eq!(m.kind(), "counter");
        assert_eq!(m.index(), vec![0]);
        m.stop();
        assert!(!m.is_running());
    }
}
