// Virtual time tagger - software tag source with a dedicated delivery thread
//
// Live mode: every `batch_period` the clock advances by the elapsed wall time
// and the enabled test signals are synthesized for that interval. At most
// `max_rate` tags per second are transferred; the rest is dropped and counted
// as overflows, the way a saturated USB link loses data.
//
// Replay mode: recorded tags are delivered back to back at full speed, then
// live mode resumes from the end of the replay.

use super::delayed::{DelayLine, DelayedChannel};
use super::{BatchSink, SubscriptionId, TaggerModel, TimeTagger};
use crate::error::{Result, TagStreamError};
use crate::types::{Channel, ChannelEdge, Tag, TagBatch, Timestamp, PICOS_PER_SECOND};
use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Virtual channels are numbered from here on
pub const FIRST_VIRTUAL_CHANNEL: Channel = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualTaggerConfig {
    pub model: TaggerModel,
    /// Generated when absent
    pub serial: Option<String>,
    /// Number of physical inputs
    pub n_channels: u32,
    pub batch_period: Duration,
    /// Transfer capacity in tags per second
    pub max_rate: f64,
}

impl Default for VirtualTaggerConfig {
    fn default() -> Self {
        Self {
            model: TaggerModel::Virtual,
            serial: None,
            n_channels: 8,
            batch_period: Duration::from_millis(10),
            max_rate: 20e6,
        }
    }
}

impl VirtualTaggerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_channels == 0 || self.n_channels as Channel >= FIRST_VIRTUAL_CHANNEL {
            return Err(TagStreamError::InvalidParameter(format!(
                "n_channels must be in 1..{}, got {}",
                FIRST_VIRTUAL_CHANNEL, self.n_channels
            )));
        }
        if self.batch_period.is_zero() {
            return Err(TagStreamError::InvalidParameter(
                "batch_period must be positive".to_string(),
            ));
        }
        if !(self.max_rate > 0.0 && self.max_rate.is_finite()) {
            return Err(TagStreamError::InvalidParameter(format!(
                "max_rate must be positive, got {}",
                self.max_rate
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Settings {
    /// Inputs with the test signal enabled, always positive
    test_signal: BTreeSet<Channel>,
    /// Per-edge input delay
    delays: HashMap<Channel, Timestamp>,
    divider: u32,
}

struct Subscriber {
    id: SubscriptionId,
    channels: HashSet<Channel>,
    sink: Weak<dyn BatchSink>,
}

struct PendingReplay {
    tags: VecDeque<Tag>,
    /// Shift applied so the replay starts at or after the clock
    offset: Option<Timestamp>,
}

#[derive(Default)]
struct Progress {
    batches: u64,
    replay: Option<PendingReplay>,
    shut_down: bool,
}

pub(super) struct Shared {
    config: VirtualTaggerConfig,
    serial: String,
    settings: RwLock<Settings>,
    subscribers: RwLock<Vec<Subscriber>>,
    delay_lines: Mutex<Vec<DelayLine>>,
    next_subscription: AtomicU64,
    next_virtual: AtomicI32,
    overflows: AtomicU64,
    progress: Mutex<Progress>,
    progress_changed: Condvar,
}

impl Shared {
    fn is_physical(&self, channel: Channel) -> bool {
        channel != 0 && channel.unsigned_abs() <= self.config.n_channels
    }

    fn is_virtual(&self, channel: Channel) -> bool {
        self.delay_lines.lock().iter().any(|l| l.channel == channel)
    }

    fn check_physical(&self, channel: Channel) -> Result<()> {
        if self.is_physical(channel) {
            Ok(())
        } else {
            Err(TagStreamError::InvalidChannel(channel))
        }
    }

    pub(super) fn remove_delay_line(&self, channel: Channel) {
        let mut lines = self.delay_lines.lock();
        lines.retain(|l| l.channel != channel);
        log::debug!("Removed delayed channel {}", channel);
    }

    /// Channels that have to be synthesized for the current subscribers
    fn wanted_channels(&self) -> HashSet<Channel> {
        let mut wanted: HashSet<Channel> = self
            .subscribers
            .read()
            .iter()
            .flat_map(|s| s.channels.iter().copied())
            .collect();
        wanted.extend(self.delay_lines.lock().iter().map(|l| l.input));
        wanted
    }

    fn replay_pending(&self) -> bool {
        self.progress.lock().replay.is_some()
    }

    fn dispatch(&self, mut batch: TagBatch) {
        for line in self.delay_lines.lock().iter_mut() {
            line.apply(&mut batch.tags, batch.end_time);
        }

        let mut dead = false;
        let targets: Vec<(HashSet<Channel>, Arc<dyn BatchSink>)> = self
            .subscribers
            .read()
            .iter()
            .filter_map(|s| match s.sink.upgrade() {
                Some(sink) => Some((s.channels.clone(), sink)),
                None => {
                    dead = true;
                    None
                }
            })
            .collect();
        if dead {
            self.subscribers
                .write()
                .retain(|s| s.sink.strong_count() > 0);
        }

        for (channels, sink) in &targets {
            sink.on_batch(&batch.restricted_to(channels));
        }
        drop(targets);

        let mut progress = self.progress.lock();
        progress.batches += 1;
        self.progress_changed.notify_all();
    }
}

/// Merge of periodic edge trains in `[begin, end)`, truncated at `capacity`.
/// Returns the transferred tags and the number of dropped ones.
fn synthesize(
    settings: &Settings,
    base_frequency: f64,
    wanted: &HashSet<Channel>,
    begin: Timestamp,
    end: Timestamp,
    capacity: usize,
) -> (Vec<Tag>, u64) {
    let period = ((PICOS_PER_SECOND as f64 * settings.divider as f64 / base_frequency).round()
        as Timestamp)
        .max(1);

    let mut trains: Vec<EdgeTrain> = Vec::new();
    for &input in &settings.test_signal {
        for (channel, half) in [(input, 0), (-input, period / 2)] {
            if !wanted.contains(&channel) {
                continue;
            }
            let phase = half + settings.delays.get(&channel).copied().unwrap_or(0);
            trains.push(EdgeTrain::new(channel, phase, period, begin));
        }
    }

    let mut tags = Vec::new();
    loop {
        let next = trains
            .iter()
            .enumerate()
            .filter(|(_, t)| t.next < end)
            .min_by_key(|(_, t)| (t.next, t.channel))
            .map(|(i, _)| i);
        let Some(i) = next else {
            return (tags, 0);
        };
        if tags.len() >= capacity {
            let dropped = trains.iter().map(|t| t.remaining(end)).sum();
            return (tags, dropped);
        }
        let train = &mut trains[i];
        tags.push(Tag::new(train.channel, train.next));
        train.next += train.period;
    }
}

struct EdgeTrain {
    channel: Channel,
    next: Timestamp,
    period: Timestamp,
}

impl EdgeTrain {
    fn new(channel: Channel, phase: Timestamp, period: Timestamp, begin: Timestamp) -> Self {
        let r = (begin - phase).rem_euclid(period);
        let next = if r == 0 { begin } else { begin + period - r };
        Self {
            channel,
            next,
            period,
        }
    }

    fn remaining(&self, end: Timestamp) -> u64 {
        if self.next >= end {
            0
        } else {
            ((end - 1 - self.next) / self.period + 1) as u64
        }
    }
}

/// State owned by the delivery thread
struct Generator {
    shared: Arc<Shared>,
    clock: Timestamp,
    last_wall: Instant,
    replay_span: Timestamp,
}

impl Generator {
    fn live_step(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_wall);
        self.last_wall = now;

        let begin = self.clock;
        let end = begin + elapsed.as_nanos() as Timestamp * 1000;
        if end <= begin {
            return;
        }
        self.clock = end;

        let wanted = self.shared.wanted_channels();
        let capacity = (self.shared.config.max_rate * elapsed.as_secs_f64()).ceil() as usize;
        let (tags, dropped) = {
            let settings = self.shared.settings.read();
            synthesize(
                &settings,
                self.shared.config.model.base_frequency(),
                &wanted,
                begin,
                end,
                capacity,
            )
        };

        if dropped > 0 {
            self.shared.overflows.fetch_add(dropped, Ordering::Relaxed);
            log::debug!("Overflow: dropped {} tags in [{}, {})", dropped, begin, end);
        }

        self.shared.dispatch(TagBatch::new(tags, begin, end));
    }

    fn replay_step(&mut self) {
        let begin = self.clock;
        let (tags, end, done) = {
            let mut progress = self.shared.progress.lock();
            let Some(replay) = progress.replay.as_mut() else {
                return;
            };

            let clock = self.clock;
            let offset = *replay.offset.get_or_insert_with(|| {
                replay
                    .tags
                    .front()
                    .map(|t| (clock - t.time).max(0))
                    .unwrap_or(0)
            });

            // Jump over long silences instead of emitting empty batches
            let end = match replay.tags.front() {
                Some(t) if t.time + offset >= begin + self.replay_span => t.time + offset,
                _ => begin + self.replay_span,
            };

            let n = replay.tags.iter().take_while(|t| t.time + offset < end).count();
            let tags: Vec<Tag> = replay
                .tags
                .drain(..n)
                .map(|t| Tag::new(t.channel, t.time + offset))
                .collect();
            let done = replay.tags.is_empty();
            if done {
                progress.replay = None;
            }
            (tags, end, done)
        };

        self.clock = end;
        self.shared.dispatch(TagBatch::new(tags, begin, end));

        if done {
            self.last_wall = Instant::now();
            log::info!("Replay finished at {} ps", end);
        }
    }

    fn run(mut self, shutdown: Receiver<()>, period: Duration) {
        let ticker = channel::tick(period);
        loop {
            if self.shared.replay_pending() {
                match shutdown.try_recv() {
                    Err(TryRecvError::Empty) => self.replay_step(),
                    _ => break,
                }
                continue;
            }

            crossbeam::select! {
                recv(shutdown) -> _ => break,
                recv(ticker) -> _ => self.live_step(),
            }
        }

        let mut progress = self.shared.progress.lock();
        progress.shut_down = true;
        progress.replay = None;
        self.shared.progress_changed.notify_all();
    }
}

pub struct VirtualTagger {
    shared: Arc<Shared>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl VirtualTagger {
    pub fn new(config: VirtualTaggerConfig) -> Result<Self> {
        config.validate()?;

        let serial = config
            .serial
            .clone()
            .unwrap_or_else(|| format!("VT-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]));
        let period = config.batch_period;
        let replay_span = period.as_nanos() as Timestamp * 1000;
        let divider = config.model.default_divider();

        let shared = Arc::new(Shared {
            config,
            serial,
            settings: RwLock::new(Settings {
                test_signal: BTreeSet::new(),
                delays: HashMap::new(),
                divider,
            }),
            subscribers: RwLock::new(Vec::new()),
            delay_lines: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            next_virtual: AtomicI32::new(FIRST_VIRTUAL_CHANNEL),
            overflows: AtomicU64::new(0),
            progress: Mutex::new(Progress::default()),
            progress_changed: Condvar::new(),
        });

        let (shutdown_tx, shutdown_rx) = channel::bounded(1);
        let generator = Generator {
            shared: Arc::clone(&shared),
            clock: 0,
            last_wall: Instant::now(),
            replay_span,
        };
        let worker = thread::Builder::new()
            .name("tag-delivery".to_string())
            .spawn(move || generator.run(shutdown_rx, period))?;

        log::info!(
            "Virtual tagger {} started ({}, {} channels, {:?} batches)",
            shared.serial,
            shared.config.model,
            shared.config.n_channels,
            period
        );

        Ok(Self {
            shared,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn config(&self) -> &VirtualTaggerConfig {
        &self.shared.config
    }

    /// Number of batches delivered so far
    pub fn batches_delivered(&self) -> u64 {
        self.shared.progress.lock().batches
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.progress.lock().shut_down
    }

    /// Queue recorded tags for delivery at full speed. Live generation pauses
    /// until the replay has been delivered.
    pub fn replay(&self, tags: Vec<Tag>) -> Result<()> {
        if tags.windows(2).any(|w| w[1].time < w[0].time) {
            return Err(TagStreamError::InvalidParameter(
                "replay tags must be time ordered".to_string(),
            ));
        }

        let mut progress = self.shared.progress.lock();
        if progress.shut_down {
            return Err(TagStreamError::TaggerShutdown);
        }
        if progress.replay.is_some() {
            return Err(TagStreamError::InvalidParameter(
                "a replay is already in progress".to_string(),
            ));
        }
        if tags.is_empty() {
            return Ok(());
        }

        log::info!("Replaying {} tags on {}", tags.len(), self.shared.serial);
        progress.replay = Some(PendingReplay {
            tags: tags.into(),
            offset: None,
        });
        Ok(())
    }

    pub fn wait_for_completion(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut progress = self.shared.progress.lock();
        while progress.replay.is_some() {
            if self
                .shared
                .progress_changed
                .wait_until(&mut progress, deadline)
                .timed_out()
                && progress.replay.is_some()
            {
                return Err(TagStreamError::Timeout(format!(
                    "replay did not finish within {:?}",
                    timeout
                )));
            }
        }
        if progress.shut_down {
            return Err(TagStreamError::TaggerShutdown);
        }
        Ok(())
    }

    /// Add a virtual channel that repeats `input` delayed by `delay` ps
    pub fn create_delayed_channel(&self, input: Channel, delay: Timestamp) -> Result<DelayedChannel> {
        if delay < 0 {
            return Err(TagStreamError::InvalidParameter(format!(
                "delay must not be negative, got {}",
                delay
            )));
        }
        if !self.shared.is_physical(input) && !self.shared.is_virtual(input) {
            return Err(TagStreamError::InvalidChannel(input));
        }

        let channel = self.shared.next_virtual.fetch_add(1, Ordering::Relaxed);
        self.shared
            .delay_lines
            .lock()
            .push(DelayLine::new(channel, input, delay));
        log::debug!("Created delayed channel {} = {} + {} ps", channel, input, delay);

        Ok(DelayedChannel::new(
            channel,
            input,
            delay,
            Arc::downgrade(&self.shared),
        ))
    }

    /// Stop the delivery thread. Safe to call more than once.
    pub fn shutdown(&self) {
        drop(self.shutdown_tx.lock().take());

        if let Some(worker) = self.worker.lock().take() {
            if worker.thread().id() == thread::current().id() {
                // Last reference dropped from inside a delivery callback
                return;
            }
            if worker.join().is_err() {
                log::error!("Delivery thread of {} panicked", self.shared.serial);
            }
            log::info!("Virtual tagger {} shut down", self.shared.serial);
        }
    }
}

impl Drop for VirtualTagger {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl TimeTagger for VirtualTagger {
    fn model(&self) -> TaggerModel {
        self.shared.config.model
    }

    fn serial(&self) -> String {
        self.shared.serial.clone()
    }

    fn set_test_signal(&self, channels: &[Channel], enabled: bool) -> Result<()> {
        for &ch in channels {
            self.shared.check_physical(ch)?;
        }
        let mut settings = self.shared.settings.write();
        for &ch in channels {
            if enabled {
                settings.test_signal.insert(ch.abs());
            } else {
                settings.test_signal.remove(&ch.abs());
            }
        }
        Ok(())
    }

    fn test_signal(&self, channel: Channel) -> Result<bool> {
        self.shared.check_physical(channel)?;
        Ok(self.shared.settings.read().test_signal.contains(&channel.abs()))
    }

    fn set_input_delay(&self, channel: Channel, delay: Timestamp) -> Result<()> {
        self.shared.check_physical(channel)?;
        self.shared.settings.write().delays.insert(channel, delay);
        Ok(())
    }

    fn input_delay(&self, channel: Channel) -> Result<Timestamp> {
        self.shared.check_physical(channel)?;
        Ok(self
            .shared
            .settings
            .read()
            .delays
            .get(&channel)
            .copied()
            .unwrap_or(0))
    }

    fn set_test_signal_divider(&self, divider: u32) -> Result<()> {
        if divider == 0 {
            return Err(TagStreamError::InvalidParameter(
                "test signal divider must be at least 1".to_string(),
            ));
        }
        self.shared.settings.write().divider = divider;
        Ok(())
    }

    fn test_signal_divider(&self) -> u32 {
        self.shared.settings.read().divider
    }

    fn get_channel_list(&self, edge: ChannelEdge) -> Vec<Channel> {
        let n = self.shared.config.n_channels as Channel;
        let physical = (1..=n).chain((1..=n).map(|c| -c));
        let virtual_channels: Vec<Channel> = self
            .shared
            .delay_lines
            .lock()
            .iter()
            .map(|l| l.channel)
            .collect();

        physical
            .chain(virtual_channels)
            .filter(|&c| edge.matches(c))
            .collect()
    }

    fn sync(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut progress = self.shared.progress.lock();
        // The batch in flight may predate this call
        let target = progress.batches + 2;

        while progress.batches < target {
            if progress.shut_down {
                return Err(TagStreamError::TaggerShutdown);
            }
            if self
                .shared
                .progress_changed
                .wait_until(&mut progress, deadline)
                .timed_out()
                && progress.batches < target
            {
                return Err(TagStreamError::Timeout(format!(
                    "no batch delivered within {:?}",
                    timeout
                )));
            }
        }
        Ok(())
    }

    fn clear_overflows(&self) {
        self.shared.overflows.store(0, Ordering::Relaxed);
    }

    fn get_overflows(&self) -> u64 {
        self.shared.overflows.load(Ordering::Relaxed)
    }

    fn subscribe(&self, channels: &[Channel], sink: Weak<dyn BatchSink>) -> Result<SubscriptionId> {
        if self.is_shut_down() {
            return Err(TagStreamError::TaggerShutdown);
        }
        for &ch in channels {
            if !self.shared.is_physical(ch) && !self.shared.is_virtual(ch) {
                return Err(TagStreamError::InvalidChannel(ch));
            }
        }

        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.shared.subscribers.write().push(Subscriber {
            id,
            channels: channels.iter().copied().collect(),
            sink,
        });
        log::debug!("Subscription {} on {:?}", id, channels);
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        let mut subscribers = self.shared.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        if subscribers.len() == before {
            return Err(TagStreamError::InvalidParameter(format!(
                "unknown subscription {}",
                id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Collector(Mutex<Vec<TagBatch>>);

    impl BatchSink for Collector {
        fn on_batch(&self, batch: &TagBatch) {
            self.0.lock().push(batch.clone());
        }
    }

    fn settings(channels: &[Channel], divider: u32) -> Settings {
        Settings {
            test_signal: channels.iter().copied().collect(),
            delays: HashMap::new(),
            divider,
        }
    }

    fn fast_config() -> VirtualTaggerConfig {
        VirtualTaggerConfig {
            batch_period: Duration::from_millis(2),
            ..VirtualTaggerConfig::default()
        }
    }

    #[test]
    fn test_synthesize_rising_and_falling() {
        // 1 MHz base, divider 1: one rising edge per microsecond
        let wanted: HashSet<Channel> = [1, -1].into_iter().collect();
        let (tags, dropped) = synthesize(&settings(&[1], 1), 1e6, &wanted, 0, 2_000_000, usize::MAX);

        assert_eq!(dropped, 0);
        assert_eq!(
            tags,
            vec![
                Tag::new(1, 0),
                Tag::new(-1, 500_000),
                Tag::new(1, 1_000_000),
                Tag::new(-1, 1_500_000),
            ]
        );
    }

    #[test]
    fn test_synthesize_respects_delay_and_range() {
        let mut s = settings(&[2], 1);
        s.delays.insert(2, 100);
        let wanted: HashSet<Channel> = [2].into_iter().collect();
        let (tags, _) = synthesize(&s, 1e6, &wanted, 50, 3_000_000, usize::MAX);
        assert_eq!(
            tags.iter().map(|t| t.time).collect::<Vec<_>>(),
            vec![100, 1_000_100, 2_000_100]
        );
    }

    #[test]
    fn test_synthesize_counts_overflow() {
        let wanted: HashSet<Channel> = [1].into_iter().collect();
        let (tags, dropped) = synthesize(&settings(&[1], 1), 1e6, &wanted, 0, 10_000_000, 4);
        assert_eq!(tags.len(), 4);
        assert_eq!(dropped, 6);
    }

    #[test]
    fn test_channel_list() {
        let tagger = VirtualTagger::new(VirtualTaggerConfig {
            n_channels: 2,
            ..fast_config()
        })
        .unwrap();
        assert_eq!(tagger.get_channel_list(ChannelEdge::Rising), vec![1, 2]);
        assert_eq!(tagger.get_channel_list(ChannelEdge::Falling), vec![-1, -2]);

        let delayed = tagger.create_delayed_channel(1, 10).unwrap();
        assert_eq!(delayed.channel(), FIRST_VIRTUAL_CHANNEL);
        assert!(tagger.get_channel_list(ChannelEdge::All).contains(&FIRST_VIRTUAL_CHANNEL));

        drop(delayed);
        assert!(!tagger.get_channel_list(ChannelEdge::All).contains(&FIRST_VIRTUAL_CHANNEL));
    }

    #[test]
    fn test_invalid_channels_rejected() {
        let tagger = VirtualTagger::new(fast_config()).unwrap();
        assert!(matches!(
            tagger.set_test_signal(&[9], true),
            Err(TagStreamError::InvalidChannel(9))
        ));
        assert!(tagger.set_input_delay(0, 5).is_err());
        assert!(tagger.set_test_signal_divider(0).is_err());
        assert!(tagger.create_delayed_channel(1, -1).is_err());
    }

    #[test]
    fn test_settings_read_back() {
        let tagger = VirtualTagger::new(fast_config()).unwrap();
        assert!(!tagger.test_signal(2).unwrap());
        tagger.set_test_signal(&[2], true).unwrap();
        assert!(tagger.test_signal(2).unwrap());
        assert!(tagger.test_signal(-2).unwrap());
        assert!(matches!(
            tagger.test_signal(9),
            Err(TagStreamError::InvalidChannel(9))
        ));

        assert_eq!(tagger.input_delay(-3).unwrap(), 0);
        tagger.set_input_delay(-3, 1_500).unwrap();
        assert_eq!(tagger.input_delay(-3).unwrap(), 1_500);
        assert_eq!(tagger.input_delay(3).unwrap(), 0);
    }

    #[test]
    fn test_live_delivery_restricted_to_subscription() {
        let tagger = VirtualTagger::new(fast_config()).unwrap();
        tagger.set_test_signal(&[1, 2], true).unwrap();

        let collector = Arc::new(Collector(Mutex::new(Vec::new())));
        let sink: Arc<dyn BatchSink> = collector.clone();
        tagger.subscribe(&[1], Arc::downgrade(&sink)).unwrap();
        tagger.sync(Duration::from_secs(2)).unwrap();
        tagger.sync(Duration::from_secs(2)).unwrap();

        let batches = collector.0.lock();
        assert!(!batches.is_empty());
        assert!(batches.iter().all(|b| b.tags.iter().all(|t| t.channel == 1)));
        assert!(batches.iter().all(TagBatch::is_well_formed));
        assert!(batches.windows(2).all(|w| w[0].end_time == w[1].begin_time));
        assert!(batches.iter().map(TagBatch::len).sum::<usize>() > 0);
    }

    #[test]
    fn test_replay_delivers_every_tag() {
        let tagger = VirtualTagger::new(fast_config()).unwrap();
        let collector = Arc::new(Collector(Mutex::new(Vec::new())));
        let sink: Arc<dyn BatchSink> = collector.clone();
        tagger.subscribe(&[1, 2], Arc::downgrade(&sink)).unwrap();

        let tags: Vec<Tag> = (0..1000)
            .map(|i| Tag::new(1 + (i % 2) as Channel, i * 1_000_000))
            .collect();
        tagger.replay(tags.clone()).unwrap();
        tagger.wait_for_completion(Duration::from_secs(5)).unwrap();

        let delivered: Vec<Tag> = collector
            .0
            .lock()
            .iter()
            .flat_map(|b| b.tags.iter().copied())
            .collect();
        assert_eq!(delivered.len(), tags.len());
        let offset = delivered[0].time - tags[0].time;
        assert!(delivered
            .iter()
            .zip(&tags)
            .all(|(d, t)| d.channel == t.channel && d.time - t.time == offset));
    }

    #[test]
    fn test_unordered_replay_rejected() {
        let tagger = VirtualTagger::new(fast_config()).unwrap();
        assert!(tagger
            .replay(vec![Tag::new(1, 10), Tag::new(1, 5)])
            .is_err());
    }

    #[test]
    fn test_dropped_sink_is_pruned() {
        let tagger = VirtualTagger::new(fast_config()).unwrap();
        let sink: Arc<dyn BatchSink> = Arc::new(Collector(Mutex::new(Vec::new())));
        tagger.subscribe(&[1], Arc::downgrade(&sink)).unwrap();
        drop(sink);
        tagger.sync(Duration::from_secs(2)).unwrap();
        assert!(tagger.shared.subscribers.read().is_empty());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let tagger = VirtualTagger::new(fast_config()).unwrap();
        tagger.shutdown();
        tagger.shutdown();
        assert!(tagger.is_shut_down());
        assert!(matches!(
            tagger.sync(Duration::from_millis(50)),
            Err(TagStreamError::TaggerShutdown)
        ));
    }
}
