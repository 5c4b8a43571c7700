use std::sync::Arc;
use tagstream::{
    AccumulationStrategy, BatchSink, BoundaryChannels, Channel, Correlation, CorrelationConfig,
    Counter, EpochPartitioner, FlimConfig, FlimHistogram, Handle, HandleRegistry, Measurement,
    MeasurementControl, OutsidePolicy, Tag, TagBatch, TagStreamError, Timestamp,
};

const CLICK: Channel = 1;
const START: Channel = 4;
const FRAME: Channel = 3;
const LINE: Channel = 2;
const LINE_END: Channel = -2;
const PIXEL: Channel = 5;
const PIXEL_END: Channel = -5;

/// Deterministic tag stream with interleaved scan boundaries
fn scan_stream(n: usize, seed: u64) -> Vec<Tag> {
    let mut state = seed;
    let mut next = move || {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        state >> 33
    };

    let mut tags = Vec::with_capacity(n);
    let mut time: Timestamp = 0;
    for i in 0..n {
        time += 1 + (next() % 7) as Timestamp;
        let channel = match i % 40 {
            0 if i % 400 == 0 => FRAME,
            1 if i % 120 == 1 => LINE,
            39 if i % 120 == 119 => LINE_END,
            2 | 12 | 22 | 32 => PIXEL,
            9 | 19 | 29 => PIXEL_END,
            _ if next() % 4 == 0 => START,
            _ => CLICK,
        };
        tags.push(Tag::new(channel, time));
    }
    tags
}

fn scan_boundaries() -> BoundaryChannels {
    BoundaryChannels {
        frame_begin: Some(FRAME),
        line_begin: Some(LINE),
        line_end: Some(LINE_END),
        pixel_begin: Some(PIXEL),
        pixel_end: Some(PIXEL_END),
    }
}

fn flim_config() -> FlimConfig {
    FlimConfig {
        click_channel: CLICK,
        start_channel: Some(START),
        boundaries: scan_boundaries(),
        n_pixels: 64,
        n_bins: 16,
        binwidth: 2,
        pixels_per_line: Some(8),
        outside_policy: OutsidePolicy::Discard,
    }
}

fn split(tags: &[Tag], at: usize) -> (TagBatch, TagBatch) {
    let boundary = tags[at].time;
    let end = tags.last().map(|t| t.time + 1).unwrap_or(0);
    (
        TagBatch::new(tags[..at].to_vec(), 0, boundary),
        TagBatch::new(tags[at..].to_vec(), boundary, end),
    )
}

fn run<S: AccumulationStrategy>(
    make: impl Fn() -> Measurement<S>,
    batches: &[TagBatch],
) -> Vec<u64> {
    let m = make();
    m.start();
    for batch in batches {
        m.on_batch(batch);
    }
    m.data()
}

#[test]
fn test_split_batches_match_concatenation() {
    let tags = scan_stream(2000, 7);
    let whole = TagBatch::new(tags.clone(), 0, tags.last().unwrap().time + 1);

    let flim = || {
        Measurement::detached(
            FlimHistogram::new(flim_config()).unwrap(),
            scan_boundaries(),
            OutsidePolicy::Discard,
        )
        .unwrap()
    };
    let correlation = || {
        Measurement::detached(
            Correlation::new(CorrelationConfig {
                channel_1: START,
                channel_2: CLICK,
                binwidth: 3,
                n_bins: 20,
            })
            .unwrap(),
            BoundaryChannels::none(),
            OutsidePolicy::Discard,
        )
        .unwrap()
    };

    let flim_whole = run(flim, std::slice::from_ref(&whole));
    let corr_whole = run(correlation, std::slice::from_ref(&whole));
    assert!(flim_whole.iter().sum::<u64>() > 0);
    assert!(corr_whole.iter().sum::<u64>() > 0);

    for at in [1, 37, 401, 999, 1998] {
        let (b1, b2) = split(&tags, at);
        assert_eq!(run(flim, &[b1.clone(), b2.clone()]), flim_whole, "flim split at {}", at);
        assert_eq!(run(correlation, &[b1, b2]), corr_whole, "correlation split at {}", at);
    }
}

#[test]
fn test_partition_conserves_tags_for_all_configurations() {
    let tags = scan_stream(1500, 11);
    let configs = [
        BoundaryChannels::none(),
        BoundaryChannels {
            pixel_begin: Some(PIXEL),
            ..BoundaryChannels::none()
        },
        BoundaryChannels {
            pixel_begin: Some(PIXEL),
            pixel_end: Some(PIXEL_END),
            ..BoundaryChannels::none()
        },
        BoundaryChannels {
            line_begin: Some(LINE),
            line_end: Some(LINE_END),
            ..BoundaryChannels::none()
        },
        BoundaryChannels {
            frame_begin: Some(FRAME),
            pixel_begin: Some(PIXEL),
            ..BoundaryChannels::none()
        },
        scan_boundaries(),
    ];

    for boundaries in configs {
        for policy in [OutsidePolicy::Discard, OutsidePolicy::Attribute] {
            let mut partitioner = EpochPartitioner::new(boundaries, policy).unwrap();
            let mut total = 0;
            for chunk in tags.chunks(97) {
                let partition = partitioner.partition_tags(chunk);
                assert_eq!(partition.attributed() + partition.discarded, chunk.len());
                assert!(partition
                    .slices
                    .windows(2)
                    .all(|w| w[0].coordinate <= w[1].coordinate));
                total += partition.attributed() + partition.discarded;
            }
            assert_eq!(total, tags.len(), "{:?} / {:?}", boundaries, policy);
        }
    }
}

#[test]
fn test_clear_yields_identity_in_any_run_state() {
    let tags = scan_stream(500, 3);
    let batch = TagBatch::from_tags(tags);
    let m = Measurement::detached(
        FlimHistogram::new(flim_config()).unwrap(),
        scan_boundaries(),
        OutsidePolicy::Discard,
    )
    .unwrap();

    m.start();
    m.on_batch(&batch);
    assert!(m.data().iter().any(|&v| v > 0));
    m.clear();
    assert!(m.data().iter().all(|&v| v == 0));
    assert!(m.is_running());

    m.on_batch(&batch);
    m.stop();
    m.clear();
    let snapshot = m.snapshot();
    assert!(snapshot.data.summed.iter().all(|&v| v == 0));
    assert_eq!(snapshot.data.frames_completed, 0);
    assert_eq!(snapshot.status.discarded, 0);
}

#[test]
fn test_counts_persist_across_stop_start() {
    let m = Measurement::detached(Counter::new(), BoundaryChannels::none(), OutsidePolicy::Discard)
        .unwrap();
    let first = TagBatch::new(vec![Tag::new(1, 1), Tag::new(2, 2)], 0, 10);
    let second = TagBatch::new(vec![Tag::new(1, 11), Tag::new(1, 12), Tag::new(2, 13)], 10, 20);

    m.start();
    m.on_batch(&first);
    m.stop();
    assert_eq!(m.snapshot().data, 2);

    m.start_with(false);
    m.on_batch(&second);
    assert_eq!(m.snapshot().data, 5);
}

#[test]
fn test_flim_click_lands_in_pixel_two_bin_three() {
    let config = FlimConfig {
        click_channel: CLICK,
        start_channel: None,
        boundaries: BoundaryChannels {
            pixel_begin: Some(PIXEL),
            ..BoundaryChannels::none()
        },
        n_pixels: 4,
        n_bins: 8,
        binwidth: 10,
        pixels_per_line: None,
        outside_policy: OutsidePolicy::Discard,
    };
    let boundaries = config.boundaries;
    let m = Measurement::detached(
        FlimHistogram::new(config).unwrap(),
        boundaries,
        OutsidePolicy::Discard,
    )
    .unwrap();

    m.start();
    m.on_batch(&TagBatch::from_tags(vec![
        Tag::new(PIXEL, 1000),
        Tag::new(PIXEL, 2000),
        Tag::new(PIXEL, 3000),
        Tag::new(CLICK, 3035),
    ]));

    let data = m.data();
    assert_eq!(data.len(), 4 * 8);
    assert_eq!(data[2 * 8 + 3], 1);
    assert_eq!(data.iter().sum::<u64>(), 1);
}

#[test]
fn test_open_pixel_reported_at_stream_end() {
    let config = FlimConfig {
        start_channel: None,
        ..flim_config()
    };
    let m = Measurement::detached(
        FlimHistogram::new(config).unwrap(),
        scan_boundaries(),
        OutsidePolicy::Discard,
    )
    .unwrap();
    m.start();
    m.on_batch(&TagBatch::from_tags(vec![
        Tag::new(FRAME, 0),
        Tag::new(LINE, 1),
        Tag::new(PIXEL, 2),
        Tag::new(CLICK, 3),
    ]));
    m.stop();

    let status = m.snapshot().status;
    assert_eq!(status.open_epoch.map(|c| (c.frame, c.line, c.pixel)), Some((0, 0, 0)));
    assert_eq!(status.incomplete_epochs, 0);
}

#[test]
fn test_unregistered_measurement_handle_is_unknown() {
    let registry: HandleRegistry<dyn MeasurementControl> = HandleRegistry::new();
    let measurement: Arc<dyn MeasurementControl> = Arc::new(
        Measurement::detached(Counter::new(), BoundaryChannels::none(), OutsidePolicy::Discard)
            .unwrap(),
    );

    let handle = registry.register(measurement).unwrap();
    registry.resolve(&handle).unwrap().start_with(true);

    let removed = registry.unregister(&handle).unwrap();
    removed.stop();

    match registry.resolve(&handle) {
        Err(TagStreamError::UnknownHandle(h)) => assert_eq!(h, handle),
        other => panic!("expected UnknownHandle, got {:?}", other.map(|m| m.kind())),
    }
    assert!(matches!(
        registry.resolve(&Handle::new()),
        Err(TagStreamError::UnknownHandle(_))
    ));
}
