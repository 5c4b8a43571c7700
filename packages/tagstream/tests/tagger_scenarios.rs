use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tagstream::{
    probe_transfer_rate, read_tag_file, write_tag_file, BoundaryChannels, CorrelationConfig,
    FlimConfig, Measurement, OutsidePolicy, ProbeConfig, Tag, TaggerModel, TimeTagger,
    VirtualTagger, VirtualTaggerConfig, PICOS_PER_SECOND,
};

fn tagger(config: VirtualTaggerConfig) -> Arc<VirtualTagger> {
    let _ = env_logger::builder().is_test(true).try_init();
    Arc::new(VirtualTagger::new(config).unwrap())
}

fn fast() -> VirtualTaggerConfig {
    VirtualTaggerConfig {
        batch_period: Duration::from_millis(5),
        ..VirtualTaggerConfig::default()
    }
}

#[test]
fn test_probe_rate_matches_three_channel_test_signal() {
    let tagger = tagger(VirtualTaggerConfig {
        model: TaggerModel::Virtual,
        max_rate: 10e6,
        ..fast()
    });

    // Five 400 ms samples instead of the default ten 1 s samples; the median
    // of a noiseless test signal settles well within that
    let config = ProbeConfig {
        integration: Duration::from_millis(400),
        samples: 5,
        min_rate: Some(60e3),
        ..ProbeConfig::default()
    };
    let report = probe_transfer_rate(tagger.clone(), &config).unwrap();

    // floor(74 * 800e3 / 60e3 * 3) = 2960 -> 20 kHz per channel
    assert_eq!(report.divider, 2960);
    assert_eq!(report.channels, vec![1, 2, 3]);
    assert_eq!(report.transfer_rates.len(), 5);

    let per_channel = TaggerModel::Virtual.base_frequency() / report.divider as f64;
    let expected = 3.0 * per_channel;
    let error = (report.transfer_rate - expected).abs() / expected;
    assert!(
        error < 0.05,
        "median {} vs expected {} ({:.1}%)",
        report.transfer_rate,
        expected,
        error * 100.0
    );
    assert_eq!(report.overflows, 0);

    // Defaults restored afterwards
    assert_eq!(tagger.test_signal_divider(), TaggerModel::Virtual.default_divider());
}

#[test]
fn test_probe_fails_fast_on_impossible_rate() {
    let tagger = tagger(fast());
    let config = ProbeConfig {
        min_rate: Some(1e12),
        ..ProbeConfig::default()
    };
    let err = probe_transfer_rate(tagger.clone(), &config).unwrap_err();
    assert!(matches!(err, tagstream::TagStreamError::ConfigurationImpossible(_)));
    assert_eq!(tagger.test_signal_divider(), TaggerModel::Virtual.default_divider());
}

#[test]
fn test_overflow_keeps_run_going() {
    let tagger = tagger(VirtualTaggerConfig {
        max_rate: 100e3,
        ..fast()
    });
    // 59.2 MHz / 59200 = 1 kHz, well below the link capacity
    tagger.set_test_signal_divider(59_200).unwrap();
    tagger.set_test_signal(&[1], true).unwrap();

    let counter = Measurement::counter(tagger.clone(), &[1]).unwrap();
    counter.start();
    tagger.sync(Duration::from_secs(2)).unwrap();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(tagger.get_overflows(), 0);
    let before = counter.snapshot().data;

    // 800 kHz on one input saturates a 100 ktags/s link
    tagger.set_test_signal_divider(74).unwrap();
    thread::sleep(Duration::from_millis(100));
    tagger.sync(Duration::from_secs(2)).unwrap();

    assert!(counter.is_running());
    assert!(tagger.get_overflows() > 0);
    let after = counter.snapshot().data;
    assert!(after >= before);

    tagger.clear_overflows();
    assert_eq!(tagger.get_overflows(), 0);
}

#[test]
fn test_start_for_stops_after_acquisition_time() {
    let tagger = tagger(fast());
    tagger.set_test_signal(&[1], true).unwrap();
    let counter = Measurement::counter(tagger.clone(), &[1]).unwrap();

    let duration = PICOS_PER_SECOND / 50;
    counter.start_for(duration, true).unwrap();
    assert!(counter.wait_until_finished(Duration::from_secs(5)));
    assert!(!counter.is_running());
    assert_eq!(counter.capture_duration(), duration);

    // 800 kHz for 20 ms
    let count = counter.snapshot().data;
    assert!((15_000..=17_000).contains(&count), "count {}", count);
}

#[test]
fn test_flim_from_replayed_tag_file() {
    let tags = vec![
        Tag::new(5, 1_000),
        Tag::new(5, 2_000),
        Tag::new(5, 3_000),
        Tag::new(1, 3_035),
        Tag::new(1, 3_071),
        Tag::new(5, 4_000),
    ];
    let file = tempfile::NamedTempFile::new().unwrap();
    write_tag_file(file.path(), &tags).unwrap();
    let tags = read_tag_file(file.path()).unwrap();

    let tagger = tagger(fast());
    let flim = Measurement::flim(
        tagger.clone(),
        FlimConfig {
            click_channel: 1,
            start_channel: None,
            boundaries: BoundaryChannels {
                pixel_begin: Some(5),
                ..BoundaryChannels::none()
            },
            n_pixels: 4,
            n_bins: 8,
            binwidth: 10,
            pixels_per_line: None,
            outside_policy: OutsidePolicy::Discard,
        },
    )
    .unwrap();

    flim.start_with(true);
    tagger.replay(tags).unwrap();
    tagger.wait_for_completion(Duration::from_secs(5)).unwrap();
    flim.stop();

    let snapshot = flim.snapshot();
    let pixel_two = snapshot.data.pixel(2).unwrap();
    assert_eq!(pixel_two[3], 1);
    assert_eq!(pixel_two[7], 1);
    assert_eq!(snapshot.data.clicks, 2);
    assert_eq!(snapshot.status.open_epoch.map(|c| c.pixel), Some(3));
}

#[test]
fn test_delayed_channel_correlation() {
    let tagger = tagger(fast());
    let delayed = tagger.create_delayed_channel(1, 3_000).unwrap();

    let correlation = Measurement::correlation(
        tagger.clone(),
        CorrelationConfig {
            channel_1: 1,
            channel_2: delayed.channel(),
            binwidth: 1_000,
            n_bins: 10,
        },
    )
    .unwrap();
    correlation.start();

    let tags: Vec<Tag> = (0..200).map(|i| Tag::new(1, i * 1_000_000)).collect();
    tagger.replay(tags).unwrap();
    tagger.wait_for_completion(Duration::from_secs(5)).unwrap();
    tagger.sync(Duration::from_secs(2)).unwrap();

    // +3000 ps lands in bin (3000 + 5000) / 1000
    let data = correlation.data();
    assert_eq!(data[8], 200);
    assert_eq!(data.iter().sum::<u64>(), 200);
    assert_eq!(correlation.index()[8], 3_000);
}

#[test]
fn test_dropping_measurement_unsubscribes() {
    let tagger = tagger(fast());
    let counter = Measurement::counter(tagger.clone(), &[1]).unwrap();
    counter.start();
    drop(counter);

    // Delivery keeps going without the sink
    tagger.sync(Duration::from_secs(2)).unwrap();
    tagger.shutdown();
    assert!(tagger.is_shut_down());
}
