use crate::cli::FlimArgs;
use crate::commands::exit_code_for;
use crate::exit_codes;
use crate::output;
use serde::Serialize;
use tagstream::{
    read_tag_file, BatchSink, EpochStatus, FlimConfig, FlimHistogram, Measurement, Tag, TagBatch,
    Timestamp,
};

/// Tags per batch when feeding a file into the engine
const BATCH_SIZE: usize = 65_536;

#[derive(Serialize)]
struct FlimOutput {
    file: String,
    tags: usize,
    n_pixels: usize,
    n_bins: usize,
    binwidth: Timestamp,
    index: Vec<i64>,
    clicks: u64,
    out_of_range: u64,
    frames_completed: u64,
    intensity: Vec<u64>,
    total_decay: Vec<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    histogram: Option<Vec<u64>>,
    status: EpochStatus,
}

/// Split a recorded stream into contiguous batches. Tags sharing a timestamp
/// stay in one batch so every batch ends before the next tag.
fn batches(tags: &[Tag]) -> Vec<TagBatch> {
    let mut out = Vec::with_capacity(tags.len().div_ceil(BATCH_SIZE));
    let mut begin = tags.first().map(|t| t.time).unwrap_or(0);
    let mut start = 0;
    while start < tags.len() {
        let mut split = (start + BATCH_SIZE).min(tags.len());
        while split < tags.len() && tags[split].time == tags[split - 1].time {
            split += 1;
        }
        let end = match tags.get(split) {
            Some(next) => next.time,
            None => tags[split - 1].time + 1,
        };
        out.push(TagBatch::new(tags[start..split].to_vec(), begin, end));
        begin = end;
        start = split;
    }
    out
}

pub fn execute(args: FlimArgs) -> i32 {
    let config = FlimConfig {
        click_channel: args.click,
        start_channel: args.start_channel,
        boundaries: args.boundaries(),
        n_pixels: args.n_pixels,
        n_bins: args.n_bins,
        binwidth: args.binwidth,
        pixels_per_line: args.pixels_per_line,
        outside_policy: args.outside_policy(),
    };

    let histogram = match FlimHistogram::new(config.clone()) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("Error: {}", e);
            return exit_code_for(&e);
        }
    };

    let tags = match read_tag_file(&args.file) {
        Ok(tags) => tags,
        Err(e) => {
            eprintln!("Error: failed to read '{}': {}", args.file, e);
            return exit_codes::INPUT_ERROR;
        }
    };

    let measurement =
        match Measurement::detached(histogram, config.boundaries, config.outside_policy) {
            Ok(m) => m,
            Err(e) => {
                eprintln!("Error: {}", e);
                return exit_code_for(&e);
            }
        };

    log::info!("Accumulating {} tags from {}", tags.len(), args.file);
    measurement.start();
    for batch in batches(&tags) {
        measurement.on_batch(&batch);
    }
    measurement.stop();

    let snapshot = measurement.snapshot();
    if let Some(open) = snapshot.status.open_epoch {
        log::warn!("Stream ended inside pixel {}", open);
    }
    if snapshot.status.incomplete_epochs > 0 {
        log::warn!(
            "{} epochs were closed without their end event",
            snapshot.status.incomplete_epochs
        );
    }

    let result = FlimOutput {
        file: args.file.clone(),
        tags: tags.len(),
        n_pixels: snapshot.data.n_pixels,
        n_bins: snapshot.data.n_bins,
        binwidth: snapshot.data.binwidth,
        index: measurement.index(),
        clicks: snapshot.data.clicks,
        out_of_range: snapshot.data.out_of_range,
        frames_completed: snapshot.data.frames_completed,
        intensity: snapshot.data.intensity(),
        total_decay: snapshot.data.total_decay(),
        histogram: args.histogram.then(|| snapshot.data.summed.as_ref().clone()),
        status: snapshot.status,
    };

    output::emit(&result, args.compact, args.output.as_deref())
}
