// FLIM histogram - per-pixel photon arrival-time histograms
//
// Buffers are `n_pixels * n_bins` wide, pixel-major. Each buffer lives in an
// `Arc` so a snapshot only bumps a reference count; `Arc::make_mut` copies a
// buffer on the next ingest while a reader still holds it.

use super::AccumulationStrategy;
use crate::error::{Result, TagStreamError};
use crate::partition::{BoundaryChannels, ClosedEpoch, EpochLevel, EpochSlice, OutsidePolicy};
use crate::types::{Channel, EpochCoordinate, Tag, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Upper bound on `n_pixels * n_bins` (256 x 256 pixels x 256 bins)
pub const MAX_HISTOGRAM_ENTRIES: usize = 256 * 256 * 256;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlimConfig {
    /// Photon detection channel
    pub click_channel: Channel,
    /// Laser sync; without it the pixel begin time is the bin reference
    #[serde(default)]
    pub start_channel: Option<Channel>,
    pub boundaries: BoundaryChannels,
    pub n_pixels: usize,
    pub n_bins: usize,
    pub binwidth: Timestamp,
    /// Required when line boundaries are configured
    #[serde(default)]
    pub pixels_per_line: Option<usize>,
    #[serde(default)]
    pub outside_policy: OutsidePolicy,
}

impl FlimConfig {
    pub fn validate(&self) -> Result<()> {
        self.boundaries.validate()?;

        if self.boundaries.pixel_begin.is_none() {
            return Err(TagStreamError::InvalidParameter(
                "FLIM requires a pixel_begin channel".to_string(),
            ));
        }
        if self.n_pixels == 0 || self.n_bins == 0 {
            return Err(TagStreamError::InvalidParameter(
                "n_pixels and n_bins must be positive".to_string(),
            ));
        }
        if self.binwidth <= 0 {
            return Err(TagStreamError::InvalidParameter(format!(
                "binwidth must be positive, got {}",
                self.binwidth
            )));
        }
        match self.n_pixels.checked_mul(self.n_bins) {
            Some(entries) if entries <= MAX_HISTOGRAM_ENTRIES => {}
            _ => {
                return Err(TagStreamError::InvalidParameter(format!(
                    "histogram of {} pixels x {} bins exceeds {} entries",
                    self.n_pixels, self.n_bins, MAX_HISTOGRAM_ENTRIES
                )))
            }
        }
        if self.boundaries.line_begin.is_some() && self.pixels_per_line.unwrap_or(0) == 0 {
            return Err(TagStreamError::InvalidParameter(
                "pixels_per_line is required with line boundaries".to_string(),
            ));
        }

        let boundary = self.boundaries.channels();
        for ch in std::iter::once(self.click_channel).chain(self.start_channel) {
            if ch == 0 {
                return Err(TagStreamError::InvalidChannel(ch));
            }
            if boundary.contains(&ch) {
                return Err(TagStreamError::InvalidParameter(format!(
                    "channel {} is both a data and a boundary channel",
                    ch
                )));
            }
        }
        if self.start_channel == Some(self.click_channel) {
            return Err(TagStreamError::InvalidParameter(
                "start and click channel must differ".to_string(),
            ));
        }
        Ok(())
    }

    /// Every channel the measurement needs delivered
    pub fn channels(&self) -> Vec<Channel> {
        let mut channels = self.boundaries.channels();
        channels.push(self.click_channel);
        channels.extend(self.start_channel);
        channels
    }

    fn entries(&self) -> usize {
        self.n_pixels * self.n_bins
    }
}

/// Point-in-time view of a FLIM measurement
#[derive(Debug, Clone, Serialize)]
pub struct FlimSnapshot {
    pub n_pixels: usize,
    pub n_bins: usize,
    pub binwidth: Timestamp,
    /// All frames since the last clear
    pub summed: Arc<Vec<u64>>,
    /// Frame in progress
    pub current: Arc<Vec<u64>>,
    /// Last completed frame
    pub ready: Option<Arc<Vec<u64>>>,
    pub frames_completed: u64,
    pub clicks: u64,
    /// Clicks outside the histogram range or the pixel grid
    pub out_of_range: u64,
}

impl FlimSnapshot {
    /// Histogram of one pixel out of the summed buffer
    pub fn pixel(&self, pixel: usize) -> Option<&[u64]> {
        let start = pixel.checked_mul(self.n_bins)?;
        self.summed.get(start..start + self.n_bins)
    }

    /// Decay curve summed over all pixels
    pub fn total_decay(&self) -> Vec<u64> {
        let mut decay = vec![0u64; self.n_bins];
        for pixel in self.summed.chunks_exact(self.n_bins) {
            for (acc, v) in decay.iter_mut().zip(pixel) {
                *acc += v;
            }
        }
        decay
    }

    /// Photon count per pixel
    pub fn intensity(&self) -> Vec<u64> {
        self.summed
            .chunks_exact(self.n_bins)
            .map(|p| p.iter().sum())
            .collect()
    }
}

pub struct FlimHistogram {
    config: FlimConfig,
    summed: Arc<Vec<u64>>,
    current: Arc<Vec<u64>>,
    ready: Option<Arc<Vec<u64>>>,
    frames_completed: u64,
    clicks: u64,
    out_of_range: u64,
    last_start: Option<Timestamp>,
}

impl FlimHistogram {
    pub fn new(config: FlimConfig) -> Result<Self> {
        config.validate()?;
        let entries = config.entries();
        Ok(Self {
            config,
            summed: Arc::new(vec![0; entries]),
            current: Arc::new(vec![0; entries]),
            ready: None,
            frames_completed: 0,
            clicks: 0,
            out_of_range: 0,
            last_start: None,
        })
    }

    pub fn config(&self) -> &FlimConfig {
        &self.config
    }

    fn linear_pixel(&self, coordinate: &EpochCoordinate) -> Option<usize> {
        if coordinate.pixel < 0 {
            return None;
        }
        let pixel = match (self.config.boundaries.line_begin, self.config.pixels_per_line) {
            (Some(_), Some(per_line)) => {
                if coordinate.line < 0 || coordinate.pixel as usize >= per_line {
                    return None;
                }
                (coordinate.line as usize)
                    .checked_mul(per_line)?
                    .checked_add(coordinate.pixel as usize)?
            }
            _ => coordinate.pixel as usize,
        };
        (pixel < self.config.n_pixels).then_some(pixel)
    }

    fn bin(&self, time: Timestamp, reference: Option<Timestamp>) -> Option<usize> {
        let dt = time - reference?;
        if dt < 0 {
            return None;
        }
        let bin = (dt / self.config.binwidth) as usize;
        (bin < self.config.n_bins).then_some(bin)
    }
}

impl AccumulationStrategy for FlimHistogram {
    type Snapshot = FlimSnapshot;

    fn kind(&self) -> &'static str {
        "flim"
    }

    fn clear(&mut self) {
        let entries = self.config.entries();
        self.summed = Arc::new(vec![0; entries]);
        self.current = Arc::new(vec![0; entries]);
        self.ready = None;
        self.frames_completed = 0;
        self.clicks = 0;
        self.out_of_range = 0;
        self.last_start = None;
    }

    fn ingest(&mut self, slice: &EpochSlice, tags: &[Tag]) {
        let pixel = self.linear_pixel(&slice.coordinate);
        let n_bins = self.config.n_bins;

        for tag in tags {
            if Some(tag.channel) == self.config.start_channel {
                self.last_start = Some(tag.time);
                continue;
            }
            if tag.channel != self.config.click_channel {
                continue;
            }

            let reference = if self.config.start_channel.is_some() {
                self.last_start
            } else {
                slice.epoch_begin
            };

            match (pixel, self.bin(tag.time, reference)) {
                (Some(pixel), Some(bin)) => {
                    let idx = pixel * n_bins + bin;
                    Arc::make_mut(&mut self.summed)[idx] += 1;
                    Arc::make_mut(&mut self.current)[idx] += 1;
                    self.clicks += 1;
                }
                _ => self.out_of_range += 1,
            }
        }
    }

    fn close_epoch(&mut self, closed: &ClosedEpoch) {
        if closed.level != EpochLevel::Frame || closed.coordinate.frame < 0 {
            return;
        }
        let entries = self.config.entries();
        let finished = std::mem::replace(&mut self.current, Arc::new(vec![0; entries]));
        self.ready = Some(finished);
        self.frames_completed += 1;
        log::debug!(
            "FLIM frame {} completed ({} clicks so far)",
            closed.coordinate.frame,
            self.clicks
        );
    }

    fn snapshot(&self) -> FlimSnapshot {
        FlimSnapshot {
            n_pixels: self.config.n_pixels,
            n_bins: self.config.n_bins,
            binwidth: self.config.binwidth,
            summed: Arc::clone(&self.summed),
            current: Arc::clone(&self.current),
            ready: self.ready.clone(),
            frames_completed: self.frames_completed,
            clicks: self.clicks,
            out_of_range: self.out_of_range,
        }
    }

    fn index(&self) -> Vec<i64> {
        (0..self.config.n_bins as i64)
            .map(|i| i * self.config.binwidth)
            .collect()
    }

    fn data(&self) -> Vec<u64> {
        self.summed.as_ref().clone()
    }
}
