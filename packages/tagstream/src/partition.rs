// Epoch partitioner - splits tag batches into frame/line/pixel epochs
//
// The partitioner is a small state machine driven by boundary channels.
// Its coordinate persists across batches, so an epoch may span any number
// of batches. Each call yields zero-copy index ranges into the input slice.
//
// Attribution rules:
// - a begin tag belongs to the epoch it opens, an end tag to the epoch it closes
// - tags before the first begin of a level follow `OutsidePolicy`
// - tags in the gap after an explicit end event are discarded
// - an outer boundary arriving while an inner epoch is open force-closes it

use crate::error::{Result, TagStreamError};
use crate::types::{Channel, EpochCoordinate, Tag, TagBatch, Timestamp};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Channels whose events mark epoch transitions
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BoundaryChannels {
    #[serde(default)]
    pub frame_begin: Option<Channel>,
    #[serde(default)]
    pub line_begin: Option<Channel>,
    #[serde(default)]
    pub line_end: Option<Channel>,
    #[serde(default)]
    pub pixel_begin: Option<Channel>,
    #[serde(default)]
    pub pixel_end: Option<Channel>,
}

impl BoundaryChannels {
    /// Flat configuration: the whole stream is one epoch
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_flat(&self) -> bool {
        self.innermost().is_none()
    }

    /// All configured boundary channels
    pub fn channels(&self) -> Vec<Channel> {
        [
            self.frame_begin,
            self.line_begin,
            self.line_end,
            self.pixel_begin,
            self.pixel_end,
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.line_end.is_some() && self.line_begin.is_none() {
            return Err(TagStreamError::InvalidParameter(
                "line_end requires line_begin".to_string(),
            ));
        }
        if self.pixel_end.is_some() && self.pixel_begin.is_none() {
            return Err(TagStreamError::InvalidParameter(
                "pixel_end requires pixel_begin".to_string(),
            ));
        }

        let channels = self.channels();
        for (i, a) in channels.iter().enumerate() {
            if *a == 0 {
                return Err(TagStreamError::InvalidChannel(*a));
            }
            if channels[i + 1..].contains(a) {
                return Err(TagStreamError::InvalidParameter(format!(
                    "channel {} is used for more than one boundary",
                    a
                )));
            }
        }
        Ok(())
    }

    pub fn innermost(&self) -> Option<EpochLevel> {
        if self.pixel_begin.is_some() {
            Some(EpochLevel::Pixel)
        } else if self.line_begin.is_some() {
            Some(EpochLevel::Line)
        } else if self.frame_begin.is_some() {
            Some(EpochLevel::Frame)
        } else {
            None
        }
    }

    fn has_level(&self, level: EpochLevel) -> bool {
        match level {
            EpochLevel::Frame => self.frame_begin.is_some(),
            EpochLevel::Line => self.line_begin.is_some(),
            EpochLevel::Pixel => self.pixel_begin.is_some(),
        }
    }

    fn has_end(&self, level: EpochLevel) -> bool {
        match level {
            EpochLevel::Frame => false,
            EpochLevel::Line => self.line_end.is_some(),
            EpochLevel::Pixel => self.pixel_end.is_some(),
        }
    }

    fn classify(&self, channel: Channel) -> Option<Boundary> {
        let is = |c: Option<Channel>| c == Some(channel);
        if is(self.frame_begin) {
            Some(Boundary::Begin(EpochLevel::Frame))
        } else if is(self.line_begin) {
            Some(Boundary::Begin(EpochLevel::Line))
        } else if is(self.line_end) {
            Some(Boundary::End(EpochLevel::Line))
        } else if is(self.pixel_begin) {
            Some(Boundary::Begin(EpochLevel::Pixel))
        } else if is(self.pixel_end) {
            Some(Boundary::End(EpochLevel::Pixel))
        } else {
            None
        }
    }
}

/// Nesting level of an epoch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EpochLevel {
    Frame,
    Line,
    Pixel,
}

impl EpochLevel {
    fn slot(self) -> usize {
        match self {
            EpochLevel::Frame => 0,
            EpochLevel::Line => 1,
            EpochLevel::Pixel => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    Begin(EpochLevel),
    End(EpochLevel),
}

/// What to do with tags that arrive before the first boundary of a level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutsidePolicy {
    /// Count them as discarded
    #[default]
    Discard,
    /// Yield them under a coordinate containing `-1`
    Attribute,
}

/// Contiguous run of tags that belong to one epoch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochSlice {
    pub coordinate: EpochCoordinate,
    /// Time at which the innermost epoch opened; `None` outside of any epoch
    /// and for flat partitioning
    pub epoch_begin: Option<Timestamp>,
    pub range: Range<usize>,
}

impl EpochSlice {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }

    pub fn tags<'a>(&self, tags: &'a [Tag]) -> &'a [Tag] {
        &tags[self.range.clone()]
    }
}

/// An epoch that closed during a partition call
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClosedEpoch {
    pub level: EpochLevel,
    pub coordinate: EpochCoordinate,
    pub begin: Timestamp,
    pub end: Timestamp,
    /// `false` when the epoch was force-closed by an outer boundary
    pub complete: bool,
    /// Index of the first tag in the batch that follows the close
    pub position: usize,
}

/// Result of partitioning one batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub slices: Vec<EpochSlice>,
    pub closed: Vec<ClosedEpoch>,
    pub discarded: usize,
}

/// Slices and epoch closes interleaved in stream order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionEvent<'a> {
    Slice(&'a EpochSlice),
    Closed(&'a ClosedEpoch),
}

impl Partition {
    /// Number of tags attributed to some epoch
    pub fn attributed(&self) -> usize {
        self.slices.iter().map(EpochSlice::len).sum()
    }

    /// Merge slices and closes by batch position. A close is delivered before
    /// any slice that starts at or after its position.
    pub fn events(&self) -> Vec<PartitionEvent<'_>> {
        let mut events = Vec::with_capacity(self.slices.len() + self.closed.len());
        let mut closed = self.closed.iter().peekable();
        for slice in &self.slices {
            while let Some(c) = closed.next_if(|c| c.position <= slice.range.start) {
                events.push(PartitionEvent::Closed(c));
            }
            events.push(PartitionEvent::Slice(slice));
        }
        events.extend(closed.map(PartitionEvent::Closed));
        events
    }
}

pub struct EpochPartitioner {
    boundaries: BoundaryChannels,
    policy: OutsidePolicy,
    coordinate: EpochCoordinate,
    /// Begin time of the open epoch per level (frame, line, pixel)
    open: [Option<Timestamp>; 3],
}

impl EpochPartitioner {
    pub fn new(boundaries: BoundaryChannels, policy: OutsidePolicy) -> Result<Self> {
        boundaries.validate()?;
        Ok(Self {
            boundaries,
            policy,
            coordinate: Self::initial_coordinate(&boundaries),
            open: [None; 3],
        })
    }

    /// Partitioner with no boundaries: every tag maps to `EpochCoordinate::FLAT`
    pub fn flat() -> Self {
        Self {
            boundaries: BoundaryChannels::none(),
            policy: OutsidePolicy::Discard,
            coordinate: EpochCoordinate::FLAT,
            open: [None; 3],
        }
    }

    fn initial_coordinate(boundaries: &BoundaryChannels) -> EpochCoordinate {
        let start = |level| if boundaries.has_level(level) { -1 } else { 0 };
        EpochCoordinate::new(
            start(EpochLevel::Frame),
            start(EpochLevel::Line),
            start(EpochLevel::Pixel),
        )
    }

    pub fn boundaries(&self) -> &BoundaryChannels {
        &self.boundaries
    }

    pub fn policy(&self) -> OutsidePolicy {
        self.policy
    }

    /// Coordinate that the next non-boundary tag would be attributed to
    pub fn current(&self) -> EpochCoordinate {
        self.coordinate
    }

    /// The innermost epoch that has begun but not yet closed
    pub fn open_epoch(&self) -> Option<EpochCoordinate> {
        let level = self.boundaries.innermost()?;
        self.open[level.slot()].map(|_| self.coordinate)
    }

    /// Forget all epoch state, as at construction
    pub fn reset(&mut self) {
        self.coordinate = Self::initial_coordinate(&self.boundaries);
        self.open = [None; 3];
    }

    pub fn partition(&mut self, batch: &TagBatch) -> Partition {
        self.partition_tags(&batch.tags)
    }

    pub fn partition_tags(&mut self, tags: &[Tag]) -> Partition {
        let mut out = Partition::default();

        if self.boundaries.is_flat() {
            if !tags.is_empty() {
                out.slices.push(EpochSlice {
                    coordinate: EpochCoordinate::FLAT,
                    epoch_begin: None,
                    range: 0..tags.len(),
                });
            }
            return out;
        }

        for (i, tag) in tags.iter().enumerate() {
            match self.boundaries.classify(tag.channel) {
                Some(Boundary::Begin(level)) => {
                    self.begin(level, tag.time, i, &mut out.closed);
                    self.attribute(i, &mut out);
                }
                Some(Boundary::End(level)) => {
                    self.attribute(i, &mut out);
                    self.end(level, tag.time, i + 1, &mut out.closed);
                }
                None => self.attribute(i, &mut out),
            }
        }

        out
    }

    fn begin(
        &mut self,
        level: EpochLevel,
        time: Timestamp,
        position: usize,
        closed: &mut Vec<ClosedEpoch>,
    ) {
        // Close this level and everything nested inside it, innermost first
        for inner in [EpochLevel::Pixel, EpochLevel::Line, EpochLevel::Frame] {
            self.close(inner, time, position, false, closed);
            if inner == level {
                break;
            }
        }

        match level {
            EpochLevel::Frame => {
                self.coordinate.frame += 1;
                if self.boundaries.has_level(EpochLevel::Line) {
                    self.coordinate.line = -1;
                }
                if self.boundaries.has_level(EpochLevel::Pixel) {
                    self.coordinate.pixel = -1;
                }
            }
            EpochLevel::Line => {
                self.coordinate.line += 1;
                if self.boundaries.has_level(EpochLevel::Pixel) {
                    self.coordinate.pixel = -1;
                }
            }
            EpochLevel::Pixel => {
                self.coordinate.pixel += 1;
            }
        }
        self.open[level.slot()] = Some(time);
    }

    fn end(
        &mut self,
        level: EpochLevel,
        time: Timestamp,
        position: usize,
        closed: &mut Vec<ClosedEpoch>,
    ) {
        if self.open[level.slot()].is_none() {
            log::trace!("Stray {:?} end at {} ignored", level, time);
            return;
        }
        if level == EpochLevel::Line {
            self.close(EpochLevel::Pixel, time, position, false, closed);
        }
        self.close(level, time, position, true, closed);
    }

    /// Close `level` if open. `by_end_event` is true only for the level's own
    /// end channel; any other close of a level that has an end channel is
    /// reported as incomplete.
    fn close(
        &mut self,
        level: EpochLevel,
        time: Timestamp,
        position: usize,
        by_end_event: bool,
        closed: &mut Vec<ClosedEpoch>,
    ) {
        if let Some(begin) = self.open[level.slot()].take() {
            closed.push(ClosedEpoch {
                level,
                coordinate: self.coordinate,
                begin,
                end: time,
                complete: by_end_event || !self.boundaries.has_end(level),
                position,
            });
        }
    }

    fn is_outside(&self) -> bool {
        let c = self.coordinate;
        (self.boundaries.has_level(EpochLevel::Frame) && c.frame < 0)
            || (self.boundaries.has_level(EpochLevel::Line) && c.line < 0)
            || (self.boundaries.has_level(EpochLevel::Pixel) && c.pixel < 0)
    }

    fn attribute(&self, index: usize, out: &mut Partition) {
        let innermost = match self.boundaries.innermost() {
            Some(level) => level,
            None => return push_index(out, EpochCoordinate::FLAT, None, index),
        };

        if self.is_outside() {
            match self.policy {
                OutsidePolicy::Discard => out.discarded += 1,
                OutsidePolicy::Attribute => push_index(out, self.coordinate, None, index),
            }
            return;
        }

        match self.open[innermost.slot()] {
            Some(begin) => push_index(out, self.coordinate, Some(begin), index),
            // Gap after an explicit end event: the epoch is final
            None => out.discarded += 1,
        }
    }
}

fn push_index(
    out: &mut Partition,
    coordinate: EpochCoordinate,
    epoch_begin: Option<Timestamp>,
    index: usize,
) {
    if let Some(last) = out.slices.last_mut() {
        if last.coordinate == coordinate
            && last.epoch_begin == epoch_begin
            && last.range.end == index
        {
            last.range.end = index + 1;
            return;
        }
    }
    out.slices.push(EpochSlice {
        coordinate,
        epoch_begin,
        range: index..index + 1,
    });
}
