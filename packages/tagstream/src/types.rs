use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

/// Input line identifier. Negative values are the falling edge of the
/// corresponding positive (rising-edge) channel.
pub type Channel = i32;

/// Picoseconds on the tagger clock
pub type Timestamp = i64;

pub const PICOS_PER_SECOND: i64 = 1_000_000_000_000;

/// Edge filter for channel enumeration
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChannelEdge {
    Rising,
    Falling,
    #[default]
    All,
}

impl ChannelEdge {
    pub fn matches(&self, channel: Channel) -> bool {
        match self {
            ChannelEdge::Rising => channel > 0,
            ChannelEdge::Falling => channel < 0,
            ChannelEdge::All => channel != 0,
        }
    }
}

/// A single timestamped event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Tag {
    pub channel: Channel,
    pub time: Timestamp,
}

impl Tag {
    pub fn new(channel: Channel, time: Timestamp) -> Self {
        Self { channel, time }
    }
}

/// Time-ordered group of tags covering `[begin_time, end_time)`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TagBatch {
    pub tags: Vec<Tag>,
    pub begin_time: Timestamp,
    pub end_time: Timestamp,
}

impl TagBatch {
    pub fn new(tags: Vec<Tag>, begin_time: Timestamp, end_time: Timestamp) -> Self {
        Self {
            tags,
            begin_time,
            end_time,
        }
    }

    /// Build a batch whose range tightly covers the given tags
    pub fn from_tags(tags: Vec<Tag>) -> Self {
        let begin_time = tags.first().map(|t| t.time).unwrap_or(0);
        let end_time = tags.last().map(|t| t.time + 1).unwrap_or(begin_time);
        Self::new(tags, begin_time, end_time)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn duration(&self) -> Timestamp {
        self.end_time - self.begin_time
    }

    /// Sub-batch containing only the given channels, same time range
    pub fn restricted_to(&self, channels: &HashSet<Channel>) -> TagBatch {
        TagBatch {
            tags: self
                .tags
                .iter()
                .filter(|t| channels.contains(&t.channel))
                .copied()
                .collect(),
            begin_time: self.begin_time,
            end_time: self.end_time,
        }
    }

    /// Check time ordering and range containment
    pub fn is_well_formed(&self) -> bool {
        self.begin_time <= self.end_time
            && self.tags.windows(2).all(|w| w[0].time <= w[1].time)
            && self
                .tags
                .iter()
                .all(|t| t.time >= self.begin_time && t.time < self.end_time)
    }
}

/// Position of an epoch in the frame/line/pixel hierarchy.
///
/// `-1` in a component means that no epoch of that level has begun yet
/// inside the enclosing epoch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EpochCoordinate {
    pub frame: i64,
    pub line: i64,
    pub pixel: i64,
}

impl EpochCoordinate {
    /// Coordinate used by measurements without boundary channels
    pub const FLAT: EpochCoordinate = EpochCoordinate {
        frame: 0,
        line: 0,
        pixel: 0,
    };

    pub fn new(frame: i64, line: i64, pixel: i64) -> Self {
        Self { frame, line, pixel }
    }
}

impl PartialOrd for EpochCoordinate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EpochCoordinate {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.frame, self.line, self.pixel).cmp(&(other.frame, other.line, other.pixel))
    }
}

impl fmt::Display for EpochCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.frame, self.line, self.pixel)
    }
}
