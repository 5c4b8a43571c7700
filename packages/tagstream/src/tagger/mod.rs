// Tag sources and acquisition control
//
// `TimeTagger` is the control surface a measurement needs from the hardware
// layer. `VirtualTagger` is the software implementation: a delivery thread
// that synthesizes test-signal edges or replays recorded tags.

mod delayed;
mod replay;
mod virtual_tagger;

use crate::error::Result;
use crate::types::{Channel, ChannelEdge, TagBatch, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Weak;
use std::time::Duration;

pub use delayed::DelayedChannel;
pub use replay::{read_tag_file, write_tag_file};
pub use virtual_tagger::{VirtualTagger, VirtualTaggerConfig, FIRST_VIRTUAL_CHANNEL};

/// Test-signal frequency at the default divider of every model
pub const TEST_SIGNAL_FREQUENCY: f64 = 800e3;

/// Receiver of delivered batches, called from the delivery thread
pub trait BatchSink: Send + Sync {
    fn on_batch(&self, batch: &TagBatch);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaggerModel {
    Ultra,
    Twenty,
    #[default]
    Virtual,
}

impl TaggerModel {
    /// Divider that yields `TEST_SIGNAL_FREQUENCY`
    pub fn default_divider(&self) -> u32 {
        match self {
            TaggerModel::Ultra => 63,
            TaggerModel::Twenty | TaggerModel::Virtual => 74,
        }
    }

    /// Test-signal base clock in Hz
    pub fn base_frequency(&self) -> f64 {
        self.default_divider() as f64 * TEST_SIGNAL_FREQUENCY
    }

    /// Lowest aggregate event rate a transfer-rate probe should request
    pub fn probe_min_rate(&self) -> f64 {
        match self {
            TaggerModel::Ultra => 100e6,
            TaggerModel::Twenty | TaggerModel::Virtual => 10e6,
        }
    }
}

impl fmt::Display for TaggerModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaggerModel::Ultra => "Time Tagger Ultra",
            TaggerModel::Twenty => "Time Tagger 20",
            TaggerModel::Virtual => "Time Tagger Virtual",
        };
        f.write_str(name)
    }
}

/// Acquisition control of a tag source
pub trait TimeTagger: Send + Sync {
    fn model(&self) -> TaggerModel;

    fn serial(&self) -> String;

    fn set_test_signal(&self, channels: &[Channel], enabled: bool) -> Result<()>;

    /// Whether the test signal drives `channel`; both edges share one input
    fn test_signal(&self, channel: Channel) -> Result<bool>;

    fn set_input_delay(&self, channel: Channel, delay: Timestamp) -> Result<()>;

    fn input_delay(&self, channel: Channel) -> Result<Timestamp>;

    fn set_test_signal_divider(&self, divider: u32) -> Result<()>;

    fn test_signal_divider(&self) -> u32;

    fn get_channel_list(&self, edge: ChannelEdge) -> Vec<Channel>;

    /// Wait until a batch generated after this call has been delivered
    fn sync(&self, timeout: Duration) -> Result<()>;

    fn clear_overflows(&self);

    fn get_overflows(&self) -> u64;

    /// Deliver batches restricted to `channels` to `sink` until unsubscribed
    /// or until the sink is dropped
    fn subscribe(&self, channels: &[Channel], sink: Weak<dyn BatchSink>) -> Result<SubscriptionId>;

    fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;
}
