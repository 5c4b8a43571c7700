use clap::{Args, Parser, Subcommand, ValueEnum};
use tagstream::{BoundaryChannels, Channel, ChannelEdge, OutsidePolicy, TaggerModel};

#[derive(Parser)]
#[command(
    name = "tagstream",
    version,
    about = "Time-tag stream tools: transfer-rate probe, FLIM histograms, channel listing",
    long_about = "Partition and accumulate time-tag streams.\n\
                  Runs against a software time tagger; recorded streams are read \
                  from `channel,time` CSV tag files."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Measure the sustained transfer rate of a tagger
    Probe(ProbeArgs),
    /// Accumulate a FLIM histogram from a tag file
    Flim(FlimArgs),
    /// List the input channels of a tagger
    Channels(ChannelsArgs),
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ModelArg {
    Ultra,
    Twenty,
    Virtual,
}

impl From<ModelArg> for TaggerModel {
    fn from(model: ModelArg) -> Self {
        match model {
            ModelArg::Ultra => TaggerModel::Ultra,
            ModelArg::Twenty => TaggerModel::Twenty,
            ModelArg::Virtual => TaggerModel::Virtual,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum EdgeArg {
    Rising,
    Falling,
    All,
}

impl From<EdgeArg> for ChannelEdge {
    fn from(edge: EdgeArg) -> Self {
        match edge {
            EdgeArg::Rising => ChannelEdge::Rising,
            EdgeArg::Falling => ChannelEdge::Falling,
            EdgeArg::All => ChannelEdge::All,
        }
    }
}

#[derive(Args)]
pub struct TaggerArgs {
    /// Tagger model to emulate
    #[arg(long, value_enum, default_value_t = ModelArg::Virtual)]
    pub model: ModelArg,

    /// Number of physical inputs
    #[arg(long, default_value_t = 8)]
    pub inputs: u32,

    /// Transfer capacity in tags per second
    #[arg(long, env = "TAGSTREAM_MAX_RATE", default_value_t = 20e6)]
    pub max_rate: f64,

    /// Batch delivery period in milliseconds
    #[arg(long, default_value_t = 10)]
    pub batch_period_ms: u64,
}

#[derive(Args)]
pub struct ProbeArgs {
    #[command(flatten)]
    pub tagger: TaggerArgs,

    /// Number of inputs driven by the test signal
    #[arg(long, default_value_t = 3)]
    pub channels: usize,

    /// Sampling window per rate sample, in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub integration_ms: u64,

    /// Number of rate samples
    #[arg(long, default_value_t = 10)]
    pub samples: usize,

    /// Requested aggregate event rate (default depends on the model)
    #[arg(long)]
    pub min_rate: Option<f64>,

    /// Output file (default: stdout)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Compact JSON output (no indentation)
    #[arg(long, default_value_t = false)]
    pub compact: bool,
}

#[derive(Args)]
pub struct FlimArgs {
    /// Tag file (`channel,time` CSV)
    #[arg(long)]
    pub file: String,

    /// Photon detection channel
    #[arg(long, allow_negative_numbers = true)]
    pub click: Channel,

    /// Laser sync channel used as bin reference
    #[arg(long, allow_negative_numbers = true)]
    pub start_channel: Option<Channel>,

    #[arg(long, allow_negative_numbers = true)]
    pub frame_begin: Option<Channel>,

    #[arg(long, allow_negative_numbers = true)]
    pub line_begin: Option<Channel>,

    #[arg(long, allow_negative_numbers = true)]
    pub line_end: Option<Channel>,

    #[arg(long, allow_negative_numbers = true)]
    pub pixel_begin: Channel,

    #[arg(long, allow_negative_numbers = true)]
    pub pixel_end: Option<Channel>,

    #[arg(long)]
    pub n_pixels: usize,

    #[arg(long)]
    pub n_bins: usize,

    /// Bin width in picoseconds
    #[arg(long)]
    pub binwidth: i64,

    /// Pixels per line, required with line boundaries
    #[arg(long)]
    pub pixels_per_line: Option<usize>,

    /// Keep tags that precede the first pixel under a -1 coordinate
    #[arg(long, default_value_t = false)]
    pub attribute_outside: bool,

    /// Include the full per-pixel histogram in the output
    #[arg(long, default_value_t = false)]
    pub histogram: bool,

    /// Output file (default: stdout)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Compact JSON output (no indentation)
    #[arg(long, default_value_t = false)]
    pub compact: bool,
}

impl FlimArgs {
    pub fn boundaries(&self) -> BoundaryChannels {
        BoundaryChannels {
            frame_begin: self.frame_begin,
            line_begin: self.line_begin,
            line_end: self.line_end,
            pixel_begin: Some(self.pixel_begin),
            pixel_end: self.pixel_end,
        }
    }

    pub fn outside_policy(&self) -> OutsidePolicy {
        if self.attribute_outside {
            OutsidePolicy::Attribute
        } else {
            OutsidePolicy::Discard
        }
    }
}

#[derive(Args)]
pub struct ChannelsArgs {
    #[arg(long, value_enum, default_value_t = EdgeArg::All)]
    pub edge: EdgeArg,

    /// Number of physical inputs
    #[arg(long, default_value_t = 8)]
    pub inputs: u32,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}
