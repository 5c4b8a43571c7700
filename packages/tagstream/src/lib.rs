pub mod accumulator;
pub mod error;
pub mod measurement;
pub mod partition;
pub mod probe;
pub mod registry;
pub mod tagger;
pub mod types;

pub use accumulator::{
    AccumulationStrategy, Correlation, CorrelationConfig, Counter, FlimConfig, FlimHistogram,
    FlimSnapshot,
};
pub use error::{Result, TagStreamError};
pub use measurement::{EpochStatus, Measurement, MeasurementControl, MeasurementSnapshot, RunState};
pub use partition::{BoundaryChannels, EpochPartitioner, OutsidePolicy, Partition};
pub use probe::{probe_transfer_rate, ProbeConfig, TransferRateReport};
pub use registry::{Handle, HandleRegistry};
pub use tagger::{
    read_tag_file, write_tag_file, BatchSink, DelayedChannel, TaggerModel, TimeTagger,
    VirtualTagger, VirtualTaggerConfig,
};
pub use types::*;
