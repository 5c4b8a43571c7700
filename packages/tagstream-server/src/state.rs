use std::time::Instant;
use tagstream::{
    DelayedChannel, HandleRegistry, MeasurementControl, VirtualTagger, VirtualTaggerConfig,
};

use crate::config::ServerConfig;

/// Main server state shared across all handlers
pub struct ServerState {
    pub config: ServerConfig,
    pub taggers: HandleRegistry<VirtualTagger>,
    pub channels: HandleRegistry<DelayedChannel>,
    pub measurements: HandleRegistry<dyn MeasurementControl>,
    pub start_time: Instant,
}

impl ServerState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            taggers: HandleRegistry::with_capacity(config.max_taggers),
            channels: HandleRegistry::new(),
            measurements: HandleRegistry::new(),
            config,
            start_time: Instant::now(),
        }
    }

    /// Tagger settings derived from the server configuration
    pub fn tagger_config(&self) -> VirtualTaggerConfig {
        VirtualTaggerConfig {
            batch_period: self.config.batch_period,
            max_rate: self.config.max_rate,
            ..VirtualTaggerConfig::default()
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Free every registered instance, measurements first
    pub fn shutdown(&self) {
        let measurements = self.measurements.drain();
        for (_, measurement) in &measurements {
            measurement.stop();
        }
        drop(measurements);
        drop(self.channels.drain());
        for (handle, tagger) in self.taggers.drain() {
            tracing::debug!("Shutting down tagger {}", handle);
            tagger.shutdown();
        }
    }
}
