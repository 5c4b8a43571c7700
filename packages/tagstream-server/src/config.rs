use std::env;
use std::time::Duration;
use tagstream::VirtualTaggerConfig;

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
    /// Bind address (0.0.0.0 for LAN, 127.0.0.1 for localhost)
    pub bind_addr: String,
    /// Delivery period of every tagger created through the API
    pub batch_period: Duration,
    /// Transfer capacity of every tagger, in tags per second
    pub max_rate: f64,
    /// Maximum number of taggers alive at the same time
    pub max_taggers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let tagger = VirtualTaggerConfig::default();
        Self {
            port: 23000,
            bind_addr: "127.0.0.1".to_string(),
            batch_period: tagger.batch_period,
            max_rate: tagger.max_rate,
            max_taggers: 8,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let port = match lookup("TAGSTREAM_PORT") {
            Some(v) => v.parse().map_err(|_| ConfigError::InvalidPort)?,
            None => defaults.port,
        };

        let batch_period = match lookup("TAGSTREAM_BATCH_PERIOD_MS") {
            Some(v) => {
                let ms: u64 = v.parse().map_err(|_| {
                    ConfigError::InvalidValue(format!("TAGSTREAM_BATCH_PERIOD_MS={}", v))
                })?;
                if ms == 0 {
                    return Err(ConfigError::InvalidValue(
                        "TAGSTREAM_BATCH_PERIOD_MS must be positive".to_string(),
                    ));
                }
                Duration::from_millis(ms)
            }
            None => defaults.batch_period,
        };

        let max_rate = match lookup("TAGSTREAM_MAX_RATE") {
            Some(v) => {
                let rate: f64 = v
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(format!("TAGSTREAM_MAX_RATE={}", v)))?;
                if !rate.is_finite() || rate <= 0.0 {
                    return Err(ConfigError::InvalidValue(
                        "TAGSTREAM_MAX_RATE must be a positive rate".to_string(),
                    ));
                }
                rate
            }
            None => defaults.max_rate,
        };

        let max_taggers = match lookup("TAGSTREAM_MAX_TAGGERS") {
            Some(v) => v
                .parse()
                .map_err(|_| ConfigError::InvalidValue(format!("TAGSTREAM_MAX_TAGGERS={}", v)))?,
            None => defaults.max_taggers,
        };

        Ok(Self {
            port,
            bind_addr: lookup("TAGSTREAM_BIND_ADDR").unwrap_or(defaults.bind_addr),
            batch_period,
            max_rate,
            max_taggers,
        })
    }

    /// Get the full bind address (addr:port)
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    /// Check if the server is configured for LAN access
    pub fn is_lan_mode(&self) -> bool {
        self.bind_addr == "0.0.0.0"
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid port number")]
    InvalidPort,
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}
