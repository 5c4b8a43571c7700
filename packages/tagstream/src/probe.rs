// Transfer-rate probe
//
// Drives the test signal on a few inputs hard enough to exceed the expected
// transfer capacity, then samples a counter measurement to find the rate at
// which tags actually arrive.

use crate::error::{Result, TagStreamError};
use crate::measurement::Measurement;
use crate::tagger::{TimeTagger, FIRST_VIRTUAL_CHANNEL, TEST_SIGNAL_FREQUENCY};
use crate::types::{Channel, ChannelEdge};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Sampling window of one rate sample
    pub integration: Duration,
    pub samples: usize,
    /// Number of inputs driven by the test signal
    pub n_channels: usize,
    /// Aggregate event rate to request; defaults to the model's probe rate
    pub min_rate: Option<f64>,
    pub sync_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            integration: Duration::from_secs(1),
            samples: 10,
            n_channels: 3,
            min_rate: None,
            sync_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRateReport {
    /// Median of `transfer_rates`, tags per second
    pub transfer_rate: f64,
    pub transfer_rates: Vec<f64>,
    pub overflows: u64,
    pub channels: Vec<Channel>,
    pub divider: u32,
}

/// Test-signal divider that makes `n_channels` inputs produce at least
/// `min_rate` events per second
pub fn probe_divider(default_divider: u32, min_rate: f64, n_channels: usize) -> Result<u32> {
    if min_rate.is_nan() || min_rate <= 0.0 {
        return Err(TagStreamError::InvalidParameter(format!(
            "min_rate must be positive, got {}",
            min_rate
        )));
    }
    let divider =
        (default_divider as f64 * TEST_SIGNAL_FREQUENCY / min_rate * n_channels as f64).floor();
    if divider < 1.0 {
        return Err(TagStreamError::ConfigurationImpossible(format!(
            "{} channels cannot reach {:.0} events/s (divider would be {})",
            n_channels, min_rate, divider
        )));
    }
    Ok(divider as u32)
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    Some(sorted[sorted.len() / 2])
}

pub fn probe_transfer_rate(
    tagger: Arc<dyn TimeTagger>,
    config: &ProbeConfig,
) -> Result<TransferRateReport> {
    if config.samples == 0 || config.n_channels == 0 {
        return Err(TagStreamError::InvalidParameter(
            "samples and n_channels must be positive".to_string(),
        ));
    }

    let model = tagger.model();
    let min_rate = config.min_rate.unwrap_or_else(|| model.probe_min_rate());
    let divider = probe_divider(model.default_divider(), min_rate, config.n_channels)?;

    let inputs: Vec<Channel> = tagger
        .get_channel_list(ChannelEdge::All)
        .into_iter()
        .filter(|c| c.abs() < FIRST_VIRTUAL_CHANNEL)
        .collect();
    let channels: Vec<Channel> = inputs
        .iter()
        .copied()
        .filter(|&c| c > 0)
        .take(config.n_channels)
        .collect();
    if channels.len() < config.n_channels {
        return Err(TagStreamError::ConfigurationImpossible(format!(
            "probe needs {} inputs, tagger has {}",
            config.n_channels,
            channels.len()
        )));
    }

    tagger.set_test_signal(&inputs, false)?;
    for &ch in &inputs {
        tagger.set_input_delay(ch, 0)?;
    }

    log::info!(
        "Probing {} ({}): channels {:?}, divider {}",
        tagger.serial(),
        model,
        channels,
        divider
    );

    tagger.set_test_signal_divider(divider)?;
    tagger.set_test_signal(&channels, true)?;

    let result = sample_rates(Arc::clone(&tagger), &channels, config);

    if let Err(e) = tagger
        .set_test_signal(&channels, false)
        .and_then(|_| tagger.set_test_signal_divider(model.default_divider()))
    {
        log::warn!("Failed to restore test signal settings: {}", e);
    }

    let (transfer_rates, overflows) = result?;
    let transfer_rate = median(&transfer_rates).unwrap_or(0.0);

    if overflows == 0 {
        log::warn!(
            "No overflows during the probe; {:.3} Mtags/s is a lower bound of the transfer rate",
            transfer_rate / 1e6
        );
    }

    Ok(TransferRateReport {
        transfer_rate,
        transfer_rates,
        overflows,
        channels,
        divider,
    })
}

fn sample_rates(
    tagger: Arc<dyn TimeTagger>,
    channels: &[Channel],
    config: &ProbeConfig,
) -> Result<(Vec<f64>, u64)> {
    let counter = Measurement::counter(Arc::clone(&tagger), channels)?;
    counter.start();
    tagger.sync(config.sync_timeout)?;
    tagger.clear_overflows();

    let mut rates = Vec::with_capacity(config.samples);
    let mut last_count = counter.snapshot().data;
    let mut last_time = Instant::now();

    for i in 0..config.samples {
        thread::sleep(config.integration);

        let count = counter.snapshot().data;
        let now = Instant::now();
        let rate = (count - last_count) as f64 / now.duration_since(last_time).as_secs_f64();
        log::info!(
            "Sample {}/{}: {:.3} Mtags/s",
            i + 1,
            config.samples,
            rate / 1e6
        );

        rates.push(rate);
        last_count = count;
        last_time = now;
    }

    counter.stop();
    Ok((rates, tagger.get_overflows()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divider_for_default_models() {
        // 63 * 800e3 / 100e6 * 3 = 1.512
        assert_eq!(probe_divider(63, 100e6, 3).unwrap(), 1);
        // 74 * 800e3 / 10e6 * 3 = 17.76
        assert_eq!(probe_divider(74, 10e6, 3).unwrap(), 17);
    }

    #[test]
    fn test_unreachable_rate_is_configuration_impossible() {
        assert!(matches!(
            probe_divider(63, 1e9, 3),
            Err(TagStreamError::ConfigurationImpossible(_))
        ));
        assert!(matches!(
            probe_divider(63, 0.0, 3),
            Err(TagStreamError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_median_takes_upper_middle() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(3.0));
        assert_eq!(median(&[]), None);
    }
}
