use crate::cli::ProbeArgs;
use crate::commands::exit_code_for;
use crate::exit_codes;
use crate::output;
use std::sync::Arc;
use std::time::Duration;
use tagstream::{probe_transfer_rate, ProbeConfig, TransferRateReport, VirtualTagger, VirtualTaggerConfig};

pub async fn execute(args: ProbeArgs) -> i32 {
    let tagger_config = VirtualTaggerConfig {
        model: args.tagger.model.into(),
        serial: None,
        n_channels: args.tagger.inputs,
        batch_period: Duration::from_millis(args.tagger.batch_period_ms),
        max_rate: args.tagger.max_rate,
    };
    let probe_config = ProbeConfig {
        integration: Duration::from_millis(args.integration_ms),
        samples: args.samples,
        n_channels: args.channels,
        min_rate: args.min_rate,
        ..ProbeConfig::default()
    };

    eprintln!(
        "Probing transfer rate: {} channels, {} x {} ms samples",
        probe_config.n_channels, probe_config.samples, args.integration_ms
    );

    let outcome = tokio::task::spawn_blocking(move || -> tagstream::Result<TransferRateReport> {
        let tagger = Arc::new(VirtualTagger::new(tagger_config)?);
        let report = probe_transfer_rate(tagger.clone(), &probe_config);
        tagger.shutdown();
        report
    })
    .await;

    let report = match outcome {
        Ok(Ok(report)) => report,
        Ok(Err(e)) => {
            eprintln!("Error: {}", e);
            return exit_code_for(&e);
        }
        Err(e) => {
            eprintln!("Error: probe task failed: {}", e);
            return exit_codes::EXECUTION_ERROR;
        }
    };

    eprintln!(
        "Transfer rate: {:.3} Mtags/s (overflows: {})",
        report.transfer_rate / 1e6,
        report.overflows
    );

    output::emit(&report, args.compact, args.output.as_deref())
}
