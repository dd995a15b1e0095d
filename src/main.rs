use log::{error, info, warn};
use std::error::Error;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use saci_ingest::config::AppConfig;
use saci_ingest::ingest::{probe, ExitReason, IngestLoop, ProbeOutcome};
use saci_ingest::prediction::ClassifierHandle;
use saci_ingest::report::{JsonLinesSink, LogSink, ReportSink};
use saci_ingest::serial::{
    Connector, ReadingParser, ReplayConnector, SerialConnector, SerialLink,
};
use saci_ingest::utils::format_reading;

async fn run_ingestion<C: Connector>(
    connector: C,
    config: AppConfig,
    model: ClassifierHandle,
    sink: impl ReportSink,
    stop: &CancellationToken,
) -> Result<(), Box<dyn Error>> {
    let parser = ReadingParser::new(config.protocol.clone());
    let mut link = SerialLink::new(connector);

    // Optional connection test before ingesting
    if let Some(window) = config.probe_window {
        link.connect(config.link.clone()).await?;
        match probe(&mut link, &parser, window).await? {
            ProbeOutcome::Parsed(reading) => info!("Probe reading: {}", format_reading(&reading)),
            ProbeOutcome::NoData => warn!(
                "Check device power, port ({}) and baud rate ({})",
                config.link.port, config.link.baud_rate
            ),
            ProbeOutcome::Unrecognized { .. } => {
                warn!("Check the sensor node firmware output format")
            }
        }
        link.disconnect();
    }

    let mut ingest = IngestLoop::new(
        link,
        parser,
        model,
        sink,
        config.reconnect,
        config.ingest.clone(),
    );

    info!("Starting real-time fire risk prediction loop. Press Ctrl+C to stop.");
    let summary = ingest.run(config.link.clone(), stop).await;

    match summary.exit {
        ExitReason::ReconnectExhausted => {
            Err("serial link lost and reconnect attempts exhausted".into())
        }
        ExitReason::Stopped | ExitReason::EndOfStream => Ok(()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();

    info!("--- SACI Ingestion Service Starting ---");

    // Load configuration
    let mut config = match AppConfig::new() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Load the classifier; without one, readings are still parsed and reported
    let model = match &config.model_path {
        Some(path) => match ClassifierHandle::load(path) {
            Ok(model) => model,
            Err(e) => {
                error!("Could not load ML model from '{}': {}", path.display(), e);
                return Err(e.into());
            }
        },
        None => {
            warn!("SACI_MODEL_PATH not set; readings will not be classified");
            ClassifierHandle::unloaded()
        }
    };

    let output = match &config.output_file {
        Some(path) => match JsonLinesSink::open(path) {
            Ok(sink) => Some(sink),
            Err(e) => {
                error!(
                    "Failed to open output file '{}': {}. Data will not be logged to file.",
                    path.display(),
                    e
                );
                None
            }
        },
        None => None,
    };
    let sink = (LogSink, output);

    // Handle Ctrl+C gracefully
    let stop = CancellationToken::new();
    let ctrl_c = stop.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Ctrl+C received. Initiating graceful shutdown...");
        ctrl_c.cancel();
    });

    let result = match config.replay_file.clone() {
        Some(path) => {
            info!("Replaying device output from {}", path.display());
            // A file has no device to wait for
            config.link.settle_delay = Duration::ZERO;
            run_ingestion(ReplayConnector::new(path), config, model, sink, &stop).await
        }
        None => {
            info!(
                "Initializing serial reader for port {} at {} baud",
                config.link.port, config.link.baud_rate
            );
            run_ingestion(SerialConnector, config, model, sink, &stop).await
        }
    };

    match &result {
        Ok(()) => info!("Application stopped."),
        Err(e) => error!("Fatal error: {}", e),
    }
    result
}
