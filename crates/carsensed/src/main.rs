//! carsensed - Vehicle Diagnostics Daemon
//!
//! Polls a vehicle diagnostic bus, buffers telemetry durably, scores it for
//! anomalies and retrains the baseline from user feedback.
//!
//! Usage:
//!   carsensed [config.toml]
//!
//! If no config file is provided, uses a mock transport for demo purposes.

use std::sync::Arc;
use std::time::Duration;

use carsense_core::config::{
    EngineConfig, MockTransportConfig, PidSpec, PollClass, TransportConfig,
};
use carsense_core::model::{AnomalyEvent, ParameterReading, ProtocolFamily, TelemetryRecord};
use carsense_core::sink::{SinkError, TelemetrySink};
use carsense_ml::{spawn_scoring, spawn_trainer, AnomalyEngine, FeedbackStore, ModelRegistry};
use carsense_telemetry::{spawn_drain, spawn_worker, OfflineBuffer};
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Parsed command-line arguments
struct Args {
    /// Engine config file (TOML)
    config_path: Option<String>,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut result = Args { config_path: None };

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            arg if !arg.starts_with('-') => {
                // Positional argument = config file
                result.config_path = Some(arg.to_string());
                i += 1;
            }
            _ => {
                tracing::warn!("Unknown argument: {}", args[i]);
                i += 1;
            }
        }
    }

    result
}

fn print_help() {
    eprintln!(
        r#"carsensed - Vehicle Diagnostics Daemon

Usage: carsensed [config.toml]

Options:
  -h, --help    Print this help message

Examples:
  # Run against the built-in mock adapter
  carsensed

  # Run with a config file (see config.example.toml)
  carsensed config.toml
"#
    );
}

/// Sink that logs delivered telemetry; stands in for a real gateway
struct LogSink;

#[async_trait::async_trait]
impl TelemetrySink for LogSink {
    async fn publish_reading(&self, reading: &ParameterReading) -> Result<(), SinkError> {
        tracing::info!(
            parameter = %reading.parameter_id,
            value = reading.value,
            unit = %reading.unit,
            sequence = reading.sequence,
            "reading"
        );
        Ok(())
    }

    async fn publish_event(&self, event: &AnomalyEvent) -> Result<(), SinkError> {
        tracing::warn!(
            event_id = %event.event_id,
            score = event.score,
            severity = ?event.severity,
            features = ?event.contributing_features,
            "anomaly event"
        );
        Ok(())
    }

    async fn gap_detected(&self, from_seq: u64, to_seq: u64) {
        tracing::warn!(from_seq, to_seq, "sequence gap in delivered telemetry");
    }
}

/// Demo configuration: mock adapter with the parameters it answers
fn demo_config() -> EngineConfig {
    EngineConfig {
        transport: TransportConfig::Mock(MockTransportConfig { latency_ms: 10 }),
        protocol: ProtocolFamily::Obd2,
        session: Default::default(),
        parameters: vec![
            PidSpec {
                id: "coolant_temp".to_string(),
                name: "Engine Coolant Temperature".to_string(),
                pid: 0x05,
                unit: "°C".to_string(),
                scale: 1.0,
                offset: -40.0,
                min: -40.0,
                max: 215.0,
                class: PollClass::Safety,
            },
            PidSpec {
                id: "engine_rpm".to_string(),
                name: "Engine RPM".to_string(),
                pid: 0x0C,
                unit: "rpm".to_string(),
                scale: 0.25,
                offset: 0.0,
                min: 0.0,
                max: 8000.0,
                class: PollClass::Safety,
            },
        ],
        telemetry: Default::default(),
        anomaly: Default::default(),
    }
}

fn load_config(path: &str) -> anyhow::Result<EngineConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: EngineConfig = toml::from_str(&content)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "carsensed=info,carsense_link=info,carsense_telemetry=info,carsense_ml=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting carsensed (Vehicle Diagnostics Daemon)");

    let args = parse_args();
    let config = if let Some(ref path) = args.config_path {
        tracing::info!("Loading config from: {}", path);
        load_config(path)?
    } else {
        tracing::info!("No config file provided, using mock transport");
        demo_config()
    };
    tracing::info!(
        transport = %config.transport.descriptor(),
        protocol = %config.protocol,
        parameters = config.parameters.len(),
        "engine configured"
    );

    // Durable stores
    let buffer = Arc::new(OfflineBuffer::open(
        &config.telemetry.buffer_path,
        config.telemetry.buffer_capacity,
    )?);
    let registry = Arc::new(ModelRegistry::open(
        &config.anomaly.model_path,
        config.anomaly.drift_tolerance,
    )?);
    let feedback = Arc::new(FeedbackStore::open(&config.anomaly.feedback_path)?);
    let engine = Arc::new(AnomalyEngine::new(
        config.anomaly.clone(),
        registry,
        feedback,
    ));

    // Wiring between the pipeline stages
    let (readings_tx, readings_rx) = broadcast::channel(256);
    let (events_tx, mut events_rx) = mpsc::channel::<AnomalyEvent>(64);

    let sink: Arc<dyn TelemetrySink> = Arc::new(LogSink);
    let drain = spawn_drain(
        buffer.clone(),
        sink,
        config.telemetry.drain_batch,
        Duration::from_millis(config.telemetry.drain_interval_ms),
    );
    let scoring = spawn_scoring(engine.clone(), readings_rx, events_tx);
    let trainer = spawn_trainer(engine.clone());

    // Raised events join the same durable buffer as readings
    let event_buffer = buffer.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            if let Err(e) = event_buffer.append(TelemetryRecord::Event(event)) {
                tracing::warn!(%e, "failed to buffer anomaly event");
            }
        }
    });

    let worker = spawn_worker(config.clone(), buffer.clone(), readings_tx);
    match worker.connect().await {
        Ok(info) => tracing::info!(
            session_id = %info.session_id,
            descriptor = %info.descriptor,
            "session established"
        ),
        Err(e) => tracing::warn!(%e, "initial connect failed, daemon idle until restart"),
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    worker.shutdown().await;
    scoring.abort();
    trainer.abort();
    forwarder.abort();
    drain.abort();

    tracing::info!(
        buffered = buffer.len(),
        evicted = buffer.evicted_total(),
        "carsensed stopped"
    );
    Ok(())
}
