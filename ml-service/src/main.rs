use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ml_service::config::{self, ServiceConfig};
use ml_service::{KafkaPredictionPublisher, KafkaTickReader, Relay, TickSource};
use signal_generation::ThresholdModel;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    if let Some(arg) = args.next() {
        if arg == "--write-config" {
            let path = args.next().unwrap_or_else(|| config::DEFAULT_CONFIG_PATH.to_string());
            config::write_config_template(&path)?;
            info!("Wrote configuration template to {}", path);
            return Ok(());
        }
    }

    info!("🚀 Starting ML Prediction Service");

    let config = ServiceConfig::load(None).context("Failed to load configuration")?;
    info!(
        "Brokers: {} | {} -> {} | group: {}",
        config.kafka.brokers, config.kafka.input_topic, config.kafka.output_topic, config.kafka.group_id
    );

    let mut reader = KafkaTickReader::connect(&config.kafka)
        .await
        .context("Failed to connect Kafka consumer")?;
    let publisher = match KafkaPredictionPublisher::connect(&config.kafka).await {
        Ok(publisher) => publisher,
        Err(e) => {
            reader.close().await;
            return Err(e).context("Failed to connect Kafka producer");
        }
    };

    let model = ThresholdModel::new(config.model.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("👋 Shutting down gracefully...");
        let _ = shutdown_tx.send(true);
    });

    let stats = Relay::new(reader, model, publisher, config.relay.clone())
        .run(shutdown_rx)
        .await
        .context("Relay stopped on error")?;

    info!("Published {} predictions from {} ticks", stats.published, stats.received);
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
