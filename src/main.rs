//! Person location - fuses device trackers into one location per person
//!
//! Module structure:
//! - `domain/` - Core types (TrackerEvent, PersonRecord, PresenceStatus)
//! - `io/` - External interfaces (MQTT, HTTP, geocode/route providers)
//! - `services/` - Business logic (acceptance, presence, throttle, coordinator)
//! - `infra/` - Infrastructure (Config, Metrics, Broker)

use chrono::Utc;
use clap::Parser;
use person_location::infra::{Config, Metrics};
use person_location::io::{
    build_collaborators, create_egress_channel, start_http_server, HttpState, IntegrationPayload,
    MqttPublisher,
};
use person_location::services::{FusionCoordinator, GeocodeThrottle, PersonRegistry};
use std::sync::Arc;
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Person location - home/away presence and geocoded location per person
#[derive(Parser, Debug)]
#[command(name = "person-location", version, about)]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE or config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::new(Rfc3339))
        .with_target(false)
        .init();

    info!(git_hash = env!("GIT_HASH"), "person-location starting");

    let args = Args::parse();
    let config = match args.config.as_deref() {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load(&[])?,
    };

    if config.broker_enabled() {
        person_location::infra::broker::start_embedded_broker(&config)?;
    }

    info!(
        config_file = %config.config_file(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        trigger_topic = %config.mqtt_trigger_topic(),
        platform = %config.output_platform(),
        persons = config.persons().len(),
        zones = config.zones().len(),
        route_source = %config.distance_duration_source(),
        geocode_enabled = config.geocode_enabled(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Create shared components
    let metrics = Arc::new(Metrics::new());
    let registry = Arc::new(PersonRegistry::new(config.output_platform()));
    let throttle = Arc::new(GeocodeThrottle::new(config.geocode_enabled(), metrics.clone()));
    let collaborators = build_collaborators(&config)?;

    // Create MQTT egress channel and publisher (if enabled)
    let egress_sender = if config.mqtt_egress_enabled() {
        let (egress_sender, egress_rx) = create_egress_channel(1000, metrics.clone());

        let publisher = MqttPublisher::new(&config, egress_rx);
        let publisher_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            publisher.run(publisher_shutdown).await;
        });

        // Integration status on its own interval
        let integration_egress = egress_sender.clone();
        let integration_metrics = metrics.clone();
        let integration_registry = registry.clone();
        let integration_throttle = throttle.clone();
        let egress_interval = config.mqtt_egress_metrics_interval_secs();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(egress_interval));
            loop {
                interval.tick().await;
                let summary = integration_metrics.report(integration_registry.len());
                integration_egress.send_integration(IntegrationPayload::from_summary(
                    &summary,
                    integration_throttle.is_active(),
                    Utc::now(),
                ));
            }
        });

        Some(egress_sender)
    } else {
        None
    };

    // Create command channel (bounded for backpressure)
    let (command_tx, command_rx) = mpsc::channel(1000);

    // Start MQTT client
    let mqtt_config = config.clone();
    let mqtt_tx = command_tx.clone();
    let mqtt_metrics = metrics.clone();
    let mqtt_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) =
            person_location::io::mqtt::start_mqtt_client(&mqtt_config, mqtt_tx, mqtt_metrics, mqtt_shutdown)
                .await
        {
            tracing::error!(error = %e, "MQTT client error");
        }
    });

    // Start HTTP control/metrics server
    if config.http_enabled() {
        let http_state = HttpState {
            metrics: metrics.clone(),
            registry: registry.clone(),
            throttle: throttle.clone(),
            command_tx,
        };
        let http_port = config.http_port();
        let http_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = start_http_server(http_port, http_state, http_shutdown).await {
                tracing::error!(error = %e, "HTTP server error");
            }
        });
    } else {
        drop(command_tx);
    }

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_registry = registry.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report(metrics_registry.len()).log();
        }
    });

    let coordinator = Arc::new(FusionCoordinator::new(
        config,
        registry,
        throttle,
        collaborators,
        metrics,
        egress_sender,
    ));
    coordinator.register_configured_persons(Utc::now());
    info!("coordinator_started");

    // Stop on Ctrl+C; the coordinator stops once its producers are gone
    let mut coordinator_task = tokio::spawn(coordinator.run(command_rx));
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown_signal_received");
            let _ = shutdown_tx.send(true);
            // Let the egress publisher drain
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
        _ = &mut coordinator_task => {
            let _ = shutdown_tx.send(true);
        }
    }

    info!("person-location shutdown complete");
    Ok(())
}
