//! Embedded MQTT broker using rumqttd
//!
//! Lets a single-host install run without an external broker: the host
//! platform and this process both connect to it.

use crate::infra::config::Config as AppConfig;
use anyhow::Context;
use rumqttd::{Broker, Config, ConnectionSettings, RouterConfig, ServerSettings};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

/// Retained person states are small; a handful of clients connect
const MAX_CONNECTIONS: usize = 64;
const MAX_PAYLOAD_SIZE: usize = 65536;

fn listen_address(app_config: &AppConfig) -> anyhow::Result<SocketAddr> {
    let addr = format!("{}:{}", app_config.broker_bind_address(), app_config.broker_port());
    addr.parse()
        .with_context(|| format!("invalid broker bind address {}", addr))
}

fn broker_config(listen: SocketAddr) -> Config {
    let router = RouterConfig {
        max_segment_size: 10 * 1024 * 1024,
        max_segment_count: 10,
        max_connections: MAX_CONNECTIONS,
        max_outgoing_packet_count: 200,
        initialized_filters: None,
        ..Default::default()
    };

    let mut servers = HashMap::new();
    servers.insert(
        "v4".to_string(),
        ServerSettings {
            name: "v4".to_string(),
            listen,
            tls: None,
            next_connection_delay_ms: 1,
            connections: ConnectionSettings {
                connection_timeout_ms: 5000,
                max_payload_size: MAX_PAYLOAD_SIZE,
                max_inflight_count: 100,
                auth: None,
                dynamic_filters: false,
                external_auth: None,
            },
        },
    );

    Config {
        id: 0,
        router,
        v4: Some(servers),
        v5: None,
        ws: None,
        prometheus: None,
        metrics: None,
        bridge: None,
        console: None,
        cluster: None,
    }
}

/// Start the embedded broker on its own thread
///
/// `Broker::start` blocks, so the broker thread lives for the process.
pub fn start_embedded_broker(app_config: &AppConfig) -> anyhow::Result<()> {
    let listen = listen_address(app_config)?;
    let config = broker_config(listen);

    thread::Builder::new()
        .name("mqtt-broker".into())
        .spawn(move || {
            let mut broker = Broker::new(config);
            if let Err(e) = broker.start() {
                warn!(error = %e, "broker_start_failed");
            }
        })
        .context("failed to spawn broker thread")?;

    // Clients connect right after this returns
    thread::sleep(Duration::from_millis(100));
    info!(listen = %listen, "broker_started");
    Ok(())
}
