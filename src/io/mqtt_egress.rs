//! MQTT publisher for egress messages
//!
//! Publishes person state to MQTT topics for the host platform:
//! - <prefix>/<person>/state - Fused person state (QoS 1, retained)
//! - <prefix>/source/<entity_id>/state - Tracker geocoded on request (QoS 1, retained)
//! - <integration topic> - API switch and counters (QoS 0)

use crate::infra::config::Config;
use crate::io::egress_channel::EgressMessage;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// One encoded publish
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingPublish {
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
    pub payload: Vec<u8>,
}

/// Pick topic, QoS and retain flag for a message and serialize it
pub fn encode_message(
    msg: &EgressMessage,
    config: &Config,
) -> Result<OutgoingPublish, serde_json::Error> {
    match msg {
        EgressMessage::PersonState(payload) => Ok(OutgoingPublish {
            topic: config.mqtt_egress_state_topic(&payload.person),
            qos: QoS::AtLeastOnce,
            retain: true,
            payload: serde_json::to_vec(payload)?,
        }),
        EgressMessage::SourceState(payload) => Ok(OutgoingPublish {
            topic: config.mqtt_egress_source_topic(&payload.entity_id),
            qos: QoS::AtLeastOnce,
            retain: true,
            payload: serde_json::to_vec(payload)?,
        }),
        EgressMessage::Integration(payload) => Ok(OutgoingPublish {
            topic: config.mqtt_egress_integration_topic().to_string(),
            qos: QoS::AtMostOnce,
            retain: false,
            payload: serde_json::to_vec(payload)?,
        }),
    }
}

/// MQTT publisher actor
///
/// Receives messages from the egress channel and publishes to MQTT topics.
pub struct MqttPublisher {
    client: AsyncClient,
    rx: mpsc::Receiver<EgressMessage>,
    config: Config,
}

impl MqttPublisher {
    /// Create a new MQTT publisher
    ///
    /// Connects to the broker at the configured MQTT host/port.
    pub fn new(config: &Config, rx: mpsc::Receiver<EgressMessage>) -> Self {
        let client_id = format!("person-location-egress-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        // Set credentials if configured
        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        // Spawn the eventloop handler
        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_egress_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("mqtt_egress_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_egress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self { client, rx, config: config.clone() }
    }

    /// Run the publisher loop until shutdown, then drain what is queued
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            state = %self.config.mqtt_egress_state_topic("<person>"),
            integration = %self.config.mqtt_egress_integration_topic(),
            "mqtt_egress_started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("mqtt_egress_shutdown");
                        while let Ok(msg) = self.rx.try_recv() {
                            self.publish_message(msg).await;
                        }
                        return;
                    }
                }
                Some(msg) = self.rx.recv() => {
                    self.publish_message(msg).await;
                }
            }
        }
    }

    async fn publish_message(&self, msg: EgressMessage) {
        let outgoing = match encode_message(&msg, &self.config) {
            Ok(outgoing) => outgoing,
            Err(e) => {
                error!(error = %e, "mqtt_egress_encode_failed");
                return;
            }
        };
        if let Err(e) = self
            .client
            .publish(&outgoing.topic, outgoing.qos, outgoing.retain, outgoing.payload)
            .await
        {
            error!(topic = %outgoing.topic, error = %e, "mqtt_egress_publish_failed");
        }
    }
}
