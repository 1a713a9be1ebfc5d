//! MQTT client for receiving tracker state changes and service calls

use crate::domain::types::{ReverseGeocodeMessage, TriggerMessage, TriggerRequest};
use crate::domain::InputError;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::Command;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Start the MQTT client and send parsed commands to the coordinator
///
/// Commands are sent via try_send to avoid blocking the MQTT eventloop.
/// Dropped commands are counted in metrics and logged (rate-limited).
pub async fn start_mqtt_client(
    config: &Config,
    command_tx: mpsc::Sender<Command>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut mqttoptions = MqttOptions::new("person-location", config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    // Set credentials if configured
    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    for topic in [
        config.mqtt_trigger_topic(),
        config.mqtt_reverse_geocode_topic(),
        config.mqtt_api_topic(),
    ] {
        client.subscribe(topic, QoS::AtLeastOnce).await?;
        info!(topic = %topic, host = %config.mqtt_host(), port = %config.mqtt_port(), "mqtt_subscribed");
    }

    // Rate-limit drop warnings to 1 per second
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let command = match parse_message(&publish.topic, &publish.payload, config) {
                            Ok(command) => command,
                            Err(e) => {
                                metrics.record_input_error();
                                warn!(topic = %publish.topic, error = %e, "mqtt_input_rejected");
                                continue;
                            }
                        };
                        debug!(topic = %publish.topic, "mqtt_command_received");

                        if let Err(e) = command_tx.try_send(command) {
                            match e {
                                TrySendError::Full(_) => {
                                    metrics.record_ingress_dropped();
                                    if last_drop_warn.elapsed() > Duration::from_secs(1) {
                                        warn!("mqtt_command_dropped: channel full");
                                        last_drop_warn = Instant::now();
                                    }
                                }
                                TrySendError::Closed(_) => {
                                    warn!("command channel closed");
                                    return Ok(());
                                }
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

/// Turn one MQTT publish into a coordinator command
pub fn parse_message(topic: &str, payload: &[u8], config: &Config) -> Result<Command, InputError> {
    let text = std::str::from_utf8(payload).map_err(|_| InputError::InvalidUtf8)?;

    if topic == config.mqtt_trigger_topic() {
        let msg: TriggerMessage =
            serde_json::from_str(text).map_err(|e| InputError::Malformed(e.to_string()))?;
        return Ok(Command::Trigger(TriggerRequest::from_message(msg)?));
    }

    if topic == config.mqtt_reverse_geocode_topic() {
        let msg: ReverseGeocodeMessage =
            serde_json::from_str(text).map_err(|e| InputError::Malformed(e.to_string()))?;
        if msg.entity_id.trim().is_empty() {
            return Err(InputError::MissingEntityId);
        }
        return Ok(Command::ReverseGeocode(msg));
    }

    if topic == config.mqtt_api_topic() {
        return parse_switch(text).map(Command::SetGeocodeApi);
    }

    Err(InputError::UnknownTopic(topic.to_string()))
}

/// "on"/"off" (any case, optionally JSON-quoted)
pub fn parse_switch(text: &str) -> Result<bool, InputError> {
    let value = text.trim().trim_matches('"');
    if value.eq_ignore_ascii_case("on") {
        Ok(true)
    } else if value.eq_ignore_ascii_case("off") {
        Ok(false)
    } else {
        Err(InputError::InvalidSwitch(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ReportedState;

    #[test]
    fn test_parse_trigger() {
        let config = Config::default();
        let json = br#"{
            "entity_id": "device_tracker.rod_iphone",
            "from_state": "home",
            "to_state": "not_home",
            "attributes": {"latitude": 40.1, "longitude": -111.9, "gps_accuracy": 12, "source_type": "gps"},
            "last_updated": "2024-05-01T12:00:00+00:00"
        }"#;

        match parse_message("person_location/trigger", json, &config) {
            Ok(Command::Trigger(req)) => {
                assert_eq!(req.source_id.as_str(), "device_tracker.rod_iphone");
                assert_eq!(req.reported_state, ReportedState::NotHome);
                assert!(req.coordinates.is_some());
            }
            other => panic!("expected trigger, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_reverse_geocode() {
        let config = Config::default();
        let json = br#"{"entity_id": "sensor.rod_location", "force_update": true}"#;

        match parse_message("person_location/reverse_geocode", json, &config) {
            Ok(Command::ReverseGeocode(msg)) => {
                assert_eq!(msg.entity_id, "sensor.rod_location");
                assert!(msg.force_update);
                assert!(msg.friendly_name_template.is_none());
            }
            other => panic!("expected reverse geocode, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_api_switch() {
        let config = Config::default();
        assert!(matches!(
            parse_message("person_location/api/set", b"ON", &config),
            Ok(Command::SetGeocodeApi(true))
        ));
        assert!(matches!(
            parse_message("person_location/api/set", b"\"off\"", &config),
            Ok(Command::SetGeocodeApi(false))
        ));
        assert!(matches!(
            parse_message("person_location/api/set", b"maybe", &config),
            Err(InputError::InvalidSwitch(_))
        ));
    }

    #[test]
    fn test_parse_errors() {
        let config = Config::default();
        assert!(matches!(
            parse_message("person_location/trigger", b"not json", &config),
            Err(InputError::Malformed(_))
        ));
        assert!(matches!(
            parse_message("person_location/trigger", &[0xff, 0xfe], &config),
            Err(InputError::InvalidUtf8)
        ));
        assert!(matches!(
            parse_message("person_location/trigger", br#"{"to_state": "home"}"#, &config),
            Err(InputError::MissingEntityId)
        ));
        assert!(matches!(
            parse_message("person_location/reverse_geocode", br#"{"entity_id": " "}"#, &config),
            Err(InputError::MissingEntityId)
        ));
        assert!(matches!(
            parse_message("somewhere/else", b"{}", &config),
            Err(InputError::UnknownTopic(_))
        ));
    }
}
