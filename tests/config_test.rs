//! Integration tests for configuration loading

use person_location::infra::Config;
use person_location::services::presence::PresenceThresholds;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

#[test]
fn test_load_config_from_file() {
    let temp_file = write_config(
        r#"
[mqtt]
host = "test-host"
port = 1884
trigger_topic = "home/person_location/trigger"

[home]
latitude = 40.2969
longitude = -111.6946

[presence]
just_arrived = 5
just_left = 2
extended_away = 24
show_zone_when_away = true
tick_interval_secs = 30

[[zones]]
id = "work"
friendly_name = "Work"
icon = "mdi:briefcase"

[geocode]
enabled = false
osm_api_key = "me@example.com"
distance_duration_source = "none"
timeout_ms = 2500

[output]
platform = "device_tracker"

[[persons]]
name = "rod"
devices = ["device_tracker.rod_iphone", "device_tracker.rod_ipad"]

[http]
port = 9091
"#,
    );

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.mqtt_host(), "test-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_trigger_topic(), "home/person_location/trigger");
    assert_eq!(config.home(), Some((40.2969, -111.6946)));
    assert_eq!(config.presence_thresholds(), PresenceThresholds::new(5, 2, 24, true));
    assert_eq!(config.tick_interval(), Duration::from_secs(30));
    assert_eq!(config.zone("work").and_then(|z| z.icon.as_deref()), Some("mdi:briefcase"));
    assert!(!config.geocode_enabled());
    assert_eq!(config.osm_api_key(), Some("me@example.com"));
    assert_eq!(config.google_api_key(), None);
    assert_eq!(config.distance_duration_source(), "none");
    assert_eq!(config.geocode_timeout(), Duration::from_millis(2500));
    assert_eq!(config.output_platform(), "device_tracker");
    assert_eq!(config.persons()[0].devices.len(), 2);
    assert_eq!(config.http_port(), 9091);
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml").unwrap();
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.output_platform(), "sensor");
}

#[test]
fn test_invalid_thresholds_abort_load() {
    let temp_file = write_config(
        r#"
[presence]
just_left = -3
"#,
    );
    assert!(Config::from_file(temp_file.path()).is_err());

    let temp_file = write_config(
        r#"
[home]
latitude = 123.0
longitude = 0.0
"#,
    );
    let err = Config::load_from_path(temp_file.path().to_str().unwrap()).unwrap_err();
    assert!(format!("{:#}", err).contains("home.latitude"));
}

#[test]
fn test_cli_config_path() {
    let args = vec!["person-location".to_string(), "--config=/etc/pl.toml".to_string()];
    assert_eq!(Config::resolve_config_path(&args), "/etc/pl.toml");
}
