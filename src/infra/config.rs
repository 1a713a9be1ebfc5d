//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::services::friendly_name::DEFAULT_TEMPLATE;
use crate::services::presence::PresenceThresholds;
use anyhow::{bail, Context};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Provider key value meaning "provider disabled"
pub const KEY_NOT_USED: &str = "not used";

const ROUTE_SOURCES: [&str; 3] = ["waze", "google_maps", "none"];

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_trigger_topic")]
    pub trigger_topic: String,
    #[serde(default = "default_reverse_geocode_topic")]
    pub reverse_geocode_topic: String,
    #[serde(default = "default_api_topic")]
    pub api_topic: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            trigger_topic: default_trigger_topic(),
            reverse_geocode_topic: default_reverse_geocode_topic(),
            api_topic: default_api_topic(),
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_trigger_topic() -> String {
    "person_location/trigger".to_string()
}

fn default_reverse_geocode_topic() -> String {
    "person_location/reverse_geocode".to_string()
}

fn default_api_topic() -> String {
    "person_location/api/set".to_string()
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HomeConfig {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresenceConfig {
    /// Minutes in "Just Arrived" before "Home"
    #[serde(default = "default_transient_minutes")]
    pub just_arrived: u32,
    /// Minutes in "Just Left" before "Away"
    #[serde(default = "default_transient_minutes")]
    pub just_left: u32,
    /// Hours away before "Extended Away"; 0 disables
    #[serde(default = "default_extended_away_hours")]
    pub extended_away: u32,
    #[serde(default)]
    pub show_zone_when_away: bool,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            just_arrived: default_transient_minutes(),
            just_left: default_transient_minutes(),
            extended_away: default_extended_away_hours(),
            show_zone_when_away: false,
            tick_interval_secs: default_tick_interval_secs(),
        }
    }
}

fn default_transient_minutes() -> u32 {
    3
}

fn default_extended_away_hours() -> u32 {
    48
}

fn default_tick_interval_secs() -> u64 {
    60
}

/// A named place the host knows about
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ZoneConfig {
    /// Zone key as reported by trackers ("work")
    pub id: String,
    pub friendly_name: String,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeocodeConfig {
    /// Initial state of the provider switch
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_friendly_name_template")]
    pub friendly_name_template: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_geocode_timeout_ms")]
    pub timeout_ms: u64,
    /// Contact e-mail sent to Nominatim
    #[serde(default = "default_key")]
    pub osm_api_key: String,
    #[serde(default = "default_key")]
    pub google_api_key: String,
    #[serde(default = "default_key")]
    pub mapquest_api_key: String,
    #[serde(default = "default_key")]
    pub radar_api_key: String,
    /// Route provider: "waze", "google_maps" or "none"
    #[serde(default = "default_distance_duration_source")]
    pub distance_duration_source: String,
    #[serde(default)]
    pub waze_region: Option<String>,
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            friendly_name_template: default_friendly_name_template(),
            language: default_language(),
            region: default_region(),
            timeout_ms: default_geocode_timeout_ms(),
            osm_api_key: default_key(),
            google_api_key: default_key(),
            mapquest_api_key: default_key(),
            radar_api_key: default_key(),
            distance_duration_source: default_distance_duration_source(),
            waze_region: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_friendly_name_template() -> String {
    DEFAULT_TEMPLATE.to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_region() -> String {
    "US".to_string()
}

fn default_geocode_timeout_ms() -> u64 {
    10_000
}

fn default_distance_duration_source() -> String {
    "waze".to_string()
}

fn default_key() -> String {
    KEY_NOT_USED.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// "sensor" or "device_tracker"
    #[serde(default = "default_platform")]
    pub platform: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { platform: default_platform() }
    }
}

fn default_platform() -> String {
    "sensor".to_string()
}

/// Explicit device → person mapping
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PersonConfig {
    pub name: String,
    #[serde(default)]
    pub devices: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

fn default_metrics_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { enabled: true, port: default_http_port() }
    }
}

fn default_http_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttEgressConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Person state is published on "<prefix>/<person>/state"
    #[serde(default = "default_state_topic_prefix")]
    pub state_topic_prefix: String,
    #[serde(default = "default_integration_topic")]
    pub integration_topic: String,
    #[serde(default = "default_metrics_publish_interval")]
    pub metrics_publish_interval_secs: u64,
}

impl Default for MqttEgressConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            state_topic_prefix: default_state_topic_prefix(),
            integration_topic: default_integration_topic(),
            metrics_publish_interval_secs: default_metrics_publish_interval(),
        }
    }
}

fn default_state_topic_prefix() -> String {
    "person_location".to_string()
}

fn default_integration_topic() -> String {
    "person_location/integration".to_string()
}

fn default_metrics_publish_interval() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_broker_bind_address(),
            port: default_broker_port(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub home: Option<HomeConfig>,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
    #[serde(default)]
    pub geocode: GeocodeConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub persons: Vec<PersonConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub mqtt_egress: MqttEgressConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    mqtt: MqttConfig,
    home: Option<HomeConfig>,
    presence: PresenceConfig,
    zones: Vec<ZoneConfig>,
    geocode: GeocodeConfig,
    platform: String,
    persons: Vec<PersonConfig>,
    metrics_interval_secs: u64,
    http: HttpConfig,
    broker: BrokerConfig,
    mqtt_egress: MqttEgressConfig,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            mqtt: toml_config.mqtt,
            home: toml_config.home,
            presence: toml_config.presence,
            zones: toml_config.zones,
            geocode: toml_config.geocode,
            platform: toml_config.output.platform,
            persons: toml_config.persons,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            http: toml_config.http,
            broker: toml_config.broker,
            mqtt_egress: toml_config.mqtt_egress,
            config_file,
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load and validate configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let config = Self::from_toml(toml_config, path.display().to_string());
        config
            .validate()
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Load configuration from `path`, falling back to defaults if it is missing
    ///
    /// A file that exists but does not parse or validate is an error.
    pub fn load_from_path(path: &str) -> anyhow::Result<Self> {
        if !Path::new(path).exists() {
            warn!(path = %path, "config_file_missing_using_defaults");
            return Ok(Self::default());
        }
        Self::from_file(path)
    }

    /// Load configuration selected by args / CONFIG_FILE
    pub fn load(args: &[String]) -> anyhow::Result<Self> {
        Self::load_from_path(&Self::resolve_config_path(args))
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.platform != "sensor" && self.platform != "device_tracker" {
            bail!("output.platform must be \"sensor\" or \"device_tracker\", got {:?}", self.platform);
        }
        if let Some(home) = &self.home {
            if !(-90.0..=90.0).contains(&home.latitude) {
                bail!("home.latitude out of range: {}", home.latitude);
            }
            if !(-180.0..=180.0).contains(&home.longitude) {
                bail!("home.longitude out of range: {}", home.longitude);
            }
        }
        if !(1..=60).contains(&self.presence.tick_interval_secs) {
            bail!(
                "presence.tick_interval_secs must be between 1 and 60, got {}",
                self.presence.tick_interval_secs
            );
        }
        if !ROUTE_SOURCES.contains(&self.geocode.distance_duration_source.as_str()) {
            bail!(
                "geocode.distance_duration_source must be one of {:?}, got {:?}",
                ROUTE_SOURCES,
                self.geocode.distance_duration_source
            );
        }
        if self.geocode.timeout_ms == 0 {
            bail!("geocode.timeout_ms must be positive");
        }
        if let Some(zone) = self.zones.iter().find(|z| z.id.trim().is_empty()) {
            bail!("zone {:?} has an empty id", zone.friendly_name);
        }
        if let Some(person) = self.persons.iter().find(|p| p.name.trim().is_empty()) {
            bail!("person with devices {:?} has an empty name", person.devices);
        }
        Ok(())
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt.host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt.port
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt.username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt.password.as_deref()
    }

    pub fn mqtt_trigger_topic(&self) -> &str {
        &self.mqtt.trigger_topic
    }

    pub fn mqtt_reverse_geocode_topic(&self) -> &str {
        &self.mqtt.reverse_geocode_topic
    }

    pub fn mqtt_api_topic(&self) -> &str {
        &self.mqtt.api_topic
    }

    /// Home location, if configured
    pub fn home(&self) -> Option<(f64, f64)> {
        self.home.map(|h| (h.latitude, h.longitude))
    }

    pub fn presence_thresholds(&self) -> PresenceThresholds {
        PresenceThresholds::new(
            self.presence.just_arrived,
            self.presence.just_left,
            self.presence.extended_away,
            self.presence.show_zone_when_away,
        )
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.presence.tick_interval_secs)
    }

    pub fn zones(&self) -> &[ZoneConfig] {
        &self.zones
    }

    pub fn zone(&self, id: &str) -> Option<&ZoneConfig> {
        self.zones.iter().find(|z| z.id.eq_ignore_ascii_case(id))
    }

    pub fn geocode_enabled(&self) -> bool {
        self.geocode.enabled
    }

    pub fn friendly_name_template(&self) -> &str {
        &self.geocode.friendly_name_template
    }

    pub fn geocode_language(&self) -> &str {
        &self.geocode.language
    }

    pub fn geocode_region(&self) -> &str {
        &self.geocode.region
    }

    pub fn geocode_timeout(&self) -> Duration {
        Duration::from_millis(self.geocode.timeout_ms)
    }

    pub fn osm_api_key(&self) -> Option<&str> {
        key_if_used(&self.geocode.osm_api_key)
    }

    pub fn google_api_key(&self) -> Option<&str> {
        key_if_used(&self.geocode.google_api_key)
    }

    pub fn mapquest_api_key(&self) -> Option<&str> {
        key_if_used(&self.geocode.mapquest_api_key)
    }

    pub fn radar_api_key(&self) -> Option<&str> {
        key_if_used(&self.geocode.radar_api_key)
    }

    pub fn distance_duration_source(&self) -> &str {
        &self.geocode.distance_duration_source
    }

    /// Waze region, defaulting to the lower-cased geocode region
    pub fn waze_region(&self) -> String {
        self.geocode
            .waze_region
            .clone()
            .unwrap_or_else(|| self.geocode.region.to_lowercase())
    }

    pub fn output_platform(&self) -> &str {
        &self.platform
    }

    pub fn persons(&self) -> &[PersonConfig] {
        &self.persons
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn http_enabled(&self) -> bool {
        self.http.enabled
    }

    pub fn http_port(&self) -> u16 {
        self.http.port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    pub fn broker_enabled(&self) -> bool {
        self.broker.enabled
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker.bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker.port
    }

    pub fn mqtt_egress_enabled(&self) -> bool {
        self.mqtt_egress.enabled
    }

    pub fn mqtt_egress_state_topic(&self, person: &str) -> String {
        format!("{}/{}/state", self.mqtt_egress.state_topic_prefix, person.replace(' ', "_"))
    }

    pub fn mqtt_egress_source_topic(&self, entity_id: &str) -> String {
        format!("{}/source/{}/state", self.mqtt_egress.state_topic_prefix, entity_id)
    }

    pub fn mqtt_egress_integration_topic(&self) -> &str {
        &self.mqtt_egress.integration_topic
    }

    pub fn mqtt_egress_metrics_interval_secs(&self) -> u64 {
        self.mqtt_egress.metrics_publish_interval_secs
    }

    /// Builder method for tests to set home
    #[cfg(test)]
    pub fn with_home(mut self, latitude: f64, longitude: f64) -> Self {
        self.home = Some(HomeConfig { latitude, longitude });
        self
    }

    /// Builder method for tests to set presence thresholds
    #[cfg(test)]
    pub fn with_presence(mut self, just_arrived: u32, just_left: u32, extended_away: u32) -> Self {
        self.presence.just_arrived = just_arrived;
        self.presence.just_left = just_left;
        self.presence.extended_away = extended_away;
        self
    }

    /// Builder method for tests to add zones
    #[cfg(test)]
    pub fn with_zones(mut self, zones: Vec<ZoneConfig>, show_zone_when_away: bool) -> Self {
        self.zones = zones;
        self.presence.show_zone_when_away = show_zone_when_away;
        self
    }

    /// Builder method for tests to map devices to persons
    #[cfg(test)]
    pub fn with_persons(mut self, persons: Vec<PersonConfig>) -> Self {
        self.persons = persons;
        self
    }
}

fn key_if_used(key: &str) -> Option<&str> {
    let key = key.trim();
    if key.is_empty() || key.eq_ignore_ascii_case(KEY_NOT_USED) {
        None
    } else {
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.mqtt_host(), "localhost");
        assert_eq!(config.mqtt_port(), 1883);
        assert_eq!(config.mqtt_trigger_topic(), "person_location/trigger");
        assert_eq!(config.output_platform(), "sensor");
        assert_eq!(config.presence_thresholds(), PresenceThresholds::default());
        assert_eq!(config.tick_interval(), Duration::from_secs(60));
        assert_eq!(config.friendly_name_template(), DEFAULT_TEMPLATE);
        assert_eq!(config.geocode_timeout(), Duration::from_secs(10));
        assert!(config.geocode_enabled());
        assert!(!config.broker_enabled());
        assert!(config.home().is_none());
    }

    #[test]
    fn test_provider_keys_disabled_by_default() {
        let config = Config::default();
        assert_eq!(config.osm_api_key(), None);
        assert_eq!(config.google_api_key(), None);
        assert_eq!(config.mapquest_api_key(), None);
        assert_eq!(config.radar_api_key(), None);
        assert_eq!(key_if_used("Not Used"), None);
        assert_eq!(key_if_used(" me@example.com "), Some("me@example.com"));
    }

    #[test]
    fn test_waze_region_falls_back_to_region() {
        assert_eq!(Config::default().waze_region(), "us");
        assert_eq!(Config::default().distance_duration_source(), "waze");
    }

    #[test]
    fn test_state_topic() {
        let config = Config::default();
        assert_eq!(config.mqtt_egress_state_topic("mary ann"), "person_location/mary_ann/state");
    }

    #[test]
    fn test_zone_lookup_ignores_case() {
        let config = Config::default().with_zones(
            vec![ZoneConfig { id: "work".into(), friendly_name: "Work".into(), icon: None }],
            false,
        );
        assert_eq!(config.zone("Work").map(|z| z.friendly_name.as_str()), Some("Work"));
        assert!(config.zone("gym").is_none());
    }

    #[test]
    fn test_validation_rejects_bad_platform() {
        let mut toml_config = TomlConfig::default();
        toml_config.output.platform = "binary_sensor".into();
        let config = Config::from_toml(toml_config, "test".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_unknown_route_source() {
        let mut toml_config = TomlConfig::default();
        toml_config.geocode.distance_duration_source = "mapbox".into();
        assert!(Config::from_toml(toml_config, "test".into()).validate().is_err());
    }

    #[test]
    fn test_validation_rejects_slow_tick() {
        let config = Config::default();
        assert!(config.validate().is_ok());

        let mut toml_config = TomlConfig::default();
        toml_config.presence.tick_interval_secs = 120;
        assert!(Config::from_toml(toml_config, "test".into()).validate().is_err());
    }

    #[test]
    fn test_resolve_config_path_default() {
        let args: Vec<String> = vec!["person-location".to_string()];
        if env::var("CONFIG_FILE").is_err() {
            assert_eq!(Config::resolve_config_path(&args), "config/dev.toml");
        }
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> = vec![
            "person-location".to_string(),
            "--config".to_string(),
            "config/home.toml".to_string(),
        ];
        assert_eq!(Config::resolve_config_path(&args), "config/home.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["person-location".to_string(), "--config=config/cabin.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/cabin.toml");
    }
}
