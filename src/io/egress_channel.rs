//! Egress channel for publishing person state
//!
//! Decouples the coordinator from the MQTT publisher: producers push
//! payloads into a bounded channel and never block.

use crate::domain::{PersonRecord, SourceSighting};
use crate::infra::metrics::{Metrics, MetricsSummary};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Messages that can be sent through the egress channel
#[derive(Debug, Clone)]
pub enum EgressMessage {
    /// Fused state of one person (retained)
    PersonState(Box<PersonStatePayload>),
    /// Geocoded sighting of one tracker (retained)
    SourceState(Box<SourceStatePayload>),
    /// Integration switch and API counters
    Integration(IntegrationPayload),
}

/// Published on "<prefix>/<person>/state" after every change
#[derive(Debug, Clone, Serialize)]
pub struct PersonStatePayload {
    pub person: String,
    pub entity_id: String,
    /// Presence status ("Home", "Just Left", ...)
    pub state: String,
    pub friendly_name: String,
    pub icon: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vertical_accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_picture: Option<String>,
    /// Followed source entity id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_time: Option<DateTime<Utc>>,
    pub status_since: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub away_since: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meters_from_home: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub miles_from_home: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compass_bearing: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    pub direction: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driving_miles: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driving_minutes: Option<f64>,
    /// Formatted address per provider
    #[serde(flatten)]
    pub addresses: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
    pub bread_crumbs: String,
    pub geocode_count: u64,
    pub last_updated: DateTime<Utc>,
}

impl PersonStatePayload {
    pub fn from_record(record: &PersonRecord) -> Self {
        let computed = &record.computed;
        Self {
            person: record.person_name.as_str().to_string(),
            entity_id: record.target_id.clone(),
            state: record.presence.status.to_string(),
            friendly_name: record.friendly_name.clone(),
            icon: record.icon.clone(),
            latitude: record.coordinates.map(|c| c.latitude),
            longitude: record.coordinates.map(|c| c.longitude),
            gps_accuracy: record.gps_accuracy,
            altitude: record.altitude,
            vertical_accuracy: record.vertical_accuracy,
            entity_picture: record.entity_picture.clone(),
            source: record.following_source_id.as_ref().map(|s| s.as_str().to_string()),
            source_type: record.source_type.map(|t| t.as_str()),
            reported_state: record.reported_state_text.clone(),
            location_time: record.location_time,
            status_since: record.presence.status_since,
            away_since: record.presence.away_since,
            meters_from_home: computed.meters_from_home,
            miles_from_home: computed.miles_from_home,
            compass_bearing: computed.compass_bearing,
            speed: computed.speed,
            direction: computed.direction.as_str(),
            driving_miles: computed.driving_miles,
            driving_minutes: computed.driving_minutes,
            addresses: computed.addresses.clone(),
            locality: computed.locality.clone(),
            attribution: computed.attribution.clone(),
            bread_crumbs: computed.bread_crumbs.clone(),
            geocode_count: record.geocode_count,
            last_updated: record.last_updated,
        }
    }
}

/// Published on "<prefix>/source/<entity_id>/state" after a tracker is
/// reverse geocoded on its own
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatePayload {
    pub entity_id: String,
    pub person: String,
    pub friendly_name: String,
    /// State text as the tracker reported it
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gps_accuracy: Option<f64>,
    pub location_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meters_from_home: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub miles_from_home: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driving_miles: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driving_minutes: Option<f64>,
    #[serde(flatten)]
    pub addresses: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<String>,
    pub geocode_count: u64,
    pub last_updated: DateTime<Utc>,
}

impl SourceStatePayload {
    pub fn from_sighting(sighting: &SourceSighting) -> Self {
        let computed = &sighting.computed;
        Self {
            entity_id: sighting.source_id.as_str().to_string(),
            person: sighting.person_name.as_str().to_string(),
            friendly_name: sighting.friendly_name.clone(),
            state: sighting.raw_state.clone(),
            latitude: sighting.coordinates.map(|c| c.latitude),
            longitude: sighting.coordinates.map(|c| c.longitude),
            gps_accuracy: sighting.gps_accuracy,
            location_time: sighting.location_time,
            meters_from_home: computed.meters_from_home,
            miles_from_home: computed.miles_from_home,
            driving_miles: computed.driving_miles,
            driving_minutes: computed.driving_minutes,
            addresses: computed.addresses.clone(),
            locality: computed.locality.clone(),
            attribution: computed.attribution.clone(),
            geocode_count: sighting.geocode_count,
            last_updated: sighting.last_updated,
        }
    }
}

/// Published on the integration topic every metrics interval
#[derive(Debug, Clone, Serialize)]
pub struct IntegrationPayload {
    pub ts: DateTime<Utc>,
    /// "on" or "off"
    pub state: &'static str,
    pub persons: usize,
    pub api_calls_requested: u64,
    pub api_calls_skipped: u64,
    pub api_calls_throttled: u64,
    pub api_error_count: u64,
    pub waze_error_count: u64,
    pub geocode_discarded: u64,
    pub triggers_total: u64,
    pub triggers_accepted: u64,
    pub version: &'static str,
}

impl IntegrationPayload {
    pub fn from_summary(summary: &MetricsSummary, api_active: bool, ts: DateTime<Utc>) -> Self {
        Self {
            ts,
            state: if api_active { "on" } else { "off" },
            persons: summary.persons,
            api_calls_requested: summary.api_calls_requested,
            api_calls_skipped: summary.api_calls_skipped,
            api_calls_throttled: summary.api_calls_throttled,
            api_error_count: summary.api_error_count,
            waze_error_count: summary.route_error_count,
            geocode_discarded: summary.geocode_discarded,
            triggers_total: summary.triggers_total,
            triggers_accepted: summary.triggers_accepted,
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// Sender handle for egress messages
///
/// Clone this to share across multiple producers.
/// Non-blocking - if the channel is full, messages are dropped and counted.
#[derive(Clone)]
pub struct EgressSender {
    tx: mpsc::Sender<EgressMessage>,
    metrics: Arc<Metrics>,
}

impl EgressSender {
    pub fn new(tx: mpsc::Sender<EgressMessage>, metrics: Arc<Metrics>) -> Self {
        Self { tx, metrics }
    }

    /// Publish the current state of a person
    pub fn send_person_state(&self, record: &PersonRecord) {
        let payload = PersonStatePayload::from_record(record);
        self.send(EgressMessage::PersonState(Box::new(payload)));
    }

    /// Publish the geocoded sighting of a tracker
    pub fn send_source_state(&self, sighting: &SourceSighting) {
        let payload = SourceStatePayload::from_sighting(sighting);
        self.send(EgressMessage::SourceState(Box::new(payload)));
    }

    pub fn send_integration(&self, payload: IntegrationPayload) {
        self.send(EgressMessage::Integration(payload));
    }

    fn send(&self, msg: EgressMessage) {
        if self.tx.try_send(msg).is_err() {
            self.metrics.record_egress_dropped();
        }
    }
}

/// Create a new egress channel pair
///
/// Returns (sender, receiver) where sender can be cloned and shared.
pub fn create_egress_channel(
    buffer_size: usize,
    metrics: Arc<Metrics>,
) -> (EgressSender, mpsc::Receiver<EgressMessage>) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (EgressSender::new(tx, metrics), rx)
}
