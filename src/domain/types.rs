//! Core types: identifiers, tracker events and the ingress wire format

use crate::domain::error::InputError;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Lower-cased person key, e.g. "rod"
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PersonName(String);

impl PersonName {
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_lowercase())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Capitalised form used in friendly names ("mary ann" -> "Mary Ann")
    pub fn display_name(&self) -> String {
        self.0
            .split_whitespace()
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for PersonName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Entity id of a location source, "<domain>.<object_id>"
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn parse(raw: &str) -> Result<Self, InputError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(InputError::MissingEntityId);
        }
        match raw.split_once('.') {
            Some((domain, object_id)) if !domain.is_empty() && !object_id.is_empty() => {
                Ok(Self(raw.to_string()))
            }
            _ => Err(InputError::InvalidEntityId(raw.to_string())),
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn domain(&self) -> &str {
        self.0.split_once('.').map(|(d, _)| d).unwrap_or(&self.0)
    }

    pub fn object_id(&self) -> &str {
        self.0.split_once('.').map(|(_, o)| o).unwrap_or(&self.0)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a source determines location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Gps,
    Router,
    Bluetooth,
    Other,
}

impl SourceType {
    pub fn from_attribute(raw: Option<&str>) -> Self {
        match raw.map(str::to_ascii_lowercase).as_deref() {
            Some("gps") => SourceType::Gps,
            Some("router") => SourceType::Router,
            Some("bluetooth") | Some("bluetooth_le") => SourceType::Bluetooth,
            _ => SourceType::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Gps => "gps",
            SourceType::Router => "router",
            SourceType::Bluetooth => "bluetooth",
            SourceType::Other => "other",
        }
    }
}

/// Zone-level state a source reports
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReportedState {
    Home,
    NotHome,
    /// Named zone, keyed by zone id ("work", "school")
    Zone(String),
    Unset,
}

/// iCloud3 stationary pseudo-zones, treated as plain away
const STATIONARY_PREFIXES: [&str; 2] = ["statzon", "ic3_stationary_"];

impl ReportedState {
    /// Map a raw host state (and optional `zone` attribute) to a reported state
    pub fn from_state(raw: &str, zone_attr: Option<&str>) -> Self {
        let trimmed = raw.trim();
        let lower = trimmed.to_lowercase();
        match lower.as_str() {
            "home" | "on" => ReportedState::Home,
            "not_home" | "off" | "away" => ReportedState::NotHome,
            "" | "unknown" | "unavailable" | "notset" | "none" => ReportedState::Unset,
            other if STATIONARY_PREFIXES.iter().any(|p| other.starts_with(p)) => {
                ReportedState::NotHome
            }
            other => {
                let key = match zone_attr.map(str::trim).filter(|z| !z.is_empty()) {
                    Some(zone) => zone.trim_start_matches("zone.").to_lowercase(),
                    None => other.replace([' ', '\''], "_"),
                };
                ReportedState::Zone(key)
            }
        }
    }

    #[inline]
    pub fn is_home(&self) -> bool {
        matches!(self, ReportedState::Home)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ReportedState::Home => "home",
            ReportedState::NotHome => "not_home",
            ReportedState::Zone(key) => key,
            ReportedState::Unset => "unset",
        }
    }
}

impl fmt::Display for ReportedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// WGS84 position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, InputError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(InputError::LatitudeOutOfRange(latitude));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(InputError::LongitudeOutOfRange(longitude));
        }
        Ok(Self { latitude, longitude })
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.latitude, self.longitude)
    }
}

/// A normalized report from one location source
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerEvent {
    pub source_id: SourceId,
    pub person_name: PersonName,
    pub reported_state: ReportedState,
    /// State the source reported before this change, if known
    pub previous_state: Option<ReportedState>,
    /// State text as the host sent it ("Work", "home")
    pub raw_state: String,
    pub coordinates: Option<Coordinates>,
    pub gps_accuracy: Option<f64>,
    pub source_type: SourceType,
    pub location_time: DateTime<Utc>,
    pub altitude: Option<f64>,
    pub vertical_accuracy: Option<f64>,
    pub entity_picture: Option<String>,
    pub source_friendly_name: Option<String>,
}

// ----------------------------------------------------------------------------
// Ingress wire format
// ----------------------------------------------------------------------------

/// State-change message published by the host on the trigger topic
#[derive(Debug, Deserialize)]
pub struct TriggerMessage {
    #[serde(default)]
    pub entity_id: Option<String>,
    #[serde(default)]
    pub from_state: Option<String>,
    #[serde(default)]
    pub to_state: Option<String>,
    #[serde(default)]
    pub attributes: TriggerAttributes,
    /// Timestamp - can be ISO 8601 string or epoch milliseconds integer
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub last_updated: TimestampValue,
}

/// Attributes of the source entity carried on a trigger
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TriggerAttributes {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub gps_accuracy: Option<f64>,
    pub source_type: Option<String>,
    pub friendly_name: Option<String>,
    pub altitude: Option<f64>,
    pub vertical_accuracy: Option<f64>,
    pub entity_picture: Option<String>,
    pub zone: Option<String>,
    /// "%Y-%m-%d %H:%M:%S" as reported by iCloud3
    pub last_located: Option<String>,
    pub person_name: Option<String>,
    pub account_name: Option<String>,
    pub owner_fullname: Option<String>,
}

/// Timestamp that can be either ISO 8601 string or epoch milliseconds
#[derive(Debug, Clone, Default)]
pub enum TimestampValue {
    #[default]
    None,
    IsoString(String),
    EpochMs(u64),
}

impl TimestampValue {
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            TimestampValue::None => None,
            TimestampValue::IsoString(s) => {
                DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
            }
            TimestampValue::EpochMs(ms) => {
                i64::try_from(*ms).ok().and_then(DateTime::from_timestamp_millis)
            }
        }
    }
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<TimestampValue, D::Error>
where
    D: Deserializer<'de>,
{
    struct TimestampVisitor;

    impl<'de> Visitor<'de> for TimestampVisitor {
        type Value = TimestampValue;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or integer timestamp")
        }

        fn visit_str<E>(self, value: &str) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::IsoString(value.to_string()))
        }

        fn visit_u64<E>(self, value: u64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::EpochMs(value))
        }

        fn visit_i64<E>(self, value: i64) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::EpochMs(value.max(0) as u64))
        }

        fn visit_unit<E>(self) -> Result<TimestampValue, E>
        where
            E: de::Error,
        {
            Ok(TimestampValue::None)
        }
    }

    deserializer.deserialize_any(TimestampVisitor)
}

/// A trigger that passed input validation, not yet bound to a person
#[derive(Debug, Clone)]
pub struct TriggerRequest {
    pub source_id: SourceId,
    pub reported_state: ReportedState,
    pub previous_state: Option<ReportedState>,
    pub raw_state: String,
    pub coordinates: Option<Coordinates>,
    pub source_type: SourceType,
    /// Time of the fix as reported by the source, if it carried one
    pub reported_time: Option<DateTime<Utc>>,
    pub attributes: TriggerAttributes,
}

const LAST_LOCATED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

impl TriggerRequest {
    /// Validate a decoded trigger message
    ///
    /// `last_located` is read as wall-clock time of the host's time zone.
    pub fn from_message(msg: TriggerMessage) -> Result<Self, InputError> {
        Self::from_message_in(msg, &Local)
    }

    /// Validate a decoded trigger message, reading `last_located` in `tz`
    pub fn from_message_in<Tz: TimeZone>(msg: TriggerMessage, tz: &Tz) -> Result<Self, InputError> {
        let entity_id = msg.entity_id.as_deref().ok_or(InputError::MissingEntityId)?;
        let source_id = SourceId::parse(entity_id)?;
        let attrs = msg.attributes;

        let coordinates = match (attrs.latitude, attrs.longitude) {
            (Some(lat), Some(lon)) => Some(Coordinates::new(lat, lon)?),
            (None, None) => None,
            _ => return Err(InputError::PartialCoordinates),
        };
        if let Some(acc) = attrs.gps_accuracy {
            if !acc.is_finite() || acc < 0.0 {
                return Err(InputError::NegativeAccuracy(acc));
            }
        }

        let raw_state = msg.to_state.unwrap_or_default();
        let reported_state = ReportedState::from_state(&raw_state, attrs.zone.as_deref());
        let previous_state = msg
            .from_state
            .as_deref()
            .map(|s| ReportedState::from_state(s, None));

        let reported_time = attrs
            .last_located
            .as_deref()
            .and_then(|s| NaiveDateTime::parse_from_str(s.trim(), LAST_LOCATED_FORMAT).ok())
            .and_then(|naive| wall_clock_to_utc(&naive, tz))
            .or_else(|| msg.last_updated.to_datetime());

        Ok(Self {
            source_id,
            reported_state,
            previous_state,
            raw_state: raw_state.trim().to_string(),
            coordinates,
            source_type: SourceType::from_attribute(attrs.source_type.as_deref()),
            reported_time,
            attributes: attrs,
        })
    }

    /// Bind the request to a resolved person
    ///
    /// `received_at` stands in for the fix time when the source sent none.
    pub fn into_event(self, person_name: PersonName, received_at: DateTime<Utc>) -> TrackerEvent {
        TrackerEvent {
            source_id: self.source_id,
            person_name,
            reported_state: self.reported_state,
            previous_state: self.previous_state,
            raw_state: self.raw_state,
            coordinates: self.coordinates,
            gps_accuracy: self.attributes.gps_accuracy,
            source_type: self.source_type,
            location_time: self.reported_time.unwrap_or(received_at),
            altitude: self.attributes.altitude,
            vertical_accuracy: self.attributes.vertical_accuracy,
            entity_picture: self.attributes.entity_picture,
            source_friendly_name: self.attributes.friendly_name,
        }
    }
}

/// Request to refresh the geocoded attributes of a person
#[derive(Debug, Clone, Deserialize)]
pub struct ReverseGeocodeMessage {
    pub entity_id: String,
    #[serde(default)]
    pub force_update: bool,
    #[serde(default)]
    pub friendly_name_template: Option<String>,
}

/// Convert a naive wall-clock time in `tz` to UTC
///
/// The earlier instant wins in a DST fold; times inside a DST gap do not exist
/// and give `None`.
fn wall_clock_to_utc<Tz: TimeZone>(naive: &NaiveDateTime, tz: &Tz) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}

/// Generate a UUIDv7 used to correlate a geocode refresh across log lines
pub fn new_request_id() -> String {
    uuid::Uuid::now_v7().to_string()
}
