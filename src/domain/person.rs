//! Person record - the fused location of one person

use crate::domain::types::{
    Coordinates, PersonName, ReportedState, SourceId, SourceType, TrackerEvent,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Presence status of a person
///
/// The home/away decision is smoothed by the transient `JustArrived` and
/// `JustLeft` states. `Unknown` only exists before the first accepted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceStatus {
    Unknown,
    Home,
    JustArrived,
    JustLeft,
    Away,
    /// Away, shown as the friendly name of the zone the person is in
    Zone(String),
    ExtendedAway,
}

impl PresenceStatus {
    /// Home-side statuses; `JustArrived` counts as home
    #[inline]
    pub fn is_home(&self) -> bool {
        matches!(self, PresenceStatus::Home | PresenceStatus::JustArrived)
    }

    /// Settled away statuses (everything after `JustLeft` expired)
    #[inline]
    pub fn is_settled_away(&self) -> bool {
        matches!(
            self,
            PresenceStatus::Away | PresenceStatus::Zone(_) | PresenceStatus::ExtendedAway
        )
    }
}

impl fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresenceStatus::Unknown => f.write_str("unknown"),
            PresenceStatus::Home => f.write_str("Home"),
            PresenceStatus::JustArrived => f.write_str("Just Arrived"),
            PresenceStatus::JustLeft => f.write_str("Just Left"),
            PresenceStatus::Away => f.write_str("Away"),
            PresenceStatus::Zone(name) => f.write_str(name),
            PresenceStatus::ExtendedAway => f.write_str("Extended Away"),
        }
    }
}

/// Status plus the timestamps the presence machine measures from
#[derive(Debug, Clone, PartialEq)]
pub struct PresenceState {
    pub status: PresenceStatus,
    pub status_since: DateTime<Utc>,
    /// Start of the current continuous away period
    pub away_since: Option<DateTime<Utc>>,
}

impl PresenceState {
    pub fn unknown(now: DateTime<Utc>) -> Self {
        Self {
            status: PresenceStatus::Unknown,
            status_since: now,
            away_since: None,
        }
    }
}

/// Direction of travel relative to home
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Unknown,
    Home,
    Stationary,
    TowardHome,
    AwayFromHome,
    FarAway,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Unknown => "unknown",
            Direction::Home => "home",
            Direction::Stationary => "stationary",
            Direction::TowardHome => "toward home",
            Direction::AwayFromHome => "away from home",
            Direction::FarAway => "far away",
        }
    }
}

/// Values derived from the fused location and the geocode/route collaborators
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ComputedAttributes {
    pub meters_from_home: Option<f64>,
    pub miles_from_home: Option<f64>,
    pub compass_bearing: Option<f64>,
    /// Meters per second between the last two fixes
    pub speed: Option<f64>,
    pub direction: Direction,
    pub driving_miles: Option<f64>,
    pub driving_minutes: Option<f64>,
    /// Formatted address per provider ("Open_Street_Map" -> "...")
    pub addresses: BTreeMap<String, String>,
    pub locality: Option<String>,
    pub attribution: Option<String>,
    pub bread_crumbs: String,
}

/// The fused, authoritative location state of one person
#[derive(Debug, Clone)]
pub struct PersonRecord {
    pub person_name: PersonName,
    /// Output entity id, "<platform>.<person>_location"
    pub target_id: String,
    pub presence: PresenceState,
    pub coordinates: Option<Coordinates>,
    pub gps_accuracy: Option<f64>,
    /// Time of the most recent accepted fix; never moves backwards
    pub location_time: Option<DateTime<Utc>>,
    pub following_source_id: Option<SourceId>,
    pub following_accuracy: Option<f64>,
    /// Last home/zone/not_home signal accepted
    pub last_zone: Option<ReportedState>,
    pub reported_state_text: Option<String>,
    pub source_type: Option<SourceType>,
    pub source_friendly_name: Option<String>,
    pub altitude: Option<f64>,
    pub vertical_accuracy: Option<f64>,
    pub entity_picture: Option<String>,
    pub icon: String,
    pub last_geocode_location: Option<Coordinates>,
    pub last_geocode_time: Option<DateTime<Utc>>,
    /// Bumped each time a geocode refresh is issued
    pub geocode_seq: u64,
    pub geocode_count: u64,
    pub computed: ComputedAttributes,
    pub friendly_name: String,
    pub last_updated: DateTime<Utc>,
}

impl PersonRecord {
    pub fn new(person_name: PersonName, target_id: String, now: DateTime<Utc>) -> Self {
        let friendly_name = person_name.display_name();
        Self {
            person_name,
            target_id,
            presence: PresenceState::unknown(now),
            coordinates: None,
            gps_accuracy: None,
            location_time: None,
            following_source_id: None,
            following_accuracy: None,
            last_zone: None,
            reported_state_text: None,
            source_type: None,
            source_friendly_name: None,
            altitude: None,
            vertical_accuracy: None,
            entity_picture: None,
            icon: "mdi:help-circle".to_string(),
            last_geocode_location: None,
            last_geocode_time: None,
            geocode_seq: 0,
            geocode_count: 0,
            computed: ComputedAttributes::default(),
            friendly_name,
            last_updated: now,
        }
    }

    #[inline]
    pub fn status(&self) -> &PresenceStatus {
        &self.presence.status
    }

    /// Whether `entity_id` names this person's output or the source it follows
    pub fn matches_entity(&self, entity_id: &str) -> bool {
        self.target_id == entity_id
            || self
                .following_source_id
                .as_ref()
                .is_some_and(|s| s.as_str() == entity_id)
    }
}

/// Latest fix seen from one tracker, whether or not it was accepted
///
/// `ReverseGeocode` on a tracker that no person follows geocodes these
/// coordinates and publishes the result for that tracker alone.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSighting {
    pub source_id: SourceId,
    /// Person the tracker resolved to
    pub person_name: PersonName,
    pub coordinates: Option<Coordinates>,
    pub gps_accuracy: Option<f64>,
    pub location_time: DateTime<Utc>,
    pub reported_state: ReportedState,
    pub raw_state: String,
    pub source_friendly_name: Option<String>,
    pub last_geocode_location: Option<Coordinates>,
    pub last_geocode_time: Option<DateTime<Utc>>,
    pub geocode_seq: u64,
    pub geocode_count: u64,
    pub computed: ComputedAttributes,
    pub friendly_name: String,
    pub last_updated: DateTime<Utc>,
}

impl SourceSighting {
    pub fn new(event: &TrackerEvent, now: DateTime<Utc>) -> Self {
        Self {
            source_id: event.source_id.clone(),
            person_name: event.person_name.clone(),
            coordinates: event.coordinates,
            gps_accuracy: event.gps_accuracy,
            location_time: event.location_time,
            reported_state: event.reported_state.clone(),
            raw_state: event.raw_state.clone(),
            source_friendly_name: event.source_friendly_name.clone(),
            last_geocode_location: None,
            last_geocode_time: None,
            geocode_seq: 0,
            geocode_count: 0,
            computed: ComputedAttributes::default(),
            friendly_name: event
                .source_friendly_name
                .clone()
                .unwrap_or_else(|| event.source_id.as_str().to_string()),
            last_updated: now,
        }
    }

    /// Take over the fields of a newer event; older fixes are ignored
    ///
    /// Events without coordinates keep the last known ones.
    pub fn observe(&mut self, event: &TrackerEvent, now: DateTime<Utc>) -> bool {
        if event.location_time < self.location_time {
            return false;
        }
        if event.coordinates.is_some() {
            self.coordinates = event.coordinates;
            self.gps_accuracy = event.gps_accuracy;
        }
        self.location_time = event.location_time;
        self.reported_state = event.reported_state.clone();
        self.raw_state = event.raw_state.clone();
        if event.source_friendly_name.is_some() {
            self.source_friendly_name = event.source_friendly_name.clone();
        }
        self.last_updated = now;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(PresenceStatus::JustArrived.to_string(), "Just Arrived");
        assert_eq!(PresenceStatus::ExtendedAway.to_string(), "Extended Away");
        assert_eq!(PresenceStatus::Zone("Work".into()).to_string(), "Work");
    }

    #[test]
    fn test_home_side_statuses() {
        assert!(PresenceStatus::Home.is_home());
        assert!(PresenceStatus::JustArrived.is_home());
        assert!(!PresenceStatus::JustLeft.is_home());
        assert!(!PresenceStatus::Unknown.is_home());
        assert!(PresenceStatus::Zone("Work".into()).is_settled_away());
        assert!(!PresenceStatus::JustLeft.is_settled_away());
    }

    #[test]
    fn test_new_record_is_unknown() {
        let now = Utc::now();
        let record = PersonRecord::new(PersonName::new("rod"), "sensor.rod_location".into(), now);
        assert_eq!(record.status(), &PresenceStatus::Unknown);
        assert_eq!(record.friendly_name, "Rod");
        assert!(record.matches_entity("sensor.rod_location"));
        assert!(!record.matches_entity("device_tracker.rod_iphone"));
    }

    fn watch_event(state: &str, at: Option<Coordinates>, location_time: DateTime<Utc>) -> TrackerEvent {
        TrackerEvent {
            source_id: SourceId::parse("device_tracker.rod_watch").unwrap(),
            person_name: PersonName::new("rod"),
            reported_state: ReportedState::from_state(state, None),
            previous_state: None,
            raw_state: state.to_string(),
            coordinates: at,
            gps_accuracy: Some(30.0),
            source_type: SourceType::Gps,
            location_time,
            altitude: None,
            vertical_accuracy: None,
            entity_picture: None,
            source_friendly_name: Some("Watch".to_string()),
        }
    }

    #[test]
    fn test_sighting_keeps_newest_fix() {
        let now = Utc::now();
        let park = Coordinates { latitude: 40.1, longitude: -111.0 };
        let mut sighting = SourceSighting::new(&watch_event("not_home", Some(park), now), now);
        assert_eq!(sighting.friendly_name, "Watch");

        // Older fix is ignored
        let earlier = watch_event("home", None, now - chrono::Duration::minutes(5));
        assert!(!sighting.observe(&earlier, now));
        assert_eq!(sighting.reported_state, ReportedState::NotHome);

        // Newer fix without coordinates keeps the last known ones
        let later = now + chrono::Duration::minutes(1);
        assert!(sighting.observe(&watch_event("home", None, later), later));
        assert_eq!(sighting.reported_state, ReportedState::Home);
        assert_eq!(sighting.coordinates, Some(park));
        assert_eq!(sighting.location_time, later);
    }
}
