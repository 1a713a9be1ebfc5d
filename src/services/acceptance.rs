//! Acceptance filter - decides whether a tracker event may update a person
//!
//! Rules are evaluated in order and the first that fires wins:
//! 1. self-update of the output entity → reject
//! 2. GPS accuracy of exactly 0 or worse than 100 m → reject
//! 3. state unset → reject
//! 4. fix older than the accepted one → reject (stale)
//! 5. first event for the person → accept
//! 6. person still in Unknown → accept
//! 7. GPS sources are followed; others only flip home/away

use crate::domain::{PersonRecord, PresenceStatus, ReportedState, SourceType, TrackerEvent};

/// Accuracy radius above which a GPS fix is ignored
pub const MAX_GPS_ACCURACY_M: f64 = 100.0;

/// Outcome of the acceptance filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept(AcceptReason),
    Reject(RejectReason),
}

impl Decision {
    #[inline]
    pub fn is_accept(&self) -> bool {
        matches!(self, Decision::Accept(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Accept(r) => r.as_str(),
            Decision::Reject(r) => r.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptReason {
    FirstEvent,
    StatusUnknown,
    ZoneChanged,
    NotFollowing,
    ContinueFollowing,
    BetterAccuracy,
    HomeAwayChanged,
}

impl AcceptReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcceptReason::FirstEvent => "first_event",
            AcceptReason::StatusUnknown => "status_unknown",
            AcceptReason::ZoneChanged => "zone_changed",
            AcceptReason::NotFollowing => "not_following",
            AcceptReason::ContinueFollowing => "continue_following",
            AcceptReason::BetterAccuracy => "better_accuracy",
            AcceptReason::HomeAwayChanged => "home_away_changed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    SelfUpdate,
    GpsAccuracy,
    StateUnset,
    Stale,
    /// Same source, same fix time and coordinates as the accepted one
    DuplicateDelivery,
    /// Another source is followed with at least as good accuracy
    InferiorSource,
    /// Non-GPS event whose state did not change
    NoChange,
    /// Non-GPS event that agrees with the current home/away side
    NotDirectional,
}

impl RejectReason {
    pub const ALL: [RejectReason; 8] = [
        RejectReason::SelfUpdate,
        RejectReason::GpsAccuracy,
        RejectReason::StateUnset,
        RejectReason::Stale,
        RejectReason::DuplicateDelivery,
        RejectReason::InferiorSource,
        RejectReason::NoChange,
        RejectReason::NotDirectional,
    ];

    #[inline]
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::SelfUpdate => "self_update",
            RejectReason::GpsAccuracy => "gps_accuracy",
            RejectReason::StateUnset => "state_unset",
            RejectReason::Stale => "stale",
            RejectReason::DuplicateDelivery => "duplicate_delivery",
            RejectReason::InferiorSource => "inferior_source",
            RejectReason::NoChange => "no_change",
            RejectReason::NotDirectional => "not_directional",
        }
    }
}

/// Decide whether `event` may update the person it belongs to
///
/// `target_id` is the person's output entity id; `record` is `None` when no
/// event for the person has been accepted yet.
pub fn decide(event: &TrackerEvent, target_id: &str, record: Option<&PersonRecord>) -> Decision {
    if event.source_id.as_str() == target_id {
        return Decision::Reject(RejectReason::SelfUpdate);
    }

    if let Some(accuracy) = event.gps_accuracy {
        if accuracy == 0.0 || accuracy > MAX_GPS_ACCURACY_M {
            return Decision::Reject(RejectReason::GpsAccuracy);
        }
    }

    if event.reported_state == ReportedState::Unset {
        return Decision::Reject(RejectReason::StateUnset);
    }

    if let Some(accepted) = record.and_then(|r| r.location_time) {
        if event.location_time < accepted {
            return Decision::Reject(RejectReason::Stale);
        }
    }

    let Some(record) = record else {
        return Decision::Accept(AcceptReason::FirstEvent);
    };

    if record.presence.status == PresenceStatus::Unknown {
        return Decision::Accept(AcceptReason::StatusUnknown);
    }

    if event.source_type == SourceType::Gps {
        decide_gps(event, record)
    } else {
        decide_non_gps(event, record)
    }
}

fn decide_gps(event: &TrackerEvent, record: &PersonRecord) -> Decision {
    if record.last_zone.as_ref() != Some(&event.reported_state) {
        return Decision::Accept(AcceptReason::ZoneChanged);
    }

    match &record.following_source_id {
        None => Decision::Accept(AcceptReason::NotFollowing),
        Some(followed) if *followed == event.source_id => {
            if is_duplicate(event, record) {
                Decision::Reject(RejectReason::DuplicateDelivery)
            } else {
                Decision::Accept(AcceptReason::ContinueFollowing)
            }
        }
        Some(_) => {
            if is_strictly_better(event.gps_accuracy, record.following_accuracy) {
                Decision::Accept(AcceptReason::BetterAccuracy)
            } else {
                Decision::Reject(RejectReason::InferiorSource)
            }
        }
    }
}

fn decide_non_gps(event: &TrackerEvent, record: &PersonRecord) -> Decision {
    let changed = event
        .previous_state
        .as_ref()
        .map_or(true, |previous| *previous != event.reported_state);
    if !changed {
        return Decision::Reject(RejectReason::NoChange);
    }

    if event.reported_state.is_home() != record.presence.status.is_home() {
        Decision::Accept(AcceptReason::HomeAwayChanged)
    } else {
        Decision::Reject(RejectReason::NotDirectional)
    }
}

fn is_duplicate(event: &TrackerEvent, record: &PersonRecord) -> bool {
    record.location_time == Some(event.location_time) && record.coordinates == event.coordinates
}

/// Smaller radius wins; a known accuracy beats an unknown one; ties lose
fn is_strictly_better(candidate: Option<f64>, followed: Option<f64>) -> bool {
    match (candidate, followed) {
        (Some(c), Some(f)) => c < f,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Coordinates, PersonName, PresenceState, SourceId};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    const TARGET: &str = "sensor.rod_location";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn gps(source: &str, state: ReportedState, accuracy: f64, at: DateTime<Utc>) -> TrackerEvent {
        TrackerEvent {
            source_id: SourceId::parse(source).unwrap(),
            person_name: PersonName::new("rod"),
            raw_state: state.as_str().to_string(),
            reported_state: state,
            previous_state: None,
            coordinates: Some(Coordinates { latitude: 40.0, longitude: -75.0 }),
            gps_accuracy: Some(accuracy),
            source_type: SourceType::Gps,
            location_time: at,
            altitude: None,
            vertical_accuracy: None,
            entity_picture: None,
            source_friendly_name: None,
        }
    }

    fn router(source: &str, from: ReportedState, to: ReportedState) -> TrackerEvent {
        let mut event = gps(source, to, 1.0, t0());
        event.source_type = SourceType::Router;
        event.previous_state = Some(from);
        event.gps_accuracy = None;
        event.coordinates = None;
        event
    }

    /// Record following `source` with the given status and zone
    fn following(
        source: &str,
        status: PresenceStatus,
        zone: ReportedState,
        accuracy: f64,
    ) -> PersonRecord {
        let mut record = PersonRecord::new(PersonName::new("rod"), TARGET.to_string(), t0());
        record.presence = PresenceState { status, status_since: t0(), away_since: None };
        record.following_source_id = Some(SourceId::parse(source).unwrap());
        record.following_accuracy = Some(accuracy);
        record.last_zone = Some(zone);
        record.location_time = Some(t0());
        record.coordinates = Some(Coordinates { latitude: 40.0, longitude: -75.0 });
        record
    }

    #[test]
    fn test_self_update_rejected() {
        let event = gps(TARGET, ReportedState::Home, 5.0, t0());
        assert_eq!(decide(&event, TARGET, None), Decision::Reject(RejectReason::SelfUpdate));
    }

    #[test]
    fn test_gps_accuracy_bounds() {
        let zero = gps("device_tracker.a", ReportedState::Home, 0.0, t0());
        assert_eq!(decide(&zero, TARGET, None), Decision::Reject(RejectReason::GpsAccuracy));

        let poor = gps("device_tracker.a", ReportedState::Home, 100.5, t0());
        assert_eq!(decide(&poor, TARGET, None), Decision::Reject(RejectReason::GpsAccuracy));

        let boundary = gps("device_tracker.a", ReportedState::Home, 100.0, t0());
        assert_eq!(decide(&boundary, TARGET, None), Decision::Accept(AcceptReason::FirstEvent));
    }

    #[test]
    fn test_unset_state_rejected() {
        let event = gps("device_tracker.a", ReportedState::Unset, 5.0, t0());
        assert_eq!(decide(&event, TARGET, None), Decision::Reject(RejectReason::StateUnset));
    }

    #[test]
    fn test_stale_event_rejected() {
        let record = following("device_tracker.a", PresenceStatus::Away, ReportedState::NotHome, 10.0);
        let event = gps(
            "device_tracker.a",
            ReportedState::NotHome,
            5.0,
            t0() - Duration::seconds(1),
        );
        assert_eq!(decide(&event, TARGET, Some(&record)), Decision::Reject(RejectReason::Stale));
    }

    #[test]
    fn test_unknown_status_accepts_anything_valid() {
        let mut record = PersonRecord::new(PersonName::new("rod"), TARGET.to_string(), t0());
        record.location_time = None;
        let event = router("device_tracker.router", ReportedState::Home, ReportedState::Home);
        assert_eq!(
            decide(&event, TARGET, Some(&record)),
            Decision::Accept(AcceptReason::StatusUnknown)
        );
    }

    #[test]
    fn test_gps_zone_change_accepted_from_any_source() {
        let record = following("device_tracker.a", PresenceStatus::Home, ReportedState::Home, 5.0);
        let event = gps("device_tracker.b", ReportedState::NotHome, 80.0, t0());
        assert_eq!(
            decide(&event, TARGET, Some(&record)),
            Decision::Accept(AcceptReason::ZoneChanged)
        );
    }

    #[test]
    fn test_gps_not_following_accepted() {
        let mut record = following("device_tracker.a", PresenceStatus::Away, ReportedState::NotHome, 5.0);
        record.following_source_id = None;
        let event = gps("device_tracker.b", ReportedState::NotHome, 50.0, t0());
        assert_eq!(
            decide(&event, TARGET, Some(&record)),
            Decision::Accept(AcceptReason::NotFollowing)
        );
    }

    #[test]
    fn test_followed_source_continues() {
        let record = following("device_tracker.a", PresenceStatus::Away, ReportedState::NotHome, 5.0);
        let event = gps(
            "device_tracker.a",
            ReportedState::NotHome,
            60.0,
            t0() + Duration::seconds(30),
        );
        assert_eq!(
            decide(&event, TARGET, Some(&record)),
            Decision::Accept(AcceptReason::ContinueFollowing)
        );
    }

    #[test]
    fn test_duplicate_delivery_rejected() {
        let record = following("device_tracker.a", PresenceStatus::Away, ReportedState::NotHome, 5.0);
        let event = gps("device_tracker.a", ReportedState::NotHome, 5.0, t0());
        assert_eq!(
            decide(&event, TARGET, Some(&record)),
            Decision::Reject(RejectReason::DuplicateDelivery)
        );
    }

    #[test]
    fn test_better_accuracy_switches_source() {
        // Following A at 50 m, B reports 20 m in the same zone
        let record = following("device_tracker.a", PresenceStatus::Away, ReportedState::NotHome, 50.0);
        let event = gps("device_tracker.b", ReportedState::NotHome, 20.0, t0());
        assert_eq!(
            decide(&event, TARGET, Some(&record)),
            Decision::Accept(AcceptReason::BetterAccuracy)
        );
    }

    #[test]
    fn test_worse_or_equal_accuracy_rejected() {
        let record = following("device_tracker.a", PresenceStatus::Away, ReportedState::NotHome, 20.0);

        let worse = gps("device_tracker.b", ReportedState::NotHome, 60.0, t0());
        assert_eq!(
            decide(&worse, TARGET, Some(&record)),
            Decision::Reject(RejectReason::InferiorSource)
        );

        let equal = gps("device_tracker.b", ReportedState::NotHome, 20.0, t0());
        assert_eq!(
            decide(&equal, TARGET, Some(&record)),
            Decision::Reject(RejectReason::InferiorSource)
        );
    }

    #[test]
    fn test_router_agreeing_with_status_rejected() {
        // Router reports home while the person is already Home
        let record = following("device_tracker.a", PresenceStatus::Home, ReportedState::Home, 5.0);
        let event = router("device_tracker.router", ReportedState::NotHome, ReportedState::Home);
        assert_eq!(
            decide(&event, TARGET, Some(&record)),
            Decision::Reject(RejectReason::NotDirectional)
        );
    }

    #[test]
    fn test_router_flips_home_away() {
        let record = following("device_tracker.a", PresenceStatus::Home, ReportedState::Home, 5.0);
        let event = router("device_tracker.router", ReportedState::Home, ReportedState::NotHome);
        assert_eq!(
            decide(&event, TARGET, Some(&record)),
            Decision::Accept(AcceptReason::HomeAwayChanged)
        );

        let arrived = following("device_tracker.a", PresenceStatus::JustArrived, ReportedState::Home, 5.0);
        let event = router("device_tracker.router", ReportedState::NotHome, ReportedState::Home);
        assert_eq!(
            decide(&event, TARGET, Some(&arrived)),
            Decision::Reject(RejectReason::NotDirectional)
        );
    }

    #[test]
    fn test_router_without_state_change_rejected() {
        let record = following("device_tracker.a", PresenceStatus::Away, ReportedState::NotHome, 5.0);
        let event = router("device_tracker.router", ReportedState::Home, ReportedState::Home);
        assert_eq!(
            decide(&event, TARGET, Some(&record)),
            Decision::Reject(RejectReason::NoChange)
        );
    }

    #[test]
    fn test_reject_reason_indices_are_dense() {
        for (i, reason) in RejectReason::ALL.iter().enumerate() {
            assert_eq!(reason.index(), i);
        }
    }
}
