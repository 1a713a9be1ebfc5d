//! Command handlers for the FusionCoordinator
//!
//! Everything here runs with the person's lock held and never awaits.
//! Provider calls are only planned here (`RefreshRequest`) and carried out
//! by `complete_refresh` once the lock is released.

use super::FusionCoordinator;
use crate::domain::geo::{compass_bearing, distance_m, meters_to_miles, round_miles, METERS_PER_KM};
use crate::domain::types::{new_request_id, ReverseGeocodeMessage, TriggerRequest};
use crate::domain::{
    Coordinates, Direction, PersonName, PersonRecord, PresenceStatus, ReportedState, SourceId,
    SourceSighting, TrackerEvent,
};
use crate::services::acceptance::{decide, Decision};
use crate::services::friendly_name::{
    append_bread_crumb, location_phrase, render, LocationPhrase, TemplateContext, NO_TEMPLATE,
};
use crate::services::presence::PresenceSignal;
use crate::services::throttle::RefreshDecision;
use chrono::{DateTime, Utc};
use std::time::Instant;
use tracing::{debug, info, warn};

/// From this distance on the direction is "far away"
const FAR_AWAY_M: f64 = 400.0 * METERS_PER_KM;

/// Below this speed (m/s) a person is stationary
const STATIONARY_SPEED_MPS: f64 = 0.5;

const DEFAULT_ICON: &str = "mdi:help-circle";
const HOME_ICON: &str = "mdi:home";

/// Result of one `ProcessTrigger`
#[derive(Debug, Clone)]
pub struct TriggerOutcome {
    pub person: PersonName,
    pub decision: Decision,
    /// Geocode/route refresh to run once the person lock is released
    pub refresh: Option<RefreshRequest>,
}

/// Where the result of a lookup is merged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshTarget {
    /// The person's fused record
    Person,
    /// The sighting of one tracker, outside the fusion pipeline
    Source(SourceId),
}

/// A planned provider lookup for one person or one of their trackers
#[derive(Debug, Clone)]
pub struct RefreshRequest {
    pub person: PersonName,
    pub target: RefreshTarget,
    /// Correlates the lookup across log lines
    pub request_id: String,
    /// `geocode_seq` of the record when the lookup was planned
    pub seq: u64,
    pub coordinates: Coordinates,
    /// Friendly name template; `None` uses the configured one
    pub template: Option<String>,
    pub force: bool,
}

impl FusionCoordinator {
    /// Run one tracker event through the acceptance filter and, if
    /// accepted, merge it into the person's record
    pub fn process_trigger(&self, request: TriggerRequest, now: DateTime<Utc>) -> TriggerOutcome {
        let started = Instant::now();

        let person = self.identity.resolve(&request.source_id, &request.attributes);
        let target_id = self.registry.target_id(&person);
        let event = request.into_event(person.clone(), now);
        self.registry.observe(&event, now);

        let (decision, refresh) = match self.registry.get(&person) {
            Some(slot) => {
                let mut record = slot.lock();
                let decision = decide(&event, &target_id, Some(&*record));
                let refresh = if decision.is_accept() {
                    self.accept(&mut record, &event, now)
                } else {
                    None
                };
                (decision, refresh)
            }
            None => {
                let decision = decide(&event, &target_id, None);
                let refresh = if decision.is_accept() {
                    let mut record = PersonRecord::new(person.clone(), target_id, now);
                    let refresh = self.accept(&mut record, &event, now);
                    self.registry.insert(record);
                    refresh
                } else {
                    None
                };
                (decision, refresh)
            }
        };

        match decision {
            Decision::Accept(reason) => {
                self.metrics.record_trigger_accepted();
                debug!(
                    person = %person,
                    source = %event.source_id,
                    reason = reason.as_str(),
                    "trigger_accepted"
                );
            }
            Decision::Reject(reason) => {
                self.metrics.record_trigger_rejected(reason);
                debug!(
                    person = %person,
                    source = %event.source_id,
                    state = %event.reported_state,
                    reason = reason.as_str(),
                    "trigger_rejected"
                );
            }
        }

        self.metrics.record_trigger_processed(started.elapsed().as_micros() as u64);

        TriggerOutcome { person, decision, refresh }
    }

    /// Merge an accepted event; returns the refresh to run, if any
    fn accept(
        &self,
        record: &mut PersonRecord,
        event: &TrackerEvent,
        now: DateTime<Utc>,
    ) -> Option<RefreshRequest> {
        let previous_fix = record.coordinates.zip(record.location_time);
        let previous_meters = record.computed.meters_from_home;
        let previous_status = record.presence.status.clone();

        self.merge_event(record, event);

        let signal = self.signal_for(&event.reported_state);
        let presence = if previous_status == PresenceStatus::Unknown {
            self.presence.initial(&signal, now)
        } else {
            self.presence.on_signal(&record.presence, &signal, now)
        };
        if presence.status != previous_status {
            self.metrics.record_status_transition();
            info!(
                person = %record.person_name,
                from = %previous_status,
                to = %presence.status,
                source = %event.source_id,
                "status_changed"
            );
        }
        record.presence = presence;

        update_derived(record, self.home, previous_fix, previous_meters);

        let phrase = self.render_friendly_name(record, self.config.friendly_name_template());
        if let Some(phrase) = phrase {
            append_bread_crumb(&mut record.computed.bread_crumbs, &phrase.crumb);
        }
        record.last_updated = now;

        // Arrivals and the first fix after startup always look up again
        let arrived = record.presence.status.is_home()
            && (previous_status == PresenceStatus::Unknown
                || previous_status == PresenceStatus::JustLeft
                || previous_status.is_settled_away());
        let refresh = self.plan_refresh(record, now, arrived, None);

        self.publish(record);
        refresh
    }

    /// Copy the raw fields of the event onto the record
    fn merge_event(&self, record: &mut PersonRecord, event: &TrackerEvent) {
        record.coordinates = match (event.coordinates, &event.reported_state) {
            (Some(at), _) => Some(at),
            // Router and beacon sources only say "home"
            (None, ReportedState::Home) => self.home,
            (None, _) => None,
        };
        record.gps_accuracy = event.gps_accuracy;
        record.altitude = event.altitude.map(f64::round);
        record.vertical_accuracy = event.vertical_accuracy;
        record.entity_picture = event.entity_picture.clone();
        record.source_type = Some(event.source_type);
        record.source_friendly_name = event.source_friendly_name.clone();
        record.reported_state_text = Some(event.raw_state.clone());
        record.following_source_id = Some(event.source_id.clone());
        record.following_accuracy = event.gps_accuracy;
        record.location_time = Some(match record.location_time {
            Some(accepted) => accepted.max(event.location_time),
            None => event.location_time,
        });
        record.icon = self.icon_for(&event.reported_state);
        record.last_zone = Some(event.reported_state.clone());
    }

    fn signal_for(&self, reported: &ReportedState) -> PresenceSignal {
        match reported {
            ReportedState::Home => PresenceSignal::Home,
            ReportedState::Zone(_) => PresenceSignal::Away {
                zone_name: self.configured_zone_name(Some(reported)).map(str::to_owned),
            },
            ReportedState::NotHome | ReportedState::Unset => PresenceSignal::Away { zone_name: None },
        }
    }

    /// Friendly name of a configured zone; unconfigured zones have none
    pub(crate) fn configured_zone_name(&self, reported: Option<&ReportedState>) -> Option<&str> {
        match reported {
            Some(ReportedState::Zone(key)) => {
                self.config.zone(key).map(|zone| zone.friendly_name.as_str())
            }
            _ => None,
        }
    }

    fn icon_for(&self, reported: &ReportedState) -> String {
        let zone_icon = match reported {
            ReportedState::Zone(key) => self.config.zone(key).and_then(|z| z.icon.clone()),
            ReportedState::Home => self
                .config
                .zone("home")
                .and_then(|z| z.icon.clone())
                .or_else(|| Some(HOME_ICON.to_string())),
            ReportedState::NotHome | ReportedState::Unset => None,
        };
        zone_icon.unwrap_or_else(|| DEFAULT_ICON.to_string())
    }

    /// Render the friendly name; `None` when the template is `NONE`
    pub(crate) fn render_friendly_name(
        &self,
        record: &mut PersonRecord,
        template: &str,
    ) -> Option<LocationPhrase> {
        if template.trim() == NO_TEMPLATE {
            return None;
        }

        let reported = record.last_zone.clone().unwrap_or(ReportedState::Unset);
        let raw_state = record.reported_state_text.as_deref().unwrap_or("");
        let phrase = location_phrase(
            &reported,
            raw_state,
            self.configured_zone_name(Some(&reported)),
            record.computed.locality.as_deref(),
        );

        let person_name = record.person_name.display_name();
        let target_state = record.presence.status.to_string();
        let ctx = TemplateContext {
            person_name: &person_name,
            friendly_name_location: &phrase.phrase,
            source_entity_id: record.following_source_id.as_ref().map_or("", |s| s.as_str()),
            source_state: raw_state,
            source_friendly_name: record.source_friendly_name.as_deref().unwrap_or(""),
            target_entity_id: &record.target_id,
            target_state: &target_state,
        };
        record.friendly_name = render(template, &ctx);
        Some(phrase)
    }

    /// Consult the throttle and, on refresh, claim the lookup for this record
    pub(crate) fn plan_refresh(
        &self,
        record: &mut PersonRecord,
        now: DateTime<Utc>,
        force: bool,
        template: Option<String>,
    ) -> Option<RefreshRequest> {
        match self.throttle.should_refresh(record, now, force) {
            RefreshDecision::Refresh(reason) => {
                let coordinates = record.coordinates?;
                record.geocode_seq += 1;
                record.last_geocode_location = Some(coordinates);
                record.last_geocode_time = Some(now);

                let request = RefreshRequest {
                    person: record.person_name.clone(),
                    target: RefreshTarget::Person,
                    request_id: new_request_id(),
                    seq: record.geocode_seq,
                    coordinates,
                    template,
                    force,
                };
                debug!(
                    person = %request.person,
                    request_id = %request.request_id,
                    reason = reason.as_str(),
                    "geocode_refresh_planned"
                );
                Some(request)
            }
            RefreshDecision::Skip(reason) => {
                debug!(person = %record.person_name, reason = reason.as_str(), "geocode_refresh_skipped");
                None
            }
        }
    }

    /// Advance every person's presence to `now`; returns the number of transitions
    pub fn tick(&self, now: DateTime<Utc>) -> usize {
        self.metrics.record_tick();
        let mut transitions = 0;

        for (person, slot) in self.registry.slots() {
            let mut record = slot.lock();
            let zone_name = self.configured_zone_name(record.last_zone.as_ref());
            let Some(next) = self.presence.on_tick(&record.presence, zone_name, now) else {
                continue;
            };

            info!(
                person = %person,
                from = %record.presence.status,
                to = %next.status,
                "status_changed"
            );
            self.metrics.record_status_transition();
            record.presence = next;
            self.render_friendly_name(&mut record, self.config.friendly_name_template());
            record.last_updated = now;
            self.publish(&record);
            transitions += 1;
        }

        transitions
    }

    /// `ReverseGeocode` for any entity
    ///
    /// A person's output entity, or the tracker a person follows, refreshes
    /// that person. Any other tracker seen on the trigger topic is geocoded at
    /// its own last coordinates.
    pub fn reverse_geocode(
        &self,
        msg: &ReverseGeocodeMessage,
        now: DateTime<Utc>,
    ) -> Option<RefreshRequest> {
        if let Some(slot) = self.registry.find_by_entity(&msg.entity_id) {
            let mut record = slot.lock();
            let refresh = self.plan_refresh(
                &mut record,
                now,
                msg.force_update,
                msg.friendly_name_template.clone(),
            );
            if refresh.is_none() {
                if let Some(template) = msg.friendly_name_template.as_deref() {
                    self.render_friendly_name(&mut record, template);
                    record.last_updated = now;
                    self.publish(&record);
                }
            }
            return refresh;
        }

        if let Some(slot) = self.registry.source(&msg.entity_id) {
            let mut sighting = slot.lock();
            return self.plan_source_refresh(&mut sighting, msg, now);
        }

        warn!(entity_id = %msg.entity_id, "reverse_geocode_unknown_entity");
        None
    }

    fn plan_source_refresh(
        &self,
        sighting: &mut SourceSighting,
        msg: &ReverseGeocodeMessage,
        now: DateTime<Utc>,
    ) -> Option<RefreshRequest> {
        match self.throttle.should_refresh_source(sighting, now, msg.force_update) {
            RefreshDecision::Refresh(reason) => {
                let coordinates = sighting.coordinates?;
                sighting.geocode_seq += 1;
                sighting.last_geocode_location = Some(coordinates);
                sighting.last_geocode_time = Some(now);

                let request = RefreshRequest {
                    person: sighting.person_name.clone(),
                    target: RefreshTarget::Source(sighting.source_id.clone()),
                    request_id: new_request_id(),
                    seq: sighting.geocode_seq,
                    coordinates,
                    template: msg.friendly_name_template.clone(),
                    force: msg.force_update,
                };
                debug!(
                    source = %sighting.source_id,
                    request_id = %request.request_id,
                    reason = reason.as_str(),
                    "source_geocode_refresh_planned"
                );
                Some(request)
            }
            RefreshDecision::Skip(reason) => {
                debug!(source = %sighting.source_id, reason = reason.as_str(), "source_geocode_refresh_skipped");
                None
            }
        }
    }

    /// Friendly name of a tracker sighting; unchanged when the template is `NONE`
    pub(crate) fn render_source_friendly_name(&self, sighting: &mut SourceSighting, template: &str) {
        if template.trim() == NO_TEMPLATE {
            return;
        }
        let zone_name = self.configured_zone_name(Some(&sighting.reported_state));
        let phrase = location_phrase(
            &sighting.reported_state,
            &sighting.raw_state,
            zone_name,
            sighting.computed.locality.as_deref(),
        );
        let person_name = sighting.person_name.display_name();
        let ctx = TemplateContext {
            person_name: &person_name,
            friendly_name_location: &phrase.phrase,
            source_entity_id: sighting.source_id.as_str(),
            source_state: &sighting.raw_state,
            source_friendly_name: sighting.source_friendly_name.as_deref().unwrap_or(""),
            target_entity_id: sighting.source_id.as_str(),
            target_state: &sighting.raw_state,
        };
        sighting.friendly_name = render(template, &ctx);
    }
}

/// Distance, bearing, speed and direction from the new fix
fn update_derived(
    record: &mut PersonRecord,
    home: Option<Coordinates>,
    previous_fix: Option<(Coordinates, DateTime<Utc>)>,
    previous_meters: Option<f64>,
) {
    let Some(current) = record.coordinates else {
        return;
    };
    let at_home = record.last_zone == Some(ReportedState::Home);
    let computed = &mut record.computed;

    let meters = if at_home {
        Some(0.0)
    } else {
        home.map(|home| distance_m(current, home))
    };
    computed.meters_from_home = meters.map(|m| (m * 10.0).round() / 10.0);
    computed.miles_from_home = meters.map(|m| round_miles(meters_to_miles(m)));

    let mut speed = 0.0;
    if let (Some((from, at)), Some(location_time)) = (previous_fix, record.location_time) {
        let traveled = distance_m(from, current);
        let elapsed = (location_time - at).num_milliseconds() as f64 / 1000.0;
        if elapsed > 0.0 {
            speed = traveled / elapsed;
        }
        if traveled > 0.0 {
            computed.compass_bearing = Some(compass_bearing(from, current).round());
        }
    }
    computed.speed = Some((speed * 10.0).round() / 10.0);

    computed.direction = if at_home {
        computed.compass_bearing = Some(0.0);
        Direction::Home
    } else {
        match meters {
            None => Direction::Unknown,
            Some(m) if m >= FAR_AWAY_M => Direction::FarAway,
            Some(_) if speed <= STATIONARY_SPEED_MPS => Direction::Stationary,
            Some(m) => match previous_meters {
                Some(previous) if previous > m => Direction::TowardHome,
                Some(previous) if previous < m => Direction::AwayFromHome,
                _ => Direction::Stationary,
            },
        }
    };
}
