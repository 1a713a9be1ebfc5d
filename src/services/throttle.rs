//! Geocode/route throttle
//!
//! Bounds how often the external providers are called:
//! - a global on/off switch (`GeocodeApiOn`/`GeocodeApiOff`)
//! - at most one refresh per person per second
//! - a refresh only when something worth looking up changed
//! - process-wide pacing of the provider calls themselves

use crate::domain::geo::distance_m;
use crate::domain::{Coordinates, PersonRecord, PresenceStatus, SourceSighting};
use crate::infra::metrics::Metrics;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Movement that justifies a new lookup
pub const MIN_DISTANCE_TO_GEOCODE_M: f64 = 10.0;

/// Minimum spacing of refreshes for one person, and of provider calls globally
pub const THROTTLE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDecision {
    Refresh(RefreshReason),
    Skip(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshReason {
    Forced,
    FirstGeocode,
    JustArrived,
    Moved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ApiOff,
    NoCoordinates,
    RateLimited,
    NotMoved,
}

impl RefreshReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshReason::Forced => "forced",
            RefreshReason::FirstGeocode => "first_geocode",
            RefreshReason::JustArrived => "just_arrived",
            RefreshReason::Moved => "moved",
        }
    }
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::ApiOff => "api_off",
            SkipReason::NoCoordinates => "no_coordinates",
            SkipReason::RateLimited => "rate_limited",
            SkipReason::NotMoved => "not_moved",
        }
    }
}

/// What the refresh rules look at, for a person or a single tracker
struct GeocodeHistory<'a> {
    label: &'a str,
    coordinates: Option<Coordinates>,
    last_geocode_location: Option<Coordinates>,
    last_geocode_time: Option<DateTime<Utc>>,
    just_arrived: bool,
}

pub struct GeocodeThrottle {
    active: AtomicBool,
    /// Time of the last provider call, across all persons
    last_api_call: tokio::sync::Mutex<Option<Instant>>,
    metrics: Arc<Metrics>,
}

impl GeocodeThrottle {
    pub fn new(active: bool, metrics: Arc<Metrics>) -> Self {
        Self {
            active: AtomicBool::new(active),
            last_api_call: tokio::sync::Mutex::new(None),
            metrics,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Flip the global switch; returns the previous value
    pub fn set_active(&self, active: bool) -> bool {
        let previous = self.active.swap(active, Ordering::Relaxed);
        if previous != active {
            info!(active = active, "geocode_api_switched");
        }
        previous
    }

    /// Decide whether the person's location should be looked up again
    ///
    /// `force` bypasses the movement rules, but not the switch or the rate cap.
    pub fn should_refresh(
        &self,
        record: &PersonRecord,
        now: DateTime<Utc>,
        force: bool,
    ) -> RefreshDecision {
        let history = GeocodeHistory {
            label: record.person_name.as_str(),
            coordinates: record.coordinates,
            last_geocode_location: record.last_geocode_location,
            last_geocode_time: record.last_geocode_time,
            just_arrived: record.presence.status == PresenceStatus::JustArrived,
        };
        self.decide(&history, now, force)
    }

    /// Same rules for the latest sighting of a single tracker
    pub fn should_refresh_source(
        &self,
        sighting: &SourceSighting,
        now: DateTime<Utc>,
        force: bool,
    ) -> RefreshDecision {
        let history = GeocodeHistory {
            label: sighting.source_id.as_str(),
            coordinates: sighting.coordinates,
            last_geocode_location: sighting.last_geocode_location,
            last_geocode_time: sighting.last_geocode_time,
            just_arrived: false,
        };
        self.decide(&history, now, force)
    }

    fn decide(&self, history: &GeocodeHistory<'_>, now: DateTime<Utc>, force: bool) -> RefreshDecision {
        if !self.is_active() {
            self.metrics.record_api_skipped();
            return RefreshDecision::Skip(SkipReason::ApiOff);
        }

        let Some(coordinates) = history.coordinates else {
            return RefreshDecision::Skip(SkipReason::NoCoordinates);
        };

        if let Some(last) = history.last_geocode_time {
            if now - last < min_refresh_interval() {
                debug!(target_of = history.label, "geocode_rate_limited");
                return RefreshDecision::Skip(SkipReason::RateLimited);
            }
        }

        if force {
            return RefreshDecision::Refresh(RefreshReason::Forced);
        }

        let Some(last_location) = history.last_geocode_location else {
            return RefreshDecision::Refresh(RefreshReason::FirstGeocode);
        };

        if history.just_arrived {
            return RefreshDecision::Refresh(RefreshReason::JustArrived);
        }

        if distance_m(last_location, coordinates) > MIN_DISTANCE_TO_GEOCODE_M {
            RefreshDecision::Refresh(RefreshReason::Moved)
        } else {
            RefreshDecision::Skip(SkipReason::NotMoved)
        }
    }

    /// Wait until a provider call is allowed, then claim the slot
    ///
    /// Calls are spaced `THROTTLE_INTERVAL` apart process-wide; a call that
    /// has to wait is counted as throttled.
    pub async fn pace(&self) {
        let mut last = self.last_api_call.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + THROTTLE_INTERVAL;
            let now = Instant::now();
            if ready_at > now {
                self.metrics.record_api_throttled();
                debug!(wait_ms = (ready_at - now).as_millis() as u64, "geocode_api_throttled");
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
        self.metrics.record_api_requested();
    }
}

fn min_refresh_interval() -> TimeDelta {
    TimeDelta::from_std(THROTTLE_INTERVAL).unwrap_or(TimeDelta::seconds(1))
}
