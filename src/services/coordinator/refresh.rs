//! Geocode/route refresh, run without the person lock

use super::handlers::{RefreshRequest, RefreshTarget};
use super::FusionCoordinator;
use crate::domain::geo::{distance_m, meters_to_miles, round_miles};
use crate::domain::{CollaboratorError, ComputedAttributes, ReportedState, SourceId};
use crate::services::collaborators::GeocodeResult;
use crate::services::friendly_name::append_bread_crumb;
use crate::services::throttle::MIN_DISTANCE_TO_GEOCODE_M;
use chrono::Utc;
use std::time::Instant;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Closer than this to home the route is not looked up
const MIN_ROUTE_DISTANCE_M: f64 = 500.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Applied,
    /// The person moved on, or a newer refresh was planned, while this one ran
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct DrivingEstimate {
    miles: f64,
    /// `None` when the route provider failed
    minutes: Option<f64>,
}

impl FusionCoordinator {
    /// Call the providers for a planned refresh and merge the results
    pub async fn complete_refresh(&self, request: RefreshRequest) -> RefreshOutcome {
        let started = Instant::now();

        let mut results: Vec<(&'static str, GeocodeResult)> = Vec::new();
        for geocoder in &self.collaborators.geocoders {
            self.throttle.pace().await;
            let lookup = timeout(
                self.config.geocode_timeout(),
                geocoder.reverse_geocode(request.coordinates),
            )
            .await
            .unwrap_or(Err(CollaboratorError::Timeout));

            match lookup {
                Ok(result) => results.push((geocoder.name(), result)),
                Err(e) => {
                    self.metrics.record_api_error();
                    warn!(
                        person = %request.person,
                        request_id = %request.request_id,
                        provider = geocoder.name(),
                        error = %e,
                        "geocode_failed"
                    );
                }
            }
        }

        let country_code = results.iter().rev().find_map(|(_, r)| r.country_code.clone());
        let driving = self.estimate_driving(&request, country_code.as_deref()).await;

        self.metrics.record_geocode_latency(started.elapsed().as_millis() as u64);
        self.apply_refresh(&request, results, driving)
    }

    async fn estimate_driving(
        &self,
        request: &RefreshRequest,
        country_code: Option<&str>,
    ) -> Option<DrivingEstimate> {
        let home = self.home?;
        let straight_meters = distance_m(request.coordinates, home);
        let straight_miles = round_miles(meters_to_miles(straight_meters));

        if straight_meters < MIN_ROUTE_DISTANCE_M {
            return Some(DrivingEstimate { miles: straight_miles, minutes: Some(0.0) });
        }
        let router = self.collaborators.router.as_ref()?;

        self.throttle.pace().await;
        let route = timeout(
            self.config.geocode_timeout(),
            router.route(request.coordinates, home, country_code),
        )
        .await
        .unwrap_or(Err(CollaboratorError::Timeout));

        match route {
            Ok(route) => Some(DrivingEstimate {
                miles: round_miles(route.distance_miles),
                minutes: Some(route.duration_minutes.round()),
            }),
            Err(e) => {
                self.metrics.record_route_error();
                warn!(
                    person = %request.person,
                    request_id = %request.request_id,
                    provider = router.name(),
                    error = %e,
                    "route_failed"
                );
                Some(DrivingEstimate { miles: straight_miles, minutes: None })
            }
        }
    }

    /// Merge provider results unless the record has moved on
    fn apply_refresh(
        &self,
        request: &RefreshRequest,
        results: Vec<(&'static str, GeocodeResult)>,
        driving: Option<DrivingEstimate>,
    ) -> RefreshOutcome {
        if let RefreshTarget::Source(source_id) = &request.target {
            return self.apply_source_refresh(source_id, request, results, driving);
        }
        let Some(slot) = self.registry.get(&request.person) else {
            return RefreshOutcome::Discarded;
        };
        let mut record = slot.lock();

        let moved = record
            .coordinates
            .map_or(f64::INFINITY, |current| distance_m(current, request.coordinates));
        if record.geocode_seq != request.seq || moved > MIN_DISTANCE_TO_GEOCODE_M {
            self.metrics.record_geocode_discarded();
            debug!(
                person = %request.person,
                request_id = %request.request_id,
                seq = request.seq,
                current_seq = record.geocode_seq,
                moved_m = moved,
                "geocode_result_discarded"
            );
            return RefreshOutcome::Discarded;
        }

        if !results.is_empty() {
            record.geocode_count += 1;
        }
        merge_results(&mut record.computed, results, driving);

        let template = request
            .template
            .clone()
            .unwrap_or_else(|| self.config.friendly_name_template().to_string());
        if let Some(phrase) = self.render_friendly_name(&mut record, &template) {
            if record.last_zone != Some(ReportedState::Home) {
                append_bread_crumb(&mut record.computed.bread_crumbs, &phrase.crumb);
            }
        }
        record.last_updated = Utc::now();

        self.metrics.record_geocode_applied();
        debug!(
            person = %request.person,
            request_id = %request.request_id,
            locality = record.computed.locality.as_deref().unwrap_or(""),
            "geocode_result_applied"
        );
        self.publish(&record);
        RefreshOutcome::Applied
    }

    /// Merge provider results into a tracker sighting and publish it
    fn apply_source_refresh(
        &self,
        source_id: &SourceId,
        request: &RefreshRequest,
        results: Vec<(&'static str, GeocodeResult)>,
        driving: Option<DrivingEstimate>,
    ) -> RefreshOutcome {
        let Some(slot) = self.registry.source(source_id.as_str()) else {
            return RefreshOutcome::Discarded;
        };
        let mut sighting = slot.lock();

        let moved = sighting
            .coordinates
            .map_or(f64::INFINITY, |current| distance_m(current, request.coordinates));
        if sighting.geocode_seq != request.seq || moved > MIN_DISTANCE_TO_GEOCODE_M {
            self.metrics.record_geocode_discarded();
            debug!(
                source = %source_id,
                request_id = %request.request_id,
                seq = request.seq,
                current_seq = sighting.geocode_seq,
                moved_m = moved,
                "source_geocode_result_discarded"
            );
            return RefreshOutcome::Discarded;
        }

        if !results.is_empty() {
            sighting.geocode_count += 1;
        }
        let meters = self.home.map(|home| distance_m(request.coordinates, home));
        sighting.computed.meters_from_home = meters.map(|m| (m * 10.0).round() / 10.0);
        sighting.computed.miles_from_home = meters.map(|m| round_miles(meters_to_miles(m)));
        merge_results(&mut sighting.computed, results, driving);

        let template = request
            .template
            .clone()
            .unwrap_or_else(|| self.config.friendly_name_template().to_string());
        self.render_source_friendly_name(&mut sighting, &template);
        sighting.last_updated = Utc::now();

        self.metrics.record_geocode_applied();
        debug!(
            source = %source_id,
            request_id = %request.request_id,
            locality = sighting.computed.locality.as_deref().unwrap_or(""),
            "source_geocode_result_applied"
        );
        self.publish_source(&sighting);
        RefreshOutcome::Applied
    }
}

/// Addresses, locality, attributions and the driving estimate
fn merge_results(
    computed: &mut ComputedAttributes,
    results: Vec<(&'static str, GeocodeResult)>,
    driving: Option<DrivingEstimate>,
) {
    let mut attributions = Vec::new();
    for (provider, result) in results {
        computed.addresses.insert(provider.to_string(), result.formatted_address);
        if result.locality.is_some() {
            computed.locality = result.locality;
        }
        if let Some(attribution) = result.attribution {
            attributions.push(attribution);
        }
    }
    if !attributions.is_empty() {
        computed.attribution = Some(attributions.join("; "));
    }
    if let Some(driving) = driving {
        computed.driving_miles = Some(driving.miles);
        computed.driving_minutes = driving.minutes;
    }
}
