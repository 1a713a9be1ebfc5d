//! Fusion coordinator - turns tracker events into person state
//!
//! The coordinator owns the per-person pipeline:
//! - identity resolution and the acceptance filter
//! - merging accepted events into the `PersonRecord`
//! - presence transitions (on events and on the periodic tick)
//! - derived distance/bearing/direction and the friendly name
//! - geocode/route refreshes, run outside the person lock
//!
//! Commands arrive over one mpsc channel from MQTT and HTTP. Work for one
//! person is serialized by that person's mutex; refreshes are spawned so a
//! slow provider never delays other persons or the tick.

mod handlers;
mod refresh;

pub use handlers::{RefreshRequest, RefreshTarget, TriggerOutcome};
pub use refresh::RefreshOutcome;

use crate::domain::types::{ReverseGeocodeMessage, TriggerRequest};
use crate::domain::{Coordinates, PersonName};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::EgressSender;
use crate::services::collaborators::{ReverseGeocoder, RouteCalculator};
use crate::services::identity::IdentityResolver;
use crate::services::presence::PresenceMachine;
use crate::services::registry::PersonRegistry;
use crate::services::throttle::GeocodeThrottle;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Work items for the coordinator
#[derive(Debug, Clone)]
pub enum Command {
    /// Tracker state change (`ProcessTrigger`)
    Trigger(TriggerRequest),
    /// Refresh the geocoded attributes of a person or tracker (`ReverseGeocode`)
    ReverseGeocode(ReverseGeocodeMessage),
    /// `GeocodeApiOn` / `GeocodeApiOff`
    SetGeocodeApi(bool),
}

/// Provider clients the refresh path calls out to
#[derive(Clone, Default)]
pub struct Collaborators {
    pub geocoders: Vec<Arc<dyn ReverseGeocoder>>,
    pub router: Option<Arc<dyn RouteCalculator>>,
}

impl Collaborators {
    pub fn is_empty(&self) -> bool {
        self.geocoders.is_empty() && self.router.is_none()
    }
}

pub struct FusionCoordinator {
    pub(crate) registry: Arc<PersonRegistry>,
    pub(crate) identity: IdentityResolver,
    pub(crate) presence: PresenceMachine,
    pub(crate) throttle: Arc<GeocodeThrottle>,
    pub(crate) collaborators: Collaborators,
    /// Configured home, if valid
    pub(crate) home: Option<Coordinates>,
    pub(crate) config: Config,
    pub(crate) metrics: Arc<Metrics>,
    /// MQTT egress sender (optional)
    pub(crate) egress_sender: Option<EgressSender>,
}

impl FusionCoordinator {
    pub fn new(
        config: Config,
        registry: Arc<PersonRegistry>,
        throttle: Arc<GeocodeThrottle>,
        collaborators: Collaborators,
        metrics: Arc<Metrics>,
        egress_sender: Option<EgressSender>,
    ) -> Self {
        let identity = IdentityResolver::new(config.persons().iter().flat_map(|person| {
            let name = PersonName::new(&person.name);
            person.devices.iter().map(move |device| (device.clone(), name.clone()))
        }));
        let home = config
            .home()
            .and_then(|(latitude, longitude)| Coordinates::new(latitude, longitude).ok());
        if home.is_none() {
            warn!("home_not_configured");
        }

        Self {
            registry,
            identity,
            presence: PresenceMachine::new(config.presence_thresholds()),
            throttle,
            collaborators,
            home,
            config,
            metrics,
            egress_sender,
        }
    }

    /// Create `Unknown` records for every configured person
    pub fn register_configured_persons(&self, now: DateTime<Utc>) {
        for person in self.config.persons() {
            let name = PersonName::new(&person.name);
            let slot = self.registry.register(name, now);
            self.publish(&slot.lock());
        }
        info!(persons = self.registry.len(), "persons_registered");
    }

    /// Consume commands until the channel closes, ticking presence on an interval
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Command>) {
        let mut tick_interval = interval(self.config.tick_interval());

        loop {
            tokio::select! {
                cmd = rx.recv() => {
                    match cmd {
                        Some(cmd) => self.dispatch(cmd, Utc::now()),
                        None => break,
                    }
                }
                _ = tick_interval.tick() => {
                    self.tick(Utc::now());
                }
            }
        }
        info!("coordinator_stopped");
    }

    /// Handle one command; refreshes are spawned and complete on their own
    pub fn dispatch(self: &Arc<Self>, cmd: Command, now: DateTime<Utc>) {
        let refresh = match cmd {
            Command::Trigger(request) => self.process_trigger(request, now).refresh,
            Command::ReverseGeocode(msg) => self.reverse_geocode(&msg, now),
            Command::SetGeocodeApi(active) => {
                self.throttle.set_active(active);
                None
            }
        };

        if let Some(request) = refresh {
            if self.collaborators.is_empty() {
                debug!(person = %request.person, "geocode_no_providers");
                return;
            }
            let coordinator = Arc::clone(self);
            tokio::spawn(async move {
                coordinator.complete_refresh(request).await;
            });
        }
    }

    pub fn registry(&self) -> &Arc<PersonRegistry> {
        &self.registry
    }

    pub fn throttle(&self) -> &Arc<GeocodeThrottle> {
        &self.throttle
    }

    pub(crate) fn publish(&self, record: &crate::domain::PersonRecord) {
        if let Some(ref sender) = self.egress_sender {
            sender.send_person_state(record);
        }
    }

    pub(crate) fn publish_source(&self, sighting: &crate::domain::SourceSighting) {
        if let Some(ref sender) = self.egress_sender {
            sender.send_source_state(sighting);
        }
    }
}
