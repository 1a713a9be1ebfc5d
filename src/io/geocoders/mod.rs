//! Reverse geocode and route provider clients
//!
//! One client per provider, each enabled by its configured key:
//! - `nominatim` - Open Street Map (key is the contact e-mail)
//! - `google` - Google Maps geocoding
//! - `mapquest` - MapQuest reverse geocoding
//! - `radar` - Radar reverse geocoding
//! - `waze` - Waze routing (default route source)
//! - `distance_matrix` - Google Distance Matrix (route source `google_maps`)
//!
//! Every client splits the HTTP call from a pure `parse_response` so the
//! provider formats are tested without a network.

mod distance_matrix;
mod google;
mod mapquest;
mod nominatim;
mod radar;
mod waze;

pub use distance_matrix::DistanceMatrixRouter;
pub use google::GoogleGeocoder;
pub use mapquest::MapQuestGeocoder;
pub use nominatim::NominatimGeocoder;
pub use radar::RadarGeocoder;
pub use waze::WazeRouter;

use crate::domain::CollaboratorError;
use crate::infra::config::Config;
use crate::services::Collaborators;
use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};

const USER_AGENT: &str = concat!("person-location/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP client for all providers (connection pooling)
fn http_client(config: &Config) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.geocode_timeout())
        .user_agent(USER_AGENT)
        .build()
        .context("failed to build provider HTTP client")
}

/// Build the provider clients enabled in configuration
pub fn build_collaborators(config: &Config) -> anyhow::Result<Collaborators> {
    let http = http_client(config)?;
    let mut collaborators = Collaborators::default();

    // Call order matters: the last provider with a locality wins
    if let Some(key) = config.radar_api_key() {
        collaborators.geocoders.push(Arc::new(RadarGeocoder::new(http.clone(), key)));
    }
    if let Some(email) = config.osm_api_key() {
        collaborators.geocoders.push(Arc::new(NominatimGeocoder::new(
            http.clone(),
            email,
            config.geocode_language(),
        )));
    }
    if let Some(key) = config.google_api_key() {
        collaborators.geocoders.push(Arc::new(GoogleGeocoder::new(
            http.clone(),
            key,
            config.geocode_language(),
            config.geocode_region(),
        )));
    }
    if let Some(key) = config.mapquest_api_key() {
        collaborators.geocoders.push(Arc::new(MapQuestGeocoder::new(http.clone(), key)));
    }

    collaborators.router = match config.distance_duration_source() {
        "waze" => Some(Arc::new(WazeRouter::new(http.clone(), &config.waze_region()))),
        "google_maps" => match config.google_api_key() {
            Some(key) => Some(Arc::new(DistanceMatrixRouter::new(http.clone(), key))),
            None => {
                warn!("google_maps route source needs google_api_key, routing disabled");
                None
            }
        },
        _ => None,
    };

    info!(
        geocoders = ?collaborators.geocoders.iter().map(|g| g.name()).collect::<Vec<_>>(),
        router = collaborators.router.as_ref().map(|r| r.name()).unwrap_or("none"),
        "collaborators_configured"
    );
    Ok(collaborators)
}

/// GET a provider URL and return the body, mapping HTTP failures
async fn fetch_text(request: reqwest::RequestBuilder) -> Result<String, CollaboratorError> {
    let response = request.send().await?;
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(CollaboratorError::Rejected(format!("HTTP status {}", status.as_u16())));
    }
    if !status.is_success() {
        return Err(CollaboratorError::Status(status.as_u16()));
    }
    Ok(response.text().await?)
}

/// First present, non-empty field in priority order
fn first_of<'a>(candidates: impl IntoIterator<Item = Option<&'a String>>) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .find(|s| !s.trim().is_empty())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_keys_no_geocoders() {
        let collaborators = build_collaborators(&Config::default()).unwrap();
        assert!(collaborators.geocoders.is_empty());
        assert_eq!(collaborators.router.as_ref().map(|r| r.name()), Some("waze"));
    }

    #[test]
    fn test_first_of_skips_blank() {
        let blank = " ".to_string();
        let town = "Orem".to_string();
        assert_eq!(first_of([None, Some(&blank), Some(&town)]), Some("Orem".to_string()));
        assert_eq!(first_of([None, None]), None);
    }
}
