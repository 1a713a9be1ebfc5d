//! External collaborators: reverse geocoding and route calculation

use crate::domain::{CollaboratorError, Coordinates};
use async_trait::async_trait;

/// Address of a location as one provider sees it
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeocodeResult {
    pub formatted_address: String,
    /// City, town or village the location is in
    pub locality: Option<String>,
    /// ISO 3166-1 alpha-2 code, lower case
    pub country_code: Option<String>,
    pub attribution: Option<String>,
}

/// Driving distance and duration between two points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteResult {
    pub distance_miles: f64,
    pub duration_minutes: f64,
}

#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    /// Key the result is stored under ("Open_Street_Map")
    fn name(&self) -> &'static str;

    async fn reverse_geocode(&self, at: Coordinates) -> Result<GeocodeResult, CollaboratorError>;
}

#[async_trait]
pub trait RouteCalculator: Send + Sync {
    fn name(&self) -> &'static str;

    /// `country_code` is the last geocoded country, when known
    async fn route(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        country_code: Option<&str>,
    ) -> Result<RouteResult, CollaboratorError>;
}
