//! Google Distance Matrix driving distance and time

use super::fetch_text;
use crate::domain::geo::meters_to_miles;
use crate::domain::{CollaboratorError, Coordinates};
use crate::services::collaborators::{RouteCalculator, RouteResult};
use async_trait::async_trait;
use serde::Deserialize;

const DISTANCE_MATRIX_URL: &str = "https://maps.googleapis.com/maps/api/distancematrix/json";

pub struct DistanceMatrixRouter {
    http: reqwest::Client,
    key: String,
}

#[derive(Debug, Deserialize)]
struct MatrixResponse {
    status: String,
    #[serde(default)]
    rows: Vec<MatrixRow>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MatrixRow {
    #[serde(default)]
    elements: Vec<MatrixElement>,
}

#[derive(Debug, Deserialize)]
struct MatrixElement {
    status: String,
    distance: Option<MatrixValue>,
    duration: Option<MatrixValue>,
}

#[derive(Debug, Deserialize)]
struct MatrixValue {
    value: f64,
}

impl DistanceMatrixRouter {
    pub fn new(http: reqwest::Client, key: &str) -> Self {
        Self { http, key: key.to_string() }
    }
}

pub(super) fn parse_response(body: &str) -> Result<RouteResult, CollaboratorError> {
    let decoded: MatrixResponse = serde_json::from_str(body)?;
    if decoded.status != "OK" {
        let message = decoded.error_message.unwrap_or_default();
        return Err(CollaboratorError::Rejected(format!("{} {}", decoded.status, message).trim().to_string()));
    }
    let element = decoded
        .rows
        .first()
        .and_then(|row| row.elements.first())
        .ok_or(CollaboratorError::NoResult)?;
    if element.status != "OK" {
        return Err(CollaboratorError::NoResult);
    }
    match (&element.distance, &element.duration) {
        (Some(distance), Some(duration)) => Ok(RouteResult {
            distance_miles: meters_to_miles(distance.value),
            duration_minutes: duration.value / 60.0,
        }),
        _ => Err(CollaboratorError::NoResult),
    }
}

#[async_trait]
impl RouteCalculator for DistanceMatrixRouter {
    fn name(&self) -> &'static str {
        "google_maps"
    }

    async fn route(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        _country_code: Option<&str>,
    ) -> Result<RouteResult, CollaboratorError> {
        let origins = format!("{},{}", origin.latitude, origin.longitude);
        let destinations = format!("{},{}", destination.latitude, destination.longitude);
        let request = self.http.get(DISTANCE_MATRIX_URL).query(&[
            ("origins", origins.as_str()),
            ("destinations", destinations.as_str()),
            ("mode", "driving"),
            ("units", "metric"),
            ("key", self.key.as_str()),
        ]);
        parse_response(&fetch_text(request).await?)
    }
}
