//! Waze driving distance and time

use super::fetch_text;
use crate::domain::geo::meters_to_miles;
use crate::domain::{CollaboratorError, Coordinates};
use crate::services::collaborators::{RouteCalculator, RouteResult};
use async_trait::async_trait;
use serde::Deserialize;

const WAZE_BASE_URL: &str = "https://www.waze.com";
const WAZE_ROUTING_OPTIONS: &str = "AVOID_TRAILS:t,AVOID_TOLL_ROADS:t,AVOID_FERRIES:t";

pub struct WazeRouter {
    http: reqwest::Client,
    /// Used when no country was geocoded
    default_region: String,
}

#[derive(Debug, Deserialize)]
struct WazeResponse {
    response: Option<WazeRoute>,
    #[serde(default)]
    alternatives: Vec<WazeAlternative>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WazeAlternative {
    response: WazeRoute,
}

#[derive(Debug, Deserialize)]
struct WazeRoute {
    #[serde(default)]
    results: Vec<WazeSegment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WazeSegment {
    /// Meters
    length: f64,
    /// Seconds
    cross_time: f64,
}

impl WazeRouter {
    pub fn new(http: reqwest::Client, default_region: &str) -> Self {
        Self { http, default_region: default_region.to_lowercase() }
    }

    fn region(&self, country_code: Option<&str>) -> String {
        country_code
            .map(region_for_country)
            .unwrap_or_else(|| self.default_region.clone())
    }
}

/// Waze serves North America, Israel, Australia and the rest of the world separately
pub(super) fn region_for_country(country_code: &str) -> String {
    match country_code.to_lowercase().as_str() {
        "us" => "us",
        "ca" | "mx" => "na",
        "il" => "il",
        "au" | "nz" => "au",
        _ => "eu",
    }
    .to_string()
}

pub(super) fn routing_url(region: &str) -> String {
    let server = match region {
        "us" | "na" => "RoutingManager",
        "il" => "il-RoutingManager",
        _ => "row-RoutingManager",
    };
    format!("{}/{}/routingRequest", WAZE_BASE_URL, server)
}

/// Sum the segments of the first route
pub(super) fn parse_response(body: &str) -> Result<RouteResult, CollaboratorError> {
    let decoded: WazeResponse = serde_json::from_str(body)?;
    if let Some(error) = decoded.error {
        return Err(CollaboratorError::Rejected(error));
    }
    let route = decoded
        .response
        .or_else(|| decoded.alternatives.into_iter().next().map(|a| a.response))
        .filter(|r| !r.results.is_empty())
        .ok_or(CollaboratorError::NoResult)?;

    let meters: f64 = route.results.iter().map(|s| s.length).sum();
    let seconds: f64 = route.results.iter().map(|s| s.cross_time).sum();
    Ok(RouteResult {
        distance_miles: meters_to_miles(meters),
        duration_minutes: seconds / 60.0,
    })
}

/// Waze wants "x:<lon> y:<lat>"
fn waze_point(at: Coordinates) -> String {
    format!("x:{} y:{}", at.longitude, at.latitude)
}

#[async_trait]
impl RouteCalculator for WazeRouter {
    fn name(&self) -> &'static str {
        "waze"
    }

    async fn route(
        &self,
        origin: Coordinates,
        destination: Coordinates,
        country_code: Option<&str>,
    ) -> Result<RouteResult, CollaboratorError> {
        let from = waze_point(origin);
        let to = waze_point(destination);
        let request = self
            .http
            .get(routing_url(&self.region(country_code)))
            .header("Referer", "https://www.waze.com/")
            .query(&[
                ("from", from.as_str()),
                ("to", to.as_str()),
                ("at", "0"),
                ("returnJSON", "true"),
                ("returnGeometries", "false"),
                ("returnInstructions", "false"),
                ("timeout", "60000"),
                ("nPaths", "1"),
                ("options", WAZE_ROUTING_OPTIONS),
            ]);
        parse_response(&fetch_text(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_route() {
        let body = r#"{"response": {"results": [
            {"length": 10000, "crossTime": 600},
            {"length": 9312, "crossTime": 480}
        ]}}"#;

        let route = parse_response(body).unwrap();
        assert!((route.distance_miles - 12.0).abs() < 0.01);
        assert!((route.duration_minutes - 18.0).abs() < 1e-9);
    }

    #[test]
    fn test_parse_alternatives() {
        let body = r#"{"alternatives": [
            {"response": {"results": [{"length": 1609.34, "crossTime": 120}]}},
            {"response": {"results": [{"length": 5000, "crossTime": 900}]}}
        ]}"#;

        let route = parse_response(body).unwrap();
        assert!((route.distance_miles - 1.0).abs() < 1e-6);
        assert!((route.duration_minutes - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_error_and_empty() {
        assert!(matches!(
            parse_response(r#"{"error": "Internal Error"}"#),
            Err(CollaboratorError::Rejected(_))
        ));
        assert_eq!(
            parse_response(r#"{"response": {"results": []}}"#),
            Err(CollaboratorError::NoResult)
        );
    }

    #[test]
    fn test_region_selection() {
        let http = reqwest::Client::new();
        let router = WazeRouter::new(http, "US");
        assert_eq!(router.region(None), "us");
        assert_eq!(router.region(Some("CA")), "na");
        assert_eq!(router.region(Some("de")), "eu");
        assert_eq!(routing_url("us"), "https://www.waze.com/RoutingManager/routingRequest");
        assert_eq!(routing_url("il"), "https://www.waze.com/il-RoutingManager/routingRequest");
        assert_eq!(routing_url("eu"), "https://www.waze.com/row-RoutingManager/routingRequest");
    }
}
