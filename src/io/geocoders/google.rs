//! Google Maps reverse geocoding

use super::fetch_text;
use crate::domain::{CollaboratorError, Coordinates};
use crate::services::collaborators::{GeocodeResult, ReverseGeocoder};
use async_trait::async_trait;
use serde::Deserialize;

const GOOGLE_GEOCODE_URL: &str = "https://maps.googleapis.com/maps/api/geocode/json";

pub struct GoogleGeocoder {
    http: reqwest::Client,
    key: String,
    language: String,
    region: String,
}

#[derive(Debug, Deserialize)]
struct GoogleResponse {
    status: String,
    #[serde(default)]
    results: Vec<GoogleResult>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleResult {
    formatted_address: Option<String>,
    #[serde(default)]
    address_components: Vec<AddressComponent>,
}

#[derive(Debug, Deserialize)]
struct AddressComponent {
    long_name: String,
    short_name: String,
    #[serde(default)]
    types: Vec<String>,
}

impl AddressComponent {
    fn is(&self, kind: &str) -> bool {
        self.types.iter().any(|t| t == kind)
    }
}

impl GoogleGeocoder {
    pub fn new(http: reqwest::Client, key: &str, language: &str, region: &str) -> Self {
        Self {
            http,
            key: key.to_string(),
            language: language.to_string(),
            region: region.to_string(),
        }
    }
}

pub(super) fn parse_response(body: &str) -> Result<GeocodeResult, CollaboratorError> {
    let decoded: GoogleResponse = serde_json::from_str(body)?;
    match decoded.status.as_str() {
        "OK" => {}
        "ZERO_RESULTS" => return Err(CollaboratorError::NoResult),
        status => {
            let message = decoded.error_message.unwrap_or_default();
            return Err(CollaboratorError::Rejected(format!("{} {}", status, message).trim().to_string()));
        }
    }
    let first = decoded.results.first().ok_or(CollaboratorError::NoResult)?;

    // City, else county, else state
    let component = |kind: &str| first.address_components.iter().find(|c| c.is(kind));
    let locality = component("locality")
        .or_else(|| component("administrative_area_level_2"))
        .or_else(|| component("administrative_area_level_1"))
        .map(|c| c.long_name.clone());
    let country_code = component("country").map(|c| c.short_name.to_lowercase());

    let formatted_address = first
        .formatted_address
        .clone()
        .or_else(|| locality.clone())
        .ok_or(CollaboratorError::NoResult)?;

    Ok(GeocodeResult {
        formatted_address,
        locality,
        country_code,
        attribution: Some("\"powered by Google\"".to_string()),
    })
}

#[async_trait]
impl ReverseGeocoder for GoogleGeocoder {
    fn name(&self) -> &'static str {
        "Google_Maps"
    }

    async fn reverse_geocode(&self, at: Coordinates) -> Result<GeocodeResult, CollaboratorError> {
        let latlng = format!("{},{}", at.latitude, at.longitude);
        let request = self.http.get(GOOGLE_GEOCODE_URL).query(&[
            ("language", self.language.as_str()),
            ("region", self.region.as_str()),
            ("latlng", latlng.as_str()),
            ("key", self.key.as_str()),
        ]);
        parse_response(&fetch_text(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ok() {
        let body = r#"{
            "status": "OK",
            "results": [{
                "formatted_address": "1200 N State St, Orem, UT 84057, USA",
                "address_components": [
                    {"long_name": "Utah County", "short_name": "Utah County", "types": ["administrative_area_level_2", "political"]},
                    {"long_name": "Orem", "short_name": "Orem", "types": ["locality", "political"]},
                    {"long_name": "United States", "short_name": "US", "types": ["country", "political"]}
                ]
            }]
        }"#;

        let result = parse_response(body).unwrap();
        assert_eq!(result.locality.as_deref(), Some("Orem"));
        assert_eq!(result.country_code.as_deref(), Some("us"));
        assert_eq!(result.formatted_address, "1200 N State St, Orem, UT 84057, USA");
    }

    #[test]
    fn test_request_denied() {
        let body = r#"{"status": "REQUEST_DENIED", "error_message": "The provided API key is invalid.", "results": []}"#;
        match parse_response(body) {
            Err(CollaboratorError::Rejected(reason)) => assert!(reason.starts_with("REQUEST_DENIED")),
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(
            parse_response(r#"{"status": "ZERO_RESULTS"}"#),
            Err(CollaboratorError::NoResult)
        );
    }
}
