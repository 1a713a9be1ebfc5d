//! Open Street Map Nominatim reverse geocoding

use super::{fetch_text, first_of};
use crate::domain::{CollaboratorError, Coordinates};
use crate::services::collaborators::{GeocodeResult, ReverseGeocoder};
use async_trait::async_trait;
use serde::Deserialize;

const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/reverse";

pub struct NominatimGeocoder {
    http: reqwest::Client,
    /// Contact e-mail, required by the Nominatim usage policy
    email: String,
    language: String,
}

#[derive(Debug, Deserialize)]
struct NominatimResponse {
    display_name: Option<String>,
    licence: Option<String>,
    #[serde(default)]
    address: NominatimAddress,
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct NominatimAddress {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    municipality: Option<String>,
    county: Option<String>,
    state: Option<String>,
    country: Option<String>,
    country_code: Option<String>,
}

impl NominatimGeocoder {
    pub fn new(http: reqwest::Client, email: &str, language: &str) -> Self {
        Self { http, email: email.to_string(), language: language.to_string() }
    }
}

/// Decode a `format=jsonv2` reverse response
pub(super) fn parse_response(body: &str) -> Result<GeocodeResult, CollaboratorError> {
    let decoded: NominatimResponse = serde_json::from_str(body)?;
    if let Some(error) = decoded.error {
        return Err(if error.contains("Unable to geocode") {
            CollaboratorError::NoResult
        } else {
            CollaboratorError::Rejected(error)
        });
    }

    let address = &decoded.address;
    let locality = first_of([
        address.city.as_ref(),
        address.town.as_ref(),
        address.village.as_ref(),
        address.municipality.as_ref(),
        address.county.as_ref(),
        address.state.as_ref(),
        address.country.as_ref(),
    ]);
    let formatted_address = decoded
        .display_name
        .or_else(|| locality.clone())
        .ok_or(CollaboratorError::NoResult)?;

    Ok(GeocodeResult {
        formatted_address,
        locality,
        country_code: address.country_code.as_ref().map(|c| c.to_lowercase()),
        attribution: decoded.licence.map(|l| format!("\"{}\"", l)),
    })
}

#[async_trait]
impl ReverseGeocoder for NominatimGeocoder {
    fn name(&self) -> &'static str {
        "Open_Street_Map"
    }

    async fn reverse_geocode(&self, at: Coordinates) -> Result<GeocodeResult, CollaboratorError> {
        let lat = at.latitude.to_string();
        let lon = at.longitude.to_string();
        let request = self.http.get(NOMINATIM_URL).query(&[
            ("format", "jsonv2"),
            ("lat", lat.as_str()),
            ("lon", lon.as_str()),
            ("addressdetails", "1"),
            ("namedetails", "1"),
            ("zoom", "18"),
            ("limit", "1"),
            ("accept-language", self.language.as_str()),
            ("email", self.email.as_str()),
        ]);
        parse_response(&fetch_text(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_town() {
        let body = r#"{
            "display_name": "1200 N State St, Orem, Utah County, Utah, 84057, United States",
            "licence": "Data © OpenStreetMap contributors, ODbL 1.0. https://osm.org/copyright",
            "address": {"town": "Orem", "county": "Utah County", "state": "Utah", "country_code": "us"}
        }"#;

        let result = parse_response(body).unwrap();
        assert_eq!(result.locality.as_deref(), Some("Orem"));
        assert_eq!(result.country_code.as_deref(), Some("us"));
        assert!(result.formatted_address.starts_with("1200 N State St"));
        assert!(result.attribution.unwrap().starts_with("\"Data © OpenStreetMap"));
    }

    #[test]
    fn test_locality_falls_back_to_county() {
        let body = r#"{"display_name": "Somewhere", "address": {"county": "Juab County"}}"#;
        let result = parse_response(body).unwrap();
        assert_eq!(result.locality.as_deref(), Some("Juab County"));
        assert!(result.attribution.is_none());
    }

    #[test]
    fn test_error_body() {
        assert_eq!(
            parse_response(r#"{"error": "Unable to geocode"}"#),
            Err(CollaboratorError::NoResult)
        );
        assert!(matches!(parse_response("<html>"), Err(CollaboratorError::Parse(_))));
    }
}
