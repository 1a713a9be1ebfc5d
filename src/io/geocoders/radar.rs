//! Radar reverse geocoding

use super::{fetch_text, first_of};
use crate::domain::{CollaboratorError, Coordinates};
use crate::services::collaborators::{GeocodeResult, ReverseGeocoder};
use async_trait::async_trait;
use serde::Deserialize;

const RADAR_URL: &str = "https://api.radar.io/v1/geocode/reverse";

pub struct RadarGeocoder {
    http: reqwest::Client,
    key: String,
}

#[derive(Debug, Deserialize)]
struct RadarResponse {
    meta: Option<RadarMeta>,
    #[serde(default)]
    addresses: Vec<RadarAddress>,
}

#[derive(Debug, Deserialize)]
struct RadarMeta {
    code: u16,
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RadarAddress {
    formatted_address: Option<String>,
    address_label: Option<String>,
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    municipality: Option<String>,
    county: Option<String>,
    state: Option<String>,
    country: Option<String>,
    country_code: Option<String>,
}

impl RadarGeocoder {
    pub fn new(http: reqwest::Client, key: &str) -> Self {
        Self { http, key: key.to_string() }
    }
}

pub(super) fn parse_response(body: &str) -> Result<GeocodeResult, CollaboratorError> {
    let decoded: RadarResponse = serde_json::from_str(body)?;
    if let Some(meta) = decoded.meta.filter(|m| m.code != 200) {
        return Err(CollaboratorError::Rejected(format!(
            "code {} {}",
            meta.code,
            meta.message.unwrap_or_default()
        )));
    }
    let address = decoded.addresses.first().ok_or(CollaboratorError::NoResult)?;

    let locality = first_of([
        address.city.as_ref(),
        address.town.as_ref(),
        address.village.as_ref(),
        address.municipality.as_ref(),
        address.county.as_ref(),
        address.state.as_ref(),
        address.country.as_ref(),
    ]);
    let formatted_address =
        first_of([address.formatted_address.as_ref(), address.address_label.as_ref(), locality.as_ref()])
            .ok_or(CollaboratorError::NoResult)?;

    Ok(GeocodeResult {
        formatted_address,
        locality,
        country_code: address.country_code.as_ref().map(|c| c.to_lowercase()),
        attribution: Some("\"Powered by Radar\"".to_string()),
    })
}

#[async_trait]
impl ReverseGeocoder for RadarGeocoder {
    fn name(&self) -> &'static str {
        "Radar"
    }

    async fn reverse_geocode(&self, at: Coordinates) -> Result<GeocodeResult, CollaboratorError> {
        let coordinates = format!("{},{}", at.latitude, at.longitude);
        let request = self
            .http
            .get(RADAR_URL)
            .header("Authorization", &self.key)
            .query(&[("coordinates", coordinates.as_str()), ("layer", "address")]);
        parse_response(&fetch_text(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        let body = r#"{
            "meta": {"code": 200},
            "addresses": [{
                "formattedAddress": "1200 N State St, Orem, UT 84057 US",
                "city": "Orem", "state": "Utah", "countryCode": "US"
            }]
        }"#;

        let result = parse_response(body).unwrap();
        assert_eq!(result.locality.as_deref(), Some("Orem"));
        assert_eq!(result.country_code.as_deref(), Some("us"));
        assert_eq!(result.attribution.as_deref(), Some("\"Powered by Radar\""));
    }

    #[test]
    fn test_label_fallback_and_errors() {
        let body = r#"{"meta": {"code": 200}, "addresses": [{"addressLabel": "Main St", "state": "Utah"}]}"#;
        let result = parse_response(body).unwrap();
        assert_eq!(result.formatted_address, "Main St");
        assert_eq!(result.locality.as_deref(), Some("Utah"));

        let body = r#"{"meta": {"code": 401, "message": "Unauthorized."}}"#;
        assert!(matches!(parse_response(body), Err(CollaboratorError::Rejected(_))));
        assert_eq!(
            parse_response(r#"{"meta": {"code": 200}, "addresses": []}"#),
            Err(CollaboratorError::NoResult)
        );
    }
}
