//! MapQuest reverse geocoding

use super::fetch_text;
use crate::domain::{CollaboratorError, Coordinates};
use crate::services::collaborators::{GeocodeResult, ReverseGeocoder};
use async_trait::async_trait;
use serde::Deserialize;

const MAPQUEST_URL: &str = "https://www.mapquestapi.com/geocoding/v1/reverse";

pub struct MapQuestGeocoder {
    http: reqwest::Client,
    key: String,
}

#[derive(Debug, Deserialize)]
struct MapQuestResponse {
    info: MapQuestInfo,
    #[serde(default)]
    results: Vec<MapQuestResult>,
}

#[derive(Debug, Deserialize)]
struct MapQuestInfo {
    statuscode: i64,
    #[serde(default)]
    messages: Vec<String>,
    copyright: Option<MapQuestCopyright>,
}

#[derive(Debug, Deserialize)]
struct MapQuestCopyright {
    text: String,
}

#[derive(Debug, Deserialize)]
struct MapQuestResult {
    #[serde(default)]
    locations: Vec<MapQuestLocation>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MapQuestLocation {
    street: Option<String>,
    /// City
    admin_area5: Option<String>,
    /// County
    admin_area4: Option<String>,
    admin_area4_type: Option<String>,
    /// State
    admin_area3: Option<String>,
    postal_code: Option<String>,
    /// Country code
    admin_area1: Option<String>,
}

impl MapQuestGeocoder {
    pub fn new(http: reqwest::Client, key: &str) -> Self {
        Self { http, key: key.to_string() }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

pub(super) fn parse_response(body: &str) -> Result<GeocodeResult, CollaboratorError> {
    let decoded: MapQuestResponse = serde_json::from_str(body)?;
    if decoded.info.statuscode != 0 {
        return Err(CollaboratorError::Rejected(format!(
            "statuscode {} {}",
            decoded.info.statuscode,
            decoded.info.messages.join(", ")
        )));
    }
    let location = decoded
        .results
        .first()
        .and_then(|r| r.locations.first())
        .ok_or(CollaboratorError::NoResult)?;

    let locality = match (non_empty(&location.admin_area5), non_empty(&location.admin_area4)) {
        (Some(city), _) => Some(city.to_string()),
        (None, Some(county)) => Some(match non_empty(&location.admin_area4_type) {
            Some(kind) => format!("{} {}", county, kind),
            None => county.to_string(),
        }),
        (None, None) => None,
    };

    // "<street>, <locality>, <state> <zip> <country unless US>"
    let mut formatted = String::new();
    for part in [non_empty(&location.street), locality.as_deref()].into_iter().flatten() {
        formatted.push_str(part);
        formatted.push_str(", ");
    }
    let country = non_empty(&location.admin_area1);
    let tail: Vec<&str> = [
        non_empty(&location.admin_area3),
        non_empty(&location.postal_code),
        country.filter(|c| *c != "US"),
    ]
    .into_iter()
    .flatten()
    .collect();
    formatted.push_str(&tail.join(" "));
    let formatted_address = formatted.trim().trim_end_matches(',').to_string();
    if formatted_address.is_empty() {
        return Err(CollaboratorError::NoResult);
    }

    Ok(GeocodeResult {
        formatted_address,
        locality,
        country_code: country.map(str::to_lowercase),
        attribution: decoded.info.copyright.map(|c| format!("\"{}\"", c.text)),
    })
}

#[async_trait]
impl ReverseGeocoder for MapQuestGeocoder {
    fn name(&self) -> &'static str {
        "MapQuest"
    }

    async fn reverse_geocode(&self, at: Coordinates) -> Result<GeocodeResult, CollaboratorError> {
        let location = format!("{},{}", at.latitude, at.longitude);
        let request = self.http.get(MAPQUEST_URL).query(&[
            ("location", location.as_str()),
            ("thumbMaps", "false"),
            ("key", self.key.as_str()),
        ]);
        parse_response(&fetch_text(request).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_city() {
        let body = r#"{
            "info": {"statuscode": 0, "copyright": {"text": "© 2024 MapQuest, Inc."}, "messages": []},
            "results": [{"locations": [{
                "street": "1200 N State St", "adminArea5": "Orem", "adminArea4": "Utah",
                "adminArea4Type": "County", "adminArea3": "UT", "postalCode": "84057", "adminArea1": "US"
            }]}]
        }"#;

        let result = parse_response(body).unwrap();
        assert_eq!(result.formatted_address, "1200 N State St, Orem, UT 84057");
        assert_eq!(result.locality.as_deref(), Some("Orem"));
        assert_eq!(result.country_code.as_deref(), Some("us"));
        assert_eq!(result.attribution.as_deref(), Some("\"© 2024 MapQuest, Inc.\""));
    }

    #[test]
    fn test_county_and_foreign_country() {
        let body = r#"{
            "info": {"statuscode": 0},
            "results": [{"locations": [{"adminArea4": "Kent", "adminArea4Type": "County", "adminArea1": "GB"}]}]
        }"#;

        let result = parse_response(body).unwrap();
        assert_eq!(result.locality.as_deref(), Some("Kent County"));
        assert_eq!(result.formatted_address, "Kent County, GB");
    }

    #[test]
    fn test_bad_key() {
        let body = r#"{"info": {"statuscode": 403, "messages": ["This key is unauthorized"]}, "results": []}"#;
        assert!(matches!(parse_response(body), Err(CollaboratorError::Rejected(_))));
    }
}
