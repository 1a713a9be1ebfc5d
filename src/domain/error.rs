//! Error types for ingress validation and collaborator calls

use std::fmt;

/// Malformed ingress data; the message is logged and dropped
#[derive(Debug, Clone, PartialEq)]
pub enum InputError {
    /// Payload is not valid JSON for the topic
    Malformed(String),
    /// Payload is not UTF-8
    InvalidUtf8,
    MissingEntityId,
    /// Entity id without a "<domain>." prefix
    InvalidEntityId(String),
    LatitudeOutOfRange(f64),
    LongitudeOutOfRange(f64),
    /// Only one of latitude/longitude present
    PartialCoordinates,
    NegativeAccuracy(f64),
    /// Message on a topic this process does not handle
    UnknownTopic(String),
    /// Payload on the api switch topic was not "on"/"off"
    InvalidSwitch(String),
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputError::Malformed(e) => write!(f, "malformed payload: {}", e),
            InputError::InvalidUtf8 => write!(f, "payload is not valid UTF-8"),
            InputError::MissingEntityId => write!(f, "missing entity_id"),
            InputError::InvalidEntityId(id) => write!(f, "entity_id has no domain: {}", id),
            InputError::LatitudeOutOfRange(v) => write!(f, "latitude out of range: {}", v),
            InputError::LongitudeOutOfRange(v) => write!(f, "longitude out of range: {}", v),
            InputError::PartialCoordinates => {
                write!(f, "latitude and longitude must be given together")
            }
            InputError::NegativeAccuracy(v) => write!(f, "gps_accuracy must not be negative: {}", v),
            InputError::UnknownTopic(t) => write!(f, "unhandled topic: {}", t),
            InputError::InvalidSwitch(p) => write!(f, "expected on/off, got: {}", p),
        }
    }
}

impl std::error::Error for InputError {}

/// Failure of a reverse-geocode or route collaborator
///
/// Never fatal: the refresh keeps the previous computed attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    /// Call did not finish within the configured timeout
    Timeout,
    /// Transport failure
    Http(String),
    /// Non-success HTTP status
    Status(u16),
    /// Provider answered but refused (bad key, quota, status != OK)
    Rejected(String),
    /// Response body could not be decoded
    Parse(String),
    /// Provider had nothing for this location
    NoResult,
}

impl fmt::Display for CollaboratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollaboratorError::Timeout => write!(f, "request timed out"),
            CollaboratorError::Http(e) => write!(f, "http error: {}", e),
            CollaboratorError::Status(code) => write!(f, "unexpected status {}", code),
            CollaboratorError::Rejected(reason) => write!(f, "provider rejected request: {}", reason),
            CollaboratorError::Parse(e) => write!(f, "invalid response: {}", e),
            CollaboratorError::NoResult => write!(f, "no result for location"),
        }
    }
}

impl std::error::Error for CollaboratorError {}

impl From<reqwest::Error> for CollaboratorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CollaboratorError::Timeout
        } else if let Some(status) = e.status() {
            CollaboratorError::Status(status.as_u16())
        } else {
            CollaboratorError::Http(e.to_string())
        }
    }
}

impl From<serde_json::Error> for CollaboratorError {
    fn from(e: serde_json::Error) -> Self {
        CollaboratorError::Parse(e.to_string())
    }
}
