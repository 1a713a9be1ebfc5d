//! Domain models - core business types of the location fusion engine
//!
//! This module contains the canonical data types used throughout the system:
//! - `TrackerEvent` - a normalized report from one location source
//! - `PersonRecord` - the fused, authoritative location of one person
//! - `PresenceStatus` - the not-so-binary home/away status
//! - `TriggerMessage` - the ingress wire format published by the host
//! - `InputError` / `CollaboratorError` - the error taxonomy

pub mod error;
pub mod geo;
pub mod person;
pub mod types;

// Re-export commonly used types at module level
pub use error::{CollaboratorError, InputError};
pub use person::{
    ComputedAttributes, Direction, PersonRecord, PresenceState, PresenceStatus, SourceSighting,
};
pub use types::{Coordinates, PersonName, ReportedState, SourceId, SourceType, TrackerEvent};
