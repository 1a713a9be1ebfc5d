//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `acceptance` - Decides whether a tracker event may update a person
//! - `presence` - Home/away state machine with transient states
//! - `throttle` - Geocode/route rate limiting and the API switch
//! - `identity` - Maps location sources to persons
//! - `friendly_name` - Friendly name templates and bread crumbs
//! - `registry` - Per-person records behind per-person locks
//! - `collaborators` - Reverse geocoder and route calculator traits
//! - `coordinator` - Central command processor tying the above together

pub mod acceptance;
pub mod collaborators;
pub mod coordinator;
pub mod friendly_name;
pub mod identity;
pub mod presence;
pub mod registry;
pub mod throttle;

// Re-export commonly used types
pub use collaborators::{GeocodeResult, ReverseGeocoder, RouteCalculator, RouteResult};
pub use coordinator::{Collaborators, Command, FusionCoordinator};
pub use registry::PersonRegistry;
pub use throttle::GeocodeThrottle;
