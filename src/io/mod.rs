//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `mqtt` - MQTT client for tracker triggers and service calls
//! - `mqtt_egress` - MQTT publisher for person state
//! - `egress_channel` - Typed channel for MQTT egress messages
//! - `http` - Control, diagnostics and Prometheus metrics endpoint
//! - `geocoders` - Reverse geocode and route provider clients

pub mod egress_channel;
pub mod geocoders;
pub mod http;
pub mod mqtt;
pub mod mqtt_egress;

// Re-export commonly used types
pub use egress_channel::{
    create_egress_channel, EgressMessage, EgressSender, IntegrationPayload, PersonStatePayload,
    SourceStatePayload,
};
pub use geocoders::build_collaborators;
pub use http::{start_http_server, HttpState};
pub use mqtt_egress::MqttPublisher;
