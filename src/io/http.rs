//! HTTP control and metrics endpoint
//!
//! - `GET /metrics` - Prometheus text format
//! - `GET /health`
//! - `GET /persons` - current state of every person (JSON)
//! - `GET /api` - geocode API switch and counters (JSON)
//! - `POST /api/geocode/on`, `POST /api/geocode/off`
//! - `POST /reverse_geocode?entity_id=...&force_update=...`
//!
//! Uses hyper for the HTTP server. Mutating routes only enqueue a
//! `Command` for the coordinator.

use crate::domain::types::ReverseGeocodeMessage;
use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use crate::io::egress_channel::{IntegrationPayload, PersonStatePayload};
use crate::services::acceptance::RejectReason;
use crate::services::{Command, GeocodeThrottle, PersonRegistry};
use bytes::Bytes;
use chrono::Utc;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

const CONTENT_TYPE_TEXT: &str = "text/plain; version=0.0.4; charset=utf-8";
const CONTENT_TYPE_JSON: &str = "application/json";

/// Shared handles the endpoint reads from and writes to
#[derive(Clone)]
pub struct HttpState {
    pub metrics: Arc<Metrics>,
    pub registry: Arc<PersonRegistry>,
    pub throttle: Arc<GeocodeThrottle>,
    pub command_tx: mpsc::Sender<Command>,
}

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge)
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum {sum}");
    let _ = writeln!(output, "{name}_count {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, persons: usize, api_active: bool) -> String {
    let summary = metrics.report(persons);
    let mut output = String::with_capacity(4096);

    write_trigger_metrics(&mut output, &summary);
    write_presence_metrics(&mut output, &summary);
    write_api_metrics(&mut output, &summary, api_active);
    write_drop_metrics(&mut output, &summary);

    output
}

fn write_trigger_metrics(output: &mut String, summary: &MetricsSummary) {
    write_metric(
        output,
        "person_location_triggers_total",
        "Total triggers processed",
        MetricType::Counter,
        summary.triggers_total,
    );
    write_metric(
        output,
        "person_location_triggers_accepted_total",
        "Triggers accepted by the filter",
        MetricType::Counter,
        summary.triggers_accepted,
    );

    let _ = writeln!(output, "# HELP person_location_triggers_rejected_total Triggers rejected, by reason");
    let _ = writeln!(output, "# TYPE person_location_triggers_rejected_total counter");
    for reason in RejectReason::ALL {
        let _ = writeln!(
            output,
            "person_location_triggers_rejected_total{{reason=\"{}\"}} {}",
            reason.as_str(),
            summary.triggers_rejected[reason.index()]
        );
    }

    write_metric(
        output,
        "person_location_input_errors_total",
        "Ingress messages dropped as malformed",
        MetricType::Counter,
        summary.input_errors,
    );

    write_histogram(
        output,
        "person_location_trigger_latency_us",
        "Trigger processing latency in microseconds",
        &summary.lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.avg_process_latency_us,
    );
    write_metric(
        output,
        "person_location_trigger_latency_p99_us",
        "99th percentile trigger latency",
        MetricType::Gauge,
        summary.lat_p99_us,
    );
}

fn write_presence_metrics(output: &mut String, summary: &MetricsSummary) {
    write_metric(
        output,
        "person_location_persons",
        "Persons tracked",
        MetricType::Gauge,
        summary.persons as u64,
    );
    write_metric(
        output,
        "person_location_status_transitions_total",
        "Presence status changes",
        MetricType::Counter,
        summary.status_transitions,
    );
    write_metric(
        output,
        "person_location_ticks_total",
        "Presence ticks run",
        MetricType::Counter,
        summary.ticks_total,
    );
}

fn write_api_metrics(output: &mut String, summary: &MetricsSummary, api_active: bool) {
    write_metric(
        output,
        "person_location_geocode_api_on",
        "Geocode API switch (1=on)",
        MetricType::Gauge,
        u64::from(api_active),
    );
    write_metric(
        output,
        "person_location_api_calls_requested_total",
        "Provider calls made",
        MetricType::Counter,
        summary.api_calls_requested,
    );
    write_metric(
        output,
        "person_location_api_calls_skipped_total",
        "Refreshes skipped while the API switch was off",
        MetricType::Counter,
        summary.api_calls_skipped,
    );
    write_metric(
        output,
        "person_location_api_calls_throttled_total",
        "Provider calls delayed by global pacing",
        MetricType::Counter,
        summary.api_calls_throttled,
    );
    write_metric(
        output,
        "person_location_api_errors_total",
        "Reverse geocode failures",
        MetricType::Counter,
        summary.api_error_count,
    );
    write_metric(
        output,
        "person_location_route_errors_total",
        "Route lookup failures",
        MetricType::Counter,
        summary.route_error_count,
    );
    write_metric(
        output,
        "person_location_geocode_applied_total",
        "Refresh results merged",
        MetricType::Counter,
        summary.geocode_applied,
    );
    write_metric(
        output,
        "person_location_geocode_discarded_total",
        "Refresh results discarded as stale",
        MetricType::Counter,
        summary.geocode_discarded,
    );
    write_metric(
        output,
        "person_location_geocode_latency_p95_ms",
        "95th percentile refresh round-trip",
        MetricType::Gauge,
        summary.geocode_p95_ms,
    );
}

fn write_drop_metrics(output: &mut String, summary: &MetricsSummary) {
    write_metric(
        output,
        "person_location_ingress_dropped_total",
        "Commands dropped due to channel full",
        MetricType::Counter,
        summary.ingress_dropped,
    );
    write_metric(
        output,
        "person_location_egress_dropped_total",
        "State publishes dropped due to channel full",
        MetricType::Counter,
        summary.egress_dropped,
    );
}

/// Body, status and content type of a routed request
#[derive(Debug)]
struct Reply {
    status: StatusCode,
    content_type: &'static str,
    body: String,
}

impl Reply {
    fn json(status: StatusCode, body: String) -> Self {
        Self { status, content_type: CONTENT_TYPE_JSON, body }
    }

    fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self { status, content_type: CONTENT_TYPE_TEXT, body: body.into() }
    }
}

fn route(method: &Method, path: &str, query: Option<&str>, state: &HttpState) -> Reply {
    match (method, path) {
        (&Method::GET, "/metrics") => Reply::text(
            StatusCode::OK,
            format_prometheus_metrics(&state.metrics, state.registry.len(), state.throttle.is_active()),
        ),
        (&Method::GET, "/health") => Reply::text(StatusCode::OK, "ok"),
        (&Method::GET, "/persons") => {
            let persons: Vec<PersonStatePayload> = state
                .registry
                .snapshot()
                .iter()
                .map(PersonStatePayload::from_record)
                .collect();
            to_json(&persons)
        }
        (&Method::GET, "/api") => {
            let summary = state.metrics.report(state.registry.len());
            to_json(&IntegrationPayload::from_summary(
                &summary,
                state.throttle.is_active(),
                Utc::now(),
            ))
        }
        (&Method::POST, "/api/geocode/on") => enqueue(state, Command::SetGeocodeApi(true)),
        (&Method::POST, "/api/geocode/off") => enqueue(state, Command::SetGeocodeApi(false)),
        (&Method::POST, "/reverse_geocode") => match parse_reverse_geocode(query.unwrap_or("")) {
            Some(msg) => enqueue(state, Command::ReverseGeocode(msg)),
            None => Reply::json(
                StatusCode::BAD_REQUEST,
                r#"{"ok":false,"error":"entity_id_required"}"#.to_string(),
            ),
        },
        _ => Reply::text(StatusCode::NOT_FOUND, "Not Found"),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Reply {
    match serde_json::to_string(value) {
        Ok(body) => Reply::json(StatusCode::OK, body),
        Err(e) => {
            error!(error = %e, "http_encode_failed");
            Reply::text(StatusCode::INTERNAL_SERVER_ERROR, "encode failed")
        }
    }
}

fn enqueue(state: &HttpState, command: Command) -> Reply {
    match state.command_tx.try_send(command) {
        Ok(()) => Reply::json(StatusCode::ACCEPTED, r#"{"ok":true}"#.to_string()),
        Err(e) => {
            state.metrics.record_ingress_dropped();
            warn!(error = %e, "http_command_dropped");
            Reply::json(
                StatusCode::SERVICE_UNAVAILABLE,
                r#"{"ok":false,"error":"busy"}"#.to_string(),
            )
        }
    }
}

/// `entity_id` is required; `force_update` accepts true/1/on
fn parse_reverse_geocode(query: &str) -> Option<ReverseGeocodeMessage> {
    let mut msg = ReverseGeocodeMessage {
        entity_id: String::new(),
        force_update: false,
        friendly_name_template: None,
    };
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = percent_decode(value);
        match key {
            "entity_id" => msg.entity_id = value.trim().to_string(),
            "force_update" => {
                msg.force_update = matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "on")
            }
            "friendly_name_template" => msg.friendly_name_template = Some(value),
            _ => {}
        }
    }
    (!msg.entity_id.is_empty()).then_some(msg)
}

/// Decode `%XX` escapes and `+`; malformed escapes are kept verbatim
fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => match (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                (Some(hi), Some(lo)) => {
                    out.push(hi << 4 | lo);
                    i += 2;
                }
                _ => out.push(b'%'),
            },
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: HttpState,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let reply = route(req.method(), req.uri().path(), req.uri().query(), &state);
    let response = Response::builder()
        .status(reply.status)
        .header("Content-Type", reply.content_type)
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(reply.body)))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::from_static(b"internal error"))));
    Ok(response)
}

/// Start the HTTP server
pub async fn start_http_server(
    port: u16,
    state: HttpState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = %port, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PersonName;

    fn test_state(buffer: usize) -> (HttpState, mpsc::Receiver<Command>) {
        let metrics = Arc::new(Metrics::new());
        let (command_tx, command_rx) = mpsc::channel(buffer);
        let state = HttpState {
            metrics: metrics.clone(),
            registry: Arc::new(PersonRegistry::new("sensor")),
            throttle: Arc::new(GeocodeThrottle::new(true, metrics)),
            command_tx,
        };
        (state, command_rx)
    }

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_trigger_processed(150);
        metrics.record_trigger_processed(250);
        metrics.record_trigger_rejected(RejectReason::Stale);
        metrics.record_api_requested();

        let output = format_prometheus_metrics(&metrics, 3, true);

        assert!(output.contains("person_location_triggers_total 2"));
        assert!(output.contains("person_location_trigger_latency_us_bucket{le=\"200\"} 1"));
        assert!(output.contains("person_location_trigger_latency_us_count 2"));
        assert!(output.contains("person_location_triggers_rejected_total{reason=\"stale\"} 1"));
        assert!(output.contains("person_location_persons 3"));
        assert!(output.contains("person_location_geocode_api_on 1"));
        assert!(output.contains("person_location_api_calls_requested_total 1"));
    }

    #[test]
    fn test_switch_routes_enqueue_commands() {
        let (state, mut rx) = test_state(4);

        let reply = route(&Method::POST, "/api/geocode/off", None, &state);
        assert_eq!(reply.status, StatusCode::ACCEPTED);
        assert!(matches!(rx.try_recv(), Ok(Command::SetGeocodeApi(false))));

        let reply = route(&Method::GET, "/api/geocode/off", None, &state);
        assert_eq!(reply.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_reverse_geocode_route() {
        let (state, mut rx) = test_state(4);

        let reply = route(
            &Method::POST,
            "/reverse_geocode",
            Some("entity_id=sensor.rod_location&force_update=true&friendly_name_template=%7B%7Bperson_name%7D%7D+is+here"),
            &state,
        );
        assert_eq!(reply.status, StatusCode::ACCEPTED);
        match rx.try_recv() {
            Ok(Command::ReverseGeocode(msg)) => {
                assert_eq!(msg.entity_id, "sensor.rod_location");
                assert!(msg.force_update);
                assert_eq!(msg.friendly_name_template.as_deref(), Some("{{person_name}} is here"));
            }
            other => panic!("expected reverse geocode, got {:?}", other),
        }

        let reply = route(&Method::POST, "/reverse_geocode", Some("force_update=1"), &state);
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_full_queue_is_reported() {
        let (state, _rx) = test_state(1);
        route(&Method::POST, "/api/geocode/on", None, &state);

        let reply = route(&Method::POST, "/api/geocode/on", None, &state);
        assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(state.metrics.ingress_dropped(), 1);
    }

    #[test]
    fn test_persons_and_api_json() {
        let (state, _rx) = test_state(1);
        state.registry.register(PersonName::new("rod"), Utc::now());

        let reply = route(&Method::GET, "/persons", None, &state);
        assert_eq!(reply.content_type, CONTENT_TYPE_JSON);
        let persons: serde_json::Value = serde_json::from_str(&reply.body).unwrap();
        assert_eq!(persons[0]["entity_id"], "sensor.rod_location");
        assert_eq!(persons[0]["state"], "unknown");

        let reply = route(&Method::GET, "/api", None, &state);
        let api: serde_json::Value = serde_json::from_str(&reply.body).unwrap();
        assert_eq!(api["state"], "on");
        assert_eq!(api["persons"], 1);
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("a%20b+c"), "a b c");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
    }
}
