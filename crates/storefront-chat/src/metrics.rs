use prometheus::{Encoder, TextEncoder, Registry, IntCounterVec, IntGauge, Histogram};
use lazy_static::lazy_static;
use std::sync::OnceLock;

lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}

static REQ_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
static WS_CONNECTIONS: OnceLock<IntGauge> = OnceLock::new();
static REGISTRATIONS: OnceLock<IntGauge> = OnceLock::new();
static TURN_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
static GENERATION_LATENCY: OnceLock<Histogram> = OnceLock::new();

/// Idempotent; collectors are recorded only after this has run.
pub fn init_metrics() {
    let req_counter = REQ_COUNTER.get_or_init(|| {
        IntCounterVec::new(
            prometheus::opts!("http_requests_total", "Total HTTP requests per route"),
            &["route", "status"]
        ).expect("valid http_requests_total metric")
    });

    let ws_connections = WS_CONNECTIONS.get_or_init(|| {
        IntGauge::new("ws_connections_active", "Open chat WebSocket connections")
            .expect("valid ws_connections_active metric")
    });

    let registrations = REGISTRATIONS.get_or_init(|| {
        IntGauge::new("conversation_registrations", "Connections currently joined to a conversation")
            .expect("valid conversation_registrations metric")
    });

    let turn_counter = TURN_COUNTER.get_or_init(|| {
        IntCounterVec::new(
            prometheus::opts!("chat_turns_total", "Chat turns by final outcome"),
            &["outcome"]
        ).expect("valid chat_turns_total metric")
    });

    let generation_latency = GENERATION_LATENCY.get_or_init(|| {
        Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "generation_latency_seconds",
                "Language model round-trip time"
            ).buckets(vec![0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0])
        ).expect("valid generation_latency_seconds metric")
    });

    REGISTRY.register(Box::new(req_counter.clone())).ok();
    REGISTRY.register(Box::new(ws_connections.clone())).ok();
    REGISTRY.register(Box::new(registrations.clone())).ok();
    REGISTRY.register(Box::new(turn_counter.clone())).ok();
    REGISTRY.register(Box::new(generation_latency.clone())).ok();
}

pub fn inc_request(route: &str, status: &str) {
    if let Some(counter) = REQ_COUNTER.get() {
        counter.with_label_values(&[route, status]).inc();
    }
}

pub fn inc_ws_connections() {
    if let Some(gauge) = WS_CONNECTIONS.get() {
        gauge.inc();
    }
}

pub fn dec_ws_connections() {
    if let Some(gauge) = WS_CONNECTIONS.get() {
        gauge.dec();
    }
}

pub fn set_registrations(count: usize) {
    if let Some(gauge) = REGISTRATIONS.get() {
        gauge.set(count as i64);
    }
}

pub fn inc_turn(outcome: &str) {
    if let Some(counter) = TURN_COUNTER.get() {
        counter.with_label_values(&[outcome]).inc();
    }
}

pub fn observe_generation_latency(seconds: f64) {
    if let Some(histogram) = GENERATION_LATENCY.get() {
        histogram.observe(seconds);
    }
}

/// Prometheus text exposition of every registered collector
pub fn render() -> anyhow::Result<Vec<u8>> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(buffer)
}

#[cfg(feature = "cli")]
pub async fn get_metrics() -> axum::response::Response {
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    match render() {
        Ok(buffer) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            buffer,
        ).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}
