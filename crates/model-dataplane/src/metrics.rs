use prometheus::{Encoder, TextEncoder, Registry, IntCounterVec, IntGauge, HistogramVec};
use lazy_static::lazy_static;
use std::sync::OnceLock;
use axum::response::IntoResponse;
use axum::http::StatusCode;
lazy_static! {
    static ref REGISTRY: Registry = Registry::new();
}
static REQ_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();
static ACTIVE_STREAMS: OnceLock<IntGauge> = OnceLock::new();
static INFERENCE_LATENCY: OnceLock<HistogramVec> = OnceLock::new();
pub fn init_metrics() {

    let req_counter = REQ_COUNTER.get_or_init(|| {
        IntCounterVec::new(
            prometheus::opts!("requests_total", "Total requests per route"),
            &["route", "status"]
        ).expect("valid requests_total metric")
    });

    let active_streams = ACTIVE_STREAMS.get_or_init(|| {
        IntGauge::new("active_streams", "Open server-sent-event responses").expect("valid active_streams metric")
    });

    let inference_latency = INFERENCE_LATENCY.get_or_init(|| {
        HistogramVec::new(
            prometheus::HistogramOpts::new(
                "inference_latency_seconds",
                "Time spent inside model predict/explain/generate calls"
            ),
            &["model", "kind"]
        ).expect("valid inference_latency_seconds metric")
    });
    REGISTRY.register(Box::new(req_counter.clone())).ok();
    REGISTRY.register(Box::new(active_streams.clone())).ok();
    REGISTRY.register(Box::new(inference_latency.clone())).ok();
}
pub fn inc_request(route: &str, status: &str) {
    if let Some(counter) = REQ_COUNTER.get() {
        counter.with_label_values(&[route, status]).inc();
    }
}
pub fn inc_streams() {
    if let Some(gauge) = ACTIVE_STREAMS.get() {
        gauge.inc();
    }
}
pub fn dec_streams() {
    if let Some(gauge) = ACTIVE_STREAMS.get() {
        gauge.dec();
    }
}
pub fn observe_inference(model: &str, kind: &str, seconds: f64) {
    if let Some(histogram) = INFERENCE_LATENCY.get() {
        histogram.with_label_values(&[model, kind]).observe(seconds);
    }
}
pub async fn get_metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            e.to_string().into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        buffer,
    )
}
