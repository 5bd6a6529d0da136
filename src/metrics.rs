//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Once;

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedikit_http_requests_total", "Total number of HTTP requests"),
        &["method", "endpoint", "status"]
    ).expect("metric can be created");

    // Inbox Metrics
    pub static ref ACTIVITIES_RECEIVED: IntCounterVec = IntCounterVec::new(
        Opts::new("fedikit_activities_received_total", "Total number of activities accepted by the inbox"),
        &["activity_type"]
    ).expect("metric can be created");
    pub static ref INBOX_DUPLICATES_TOTAL: IntCounter = IntCounter::new(
        "fedikit_inbox_duplicates_total",
        "Total number of suppressed duplicate inbox deliveries"
    ).expect("metric can be created");
    pub static ref SIGNATURE_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedikit_signature_failures_total", "Total number of rejected inbound signatures"),
        &["reason"]
    ).expect("metric can be created");

    // Delivery Metrics
    pub static ref DELIVERY_ATTEMPTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedikit_delivery_attempts_total", "Total number of outbound delivery attempts"),
        &["outcome"]
    ).expect("metric can be created");
    pub static ref DELIVERY_JOBS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedikit_delivery_jobs_total", "Total number of delivery jobs reaching a terminal state"),
        &["state"]
    ).expect("metric can be created");
    pub static ref FEDERATION_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            "fedikit_federation_request_duration_seconds",
            "Federation request duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["direction"]
    ).expect("metric can be created");

    // Actor Resolver Metrics
    pub static ref ACTOR_FETCHES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedikit_actor_fetches_total", "Total number of remote actor fetches"),
        &["result"]
    ).expect("metric can be created");
    pub static ref CACHE_HITS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedikit_cache_hits_total", "Total number of cache hits"),
        &["cache_name"]
    ).expect("metric can be created");
    pub static ref CACHE_MISSES_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedikit_cache_misses_total", "Total number of cache misses"),
        &["cache_name"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("fedikit_errors_total", "Total number of errors returned to peers"),
        &["error_type"]
    ).expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
            .expect("HTTP_REQUESTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(ACTIVITIES_RECEIVED.clone()))
            .expect("ACTIVITIES_RECEIVED can be registered");
        REGISTRY
            .register(Box::new(INBOX_DUPLICATES_TOTAL.clone()))
            .expect("INBOX_DUPLICATES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(SIGNATURE_FAILURES_TOTAL.clone()))
            .expect("SIGNATURE_FAILURES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(DELIVERY_ATTEMPTS_TOTAL.clone()))
            .expect("DELIVERY_ATTEMPTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(DELIVERY_JOBS_TOTAL.clone()))
            .expect("DELIVERY_JOBS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(FEDERATION_REQUEST_DURATION_SECONDS.clone()))
            .expect("FEDERATION_REQUEST_DURATION_SECONDS can be registered");
        REGISTRY
            .register(Box::new(ACTOR_FETCHES_TOTAL.clone()))
            .expect("ACTOR_FETCHES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(CACHE_HITS_TOTAL.clone()))
            .expect("CACHE_HITS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(CACHE_MISSES_TOTAL.clone()))
            .expect("CACHE_MISSES_TOTAL can be registered");
        REGISTRY
            .register(Box::new(ERRORS_TOTAL.clone()))
            .expect("ERRORS_TOTAL can be registered");

        tracing::info!("Metrics registry initialized");
    });
}

/// Content type of the Prometheus text exposition format
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Encode every registered metric in the text exposition format.
pub fn render() -> Result<String, prometheus::Error> {
    use prometheus::{Encoder, TextEncoder};

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
