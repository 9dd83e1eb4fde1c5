/// Metrics and telemetry for the account portal
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - HTTP request counts and latencies
/// - Registrations, activations and logins
/// - Token rejections by purpose and internal reason
/// - Password reset requests and completions
/// - Document uploads

use axum::{extract::Request, middleware::Next, response::Response};
use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};
use std::time::Instant;

lazy_static! {
    // ========== HTTP Metrics ==========

    /// Total HTTP requests by method, path, and status
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    /// HTTP request duration in seconds
    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request latencies in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // ========== Account Metrics ==========

    /// Accounts registered, by category slug
    pub static ref ACCOUNT_REGISTRATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "account_registrations_total",
        "Total number of accounts registered",
        &["category"]
    )
    .unwrap();

    /// Successful activation requests
    pub static ref ACCOUNT_ACTIVATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "account_activations_total",
        "Total number of successful activation requests",
        &["outcome"]
    )
    .unwrap();

    /// Login attempts by outcome
    pub static ref LOGIN_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "login_attempts_total",
        "Total number of login attempts",
        &["outcome"]
    )
    .unwrap();

    // ========== Token Metrics ==========

    /// Rejected tokens by purpose and reason
    pub static ref TOKEN_REJECTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "token_rejections_total",
        "Total number of rejected activation and reset tokens",
        &["purpose", "reason"]
    )
    .unwrap();

    /// Password reset requests accepted (neutral response sent)
    pub static ref PASSWORD_RESET_REQUESTS_TOTAL: IntCounter = register_int_counter!(
        "password_reset_requests_total",
        "Total number of password reset requests"
    )
    .unwrap();

    /// Password resets completed
    pub static ref PASSWORD_RESETS_COMPLETED_TOTAL: IntCounter = register_int_counter!(
        "password_resets_completed_total",
        "Total number of completed password resets"
    )
    .unwrap();

    // ========== Document Metrics ==========

    /// Document uploads by extension
    pub static ref DOCUMENTS_UPLOADED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "documents_uploaded_total",
        "Total number of uploaded documents",
        &["extension"]
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration);
}

/// Middleware recording every request's method, path, status and latency
///
/// Query strings are not part of the path label, so emailed secrets never
/// end up in a metric.
pub async fn track_requests(request: Request, next: Next) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    let response = next.run(request).await;

    record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}
