//! Tests for metrics integration.
//!
//! Uses `metrics_util::debugging::DebuggingRecorder` to capture and assert
//! on emitted metrics without needing a real exporter.

use std::time::Duration;

use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tillit::telemetry;
use tillit::{CircuitBreakerConfig, DataClient, ProfileRequest, RetryConfig};

// ============================================================================
// Snapshot type alias for readability
// ============================================================================

type SnapshotVec = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

// ============================================================================
// Helpers
// ============================================================================

/// Sum all counter values matching a given metric name.
fn counter_total(snapshot: &SnapshotVec, name: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Sum counter values for `name` whose `label` equals `value`.
fn counter_with_label(snapshot: &SnapshotVec, name: &str, label: &str, value: &str) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| {
            key.kind() == MetricKind::Counter
                && key.key().name() == name
                && key
                    .key()
                    .labels()
                    .any(|l| l.key() == label && l.value() == value)
        })
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

/// Check if any histogram entries exist for a given metric name.
fn has_histogram(snapshot: &SnapshotVec, name: &str) -> bool {
    snapshot
        .iter()
        .any(|(key, _, _, _)| key.kind() == MetricKind::Histogram && key.key().name() == name)
}

fn profile() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "success": true,
        "riskTier": "ZERO_RISK",
        "riskScore": 5,
        "totalOrders": 8,
        "failedAttempts": 0,
        "successfulDeliveries": 8,
        "isNewCustomer": false,
        "message": "Reliable customer"
    }))
}

fn fast_retry() -> RetryConfig {
    RetryConfig::new()
        .max_retries(2)
        .base_delay(Duration::from_millis(1))
        .jitter(false)
}

// ============================================================================
// Tests
// ============================================================================

/// Runs async code within a local recorder scope on the multi-thread runtime.
///
/// `block_in_place` ensures the sync `with_local_recorder` closure stays
/// on the current thread while `block_on` drives the inner async work.
#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn remote_then_cached_fetch_records_metrics() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let server = MockServer::start().await;
                Mock::given(method("GET"))
                    .and(path("/api/risk-profile"))
                    .respond_with(profile())
                    .mount(&server)
                    .await;
                let client = DataClient::builder()
                    .base_url(server.uri())
                    .build()
                    .unwrap();
                let request = ProfileRequest::new().order_id("1001");
                client.fetch_profile(&request).await;
                client.fetch_profile(&request).await;
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(counter_total(&snapshot, telemetry::REQUESTS_TOTAL), 2);
    assert_eq!(
        counter_with_label(&snapshot, telemetry::REQUESTS_TOTAL, "outcome", "remote"),
        1
    );
    assert_eq!(
        counter_with_label(&snapshot, telemetry::REQUESTS_TOTAL, "outcome", "cache"),
        1
    );
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_HITS_TOTAL), 1);
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_MISSES_TOTAL), 1);
    assert_eq!(counter_total(&snapshot, telemetry::FALLBACKS_TOTAL), 0);
    assert!(
        has_histogram(&snapshot, telemetry::REQUEST_DURATION_SECONDS),
        "expected a duration histogram entry"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn retries_and_fallbacks_are_counted() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let server = MockServer::start().await;
                Mock::given(method("GET"))
                    .and(path("/api/risk-profile"))
                    .respond_with(ResponseTemplate::new(503))
                    .mount(&server)
                    .await;
                let client = DataClient::builder()
                    .base_url(server.uri())
                    .retry(fast_retry())
                    .build()
                    .unwrap();
                client
                    .fetch_profile(&ProfileRequest::new().order_id("1001"))
                    .await;
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(counter_total(&snapshot, telemetry::RETRIES_TOTAL), 2);
    assert_eq!(
        counter_with_label(&snapshot, telemetry::FALLBACKS_TOTAL, "kind", "SERVER_ERROR"),
        1
    );
    assert_eq!(
        counter_with_label(&snapshot, telemetry::REQUESTS_TOTAL, "outcome", "fallback"),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn circuit_transitions_and_rejections_are_counted() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let server = MockServer::start().await;
                Mock::given(method("GET"))
                    .and(path("/api/risk-profile"))
                    .respond_with(ResponseTemplate::new(500))
                    .mount(&server)
                    .await;
                let client = DataClient::builder()
                    .base_url(server.uri())
                    .retry(RetryConfig::disabled())
                    .circuit_breaker(CircuitBreakerConfig::new().failure_threshold(1))
                    .build()
                    .unwrap();
                let request = ProfileRequest::new().order_id("1001");
                client.fetch_profile(&request).await;
                client.fetch_profile(&request).await;
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(
        counter_with_label(&snapshot, telemetry::CIRCUIT_TRANSITIONS_TOTAL, "to", "open"),
        1
    );
    assert_eq!(counter_total(&snapshot, telemetry::CIRCUIT_REJECTIONS_TOTAL), 1);
    assert_eq!(
        counter_with_label(
            &snapshot,
            telemetry::FALLBACKS_TOTAL,
            "kind",
            "CIRCUIT_BREAKER_ERROR"
        ),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn validation_fallback_is_counted_without_network() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let client = DataClient::builder()
                    .base_url("http://127.0.0.1:1")
                    .build()
                    .unwrap();
                client.fetch_profile(&ProfileRequest::new()).await;
            })
        })
    });

    let snapshot = snapshotter.snapshot().into_vec();

    assert_eq!(
        counter_with_label(&snapshot, telemetry::FALLBACKS_TOTAL, "kind", "VALIDATION_ERROR"),
        1
    );
    assert!(!has_histogram(&snapshot, telemetry::REQUEST_DURATION_SECONDS));
}

#[tokio::test]
async fn metrics_are_noop_without_recorder() {
    // Verify no panics when no recorder is installed.
    let client = DataClient::builder()
        .base_url("http://127.0.0.1:1")
        .build()
        .unwrap();
    let result = client.fetch_profile(&ProfileRequest::new()).await;
    assert!(result.is_fallback());
}
