//! Readiness probe tests against a mock inference API.

use std::time::Duration;

use inference_host::{ProbeConfig, ReadinessOutcome, ReadinessProbe};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn tags() -> serde_json::Value {
    json!({
        "models": [
            { "name": "demo:1b", "size": 1_300_000_000_u64, "digest": "sha256:abc" }
        ]
    })
}

fn config(interval_ms: u64, timeout_ms: u64) -> ProbeConfig {
    ProbeConfig {
        interval: Duration::from_millis(interval_ms),
        timeout: Duration::from_millis(timeout_ms),
        request_timeout: Duration::from_millis(300),
    }
}

#[tokio::test]
async fn test_ready_within_one_interval() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tags()))
        .mount(&server)
        .await;

    let probe = ReadinessProbe::new(server.uri(), config(500, 5_000)).unwrap();
    let report = probe.wait(&CancellationToken::new()).await;

    assert_eq!(report.outcome, ReadinessOutcome::Ready);
    assert_eq!(report.attempts, 1);
    assert!(report.elapsed < Duration::from_millis(500));
    assert_eq!(report.models, vec!["demo:1b".to_string()]);
}

#[tokio::test]
async fn test_ready_after_warmup() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "models": [] })))
        .mount(&server)
        .await;

    let probe = ReadinessProbe::new(server.uri(), config(50, 5_000)).unwrap();
    let report = probe.wait(&CancellationToken::new()).await;

    assert_eq!(report.outcome, ReadinessOutcome::Ready);
    assert_eq!(report.attempts, 3);
    assert!(report.models.is_empty());
}

#[tokio::test]
async fn test_silent_endpoint_times_out_at_deadline() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(tags())
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let interval = Duration::from_millis(200);
    let timeout = Duration::from_millis(1_000);
    let probe = ReadinessProbe::new(server.uri(), config(200, 1_000)).unwrap();
    let report = probe.wait(&CancellationToken::new()).await;

    assert_eq!(report.outcome, ReadinessOutcome::Timeout);
    assert!(report.elapsed >= timeout, "elapsed {:?}", report.elapsed);
    assert!(
        report.elapsed <= timeout + interval + Duration::from_millis(300),
        "elapsed {:?}",
        report.elapsed
    );
    assert!(report.last_error.unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_error_status_is_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(500).set_body_string("loading"))
        .mount(&server)
        .await;

    let probe = ReadinessProbe::new(server.uri(), config(100, 500)).unwrap();
    let report = probe.wait(&CancellationToken::new()).await;

    assert_eq!(report.outcome, ReadinessOutcome::Timeout);
    assert!(report.attempts > 1);
    assert!(report.last_error.unwrap().contains("HTTP 500"));
}

#[tokio::test]
async fn test_malformed_body_is_not_ready() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
        .mount(&server)
        .await;

    let probe = ReadinessProbe::new(server.uri(), config(100, 400)).unwrap();
    let report = probe.wait(&CancellationToken::new()).await;

    assert_eq!(report.outcome, ReadinessOutcome::Timeout);
    assert!(report.last_error.unwrap().contains("malformed"));
}

#[tokio::test]
async fn test_closed_port_is_unreachable() {
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let probe = ReadinessProbe::for_host("127.0.0.1", port, config(100, 600)).unwrap();
    let report = probe.wait(&CancellationToken::new()).await;

    assert_eq!(report.outcome, ReadinessOutcome::Unreachable);
    assert!(report.last_error.unwrap().contains("connection failed"));
}

#[tokio::test]
async fn test_cancel_mid_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let probe = ReadinessProbe::new(
        server.uri(),
        ProbeConfig {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
        },
    )
    .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let report = probe.wait(&cancel).await;
    assert_eq!(report.outcome, ReadinessOutcome::Cancelled);
    assert!(report.elapsed < Duration::from_secs(2));
}

#[tokio::test]
async fn test_cancel_during_sleep() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let probe = ReadinessProbe::new(server.uri(), config(10_000, 60_000)).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let report = probe.wait(&cancel).await;
    assert_eq!(report.outcome, ReadinessOutcome::Cancelled);
    assert_eq!(report.attempts, 1);
    assert!(report.elapsed < Duration::from_secs(2));
    assert!(report.last_error.unwrap().contains("HTTP 503"));
}
