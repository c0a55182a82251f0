//! API Integration Tests for fleetwatch
//!
//! Drives the collector REST API over a real listener.

use std::sync::Arc;

use fleetwatch::server::{AppState, create_router};
use fleetwatch::{Collector, CollectorSettings, StorageBuilder, StorageHandles};
use serde_json::{Value, json};
use tokio::net::TcpListener;

// =============================================================================
// Test Helpers
// =============================================================================

/// Start a collector on a random port and return its base URL.
async fn start_test_server_with(
    builder: StorageBuilder,
    settings: CollectorSettings,
) -> (String, StorageHandles) {
    let handles = builder.build().await.expect("Failed to build storage");
    let collector = Arc::new(Collector::from_handles(&handles, settings));
    let router = create_router(AppState { collector });

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let addr = listener.local_addr().expect("Failed to get local addr");

    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("http://{}", addr), handles)
}

async fn start_test_server() -> (String, StorageHandles) {
    start_test_server_with(StorageBuilder::memory(), CollectorSettings::default()).await
}

fn report_body(hosts_up: u32, latency: Option<f64>) -> Value {
    json!({
        "scan_id": "scan_1",
        "timestamp": "2024-05-01T10:00:00Z",
        "summary": {
            "total_hosts": hosts_up + 1,
            "hosts_up": hosts_up,
            "hosts_down": 1,
            "total_ports_open": 2
        },
        "wan_latency_ms": latency,
        "scan_duration_seconds": 4.2,
        "hosts": [
            {"ip": "10.0.0.1", "state": "up", "ports": [
                {"port": 22, "state": "open", "service": "ssh"},
                {"port": 80, "state": "open", "service": "http"}
            ]}
        ]
    })
}

// =============================================================================
// Health Probe Tests
// =============================================================================

#[tokio::test]
async fn test_health_probes() {
    let (base_url, handles) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/healthz", base_url))
        .send()
        .await
        .expect("Failed to send healthz request");
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("Failed to parse healthz response");
    assert_eq!(body["status"], "ok");

    let resp = client
        .get(format!("{}/readyz", base_url))
        .send()
        .await
        .expect("Failed to send readyz request");
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.expect("Failed to parse readyz response");
    assert_eq!(body["db"], "ready");

    let resp = client
        .get(format!("{}/api/status", base_url))
        .send()
        .await
        .expect("Failed to fetch status");
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "online");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(body["statistics"]["total_probes"], 0);

    handles.shutdown().await;
}

// =============================================================================
// Probe Lifecycle
// =============================================================================

#[tokio::test]
async fn test_register_and_list() {
    let (base_url, handles) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/probes", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!([]));

    let resp = client
        .post(format!("{}/api/probe/register", base_url))
        .json(&json!({"probe_id": "nw7", "display_name": "Example FC"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let created: Value = resp.json().await.unwrap();
    assert_eq!(created["probe_id"], "nw7");
    assert_eq!(created["status"], "connected");

    // Re-register keeps registered_at, renames.
    let resp = client
        .post(format!("{}/api/probe/register", base_url))
        .json(&json!({"probe_id": "nw7", "display_name": "Example FC North"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let renamed: Value = resp.json().await.unwrap();
    assert_eq!(renamed["display_name"], "Example FC North");
    assert_eq!(renamed["registered_at"], created["registered_at"]);

    let body: Value = client
        .get(format!("{}/api/probes", base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let probes = body.as_array().unwrap();
    assert_eq!(probes.len(), 1);
    assert_eq!(probes[0]["display_name"], "Example FC North");

    let stats: Value = client
        .get(format!("{}/api/statistics", base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["total_probes"], 1);
    assert_eq!(stats["connected_probes"], 1);
    assert_eq!(stats["disconnected_probes"], 0);

    handles.shutdown().await;
}

#[tokio::test]
async fn test_register_validation() {
    let (base_url, handles) = start_test_server().await;
    let client = reqwest::Client::new();

    for body in [
        json!({"display_name": "No Id"}),
        json!({"probe_id": "nw7"}),
        json!({"probe_id": "", "display_name": "Empty"}),
        json!({"probe_id": "bad id!", "display_name": "Bad"}),
    ] {
        let resp = client
            .post(format!("{}/api/probe/register", base_url))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "body {body} should be rejected");
        let err: Value = resp.json().await.unwrap();
        assert!(err["error"].is_string());
    }

    let probes: Value = client
        .get(format!("{}/api/probes", base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(probes, json!([]));

    handles.shutdown().await;
}

// =============================================================================
// Reports
// =============================================================================

#[tokio::test]
async fn test_report_then_latest_and_statistics() {
    let (base_url, handles) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/probe/nw7/report", base_url))
        .json(&report_body(3, Some(10.0)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let ack: Value = resp.json().await.unwrap();
    assert_eq!(ack["accepted"], true);

    let resp = client
        .post(format!("{}/api/probe/nw8/report", base_url))
        .json(&report_body(2, None))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let latest: Value = client
        .get(format!("{}/api/probe/nw7/report", base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(latest["probe_id"], "nw7");
    assert_eq!(latest["summary"]["hosts_up"], 3);
    assert_eq!(latest["captured_at"], "2024-05-01T10:00:00Z");
    assert_eq!(latest["hosts"][0]["address"], "10.0.0.1");

    let stats: Value = client
        .get(format!("{}/api/statistics", base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["total_probes"], 2);
    assert_eq!(stats["total_equipment"], 5);
    // Null latency of nw8 stays out of the average.
    assert_eq!(stats["average_wan_latency"], 10.0);

    handles.shutdown().await;
}

#[tokio::test]
async fn test_malformed_report_changes_nothing() {
    let (base_url, handles) = start_test_server().await;
    let client = reqwest::Client::new();

    client
        .post(format!("{}/api/probe/nw7/report", base_url))
        .json(&report_body(3, Some(10.0)))
        .send()
        .await
        .unwrap();

    let resp = client
        .post(format!("{}/api/probe/nw7/report", base_url))
        .header("content-type", "application/json")
        .body("{\"summary\": ")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(format!("{}/api/probe/nw7/report", base_url))
        .json(&json!({"wan_latency_ms": 5.0}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let history: Value = client
        .get(format!("{}/api/probe/nw7/reports", base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["summary"]["hosts_up"], 3);

    handles.shutdown().await;
}

#[tokio::test]
async fn test_report_history_order_and_limit() {
    let (base_url, handles) = start_test_server().await;
    let client = reqwest::Client::new();

    for hosts_up in 1..=4 {
        let resp = client
            .post(format!("{}/api/probe/nw7/report", base_url))
            .json(&report_body(hosts_up, Some(9.5)))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
    }

    let history: Value = client
        .get(format!("{}/api/probe/nw7/reports?limit=2", base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let entries = history.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["summary"]["hosts_up"], 3);
    assert_eq!(entries[1]["summary"]["hosts_up"], 4);

    let resp = client
        .get(format!("{}/api/probe/ghost/reports", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    handles.shutdown().await;
}

// =============================================================================
// Logs
// =============================================================================

#[tokio::test]
async fn test_log_upload_and_fetch() {
    let (base_url, handles) = start_test_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/probe/nw7/logs", base_url))
        .json(&json!({
            "timestamp": "2024-05-01T10:00:00Z",
            "lines": "scan started\nscan done",
            "total_lines": 40,
            "sent_lines": 2,
            "sequence": 100
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let resp = client
        .post(format!("{}/api/probe/nw7/logs", base_url))
        .json(&json!({
            "lines": "older",
            "total_lines": 1,
            "sent_lines": 1,
            "sequence": 50
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let ack: Value = resp.json().await.unwrap();
    assert_eq!(ack["accepted"], false);
    assert_eq!(ack["reason"], "stale");

    let chunk: Value = client
        .get(format!("{}/api/probe/nw7/logs", base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(chunk["content"], "scan started\nscan done");
    assert_eq!(chunk["total_lines_at_source"], 40);
    assert_eq!(chunk["sent_lines"], 2);

    let resp = client
        .post(format!("{}/api/probe/nw7/logs", base_url))
        .json(&json!({"lines": "x", "total_lines": 1, "sent_lines": 5}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    handles.shutdown().await;
}

// =============================================================================
// Strict Mode and Durable Storage
// =============================================================================

#[tokio::test]
async fn test_strict_mode_rejects_unknown_probes() {
    let settings = CollectorSettings {
        auto_register: false,
        ..CollectorSettings::default()
    };
    let (base_url, handles) = start_test_server_with(StorageBuilder::memory(), settings).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/probe/ghost/heartbeat", base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .post(format!("{}/api/probe/ghost/report", base_url))
        .json(&report_body(1, None))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let probes: Value = client
        .get(format!("{}/api/probes", base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(probes, json!([]));

    handles.shutdown().await;
}

#[tokio::test]
async fn test_sqlite_backend_persists_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("fleet.db").display());

    let (base_url, handles) = start_test_server_with(
        StorageBuilder::sqlite(url.clone()),
        CollectorSettings::default(),
    )
    .await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/api/probe/nw7/report", base_url))
        .json(&report_body(3, Some(12.0)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    handles.shutdown().await;

    let (base_url, handles) =
        start_test_server_with(StorageBuilder::sqlite(url), CollectorSettings::default()).await;
    let latest: Value = client
        .get(format!("{}/api/probe/nw7/report", base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(latest["summary"]["hosts_up"], 3);
    assert_eq!(latest["wan_latency_ms"], 12.0);

    handles.shutdown().await;
}
