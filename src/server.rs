//! HTTP API for fleetwatch.
//!
//! JSON endpoints for probe agents (register, heartbeat, report and log
//! uploads) and for readers (probe views, reports, logs, statistics).

use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State, rejection::QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::collector::{Collector, CollectorError, RegisterRequest, UploadAck, parse_body};
use crate::storage::LogSaveOutcome;

/// Largest accepted request body (reports with many hosts can be big).
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub collector: Arc<Collector>,
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    db: Option<String>,
}

/// Error body: `{"error": "..."}`.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Query parameters for the report history API.
#[derive(Debug, Deserialize)]
pub struct HistoryQueryParams {
    pub limit: Option<u32>,
}

/// Maps collector failures onto HTTP status codes.
#[derive(Debug)]
pub struct ApiError(CollectorError);

impl From<CollectorError> for ApiError {
    fn from(err: CollectorError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CollectorError::Validation(_) => StatusCode::BAD_REQUEST,
            CollectorError::NotFound(_) => StatusCode::NOT_FOUND,
            CollectorError::Storage(err) => {
                tracing::error!(error = %err, "Storage failure while handling request");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let app_state = Arc::new(state);

    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/api/status", get(status_handler))
        .route("/api/statistics", get(statistics_handler))
        .route("/api/probes", get(probes_handler))
        .route("/api/probe/register", post(register_handler))
        .route("/api/probe/{id}", get(probe_handler))
        .route("/api/probe/{id}/heartbeat", post(heartbeat_handler))
        .route(
            "/api/probe/{id}/report",
            get(latest_report_handler).post(upload_report_handler),
        )
        .route("/api/probe/{id}/reports", get(report_history_handler))
        .route(
            "/api/probe/{id}/logs",
            get(latest_logs_handler).post(upload_logs_handler),
        )
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

/// Liveness probe.
async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        db: None,
    })
}

/// Readiness probe that checks the storage backend answers.
async fn readyz_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.collector.ready().await {
        Ok(()) => Json(HealthResponse {
            status: "ok".to_string(),
            db: Some("ready".to_string()),
        })
        .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "not_ready".to_string(),
                    db: Some(err.to_string()),
                }),
            )
                .into_response()
        }
    }
}

async fn status_handler(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    Ok(Json(state.collector.status().await?).into_response())
}

async fn statistics_handler(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    Ok(Json(state.collector.statistics().await?).into_response())
}

async fn probes_handler(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    Ok(Json(state.collector.probes().await?).into_response())
}

async fn probe_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    Ok(Json(state.collector.probe(&id).await?).into_response())
}

async fn register_handler(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult<Response> {
    let req: RegisterRequest = parse_body(&body, "registration")?;
    let view = state
        .collector
        .register_probe(&req.probe_id, &req.display_name)
        .await?;
    Ok((StatusCode::CREATED, Json(view)).into_response())
}

async fn heartbeat_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    Ok(Json(state.collector.heartbeat(&id).await?).into_response())
}

async fn upload_report_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Response> {
    state.collector.upload_report(&id, &body).await?;
    Ok((StatusCode::CREATED, Json(UploadAck::accepted())).into_response())
}

async fn latest_report_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    Ok(Json(state.collector.latest_report(&id).await?).into_response())
}

async fn report_history_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    query: Result<Query<HistoryQueryParams>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(params) =
        query.map_err(|e| CollectorError::Validation(format!("invalid query: {}", e.body_text())))?;
    let history = state.collector.report_history(&id, params.limit).await?;
    Ok(Json(history).into_response())
}

async fn upload_logs_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Response> {
    let response = match state.collector.upload_logs(&id, &body).await? {
        LogSaveOutcome::Stored => (StatusCode::CREATED, Json(UploadAck::accepted())),
        LogSaveOutcome::Stale { .. } => (StatusCode::OK, Json(UploadAck::stale())),
    };
    Ok(response.into_response())
}

async fn latest_logs_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    Ok(Json(state.collector.latest_logs(&id).await?).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{CollectorSettings, ManualClock};
    use crate::storage::MemoryStore;
    use axum::body::Body;
    use axum::http::{Request, header};
    use chrono::DateTime;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn create_test_state(settings: CollectorSettings) -> (AppState, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        let collector = Collector::new(store.clone(), store.clone(), store, settings)
            .with_clock(clock.clone());
        (
            AppState {
                collector: Arc::new(collector),
            },
            clock,
        )
    }

    fn app() -> Router {
        create_router(create_test_state(CollectorSettings::default()).0)
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn report(hosts_up: u32, latency: Option<f64>) -> serde_json::Value {
        serde_json::json!({
            "timestamp": "2024-05-01T10:00:00Z",
            "summary": {
                "total_hosts": hosts_up,
                "hosts_up": hosts_up,
                "hosts_down": 0,
                "total_ports_open": 1
            },
            "wan_latency_ms": latency,
            "scan_duration_seconds": 3.0,
            "hosts": [
                {"ip": "192.168.1.10", "state": "up", "ports": [{"port": 22, "state": "open"}]}
            ]
        })
    }

    #[tokio::test]
    async fn test_healthz_endpoint() {
        let (status, body) = send(&app(), "GET", "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let (status, body) = send(&app(), "GET", "/readyz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["db"], "ready");
    }

    #[tokio::test]
    async fn test_register_endpoint() {
        let app = app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/probe/register",
            Some(serde_json::json!({"probe_id": "nw7", "display_name": "Example FC"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["probe_id"], "nw7");
        assert_eq!(body["status"], "connected");
        assert_eq!(body["registered_at"], body["last_contact_at"]);

        let (status, body) = send(&app, "GET", "/api/probes", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_missing_fields() {
        let app = app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/probe/register",
            Some(serde_json::json!({"probe_id": "nw7"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("display_name"));

        let (status, _) = send(&app, "POST", "/api/probe/register", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = send(&app, "GET", "/api/probes", None).await;
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_report_upload_and_statistics() {
        let app = app();
        let (status, body) = send(
            &app,
            "POST",
            "/api/probe/nw7/report",
            Some(report(3, Some(20.0))),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["accepted"], true);

        let (status, body) = send(&app, "GET", "/api/probe/nw7/report", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"]["hosts_up"], 3);
        assert_eq!(body["probe_id"], "nw7");
        assert_eq!(body["hosts"][0]["address"], "192.168.1.10");

        let (_, stats) = send(&app, "GET", "/api/statistics", None).await;
        assert_eq!(stats["total_probes"], 1);
        assert_eq!(stats["total_equipment"], 3);
        assert_eq!(stats["average_wan_latency"], 20.0);

        let (_, status_body) = send(&app, "GET", "/api/status", None).await;
        assert_eq!(status_body["status"], "online");
        assert_eq!(status_body["statistics"]["total_probes"], 1);
    }

    #[tokio::test]
    async fn test_malformed_report_rejected() {
        let app = app();
        send(&app, "POST", "/api/probe/nw7/report", Some(report(3, None))).await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/probe/nw7/report",
            Some(serde_json::json!({"summary": {"total_hosts": 5}, "hosts": []})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (_, latest) = send(&app, "GET", "/api/probe/nw7/report", None).await;
        assert_eq!(latest["summary"]["hosts_up"], 3);
    }

    #[tokio::test]
    async fn test_not_found_responses() {
        let app = app();
        for uri in [
            "/api/probe/ghost",
            "/api/probe/ghost/report",
            "/api/probe/ghost/reports",
            "/api/probe/ghost/logs",
        ] {
            let (status, body) = send(&app, "GET", uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
            assert!(body["error"].is_string(), "{uri}");
        }
    }

    #[tokio::test]
    async fn test_strict_mode_heartbeat_unknown() {
        let (state, _clock) = create_test_state(CollectorSettings {
            auto_register: false,
            ..Default::default()
        });
        let app = create_router(state);

        let (status, _) = send(&app, "POST", "/api/probe/ghost/heartbeat", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = send(&app, "GET", "/api/probes", None).await;
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_heartbeat_and_disconnect() {
        let (state, clock) = create_test_state(CollectorSettings::default());
        let app = create_router(state);

        let (status, body) = send(&app, "POST", "/api/probe/nw7/heartbeat", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["display_name"], "nw7");

        clock.advance(std::time::Duration::from_secs(301));
        let (_, body) = send(&app, "GET", "/api/probe/nw7", None).await;
        assert_eq!(body["status"], "disconnected");
        assert_eq!(body["last_seen_ago_seconds"], 301);
    }

    #[tokio::test]
    async fn test_log_upload_and_stale() {
        let app = app();
        let upload = |lines: &str, sequence: u64| {
            serde_json::json!({
                "timestamp": "2024-05-01T10:00:00Z",
                "lines": lines,
                "total_lines": 1000,
                "sent_lines": 1,
                "sequence": sequence
            })
        };

        let (status, body) = send(
            &app,
            "POST",
            "/api/probe/nw7/logs",
            Some(upload("newest", 9)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["accepted"], true);

        let (status, body) =
            send(&app, "POST", "/api/probe/nw7/logs", Some(upload("older", 3))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["accepted"], false);
        assert_eq!(body["reason"], "stale");

        let (status, body) = send(&app, "GET", "/api/probe/nw7/logs", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["content"], "newest");
        assert_eq!(body["total_lines_at_source"], 1000);
    }

    #[tokio::test]
    async fn test_report_history_endpoint() {
        let app = app();
        for i in 1..=4 {
            send(&app, "POST", "/api/probe/nw7/report", Some(report(i, None))).await;
        }

        let (status, body) = send(&app, "GET", "/api/probe/nw7/reports?limit=2", None).await;
        assert_eq!(status, StatusCode::OK);
        let ups: Vec<_> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["summary"]["hosts_up"].as_u64().unwrap())
            .collect();
        assert_eq!(ups, vec![3, 4]);
    }

    #[tokio::test]
    async fn test_report_history_bad_limit_is_json_error() {
        let app = app();
        send(&app, "POST", "/api/probe/nw7/report", Some(report(1, None))).await;

        let (status, body) = send(&app, "GET", "/api/probe/nw7/reports?limit=abc", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("limit"));
    }
}
