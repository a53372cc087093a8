//! Web服务器

use axum::{
    routing::{get, post, put},
    Router,
};
use queue_admin::QueueMetrics;
use queue_workflow::QueueEngine;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::handlers::{
    correct_priority, create_check_in, department_history, department_queue, department_stats,
    get_check_in, health, metrics, update_status,
};
use crate::stream::{department_stream, patient_stream};

/// 处理器共享状态
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<QueueEngine>,
    pub metrics: QueueMetrics,
}

impl AppState {
    pub fn new(engine: Arc<QueueEngine>, metrics: QueueMetrics) -> Self {
        Self { engine, metrics }
    }
}

pub struct WebServer {
    addr: SocketAddr,
    app: Router,
}

impl WebServer {
    pub fn new(addr: SocketAddr, state: AppState) -> Self {
        let app = Self::create_app(state);
        Self { addr, app }
    }

    pub fn create_app(state: AppState) -> Router {
        Router::new()
            // 健康检查
            .route("/health", get(health))
            .route("/metrics", get(metrics))
            // API路由
            .nest("/api/v1", api_routes())
            // 全局中间件
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(
                        CorsLayer::new()
                            .allow_origin(Any)
                            .allow_methods(Any)
                            .allow_headers(Any),
                    ),
            )
            .with_state(state)
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!("Starting web server on {}", self.addr);

        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.app)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to start web server: {}", e))?;

        Ok(())
    }
}

/// API v1 路由
fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/check-ins", post(create_check_in))
        .route("/check-ins/:id", get(get_check_in))
        .route("/check-ins/:id/status", put(update_status))
        .route("/check-ins/:id/priority", put(correct_priority))
        .route("/departments/:department/queue", get(department_queue))
        .route("/departments/:department/stats", get(department_stats))
        .route("/departments/:department/history", get(department_history))
        .route("/departments/:department/stream", get(department_stream))
        .route(
            "/departments/:department/patients/:patient_id/stream",
            get(patient_stream),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use futures::StreamExt;
    use queue_store::InMemoryCheckInStore;
    use queue_workflow::QueueSettings;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let store = Arc::new(InMemoryCheckInStore::new());
        let engine = Arc::new(QueueEngine::new(store, QueueSettings::default()));
        AppState::new(engine, QueueMetrics::new().unwrap())
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    fn check_in_body(patient: &str, kind: &str) -> Value {
        json!({
            "department": "cardiology",
            "patient_id": patient,
            "patient_name": format!("Patient {}", patient),
            "appointment_type": kind
        })
    }

    #[tokio::test]
    async fn test_health() {
        let app = WebServer::create_app(test_state());
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_check_in_and_queue() {
        let app = WebServer::create_app(test_state());

        let (status, walk_in) =
            send(&app, "POST", "/api/v1/check-ins", Some(check_in_body("W", "walk_in"))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(walk_in["queue_position"], 1);

        let (status, emergency) = send(
            &app,
            "POST",
            "/api/v1/check-ins",
            Some(check_in_body("E", "emergency")),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(emergency["queue_position"], 1);

        let (status, view) = send(&app, "GET", "/api/v1/departments/cardiology/queue", None).await;
        assert_eq!(status, StatusCode::OK);
        let patients: Vec<&str> = view["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["patient_id"].as_str().unwrap())
            .collect();
        assert_eq!(patients, vec!["E", "W"]);

        let uri = format!("/api/v1/check-ins/{}", walk_in["id"].as_str().unwrap());
        let (status, record) = send(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["queue_position"], 2);
    }

    #[tokio::test]
    async fn test_error_status_mapping() {
        let app = WebServer::create_app(test_state());

        let (_, first) =
            send(&app, "POST", "/api/v1/check-ins", Some(check_in_body("P1", "walk_in"))).await;
        let (_, second) =
            send(&app, "POST", "/api/v1/check-ins", Some(check_in_body("P2", "walk_in"))).await;

        let status_uri = |record: &Value| {
            format!("/api/v1/check-ins/{}/status", record["id"].as_str().unwrap())
        };

        let (status, _) = send(
            &app,
            "PUT",
            &status_uri(&first),
            Some(json!({ "status": "in-progress" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &app,
            "PUT",
            &status_uri(&second),
            Some(json!({ "status": "in-progress" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "conflict");
        assert_eq!(body["error"], true);

        let (status, body) = send(
            &app,
            "PUT",
            &status_uri(&first),
            Some(json!({ "status": "waiting" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["kind"], "invalid_transition");

        let missing = format!("/api/v1/check-ins/{}/status", uuid::Uuid::new_v4());
        let (status, _) = send(&app, "PUT", &missing, Some(json!({ "status": "cancelled" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            &app,
            "POST",
            "/api/v1/check-ins",
            Some(json!({
                "department": " ",
                "patient_id": "P3",
                "patient_name": "Patient P3",
                "appointment_type": "walk_in"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "validation");

        let (_, metrics) = {
            let response = app
                .clone()
                .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
                .await
                .unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            (status, String::from_utf8(bytes.to_vec()).unwrap())
        };
        assert!(metrics.contains("queue_rejections_total{kind=\"conflict\"} 1"));
        assert!(metrics.contains("queue_transitions_total{status=\"in-progress\"} 1"));
    }

    #[tokio::test]
    async fn test_priority_correction_endpoint() {
        let app = WebServer::create_app(test_state());
        send(&app, "POST", "/api/v1/check-ins", Some(check_in_body("P1", "walk_in"))).await;
        let (_, late) =
            send(&app, "POST", "/api/v1/check-ins", Some(check_in_body("P2", "walk_in"))).await;

        let uri = format!("/api/v1/check-ins/{}/priority", late["id"].as_str().unwrap());
        let (status, record) = send(&app, "PUT", &uri, Some(json!({ "tier": "emergency" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["queue_position"], 1);

        let (status, record) = send(&app, "PUT", &uri, Some(json!({ "tier": null }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(record["queue_position"], 2);
    }

    #[tokio::test]
    async fn test_stats_and_history_endpoints() {
        let app = WebServer::create_app(test_state());
        let (_, record) =
            send(&app, "POST", "/api/v1/check-ins", Some(check_in_body("P1", "follow_up"))).await;
        let uri = format!("/api/v1/check-ins/{}/status", record["id"].as_str().unwrap());
        send(&app, "PUT", &uri, Some(json!({ "status": "cancelled" }))).await;

        let (status, stats) =
            send(&app, "GET", "/api/v1/departments/cardiology/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["waiting"], 0);
        assert_eq!(stats["cancelled"], 1);

        let (status, history) = send(
            &app,
            "GET",
            "/api/v1/departments/cardiology/history?limit=5",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(history["total"], 1);
        assert_eq!(history["records"][0]["status"], "cancelled");
    }

    #[tokio::test]
    async fn test_patient_stream_sends_initial_view() {
        let state = test_state();
        let app = WebServer::create_app(state.clone());

        let response = app
            .clone()
            .oneshot(
                Request::get("/api/v1/departments/cardiology/patients/P1/stream")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        assert_eq!(state.engine.publisher().subscriber_count("cardiology"), 1);

        let mut frames = response.into_body().into_data_stream();
        let first = frames.next().await.unwrap().unwrap();
        let text = String::from_utf8(first.to_vec()).unwrap();
        assert!(text.contains("event: patient"));
        assert!(text.contains("not_in_queue"));

        drop(frames);
        assert_eq!(state.engine.publisher().subscriber_count("cardiology"), 0);
    }
}
