//! HTTP edge — thin routing around the execution engine.
//!
//! Three routes: submit code, health probe, example catalog. All the
//! interesting behavior lives in [`crate::sandbox`]; this layer only
//! adapts request/response framing and maps validation failures to 400.

pub mod examples;

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::sandbox::Executor;

#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<Executor>,
}

pub fn router(executor: Arc<Executor>, request_limit_bytes: usize) -> Router {
    Router::new()
        .route("/api/execute", post(execute))
        .route("/api/health", get(health))
        .route("/api/examples", get(example_catalog))
        .layer(DefaultBodyLimit::max(request_limit_bytes))
        .with_state(AppState { executor })
}

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    #[serde(default)]
    code: String,
}

/// `POST /api/execute` — 200 with the execution envelope on both
/// success and user-code failure; 400 only for pre-sandbox validation.
async fn execute(State(state): State<AppState>, Json(request): Json<ExecuteRequest>) -> Response {
    info!(code_len = request.code.len(), "execute request");
    match state.executor.execute(&request.code).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "success": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// `GET /api/health`
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().timestamp_millis(),
    }))
}

/// `GET /api/examples` — fixed reference data for the editor frontend.
async fn example_catalog() -> Json<serde_json::Value> {
    Json(serde_json::to_value(examples::catalog()).unwrap_or_else(|_| json!([])))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExecutionConfig, FetchConfig};
    use crate::sandbox::FetchProxy;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_router() -> Router {
        let mut config = ExecutionConfig::default();
        config.max_code_length = 100;
        let executor = Arc::new(Executor::new(
            config,
            Arc::new(FetchProxy::new(FetchConfig::default())),
        ));
        router(executor, 1024 * 1024)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn execute_request(code: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/execute")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::to_vec(&json!({ "code": code })).unwrap(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn test_execute_empty_code_is_400() {
        let response = test_router().oneshot(execute_request("")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("empty"));
    }

    #[tokio::test]
    async fn test_execute_oversized_code_is_400() {
        let code = "x".repeat(200);
        let response = test_router().oneshot(execute_request(&code)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("100"));
    }

    #[tokio::test]
    async fn test_execute_returns_envelope() {
        let response = test_router()
            .oneshot(execute_request(r#"console.log("hi")"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["result"], "undefined");
        assert_eq!(body["logs"][0]["type"], "log");
        assert_eq!(body["logs"][0]["content"], "hi");
        assert_eq!(body["errors"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_user_code_failure_is_still_200() {
        let response = test_router()
            .oneshot(execute_request(r#"throw new Error("nope")"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["errors"][0]["content"], "nope");
    }

    #[tokio::test]
    async fn test_health_reports_ok_with_timestamp() {
        let request = Request::builder()
            .uri("/api/health")
            .body(Body::empty())
            .unwrap();
        let response = test_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert!(body["timestamp"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_examples_catalog_shape() {
        let request = Request::builder()
            .uri("/api/examples")
            .body(Body::empty())
            .unwrap();
        let response = test_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let entries = body.as_array().unwrap();
        assert!(!entries.is_empty());
        for entry in entries {
            assert!(entry["id"].is_number());
            assert!(entry["title"].is_string());
            assert!(entry["description"].is_string());
            assert!(entry["code"].is_string());
        }
    }
}
