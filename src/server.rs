//! HTTP surface: status query plus record CRUD.
//!
//! Thin layer over [`RecordStore`] and [`StatusBus`]; permissive CORS so
//! the browser bridge can call it from the mail client's origin.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::models::NewRecord;
use crate::status::StatusBus;
use crate::store::{RecordStore, StoreError};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RecordStore>,
    pub bus: Arc<StatusBus>,
    pub fetch_attempts: u32,
}

pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request",
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "not_found",
            message: message.into(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotReady => Self {
                status: StatusCode::SERVICE_UNAVAILABLE,
                code: "store_unavailable",
                message: e.to_string(),
            },
            other => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                code: "internal",
                message: other.to_string(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": { "code": self.code, "message": self.message }
        });
        (self.status, Json(body)).into_response()
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/records", get(list_records))
        .route("/records", post(add_record))
        .route("/records/{id}", delete(remove_record))
        .layer(cors)
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Most recent status event, or `null` before any pipeline has run.
async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    match state.bus.last().await {
        Some(event) => Json(serde_json::to_value(event).unwrap_or(serde_json::Value::Null)),
        None => Json(serde_json::Value::Null),
    }
}

/// All records, most recent first.
async fn list_records(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let mut records = state.store.fetch_all(state.fetch_attempts).await?;
    records.reverse();
    Ok(Json(json!({
        "count": records.len(),
        "records": records,
    })))
}

#[derive(Deserialize)]
struct AddRecordRequest {
    input: String,
    output: String,
}

async fn add_record(
    State(state): State<AppState>,
    Json(req): Json<AddRecordRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), AppError> {
    if req.input.trim().is_empty() {
        return Err(AppError::bad_request("input must not be empty"));
    }
    if req.output.trim().is_empty() {
        return Err(AppError::bad_request("output must not be empty"));
    }

    let id = state
        .store
        .append(NewRecord::pair(req.input.trim(), req.output.trim()))
        .await?;

    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

async fn remove_record(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if state.store.delete(&id).await? {
        Ok(Json(json!({ "deleted": id })))
    } else {
        Err(AppError::not_found(format!("no record with id {}", id)))
    }
}

/// Bind and serve until the process is stopped.
pub async fn run_server(config: &Config, state: AppState) -> anyhow::Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    println!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, DbConfig, ServerConfig};
    use crate::migrate;
    use crate::models::StatusKind;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn test_state(tmp: &tempfile::TempDir, ready: bool) -> AppState {
        let config = Config {
            db: DbConfig {
                path: tmp.path().join("test.sqlite"),
                collection: "mails".to_string(),
            },
            page: Default::default(),
            watcher: Default::default(),
            model: Default::default(),
            retrieval: Default::default(),
            server: ServerConfig {
                bind: "127.0.0.1:0".to_string(),
            },
        };

        let store = Arc::new(RecordStore::new(&config));
        if ready {
            migrate::run_migrations(&config).await.unwrap();
            assert!(store.wait_until_ready(2_000).await);
        }

        AppState {
            store,
            bus: Arc::new(StatusBus::new()),
            fetch_attempts: 1,
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_version() {
        let tmp = tempfile::TempDir::new().unwrap();
        let app = build_router(test_state(&tmp, true).await);

        let response = app.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
    }

    #[tokio::test]
    async fn status_is_null_before_any_event_then_reflects_last() {
        let tmp = tempfile::TempDir::new().unwrap();
        let state = test_state(&tmp, true).await;
        let app = build_router(state.clone());

        let response = app.clone().oneshot(get_request("/status")).await.unwrap();
        assert_eq!(body_json(response).await, serde_json::Value::Null);

        state
            .bus
            .publish(StatusKind::Response, json!({ "phase": "delivered" }))
            .await;

        let response = app.oneshot(get_request("/status")).await.unwrap();
        let json = body_json(response).await;
        assert_eq!(json["type"], "RESPONSE");
        assert_eq!(json["data"]["phase"], "delivered");
    }

    #[tokio::test]
    async fn records_roundtrip_most_recent_first() {
        let tmp = tempfile::TempDir::new().unwrap();
        let state = test_state(&tmp, true).await;
        let app = build_router(state);

        let response = app
            .clone()
            .oneshot(post_json("/records", json!({ "input": "q1", "output": "a1" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let first_id = body_json(response).await["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(post_json("/records", json!({ "input": "q2", "output": "a2" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app.clone().oneshot(get_request("/records")).await.unwrap();
        let json = body_json(response).await;
        assert_eq!(json["count"], 2);
        assert_eq!(json["records"][0]["input"], "q2");
        assert_eq!(json["records"][1]["input"], "q1");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/records/{}", first_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get_request("/records")).await.unwrap();
        assert_eq!(body_json(response).await["count"], 1);
    }

    #[tokio::test]
    async fn blank_fields_are_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let app = build_router(test_state(&tmp, true).await);

        let response = app
            .clone()
            .oneshot(post_json("/records", json!({ "input": "  ", "output": "a" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"]["code"], "bad_request");

        let response = app
            .oneshot(post_json("/records", json!({ "input": "q", "output": "" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn deleting_a_missing_record_is_404() {
        let tmp = tempfile::TempDir::new().unwrap();
        let app = build_router(test_state(&tmp, true).await);

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/records/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn unready_store_maps_to_503() {
        let tmp = tempfile::TempDir::new().unwrap();
        let app = build_router(test_state(&tmp, false).await);

        let response = app.oneshot(get_request("/records")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["error"]["code"], "store_unavailable");
    }
}
