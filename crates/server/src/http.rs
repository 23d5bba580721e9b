//! `/api/query`, `/api/mutation`, and `/api/action` (§6): the request/response
//! counterpart to the WebSocket sync endpoint, all three routed through the
//! same [`crate::dispatch::dispatch`] table. Errors follow an
//! `HttpResponseError` shape: an `anyhow::Error` tagged with `ErrorMetadata`
//! converts into the wire `{error, errorCode, errorData?}` body with the
//! matching status code.
use std::sync::Arc;

use axum::{
    extract::State,
    response::{
        IntoResponse,
        Response,
    },
    Json,
};
use errors::ErrorMetadataAnyhowExt;
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    dispatch,
    state::AppState,
};

/// Wraps an `anyhow::Error` for `IntoResponse`, playing the role of an
/// `HttpResponseError` at the edge of the HTTP layer.
pub struct ApiError(anyhow::Error);

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.http_status();
        let body = self.0.to_error_response();
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct CallRequest {
    pub path: String,
    #[serde(default = "default_args")]
    pub args: serde_json::Value,
    /// Accepted for wire compatibility with §6's request shape; this core
    /// has a single JSON encoding, so the field is otherwise unused.
    #[serde(default)]
    #[allow(dead_code)]
    pub format: Option<String>,
}

fn default_args() -> serde_json::Value {
    serde_json::json!({})
}

#[derive(Debug, Serialize)]
pub struct CallResponse {
    pub value: serde_json::Value,
}

async fn call(State(state): State<Arc<AppState>>, Json(req): Json<CallRequest>) -> Result<Json<CallResponse>, ApiError> {
    let value = dispatch::dispatch(&state.store, &req.path, &req.args)?;
    Ok(Json(CallResponse { value }))
}

pub async fn query(state: State<Arc<AppState>>, req: Json<CallRequest>) -> Result<Json<CallResponse>, ApiError> {
    call(state, req).await
}

pub async fn mutation(state: State<Arc<AppState>>, req: Json<CallRequest>) -> Result<Json<CallResponse>, ApiError> {
    call(state, req).await
}

/// `/api/action` reaches the same dispatch table as `/api/query` and
/// `/api/mutation`: this core has no UDF/action runtime (§1 Non-goals), so
/// an "action" here is just a write routed outside a subscription, kept as
/// its own endpoint for wire compatibility with §6.
pub async fn action(state: State<Arc<AppState>>, req: Json<CallRequest>) -> Result<Json<CallResponse>, ApiError> {
    call(state, req).await
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use http::{
        Request,
        StatusCode,
    };
    use tower::ServiceExt;

    use super::*;
    use crate::{
        config::ServerConfig,
        router::router,
    };

    async fn test_app() -> (Arc<AppState>, tempfile::TempDir) {
        let (config, dir) = ServerConfig::new_for_test().unwrap();
        let state = Arc::new(AppState::open(&config).unwrap());
        (state, dir)
    }

    #[tokio::test]
    async fn insert_then_query_round_trips_over_http() {
        let (state, _dir) = test_app().await;
        let app = router(state);

        let insert_req = Request::builder()
            .method("POST")
            .uri("/api/mutation")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::to_vec(&serde_json::json!({
                    "path": "messages:insert",
                    "args": {"fields": {"title": "hi"}},
                }))
                .unwrap(),
            ))
            .unwrap();
        let response = app.clone().oneshot(insert_req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let query_req = Request::builder()
            .method("POST")
            .uri("/api/query")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::to_vec(&serde_json::json!({"path": "messages:list"})).unwrap(),
            ))
            .unwrap();
        let response = app.oneshot(query_req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: CallResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.value.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unrecognized_table_reports_a_client_error() {
        let (state, _dir) = test_app().await;
        let app = router(state);

        let req = Request::builder()
            .method("POST")
            .uri("/api/query")
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&serde_json::json!({"path": "not a table!!"})).unwrap()))
            .unwrap();
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["errorCode"], "ProtocolError");
    }
}
