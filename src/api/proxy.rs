//! OpenAI-compatible pass-through endpoints.
//!
//! `POST /v1/chat/completions` forwards the client's body untouched to the
//! configured upstream with the static header bundle attached. Streaming
//! responses are relayed chunk by chunk as they arrive; everything else is
//! returned verbatim with the upstream status.

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;

use super::AppState;

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Minimal error response matching OpenAI's format.
#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    r#type: String,
    code: Option<String>,
}

fn error_response(status: StatusCode, message: String, code: &str) -> Response {
    let body = ErrorResponse {
        error: ErrorBody {
            message,
            r#type: "error".to_string(),
            code: Some(code.to_string()),
        },
    };
    (status, Json(body)).into_response()
}

fn upstream_error(e: reqwest::Error) -> Response {
    tracing::warn!(error = %e, "Upstream request failed");
    error_response(
        StatusCode::BAD_GATEWAY,
        format!("Upstream request failed: {}", e),
        "upstream_error",
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Routes
// ─────────────────────────────────────────────────────────────────────────────

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/chat/completions", post(chat_completions))
        .route("/models", get(list_models))
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn chat_completions(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let is_stream = match serde_json::from_slice::<Value>(&body) {
        Ok(Value::Object(req)) => req.get("stream").and_then(Value::as_bool).unwrap_or(false),
        Ok(_) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "Request body must be a JSON object".to_string(),
                "invalid_request_error",
            );
        }
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid request body: {}", e),
                "invalid_request_error",
            );
        }
    };

    // Non-streaming calls get a total timeout. Streams get none: reqwest
    // applies it to the whole body, which would cut long generations.
    let mut upstream_req = state
        .http_client
        .post(state.config.completions_url())
        .headers(state.upstream_headers.clone())
        .body(body);
    if !is_stream {
        upstream_req = upstream_req.timeout(state.config.upstream_timeout);
    }

    tracing::debug!(stream = is_stream, "Forwarding chat completion");

    let upstream_resp = match upstream_req.send().await {
        Ok(resp) => resp,
        Err(e) => return upstream_error(e),
    };
    let status = upstream_resp.status();

    if is_stream && status.is_success() {
        let mut response_headers = HeaderMap::new();
        response_headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/event-stream"),
        );
        response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        // Dropping the body (client gone) drops the upstream response too.
        return (
            status,
            response_headers,
            Body::from_stream(upstream_resp.bytes_stream()),
        )
            .into_response();
    }

    if !status.is_success() {
        tracing::info!(status = %status, "Upstream returned an error status");
    }
    forward_buffered(upstream_resp).await
}

async fn list_models(State(state): State<Arc<AppState>>) -> Response {
    let upstream_resp = match state
        .http_client
        .get(state.config.models_url())
        .headers(state.upstream_headers.clone())
        .timeout(state.config.upstream_timeout)
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) => return upstream_error(e),
    };
    forward_buffered(upstream_resp).await
}

/// Read the full upstream body and hand it back with the same status.
async fn forward_buffered(upstream_resp: reqwest::Response) -> Response {
    let status = upstream_resp.status();
    let content_type = upstream_resp
        .headers()
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("application/json"));

    match upstream_resp.bytes().await {
        Ok(resp_body) => {
            let mut response = Response::new(Body::from(resp_body));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, content_type);
            response
        }
        Err(e) => upstream_error(e),
    }
}
