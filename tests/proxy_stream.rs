//! End-to-end checks of the chat proxy against an in-process upstream.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use futures::StreamExt;
use termux_agent::api::{router, AppState};
use termux_agent::config::ProxyConfig;
use tokio::sync::{oneshot, Notify};

const COMPLETION: &str = r#"{"id":"cmpl-1","choices":[{"index":0,"message":{"role":"assistant","content":"hi"}}]}"#;
const FIRST_CHUNK: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n";
const SECOND_CHUNK: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DONE]\n\n";

#[derive(Default)]
struct Upstream {
    calls: AtomicUsize,
    last_body: Mutex<Vec<u8>>,
    last_origin: Mutex<Option<String>>,
    release_second_chunk: Notify,
    /// Closes when an open-ended upstream stream is dropped.
    held_stream_closed: Mutex<Option<oneshot::Receiver<()>>>,
}

async fn upstream_completions(
    State(upstream): State<Arc<Upstream>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    upstream.calls.fetch_add(1, Ordering::SeqCst);
    *upstream.last_body.lock().unwrap() = body.to_vec();
    *upstream.last_origin.lock().unwrap() = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let request: serde_json::Value = serde_json::from_slice(&body).unwrap();
    if request["stream"] != serde_json::Value::Bool(true) {
        return ([(header::CONTENT_TYPE, "application/json")], COMPLETION).into_response();
    }

    let first = futures::stream::once(async { Ok::<_, Infallible>(Bytes::from(FIRST_CHUNK)) });

    if request["hold_open"] == serde_json::Value::Bool(true) {
        let (alive, closed) = oneshot::channel::<()>();
        *upstream.held_stream_closed.lock().unwrap() = Some(closed);
        let never = futures::stream::once(async move {
            let _alive = alive;
            std::future::pending::<()>().await;
            Ok::<_, Infallible>(Bytes::new())
        });
        return (
            [(header::CONTENT_TYPE, "text/event-stream")],
            Body::from_stream(first.chain(never)),
        )
            .into_response();
    }

    let gate = upstream.clone();
    let second = futures::stream::once(async move {
        gate.release_second_chunk.notified().await;
        Ok::<_, Infallible>(Bytes::from(SECOND_CHUNK))
    });
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(first.chain(second)),
    )
        .into_response()
}

async fn upstream_models() -> impl IntoResponse {
    (StatusCode::OK, r#"{"object":"list","data":[{"id":"gpt-5"}]}"#)
}

async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Start an upstream and a proxy in front of it; returns the proxy base URL.
async fn setup() -> (Arc<Upstream>, String) {
    let upstream = Arc::new(Upstream::default());
    let upstream_app = Router::new()
        .route("/chat/completions", post(upstream_completions))
        .route("/models", get(upstream_models))
        .with_state(upstream.clone());
    let upstream_addr = spawn(upstream_app).await;

    let state = AppState::new(ProxyConfig::new(format!("http://{upstream_addr}"))).unwrap();
    let proxy_addr = spawn(router(Arc::new(state))).await;

    (upstream, format!("http://{proxy_addr}/v1"))
}

#[tokio::test]
async fn non_streaming_body_is_returned_verbatim() {
    let (upstream, base) = setup().await;
    let request = r#"{"model":"gpt-5","messages":[{"role":"user","content":"hi"}]}"#;

    let resp = reqwest::Client::new()
        .post(format!("{base}/chat/completions"))
        .header("content-type", "application/json")
        .body(request)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), COMPLETION);
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
    assert_eq!(upstream.last_body.lock().unwrap().as_slice(), request.as_bytes());
    assert_eq!(
        upstream.last_origin.lock().unwrap().as_deref(),
        Some("https://gpt-chatbotru-chat1.ru")
    );
}

#[tokio::test]
async fn stream_chunks_are_relayed_before_upstream_finishes() {
    let (upstream, base) = setup().await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/chat/completions"))
        .body(r#"{"model":"gpt-5","stream":true,"messages":[]}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    assert_eq!(
        resp.headers()[header::CONTENT_TYPE.as_str()],
        "text/event-stream"
    );
    assert_eq!(resp.headers()[header::CACHE_CONTROL.as_str()], "no-cache");

    let mut body = resp.bytes_stream();
    let mut first = Vec::new();
    while first.len() < FIRST_CHUNK.len() {
        first.extend_from_slice(&body.next().await.unwrap().unwrap());
    }
    assert_eq!(first, FIRST_CHUNK.as_bytes());

    // Upstream only now produces the rest.
    upstream.release_second_chunk.notify_one();
    let mut rest = Vec::new();
    while let Some(chunk) = body.next().await {
        rest.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(rest, SECOND_CHUNK.as_bytes());
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn client_disconnect_tears_down_upstream_stream() {
    let (upstream, base) = setup().await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/chat/completions"))
        .body(r#"{"model":"gpt-5","stream":true,"hold_open":true,"messages":[]}"#)
        .send()
        .await
        .unwrap();
    let mut body = resp.bytes_stream();
    let mut first = Vec::new();
    while first.len() < FIRST_CHUNK.len() {
        first.extend_from_slice(&body.next().await.unwrap().unwrap());
    }

    let closed = upstream.held_stream_closed.lock().unwrap().take().unwrap();
    drop(body);

    let dropped = tokio::time::timeout(std::time::Duration::from_secs(5), closed).await;
    assert!(
        matches!(dropped, Ok(Err(_))),
        "upstream stream should be dropped once the client goes away"
    );
}

#[tokio::test]
async fn malformed_json_is_rejected_without_upstream_call() {
    let (upstream, base) = setup().await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/chat/completions"))
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 400);
    let error: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(error["error"]["code"], "invalid_request_error");
    assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn models_are_passed_through() {
    let (_upstream, base) = setup().await;

    let resp = reqwest::get(format!("{base}/models")).await.unwrap();

    assert_eq!(resp.status(), 200);
    let models: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(models["data"][0]["id"], "gpt-5");
}

#[tokio::test]
async fn unreachable_upstream_is_a_bad_gateway() {
    // Port 9 (discard) on loopback is not listening in test environments.
    let state = AppState::new(ProxyConfig::new("http://127.0.0.1:9")).unwrap();
    let proxy_addr = spawn(router(Arc::new(state))).await;

    let resp = reqwest::Client::new()
        .post(format!("http://{proxy_addr}/v1/chat/completions"))
        .body(r#"{"messages":[]}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 502);
}
