//! Loopback Falcon stand-in for session and keep-alive tests

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use falcon_auth::{AccessToken, ApiClient, RestClient, RetryPolicy, TokenSink};
use serde_json::{Value, json};
use tokio::time::{Duration, Instant};

pub(crate) const SESSION_TOKEN: &str = "T1";
pub(crate) const BEARER: &str = "bearer-1";

pub(crate) struct MockFalcon {
    pub base: String,
    pub state: Arc<MockState>,
}

pub(crate) struct MockState {
    base: String,
    pub discovery_status: AtomicU16,
    pub refresh_status: AtomicU16,
    /// Replaces the generated discovery body when set.
    pub discovery_body: Mutex<Option<Value>>,
    pub feed_lines: Mutex<Vec<String>>,
    pub app_ids: Mutex<Vec<String>>,
    pub refresh_auth: Mutex<Vec<String>>,
    pub discover_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub feed_calls: AtomicUsize,
}

impl MockState {
    pub fn discover_calls(&self) -> usize {
        self.discover_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn feed_calls(&self) -> usize {
        self.feed_calls.load(Ordering::SeqCst)
    }
}

async fn discover(
    State(state): State<Arc<MockState>>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    state.discover_calls.fetch_add(1, Ordering::SeqCst);
    if let Some(app_id) = query.get("appId") {
        state.app_ids.lock().unwrap().push(app_id.clone());
    }

    let status = StatusCode::from_u16(state.discovery_status.load(Ordering::SeqCst)).unwrap();
    if !status.is_success() {
        return (status, Json(json!({"errors": [{"message": "no such app"}]})));
    }

    let body = state.discovery_body.lock().unwrap().clone().unwrap_or_else(|| {
        json!({
            "resources": [{
                "dataFeedURL": format!("{}/feed/1", state.base),
                "sessionToken": {"token": SESSION_TOKEN, "expiration": "2026-10-18T12:30:00Z"},
                "refreshActiveSessionURL": format!("{}/refresh/1", state.base),
            }]
        })
    });
    (status, Json(body))
}

async fn refresh(State(state): State<Arc<MockState>>, headers: HeaderMap) -> impl IntoResponse {
    state.refresh_calls.fetch_add(1, Ordering::SeqCst);
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state.refresh_auth.lock().unwrap().push(auth);

    let status = StatusCode::from_u16(state.refresh_status.load(Ordering::SeqCst)).unwrap();
    (status, Json(json!({"meta": {}, "resources": [], "errors": []})))
}

async fn feed(State(state): State<Arc<MockState>>, headers: HeaderMap) -> impl IntoResponse {
    state.feed_calls.fetch_add(1, Ordering::SeqCst);
    let expected = format!("Token {SESSION_TOKEN}");
    let auth = headers.get("authorization").and_then(|v| v.to_str().ok());
    if auth != Some(expected.as_str()) {
        return (StatusCode::UNAUTHORIZED, String::new());
    }

    let body: String = state
        .feed_lines
        .lock()
        .unwrap()
        .iter()
        .map(|line| format!("{line}\n"))
        .collect();
    (StatusCode::OK, body)
}

/// Serve discovery, refresh and feed routes on a loopback port.
pub(crate) async fn mock_falcon() -> MockFalcon {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let state = Arc::new(MockState {
        base: base.clone(),
        discovery_status: AtomicU16::new(200),
        refresh_status: AtomicU16::new(200),
        discovery_body: Mutex::new(None),
        feed_lines: Mutex::new(Vec::new()),
        app_ids: Mutex::new(Vec::new()),
        refresh_auth: Mutex::new(Vec::new()),
        discover_calls: AtomicUsize::new(0),
        refresh_calls: AtomicUsize::new(0),
        feed_calls: AtomicUsize::new(0),
    });

    let app = axum::Router::new()
        .route("/sensors/entities/datafeed/v2", get(discover))
        .route("/refresh/1", post(refresh))
        .route("/feed/1", get(feed))
        .with_state(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockFalcon { base, state }
}

/// An API client that already holds a bearer token, as if registered.
pub(crate) fn api_client(base: &str) -> Arc<ApiClient> {
    let api = Arc::new(ApiClient::new(RestClient::new(
        reqwest::Client::new(),
        base,
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_millis(10),
        },
    )));
    api.set_token(&AccessToken::new(
        BEARER,
        Instant::now() + Duration::from_secs(1800),
    ));
    api
}

pub(crate) fn event_line(offset: u64) -> String {
    format!(r#"{{"metadata":{{"offset":{offset},"eventType":"X"}},"event":{{}}}}"#)
}
