#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;

use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use sns::app::auth::{AuthService, AuthSession};
use sns::app::engagement::EngagementService;
use sns::app::notification_queue::NotificationQueue;
use sns::app::notification_stream::{
    shutdown_channel, CursorMode, NotificationStreamer, ShutdownTrigger, StreamSettings,
};
use sns::app::notifications::NotificationService;
use sns::app::social::SocialService;
use sns::infra::list_store::{ListStore, MemoryListStore, Pushed};
use sns::infra::memory::MemoryRepository;
use sns::AppState;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

// Test-only key, never used outside this harness.
const TEST_PASETO_ACCESS_KEY: [u8; 32] = *b"0123456789abcdef0123456789abcdef";
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);
pub const PAGE_SIZE: i64 = 10;
pub const ALLOWED_ORIGIN: &str = "http://localhost:3000";

// ---------------------------------------------------------------------------
// TestApp: one isolated instance per test, backed by in-memory stores
// ---------------------------------------------------------------------------

pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub repo: MemoryRepository,
    pub queue: NotificationQueue,
    pub shutdown: ShutdownTrigger,
}

pub struct TestResponse {
    pub status: StatusCode,
    body_bytes: bytes::Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body_bytes).unwrap_or(Value::Null)
    }

    pub fn error_message(&self) -> String {
        self.json()["error"].as_str().unwrap_or("").to_string()
    }

    pub fn error_code(&self) -> String {
        self.json()["code"].as_str().unwrap_or("").to_string()
    }
}

pub struct TestUser {
    pub id: i64,
    pub email: String,
    pub access_token: String,
}

/// An open notification stream, read frame by frame.
pub struct EventStream {
    pub status: StatusCode,
    pub headers: HeaderMap,
    body: Body,
}

/// One parsed text event-stream message.
#[derive(Debug, Clone)]
pub struct StreamEvent {
    pub raw: String,
    pub fields: HashMap<String, String>,
}

impl StreamEvent {
    pub fn field(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or("")
    }

    pub fn data(&self) -> Value {
        serde_json::from_str(self.field("data")).unwrap_or(Value::Null)
    }
}

pub enum Next {
    Event(StreamEvent),
    Closed,
    Idle,
}

impl EventStream {
    /// Waits up to `wait` for the next frame.
    pub async fn next(&mut self, wait: Duration) -> Next {
        match tokio::time::timeout(wait, self.body.frame()).await {
            Err(_) => Next::Idle,
            Ok(None) => Next::Closed,
            Ok(Some(frame)) => {
                let frame = frame.expect("stream body error");
                let data = frame.into_data().expect("expected a data frame");
                let raw = String::from_utf8(data.to_vec()).expect("frame is not utf-8");
                Next::Event(parse_event(&raw))
            }
        }
    }

    pub async fn next_event(&mut self) -> StreamEvent {
        match self.next(Duration::from_secs(2)).await {
            Next::Event(event) => event,
            Next::Closed => panic!("stream closed while waiting for an event"),
            Next::Idle => panic!("no event within 2s"),
        }
    }
}

fn parse_event(raw: &str) -> StreamEvent {
    let fields = raw
        .lines()
        .filter_map(|line| line.split_once(": "))
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();
    StreamEvent {
        raw: raw.to_string(),
        fields,
    }
}

pub async fn app() -> TestApp {
    TestApp::with_settings(stream_settings(CursorMode::Echo)).await
}

pub fn stream_settings(cursor_mode: CursorMode) -> StreamSettings {
    StreamSettings {
        poll_interval: POLL_INTERVAL,
        retry: Duration::from_millis(3000),
        idle_timeout: None,
        cursor_mode,
    }
}

impl TestApp {
    pub async fn with_settings(settings: StreamSettings) -> Self {
        Self::with_list_store(settings, Arc::new(MemoryListStore::new())).await
    }

    pub async fn with_list_store(settings: StreamSettings, list_store: Arc<dyn ListStore>) -> Self {
        let repo = MemoryRepository::new();
        let queue = NotificationQueue::new(list_store, 1000);
        let (shutdown, signal) = shutdown_channel();

        let notifications = NotificationService::new(Arc::new(repo.clone()), queue.clone(), PAGE_SIZE);
        let state = AppState {
            social: SocialService::new(Arc::new(repo.clone()), notifications.clone()),
            engagement: EngagementService::new(Arc::new(repo.clone()), notifications.clone()),
            notifications,
            streamer: NotificationStreamer::new(queue.clone(), settings, signal),
            auth: AuthService::new(TEST_PASETO_ACCESS_KEY, 15),
        };

        let cors = sns::http::cors_layer(&[ALLOWED_ORIGIN.to_string()]).expect("cors layer");
        let router = sns::http::app(state.clone(), cors);

        TestApp {
            router,
            state,
            repo,
            queue,
            shutdown,
        }
    }

    // ------------------------------------------------------------------
    // Low-level request helpers
    // ------------------------------------------------------------------
    pub async fn oneshot(&self, request: Request<Body>) -> axum::response::Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot failed")
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("host", "localhost");

        for &(key, value) in headers {
            builder = builder.header(key, value);
        }

        let request = if let Some(body) = body {
            builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap()
        } else {
            builder.body(Body::empty()).unwrap()
        };

        self.oneshot(request).await
    }

    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let response = self.send(method, path, body, headers).await;
        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("failed to collect body")
            .to_bytes();

        TestResponse { status, body_bytes }
    }

    // ------------------------------------------------------------------
    // Convenience HTTP helpers
    // ------------------------------------------------------------------
    pub async fn get(&self, path: &str, token: Option<&str>) -> TestResponse {
        let auth = token.map(|t| format!("Bearer {}", t));
        let headers: Vec<(&str, &str)> = auth
            .as_deref()
            .map(|value| vec![("Authorization", value)])
            .unwrap_or_default();
        self.request(Method::GET, path, None, &headers).await
    }

    pub async fn post(&self, path: &str, token: Option<&str>) -> TestResponse {
        let auth = token.map(|t| format!("Bearer {}", t));
        let headers: Vec<(&str, &str)> = auth
            .as_deref()
            .map(|value| vec![("Authorization", value)])
            .unwrap_or_default();
        self.request(Method::POST, path, None, &headers).await
    }

    pub async fn patch(&self, path: &str, token: Option<&str>) -> TestResponse {
        let auth = token.map(|t| format!("Bearer {}", t));
        let headers: Vec<(&str, &str)> = auth
            .as_deref()
            .map(|value| vec![("Authorization", value)])
            .unwrap_or_default();
        self.request(Method::PATCH, path, None, &headers).await
    }

    pub async fn delete(&self, path: &str, token: Option<&str>) -> TestResponse {
        let auth = token.map(|t| format!("Bearer {}", t));
        let headers: Vec<(&str, &str)> = auth
            .as_deref()
            .map(|value| vec![("Authorization", value)])
            .unwrap_or_default();
        self.request(Method::DELETE, path, None, &headers).await
    }

    /// Opens `/v1/notifications/stream` and hands back the live body.
    pub async fn open_stream(&self, token: &str, extra_headers: &[(&str, &str)]) -> EventStream {
        let auth = format!("Bearer {}", token);
        let mut headers = vec![("Authorization", auth.as_str())];
        headers.extend_from_slice(extra_headers);

        let response = self
            .send(Method::GET, "/v1/notifications/stream", None, &headers)
            .await;
        let status = response.status();
        let headers = response.headers().clone();

        EventStream {
            status,
            headers,
            body: response.into_body(),
        }
    }

    // ------------------------------------------------------------------
    // Test data helpers
    // ------------------------------------------------------------------

    /// Registers a verified user and mints an access token for it.
    pub async fn create_user(&self, id: i64) -> TestUser {
        self.create_user_with(id, true).await
    }

    pub async fn create_unverified_user(&self, id: i64) -> TestUser {
        self.create_user_with(id, false).await
    }

    async fn create_user_with(&self, id: i64, verified: bool) -> TestUser {
        self.repo.insert_user(id).await;
        let email = format!("user{}@example.com", id);
        let token = self
            .state
            .auth
            .issue_access_token(&AuthSession {
                user_id: id,
                email: email.clone(),
                verified,
            })
            .expect("issue_access_token failed");

        TestUser {
            id,
            email,
            access_token: token.token,
        }
    }

    pub async fn create_post(&self, writer_id: i64) -> i64 {
        self.repo.insert_post(writer_id).await
    }

    /// Follows through the API and asserts the follow was created.
    pub async fn follow(&self, follower: &TestUser, following: &TestUser) {
        let resp = self
            .post(
                &format!("/v1/users/{}/follow", following.id),
                Some(&follower.access_token),
            )
            .await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.json()["followed"], Value::Bool(true));
    }

    pub async fn like(&self, user: &TestUser, post_id: i64) {
        let resp = self
            .post(&format!("/v1/posts/{}/like", post_id), Some(&user.access_token))
            .await;
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.json()["created"], Value::Bool(true));
    }
}

// ---------------------------------------------------------------------------
// FlakyListStore: in-memory lists whose first pushes fail
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct FlakyListStore {
    inner: MemoryListStore,
    failing_pushes: Arc<AtomicUsize>,
}

impl FlakyListStore {
    pub fn failing_pushes(n: usize) -> Self {
        Self {
            inner: MemoryListStore::new(),
            failing_pushes: Arc::new(AtomicUsize::new(n)),
        }
    }
}

#[async_trait]
impl ListStore for FlakyListStore {
    async fn push_back(&self, key: &str, value: String, max_len: Option<usize>) -> anyhow::Result<Pushed> {
        let failed = self
            .failing_pushes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(anyhow!("connection reset"));
        }
        self.inner.push_back(key, value, max_len).await
    }

    async fn pop_front(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.inner.pop_front(key).await
    }

    async fn peek_front(&self, key: &str) -> anyhow::Result<Option<String>> {
        self.inner.peek_front(key).await
    }

    async fn len(&self, key: &str) -> anyhow::Result<usize> {
        self.inner.len(key).await
    }

    async fn exists(&self, key: &str) -> anyhow::Result<bool> {
        self.inner.exists(key).await
    }

    async fn delete(&self, key: &str) -> anyhow::Result<bool> {
        self.inner.delete(key).await
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.inner.ping().await
    }
}
