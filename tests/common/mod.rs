//! Shared utilities for pipeline integration tests.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    extract::{rejection::PathRejection, Path},
    http::{Request, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use nursery_gateway::config::DEFAULT_PROTECTED_PATHS;
use nursery_gateway::http::ErrorTranslator;
use nursery_gateway::security::{
    InMemoryStore, ManualClock, RateLimitPolicy, RateLimiter, SecurityHeaders,
};
use nursery_gateway::{AppError, FieldError, Pipeline};

#[derive(Deserialize)]
pub struct NewChild {
    pub name: String,
}

async fn send_sms() -> &'static str {
    "sent"
}

async fn list_children() -> &'static str {
    "[]"
}

async fn get_child(id: Result<Path<u32>, PathRejection>) -> Result<String, AppError> {
    let Path(id) = id?;
    if id == 42 {
        return Err(AppError::not_found(format!("Child (ID: {id}) not found")));
    }
    Ok(format!("child {id}"))
}

async fn create_child(
    payload: Result<Json<NewChild>, axum::extract::rejection::JsonRejection>,
) -> Result<&'static str, AppError> {
    let Json(child) = payload?;
    if child.name.trim().is_empty() {
        return Err(AppError::Validation(vec![FieldError::new("name", "Name is required")]));
    }
    Ok("created")
}

async fn explode() -> Result<(), AppError> {
    Err(AppError::internal("sql: connection reset by peer"))
}

async fn panics() -> &'static str {
    panic!("attendance index out of range")
}

async fn slow() -> &'static str {
    tokio::time::sleep(Duration::from_secs(5)).await;
    "late"
}

/// Stand-in for the nursery API handlers.
#[allow(dead_code)]
pub fn app_routes() -> Router {
    Router::new()
        .route("/api/auth/send-sms", post(send_sms))
        .route("/api/auth/verify-sms", post(send_sms))
        .route("/api/children", get(list_children).post(create_child))
        .route("/api/children/{id}", get(get_child))
        .route("/api/reports/broken", get(explode))
        .route("/api/photos/panic", get(panics))
        .route("/api/attendance/slow", get(slow))
}

/// Pipeline with a manual clock and the given quota.
#[allow(dead_code)]
pub fn pipeline(max_requests: u32, window: Duration, timeout: Duration) -> (Pipeline, ManualClock) {
    let clock = ManualClock::default();
    let limiter = RateLimiter::new(
        RateLimitPolicy { max_requests, window },
        DEFAULT_PROTECTED_PATHS,
        Arc::new(InMemoryStore::new()),
        Arc::new(clock.clone()),
    );
    let pipeline = Pipeline {
        rate_limiter: Some(Arc::new(limiter)),
        security_headers: Some(Arc::new(SecurityHeaders::new("/api"))),
        translator: ErrorTranslator::new(Some(timeout)),
    };
    (pipeline, clock)
}

/// Default test app: 5 requests per 15 minutes, 1s timeout.
#[allow(dead_code)]
pub fn test_app() -> (Router, ManualClock) {
    let (pipeline, clock) = pipeline(5, Duration::from_secs(900), Duration::from_secs(1));
    (pipeline.wrap(app_routes()), clock)
}

#[allow(dead_code)]
pub fn request(method: &str, uri: &str, client: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", client)
        .body(Body::empty())
        .unwrap()
}

#[allow(dead_code)]
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Start a raw HTTP/1.1 upstream that answers every request with `body`.
#[allow(dead_code)]
pub async fn start_mock_upstream(body: &'static str) -> std::net::SocketAddr {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let forwarded = String::from_utf8_lossy(&buf[..n])
                    .lines()
                    .find(|l| l.to_ascii_lowercase().starts_with("x-forwarded-for:"))
                    .map(|l| l.splitn(2, ':').nth(1).unwrap_or("").trim().to_string())
                    .unwrap_or_default();
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nX-Seen-Forwarded-For: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    forwarded,
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    addr
}

/// Log lines written by the subscriber installed in [`capture_logs`].
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[allow(dead_code)]
impl CapturedLogs {
    /// Every captured event, parsed from its JSON line.
    pub fn events(&self) -> Vec<serde_json::Value> {
        let bytes = self.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    /// Fields of the first event whose message is `message`.
    pub fn find(&self, message: &str) -> Option<serde_json::Value> {
        self.events()
            .into_iter()
            .map(|event| event["fields"].clone())
            .find(|fields| fields["message"] == message)
    }
}

/// Route WARN and above to a JSON buffer for the current thread.
#[allow(dead_code)]
pub fn capture_logs() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .json()
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    (logs, tracing::subscriber::set_default(subscriber))
}
