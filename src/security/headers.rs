//! Protective response headers.
//!
//! Every response gets the static hardening set. Responses to API paths are
//! additionally marked uncacheable. Headers already set by a handler are
//! left alone.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};

use crate::config::SecurityConfig;

const STATIC_HEADERS: [(HeaderName, &str); 5] = [
    (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
    (header::X_FRAME_OPTIONS, "DENY"),
    (header::X_XSS_PROTECTION, "1; mode=block"),
    (header::REFERRER_POLICY, "strict-origin-when-cross-origin"),
    (
        HeaderName::from_static("permissions-policy"),
        "camera=(), microphone=(), geolocation=()",
    ),
];

const NO_STORE: &str = "no-store, no-cache, must-revalidate";

/// Header policy shared by the middleware.
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    api_prefix: String,
}

impl SecurityHeaders {
    pub fn new(api_prefix: impl Into<String>) -> Self {
        Self {
            api_prefix: api_prefix.into(),
        }
    }

    pub fn from_config(config: &SecurityConfig) -> Self {
        Self::new(config.api_prefix.clone())
    }

    /// Add the headers appropriate for a response to `path`.
    pub fn apply(&self, path: &str, response: &mut Response) {
        let headers = response.headers_mut();
        for (name, value) in STATIC_HEADERS {
            if !headers.contains_key(&name) {
                headers.insert(name, HeaderValue::from_static(value));
            }
        }

        if path.starts_with(self.api_prefix.as_str()) {
            if !headers.contains_key(header::CACHE_CONTROL) {
                headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_STORE));
            }
            if !headers.contains_key(header::PRAGMA) {
                headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
            }
        }
    }
}

/// Middleware that appends the security headers to every response.
pub async fn security_headers_middleware(
    State(policy): State<Arc<SecurityHeaders>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let mut response = next.run(request).await;
    policy.apply(&path, &mut response);
    response
}
