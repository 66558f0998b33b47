//! Failure translation middleware.
//!
//! Handlers signal failure by returning [`AppError`], which travels up in
//! the response extensions. This middleware is the single place where such
//! errors are logged and rendered into the JSON envelope. It also enforces
//! the request timeout and turns handler panics into internal errors.
//! A bodiless 405 from the router is enveloped like any other failure.
//!
//! ```text
//! Handling ──(AppError | timeout | panic)──▶ Translating ──▶ Responded
//! ```

use std::any::Any;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tower_http::catch_panic::CatchPanicLayer;

use crate::error::{AppError, ErrorKind};
use crate::http::request::RequestIdExt;
use crate::observability::metrics;

/// Body used when even the envelope cannot be produced.
const FALLBACK_BODY: &str = r#"{"statusCode":500,"message":"An internal server error occurred","errors":["INTERNAL_SERVER_ERROR"],"traceId":""}"#;

/// Translation settings.
#[derive(Debug, Clone, Copy)]
pub struct ErrorTranslator {
    request_timeout: Option<Duration>,
}

impl ErrorTranslator {
    pub fn new(request_timeout: Option<Duration>) -> Self {
        Self { request_timeout }
    }

    /// Render `error` as a JSON envelope response.
    pub fn render(error: &AppError, trace_id: &str) -> Response {
        let envelope = error.envelope(trace_id);
        let status = StatusCode::from_u16(envelope.status_code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        match serde_json::to_vec(&envelope) {
            Ok(body) => json_response(status, body),
            Err(e) => {
                tracing::error!(trace_id = %trace_id, error = %e, "Failed to serialize error envelope");
                json_response(StatusCode::INTERNAL_SERVER_ERROR, FALLBACK_BODY.as_bytes().to_vec())
            }
        }
    }
}

impl Default for ErrorTranslator {
    fn default() -> Self {
        Self::new(None)
    }
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

fn log_error(error: &AppError, method: &Method, path: &str, trace_id: &str) {
    let kind = error.kind();
    metrics::record_error(kind);
    match kind {
        ErrorKind::Unknown => tracing::error!(
            trace_id = %trace_id,
            method = %method,
            path = %path,
            kind = kind.as_str(),
            error = %error,
            "Unhandled error"
        ),
        _ => tracing::warn!(
            trace_id = %trace_id,
            method = %method,
            path = %path,
            kind = kind.as_str(),
            error = %error,
            "Request failed"
        ),
    }
}

/// Middleware that renders every [`AppError`] as the uniform envelope.
pub async fn error_envelope_middleware(
    State(translator): State<ErrorTranslator>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let trace_id = request.trace_id();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let mut response = match translator.request_timeout {
        Some(limit) => match tokio::time::timeout(limit, next.run(request)).await {
            Ok(response) => response,
            Err(elapsed) => AppError::from(elapsed).into_response(),
        },
        None => next.run(request).await,
    };

    let error = match response.extensions_mut().remove::<AppError>() {
        Some(error) => error,
        None if is_bare_method_not_allowed(&response) => AppError::MethodNotAllowed {
            method: method.to_string(),
            path: path.clone(),
        },
        None => return response,
    };

    log_error(&error, &method, &path, &trace_id);
    let mut rendered = ErrorTranslator::render(&error, &trace_id);
    if let Some(allow) = response.headers().get(header::ALLOW) {
        rendered.headers_mut().insert(header::ALLOW, allow.clone());
    }
    rendered
}

/// The router answers a method mismatch with an empty 405 of its own.
fn is_bare_method_not_allowed(response: &Response) -> bool {
    response.status() == StatusCode::METHOD_NOT_ALLOWED
        && !response.headers().contains_key(header::CONTENT_TYPE)
}

/// Convert a caught panic into an internal error for the translator.
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    };
    AppError::internal(format!("panic: {detail}")).into_response()
}

/// Layer that catches handler panics; must sit inside the translator.
pub fn catch_panic_layer() -> CatchPanicLayer<fn(Box<dyn Any + Send + 'static>) -> Response> {
    CatchPanicLayer::custom(panic_response as fn(Box<dyn Any + Send + 'static>) -> Response)
}
