//! Request IDs.
//!
//! Every request gets an `x-request-id` (UUID v4) as early as possible; a
//! client-supplied one is kept. The same value is echoed on the response
//! and serves as the trace id of error envelopes and log lines.

use axum::{body::Body, http::Request};
use tower_http::request_id::{
    MakeRequestUuid, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};

pub const X_REQUEST_ID: &str = "x-request-id";

/// Layer that assigns a request ID when the client did not send one.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::x_request_id(MakeRequestUuid)
}

/// Layer that copies the request ID onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::x_request_id()
}

/// Access to the request's trace id.
pub trait RequestIdExt {
    /// The request ID, or a fresh UUID if the ID layer did not run.
    fn trace_id(&self) -> String;
}

impl RequestIdExt for Request<Body> {
    fn trace_id(&self) -> String {
        self.extensions()
            .get::<RequestId>()
            .map(|id| id.header_value())
            .or_else(|| self.headers().get(X_REQUEST_ID))
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }
}
