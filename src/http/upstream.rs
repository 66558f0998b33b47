//! Forwarding to the nursery API.
//!
//! Requests that no gateway route claims are sent to the upstream process
//! unchanged, apart from the URI authority and the forwarding headers.

use std::net::SocketAddr;
use std::str::FromStr;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{
        uri::{Authority, InvalidUri, Scheme},
        HeaderValue, Request, Uri,
    },
    response::{IntoResponse, Response},
};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::error::AppError;
use crate::http::identity::X_FORWARDED_FOR;
use crate::http::request::RequestIdExt;

/// HTTP client bound to one upstream address.
#[derive(Clone)]
pub struct Upstream {
    client: Client<HttpConnector, Body>,
    authority: Authority,
}

impl std::fmt::Debug for Upstream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Upstream")
            .field("authority", &self.authority)
            .finish()
    }
}

impl Upstream {
    pub fn new(address: &str) -> Result<Self, InvalidUri> {
        let authority = Authority::from_str(address)?;
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Ok(Self { client, authority })
    }

    /// Rewrite `request` to target the upstream.
    fn prepare(&self, mut request: Request<Body>) -> Result<Request<Body>, AppError> {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());

        let mut parts = request.uri().clone().into_parts();
        parts.scheme = Some(Scheme::HTTP);
        parts.authority = Some(self.authority.clone());
        *request.uri_mut() = Uri::from_parts(parts)
            .map_err(|e| AppError::internal(format!("failed to build upstream URI: {e}")))?;

        if let Some(peer) = peer {
            let forwarded = match request.headers().get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
                Some(existing) => format!("{existing}, {peer}"),
                None => peer,
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded) {
                request.headers_mut().insert(X_FORWARDED_FOR, value);
            }
        }
        Ok(request)
    }

    /// Send `request` upstream and relay the answer.
    pub async fn forward(&self, request: Request<Body>) -> Result<Response, AppError> {
        let trace_id = request.trace_id();
        let request = self.prepare(request)?;
        tracing::debug!(trace_id = %trace_id, uri = %request.uri(), "Forwarding upstream");

        let response: hyper::Response<hyper::body::Incoming> = self
            .client
            .request(request)
            .await
            .map_err(|e| AppError::internal(format!("upstream request failed: {e}")))?;
        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

/// Fallback handler: forward when an upstream is configured, 404 otherwise.
pub async fn forward_handler(
    State(upstream): State<Option<Upstream>>,
    request: Request<Body>,
) -> Response {
    match upstream {
        Some(upstream) => match upstream.forward(request).await {
            Ok(response) => response,
            Err(e) => e.into_response(),
        },
        None => AppError::not_found(format!("No route for {}", request.uri().path())).into_response(),
    }
}
