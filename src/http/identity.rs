//! Client identification for quota purposes.

use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{HeaderMap, Request},
};

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Returned when neither a forwarded address nor a peer is known.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Best-effort stable identifier of the calling client.
///
/// The first `X-Forwarded-For` entry wins; otherwise the peer IP is used.
/// Never returns an empty string.
pub fn client_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    if let Some(client) = forwarded {
        return client.to_string();
    }

    match peer {
        Some(addr) => addr.ip().to_string(),
        None => UNKNOWN_CLIENT.to_string(),
    }
}

/// Identify the client of an axum request.
///
/// The peer comes from `ConnectInfo` when the server was started with
/// `into_make_service_with_connect_info`; in-process callers have none.
pub fn request_client_identity(request: &Request<Body>) -> String {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    client_identity(request.headers(), peer)
}
