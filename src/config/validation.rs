//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and address
//! formats. All problems are reported at once, not just the first.

use std::net::SocketAddr;
use std::str::FromStr;

use axum::http::uri::Authority;

use crate::config::schema::GatewayConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("rate_limit.max_requests must be greater than zero")]
    ZeroMaxRequests,

    #[error("rate_limit.window_secs must be greater than zero")]
    ZeroWindow,

    #[error("rate_limit.purge_interval_secs must be greater than zero")]
    ZeroPurgeInterval,

    #[error("rate_limit.protected_paths entry {0:?} must start with '/'")]
    RelativeProtectedPath(String),

    #[error("timeouts.request_secs must be greater than zero")]
    ZeroRequestTimeout,

    #[error("{field} is not a valid socket address: {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} is not a valid host:port authority: {value:?}")]
    InvalidAuthority { field: &'static str, value: String },
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let rate_limit = &config.rate_limit;
    if rate_limit.max_requests == 0 {
        errors.push(ValidationError::ZeroMaxRequests);
    }
    if rate_limit.window_secs == 0 {
        errors.push(ValidationError::ZeroWindow);
    }
    if rate_limit.purge_interval_secs == 0 {
        errors.push(ValidationError::ZeroPurgeInterval);
    }
    for path in &rate_limit.protected_paths {
        if !path.starts_with('/') {
            errors.push(ValidationError::RelativeProtectedPath(path.clone()));
        }
    }

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroRequestTimeout);
    }

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.upstream.enabled && Authority::from_str(&config.upstream.address).is_err() {
        errors.push(ValidationError::InvalidAuthority {
            field: "upstream.address",
            value: config.upstream.address.clone(),
        });
    }
    if config.observability.metrics_enabled {
        check_address(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field,
            value: value.to_string(),
        });
    }
}
