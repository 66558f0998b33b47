//! Request pipeline for the nursery management API.
//!
//! Sits in front of the application handlers and provides security
//! headers, rolling-window rate limiting of the SMS auth endpoints, and a
//! uniform JSON error envelope for every failure.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::GatewayConfig;
pub use error::{AppError, ErrorEnvelope, ErrorKind, FieldError};
pub use http::{HttpServer, Pipeline};
pub use lifecycle::Shutdown;
