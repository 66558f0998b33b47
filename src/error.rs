//! Application failures and the uniform error envelope.
//!
//! Handlers return `Result<_, AppError>`. Each variant carries an explicit
//! [`ErrorKind`]; the status code, error tags and client-facing message are
//! looked up from the kind, never from the concrete source of the failure.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Tag used for business-rule violations that carry no code of their own.
pub const BUSINESS_ERROR: &str = "BUSINESS_ERROR";

/// Failure classification; translation is a lookup on this value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    Business,
    Unauthorized,
    Forbidden,
    NotFound,
    InvalidParameter,
    MethodNotAllowed,
    Unauthenticated,
    Timeout,
    Unknown,
}

impl ErrorKind {
    /// HTTP status for this kind.
    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::Validation | ErrorKind::Business | ErrorKind::InvalidParameter => {
                StatusCode::BAD_REQUEST
            }
            ErrorKind::Unauthorized | ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ErrorKind::Timeout => StatusCode::REQUEST_TIMEOUT,
            ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to clients instead of the error's own text, if any.
    pub fn generic_message(self) -> Option<&'static str> {
        match self {
            ErrorKind::Validation => Some("One or more validation errors occurred."),
            ErrorKind::InvalidParameter => Some("Invalid parameter"),
            ErrorKind::MethodNotAllowed => Some("Method not allowed"),
            ErrorKind::Unauthenticated => Some("Authentication required"),
            ErrorKind::Timeout => Some("Request timed out"),
            ErrorKind::Unknown => Some("An internal server error occurred"),
            ErrorKind::Business
            | ErrorKind::Unauthorized
            | ErrorKind::Forbidden
            | ErrorKind::NotFound => None,
        }
    }

    /// Fixed error tag, if the kind has one.
    pub fn tag(self) -> Option<&'static str> {
        match self {
            ErrorKind::Validation | ErrorKind::Business => None,
            ErrorKind::Unauthorized | ErrorKind::Unauthenticated => Some("UNAUTHORIZED"),
            ErrorKind::Forbidden => Some("FORBIDDEN"),
            ErrorKind::NotFound => Some("NOT_FOUND"),
            ErrorKind::InvalidParameter => Some("INVALID_PARAMETER"),
            ErrorKind::MethodNotAllowed => Some("METHOD_NOT_ALLOWED"),
            ErrorKind::Timeout => Some("REQUEST_TIMEOUT"),
            ErrorKind::Unknown => Some("INTERNAL_SERVER_ERROR"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Business => "business",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidParameter => "invalid_parameter",
            ErrorKind::MethodNotAllowed => "method_not_allowed",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Unknown => "unknown",
        }
    }
}

/// A failed check on a single input field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every failure a handler can report.
///
/// `Clone` is required so the error can ride in response extensions until
/// the translation middleware renders it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppError {
    #[error("validation failed on {} field(s)", .0.len())]
    Validation(Vec<FieldError>),

    #[error("{message}")]
    Business { message: String, code: Option<String> },

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The route exists but not for this method.
    #[error("method {method} not allowed on {path}")]
    MethodNotAllowed { method: String, path: String },

    #[error("authentication required")]
    Unauthenticated,

    #[error("request timed out")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn business(message: impl Into<String>) -> Self {
        AppError::Business {
            message: message.into(),
            code: None,
        }
    }

    pub fn business_with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        AppError::Business {
            message: message.into(),
            code: Some(code.into()),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        AppError::NotFound(message.into())
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        AppError::Internal(detail.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) => ErrorKind::Validation,
            AppError::Business { .. } => ErrorKind::Business,
            AppError::Unauthorized(_) => ErrorKind::Unauthorized,
            AppError::Forbidden(_) => ErrorKind::Forbidden,
            AppError::NotFound(_) => ErrorKind::NotFound,
            AppError::InvalidParameter(_) => ErrorKind::InvalidParameter,
            AppError::MethodNotAllowed { .. } => ErrorKind::MethodNotAllowed,
            AppError::Unauthenticated => ErrorKind::Unauthenticated,
            AppError::Timeout => ErrorKind::Timeout,
            AppError::Internal(_) => ErrorKind::Unknown,
        }
    }

    /// Client-safe message: the generic text for the kind, or the domain
    /// message for kinds that expose it.
    pub fn public_message(&self) -> String {
        match self.kind().generic_message() {
            Some(generic) => generic.to_string(),
            None => self.to_string(),
        }
    }

    /// Error tags for the envelope's `errors` array.
    pub fn tags(&self) -> Vec<String> {
        match self {
            AppError::Validation(fields) => fields.iter().map(|f| f.to_string()).collect(),
            AppError::Business { code, .. } => {
                vec![code.clone().unwrap_or_else(|| BUSINESS_ERROR.to_string())]
            }
            other => other.kind().tag().map(str::to_string).into_iter().collect(),
        }
    }

    /// Build the envelope for this error under the given trace id.
    pub fn envelope(&self, trace_id: &str) -> ErrorEnvelope {
        ErrorEnvelope {
            status_code: self.kind().status().as_u16(),
            message: self.public_message(),
            errors: self.tags(),
            trace_id: trace_id.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    /// Produces a bodiless response carrying the error in its extensions.
    /// The translation middleware replaces it with the rendered envelope.
    fn into_response(self) -> Response {
        let mut response = self.kind().status().into_response();
        response.extensions_mut().insert(self);
        response
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidParameter(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::InvalidParameter(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::InvalidParameter(rejection.body_text())
    }
}

impl From<tokio::time::error::Elapsed> for AppError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        AppError::Timeout
    }
}

/// The JSON body of every translated failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub status_code: u16,
    pub message: String,
    pub errors: Vec<String>,
    pub trace_id: String,
}
