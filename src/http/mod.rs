//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, pipeline assembly)
//!     → request.rs (request ID / trace id)
//!     → identity.rs (client id for quotas)
//!     → [security stages]
//!     → translator.rs (AppError → JSON envelope)
//!     → handler, or upstream.rs (forward to the nursery API)
//! ```

pub mod identity;
pub mod request;
pub mod server;
pub mod translator;
pub mod upstream;

pub use identity::{client_identity, request_client_identity};
pub use request::{RequestIdExt, X_REQUEST_ID};
pub use server::{HttpServer, Pipeline};
pub use translator::{error_envelope_middleware, ErrorTranslator};
