//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs (hardening headers, applied on the way out)
//!     → rate_limit.rs (per-client quota on auth endpoints)
//!     → Pass to translation + handlers
//! ```
//!
//! # Design Decisions
//! - Rate-limit state lives behind the `RateLimitStore` trait, injected at startup
//! - Denial short-circuits before the handler runs; it is not an error path

pub mod clock;
pub mod headers;
pub mod rate_limit;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use headers::{security_headers_middleware, SecurityHeaders};
pub use rate_limit::{rate_limit_middleware, Decision, RateLimitExceeded, RateLimitPolicy, RateLimiter};
pub use store::{InMemoryStore, RateLimitStore};
