//! Request hardening.
//!
//! ```text
//! Incoming request:
//!     → headers.rs (security response headers)
//!     → sanitize.rs (JSON body size limit, operator keys, markup)
//!     → rate_limit.rs (per-IP window on /api)
//!     → routing
//! ```

pub mod headers;
pub mod rate_limit;
pub mod sanitize;

pub use headers::with_security_headers;
pub use rate_limit::{rate_limit, RateLimiter};
pub use sanitize::sanitize_body;
