//! Per-identity quota enforcement
//!
//! Two independent resources are limited over a trailing 60 second window:
//! the number of admitted requests and the number of charged tokens.

pub mod clock;
pub mod limiter;
pub mod store;

pub use clock::{Clock, MockClock, SystemClock};
pub use limiter::{QuotaExceeded, QuotaResource, QuotaUsage, RateLimitConfig, RateLimiter};
pub use store::{Quota, QuotaStore};
