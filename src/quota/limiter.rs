//! Sliding-window admission control over requests and tokens
//!
//! Each identity gets a trailing 60 second window. A check purges expired
//! entries, evaluates the request ceiling, then the token ceiling, and only
//! records usage when both pass. Non-positive ceilings disable that resource.

use super::clock::{Clock, SystemClock};
use super::store::QuotaStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Length of the trailing window
pub const WINDOW: Duration = Duration::from_secs(60);

/// Retry hint carried by every rejection
pub const RETRY_AFTER: Duration = Duration::from_secs(60);

/// Rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Admitted requests per window; `<= 0` disables the check
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: i64,

    /// Charged tokens per window; `<= 0` disables the check
    #[serde(default = "default_tokens_per_minute")]
    pub tokens_per_minute: i64,

    /// Evict identities idle for this many windows; `None` keeps them forever
    #[serde(default)]
    pub idle_eviction_windows: Option<u32>,
}

fn default_requests_per_minute() -> i64 {
    60
}

fn default_tokens_per_minute() -> i64 {
    20_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            tokens_per_minute: default_tokens_per_minute(),
            idle_eviction_windows: None,
        }
    }
}

/// Resource whose ceiling was hit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QuotaResource {
    Requests,
    Tokens,
}

impl QuotaResource {
    /// Stable reason code surfaced to clients
    pub fn reason_code(&self) -> &'static str {
        match self {
            QuotaResource::Requests => "REQUEST_RATE_EXCEEDED",
            QuotaResource::Tokens => "TOKEN_RATE_EXCEEDED",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QuotaResource::Requests => "requests",
            QuotaResource::Tokens => "tokens",
        }
    }
}

impl fmt::Display for QuotaResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason_code())
    }
}

/// Rejection raised when an identity exceeds a ceiling
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Rate limit exceeded: too many {} per minute", .resource.as_str())]
pub struct QuotaExceeded {
    pub resource: QuotaResource,
    pub retry_after: Duration,
}

impl QuotaExceeded {
    fn new(resource: QuotaResource) -> Self {
        Self {
            resource,
            retry_after: RETRY_AFTER,
        }
    }
}

/// Usage snapshot for one identity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuotaUsage {
    pub requests: usize,
    pub tokens: usize,
}

/// Per-identity sliding-window rate limiter
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    store: QuotaStore,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter on the system clock
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a limiter on an explicit clock
    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            store: QuotaStore::new(),
            clock,
        }
    }

    /// Admit or reject a request charging `tokens` for `identity`.
    ///
    /// A rejection leaves the identity's usage untouched.
    pub fn check(&self, identity: &str, tokens: usize) -> Result<(), QuotaExceeded> {
        let now = self.clock.now();
        let quota = self.store.entry(identity);
        let mut quota = quota.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(window_start) = now.checked_sub(WINDOW) {
            quota.purge(window_start);
        }

        let request_ceiling = self.config.requests_per_minute;
        if request_ceiling > 0 && quota.request_count() as i64 >= request_ceiling {
            warn!(
                requests = quota.request_count(),
                ceiling = request_ceiling,
                "Request rate exceeded"
            );
            return Err(QuotaExceeded::new(QuotaResource::Requests));
        }

        let token_ceiling = self.config.tokens_per_minute;
        let used = quota.token_sum();
        if token_ceiling > 0 && used.saturating_add(tokens) as u64 > token_ceiling as u64 {
            warn!(
                used,
                requested = tokens,
                ceiling = token_ceiling,
                "Token rate exceeded"
            );
            return Err(QuotaExceeded::new(QuotaResource::Tokens));
        }

        quota.record(now, tokens);
        debug!(
            requests = quota.request_count(),
            tokens = used.saturating_add(tokens),
            "Request admitted"
        );
        Ok(())
    }

    /// Current window usage for an identity, without recording anything
    pub fn usage(&self, identity: &str) -> QuotaUsage {
        let Some(quota) = self.store.get(identity) else {
            return QuotaUsage::default();
        };
        let now = self.clock.now();
        let mut quota = quota.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(window_start) = now.checked_sub(WINDOW) {
            quota.purge(window_start);
        }
        QuotaUsage {
            requests: quota.request_count(),
            tokens: quota.token_sum(),
        }
    }

    /// Drop identities idle for the configured number of windows.
    ///
    /// Returns the number of evicted identities; always zero when idle
    /// eviction is not configured.
    pub fn evict_idle(&self) -> usize {
        let Some(windows) = self.config.idle_eviction_windows else {
            return 0;
        };
        let idle_for = WINDOW * windows.max(1);
        let Some(cutoff) = self.clock.now().checked_sub(idle_for) else {
            return 0;
        };
        let evicted = self.store.evict_idle(cutoff);
        if evicted > 0 {
            info!(evicted, remaining = self.store.len(), "Evicted idle identities");
        }
        evicted
    }

    /// Number of identities currently tracked
    pub fn tracked_identities(&self) -> usize {
        self.store.len()
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}
