//! Per-identity sliding-window usage records

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Usage recorded for one identity.
///
/// Both sequences are append-only and trimmed from the front, so they stay
/// sorted by timestamp.
#[derive(Debug, Default)]
pub struct Quota {
    requests: VecDeque<Instant>,
    token_events: VecDeque<(Instant, usize)>,
}

impl Quota {
    /// Drop every entry at or before `window_start`
    pub fn purge(&mut self, window_start: Instant) {
        while self.requests.front().is_some_and(|t| *t <= window_start) {
            self.requests.pop_front();
        }
        while self
            .token_events
            .front()
            .is_some_and(|(t, _)| *t <= window_start)
        {
            self.token_events.pop_front();
        }
    }

    /// Number of admitted requests still inside the window
    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    /// Sum of tokens charged inside the window
    pub fn token_sum(&self) -> usize {
        self.token_events.iter().map(|(_, tokens)| tokens).sum()
    }

    /// Record one admitted request
    pub fn record(&mut self, now: Instant, tokens: usize) {
        self.requests.push_back(now);
        self.token_events.push_back((now, tokens));
    }

    /// Timestamp of the most recent admitted request
    pub fn last_activity(&self) -> Option<Instant> {
        let last_request = self.requests.back().copied();
        let last_tokens = self.token_events.back().map(|(t, _)| *t);
        last_request.max(last_tokens)
    }
}

/// Identity-keyed quota records.
///
/// The map is only locked long enough to fetch or create an identity's
/// record; each record carries its own mutex, so checks for different
/// identities never wait on each other.
#[derive(Debug, Default)]
pub struct QuotaStore {
    quotas: DashMap<String, Arc<Mutex<Quota>>>,
}

impl QuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the record for an identity, creating it on first use
    pub fn entry(&self, identity: &str) -> Arc<Mutex<Quota>> {
        if let Some(existing) = self.quotas.get(identity) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.quotas
                .entry(identity.to_string())
                .or_default()
                .value(),
        )
    }

    /// Get the record for an identity without creating one
    pub fn get(&self, identity: &str) -> Option<Arc<Mutex<Quota>>> {
        self.quotas.get(identity).map(|q| Arc::clone(q.value()))
    }

    /// Number of tracked identities
    pub fn len(&self) -> usize {
        self.quotas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotas.is_empty()
    }

    /// Remove identities whose last activity is at or before `cutoff`.
    ///
    /// Records currently held by an in-flight check are skipped.
    pub fn evict_idle(&self, cutoff: Instant) -> usize {
        let candidates: Vec<String> = self
            .quotas
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        candidates
            .into_iter()
            .filter(|identity| {
                self.quotas
                    .remove_if(identity, |_, quota| {
                        if Arc::strong_count(quota) > 1 {
                            return false;
                        }
                        match quota.try_lock() {
                            Ok(q) => q.last_activity().map_or(true, |t| t <= cutoff),
                            Err(_) => false,
                        }
                    })
                    .is_some()
            })
            .count()
    }
}
