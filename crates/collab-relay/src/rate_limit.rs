//! Per-identifier rate limiting with violation backoff.
//!
//! Three independent categories share the implementation but never share
//! counters: connection attempts per IP, messages per connection, auth
//! attempts per IP. Exceeding a limit escalates a violation counter that
//! stretches the next window exponentially; the counter decays by one for
//! every window that passes cleanly, and stale records are swept.

use std::collections::HashMap;
use std::time::Duration;

/// Largest window-stretch exponent, so penalties stay bounded.
const MAX_PENALTY_EXPONENT: u32 = 6;

/// Independent rate-limit categories. Counters never interact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitCategory {
    /// Connection attempts per IP
    Connection,
    /// Messages per connection
    Message,
    /// Authentication attempts per IP
    Auth,
}

impl RateLimitCategory {
    /// (max events, window) for this category.
    fn limit(self) -> (u32, Duration) {
        match self {
            RateLimitCategory::Connection => (5, Duration::from_secs(60)),
            RateLimitCategory::Message => (100, Duration::from_secs(60)),
            RateLimitCategory::Auth => (3, Duration::from_secs(60)),
        }
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// How long the caller must wait before the next allowed event
    pub retry_after: Duration,
}

impl RateLimitDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            retry_after: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
struct RateLimitRecord {
    count: u32,
    /// When the current window ends (ms since epoch)
    window_reset_ms: u64,
    violation_count: u32,
    violated_this_window: bool,
}

/// Tracks rate limits per (identifier, category) pair.
///
/// Callers pass the current time explicitly; the limiter holds no clock,
/// which keeps the violation/decay behavior testable.
pub struct RateLimiter {
    records: HashMap<(String, RateLimitCategory), RateLimitRecord>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
        }
    }

    /// Record one event for the identifier and decide whether it passes.
    pub fn check(
        &mut self,
        identifier: &str,
        category: RateLimitCategory,
        now_ms: u64,
    ) -> RateLimitDecision {
        let (max_events, window) = category.limit();
        let window_ms = window.as_millis() as u64;

        let record = self
            .records
            .entry((identifier.to_string(), category))
            .or_insert(RateLimitRecord {
                count: 0,
                window_reset_ms: now_ms + window_ms,
                violation_count: 0,
                violated_this_window: false,
            });

        // Roll the window over, decaying the violation counter once per
        // window that expired without a new violation. A long idle gap
        // counts as many clean windows.
        if now_ms >= record.window_reset_ms {
            let mut clean_windows = 1 + (now_ms - record.window_reset_ms) / window_ms;
            if record.violated_this_window {
                // The window that just expired contained the violation
                clean_windows -= 1;
            }
            record.violation_count = record
                .violation_count
                .saturating_sub(clean_windows.min(u32::MAX as u64) as u32);
            record.count = 0;
            record.violated_this_window = false;
            record.window_reset_ms = now_ms + window_ms;
        }

        record.count += 1;
        if record.count <= max_events {
            return RateLimitDecision::allow();
        }

        // First excess event in this window escalates the violation count
        // and stretches the window exponentially.
        if !record.violated_this_window {
            record.violated_this_window = true;
            record.violation_count += 1;
            let exponent = record.violation_count.min(MAX_PENALTY_EXPONENT);
            record.window_reset_ms = now_ms + (window_ms << exponent);
            tracing::warn!(
                "Rate limit exceeded for {} ({:?}), violation #{}",
                identifier,
                category,
                record.violation_count
            );
        }

        RateLimitDecision {
            allowed: false,
            retry_after: Duration::from_millis(record.window_reset_ms.saturating_sub(now_ms)),
        }
    }

    /// Violation count for an identifier (0 if unknown).
    pub fn violations(&self, identifier: &str, category: RateLimitCategory) -> u32 {
        self.records
            .get(&(identifier.to_string(), category))
            .map(|r| r.violation_count)
            .unwrap_or(0)
    }

    /// Evict records past their relevance window, bounding memory.
    pub fn sweep(&mut self, now_ms: u64) {
        let before = self.records.len();
        self.records
            .retain(|_, r| r.violation_count > 0 || now_ms < r.window_reset_ms);
        let evicted = before - self.records.len();
        if evicted > 0 {
            tracing::debug!("Swept {} stale rate-limit record(s)", evicted);
        }
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
