// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry policy for change-feed reconnection.
//!
//! Every failed connection attempt (token, handshake, transport, protocol)
//! is charged against the same budget. The counter is owned by the caller
//! and reset once a connection reaches streaming.
//!
//! # Example
//!
//! ```
//! use hierarchy_sync::RetryConfig;
//! use std::time::Duration;
//!
//! // Reconnection: fixed 5s delay, 10 retries after the first attempt
//! let stream = RetryConfig::stream();
//! assert_eq!(stream.max_retries, Some(10));
//! assert!(!stream.is_exhausted(10));
//! assert!(stream.is_exhausted(11));
//! assert_eq!(stream.delay_for(3), Duration::from_secs(5));
//!
//! // Exponential variant, capped
//! let backoff = RetryConfig {
//!     initial_delay: Duration::from_millis(100),
//!     max_delay: Duration::from_secs(1),
//!     factor: 2.0,
//!     max_retries: Some(5),
//! };
//! assert_eq!(backoff.delay_for(2), Duration::from_millis(200));
//! assert_eq!(backoff.delay_for(9), Duration::from_secs(1));
//! ```

use std::time::Duration;

/// Configuration for reconnection behavior.
///
/// - [`RetryConfig::stream()`] - Fixed delay, bounded attempts (the default)
/// - [`RetryConfig::fixed()`] - Same shape with explicit values
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Retries allowed after the first attempt. `None` retries forever.
    pub max_retries: Option<usize>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::stream()
    }
}

impl RetryConfig {
    /// Upstream feed reconnection: 5 seconds between attempts, 10 retries.
    #[must_use]
    pub fn stream() -> Self {
        Self::fixed(Duration::from_secs(5), 10)
    }

    /// Constant `delay` between attempts, giving up once `max_retries` retries have failed.
    #[must_use]
    pub fn fixed(delay: Duration, max_retries: usize) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            factor: 1.0,
            max_retries: Some(max_retries),
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self::fixed(Duration::from_millis(1), 3)
    }

    /// Delay to wait after the `failures`-th consecutive failure (1-based).
    #[must_use]
    pub fn delay_for(&self, failures: usize) -> Duration {
        let exponent = failures.saturating_sub(1).min(i32::MAX as usize) as i32;
        let scaled = self.initial_delay.as_secs_f64() * self.factor.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled.max(0.0))
    }

    /// Whether `failures` consecutive failures exhaust the budget.
    ///
    /// The first failure is the initial attempt, so the budget runs out
    /// after `max_retries + 1` failures.
    #[must_use]
    pub fn is_exhausted(&self, failures: usize) -> bool {
        matches!(self.max_retries, Some(max) if failures > max)
    }
}
