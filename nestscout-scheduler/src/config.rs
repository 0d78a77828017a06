//! Engine tuning knobs.

use std::time::Duration;

use thiserror::Error;

use crate::dirty::FanOutPolicy;

/// Exponential backoff for transient failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per pair, including the first, before the failure is
    /// declared permanent.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay.
    pub max_backoff: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retrying after the `attempt`-th failure (1-based).
    ///
    /// # Examples
    /// ```
    /// use std::time::Duration;
    /// use nestscout_scheduler::RetryPolicy;
    ///
    /// let policy = RetryPolicy::default();
    /// assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
    /// assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
    /// assert_eq!(policy.delay_for_attempt(30), Duration::from_secs(5));
    /// ```
    #[must_use]
    #[expect(clippy::float_arithmetic, reason = "backoff grows geometrically")]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_backoff.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs).map_or(self.max_backoff, |delay| delay.min(self.max_backoff))
    }
}

/// Scheduler and engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Concurrent score computations.
    pub workers: usize,
    /// Pairs drained per scheduling cycle.
    pub drain_batch: usize,
    /// Pending entries beyond which bulk admissions are refused.
    pub queue_capacity: usize,
    /// Pairs admitted per sweep tick.
    pub sweep_batch: usize,
    /// Deadline for a proximity lookup.
    pub query_timeout: Duration,
    /// Deadline for fetching external signals.
    pub signal_timeout: Duration,
    /// Backoff for transient failures.
    pub retry: RetryPolicy,
    /// Which pairs are materialized.
    pub fan_out: FanOutPolicy,
    /// Distance change, in metres, below which a moved entity keeps its
    /// proximity records.
    pub materiality_m: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            drain_batch: 64,
            queue_capacity: 10_000,
            sweep_batch: 256,
            query_timeout: Duration::from_secs(2),
            signal_timeout: Duration::from_secs(2),
            retry: RetryPolicy::default(),
            fan_out: FanOutPolicy::AllProfiles,
            materiality_m: 1.0,
        }
    }
}

impl EngineConfig {
    /// Set the worker count.
    #[must_use]
    pub const fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the drain batch size.
    #[must_use]
    pub const fn with_drain_batch(mut self, drain_batch: usize) -> Self {
        self.drain_batch = drain_batch;
        self
    }

    /// Set the bulk admission bound.
    #[must_use]
    pub const fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Set the sweep batch size.
    #[must_use]
    pub const fn with_sweep_batch(mut self, sweep_batch: usize) -> Self {
        self.sweep_batch = sweep_batch;
        self
    }

    /// Set both lookup deadlines.
    #[must_use]
    pub const fn with_timeouts(mut self, query: Duration, signal: Duration) -> Self {
        self.query_timeout = query;
        self.signal_timeout = signal;
        self
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the fan-out policy.
    #[must_use]
    pub const fn with_fan_out(mut self, fan_out: FanOutPolicy) -> Self {
        self.fan_out = fan_out;
        self
    }

    /// Set the materiality threshold in metres.
    #[must_use]
    pub const fn with_materiality(mut self, materiality_m: f64) -> Self {
        self.materiality_m = materiality_m;
        self
    }

    /// Check every knob is usable.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] naming the first offending
    /// field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field, reason| Err(ConfigError::InvalidValue { field, reason });
        if self.workers == 0 {
            return invalid("workers", "must be at least 1");
        }
        if self.drain_batch == 0 {
            return invalid("drain_batch", "must be at least 1");
        }
        if self.queue_capacity == 0 {
            return invalid("queue_capacity", "must be at least 1");
        }
        if self.sweep_batch == 0 {
            return invalid("sweep_batch", "must be at least 1");
        }
        if self.query_timeout.is_zero() {
            return invalid("query_timeout", "must be non-zero");
        }
        if self.signal_timeout.is_zero() {
            return invalid("signal_timeout", "must be non-zero");
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts", "must be at least 1");
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return invalid("retry.multiplier", "must be finite and at least 1");
        }
        if self.retry.initial_backoff > self.retry.max_backoff {
            return invalid("retry.initial_backoff", "must not exceed max_backoff");
        }
        if !self.materiality_m.is_finite() || self.materiality_m < 0.0 {
            return invalid("materiality_m", "must be finite and non-negative");
        }
        Ok(())
    }
}

/// Raised when an [`EngineConfig`] cannot drive the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A knob holds an unusable value.
    #[error("invalid {field}: {reason}")]
    InvalidValue {
        /// Offending field.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}
