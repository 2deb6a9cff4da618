//! Capped, jittered exponential backoff for watch reconnection

use std::time::Duration;

/// Tuning for an exponential backoff sequence.
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Delay returned by the first `next()` after construction or reset
    pub initial: Duration,
    /// Upper bound on any returned delay
    pub max: Duration,
    /// Growth factor applied after each attempt
    pub multiplier: f64,
    /// Random jitter fraction (0.0 to 1.0) applied to each delay
    pub jitter: f64,
}

impl BackoffConfig {
    /// Tuning for the current context: a human is likely waiting on it,
    /// so retry quickly and cap low.
    pub fn current_context() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }

    /// Tuning for background contexts: slower growth, larger cap.
    pub fn background() -> Self {
        Self {
            initial: Duration::from_secs(2),
            max: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::background()
    }
}

/// Stateful backoff calculator.
///
/// Each `next()` returns the current delay with jitter applied and advances
/// the internal value as `value = min(value * multiplier, max)`. `reset()`
/// restores the initial delay; it is called on every successful reconnect.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        let current = config.initial;
        Self { config, current }
    }

    /// Next delay to wait before retrying. Never negative, never above the
    /// configured cap.
    pub fn next(&mut self) -> Duration {
        let base = self.current.as_secs_f64();

        let jitter_range = base * self.config.jitter;
        let jitter = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
        let delay = (base + jitter)
            .max(0.0)
            .min(self.config.max.as_secs_f64());

        self.current = Duration::from_secs_f64(
            (base * self.config.multiplier).min(self.config.max.as_secs_f64()),
        );

        Duration::from_secs_f64(delay)
    }

    /// Restore the initial delay.
    pub fn reset(&mut self) {
        self.current = self.config.initial;
    }
}
