//! Exponential backoff for reconnect attempts.

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Base delay in milliseconds for attempt 0.
    pub base_delay_ms: u64,
    /// Upper bound on any computed delay.
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 disables jitter and makes delays exact).
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            jitter_factor: 0.0,
        }
    }
}

/// Attempt-indexed backoff: `min(base * 2^attempt, max)`.
#[derive(Debug, Clone, Default)]
pub struct ReconnectBackoff {
    config: BackoffConfig,
}

impl ReconnectBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config }
    }

    /// Delay before the reconnect following failure number `attempt`
    /// (counting from 0). Saturates at the configured maximum for any
    /// attempt number.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = 2u64
            .checked_pow(attempt)
            .and_then(|factor| self.config.base_delay_ms.checked_mul(factor))
            .unwrap_or(self.config.max_delay_ms);
        let capped = exp.min(self.config.max_delay_ms);

        let final_ms = if self.config.jitter_factor > 0.0 {
            let jitter_range = capped as f64 * self.config.jitter_factor;
            let jitter = rand::rng().random_range(-jitter_range..jitter_range);
            (capped as f64 + jitter).max(1.0) as u64
        } else {
            capped
        };

        Duration::from_millis(final_ms)
    }
}
