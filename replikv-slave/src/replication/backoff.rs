use super::config::ReplicationConfig;
use std::time::Duration;

/// Exponential reconnect delay with an upper bound
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_ms: u64,
    factor: f64,
    cap_ms: u64,
    current_ms: u64,
}

impl Backoff {
    pub fn new(config: &ReplicationConfig) -> Self {
        Self::with_params(
            config.initial_backoff_ms,
            config.backoff_growth_factor,
            config.backoff_cap_ms,
        )
    }

    pub fn with_params(initial_ms: u64, factor: f64, cap_ms: u64) -> Self {
        let cap_ms = cap_ms.max(initial_ms);
        Self {
            initial_ms,
            factor: if factor.is_nan() { 1.0 } else { factor.max(1.0) },
            cap_ms,
            current_ms: initial_ms,
        }
    }

    pub fn current(&self) -> Duration {
        Duration::from_millis(self.current_ms)
    }

    pub fn initial(&self) -> Duration {
        Duration::from_millis(self.initial_ms)
    }

    /// Delay to wait before the next attempt; grows the following one
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current();
        let grown = (self.current_ms as f64 * self.factor).min(self.cap_ms as f64);
        self.current_ms = (grown as u64).clamp(self.initial_ms, self.cap_ms);
        delay
    }

    pub fn reset(&mut self) {
        self.current_ms = self.initial_ms;
    }
}
