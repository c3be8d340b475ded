//! Reconnect-rate tracking
//!
//! A master that keeps dropping and re-accepting the slave is treated as
//! unhealthy: once `max_reconnects` successful reconnects land inside the
//! sliding window the slave stops reconnecting until an operator steps in.

use super::config::GiveUpConfig;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sliding window of successful reconnect timestamps
#[derive(Debug, Clone)]
pub struct ReconnectTracker {
    window: Duration,
    max_reconnects: usize,
    reconnects: VecDeque<Instant>,
}

impl ReconnectTracker {
    pub fn new(config: &GiveUpConfig) -> Self {
        Self::with_limits(config.window(), config.max_reconnects)
    }

    pub fn with_limits(window: Duration, max_reconnects: usize) -> Self {
        Self {
            window,
            max_reconnects: max_reconnects.max(1),
            // prune() keeps the queue at max_reconnects entries
            reconnects: VecDeque::new(),
        }
    }

    /// Record a successful reconnect now
    pub fn on_reconnect(&mut self) {
        self.on_reconnect_at(Instant::now());
    }

    pub fn on_reconnect_at(&mut self, now: Instant) {
        self.reconnects.push_back(now);
        self.prune(now);
    }

    /// True when reconnect churn inside the window reached the limit
    pub fn give_up(&self) -> bool {
        self.give_up_at(Instant::now())
    }

    pub fn give_up_at(&self, now: Instant) -> bool {
        self.recent_at(now) >= self.max_reconnects
    }

    /// Number of reconnects inside the window
    pub fn recent(&self) -> usize {
        self.recent_at(Instant::now())
    }

    pub fn recent_at(&self, now: Instant) -> usize {
        self.reconnects
            .iter()
            .filter(|at| now.saturating_duration_since(**at) <= self.window)
            .count()
    }

    pub fn reset(&mut self) {
        self.reconnects.clear();
    }

    pub fn len(&self) -> usize {
        self.reconnects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reconnects.is_empty()
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.reconnects.front() {
            if now.saturating_duration_since(*oldest) > self.window {
                self.reconnects.pop_front();
            } else {
                break;
            }
        }

        // Older entries beyond the limit can never change the decision
        while self.reconnects.len() > self.max_reconnects {
            self.reconnects.pop_front();
        }
    }
}
