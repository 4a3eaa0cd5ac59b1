//! Consecutive-failure circuit breaker.
//!
//! There is no explicit half-open state. Once the cooldown elapses the
//! breaker closes but keeps its failure count, so the next request acts as
//! the probe: a success resets the count to zero, a failure reopens the
//! breaker with a fresh timestamp.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

/// Breaker tuning.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures that open the breaker.
    pub threshold: u32,
    /// How long the breaker stays open.
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
}

#[derive(Debug, Default)]
struct BreakerHealth {
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Per-instance breaker guarding the browser stage.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    health: Mutex<BreakerHealth>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config: BreakerConfig {
                threshold: config.threshold.max(1),
                cooldown: config.cooldown,
            },
            health: Mutex::new(BreakerHealth::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerHealth> {
        self.health.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Check admission. Returns the remaining cooldown when open.
    pub fn check(&self) -> Result<(), Duration> {
        let mut health = self.lock();
        let Some(opened_at) = health.opened_at else {
            return Ok(());
        };

        let elapsed = opened_at.elapsed();
        if elapsed >= self.config.cooldown {
            health.opened_at = None;
            info!(
                "Circuit breaker cooldown elapsed, admitting probe ({} failures on record)",
                health.consecutive_failures
            );
            Ok(())
        } else {
            Err(self.config.cooldown - elapsed)
        }
    }

    pub fn record_success(&self) {
        let mut health = self.lock();
        if health.consecutive_failures > 0 {
            info!(
                "Circuit breaker reset after {} consecutive failures",
                health.consecutive_failures
            );
        }
        health.consecutive_failures = 0;
        health.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut health = self.lock();
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        // An open period whose cooldown has passed counts as closed even if
        // no check() ran since.
        let still_open = health
            .opened_at
            .is_some_and(|opened_at| opened_at.elapsed() < self.config.cooldown);
        if health.consecutive_failures >= self.config.threshold && !still_open {
            health.opened_at = Some(Instant::now());
            warn!(
                "Circuit breaker opened after {} consecutive failures (cooldown {:?})",
                health.consecutive_failures, self.config.cooldown
            );
        }
    }

    /// Current state, without promoting an expired open breaker.
    pub fn state(&self) -> BreakerState {
        match self.lock().opened_at {
            Some(opened_at) if opened_at.elapsed() < self.config.cooldown => BreakerState::Open,
            _ => BreakerState::Closed,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn config(&self) -> BreakerConfig {
        self.config
    }
}
