use std::time::Duration;

use crate::config::SupervisorConfig;

/// What to do after a failed connection attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Retry { next_attempt: u32, delay: Duration },
    CoolDown(Duration),
}

/// Fixed delay table for connection retries and recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub cool_down: Duration,
    pub recovery_pause: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&SupervisorConfig::default())
    }
}

impl BackoffPolicy {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            max_attempts: config.max_connect_attempts.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_seconds),
            cool_down: Duration::from_secs(config.cool_down_seconds),
            recovery_pause: Duration::from_secs(config.recovery_pause_seconds),
        }
    }

    /// `attempt` is 1-based
    pub fn after_failure(&self, attempt: u32) -> Backoff {
        if attempt < self.max_attempts {
            Backoff::Retry {
                next_attempt: attempt + 1,
                delay: self.retry_delay,
            }
        } else {
            Backoff::CoolDown(self.cool_down)
        }
    }
}
