// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use crate::error::BrokerError;

/// Backoff applied between failed refresh attempts for one account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive failures before the account enters the FAILED cool-down.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Minimum wait after a 429 that carries no usable `Retry-After`.
    pub rate_limit_floor: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            rate_limit_floor: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `failures`-th consecutive failure (1-based).
    pub fn backoff(&self, failures: u32, error: &BrokerError) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1));
        let delay = self.base_delay.saturating_mul(factor).min(self.max_delay);
        match error {
            BrokerError::RateLimited { retry_after_secs, .. } => {
                let floor = retry_after_secs
                    .map(Duration::from_secs)
                    .unwrap_or(self.rate_limit_floor)
                    .max(self.rate_limit_floor);
                delay.max(floor).min(self.max_delay)
            }
            _ => delay,
        }
    }

    pub fn is_exhausted(&self, failures: u32) -> bool {
        failures >= self.max_attempts
    }
}
