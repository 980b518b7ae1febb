//! Reconnection policy.
//!
//! Exponential backoff with a bounded number of attempts. The policy only
//! computes delays; the session loop owns the sleeping and the attempts.

use std::time::Duration;

/// Reconnection policy for a dropped connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Reconnect at all after an unexpected drop.
    pub enabled: bool,
    /// Attempts per outage before giving up.
    pub max_attempts: u32,
    /// Delay before the first attempt.
    pub initial_delay: Duration,
    /// Upper bound of a single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 5,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
            multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// A policy that never reconnects.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Get the delay before the given attempt (zero-based).
    ///
    /// Returns `None` once the attempt budget is spent or reconnection is
    /// disabled.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if !self.enabled || attempt >= self.max_attempts {
            return None;
        }

        let factor = self.multiplier.max(1.0).powi(attempt.min(i32::MAX as u32) as i32);
        let secs = (self.initial_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Some(Duration::from_secs_f64(secs))
    }

    /// Iterate the delays of one outage.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..).map_while(|attempt| self.delay_for(attempt))
    }
}
