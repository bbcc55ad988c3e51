//! Manager configuration.

use std::time::Duration;

/// Default wait after a feed's last listener leaves before it is closed.
pub const DEFAULT_GRACE_DELAY: Duration = Duration::from_secs(1);

/// Default backoff before the second connect attempt. Doubles per attempt.
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default number of connect attempts before a feed is given up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default hard bound on a single connect attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default pause after closing an orphaned subscription before reopening.
pub const DEFAULT_STALE_SETTLE_DELAY: Duration = Duration::from_millis(100);

/// Configuration for a [`RealtimeManager`](crate::RealtimeManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Wait after the reference count reaches zero before closing a feed.
    pub grace_delay: Duration,

    /// Backoff before the second attempt; attempt `n` waits `base * 2^(n-1)`.
    pub retry_base_delay: Duration,

    /// Maximum connect attempts per feed, at least 1.
    pub max_attempts: u32,

    /// Hard bound on a single connect attempt.
    pub connect_timeout: Duration,

    /// Pause after closing an orphaned subscription with the same name.
    pub stale_settle_delay: Duration,
}

impl ManagerConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self {
            grace_delay: DEFAULT_GRACE_DELAY,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            stale_settle_delay: DEFAULT_STALE_SETTLE_DELAY,
        }
    }

    /// Set the cleanup grace delay.
    pub fn with_grace_delay(mut self, delay: Duration) -> Self {
        self.grace_delay = delay;
        self
    }

    /// Set the base retry delay.
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    /// Set the maximum number of connect attempts.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the per-attempt connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the settle delay after closing an orphaned subscription.
    pub fn with_stale_settle_delay(mut self, delay: Duration) -> Self {
        self.stale_settle_delay = delay;
        self
    }

    /// Backoff to wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.retry_base_delay.saturating_mul(1u32 << exponent)
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::new()
    }
}
