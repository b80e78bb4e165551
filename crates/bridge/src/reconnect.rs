//! Reconnect policy with capped exponential back-off, plus the per-org
//! attempt tracker that enforces the attempt cap and the reset window.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use ob_domain::config::ReconnectConfig;

/// Controls how a dropped session is re-established.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect attempt.
    pub base_delay: Duration,
    /// Cap applied to every computed delay.
    pub max_delay: Duration,
    /// Consecutive attempts allowed before giving up.
    pub max_attempts: u32,
    /// Quiet period after which the attempt counter starts over.
    pub reset_window: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(48),
            max_attempts: 5,
            reset_window: Duration::from_secs(300),
        }
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(cfg: &ReconnectConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            max_attempts: cfg.max_attempts,
            reset_window: Duration::from_secs(cfg.reset_window_secs),
        }
    }
}

impl ReconnectPolicy {
    /// Delay for the given attempt number (1-indexed):
    /// `min(base · 2^(attempt-1), max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Whether the given attempt number exceeds the cap.
    pub fn should_give_up(&self, attempt: u32) -> bool {
        attempt > self.max_attempts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Schedule attempt number `attempt` after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// The cap was reached; `attempts` reconnects were made.
    Exhausted { attempts: u32 },
}

#[derive(Debug, Clone, Copy)]
struct ReconnectState {
    attempt_count: u32,
    last_attempt_at: Instant,
}

/// Per-organization attempt bookkeeping.
pub struct ReconnectTracker {
    policy: ReconnectPolicy,
    states: Mutex<HashMap<String, ReconnectState>>,
}

impl ReconnectTracker {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Record a reconnect attempt at `now` and decide what to do.
    ///
    /// A counter whose last attempt is older than the reset window starts
    /// over at zero.  On exhaustion the state is dropped so a later,
    /// explicit initialize starts from a clean slate.
    pub fn register_attempt(&self, org_id: &str, now: Instant) -> ReconnectDecision {
        let mut states = self.states.lock();
        let previous = match states.get(org_id) {
            Some(state) if now.saturating_duration_since(state.last_attempt_at) > self.policy.reset_window => 0,
            Some(state) => state.attempt_count,
            None => 0,
        };

        let attempt = previous + 1;
        if self.policy.should_give_up(attempt) {
            states.remove(org_id);
            return ReconnectDecision::Exhausted { attempts: previous };
        }

        states.insert(
            org_id.to_owned(),
            ReconnectState {
                attempt_count: attempt,
                last_attempt_at: now,
            },
        );
        ReconnectDecision::Retry {
            attempt,
            delay: self.policy.delay_for_attempt(attempt),
        }
    }

    /// Forget the org's attempts (successful open, manual disconnect).
    pub fn reset(&self, org_id: &str) {
        self.states.lock().remove(org_id);
    }

    /// Attempts recorded inside the current window.
    pub fn attempts(&self, org_id: &str) -> u32 {
        self.states
            .lock()
            .get(org_id)
            .map(|s| s.attempt_count)
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        self.states.lock().clear();
    }
}
