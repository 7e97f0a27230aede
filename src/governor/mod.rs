//! Brute-force lockout governor: one attempt record per identity.
//!
//! Per-identity state machine: `Normal` while the failure count stays at or
//! below the threshold, `Locked` once it exceeds it. `Locked` denies every
//! attempt until either a successful authentication resets the record, the
//! lockout window expires (timed reset), or an operator unlocks the identity.
//!
//! Attempt records live behind per-identity mutexes inside a shared map, so
//! concurrent attempts against the same identity serialize (no lost counts)
//! while distinct identities never contend on anything but the map itself.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

const DEFAULT_THRESHOLD: u32 = 5;
const DEFAULT_LOCKOUT_SECONDS: i64 = 15 * 60;

#[derive(Clone, Copy, Debug)]
pub struct GovernorConfig {
    threshold: u32,
    lockout: Duration,
}

impl GovernorConfig {
    /// Defaults: 5 tolerated failures, 15 minute lockout window.
    #[must_use]
    pub fn new() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            lockout: Duration::seconds(DEFAULT_LOCKOUT_SECONDS),
        }
    }

    #[must_use]
    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_lockout_seconds(mut self, seconds: i64) -> Self {
        self.lockout = Duration::seconds(seconds);
        self
    }

    #[must_use]
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    #[must_use]
    pub fn lockout(&self) -> Duration {
        self.lockout
    }
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of [`LoginGovernor::check_allowed`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptDecision {
    Allowed,
    Locked { until: DateTime<Utc> },
}

/// Outcome of [`LoginGovernor::record_failure`].
///
/// `lockout_triggered` is true only for the failure that crossed the
/// threshold, so callers can audit the transition exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FailureOutcome {
    pub failure_count: u32,
    pub lockout_triggered: bool,
}

#[derive(Debug, Default)]
struct AttemptState {
    failure_count: u32,
    locked_until: Option<DateTime<Utc>>,
}

pub struct LoginGovernor {
    config: GovernorConfig,
    attempts: RwLock<HashMap<String, Arc<Mutex<AttemptState>>>>,
}

impl LoginGovernor {
    #[must_use]
    pub fn new(config: GovernorConfig) -> Self {
        Self {
            config,
            attempts: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &GovernorConfig {
        &self.config
    }

    /// Whether an attempt for `identity` may proceed at `now`.
    ///
    /// Must run before any credential work so a locked identity never incurs
    /// decrypt or compare cost. An expired lockout window is the timed reset:
    /// the record returns to `Normal` with a zero failure count.
    pub async fn check_allowed(&self, identity: &str, now: DateTime<Utc>) -> AttemptDecision {
        let Some(record) = self.attempts.read().await.get(identity).cloned() else {
            return AttemptDecision::Allowed;
        };

        let mut state = record.lock().await;
        if let Some(until) = state.locked_until {
            if now < until {
                return AttemptDecision::Locked { until };
            }
            info!(identity, "lockout window expired, resetting attempt state");
            state.failure_count = 0;
            state.locked_until = None;
        }
        AttemptDecision::Allowed
    }

    /// Count a failed attempt; transitions to `Locked` when the post-increment
    /// count exceeds the threshold.
    pub async fn record_failure(&self, identity: &str, now: DateTime<Utc>) -> FailureOutcome {
        let record = self.record_for(identity).await;
        let mut state = record.lock().await;

        state.failure_count += 1;
        let mut lockout_triggered = false;
        if state.failure_count > self.config.threshold && state.locked_until.is_none() {
            state.locked_until = Some(now + self.config.lockout);
            lockout_triggered = true;
            warn!(
                identity,
                failures = state.failure_count,
                "identity locked out after repeated failures"
            );
        }

        FailureOutcome {
            failure_count: state.failure_count,
            lockout_triggered,
        }
    }

    /// Reset on successful authentication: the only ordinary transition back
    /// to `Normal`.
    pub async fn record_success(&self, identity: &str) {
        if let Some(record) = self.attempts.read().await.get(identity).cloned() {
            let mut state = record.lock().await;
            state.failure_count = 0;
            state.locked_until = None;
        }
    }

    /// Operator-initiated unlock; same state transition as a success.
    pub async fn reset(&self, identity: &str) {
        info!(identity, "attempt state reset");
        self.record_success(identity).await;
    }

    /// Current failure count, for harness assertions.
    pub async fn failure_count(&self, identity: &str) -> u32 {
        match self.attempts.read().await.get(identity) {
            Some(record) => record.lock().await.failure_count,
            None => 0,
        }
    }

    async fn record_for(&self, identity: &str) -> Arc<Mutex<AttemptState>> {
        if let Some(record) = self.attempts.read().await.get(identity) {
            return record.clone();
        }
        let mut attempts = self.attempts.write().await;
        attempts.entry(identity.to_string()).or_default().clone()
    }
}
