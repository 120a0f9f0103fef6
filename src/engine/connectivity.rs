//! Backend reachability tracking.

use crate::backend::ScoringBackend;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Who produced the last reachability observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Observation {
    /// An explicit `test()` check.
    Check,
    /// A batch pass saw the backend succeed or fail.
    Batch,
}

/// Last known reachability of the scoring backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectivityState {
    pub available: bool,
    pub last_checked: Option<DateTime<Utc>>,
    pub observed_by: Option<Observation>,
}

impl Default for ConnectivityState {
    fn default() -> Self {
        Self {
            available: false,
            last_checked: None,
            observed_by: None,
        }
    }
}

/// Check timeout and retry behavior for `test_with_retry`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Extra checks after the first failure.
    pub retries: usize,
    /// Pause between checks.
    pub backoff: Duration,
    /// Upper bound on a single check.
    pub check_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            backoff: Duration::from_millis(500),
            check_timeout: Duration::from_secs(5),
        }
    }
}

/// Tracks whether the scoring backend is reachable.
pub struct ConnectivityGate {
    backend: Arc<dyn ScoringBackend>,
    policy: RetryPolicy,
    state: watch::Sender<ConnectivityState>,
}

impl ConnectivityGate {
    pub fn new(backend: Arc<dyn ScoringBackend>, policy: RetryPolicy) -> Self {
        let (state, _) = watch::channel(ConnectivityState::default());
        Self {
            backend,
            policy,
            state,
        }
    }

    /// Check the backend once and record the outcome.
    pub async fn test(&self) -> bool {
        let reachable =
            match tokio::time::timeout(self.policy.check_timeout, self.backend.test_connection())
                .await
            {
                Ok(reachable) => reachable,
                Err(_) => {
                    warn!(
                        "Connectivity check timed out after {:?}",
                        self.policy.check_timeout
                    );
                    false
                }
            };

        debug!("Connectivity check: reachable={}", reachable);
        self.record(reachable, Observation::Check);
        reachable
    }

    /// Check with the configured retries; true as soon as one check succeeds.
    pub async fn test_with_retry(&self) -> bool {
        for attempt in 0..=self.policy.retries {
            if self.test().await {
                return true;
            }
            if attempt < self.policy.retries {
                info!(
                    "Scoring backend unreachable, retrying ({}/{})",
                    attempt + 1,
                    self.policy.retries
                );
                tokio::time::sleep(self.policy.backoff).await;
            }
        }
        false
    }

    /// Last known reachability, without probing.
    pub fn is_available(&self) -> bool {
        self.state.borrow().available
    }

    pub fn state(&self) -> ConnectivityState {
        self.state.borrow().clone()
    }

    /// A batch pass gave up on the backend.
    pub fn record_failure(&self) {
        self.record(false, Observation::Batch);
    }

    /// A batch pass got a score back.
    pub fn record_success(&self) {
        if !self.is_available() {
            self.record(true, Observation::Batch);
        }
    }

    fn record(&self, available: bool, observed_by: Observation) {
        let previous = self.state.send_replace(ConnectivityState {
            available,
            last_checked: Some(Utc::now()),
            observed_by: Some(observed_by),
        });
        if previous.available != available {
            info!(
                "Scoring backend is now {}",
                if available { "reachable" } else { "unreachable" }
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::FakeBackend;

    fn quick_policy(retries: usize) -> RetryPolicy {
        RetryPolicy {
            retries,
            backoff: Duration::from_millis(1),
            check_timeout: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_check_updates_state() {
        let backend = Arc::new(FakeBackend::new());
        let gate = ConnectivityGate::new(backend.clone(), quick_policy(0));

        assert!(!gate.is_available());
        assert!(gate.state().last_checked.is_none());

        assert!(gate.test().await);
        let state = gate.state();
        assert!(state.available);
        assert!(state.last_checked.is_some());
        assert_eq!(state.observed_by, Some(Observation::Check));

        backend.set_reachable(false);
        assert!(!gate.test().await);
        assert!(!gate.is_available());
    }

    #[tokio::test]
    async fn test_retry_checks_until_exhausted() {
        let backend = Arc::new(FakeBackend::new());
        backend.set_reachable(false);
        let gate = ConnectivityGate::new(backend.clone(), quick_policy(2));

        assert!(!gate.test_with_retry().await);
        assert_eq!(backend.checks(), 3);
    }

    #[tokio::test]
    async fn test_retry_recovers_after_failed_check() {
        let backend = Arc::new(FakeBackend::new().failing_checks(1));
        let gate = ConnectivityGate::new(backend.clone(), quick_policy(2));

        assert!(gate.test_with_retry().await);
        assert_eq!(backend.checks(), 2);
        assert!(gate.is_available());
    }

    #[tokio::test]
    async fn test_slow_check_counts_as_unreachable() {
        let backend = Arc::new(FakeBackend::new().with_check_delay(Duration::from_secs(5)));
        let gate = ConnectivityGate::new(backend, quick_policy(0));

        assert!(!gate.test().await);
    }

    #[tokio::test]
    async fn test_batch_observations() {
        let backend = Arc::new(FakeBackend::new());
        let gate = ConnectivityGate::new(backend, quick_policy(0));

        gate.record_success();
        assert!(gate.is_available());
        assert_eq!(gate.state().observed_by, Some(Observation::Batch));

        gate.record_failure();
        assert!(!gate.is_available());
    }
}
