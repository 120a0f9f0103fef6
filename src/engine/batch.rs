//! One batch pass over the session list.

use crate::backend::ScoringBackend;
use crate::engine::connectivity::ConnectivityGate;
use crate::engine::events::{EngineEvent, PassReport, PassStatus, ProgressSnapshot};
use crate::engine::table::{TableWriter, WriteOrigin};
use crate::engine::cancelled;
use crate::error::EngineError;
use crate::models::ResolvedSession;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Tuning knobs for a batch pass.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Sessions scored concurrently; 1 scores strictly one at a time.
    pub concurrency: usize,
    /// Emit a progress snapshot every this many processed sessions.
    pub progress_every: usize,
    /// Consecutive failures after which the backend is declared unavailable.
    pub failure_threshold: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            progress_every: 5,
            failure_threshold: 3,
        }
    }
}

impl BatchSettings {
    /// True when the `processed`-th session should trigger a snapshot.
    pub fn should_emit(&self, processed: usize, total: usize) -> bool {
        processed == total || processed % self.progress_every.max(1) == 0
    }
}

/// Scores a session list against the backend and fills the table.
pub struct BatchScorer {
    backend: Arc<dyn ScoringBackend>,
    table: TableWriter,
    gate: Arc<ConnectivityGate>,
    events: broadcast::Sender<EngineEvent>,
    settings: BatchSettings,
}

impl BatchScorer {
    pub fn new(
        backend: Arc<dyn ScoringBackend>,
        table: TableWriter,
        gate: Arc<ConnectivityGate>,
        events: broadcast::Sender<EngineEvent>,
        settings: BatchSettings,
    ) -> Self {
        Self {
            backend,
            table,
            gate,
            events,
            settings,
        }
    }

    /// Run the pass to completion, abandonment or cancellation.
    ///
    /// Results are consumed in list order even when several backend calls
    /// are in flight, so every session completes at most once and progress
    /// counts only grow.
    pub async fn run(
        &self,
        sessions: Arc<[ResolvedSession]>,
        generation: u64,
        mut cancel: watch::Receiver<bool>,
    ) -> PassReport {
        let started_at = Utc::now();
        let total = sessions.len();
        info!(
            "Batch pass {} started: {} sessions, concurrency {}",
            generation, total, self.settings.concurrency
        );

        let backend = Arc::clone(&self.backend);
        let mut results = stream::iter(0..total)
            .map(move |index| {
                let backend = Arc::clone(&backend);
                let resolved = sessions[index].clone();
                async move {
                    let outcome = backend.score(&resolved.session).await;
                    (resolved, outcome)
                }
            })
            .buffered(self.settings.concurrency.max(1))
            .boxed();

        let mut processed = 0;
        let mut scored = 0;
        let mut failed = Vec::new();
        let mut consecutive_failures = 0;

        let status = loop {
            let next = tokio::select! {
                biased;
                _ = cancelled(&mut cancel) => break PassStatus::Canceled,
                next = results.next() => next,
            };

            let Some((resolved, outcome)) = next else {
                break if failed.is_empty() {
                    PassStatus::Completed
                } else {
                    PassStatus::CompletedWithFailures {
                        failed: failed.clone(),
                    }
                };
            };
            processed += 1;

            let mut abandon = false;
            match outcome {
                Ok(assessment) => {
                    consecutive_failures = 0;
                    self.gate.record_success();
                    let origin = WriteOrigin::Batch { generation };
                    if !self.table.put(resolved.key.clone(), assessment, origin).await {
                        debug!("Batch pass {} superseded, stopping", generation);
                        break PassStatus::Canceled;
                    }
                    scored += 1;
                }
                Err(err) => {
                    consecutive_failures += 1;
                    warn!("Failed to score session {}: {}", resolved.key, err);
                    abandon = err.is_unreachable()
                        || consecutive_failures >= self.settings.failure_threshold.max(1);
                    failed.push(resolved.key.clone());
                    let _ = self.events.send(EngineEvent::Failure(EngineError::ScoringFailed {
                        key: resolved.key.clone(),
                        source: err,
                    }));
                }
            }

            if abandon || self.settings.should_emit(processed, total) {
                let _ = self.events.send(EngineEvent::Progress(ProgressSnapshot {
                    generation,
                    processed,
                    scored,
                    failed: failed.len(),
                    total,
                    table: Arc::new(self.table.snapshot()),
                }));
            }

            if abandon {
                warn!(
                    "Abandoning batch pass {} after {} consecutive failure(s)",
                    generation, consecutive_failures
                );
                self.gate.record_failure();
                break PassStatus::BackendUnavailable;
            }
        };

        // Drops any backend calls still in flight.
        drop(results);

        let report = PassReport {
            generation,
            status,
            scored,
            failed: failed.len(),
            total,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            "Batch pass {} {}: {}/{} scored",
            generation, report.status, scored, total
        );
        let _ = self.events.send(EngineEvent::PassFinished(report.clone()));
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::connectivity::RetryPolicy;
    use crate::engine::table::AssessmentTable;
    use crate::engine::testing::{fake_assessment, session, FakeBackend};
    use crate::models::{resolve_sessions, SessionKey};
    use std::time::Duration;

    struct Harness {
        backend: Arc<FakeBackend>,
        table: AssessmentTable,
        gate: Arc<ConnectivityGate>,
        events: broadcast::Sender<EngineEvent>,
    }

    impl Harness {
        fn new(backend: FakeBackend) -> Self {
            let backend = Arc::new(backend);
            let gate = Arc::new(ConnectivityGate::new(backend.clone(), RetryPolicy::default()));
            let (events, _) = broadcast::channel(256);
            Self {
                backend,
                table: AssessmentTable::spawn(),
                gate,
                events,
            }
        }

        fn scorer(&self, settings: BatchSettings) -> BatchScorer {
            BatchScorer::new(
                self.backend.clone(),
                self.table.writer(),
                self.gate.clone(),
                self.events.clone(),
                settings,
            )
        }
    }

    fn sessions(n: usize) -> Arc<[ResolvedSession]> {
        let raw = (1..=n).map(|i| session(&format!("S{}", i), i as i64)).collect();
        resolve_sessions(raw).into()
    }

    fn settings(concurrency: usize) -> BatchSettings {
        BatchSettings {
            concurrency,
            progress_every: 5,
            failure_threshold: 3,
        }
    }

    fn progress(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<ProgressSnapshot> {
        let mut snapshots = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::Progress(p) = event {
                snapshots.push(p);
            }
        }
        snapshots
    }

    #[test]
    fn test_emission_cadence() {
        let s = settings(1);
        let emitted: Vec<_> = (1..=12).filter(|&p| s.should_emit(p, 12)).collect();
        assert_eq!(emitted, vec![5, 10, 12]);
    }

    #[tokio::test]
    async fn test_complete_pass_writes_every_session() {
        let h = Harness::new(FakeBackend::new());
        let list = sessions(7);
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let report = h.scorer(settings(3)).run(list.clone(), 0, cancel_rx).await;

        assert_eq!(report.status, PassStatus::Completed);
        assert_eq!(report.scored, 7);
        let snapshot = h.table.snapshot();
        assert_eq!(snapshot.len(), 7);
        for resolved in list.iter() {
            let entry = snapshot.get(&resolved.key).unwrap();
            assert_eq!(entry.assessment, fake_assessment(&resolved.session, 0));
        }
        assert_eq!(h.backend.calls(), 7);
        assert!(h.gate.is_available());
    }

    #[tokio::test]
    async fn test_progress_is_monotonic_and_ends_at_total() {
        let h = Harness::new(FakeBackend::new());
        let mut rx = h.events.subscribe();
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        h.scorer(settings(4)).run(sessions(12), 0, cancel_rx).await;

        let snapshots = progress(&mut rx);
        let counts: Vec<_> = snapshots.iter().map(|p| p.processed).collect();
        assert_eq!(counts, vec![5, 10, 12]);
        let last = snapshots.last().unwrap();
        assert_eq!(last.scored, 12);
        assert_eq!(last.total, 12);
        assert_eq!(last.table.len(), 12);
        assert!(snapshots.windows(2).all(|w| w[0].scored <= w[1].scored));
    }

    #[tokio::test]
    async fn test_progress_table_is_shared_between_observers() {
        let h = Harness::new(FakeBackend::new());
        let mut first = h.events.subscribe();
        let mut second = h.events.subscribe();
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        h.scorer(settings(2)).run(sessions(5), 0, cancel_rx).await;

        let a = progress(&mut first);
        let b = progress(&mut second);
        assert_eq!(a.len(), 1);
        assert!(Arc::ptr_eq(&a[0].table, &b[0].table));
        assert_eq!(a[0].table.len(), 5);
    }

    #[tokio::test]
    async fn test_single_failure_is_isolated() {
        let h = Harness::new(FakeBackend::new().failing(&["S2"]));
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let report = h.scorer(settings(1)).run(sessions(4), 0, cancel_rx).await;

        assert_eq!(
            report.status,
            PassStatus::CompletedWithFailures {
                failed: vec![SessionKey::Id("S2".to_string())]
            }
        );
        assert_eq!(report.scored, 3);
        assert_eq!(h.table.snapshot().len(), 3);
        assert!(h.table.snapshot().get(&SessionKey::Id("S2".to_string())).is_none());
    }

    #[tokio::test]
    async fn test_repeated_failures_abandon_the_pass() {
        // Newest-first order: S6, S5, S4 fail back to back.
        let h = Harness::new(FakeBackend::new().failing(&["S6", "S5", "S4"]));
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let report = h.scorer(settings(1)).run(sessions(6), 0, cancel_rx).await;

        assert_eq!(report.status, PassStatus::BackendUnavailable);
        assert_eq!(report.failed, 3);
        assert_eq!(report.scored, 0);
        assert!(h.table.snapshot().is_empty());
        assert!(!h.gate.is_available());
        assert_eq!(h.backend.calls(), 3);
    }

    #[tokio::test]
    async fn test_unreachable_backend_abandons_immediately() {
        let backend = FakeBackend::new();
        backend.set_reachable(false);
        let h = Harness::new(backend);
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let report = h.scorer(settings(1)).run(sessions(5), 0, cancel_rx).await;

        assert_eq!(report.status, PassStatus::BackendUnavailable);
        assert_eq!(report.failed, 1);
        assert!(!h.gate.is_available());
    }

    #[tokio::test]
    async fn test_cancellation_keeps_written_results() {
        let h = Harness::new(FakeBackend::new().held());
        let mut rx = h.events.subscribe();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let scorer = h.scorer(settings(1));
        let list = sessions(6);

        let pass = tokio::spawn({
            let list = list.clone();
            async move { scorer.run(list, 0, cancel_rx).await }
        });

        h.backend.release(2);
        let mut table = h.table.subscribe();
        tokio::time::timeout(Duration::from_secs(5), table.wait_for(|t| t.len() == 2))
            .await
            .unwrap()
            .unwrap();

        cancel_tx.send(true).unwrap();
        let report = pass.await.unwrap();

        assert_eq!(report.status, PassStatus::Canceled);
        assert_eq!(report.scored, 2);
        assert_eq!(h.table.snapshot().len(), 2);
        // No snapshot reached the cadence before the cancel.
        assert!(progress(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_superseded_pass_stops_writing() {
        let h = Harness::new(FakeBackend::new());
        h.table.writer().begin_pass(5).await;
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let report = h.scorer(settings(1)).run(sessions(3), 4, cancel_rx).await;

        assert_eq!(report.status, PassStatus::Canceled);
        assert!(h.table.snapshot().is_empty());
    }
}
