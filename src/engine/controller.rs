//! Lifecycle orchestration for the aggregation engine.
//!
//! Policy for overlapping requests is cancel-and-restart: a `start` or
//! `refresh` that arrives while a pass is in flight cancels that pass,
//! waits for its task to finish, then launches the new pass under a higher
//! generation. Results the old pass already wrote stay in the table.

use crate::backend::ScoringBackend;
use crate::config::Config;
use crate::engine::batch::{BatchScorer, BatchSettings};
use crate::engine::connectivity::{ConnectivityGate, ConnectivityState, RetryPolicy};
use crate::engine::events::{EngineEvent, PassReport};
use crate::engine::overlay::LiveOverlayMerger;
use crate::engine::table::{AssessmentTable, TableState};
use crate::error::EngineError;
use crate::models::{resolve_sessions, ResolvedSession, SessionKey};
use crate::sources::{AssessmentStream, LiveRiskFeed, SessionStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Engine-wide settings.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub batch: BatchSettings,
    pub retry: RetryPolicy,
    /// Buffered events per observer before slow observers start lagging.
    pub event_capacity: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            batch: BatchSettings::default(),
            retry: RetryPolicy::default(),
            event_capacity: 256,
        }
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            batch: BatchSettings {
                concurrency: config.scoring.concurrency,
                progress_every: config.scoring.progress_every,
                failure_threshold: config.scoring.failure_threshold,
            },
            retry: RetryPolicy {
                retries: config.backend.retries,
                backoff: Duration::from_millis(config.backend.retry_backoff_ms),
                check_timeout: Duration::from_secs(config.backend.check_timeout_seconds),
            },
            event_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Unloaded,
    Loaded,
    ShutDown,
}

struct PassHandle {
    generation: u64,
    cancel: watch::Sender<bool>,
    task: JoinHandle<PassReport>,
}

struct OverlayHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<usize>,
}

struct ControllerState {
    lifecycle: Lifecycle,
    sessions: Arc<[ResolvedSession]>,
    last_generation: u64,
    pass: Option<PassHandle>,
    overlay: Option<OverlayHandle>,
}

impl ControllerState {
    fn next_generation(&mut self) -> u64 {
        self.last_generation += 1;
        self.last_generation
    }

    fn ensure_loaded(&self) -> Result<(), EngineError> {
        match self.lifecycle {
            Lifecycle::ShutDown => Err(EngineError::ShutDown),
            Lifecycle::Unloaded => Err(EngineError::NotLoaded),
            Lifecycle::Loaded => Ok(()),
        }
    }
}

/// Top-level orchestrator: the only component that starts or stops passes.
pub struct AggregationController {
    store: Arc<dyn SessionStore>,
    backend: Arc<dyn ScoringBackend>,
    feed: Arc<dyn LiveRiskFeed>,
    settings: EngineSettings,
    table: AssessmentTable,
    gate: Arc<ConnectivityGate>,
    events: broadcast::Sender<EngineEvent>,
    latest: watch::Sender<Option<SessionKey>>,
    reports: Arc<watch::Sender<Option<PassReport>>>,
    state: Mutex<ControllerState>,
}

impl AggregationController {
    /// Build an unloaded engine. Must be called inside a tokio runtime.
    pub fn new(
        store: Arc<dyn SessionStore>,
        backend: Arc<dyn ScoringBackend>,
        feed: Arc<dyn LiveRiskFeed>,
        settings: EngineSettings,
    ) -> Self {
        let gate = Arc::new(ConnectivityGate::new(
            Arc::clone(&backend),
            settings.retry.clone(),
        ));
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        let (latest, _) = watch::channel(None);
        let (reports, _) = watch::channel(None);

        Self {
            store,
            backend,
            feed,
            settings,
            table: AssessmentTable::spawn(),
            gate,
            events,
            latest,
            reports: Arc::new(reports),
            state: Mutex::new(ControllerState {
                lifecycle: Lifecycle::Unloaded,
                sessions: Arc::from(Vec::new()),
                last_generation: 0,
                pass: None,
                overlay: None,
            }),
        }
    }

    /// Load sessions, subscribe to the live feed, clear the table and launch
    /// a batch pass. Returns the pass generation.
    pub async fn start(&self) -> Result<u64, EngineError> {
        let mut state = self.state.lock().await;
        if state.lifecycle == Lifecycle::ShutDown {
            return Err(EngineError::ShutDown);
        }

        info!("Starting aggregation engine");
        self.cancel_pass(&mut state).await;
        self.stop_overlay(&mut state).await;

        let reachable = self.gate.test().await;
        debug!("Initial connectivity check: reachable={}", reachable);

        let stream = match self.feed.subscribe().await {
            Ok(stream) => stream,
            Err(e) => return Err(self.fail_start(&mut state, e.into())),
        };
        let loaded = match self.store.load_all().await {
            Ok(sessions) => sessions,
            Err(e) => return Err(self.fail_start(&mut state, e.into())),
        };

        let sessions: Arc<[ResolvedSession]> = resolve_sessions(loaded).into();
        let generation = state.next_generation();
        self.table.writer().reset(generation).await;
        self.latest
            .send_replace(sessions.first().map(|resolved| resolved.key.clone()));

        info!("Loaded {} sessions", sessions.len());
        state.sessions = Arc::clone(&sessions);
        state.lifecycle = Lifecycle::Loaded;
        state.overlay = Some(self.spawn_overlay(stream));

        let _ = self.events.send(EngineEvent::Loaded {
            sessions: sessions.len(),
            generation,
        });
        state.pass = Some(self.spawn_pass(sessions, generation));
        Ok(generation)
    }

    /// Re-check connectivity and re-score every loaded session.
    /// Returns the new pass generation.
    pub async fn refresh(&self) -> Result<u64, EngineError> {
        self.state.lock().await.ensure_loaded()?;

        // Checked without the lock so shutdown is never stuck behind retries.
        if !self.gate.test_with_retry().await {
            warn!("Refresh skipped: scoring backend unavailable");
            let _ = self
                .events
                .send(EngineEvent::Failure(EngineError::BackendUnavailable));
            return Err(EngineError::BackendUnavailable);
        }

        let mut state = self.state.lock().await;
        state.ensure_loaded()?;
        self.cancel_pass(&mut state).await;
        let generation = state.next_generation();
        self.table.writer().begin_pass(generation).await;

        info!("Refreshing {} sessions", state.sessions.len());
        state.pass = Some(self.spawn_pass(Arc::clone(&state.sessions), generation));
        Ok(generation)
    }

    /// Cancel the pass and the live subscription, join every task and stop
    /// the table writer. Idempotent.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if state.lifecycle == Lifecycle::ShutDown {
            return;
        }

        info!("Shutting down aggregation engine");
        self.cancel_pass(&mut state).await;
        self.stop_overlay(&mut state).await;
        self.table.close().await;
        state.lifecycle = Lifecycle::ShutDown;
    }

    /// Wait for the terminal report of `generation` or any later pass.
    ///
    /// Returns `None` right away for a generation no `start` or `refresh`
    /// has handed out.
    pub async fn wait_for_pass(&self, generation: u64) -> Option<PassReport> {
        let mut reports = self.reports.subscribe();
        if generation > self.state.lock().await.last_generation {
            debug!("No pass with generation {}", generation);
            return None;
        }
        let report = reports
            .wait_for(|report| matches!(report, Some(r) if r.generation >= generation))
            .await
            .ok()?;
        report.clone()
    }

    /// Current table contents.
    pub fn snapshot(&self) -> TableState {
        self.table.snapshot()
    }

    /// Table change notifications.
    #[allow(dead_code)] // Observer API; the CLI reads the final snapshot
    pub fn subscribe_table(&self) -> watch::Receiver<TableState> {
        self.table.subscribe()
    }

    /// Progress, overlay and status notifications.
    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Last known backend reachability, without probing.
    pub fn is_available(&self) -> bool {
        self.gate.is_available()
    }

    pub fn connectivity(&self) -> ConnectivityState {
        self.gate.state()
    }

    /// Sessions of the current load, newest first.
    pub async fn sessions(&self) -> Arc<[ResolvedSession]> {
        Arc::clone(&self.state.lock().await.sessions)
    }

    /// Report of the most recently finished pass.
    #[allow(dead_code)] // Observer API; the CLI waits on specific generations
    pub fn last_report(&self) -> Option<PassReport> {
        self.reports.borrow().clone()
    }

    fn fail_start(&self, state: &mut ControllerState, err: EngineError) -> EngineError {
        error!("Engine start failed: {}", err);
        state.lifecycle = Lifecycle::Unloaded;
        state.sessions = Arc::from(Vec::new());
        self.latest.send_replace(None);
        let _ = self.events.send(EngineEvent::Failure(err.clone()));
        err
    }

    fn spawn_pass(&self, sessions: Arc<[ResolvedSession]>, generation: u64) -> PassHandle {
        let (cancel, cancel_rx) = watch::channel(false);
        let scorer = BatchScorer::new(
            Arc::clone(&self.backend),
            self.table.writer(),
            Arc::clone(&self.gate),
            self.events.clone(),
            self.settings.batch.clone(),
        );
        let reports = Arc::clone(&self.reports);

        let task = tokio::spawn(async move {
            let report = scorer.run(sessions, generation, cancel_rx).await;
            reports.send_replace(Some(report.clone()));
            report
        });

        PassHandle {
            generation,
            cancel,
            task,
        }
    }

    fn spawn_overlay(&self, stream: AssessmentStream) -> OverlayHandle {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let merger = LiveOverlayMerger::new(
            self.table.writer(),
            self.latest.subscribe(),
            self.events.clone(),
        );

        OverlayHandle {
            shutdown,
            task: tokio::spawn(merger.run(stream, shutdown_rx)),
        }
    }

    async fn cancel_pass(&self, state: &mut ControllerState) {
        let Some(pass) = state.pass.take() else {
            return;
        };

        if !pass.task.is_finished() {
            info!("Canceling in-flight batch pass {}", pass.generation);
        }
        let _ = pass.cancel.send(true);
        if let Err(e) = pass.task.await {
            warn!("Batch pass {} task failed: {}", pass.generation, e);
        }
    }

    async fn stop_overlay(&self, state: &mut ControllerState) {
        let Some(overlay) = state.overlay.take() else {
            return;
        };

        let _ = overlay.shutdown.send(true);
        match overlay.task.await {
            Ok(applied) => debug!("Live overlay stopped after {} write(s)", applied),
            Err(e) => warn!("Live overlay task failed: {}", e),
        }
    }
}
