//! In-memory collaborators for engine tests.

use crate::backend::ScoringBackend;
use crate::error::{FeedError, ScoringError, StoreError};
use crate::models::{RiskAssessment, Session, SubScores};
use crate::sources::{AssessmentStream, LiveRiskFeed, SessionStore};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

/// Session `id` recorded `secs` seconds after the epoch.
pub fn session(id: &str, secs: i64) -> Session {
    Session::new(Some(id.to_string()), Utc.timestamp_opt(secs, 0).unwrap())
}

/// What `FakeBackend` returns for `session` at scoring `version`.
pub fn fake_assessment(session: &Session, version: u64) -> RiskAssessment {
    let score = (session.created_at.timestamp().rem_euclid(10)) as f64 / 10.0;
    let name = session.id.as_deref().unwrap_or("anonymous");
    RiskAssessment::new(
        score,
        format!("v{} {}", version, name),
        SubScores::uniform(score),
    )
}

/// Deterministic backend with switchable reachability and failures.
pub struct FakeBackend {
    reachable: AtomicBool,
    failing: HashSet<String>,
    version: AtomicU64,
    calls: AtomicUsize,
    checks: AtomicUsize,
    failed_checks: AtomicUsize,
    hold: Option<Arc<Semaphore>>,
    check_delay: Duration,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            reachable: AtomicBool::new(true),
            failing: HashSet::new(),
            version: AtomicU64::new(0),
            calls: AtomicUsize::new(0),
            checks: AtomicUsize::new(0),
            failed_checks: AtomicUsize::new(0),
            hold: None,
            check_delay: Duration::ZERO,
        }
    }

    /// Reject sessions with these ids.
    pub fn failing(mut self, ids: &[&str]) -> Self {
        self.failing = ids.iter().map(|id| id.to_string()).collect();
        self
    }

    /// Block every `score` call until `release` hands out a permit.
    pub fn held(mut self) -> Self {
        self.hold = Some(Arc::new(Semaphore::new(0)));
        self
    }

    /// The next `count` checks report unreachable.
    pub fn failing_checks(self, count: usize) -> Self {
        self.failed_checks.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_check_delay(mut self, delay: Duration) -> Self {
        self.check_delay = delay;
        self
    }

    pub fn release(&self, calls: usize) {
        if let Some(hold) = &self.hold {
            hold.add_permits(calls);
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Changes the description of subsequent assessments.
    pub fn set_version(&self, version: u64) {
        self.version.store(version, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScoringBackend for FakeBackend {
    async fn score(&self, session: &Session) -> Result<RiskAssessment, ScoringError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(hold) = &self.hold {
            match hold.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(ScoringError::Unreachable("hold closed".to_string())),
            }
        }

        if !self.reachable.load(Ordering::SeqCst) {
            return Err(ScoringError::Unreachable("connection refused".to_string()));
        }
        if let Some(id) = &session.id {
            if self.failing.contains(id) {
                return Err(ScoringError::Rejected {
                    reason: format!("cannot score {}", id),
                });
            }
        }

        Ok(fake_assessment(session, self.version.load(Ordering::SeqCst)))
    }

    async fn test_connection(&self) -> bool {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if !self.check_delay.is_zero() {
            tokio::time::sleep(self.check_delay).await;
        }
        let failed = self
            .failed_checks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        !failed && self.reachable.load(Ordering::SeqCst)
    }
}

/// Session store serving a fixed list, or failing.
pub struct FakeStore {
    sessions: Mutex<Result<Vec<Session>, StoreError>>,
}

impl FakeStore {
    pub fn new(sessions: Vec<Session>) -> Self {
        Self {
            sessions: Mutex::new(Ok(sessions)),
        }
    }

    pub fn broken() -> Self {
        Self {
            sessions: Mutex::new(Err(StoreError::Read {
                source_name: "fake".to_string(),
                reason: "disk on fire".to_string(),
            })),
        }
    }
}

#[async_trait]
impl SessionStore for FakeStore {
    async fn load_all(&self) -> Result<Vec<Session>, StoreError> {
        self.sessions.lock().unwrap().clone()
    }
}

type FeedItem = Result<RiskAssessment, FeedError>;

/// Live feed driven by the test through `push` and `end`.
pub struct FakeFeed {
    sender: Mutex<Option<mpsc::UnboundedSender<FeedItem>>>,
    refuse: AtomicBool,
    subscriptions: AtomicUsize,
}

impl FakeFeed {
    pub fn new() -> Self {
        Self {
            sender: Mutex::new(None),
            refuse: AtomicBool::new(false),
            subscriptions: AtomicUsize::new(0),
        }
    }

    /// Make `subscribe` fail.
    pub fn refusing() -> Self {
        let feed = Self::new();
        feed.refuse.store(true, Ordering::SeqCst);
        feed
    }

    /// Push an item to the current subscription, if any.
    pub fn push(&self, item: FeedItem) {
        if let Some(sender) = self.sender.lock().unwrap().as_ref() {
            let _ = sender.send(item);
        }
    }

    /// End the current subscription's stream.
    pub fn end(&self) {
        self.sender.lock().unwrap().take();
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LiveRiskFeed for FakeFeed {
    async fn subscribe(&self) -> Result<AssessmentStream, FeedError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(FeedError::Subscribe("feed offline".to_string()));
        }
        self.subscriptions.fetch_add(1, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock().unwrap() = Some(tx);

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }
}
