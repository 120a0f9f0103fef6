//! Observer-facing notifications.

use crate::engine::table::TableState;
use crate::error::EngineError;
use crate::models::SessionKey;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Partial-progress view published during a batch pass.
#[derive(Debug, Clone)]
pub struct ProgressSnapshot {
    pub generation: u64,
    /// Sessions attempted so far (scored or failed).
    pub processed: usize,
    pub scored: usize,
    pub failed: usize,
    pub total: usize,
    /// Copy of the table at emission time, shared by every observer.
    pub table: Arc<TableState>,
}

/// Terminal status of a batch pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassStatus {
    Completed,
    CompletedWithFailures { failed: Vec<SessionKey> },
    Canceled,
    BackendUnavailable,
}

impl fmt::Display for PassStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PassStatus::Completed => write!(f, "completed"),
            PassStatus::CompletedWithFailures { failed } => {
                write!(f, "completed with {} failure(s)", failed.len())
            }
            PassStatus::Canceled => write!(f, "canceled"),
            PassStatus::BackendUnavailable => write!(f, "backend unavailable"),
        }
    }
}

/// Outcome of one batch pass.
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub generation: u64,
    pub status: PassStatus,
    pub scored: usize,
    pub failed: usize,
    pub total: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Everything the engine tells its observers.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// `start` loaded the session list.
    Loaded { sessions: usize, generation: u64 },
    Progress(ProgressSnapshot),
    PassFinished(PassReport),
    /// A live assessment was written for this session.
    Overlay { key: SessionKey },
    /// The live subscription is over.
    FeedEnded,
    /// A non-fatal or initialization failure worth a notification.
    Failure(EngineError),
}
