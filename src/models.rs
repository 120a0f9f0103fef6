//! Data models for the risk aggregation engine.
//!
//! This module contains the core data structures shared by the engine,
//! the adapters and the report generator: sessions, their resolved
//! identities, and the risk assessments produced for them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Overall risk category of an assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskCategory {
    /// Behavior consistent with the user's baseline
    Low,
    /// Some deviation worth watching
    Medium,
    /// Strong anomaly, likely not the enrolled user
    High,
}

/// Upper bound (exclusive) of the low band for `RiskCategory::from_score`.
pub const LOW_RISK_CEILING: f64 = 0.4;

/// Upper bound (exclusive) of the medium band for `RiskCategory::from_score`.
pub const MEDIUM_RISK_CEILING: f64 = 0.7;

impl fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskCategory::Low => write!(f, "Low"),
            RiskCategory::Medium => write!(f, "Medium"),
            RiskCategory::High => write!(f, "High"),
        }
    }
}

impl RiskCategory {
    /// Default category boundaries for a normalized score.
    ///
    /// Backends own the boundaries; adapters only fall back to this when a
    /// payload arrives without a category.
    pub fn from_score(score: f64) -> Self {
        if score < LOW_RISK_CEILING {
            RiskCategory::Low
        } else if score < MEDIUM_RISK_CEILING {
            RiskCategory::Medium
        } else {
            RiskCategory::High
        }
    }

    /// Returns an emoji representation of the category.
    pub fn emoji(&self) -> &'static str {
        match self {
            RiskCategory::Low => "🟢",
            RiskCategory::Medium => "🟡",
            RiskCategory::High => "🔴",
        }
    }
}

/// Raw behavioral feature data captured for a session.
///
/// The engine never looks inside these payloads; they are forwarded to the
/// scoring backend as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BehavioralFeatures {
    #[serde(default)]
    pub touch: Value,
    #[serde(default)]
    pub motion: Value,
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub location: Value,
    #[serde(default)]
    pub timing: Value,
}

/// One recorded unit of user behavioral data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Identifier assigned by the session store, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// When the session was recorded.
    pub created_at: DateTime<Utc>,
    /// Opaque behavioral payloads.
    #[serde(default)]
    pub features: BehavioralFeatures,
}

impl Session {
    /// Creates a session with empty feature payloads.
    #[allow(dead_code)] // Sessions normally arrive deserialized from a store
    pub fn new(id: Option<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at,
            features: BehavioralFeatures::default(),
        }
    }
}

/// Stable key of a session inside the assessment table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SessionKey {
    /// Explicit identifier from the session store.
    Id(String),
    /// Ordinal position in the order the store delivered the sessions.
    Position(usize),
}

impl SessionKey {
    /// Resolves the key of the session found at `index` in store order.
    pub fn resolve(session: &Session, index: usize) -> Self {
        match session.id.as_deref() {
            Some(id) if !id.trim().is_empty() => SessionKey::Id(id.to_string()),
            _ => SessionKey::Position(index),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKey::Id(id) => write!(f, "{}", id),
            SessionKey::Position(index) => write!(f, "#{}", index),
        }
    }
}

/// A session paired with the key it was resolved to at load time.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSession {
    pub key: SessionKey,
    pub session: Session,
}

/// Resolve keys in store order, then order the list newest-first.
///
/// The sort is stable, so sessions sharing a timestamp keep store order.
pub fn resolve_sessions(sessions: Vec<Session>) -> Vec<ResolvedSession> {
    let mut resolved: Vec<ResolvedSession> = sessions
        .into_iter()
        .enumerate()
        .map(|(index, session)| ResolvedSession {
            key: SessionKey::resolve(&session, index),
            session,
        })
        .collect();

    resolved.sort_by(|a, b| b.session.created_at.cmp(&a.session.created_at));
    resolved
}

/// Per-channel anomaly scores, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    pub touch: f64,
    pub motion: f64,
    pub context: f64,
    pub location: f64,
    pub time: f64,
}

impl SubScores {
    /// Every channel set to the same value.
    #[allow(dead_code)] // Convenience for flat scores in tests and fakes
    pub fn uniform(value: f64) -> Self {
        Self {
            touch: value,
            motion: value,
            context: value,
            location: value,
            time: value,
        }
        .clamped()
    }

    /// Returns a copy with every channel clamped into [0, 1].
    pub fn clamped(self) -> Self {
        Self {
            touch: clamp_unit(self.touch),
            motion: clamp_unit(self.motion),
            context: clamp_unit(self.context),
            location: clamp_unit(self.location),
            time: clamp_unit(self.time),
        }
    }

    /// Channel values paired with their display labels.
    pub fn labeled(&self) -> [(&'static str, f64); 5] {
        [
            ("touch", self.touch),
            ("motion", self.motion),
            ("context", self.context),
            ("location", self.location),
            ("time", self.time),
        ]
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// The scoring backend's verdict for exactly one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Authoritative category for display and filtering.
    pub category: RiskCategory,
    /// Normalized overall score in [0, 1].
    pub score: f64,
    /// Human-readable explanation.
    pub description: String,
    /// Independent per-channel scores.
    pub sub_scores: SubScores,
}

impl RiskAssessment {
    /// Builds an assessment whose category follows the default boundaries.
    pub fn new(score: f64, description: impl Into<String>, sub_scores: SubScores) -> Self {
        let score = clamp_unit(score);
        Self {
            category: RiskCategory::from_score(score),
            score,
            description: description.into(),
            sub_scores: sub_scores.clamped(),
        }
    }
}

/// Wire shape of an assessment as sent by the HTTP backend and the live feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentPayload {
    pub score: f64,
    #[serde(default)]
    pub category: Option<RiskCategory>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sub_scores: SubScores,
}

impl AssessmentPayload {
    /// Converts to an assessment, trusting the payload's category when present.
    pub fn into_assessment(self) -> RiskAssessment {
        let mut assessment = RiskAssessment::new(self.score, self.description, self.sub_scores);
        if let Some(category) = self.category {
            assessment.category = category;
        }
        assessment
    }
}

/// One row of the rendered report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRow {
    pub key: SessionKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub assessment: RiskAssessment,
    /// True when the value came from the live feed rather than a batch pass.
    pub live: bool,
}

/// Summary statistics over the assessed sessions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskSummary {
    pub total: usize,
    pub low: usize,
    pub medium: usize,
    pub high: usize,
    pub mean_score: f64,
    pub mean_sub_scores: SubScores,
    pub live_overlays: usize,
}

impl RiskSummary {
    /// Creates a summary from report rows.
    pub fn from_rows(rows: &[SessionRow]) -> Self {
        let mut summary = Self::default();
        summary.total = rows.len();

        for row in rows {
            match row.assessment.category {
                RiskCategory::High => summary.high += 1,
                RiskCategory::Medium => summary.medium += 1,
                RiskCategory::Low => summary.low += 1,
            }
            if row.live {
                summary.live_overlays += 1;
            }
        }

        if !rows.is_empty() {
            let n = rows.len() as f64;
            summary.mean_score = rows.iter().map(|r| r.assessment.score).sum::<f64>() / n;
            summary.mean_sub_scores = crate::analysis::mean_sub_scores(rows);
        }

        summary
    }
}

/// Metadata about the risk report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Scoring backend the passes ran against.
    pub backend_url: String,
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
    /// Sessions delivered by the store.
    pub sessions_total: usize,
    /// Sessions with an assessment in the final table.
    pub sessions_assessed: usize,
    /// Terminal status of the last batch pass.
    pub pass_status: String,
    /// Number of batch passes run.
    pub passes: usize,
    /// Wall-clock duration in seconds.
    pub duration_seconds: f64,
}

/// The complete risk report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub summary: RiskSummary,
    /// Assessed sessions, riskiest first.
    pub sessions: Vec<SessionRow>,
    /// Sessions the last pass could not score.
    pub unscored: Vec<SessionKey>,
}
