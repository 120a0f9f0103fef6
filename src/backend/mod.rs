//! Scoring backend contract and its HTTP implementation.
//!
//! The engine only ever talks to a backend through [`ScoringBackend`];
//! the numeric model behind it is out of scope.

pub mod http;

pub use http::HttpScoringBackend;

use crate::error::ScoringError;
use crate::models::{RiskAssessment, Session};
use async_trait::async_trait;

/// Turns one session's raw data into a risk assessment.
///
/// Implementations must tolerate concurrent `score` calls for different
/// sessions.
#[async_trait]
pub trait ScoringBackend: Send + Sync {
    /// Score a single session.
    async fn score(&self, session: &Session) -> Result<RiskAssessment, ScoringError>;

    /// Cheap reachability check with no side effects.
    async fn test_connection(&self) -> bool;
}
