//! Inbound data sources: the session store and the live risk feed.

pub mod feed;
pub mod store;

pub use feed::{JsonLinesFeed, NoLiveFeed};
pub use store::JsonFileStore;

use crate::error::{FeedError, StoreError};
use crate::models::{RiskAssessment, Session};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Stream of assessments pushed by a live feed.
pub type AssessmentStream = BoxStream<'static, Result<RiskAssessment, FeedError>>;

/// Read-only supplier of historical sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load every session in store order.
    async fn load_all(&self) -> Result<Vec<Session>, StoreError>;
}

/// Push source of assessments for the most recent session.
///
/// Dropping the returned stream closes the subscription.
#[async_trait]
pub trait LiveRiskFeed: Send + Sync {
    async fn subscribe(&self) -> Result<AssessmentStream, FeedError>;
}
