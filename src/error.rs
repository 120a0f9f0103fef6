//! Error types for the engine and its collaborators.

use crate::models::SessionKey;
use thiserror::Error;

/// Failure to load sessions from the session store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store could not be read.
    #[error("failed to read sessions from {source_name}: {reason}")]
    Read { source_name: String, reason: String },

    /// The store was read but its contents are not valid sessions.
    #[error("malformed session data in {source_name}: {reason}")]
    Decode { source_name: String, reason: String },
}

/// Failure to score a single session.
#[derive(Debug, Clone, Error)]
pub enum ScoringError {
    /// The backend could not be reached (connect error, timeout).
    #[error("scoring backend unreachable: {0}")]
    Unreachable(String),

    /// The backend answered but refused or garbled the request.
    #[error("scoring backend rejected the session: {reason}")]
    Rejected { reason: String },
}

impl ScoringError {
    /// True when the failure says something about backend reachability.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, ScoringError::Unreachable(_))
    }
}

/// Failure of the live risk feed.
#[derive(Debug, Clone, Error)]
pub enum FeedError {
    /// The subscription could not be established.
    #[error("failed to subscribe to live feed: {0}")]
    Subscribe(String),

    /// The feed broke while streaming.
    #[error("live feed interrupted: {0}")]
    Stream(String),

    /// An event could not be decoded.
    #[error("undecodable live feed event at line {line}: {reason}")]
    Decode { line: usize, reason: String },
}

/// What failed while starting the engine.
#[derive(Debug, Clone, Error)]
pub enum InitError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Feed(#[from] FeedError),
}

/// Errors surfaced by the aggregation engine.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Session loading or live subscription failed; the engine stays unloaded.
    #[error("initialization failed: {0}")]
    Initialization(#[from] InitError),

    /// The backend is unreachable; no scoring was performed.
    #[error("scoring backend unavailable")]
    BackendUnavailable,

    /// A single session could not be scored.
    #[error("scoring failed for session {key}: {source}")]
    ScoringFailed {
        key: SessionKey,
        #[source]
        source: ScoringError,
    },

    /// The live subscription ended with an error.
    #[error("live overlay stopped: {0}")]
    LiveFeed(#[source] FeedError),

    /// `refresh` was called before a successful `start`.
    #[error("no sessions loaded; start the engine first")]
    NotLoaded,

    /// The engine has been shut down.
    #[error("engine has been shut down")]
    ShutDown,
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        EngineError::Initialization(InitError::Store(err))
    }
}

impl From<FeedError> for EngineError {
    fn from(err: FeedError) -> Self {
        EngineError::Initialization(InitError::Feed(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_becomes_initialization_error() {
        let err: EngineError = StoreError::Read {
            source_name: "sessions.json".to_string(),
            reason: "permission denied".to_string(),
        }
        .into();

        assert!(matches!(
            err,
            EngineError::Initialization(InitError::Store(_))
        ));
        assert!(err.to_string().contains("sessions.json"));
    }

    #[test]
    fn test_scoring_failed_names_the_session() {
        let err = EngineError::ScoringFailed {
            key: SessionKey::Id("S7".to_string()),
            source: ScoringError::Rejected {
                reason: "bad payload".to_string(),
            },
        };
        assert_eq!(
            err.to_string(),
            "scoring failed for session S7: scoring backend rejected the session: bad payload"
        );
    }

    #[test]
    fn test_unreachable_classification() {
        assert!(ScoringError::Unreachable("timeout".to_string()).is_unreachable());
        assert!(!ScoringError::Rejected {
            reason: "422".to_string()
        }
        .is_unreachable());
    }
}
