//! HTTP client for a remote scoring service.
//!
//! Protocol:
//! - `POST {url}/score` with the session as JSON, answered by an
//!   assessment payload.
//! - `GET {url}/health`, any 2xx means reachable.

use crate::backend::ScoringBackend;
use crate::error::ScoringError;
use crate::models::{AssessmentPayload, RiskAssessment, Session};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

/// Scoring backend reached over HTTP.
pub struct HttpScoringBackend {
    base_url: String,
    timeout_seconds: u64,
    http_client: reqwest::Client,
}

impl HttpScoringBackend {
    /// Create a client for the service at `base_url`.
    pub fn new(base_url: &str, timeout_seconds: u64) -> Result<Self> {
        info!("Using scoring backend at {}", base_url);

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_seconds,
            http_client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn map_send_error(&self, e: reqwest::Error) -> ScoringError {
        if e.is_timeout() {
            ScoringError::Unreachable(format!(
                "request timed out after {}s",
                self.timeout_seconds
            ))
        } else if e.is_connect() {
            ScoringError::Unreachable(format!("cannot connect to {}", self.base_url))
        } else {
            ScoringError::Rejected {
                reason: format!("failed to send request: {}", e),
            }
        }
    }
}

#[async_trait]
impl ScoringBackend for HttpScoringBackend {
    async fn score(&self, session: &Session) -> Result<RiskAssessment, ScoringError> {
        let url = format!("{}/score", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .json(session)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(ScoringError::Unreachable(format!(
                "scoring service returned {}",
                status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ScoringError::Rejected {
                reason: format!("scoring service error {}: {}", status, body),
            });
        }

        let payload: AssessmentPayload =
            response.json().await.map_err(|e| ScoringError::Rejected {
                reason: format!("failed to parse assessment: {}", e),
            })?;

        Ok(payload.into_assessment())
    }

    async fn test_connection(&self) -> bool {
        let url = format!("{}/health", self.base_url);

        match self.http_client.get(&url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("Health check failed: {}", e);
                false
            }
        }
    }
}
