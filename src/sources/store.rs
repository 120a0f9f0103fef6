//! File-backed session store.

use crate::error::StoreError;
use crate::models::Session;
use crate::sources::SessionStore;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info};

/// Reads sessions from a JSON array on disk, in file order.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn source_name(&self) -> String {
        self.path.display().to_string()
    }
}

#[async_trait]
impl SessionStore for JsonFileStore {
    async fn load_all(&self) -> Result<Vec<Session>, StoreError> {
        debug!("Reading sessions from {}", self.path.display());

        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| StoreError::Read {
                source_name: self.source_name(),
                reason: e.to_string(),
            })?;

        let sessions: Vec<Session> =
            serde_json::from_str(&content).map_err(|e| StoreError::Decode {
                source_name: self.source_name(),
                reason: e.to_string(),
            })?;

        info!("Read {} sessions from {}", sessions.len(), self.path.display());
        Ok(sessions)
    }
}
