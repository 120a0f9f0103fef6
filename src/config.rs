//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.riskwatch.toml` files.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".riskwatch.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Scoring backend settings.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Batch pass settings.
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Session store and live feed locations.
    #[serde(default)]
    pub sources: SourcesConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
        }
    }
}

fn default_output() -> String {
    "riskwatch_report.md".to_string()
}

/// Scoring backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the scoring service.
    #[serde(default = "default_backend_url")]
    pub url: String,

    /// Timeout for a single scoring request in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Timeout for a connectivity check in seconds.
    #[serde(default = "default_check_timeout")]
    pub check_timeout_seconds: u64,

    /// Extra connectivity checks before declaring the backend unavailable.
    #[serde(default = "default_retries")]
    pub retries: usize,

    /// Pause between connectivity checks in milliseconds.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            timeout_seconds: default_timeout(),
            check_timeout_seconds: default_check_timeout(),
            retries: default_retries(),
            retry_backoff_ms: default_retry_backoff(),
        }
    }
}

fn default_backend_url() -> String {
    "http://localhost:8700".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_check_timeout() -> u64 {
    5
}

fn default_retries() -> usize {
    2
}

fn default_retry_backoff() -> u64 {
    500
}

/// Batch pass settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Sessions scored concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Publish a progress snapshot every N sessions (the last one always).
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,

    /// Consecutive scoring failures that abandon a pass.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            progress_every: default_progress_every(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

fn default_concurrency() -> usize {
    4
}

fn default_progress_every() -> usize {
    5
}

fn default_failure_threshold() -> usize {
    3
}

/// Where sessions and live events come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// JSON file holding the session history.
    #[serde(default = "default_sessions")]
    pub sessions: String,

    /// JSON-lines file of live assessments; `-` reads stdin.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_feed: Option<String>,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            sessions: default_sessions(),
            live_feed: None,
        }
    }
}

fn default_sessions() -> String {
    "sessions.json".to_string()
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Number of riskiest sessions listed in the highlights table.
    #[serde(default = "default_top_sessions")]
    pub top_sessions: usize,

    /// Include the per-channel sub-score columns.
    #[serde(default = "default_true")]
    pub include_sub_scores: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            top_sessions: default_top_sessions(),
            include_sub_scores: true,
        }
    }
}

fn default_top_sessions() -> usize {
    5
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were actually given.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref url) = args.backend_url {
            self.backend.url = url.clone();
        }
        if let Some(timeout) = args.timeout {
            self.backend.timeout_seconds = timeout;
        }
        if let Some(retries) = args.retries {
            self.backend.retries = retries;
        }

        if let Some(concurrency) = args.concurrency {
            self.scoring.concurrency = concurrency;
        }
        if let Some(every) = args.progress_every {
            self.scoring.progress_every = every;
        }

        if let Some(ref sessions) = args.sessions {
            self.sources.sessions = sessions.display().to_string();
        }
        if let Some(ref feed) = args.live_feed {
            self.sources.live_feed = Some(feed.clone());
        }

        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Reject settings the engine cannot run with.
    ///
    /// Applied after merging, so values from the file are checked too.
    pub fn validate(&self) -> Result<()> {
        if !self.backend.url.starts_with("http://") && !self.backend.url.starts_with("https://") {
            bail!("Backend URL must start with 'http://' or 'https://'");
        }
        if self.backend.timeout_seconds == 0 {
            bail!("backend.timeout_seconds must be at least 1");
        }
        if self.backend.check_timeout_seconds == 0 {
            bail!("backend.check_timeout_seconds must be at least 1");
        }
        if self.scoring.concurrency == 0 {
            bail!("scoring.concurrency must be at least 1");
        }
        if self.scoring.progress_every == 0 {
            bail!("scoring.progress_every must be at least 1");
        }
        if self.scoring.failure_threshold == 0 {
            bail!("scoring.failure_threshold must be at least 1");
        }
        Ok(())
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
