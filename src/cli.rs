//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::RiskCategory;
use clap::Parser;
use std::path::PathBuf;

/// Riskwatch - behavioral-biometric risk aggregation
///
/// Scores a history of user sessions against a risk scoring service,
/// overlays live assessments for the newest session, and writes a
/// Markdown or JSON risk report.
///
/// Examples:
///   riskwatch --sessions sessions.json
///   riskwatch --sessions sessions.json --live-feed events.jsonl --refresh
///   riskwatch --backend-url http://scorer:8700 --format json -o risk.json
///   riskwatch --check
///   riskwatch --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// JSON file with the session history
    ///
    /// Overrides `[sources] sessions` from the config file.
    #[arg(short, long, value_name = "FILE")]
    pub sessions: Option<PathBuf>,

    /// JSON-lines file of live assessments for the newest session
    ///
    /// Use `-` to read from stdin.
    #[arg(long, value_name = "FILE")]
    pub live_feed: Option<String>,

    /// Scoring backend base URL
    #[arg(long, value_name = "URL", env = "RISKWATCH_BACKEND_URL")]
    pub backend_url: Option<String>,

    /// Output file path for the report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .riskwatch.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Number of sessions scored concurrently
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,

    /// Publish progress every N sessions
    #[arg(long, value_name = "NUM")]
    pub progress_every: Option<usize>,

    /// Scoring request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Extra connectivity checks before giving up on the backend
    #[arg(long, value_name = "NUM")]
    pub retries: Option<usize>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Re-score every session once the first pass has finished
    #[arg(long)]
    pub refresh: bool,

    /// Only check the scoring backend and exit
    #[arg(long)]
    pub check: bool,

    /// Fail if any session is assessed at or above this category
    ///
    /// Useful for CI pipelines. Exit code 2 when threshold is exceeded.
    #[arg(long, value_name = "LEVEL")]
    pub fail_on: Option<CategoryLevel>,

    /// Minimum category to include in the report
    #[arg(long, value_name = "LEVEL")]
    pub min_category: Option<CategoryLevel>,

    /// Generate a default .riskwatch.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

/// Risk category for --fail-on and --min-category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
pub enum CategoryLevel {
    Low,
    Medium,
    High,
}

impl From<CategoryLevel> for RiskCategory {
    fn from(level: CategoryLevel) -> Self {
        match level {
            CategoryLevel::Low => RiskCategory::Low,
            CategoryLevel::Medium => RiskCategory::Medium,
            CategoryLevel::High => RiskCategory::High,
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if let Some(ref url) = self.backend_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Backend URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if self.progress_every == Some(0) {
            return Err("Progress cadence must be at least 1".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref path) = self.sessions {
            if !path.is_file() {
                return Err(format!("Sessions file does not exist: {}", path.display()));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
