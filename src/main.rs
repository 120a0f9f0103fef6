//! Riskwatch - behavioral-biometric risk aggregation
//!
//! Scores a user's session history against a remote scoring service,
//! overlays live assessments for the newest session and writes a
//! risk report.
//!
//! Exit codes:
//!   0 - Success (no session above threshold, or no --fail-on set)
//!   1 - Runtime error (config, session store, backend unreachable, etc.)
//!   2 - Sessions found at or above --fail-on category

mod analysis;
mod backend;
mod cli;
mod config;
mod engine;
mod error;
mod models;
mod report;
mod sources;

use anyhow::{Context, Result};
use backend::{HttpScoringBackend, ScoringBackend};
use chrono::Utc;
use cli::{Args, OutputFormat};
use config::Config;
use engine::{
    AggregationController, ConnectivityGate, EngineEvent, EngineSettings, PassReport, PassStatus,
};
use indicatif::{ProgressBar, ProgressStyle};
use models::{Report, ReportMetadata, RiskCategory, RiskSummary};
use sources::{JsonFileStore, JsonLinesFeed, LiveRiskFeed, NoLiveFeed};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse_args();

    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("Riskwatch v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .riskwatch.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(config::CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            config::CONFIG_FILE
        );
        std::process::exit(1);
    }

    std::fs::write(path, Config::default_toml())
        .with_context(|| format!("Failed to write {}", config::CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", config::CONFIG_FILE);
    println!("   Edit it to customize the backend, sources and scoring.");
    Ok(())
}

fn init_logging(args: &Args) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level())
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run the complete scoring workflow. Returns exit code (0 or 2).
async fn run(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate()?;
    let settings = EngineSettings::from(&config);

    let backend = Arc::new(HttpScoringBackend::new(
        &config.backend.url,
        config.backend.timeout_seconds,
    )?);

    if args.check {
        return handle_check(backend, &settings).await;
    }

    let store = Arc::new(JsonFileStore::new(&config.sources.sessions));
    let feed: Arc<dyn LiveRiskFeed> = match config.sources.live_feed.as_deref() {
        Some(source) => Arc::new(JsonLinesFeed::new(source)),
        None => Arc::new(NoLiveFeed),
    };

    println!("🛰️  Scoring backend: {}", backend.base_url());
    println!("📂 Sessions: {}", config.sources.sessions);
    if let Some(ref source) = config.sources.live_feed {
        println!("📡 Live feed: {}", source);
    }

    let controller = AggregationController::new(store, backend, feed, settings);
    let progress = spawn_progress(controller.subscribe_events(), args.quiet);

    let outcome = drive(&controller, args.refresh).await;
    progress.abort();
    let (last, passes) = match outcome {
        Ok(result) => result,
        Err(e) => {
            controller.shutdown().await;
            return Err(e);
        }
    };

    println!("\n📝 Generating report...");

    let sessions = controller.sessions().await;
    let table = controller.snapshot();
    controller.shutdown().await;

    let mut rows = analysis::rows_from_table(&table, &sessions);
    if let Some(min) = args.min_category {
        analysis::filter_by_category(&mut rows, min.into());
    }

    let unscored = match last.status {
        PassStatus::CompletedWithFailures { ref failed } => failed.clone(),
        _ => Vec::new(),
    };

    let report = Report {
        metadata: ReportMetadata {
            backend_url: config.backend.url.clone(),
            generated_at: Utc::now(),
            sessions_total: sessions.len(),
            sessions_assessed: table.len(),
            pass_status: last.status.to_string(),
            passes,
            duration_seconds: start_time.elapsed().as_secs_f64(),
        },
        summary: RiskSummary::from_rows(&rows),
        sessions: rows,
        unscored,
    };

    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report, &config.report),
    };

    std::fs::write(&config.general.output, &output)
        .with_context(|| format!("Failed to write report to {}", config.general.output))?;

    print_summary(&report.summary, &last, report.metadata.duration_seconds);
    println!("\n✅ Report saved to: {}", config.general.output);

    exit_code(&report, &last, args.fail_on.map(RiskCategory::from))
}

/// Exit code for a finished run. A pass that lost the backend is an error,
/// whatever the assessed sessions look like.
fn exit_code(report: &Report, last: &PassReport, fail_on: Option<RiskCategory>) -> Result<i32> {
    if last.status == PassStatus::BackendUnavailable {
        anyhow::bail!(
            "Scoring backend became unavailable: {}/{} sessions scored",
            last.scored,
            last.total
        );
    }

    if let Some(threshold) = fail_on {
        if report
            .sessions
            .iter()
            .any(|row| row.assessment.category >= threshold)
        {
            eprintln!(
                "\n⛔ Sessions found at or above {} risk. Failing (exit code 2).",
                threshold
            );
            return Ok(2);
        }
    }

    Ok(0)
}

/// Start the engine and wait for the first pass, then an optional refresh.
/// Returns the last pass report and the number of passes run.
async fn drive(controller: &AggregationController, refresh: bool) -> Result<(PassReport, usize)> {
    println!("\n🔬 Scoring sessions...");

    let generation = controller
        .start()
        .await
        .context("Failed to start the aggregation engine")?;
    let mut last = controller
        .wait_for_pass(generation)
        .await
        .context("Batch pass did not finish")?;
    let mut passes = 1;

    if refresh {
        println!("\n🔁 Refreshing assessments...");
        match controller.refresh().await {
            Ok(generation) => {
                last = controller
                    .wait_for_pass(generation)
                    .await
                    .context("Refresh pass did not finish")?;
                passes += 1;
            }
            Err(e) => warn!("Refresh skipped: {}", e),
        }
    }

    if !controller.is_available() {
        warn!(
            "Scoring backend unavailable (last checked {:?})",
            controller.connectivity().last_checked
        );
    }

    Ok((last, passes))
}

/// Handle --check: check the backend and exit.
async fn handle_check(backend: Arc<dyn ScoringBackend>, settings: &EngineSettings) -> Result<i32> {
    println!("🔌 Checking scoring backend...");

    let gate = ConnectivityGate::new(backend, settings.retry.clone());
    if gate.test_with_retry().await {
        println!("✅ Scoring backend is reachable.");
        Ok(0)
    } else {
        anyhow::bail!("Scoring backend is unreachable")
    }
}

/// Drive a progress bar from engine events until the task is aborted.
fn spawn_progress(
    mut events: broadcast::Receiver<EngineEvent>,
    quiet: bool,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        if let Ok(style) = ProgressStyle::default_bar()
            .template(
            "{spinner:.green} {prefix} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )
        {
            bar.set_style(style.progress_chars("#>-"));
        }

        loop {
            match events.recv().await {
                Ok(EngineEvent::Loaded {
                    sessions,
                    generation,
                }) => {
                    bar.reset();
                    bar.set_length(sessions as u64);
                    bar.set_prefix(format!("pass {}", generation));
                }
                Ok(EngineEvent::Progress(snapshot)) => {
                    bar.set_prefix(format!("pass {}", snapshot.generation));
                    bar.set_length(snapshot.total as u64);
                    bar.set_position(snapshot.processed as u64);
                    bar.set_message(format!(
                        "{} scored, {} failed, {} in table",
                        snapshot.scored,
                        snapshot.failed,
                        snapshot.table.len()
                    ));
                }
                Ok(EngineEvent::PassFinished(report)) => {
                    bar.set_message(report.status.to_string());
                    bar.finish();
                }
                Ok(EngineEvent::Overlay { key }) => {
                    debug!("Live overlay for session {}", key);
                }
                Ok(EngineEvent::FeedEnded) => debug!("Live feed ended"),
                Ok(EngineEvent::Failure(e)) => bar.println(format!("⚠️  {}", e)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("Progress display skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn print_summary(summary: &RiskSummary, last: &PassReport, duration: f64) {
    println!("\n📊 Risk Summary:");
    println!("   Sessions assessed: {}", summary.total);
    println!(
        "   - {} High: {} | {} Medium: {} | {} Low: {}",
        RiskCategory::High.emoji(),
        summary.high,
        RiskCategory::Medium.emoji(),
        summary.medium,
        RiskCategory::Low.emoji(),
        summary.low
    );
    if summary.total > 0 {
        println!("   Mean score: {:.2}", summary.mean_score);
    }
    if summary.live_overlays > 0 {
        println!("   Live overlays: {}", summary.live_overlays);
    }
    println!(
        "   Last pass: {} ({}/{} scored)",
        last.status, last.scored, last.total
    );
    println!("   Duration: {:.1}s", duration);
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", config::CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
