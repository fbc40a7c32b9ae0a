//! EPD test harness
//!
//! Runs a UCI engine over an EPD test suite with a pool of engine processes
//! and writes per-position, per-category and overall score reports.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context};
use clap::Parser;
use harness::config::{self, RunConfig, Timeouts};
use harness::report::{self, ReportSettings};
use harness::{cancel_pair, engine, run_suite, RunResult};
use suite_core::aggregate::DEFAULT_RANK_LIMIT;
use suite_core::epd;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "epd-harness", about = "Score a UCI engine against an EPD test suite")]
struct Args {
    /// EPD file with c9 (moves) and c8 (points) opcodes
    epd_file: PathBuf,

    /// Path to the engine executable
    #[arg(short = 'p', long = "engine", env = "HARNESS_ENGINE")]
    engine: PathBuf,

    /// Engine name for reports; queried from the engine when omitted
    #[arg(short = 'n', long = "name")]
    name: Option<String>,

    /// Number of engine processes
    #[arg(short = 'w', long = "workers", default_value_t = 1, env = "HARNESS_WORKERS")]
    workers: usize,

    /// Search time per position, in seconds
    #[arg(long = "movetime", default_value_t = 1.0, env = "HARNESS_MOVETIME")]
    movetime: f64,

    /// Engine option as Name=Value; repeatable
    #[arg(short = 'o', long = "option")]
    options: Vec<String>,

    /// Write the full UCI exchange of each worker to <engine>_analysis_worker_N.txt
    #[arg(long = "uci-log")]
    uci_log: bool,

    /// Directory for the per-engine reports
    #[arg(long = "out-dir", default_value = ".", env = "HARNESS_OUT_DIR")]
    out_dir: PathBuf,

    /// Shared overall results file
    #[arg(long = "points-file", default_value = "points.csv", env = "HARNESS_POINTS_FILE")]
    points_file: PathBuf,

    #[arg(long)]
    startup_timeout_ms: Option<u64>,

    #[arg(long)]
    stop_grace_ms: Option<u64>,

    #[arg(long)]
    quit_grace_ms: Option<u64>,

    #[arg(long)]
    move_overhead_ms: Option<u64>,

    /// Spawn attempts per worker before it gives up
    #[arg(long, default_value_t = config::DEFAULT_MAX_SPAWN_ATTEMPTS)]
    max_spawn_attempts: u32,

    /// Categories listed in the strength and weakness reports
    #[arg(long, default_value_t = DEFAULT_RANK_LIMIT)]
    rank_limit: usize,
}

impl Args {
    fn timeouts(&self) -> Timeouts {
        let mut timeouts = Timeouts::from_env();
        if let Some(ms) = self.startup_timeout_ms {
            timeouts.startup = Duration::from_millis(ms);
        }
        if let Some(ms) = self.stop_grace_ms {
            timeouts.stop_grace = Duration::from_millis(ms);
        }
        if let Some(ms) = self.quit_grace_ms {
            timeouts.quit_grace = Duration::from_millis(ms);
        }
        if let Some(ms) = self.move_overhead_ms {
            timeouts.move_overhead = Duration::from_millis(ms);
        }
        timeouts
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file before anything reads the environment
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.uci_log {
        filter = filter.add_directive("harness::engine=debug".parse()?);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();

    ensure!(args.movetime > 0.0, "--movetime must be greater than 0");
    let move_time = Duration::try_from_secs_f64(args.movetime)
        .with_context(|| format!("invalid --movetime {}", args.movetime))?;

    let (positions, warnings) = epd::load_epd_file(&args.epd_file)?;
    for w in &warnings {
        warn!(line = w.line, reason = %w.reason, "Skipping EPD line");
    }
    info!(
        file = %args.epd_file.display(),
        positions = positions.len(),
        skipped = warnings.len(),
        "Test suite loaded"
    );

    let timeouts = args.timeouts();
    let engine_name = match &args.name {
        Some(name) => name.clone(),
        None => engine::query_engine_name(&args.engine, timeouts.clone())
            .await
            .with_context(|| {
                format!(
                    "could not read engine name from {}; pass -n NAME",
                    args.engine.display()
                )
            })?,
    };

    let cpus = num_cpus::get();
    if args.workers > cpus {
        warn!(workers = args.workers, cpus, "More workers than CPUs, engine timings will suffer");
    }

    let mut run_config = RunConfig::new(&args.engine, &engine_name);
    run_config.workers = args.workers;
    run_config.move_time = move_time;
    run_config.options = config::parse_options(&args.options);
    run_config.timeouts = timeouts;
    run_config.max_spawn_attempts = args.max_spawn_attempts;
    if args.uci_log {
        std::fs::create_dir_all(&args.out_dir)
            .with_context(|| format!("could not create {}", args.out_dir.display()))?;
        run_config.uci_log_dir = Some(args.out_dir.clone());
    }

    let (cancel_handle, cancel) = cancel_pair();
    tokio::spawn(async move {
        wait_for_shutdown().await;
        warn!("Shutdown requested, stopping engines");
        cancel_handle.cancel();
    });

    let result = run_suite(run_config, positions, cancel).await?;

    let settings = ReportSettings {
        out_dir: args.out_dir.clone(),
        points_file: args.points_file.clone(),
        test_file: test_file_name(&args.epd_file),
        move_time: args.movetime,
        rank_limit: args.rank_limit,
    };
    let written = report::write_reports(&result, &settings)?;
    print_summary(&result, &settings);
    info!(details = %written.details.display(), "Detailed analysis saved");
    if args.uci_log {
        info!(
            dir = %args.out_dir.display(),
            pattern = %format!("{}_analysis_worker_*.txt", report::file_stem(&engine_name)),
            "UCI transcripts saved"
        );
    }

    if result.truncated {
        error!("Run was cancelled; reports cover only the evaluated positions");
    }
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn test_file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn print_summary(result: &RunResult, settings: &ReportSettings) {
    let report = result.report(settings.rank_limit);
    let pct = |p: Option<f64>| p.map(|p| format!("{p:.2}%")).unwrap_or_else(|| "n/a".into());

    println!("\n{}", "=".repeat(60));
    println!("{} on {}", result.engine_name, settings.test_file);
    println!(
        "Total: {}/{} ({})",
        report.grand.points,
        report.grand.max_points,
        pct(report.grand_pct)
    );

    println!("\nStrengths:");
    for row in &report.strength {
        println!("  {:<12} {:<30} {}", row.id, row.description, pct(row.pct));
    }
    println!("\nWeaknesses:");
    for row in &report.weakness {
        println!("  {:<12} {:<30} {}", row.id, row.description, pct(row.pct));
    }
    if !report.flagged_categories.is_empty() {
        println!(
            "\nNo points available in: {}",
            report.flagged_categories.join(", ")
        );
    }
    println!("{}", "=".repeat(60));

    info!(
        positions = result.outcomes.len(),
        faults = result.fault_count(),
        truncated = result.truncated,
        elapsed_secs = result.elapsed.as_secs(),
        "Run summary"
    );
}
