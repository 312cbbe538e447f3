//! Sumi-Harvest main entry point
//!
//! This is the command-line interface for the Sumi-Harvest download
//! scheduler. URLs are read one per line from a file or stdin and fed to the
//! scheduler as they arrive.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use sumi_harvest::config::{load_config_with_hash, Config};
use sumi_harvest::output::print_statistics;
use sumi_harvest::{Scheduler, SubmitOutcome};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

const IDLE_CHECK: Duration = Duration::from_millis(200);

/// Sumi-Harvest: an adaptive multi-path downloader
///
/// Sumi-Harvest spreads downloads across several network interfaces,
/// grows its worker pool under queue pressure, retries transient failures,
/// and records every finished URL in flat completed/failed journals.
#[derive(Parser, Debug)]
#[command(name = "sumi-harvest")]
#[command(version = "1.0.0")]
#[command(about = "An adaptive multi-path downloader", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// File with one URL per line (reads stdin when omitted)
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Discovery depth recorded for URLs that do not carry their own
    #[arg(short, long, default_value_t = 0)]
    depth: u32,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and show the resource layout without downloading
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    if cli.dry_run {
        handle_dry_run(&config);
        return Ok(());
    }

    handle_harvest(config, cli.input, cli.depth).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_harvest=info,warn"),
            1 => EnvFilter::new("sumi_harvest=debug,info"),
            2 => EnvFilter::new("sumi_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows the layout
fn handle_dry_run(config: &Config) {
    let sched = &config.scheduler;

    println!("=== Sumi-Harvest Dry Run ===\n");

    println!("Scheduler:");
    println!("  Worker ceiling: {}", sched.worker_ceiling);
    println!("  Initial workers per resource: {}", sched.initial_workers_per_resource);
    println!(
        "  Scale threshold: {:.2} (step {}, every {}ms)",
        sched.scale_threshold, sched.scale_step, sched.scale_check_interval_ms
    );
    println!(
        "  Retries: {} (backoff unit {}ms)",
        sched.max_retries, sched.retry_backoff_unit_ms
    );
    println!("  Priority queue capacity: {}", sched.priority_queue_capacity);

    println!("\nFetch:");
    println!("  Request timeout: {}s", config.fetch.request_timeout_secs);
    println!("  Clients per resource: {}", config.fetch.clients_per_resource);
    println!(
        "  Rate limit: {} req/s (burst {})",
        config.rate_limit.requests_per_second, config.rate_limit.burst
    );

    println!("\nOutput:");
    println!("  Download directory: {}", config.output.download_dir.display());

    println!("\nResources ({}):", config.resources.len());
    for entry in &config.resources {
        println!(
            "  - {} [{:?}] queue {}, {} initial workers, bound to {}",
            entry.name,
            entry.capacity,
            entry.capacity.scale(sched.queue_capacity_per_resource),
            entry.capacity.scale(sched.initial_workers_per_resource),
            entry.local_address.as_deref().unwrap_or("any")
        );
    }

    println!("\n✓ Configuration is valid");
}

/// Handles the main download run
async fn handle_harvest(config: Config, input: Option<PathBuf>, depth: u32) -> anyhow::Result<()> {
    let scheduler = Scheduler::start(config)
        .await
        .context("Failed to start scheduler")?;

    let interrupted = match input {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("Failed to open URL list {}", path.display()))?;
            feed(&scheduler, BufReader::new(file), depth).await
        }
        None => feed(&scheduler, BufReader::new(tokio::io::stdin()), depth).await,
    };

    match interrupted {
        Ok(true) => tracing::info!("Interrupted, shutting down"),
        Ok(false) => tracing::info!("All submitted URLs resolved"),
        Err(e) => tracing::error!("Reading URL list failed: {}", e),
    }

    scheduler.shutdown().await;
    print_statistics(&scheduler.stats());

    Ok(())
}

/// Submits every URL in the input, then waits for them to resolve
///
/// Lines are `URL [DEPTH]`; blank lines and `#` comments are skipped.
///
/// # Returns
///
/// * `Ok(true)` - Ctrl-C arrived first
/// * `Ok(false)` - Input exhausted and nothing left pending
async fn feed<R>(scheduler: &Scheduler, reader: R, default_depth: u32) -> std::io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut lines = reader.lines();
    let mut accepted = 0usize;
    let mut duplicates = 0usize;
    let mut invalid = 0usize;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => return Ok(true),
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }

                let mut parts = line.split_whitespace();
                let url = parts.next().unwrap_or_default();
                let depth = parts
                    .next()
                    .and_then(|d| d.parse().ok())
                    .unwrap_or(default_depth);

                match scheduler.submit(url, depth) {
                    outcome if outcome.is_accepted() => accepted += 1,
                    SubmitOutcome::Duplicate => duplicates += 1,
                    SubmitOutcome::Invalid => invalid += 1,
                    SubmitOutcome::Rejected => return Ok(true),
                    _ => {}
                }
            }
        }
    }

    tracing::info!(accepted, duplicates, invalid, "Input exhausted, waiting for downloads");

    loop {
        tokio::select! {
            _ = &mut ctrl_c => return Ok(true),
            _ = tokio::time::sleep(IDLE_CHECK) => {
                if scheduler.tracker().counts().pending == 0 {
                    return Ok(false);
                }
            }
        }
    }
}
