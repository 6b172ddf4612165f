//! Signal Edge Binary
//!
//! Runs the reflex loop over stdin/stdout. Logs go to stderr.
//!
//! # Usage
//! ```bash
//! signal-edge [--config signal.toml] [--notify-only] [--deadline-ms 200] [--verbose]
//! ```

use anyhow::Context;
use clap::Parser;
use signal_core::{Autonomy, LoopConfig};
use signal_edge::EdgeRuntime;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Environment variable consulted for the log filter before `RUST_LOG`
const ENV_LOG_LEVEL: &str = "SIGNAL_LOG_LEVEL";

/// Signal Edge - Bounded-time reflex loop for lab instruments
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Report decisions without issuing them
    #[arg(long)]
    notify_only: bool,

    /// Decision budget in milliseconds (overrides config)
    #[arg(long)]
    deadline_ms: Option<u64>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = LoopConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if args.notify_only {
        config.autonomy = Autonomy::NotifyOnly;
    }
    if let Some(deadline_ms) = args.deadline_ms {
        config.deadline_ms = deadline_ms;
    }
    config.validate().context("Invalid configuration")?;

    print_banner(&config);

    let runtime = EdgeRuntime::new(config).context("Failed to start loop")?;
    let summary = runtime
        .run(tokio::io::stdin(), tokio::io::stdout())
        .await
        .context("Loop terminated")?;

    tracing::info!(
        "Shutdown: {} cycles, {} deadline misses, {} faults, {} overflows",
        summary.stats.cycles,
        summary.stats.deadline_misses,
        summary.stats.faults,
        summary.stats.overflows
    );
    Ok(())
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(ENV_LOG_LEVEL)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    if verbose {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }
}

fn print_banner(config: &LoopConfig) {
    eprintln!();
    eprintln!("╔═══════════════════════════════════════════════════════════════╗");
    eprintln!("║                                                               ║");
    eprintln!("║             SIGNAL EDGE - SENSE · INFER · ACT · SYNC          ║");
    eprintln!("║                                                               ║");
    eprintln!("╚═══════════════════════════════════════════════════════════════╝");
    eprintln!();
    eprintln!("⏱  Decision budget");
    eprintln!("   └─ {}ms, fail-safe {}", config.deadline_ms, config.failsafe_action);
    eprintln!();
    eprintln!("🎯 Autonomy");
    eprintln!("   └─ {}", config.autonomy);
    eprintln!();
    eprintln!("✅ Allowed actions");
    let count = config.policy.allowed_actions.len();
    for (i, action) in config.policy.allowed_actions.iter().enumerate() {
        let branch = if i + 1 == count { "└─" } else { "├─" };
        eprintln!("   {} {}", branch, action);
    }
    eprintln!();
    eprintln!("─────────────────────────────────────────────────────────────────");
    eprintln!("Reading JSON lines from stdin; close input to stop");
    eprintln!();
}
