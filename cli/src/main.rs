//! guestjs CLI - run a script inside a WASM-hosted script engine

mod cli;

use std::io::Write;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use guestjs_bridge::Runner;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries only the script output
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut runner = Runner::new(cli.bridge_config(), cli.environment())
        .context("failed to configure the WASM engine")?;
    if !cli.flags.is_empty() {
        runner = runner.with_script_flags(cli.flags.iter().cloned());
    }

    let plan = cli.plan();
    let summary = runner
        .run_plan_repeated(&plan, cli.repeat)
        .with_context(|| format!("failed to run {}", plan.source_path.display()))?;

    if summary.runs > 1 {
        info!(
            runs = summary.runs,
            compile_ms = summary.compile_time.as_millis() as u64,
            mean_run_us = summary.mean_run_time().as_micros() as u64,
            "repeat finished"
        );
    }

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(&summary.output)?;
    stdout.flush()?;
    Ok(())
}
