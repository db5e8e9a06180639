#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod commands;
mod config;
mod telemetry;

use std::process;

use anyhow::Context;

use crate::config::Cli;

// Tracing target constants
pub const TRACING_TARGET_STARTUP: &str = "strata_cli::startup";
pub const TRACING_TARGET_SHUTDOWN: &str = "strata_cli::shutdown";
pub const TRACING_TARGET_CONFIG: &str = "strata_cli::config";
pub const TRACING_TARGET_COMMAND: &str = "strata_cli::command";

#[tokio::main]
async fn main() {
    let Err(error) = run().await else {
        tracing::info!(
            target: TRACING_TARGET_SHUTDOWN,
            "application terminated successfully"
        );
        process::exit(0);
    };

    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!(
            target: TRACING_TARGET_SHUTDOWN,
            error = %error,
            "application terminated with error"
        );
    } else {
        eprintln!("Error: {error:#}");
    }

    process::exit(1);
}

/// Main application entry point.
async fn run() -> anyhow::Result<()> {
    let cli = Cli::init();

    telemetry::init_tracing()?;
    cli.log();

    let client = cli
        .postgres
        .clone()
        .build()
        .await
        .context("failed to initialize database client")?;

    let outcome = commands::dispatch(&client, &cli.command).await;
    client.close();

    outcome
}
