//! gatepost-evaluator -- policy evaluator daemon entry point.
//!
//! Startup order:
//! 1. Parse CLI, load and validate configuration
//! 2. Initialize tracing
//! 3. Start the module host (directory scan + watch)
//! 4. Connect to the capture host's registry socket (with retry)
//! 5. Run the polling loop until SIGTERM/SIGINT

mod cli;
mod logging;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use gatepost_core::config::GatepostConfig;
use gatepost_core::pipeline::Pipeline;
use gatepost_evaluator::worker::EvaluationWorker;
use gatepost_membrane::MembraneBuilder;
use gatepost_registry::RegistryClient;

use crate::cli::EvaluatorCli;

/// Delay between registry connection attempts.
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = EvaluatorCli::parse();

    let mut config = GatepostConfig::load(&cli.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load config {}: {}", cli.config.display(), e))?;

    // CLI overrides win over config file and environment
    if let Some(level) = cli.log_level {
        config.general.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.general.log_format = format;
    }
    if let Some(module_dir) = cli.module_dir {
        config.membrane.module_dir = module_dir;
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    if cli.validate {
        println!("configuration OK: {}", cli.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(
        socket = %config.rpc.socket_path,
        module_dir = %config.membrane.module_dir,
        "gatepost-evaluator starting"
    );

    let (mut host, membrane) = MembraneBuilder::new()
        .module_dir(&config.membrane.module_dir)
        .watch(config.membrane.watch)
        .build();
    host.start()
        .await
        .map_err(|e| anyhow::anyhow!("failed to start module host: {}", e))?;
    tracing::info!(modules = host.module_count(), "module host started");

    let client = connect_with_retry(&config).await?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut worker = EvaluationWorker::new(
        client,
        membrane,
        config.verdict_policy(),
        Duration::from_millis(config.verdict.poll_interval_ms),
    );

    tracing::info!("gatepost-evaluator running");

    let mut exit_result = Ok(());
    tokio::select! {
        signal = wait_for_shutdown_signal() => {
            let signal = signal?;
            tracing::info!(signal, "shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
        result = worker.run(shutdown_rx.clone()) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "evaluation worker failed");
                exit_result = Err(anyhow::anyhow!("evaluation worker failed: {}", e));
            }
        }
    }

    if let Err(e) = host.stop().await {
        tracing::error!(error = %e, "failed to stop module host");
    }

    tracing::info!("gatepost-evaluator shut down");
    exit_result
}

/// Connect to the capture host's registry socket, retrying until it
/// appears. The capture host may start after the evaluator.
async fn connect_with_retry(config: &GatepostConfig) -> Result<RegistryClient> {
    let mut attempts = 0u32;
    loop {
        match RegistryClient::connect(&config.rpc.socket_path, config.rpc.max_frame_bytes).await {
            Ok(client) => {
                tracing::info!(socket = %config.rpc.socket_path, "connected to capture host");
                return Ok(client);
            }
            Err(e) => {
                attempts += 1;
                if attempts % 20 == 1 {
                    tracing::warn!(
                        socket = %config.rpc.socket_path,
                        attempts,
                        error = %e,
                        "capture host not reachable yet, retrying"
                    );
                }
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
        }
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}
