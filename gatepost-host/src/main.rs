//! gatepost-host -- capture host daemon entry point.
//!
//! Startup order:
//! 1. Parse CLI, load and validate configuration
//! 2. Initialize tracing (and the metrics recorder, if enabled)
//! 3. Start the registry RPC server for the evaluator process
//! 4. Run the kernel queue bridge on a dedicated OS thread
//! 5. Wait for SIGTERM/SIGINT or a fatal bridge error, then unwind in
//!    reverse order

mod cli;
mod logging;
mod metrics_server;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use gatepost_core::config::GatepostConfig;
use gatepost_core::pipeline::Pipeline;
use gatepost_nfqueue::NfqueueBridge;
use gatepost_registry::{RegistryServer, VerdictRegistry};

use crate::cli::HostCli;
use gatepost_host::worker::CaptureWorker;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = HostCli::parse();

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
    if let Some(queue_num) = cli.queue_num {
        config.queue.queue_num = queue_num;
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
        queue = config.queue.queue_num,
        socket = %config.rpc.socket_path,
        "gatepost-host starting"
    );

    if config.metrics.enabled {
        metrics_server::install_metrics_recorder(&config.metrics)?;
    }

    // Shared registry handle: injected into both the RPC surface and the
    // capture worker, never a hidden global.
    let registry = VerdictRegistry::new();

    let mut server = RegistryServer::new(
        registry.clone(),
        &config.rpc.socket_path,
        config.rpc.max_frame_bytes,
    );
    server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("failed to start registry rpc server: {}", e))?;

    // The bridge loop is blocking and fully serialized by design, so it
    // gets its own OS thread outside the tokio runtime.
    let shutdown = Arc::new(AtomicBool::new(false));
    let bridge = NfqueueBridge::new(config.queue.queue_num, config.queue.copy_range);
    let capture = CaptureWorker::new(
        registry.clone(),
        Duration::from_millis(config.verdict.timeout_ms),
        config.verdict.fail_open(),
    );

    let (bridge_done_tx, mut bridge_done_rx) = tokio::sync::oneshot::channel();
    let bridge_shutdown = Arc::clone(&shutdown);
    let bridge_thread = std::thread::Builder::new()
        .name("nfqueue-bridge".to_owned())
        .spawn(move || {
            let result = bridge.run(
                |id, payload, captured_at| capture.decide(id, payload, captured_at),
                bridge_shutdown,
            );
            let _ = bridge_done_tx.send(result);
        })?;

    tracing::info!("gatepost-host running");

    let mut exit_result = Ok(());
    let mut bridge_finished = false;
    tokio::select! {
        signal = wait_for_shutdown_signal() => {
            let signal = signal?;
            tracing::info!(signal, "shutdown signal received");
        }
        bridge_result = &mut bridge_done_rx => {
            bridge_finished = true;
            match bridge_result {
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "kernel bridge failed");
                    exit_result = Err(anyhow::anyhow!("kernel bridge failed: {}", e));
                }
                Ok(Ok(())) => tracing::warn!("kernel bridge exited unexpectedly"),
                Err(_) => tracing::warn!("kernel bridge thread dropped without result"),
            }
        }
    }

    // Unwind: stop the bridge loop first (packet source), then the RPC
    // surface. The bridge observes the flag within its recv timeout.
    shutdown.store(true, Ordering::Relaxed);
    if !bridge_finished {
        let _ = tokio::time::timeout(Duration::from_secs(3), bridge_done_rx).await;
    }
    if let Err(e) = tokio::task::spawn_blocking(move || bridge_thread.join()).await {
        tracing::warn!(error = %e, "bridge thread join failed");
    }

    if let Err(e) = server.stop().await {
        tracing::error!(error = %e, "failed to stop registry rpc server");
    }

    tracing::info!("gatepost-host shut down");
    exit_result
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
