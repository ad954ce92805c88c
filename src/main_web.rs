// Covid-19 classification API server
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;

use xray_classifier::web::cache::ResponseCache;
use xray_classifier::web::logger::setup_logging;
use xray_classifier::web::training_queue::TrainingQueueStore;
use xray_classifier::web::server::{shutdown_signal, stop_worker_on};
use xray_classifier::web::worker::process_manager::ProcessManager;
use xray_classifier::web::worker::worker_bridge::WorkerChannel;
use xray_classifier::web::{serve, AppState, ServerConfig};
use xray_classifier::{sys_error, sys_info, sys_warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    setup_logging(config.log_level, config.log_file.as_deref())
        .map_err(|e| anyhow!("failed to initialise logging: {e}"))?;

    std::fs::create_dir_all(&config.cache_dir_path).with_context(|| {
        format!("cannot create cache dir {}", config.cache_dir_path.display())
    })?;
    let queue = TrainingQueueStore::open(&config.training_queue_dir_path)
        .context("cannot open training queue")?;
    let addr = config.listen_addr().context("invalid listen address")?;

    let process_manager = Arc::new(ProcessManager::spawn(&config.worker_spec())?);
    let channel = Arc::new(WorkerChannel::connect(
        process_manager,
        config.worker_timeout(),
    )?);

    let state = AppState {
        correlator: channel.correlator(),
        worker: Some(channel.clone()),
        cache: Arc::new(ResponseCache::new(config.cache_settings())),
        queue: Arc::new(queue),
        cache_dir: config.cache_dir_path.clone(),
        worker_base_dir: config.worker_base_dir(),
        max_upload_bytes: config.max_upload_bytes(),
    };

    // The worker goes down before the drain so parked requests fail fast.
    let hook = channel.clone();
    let shutdown = async move {
        stop_worker_on(shutdown_signal(), hook).await;
        tokio::spawn(exit_on_second_signal());
    };

    let served = serve(addr, state, shutdown).await;
    channel.shutdown().await;
    if let Err(e) = &served {
        sys_error!("[HTTP] Server error: {e}");
    }
    served.context("HTTP server failed")?;

    sys_info!("Server stopped");
    Ok(())
}

/// A second Ctrl-C while connections drain exits at once.
async fn exit_on_second_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        sys_warn!("[HTTP] Second interrupt, exiting without draining");
        std::process::exit(130);
    }
}
