//! Worker executor binary
//!
//! Registers with the master, serves the `AssignTask`/`CancelTask` RPCs on
//! its own small axum server, sends periodic heartbeats, and reports
//! completions — the same register/heartbeat/report-and-reconnect shape as
//! a long-running agent process, just pointed at the scheduling master
//! instead of a monitoring collector.

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

const WORKER_VERSION: &str = env!("CARGO_PKG_VERSION");

mod api;
mod config;
mod executor;

use anyhow::{Context, Result};
use clap::Parser;
use config::ConfigManager;
use executor::Executor;
use shared::api::{endpoints, HeartbeatRequest, RegisterWorkerRequest};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "worker")]
#[command(about = "Executor that registers with the master and runs assigned tasks", long_about = None)]
struct CliArgs {
    /// Path to the worker configuration file (worker.toml). May point at a
    /// file or a directory containing one.
    #[arg(value_name = "CONFIG_FILE")]
    config_file: Option<PathBuf>,

    #[arg(long = "worker-id", value_name = "ID")]
    worker_id: Option<String>,

    #[arg(long = "listen-address", value_name = "ADDRESS")]
    listen_address: Option<String>,

    #[arg(long = "advertise-address", value_name = "ADDRESS")]
    advertise_address: Option<String>,

    #[arg(long = "master-url", value_name = "URL")]
    master_url: Option<String>,
}

struct WorkerProcess {
    config_manager: ConfigManager,
    executor: Arc<Executor>,
    http: reqwest::Client,
    shutdown_tx: Option<broadcast::Sender<()>>,
    task_handles: Vec<JoinHandle<()>>,
}

impl WorkerProcess {
    fn new(config_manager: ConfigManager) -> Self {
        let cfg = &config_manager.config;
        let http = reqwest::Client::new();
        let executor = Arc::new(Executor::new(
            cfg.worker_id.clone(),
            cfg.master_url.clone(),
            http.clone(),
            cfg.execution_jitter_fraction,
        ));

        WorkerProcess {
            config_manager,
            executor,
            http,
            shutdown_tx: None,
            task_handles: Vec::new(),
        }
    }

    /// Registers with the master, retrying on a fixed interval until it
    /// succeeds. There's no cap: a worker with no master to talk to simply
    /// waits, since the master may not have started yet.
    async fn register_with_retry(&self) -> Result<()> {
        let cfg = &self.config_manager.config;
        let url = format!("{}{}", cfg.master_url, endpoints::REGISTER_WORKER);
        let req = RegisterWorkerRequest {
            worker_id: cfg.worker_id.clone(),
            address: cfg.advertise_address.clone(),
            total: cfg.total.clone(),
        };

        loop {
            match self.http.post(&url).json(&req).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!(worker_id = %cfg.worker_id, master_url = %cfg.master_url, "registered with master");
                    return Ok(());
                }
                Ok(resp) => {
                    warn!(status = %resp.status(), "master rejected registration, retrying");
                }
                Err(e) => {
                    warn!(error = %e, "failed to reach master, retrying");
                }
            }
            tokio::time::sleep(Duration::from_secs(cfg.register_retry_interval_secs)).await;
        }
    }

    async fn run(&mut self) -> Result<()> {
        let cfg = self.config_manager.config.clone();
        info!(
            worker_id = %cfg.worker_id,
            listen_address = %cfg.listen_address,
            master_url = %cfg.master_url,
            "starting worker"
        );

        self.register_with_retry().await?;

        let (shutdown_tx, _) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        self.task_handles.push(spawn_heartbeat_loop(
            Arc::clone(&self.executor),
            self.http.clone(),
            cfg.worker_id.clone(),
            cfg.master_url.clone(),
            Duration::from_secs(cfg.heartbeat_interval_secs),
            shutdown_tx.subscribe(),
        ));

        let app = api::create_router(api::AppState {
            executor: Arc::clone(&self.executor),
        });
        let listen_address: std::net::SocketAddr = cfg
            .listen_address
            .parse()
            .with_context(|| format!("invalid listen_address '{}'", cfg.listen_address))?;
        let listener = tokio::net::TcpListener::bind(listen_address)
            .await
            .with_context(|| format!("failed to bind to {listen_address}"))?;

        let shutdown_signal = {
            let mut rx = shutdown_tx.subscribe();
            async move {
                let _ = rx.recv().await;
                info!("HTTP server received shutdown signal");
            }
        };

        info!(version = WORKER_VERSION, worker_id = %cfg.worker_id, "worker listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| anyhow::anyhow!("server error: {e}"))?;

        Ok(())
    }

    async fn shutdown(&mut self) {
        info!("shutting down worker");
        let grace = Duration::from_secs(self.config_manager.config.graceful_shutdown_timeout_secs);

        if let Some(tx) = &self.shutdown_tx {
            let _ = tx.send(());
        }

        for handle in self.task_handles.drain(..) {
            match tokio::time::timeout(grace, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "background task panicked during shutdown"),
                Err(_) => warn!("background task did not exit within the grace period"),
            }
        }

        info!("worker shutdown complete");
    }
}

fn spawn_heartbeat_loop(
    executor: Arc<Executor>,
    http: reqwest::Client,
    worker_id: String,
    master_url: String,
    interval_secs: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let url = format!("{master_url}{}", endpoints::HEARTBEAT);
        let mut interval = tokio::time::interval(interval_secs);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let load = executor.synthetic_load();
                    let req = HeartbeatRequest {
                        worker_id: worker_id.clone(),
                        cpu_usage: load,
                        mem_usage: load,
                        gpu_usage: 0.0,
                        running_tasks: executor.running_task_ids(),
                    };
                    match http.post(&url).json(&req).send().await {
                        Ok(resp) if resp.status().is_success() => {}
                        Ok(resp) => warn!(status = %resp.status(), "master rejected heartbeat"),
                        Err(e) => warn!(error = %e, "failed to send heartbeat"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("heartbeat loop received shutdown signal");
                    break;
                }
            }
        }
    })
}

async fn setup_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let sigterm = signal(SignalKind::terminate());
        let sigint = signal(SignalKind::interrupt());

        match (sigterm, sigint) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("received SIGTERM"),
                    _ = sigint.recv() => info!("received SIGINT"),
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "failed to register signal handlers, falling back to Ctrl+C");
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("received Ctrl+C");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let file_appender = tracing_appender::rolling::daily("./logs", "worker.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("worker=info,shared=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    let cli_args = CliArgs::parse();
    info!(version = WORKER_VERSION, "worker starting up");

    let mut config_manager = match ConfigManager::new(cli_args.config_file) {
        Ok(manager) => manager,
        Err(e) => {
            error!(error = %e, "failed to load worker configuration");
            std::process::exit(1);
        }
    };

    if let Err(e) = config_manager.apply_cli_overrides(
        cli_args.worker_id,
        cli_args.listen_address,
        cli_args.advertise_address,
        cli_args.master_url,
    ) {
        error!(error = %e, "failed to apply configuration overrides");
        std::process::exit(1);
    }

    if let Err(e) = config_manager.finalize() {
        error!(error = %e, "invalid worker configuration");
        std::process::exit(1);
    }

    let mut worker = WorkerProcess::new(config_manager);

    tokio::select! {
        result = worker.run() => {
            if let Err(e) = result {
                error!(error = %e, "worker encountered a fatal error");
                std::process::exit(1);
            }
        }
        _ = setup_shutdown_signal() => {
            info!("shutdown signal received, initiating graceful shutdown");
        }
    }

    worker.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_process_new_builds_executor_from_config() {
        let mut config_manager = ConfigManager::new(None).unwrap();
        config_manager
            .apply_cli_overrides(
                Some("w1".to_string()),
                None,
                Some("127.0.0.1:7900".to_string()),
                Some("http://127.0.0.1:7700".to_string()),
            )
            .unwrap();
        config_manager.finalize().unwrap();

        let worker = WorkerProcess::new(config_manager);
        assert!(worker.executor.running_task_ids().is_empty());
    }
}
