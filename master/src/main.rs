//! Master control plane binary
//!
//! Wires together persistence, the in-memory worker registry and task queue,
//! the RTS scheduling strategy, the telemetry fan-out, and the AOD trainer,
//! then drives them from a handful of independent background loops plus the
//! HTTP server the router in `api` exposes.

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

const MASTER_VERSION: &str = env!("CARGO_PKG_VERSION");

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

mod api;
mod config;
mod database;
mod queue;
mod registry;
mod rts;
mod service;
mod strategy;
mod tau_store;
mod telemetry;
mod trainer;

use config::ConfigManager;
use database::SqliteStore;
use queue::{QueueEntry, TaskQueue};
use registry::WorkerRegistry;
use rts::RtsStrategy;
use service::SchedulingService;
use strategy::SchedulerStrategy;
use tau_store::TauStore;
use telemetry::TelemetryManager;
use trainer::Trainer;

#[derive(Parser, Debug)]
#[command(name = "master")]
#[command(about = "Distributed task-scheduling control plane", long_about = None)]
struct CliArgs {
    /// Path to the master configuration file (master.toml). May point at a
    /// file or a directory containing one; falls back to compiled defaults
    /// if absent.
    #[arg(value_name = "CONFIG_FILE")]
    config_file: Option<PathBuf>,

    #[arg(long = "listen-address", value_name = "ADDRESS")]
    listen_address: Option<String>,

    #[arg(long = "database-path", value_name = "PATH")]
    database_path: Option<String>,

    #[arg(long = "params-path", value_name = "PATH")]
    params_path: Option<String>,

    #[arg(long = "sla-multiplier", value_name = "K")]
    sla_multiplier: Option<f64>,

    #[arg(long = "schedule-tick-secs", value_name = "SECONDS")]
    schedule_tick_secs: Option<u64>,
}

/// Owns every long-lived component plus the handles needed to shut them down
/// in order.
struct Master {
    config_manager: ConfigManager,
    listen_address: SocketAddr,
    shutdown_tx: Option<broadcast::Sender<()>>,
    task_handles: Vec<JoinHandle<()>>,
    telemetry: Option<Arc<TelemetryManager>>,
}

impl Master {
    fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let config_manager = ConfigManager::new(config_path)?;
        let listen_address: SocketAddr = config_manager.config.listen_address.parse().map_err(|e| {
            anyhow::anyhow!(
                "invalid listen_address '{}': {}",
                config_manager.config.listen_address,
                e
            )
        })?;

        Ok(Master {
            config_manager,
            listen_address,
            shutdown_tx: None,
            task_handles: Vec::new(),
            telemetry: None,
        })
    }

    async fn run(&mut self) -> Result<()> {
        let cfg = self.config_manager.config.clone();
        info!(
            listen_address = %self.listen_address,
            database_path = %cfg.database_path,
            params_path = %cfg.params_path,
            "starting master control plane"
        );

        let store = Arc::new(
            SqliteStore::open(&cfg.database_path, Duration::from_secs(cfg.database_busy_timeout_secs))
                .await
                .context("failed to open scheduler database")?,
        );

        let persisted_workers = store.list_workers().await.context("failed to load workers")?;
        let registry = Arc::new(WorkerRegistry::load(persisted_workers));

        let persisted_queue: Vec<QueueEntry> = store
            .list_queued_tasks()
            .await
            .context("failed to load queued tasks")?
            .into_iter()
            .map(|t| QueueEntry {
                task_id: t.task_id,
                retry_count: t.retry_count,
                last_error: t.last_error,
            })
            .collect();
        let queue = Arc::new(TaskQueue::load(persisted_queue));

        let tau_store = Arc::new(TauStore::new(cfg.ema_lambda));

        let params_path = PathBuf::from(&cfg.params_path);
        let rts = Arc::new(RtsStrategy::new(Arc::clone(&tau_store)));
        rts.reload_from_file(&params_path).await;
        let strategy: Arc<dyn SchedulerStrategy + Send + Sync> = Arc::clone(&rts) as Arc<dyn SchedulerStrategy + Send + Sync>;

        let telemetry = Arc::new(TelemetryManager::new(cfg.heartbeat_mailbox_size));
        for worker in registry.snapshot_all() {
            if worker.is_active {
                telemetry.register_worker(&worker.worker_id);
            }
        }
        self.telemetry = Some(Arc::clone(&telemetry));

        let (wake_tx, wake_rx) = mpsc::channel(cfg.channel_buffer_size);

        let service = Arc::new(SchedulingService::new(
            Arc::clone(&registry),
            Arc::clone(&queue),
            Arc::clone(&tau_store),
            strategy,
            Arc::clone(&store),
            Arc::clone(&telemetry),
            wake_tx,
            Duration::from_secs(cfg.assignment_rpc_timeout_secs),
            Duration::from_secs(cfg.cancellation_rpc_timeout_secs),
        ));

        let (shutdown_tx, _) = broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        self.task_handles.push(spawn_scheduling_loop(
            Arc::clone(&service),
            wake_rx,
            Duration::from_secs(cfg.schedule_tick_secs),
            shutdown_tx.subscribe(),
        ));
        self.task_handles.push(spawn_stale_check_loop(
            Arc::clone(&service),
            Duration::from_secs(cfg.stale_check_interval_secs),
            cfg.stale_timeout_secs as f64,
            shutdown_tx.subscribe(),
        ));
        self.task_handles.push(spawn_rts_reload_loop(
            Arc::clone(&rts),
            params_path,
            Duration::from_secs(cfg.reload_interval_secs),
            shutdown_tx.subscribe(),
        ));
        self.task_handles.push(spawn_trainer_loop(
            Trainer::new(
                Arc::clone(&store),
                PathBuf::from(&cfg.params_path),
                cfg.n_min_bootstrap,
                cfg.n_min_training,
                cfg.history_window_hours as f64,
            ),
            Duration::from_secs(cfg.train_interval_secs),
            shutdown_tx.subscribe(),
        ));
        self.task_handles.push(spawn_wal_checkpoint_loop(
            Arc::clone(&store),
            Duration::from_secs(cfg.database_busy_timeout_secs.max(60)),
            shutdown_tx.subscribe(),
        ));

        let app = api::create_router(api::AppState { service });
        let listener = tokio::net::TcpListener::bind(self.listen_address)
            .await
            .with_context(|| format!("failed to bind to {}", self.listen_address))?;

        let shutdown_signal = {
            let mut rx = shutdown_tx.subscribe();
            async move {
                let _ = rx.recv().await;
                info!("HTTP server received shutdown signal");
            }
        };

        info!(version = MASTER_VERSION, "master control plane listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal)
            .await
            .map_err(|e| anyhow::anyhow!("server error: {e}"))?;

        Ok(())
    }

    async fn shutdown(&mut self) {
        info!("shutting down master control plane");
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

        if let Some(telemetry) = &self.telemetry {
            telemetry.shutdown(grace).await;
        }

        info!("master control plane shutdown complete");
    }
}

fn spawn_scheduling_loop(
    service: Arc<SchedulingService>,
    mut wake_rx: mpsc::Receiver<()>,
    tick: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        loop {
            tokio::select! {
                _ = interval.tick() => service.run_scheduling_tick().await,
                Some(()) = wake_rx.recv() => service.run_scheduling_tick().await,
                _ = shutdown_rx.recv() => {
                    info!("scheduling loop received shutdown signal");
                    break;
                }
            }
        }
    })
}

fn spawn_stale_check_loop(
    service: Arc<SchedulingService>,
    interval_secs: Duration,
    timeout_secs: f64,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval_secs);
        loop {
            tokio::select! {
                _ = interval.tick() => service.run_stale_check(timeout_secs),
                _ = shutdown_rx.recv() => {
                    info!("stale-check loop received shutdown signal");
                    break;
                }
            }
        }
    })
}

fn spawn_rts_reload_loop(
    rts: Arc<RtsStrategy>,
    params_path: PathBuf,
    interval_secs: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval_secs);
        loop {
            tokio::select! {
                _ = interval.tick() => rts.reload_from_file(&params_path).await,
                _ = shutdown_rx.recv() => {
                    info!("RTS reload loop received shutdown signal");
                    break;
                }
            }
        }
    })
}

fn spawn_trainer_loop(
    trainer: Trainer,
    interval_secs: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval_secs);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(err) = trainer.run_once().await {
                        error!(error = %err, "AOD training pass failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("trainer loop received shutdown signal");
                    break;
                }
            }
        }
    })
}

fn spawn_wal_checkpoint_loop(
    store: Arc<SqliteStore>,
    interval_secs: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(interval_secs);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match store.checkpoint_wal().await {
                        Ok(frames) => info!(frames, "WAL checkpoint complete"),
                        Err(err) => warn!(error = %err, "WAL checkpoint failed"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("WAL checkpoint loop received shutdown signal");
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
    let file_appender = tracing_appender::rolling::daily("./logs", "master.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("master=info,shared=info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .with_writer(non_blocking)
        .init();

    let cli_args = CliArgs::parse();
    info!(version = MASTER_VERSION, "master control plane starting up");

    let mut master = match Master::new(cli_args.config_file) {
        Ok(master) => master,
        Err(e) => {
            error!(error = %e, "failed to initialize master");
            std::process::exit(1);
        }
    };

    let has_overrides = cli_args.listen_address.is_some()
        || cli_args.database_path.is_some()
        || cli_args.params_path.is_some()
        || cli_args.sla_multiplier.is_some()
        || cli_args.schedule_tick_secs.is_some();

    if has_overrides {
        let changed = match master.config_manager.override_and_persist_config(
            cli_args.listen_address,
            cli_args.database_path,
            cli_args.params_path,
            cli_args.sla_multiplier,
            cli_args.schedule_tick_secs,
        ) {
            Ok(changed) => changed,
            Err(e) => {
                error!(error = %e, "failed to apply configuration overrides");
                std::process::exit(1);
            }
        };

        if changed {
            info!("configuration overrides applied and persisted to disk");
            master.listen_address = master
                .config_manager
                .config
                .listen_address
                .parse()
                .unwrap_or(master.listen_address);
        }
    }

    tokio::select! {
        result = master.run() => {
            if let Err(e) = result {
                error!(error = %e, "master encountered a fatal error");
                std::process::exit(1);
            }
        }
        _ = setup_shutdown_signal() => {
            info!("shutdown signal received, initiating graceful shutdown");
        }
    }

    master.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_new_without_config_file_uses_defaults() {
        let master = Master::new(None).unwrap();
        assert_eq!(
            master.listen_address.to_string(),
            shared::config::MasterConfig::default().listen_address
        );
    }
}
