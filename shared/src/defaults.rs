//! Default values for configuration parameters
//!
//! This module centralizes all default value functions used by the configuration
//! structures. These functions are used by serde when deserializing configuration
//! files that don't specify certain optional fields, and by the CLI layer when no
//! override flag or environment variable is present.

/// Default SLA multiplier `k` applied to a task's tau to compute its deadline.
pub fn default_sla_multiplier() -> f64 {
    2.0
}

/// Default path to the atomically-published RTS parameters file.
pub fn default_params_path() -> String {
    "config/ga_output.json".to_string()
}

/// Default RTS parameter reload interval, seconds (T_reload).
pub fn default_reload_interval_secs() -> u64 {
    30
}

/// Default AOD trainer interval, seconds (T_train).
pub fn default_train_interval_secs() -> u64 {
    60
}

/// Default worker heartbeat staleness timeout, seconds.
pub fn default_stale_timeout_secs() -> u64 {
    30
}

/// Default interval at which the stale-worker checker runs (T_stale/2).
pub fn default_stale_check_interval_secs() -> u64 {
    15
}

/// Default bounded-mailbox capacity for per-worker heartbeat fan-out.
pub fn default_heartbeat_mailbox_size() -> usize {
    10
}

/// Default scheduling loop tick interval, seconds (T_sched).
pub fn default_schedule_tick_secs() -> u64 {
    5
}

/// Default lookback window for the AOD trainer's history/stats queries, hours.
pub fn default_history_window_hours() -> u64 {
    24
}

/// Default listen address for the master's HTTP surface.
pub fn default_master_listen_address() -> String {
    "0.0.0.0:7700".to_string()
}

/// Default listen address for the worker's HTTP surface (AssignTask/CancelTask).
pub fn default_worker_listen_address() -> String {
    "0.0.0.0:7800".to_string()
}

/// Default path to the master's SQLite database file.
pub fn default_database_path() -> String {
    "data/scheduler.db".to_string()
}

/// Default timeout for the assignment RPC (master -> worker), seconds.
pub fn default_assignment_rpc_timeout_secs() -> u64 {
    10
}

/// Default timeout for the cancellation RPC (master -> worker), seconds. Fired
/// asynchronously, so this bound is generous relative to the assignment RPC.
pub fn default_cancellation_rpc_timeout_secs() -> u64 {
    30
}

/// Default timeout for a single params-file reload read inside RTS, seconds.
pub fn default_params_reload_read_timeout_secs() -> u64 {
    1
}

/// Default timeout for a history/stats query issued by the trainer, seconds.
pub fn default_history_query_timeout_secs() -> u64 {
    5
}

/// Default graceful shutdown grace period for background tasks, seconds.
pub fn default_graceful_shutdown_timeout_secs() -> u64 {
    30
}

/// Default SQLite busy timeout, seconds.
pub fn default_database_busy_timeout_secs() -> u64 {
    5
}

/// Default capacity for internal wake-up / submission channels.
pub fn default_channel_buffer_size() -> usize {
    64
}

/// Default interval at which a worker sends heartbeats to the master, seconds.
pub fn default_heartbeat_interval_secs() -> u64 {
    5
}

/// Default interval at which a worker retries registration if the master is
/// unreachable at startup, seconds.
pub fn default_register_retry_interval_secs() -> u64 {
    5
}

/// Minimum history rows required for the trainer to bootstrap at all (N_min,
/// cold-start case); below this it writes defaults and returns.
pub fn default_n_min_bootstrap() -> usize {
    2
}

/// Minimum history rows required for the trainer to consider its fit
/// meaningful rather than a bootstrap placeholder.
pub fn default_n_min_training() -> usize {
    10
}

/// EMA smoothing factor (λ) used by the tau store.
pub fn default_ema_lambda() -> f64 {
    0.2
}

/// Default jitter fraction applied to the worker's simulated execution sleep.
pub fn default_execution_jitter_fraction() -> f64 {
    0.1
}
