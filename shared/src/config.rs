//! Configuration types for the master and worker binaries
//!
//! Each binary layers configuration the same way: built-in defaults, then an
//! optional TOML file, then environment variables, then CLI flags -- each
//! layer overriding the previous one. This module defines the structs that
//! carry the merged result; the per-binary `config::ConfigManager` (in
//! `master` and `worker`) owns the loading/overlay/reload mechanics.

use crate::defaults::*;
use crate::model::ResourceVector;
use crate::SchedulerError;
use serde::{Deserialize, Serialize};

/// Master configuration: scheduling cadence, persistence, and the RTS/AOD
/// knobs named in the control plane's "Configuration options" section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MasterConfig {
    #[serde(default = "default_master_listen_address")]
    pub listen_address: String,

    #[serde(default = "default_database_path")]
    pub database_path: String,

    #[serde(default = "default_params_path")]
    pub params_path: String,

    /// SLA multiplier `k`, clamped to [1.5, 2.5] at the point of use.
    #[serde(default = "default_sla_multiplier")]
    pub sla_multiplier: f64,

    #[serde(default = "default_reload_interval_secs")]
    pub reload_interval_secs: u64,

    #[serde(default = "default_train_interval_secs")]
    pub train_interval_secs: u64,

    #[serde(default = "default_stale_timeout_secs")]
    pub stale_timeout_secs: u64,

    #[serde(default = "default_stale_check_interval_secs")]
    pub stale_check_interval_secs: u64,

    #[serde(default = "default_heartbeat_mailbox_size")]
    pub heartbeat_mailbox_size: usize,

    #[serde(default = "default_schedule_tick_secs")]
    pub schedule_tick_secs: u64,

    #[serde(default = "default_history_window_hours")]
    pub history_window_hours: u64,

    #[serde(default = "default_assignment_rpc_timeout_secs")]
    pub assignment_rpc_timeout_secs: u64,

    #[serde(default = "default_cancellation_rpc_timeout_secs")]
    pub cancellation_rpc_timeout_secs: u64,

    #[serde(default = "default_params_reload_read_timeout_secs")]
    pub params_reload_read_timeout_secs: u64,

    #[serde(default = "default_history_query_timeout_secs")]
    pub history_query_timeout_secs: u64,

    #[serde(default = "default_graceful_shutdown_timeout_secs")]
    pub graceful_shutdown_timeout_secs: u64,

    #[serde(default = "default_database_busy_timeout_secs")]
    pub database_busy_timeout_secs: u64,

    #[serde(default = "default_channel_buffer_size")]
    pub channel_buffer_size: usize,

    #[serde(default = "default_n_min_bootstrap")]
    pub n_min_bootstrap: usize,

    #[serde(default = "default_n_min_training")]
    pub n_min_training: usize,

    #[serde(default = "default_ema_lambda")]
    pub ema_lambda: f64,
}

impl Default for MasterConfig {
    fn default() -> Self {
        MasterConfig {
            listen_address: default_master_listen_address(),
            database_path: default_database_path(),
            params_path: default_params_path(),
            sla_multiplier: default_sla_multiplier(),
            reload_interval_secs: default_reload_interval_secs(),
            train_interval_secs: default_train_interval_secs(),
            stale_timeout_secs: default_stale_timeout_secs(),
            stale_check_interval_secs: default_stale_check_interval_secs(),
            heartbeat_mailbox_size: default_heartbeat_mailbox_size(),
            schedule_tick_secs: default_schedule_tick_secs(),
            history_window_hours: default_history_window_hours(),
            assignment_rpc_timeout_secs: default_assignment_rpc_timeout_secs(),
            cancellation_rpc_timeout_secs: default_cancellation_rpc_timeout_secs(),
            params_reload_read_timeout_secs: default_params_reload_read_timeout_secs(),
            history_query_timeout_secs: default_history_query_timeout_secs(),
            graceful_shutdown_timeout_secs: default_graceful_shutdown_timeout_secs(),
            database_busy_timeout_secs: default_database_busy_timeout_secs(),
            channel_buffer_size: default_channel_buffer_size(),
            n_min_bootstrap: default_n_min_bootstrap(),
            n_min_training: default_n_min_training(),
            ema_lambda: default_ema_lambda(),
        }
    }
}

impl MasterConfig {
    /// Overlays environment variables named `MASTER_<FIELD_UPPER>` onto this
    /// config, mutating in place. Malformed values are logged by the caller
    /// and left at their prior value (see `master::config::ConfigManager`).
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("MASTER_LISTEN_ADDRESS") {
            self.listen_address = v;
        }
        if let Ok(v) = std::env::var("MASTER_DATABASE_PATH") {
            self.database_path = v;
        }
        if let Ok(v) = std::env::var("MASTER_PARAMS_PATH") {
            self.params_path = v;
        }
        if let Ok(v) = env_f64("MASTER_SLA_MULTIPLIER") {
            self.sla_multiplier = v;
        }
        if let Ok(v) = env_u64("MASTER_RELOAD_INTERVAL_SECS") {
            self.reload_interval_secs = v;
        }
        if let Ok(v) = env_u64("MASTER_TRAIN_INTERVAL_SECS") {
            self.train_interval_secs = v;
        }
        if let Ok(v) = env_u64("MASTER_STALE_TIMEOUT_SECS") {
            self.stale_timeout_secs = v;
        }
        if let Ok(v) = env_usize("MASTER_HEARTBEAT_MAILBOX_SIZE") {
            self.heartbeat_mailbox_size = v;
        }
        if let Ok(v) = env_u64("MASTER_SCHEDULE_TICK_SECS") {
            self.schedule_tick_secs = v;
        }
    }

    /// Clamps/validates fields that have hard bounds in the spec. Never
    /// fails: out-of-range values are clamped and the caller is expected to
    /// log at the call site if it cares.
    pub fn normalize(&mut self) {
        self.sla_multiplier = crate::utils::clamp(self.sla_multiplier, 1.5, 2.5);
        self.stale_check_interval_secs = self.stale_check_interval_secs.max(1);
        self.schedule_tick_secs = self.schedule_tick_secs.max(1);
        self.reload_interval_secs = self.reload_interval_secs.max(1);
        self.train_interval_secs = self.train_interval_secs.max(1);
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.listen_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(SchedulerError::Validation(format!(
                "invalid listen_address: {}",
                self.listen_address
            )));
        }
        if self.heartbeat_mailbox_size == 0 {
            return Err(SchedulerError::Validation(
                "heartbeat_mailbox_size must be greater than 0".to_string(),
            ));
        }
        if !(1.5..=2.5).contains(&self.sla_multiplier) {
            return Err(SchedulerError::Validation(format!(
                "sla_multiplier {} outside [1.5, 2.5]",
                self.sla_multiplier
            )));
        }
        Ok(())
    }
}

/// Worker configuration: identity, advertised totals, and the master it
/// reports to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    pub worker_id: String,

    #[serde(default = "default_worker_listen_address")]
    pub listen_address: String,

    /// Address this worker advertises to the master at registration time
    /// (may differ from `listen_address` behind NAT/containers).
    pub advertise_address: String,

    pub master_url: String,

    #[serde(default)]
    pub total: ResourceVector,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_register_retry_interval_secs")]
    pub register_retry_interval_secs: u64,

    #[serde(default = "default_graceful_shutdown_timeout_secs")]
    pub graceful_shutdown_timeout_secs: u64,

    #[serde(default = "default_execution_jitter_fraction")]
    pub execution_jitter_fraction: f64,
}

impl WorkerConfig {
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WORKER_ID") {
            self.worker_id = v;
        }
        if let Ok(v) = std::env::var("WORKER_LISTEN_ADDRESS") {
            self.listen_address = v;
        }
        if let Ok(v) = std::env::var("WORKER_ADVERTISE_ADDRESS") {
            self.advertise_address = v;
        }
        if let Ok(v) = std::env::var("WORKER_MASTER_URL") {
            self.master_url = v;
        }
        if let Ok(v) = env_u64("WORKER_HEARTBEAT_INTERVAL_SECS") {
            self.heartbeat_interval_secs = v;
        }
        if let Ok(v) = env_f64("WORKER_TOTAL_CPU") {
            self.total.cpu = v;
        }
        if let Ok(v) = env_f64("WORKER_TOTAL_MEMORY") {
            self.total.memory = v;
        }
        if let Ok(v) = env_f64("WORKER_TOTAL_STORAGE") {
            self.total.storage = v;
        }
        if let Ok(v) = env_f64("WORKER_TOTAL_GPU") {
            self.total.gpu = v;
        }
    }

    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.worker_id.trim().is_empty() {
            return Err(SchedulerError::Validation(
                "worker_id must not be empty".to_string(),
            ));
        }
        if self.listen_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(SchedulerError::Validation(format!(
                "invalid listen_address: {}",
                self.listen_address
            )));
        }
        if self.master_url.trim().is_empty() {
            return Err(SchedulerError::Validation(
                "master_url must not be empty".to_string(),
            ));
        }
        if !self.total.is_non_negative() {
            return Err(SchedulerError::Validation(
                "total resource vector must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_f64(key: &str) -> Result<f64, ()> {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).ok_or(())
}

fn env_u64(key: &str) -> Result<u64, ()> {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).ok_or(())
}

fn env_usize(key: &str) -> Result<usize, ()> {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).ok_or(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_config_default_validates() {
        let config = MasterConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_master_config_normalize_clamps_sla_multiplier() {
        let mut config = MasterConfig {
            sla_multiplier: 9.0,
            ..MasterConfig::default()
        };
        config.normalize();
        assert_eq!(config.sla_multiplier, 2.5);
    }

    #[test]
    fn test_master_config_rejects_bad_listen_address() {
        let config = MasterConfig {
            listen_address: "not-an-address".to_string(),
            ..MasterConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_worker_config_validate_requires_worker_id() {
        let config = WorkerConfig {
            worker_id: "".to_string(),
            listen_address: default_worker_listen_address(),
            advertise_address: "127.0.0.1:7800".to_string(),
            master_url: "http://127.0.0.1:7700".to_string(),
            total: ResourceVector::default(),
            heartbeat_interval_secs: 5,
            register_retry_interval_secs: 5,
            graceful_shutdown_timeout_secs: 30,
            execution_jitter_fraction: 0.1,
        };
        assert!(config.validate().is_err());
    }
}
