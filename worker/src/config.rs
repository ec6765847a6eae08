//! Configuration management for the worker executor
//!
//! Layers configuration the same way the master does: an optional
//! `worker.toml` file, overlaid by environment variables, then CLI flags.
//! Unlike `MasterConfig`, `WorkerConfig` has no meaningful defaults for
//! `worker_id`/`advertise_address`/`master_url` — a config file or CLI flags
//! must supply them, and `load_config` fails loudly if they're still missing
//! after loading.

use anyhow::{Context, Result};
use shared::config::WorkerConfig;
use std::path::PathBuf;
use tracing::{debug, info};

const WORKER_CONFIG_FILE: &str = "worker.toml";

pub struct ConfigManager {
    pub config_path: Option<PathBuf>,
    pub config: WorkerConfig,
}

impl ConfigManager {
    /// Loads configuration from `config_path` if given (accepting either a
    /// direct file path or a directory containing `worker.toml`). With no
    /// config file, the caller must fill in `worker_id`/`advertise_address`/
    /// `master_url` via CLI overrides before `run()`.
    pub fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let config_path = config_path.map(|p| {
            if p.is_dir() {
                p.join(WORKER_CONFIG_FILE)
            } else {
                p
            }
        });

        let config = match &config_path {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "loading worker configuration");
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                toml::from_str::<WorkerConfig>(&content)
                    .with_context(|| format!("failed to parse {}", path.display()))?
            }
            Some(path) => {
                debug!(path = %path.display(), "no config file present, starting from an empty worker config");
                empty_config()
            }
            None => empty_config(),
        };

        Ok(ConfigManager { config_path, config })
    }

    /// Applies env overrides, then normalizes/validates. Call once CLI
    /// overrides (which take priority and are applied separately) have also
    /// been folded in.
    pub fn finalize(&mut self) -> Result<()> {
        self.config.apply_env_overrides();
        self.config.validate().context("invalid worker configuration")?;
        debug!(
            worker_id = %self.config.worker_id,
            listen_address = %self.config.listen_address,
            master_url = %self.config.master_url,
            "worker configuration finalized"
        );
        Ok(())
    }

    /// Applies CLI overrides on top of the loaded config, persisting to
    /// `config_path` if one was configured. Returns whether anything
    /// actually changed. Does not validate — call `finalize` afterward.
    #[allow(clippy::too_many_arguments)]
    pub fn apply_cli_overrides(
        &mut self,
        worker_id: Option<String>,
        listen_address: Option<String>,
        advertise_address: Option<String>,
        master_url: Option<String>,
    ) -> Result<bool> {
        let mut changed = false;

        if let Some(v) = worker_id {
            if self.config.worker_id != v {
                self.config.worker_id = v;
                changed = true;
            }
        }
        if let Some(v) = listen_address {
            if self.config.listen_address != v {
                self.config.listen_address = v;
                changed = true;
            }
        }
        if let Some(v) = advertise_address {
            if self.config.advertise_address != v {
                self.config.advertise_address = v;
                changed = true;
            }
        }
        if let Some(v) = master_url {
            if self.config.master_url != v {
                self.config.master_url = v;
                changed = true;
            }
        }

        if changed {
            if let Some(path) = &self.config_path {
                let serialized = toml::to_string_pretty(&self.config)
                    .context("failed to serialize worker configuration")?;
                std::fs::write(path, serialized)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!(path = %path.display(), "worker configuration persisted");
            }
        }

        Ok(changed)
    }
}

fn empty_config() -> WorkerConfig {
    toml::from_str("worker_id = \"\"\nadvertise_address = \"\"\nmaster_url = \"\"\n")
        .expect("empty worker config template must parse")
}
