//! Configuration management for the master control plane
//!
//! Layers configuration in order: built-in defaults from
//! `shared::config::MasterConfig`, overlaid by an optional `master.toml`
//! file, then environment variables, then CLI flags. Each layer only
//! overrides what it actually sets.

use anyhow::{Context, Result};
use shared::config::MasterConfig;
use std::path::PathBuf;
use tracing::{debug, info};

const MASTER_CONFIG_FILE: &str = "master.toml";

/// Owns the loaded `MasterConfig` plus the path it was (optionally) loaded
/// from, and the overlay/reload/persist mechanics the shared struct itself
/// doesn't know about.
pub struct ConfigManager {
    pub config_path: Option<PathBuf>,
    pub config: MasterConfig,
}

impl ConfigManager {
    /// Loads configuration from `config_path` if given (accepting either a
    /// direct file path or a directory containing `master.toml`), falling
    /// back to compiled defaults when no path is given or the file doesn't
    /// exist yet. Env overrides are always applied on top.
    pub fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let config_path = config_path.map(|p| {
            if p.is_dir() {
                p.join(MASTER_CONFIG_FILE)
            } else {
                p
            }
        });

        let mut manager = ConfigManager {
            config_path,
            config: MasterConfig::default(),
        };
        manager.load_config()?;
        Ok(manager)
    }

    /// (Re-)reads the config file (if any) and applies env overrides, then
    /// normalizes and validates.
    pub fn load_config(&mut self) -> Result<()> {
        let mut config = match &self.config_path {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "loading master configuration");
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                toml::from_str::<MasterConfig>(&content)
                    .with_context(|| format!("failed to parse {}", path.display()))?
            }
            Some(path) => {
                debug!(path = %path.display(), "no config file present, using defaults");
                MasterConfig::default()
            }
            None => MasterConfig::default(),
        };

        config.apply_env_overrides();
        config.normalize();
        config.validate().context("invalid master configuration")?;

        debug!(
            listen_address = %config.listen_address,
            database_path = %config.database_path,
            params_path = %config.params_path,
            sla_multiplier = config.sla_multiplier,
            "master configuration loaded"
        );

        self.config = config;
        Ok(())
    }

    pub fn reload_config(&mut self) -> Result<bool> {
        let old = self.config.clone();
        self.load_config()?;
        Ok(old != self.config)
    }

    /// Applies CLI overrides on top of the loaded config, persisting to
    /// `config_path` if one was configured. Returns whether anything
    /// actually changed.
    #[allow(clippy::too_many_arguments)]
    pub fn override_and_persist_config(
        &mut self,
        listen_address: Option<String>,
        database_path: Option<String>,
        params_path: Option<String>,
        sla_multiplier: Option<f64>,
        schedule_tick_secs: Option<u64>,
    ) -> Result<bool> {
        let mut changed = false;
        let mut config = self.config.clone();

        if let Some(v) = listen_address {
            if config.listen_address != v {
                info!(from = %config.listen_address, to = %v, "overriding listen_address");
                config.listen_address = v;
                changed = true;
            }
        }
        if let Some(v) = database_path {
            if config.database_path != v {
                config.database_path = v;
                changed = true;
            }
        }
        if let Some(v) = params_path {
            if config.params_path != v {
                config.params_path = v;
                changed = true;
            }
        }
        if let Some(v) = sla_multiplier {
            if config.sla_multiplier != v {
                config.sla_multiplier = v;
                changed = true;
            }
        }
        if let Some(v) = schedule_tick_secs {
            if config.schedule_tick_secs != v {
                config.schedule_tick_secs = v;
                changed = true;
            }
        }

        if changed {
            config.normalize();
            config.validate().context("invalid configuration after CLI overrides")?;
            self.config = config;

            if let Some(path) = &self.config_path {
                let serialized = toml::to_string_pretty(&self.config)
                    .context("failed to serialize master configuration")?;
                std::fs::write(path, serialized)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!(path = %path.display(), "master configuration persisted");
            }
        }

        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_without_path_uses_defaults() {
        let manager = ConfigManager::new(None).unwrap();
        assert_eq!(manager.config.listen_address, MasterConfig::default().listen_address);
    }

    #[test]
    fn test_new_with_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::new(Some(dir.path().join(MASTER_CONFIG_FILE))).unwrap();
        assert_eq!(manager.config.sla_multiplier, MasterConfig::default().sla_multiplier);
    }

    #[test]
    fn test_override_and_persist_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MASTER_CONFIG_FILE);
        let mut manager = ConfigManager::new(Some(path.clone())).unwrap();

        let changed = manager
            .override_and_persist_config(Some("0.0.0.0:9999".to_string()), None, None, None, None)
            .unwrap();
        assert!(changed);
        assert!(path.exists());

        let reloaded = ConfigManager::new(Some(path)).unwrap();
        assert_eq!(reloaded.config.listen_address, "0.0.0.0:9999");
    }

    #[test]
    fn test_override_rejects_invalid_listen_address() {
        let mut manager = ConfigManager::new(None).unwrap();
        let result = manager.override_and_persist_config(
            Some("not-an-address".to_string()),
            None,
            None,
            None,
            None,
        );
        assert!(result.is_err());
    }
}
