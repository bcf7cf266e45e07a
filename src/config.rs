use crate::{
    copy::CopyOptions,
    esi::DEFAULT_NAMES_ENDPOINT,
    resolver::{ResolverSettings, MAX_BATCH_SIZE},
};
use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

const CONFIG_FILE: &str = "config.json";
const NAME_CACHE_FILE: &str = "name_cache.json";
const NOTES_FILE: &str = "notes.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    pub endpoint: String,
    pub batch_size: usize,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub parallel_batches: usize,
    pub cache_ttl_secs: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_NAMES_ENDPOINT.to_string(),
            batch_size: MAX_BATCH_SIZE,
            timeout_secs: 10,
            max_attempts: 3,
            parallel_batches: 4,
            cache_ttl_secs: 30 * 24 * 60 * 60,
        }
    }
}

impl ResolverConfig {
    pub fn settings(&self) -> ResolverSettings {
        ResolverSettings {
            batch_size: self.batch_size,
            max_attempts: self.max_attempts,
            parallel_batches: self.parallel_batches,
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Extra settings locations probed after the built-in ones.
    pub custom_paths: Vec<PathBuf>,
    pub resolver: ResolverConfig,
    pub copy: CopyOptions,
}

impl AppConfig {
    pub fn load_or_create() -> Result<Self> {
        Self::load_or_create_in(&base_data_dir()?)
    }

    pub fn load_or_create_in(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir).context("create app data dir")?;
        let path = data_dir.join(CONFIG_FILE);
        if path.exists() {
            let raw = fs::read_to_string(&path).context("read app config")?;
            let config: AppConfig = serde_json::from_str(&raw).context("parse app config")?;
            return Ok(config);
        }

        let config = AppConfig::default();
        config.save_in(data_dir)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_in(&base_data_dir()?)
    }

    pub fn save_in(&self, data_dir: &Path) -> Result<()> {
        fs::create_dir_all(data_dir).context("create app data dir")?;
        let raw = serde_json::to_string_pretty(self).context("serialize app config")?;
        fs::write(data_dir.join(CONFIG_FILE), raw).context("write app config")?;
        Ok(())
    }
}

pub fn base_data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("podsmith"))
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE)
}

pub fn name_cache_path(data_dir: &Path) -> PathBuf {
    data_dir.join(NAME_CACHE_FILE)
}

pub fn notes_path(data_dir: &Path) -> PathBuf {
    data_dir.join(NOTES_FILE)
}

pub fn backups_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("backups")
}

pub fn log_path(data_dir: &Path) -> PathBuf {
    data_dir.join("podsmith.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_run_writes_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data_dir = dir.path().join("podsmith");

        let config = AppConfig::load_or_create_in(&data_dir).expect("create");

        assert_eq!(config, AppConfig::default());
        assert!(!config.copy.create_missing);
        assert!(data_dir.join(CONFIG_FILE).is_file());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{ "custom_paths": ["/games/eve"], "resolver": { "batch_size": 250 } }"#,
        )
        .expect("seed");

        let config = AppConfig::load_or_create_in(dir.path()).expect("load");

        assert_eq!(config.custom_paths, vec![PathBuf::from("/games/eve")]);
        assert_eq!(config.resolver.batch_size, 250);
        assert_eq!(config.resolver.timeout_secs, 10);
        assert_eq!(config.resolver.endpoint, DEFAULT_NAMES_ENDPOINT);
        assert!(!config.copy.create_missing);
    }

    #[test]
    fn save_then_load_keeps_changes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = AppConfig::default();
        config.copy.create_missing = true;
        config.resolver.parallel_batches = 1;
        config.save_in(dir.path()).expect("save");

        let loaded = AppConfig::load_or_create_in(dir.path()).expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn broken_config_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(CONFIG_FILE), "{").expect("seed");
        assert!(AppConfig::load_or_create_in(dir.path()).is_err());
    }

    #[test]
    fn resolver_settings_follow_config() {
        let config = ResolverConfig {
            cache_ttl_secs: 60,
            timeout_secs: 0,
            ..ResolverConfig::default()
        };
        assert_eq!(config.settings().cache_ttl, Duration::from_secs(60));
        assert_eq!(config.timeout(), Duration::from_secs(1));
    }
}
