//! warmpool.toml configuration parser.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration with prebuilds and quotas disabled.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};

/// Forces the store-backed prebuild implementations on.
pub const DEV_PREBUILDS_ENV: &str = "WARMPOOL_DEV_PREBUILDS";
/// Forces the store-backed quota committer on.
pub const DEV_QUOTAS_ENV: &str = "WARMPOOL_DEV_QUOTAS";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub prebuilds: PrebuildsConfig,
    pub quotas: QuotasConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 7080)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/warmpool"),
        }
    }
}

impl StoreConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("warmpool.redb")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrebuildsConfig {
    pub enabled: bool,
    pub metrics_interval_secs: u64,
    pub metrics_timeout_secs: u64,
}

impl Default for PrebuildsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            metrics_interval_secs: warmpool_metrics::DEFAULT_UPDATE_INTERVAL.as_secs(),
            metrics_timeout_secs: warmpool_metrics::DEFAULT_UPDATE_TIMEOUT.as_secs(),
        }
    }
}

impl PrebuildsConfig {
    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs)
    }

    pub fn metrics_timeout(&self) -> Duration {
        Duration::from_secs(self.metrics_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotasConfig {
    pub enabled: bool,
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: DaemonConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply the development switches. Only the exact value `true` counts.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if lookup(DEV_PREBUILDS_ENV).as_deref() == Some("true") {
            self.prebuilds.enabled = true;
        }
        if lookup(DEV_QUOTAS_ENV).as_deref() == Some("true") {
            self.quotas.enabled = true;
        }
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let p = &self.prebuilds;
        if p.metrics_timeout_secs == 0 {
            bail!("prebuilds.metrics_timeout_secs must be greater than 0");
        }
        if p.metrics_timeout_secs >= p.metrics_interval_secs {
            bail!(
                "prebuilds.metrics_timeout_secs ({}) must be shorter than prebuilds.metrics_interval_secs ({})",
                p.metrics_timeout_secs,
                p.metrics_interval_secs
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = DaemonConfig::parse("").unwrap();
        assert_eq!(config, DaemonConfig::default());
        assert!(!config.prebuilds.enabled);
        assert!(!config.quotas.enabled);
        assert_eq!(config.prebuilds.metrics_interval(), Duration::from_secs(60));
        assert_eq!(config.prebuilds.metrics_timeout(), Duration::from_secs(10));
        config.validate().unwrap();
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[server]
listen = "127.0.0.1:9090"

[store]
data_dir = "/tmp/warmpool"

[prebuilds]
enabled = true
metrics_interval_secs = 30
metrics_timeout_secs = 5

[quotas]
enabled = true
"#;
        let config = DaemonConfig::parse(toml_str).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9090".parse().unwrap());
        assert_eq!(config.store.db_path(), PathBuf::from("/tmp/warmpool/warmpool.redb"));
        assert!(config.prebuilds.enabled);
        assert_eq!(config.prebuilds.metrics_interval_secs, 30);
        assert_eq!(config.prebuilds.metrics_timeout_secs, 5);
        assert!(config.quotas.enabled);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config = DaemonConfig::parse("[prebuilds]\nenabled = true\n").unwrap();
        assert!(config.prebuilds.enabled);
        assert_eq!(config.prebuilds.metrics_interval_secs, 60);
        assert_eq!(config.server, ServerConfig::default());
    }

    #[test]
    fn dev_switches_force_features_on() {
        let config = DaemonConfig::default()
            .with_env_overrides(env(&[(DEV_PREBUILDS_ENV, "true"), (DEV_QUOTAS_ENV, "true")]));
        assert!(config.prebuilds.enabled);
        assert!(config.quotas.enabled);
    }

    #[test]
    fn dev_switches_need_exact_true() {
        let config = DaemonConfig::default()
            .with_env_overrides(env(&[(DEV_PREBUILDS_ENV, "1"), (DEV_QUOTAS_ENV, "TRUE")]));
        assert!(!config.prebuilds.enabled);
        assert!(!config.quotas.enabled);
    }

    #[test]
    fn unset_switches_do_not_disable() {
        let mut config = DaemonConfig::default();
        config.quotas.enabled = true;
        let config = config.with_env_overrides(env(&[]));
        assert!(config.quotas.enabled);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut config = DaemonConfig::default();
        config.prebuilds.metrics_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn timeout_must_be_shorter_than_interval() {
        let mut config = DaemonConfig::default();
        config.prebuilds.metrics_interval_secs = 10;
        config.prebuilds.metrics_timeout_secs = 10;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("shorter"), "{err}");
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warmpool.toml");
        std::fs::write(&path, "[quotas]\nenabled = true\n").unwrap();

        let config = DaemonConfig::from_file(&path).unwrap();
        assert!(config.quotas.enabled);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("warmpool.toml");
        std::fs::write(&path, "[prebuilds]\nenabled = \"maybe\"\n").unwrap();

        assert!(DaemonConfig::from_file(&path).is_err());
    }
}
