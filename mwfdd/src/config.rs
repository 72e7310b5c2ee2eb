use std::{fs, path::Path};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use mwfd_fw::dispatch::DispatchConfig;
use mwfd_fw::tables::cs::CsConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub daemon: DaemonSection,
    pub forwarding: ForwardingSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSection {
    pub pid_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardingSection {
    /// Number of forwarding workers; 0 picks one per available core.
    pub workers: usize,
    pub queue_capacity: usize,
    /// Name prefix length fed into worker dispatch hashing.
    pub dispatch_prefix_components: usize,
    pub pin_workers: bool,
    pub cs_capacity: usize,
    /// Replacement policy: "lru", "lfu" or "priority".
    pub cs_policy: String,
    pub dual_cs: bool,
    pub cs_admit: bool,
    pub cs_serve: bool,
    pub cs_prefix_limit: Option<usize>,
    pub cs_exact_limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    pub level: String,
    pub file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            daemon: DaemonSection {
                pid_file: "/var/run/mwfdd.pid".to_string(),
            },
            forwarding: ForwardingSection {
                workers: 0,
                queue_capacity: 4096,
                dispatch_prefix_components: 1,
                pin_workers: true,
                cs_capacity: 65536,
                cs_policy: "lru".to_string(),
                dual_cs: true,
                cs_admit: true,
                cs_serve: true,
                cs_prefix_limit: None,
                cs_exact_limit: None,
            },
            logging: LoggingSection {
                level: "info".to_string(),
                file: None,
            },
        }
    }
}

impl Config {
    /// Load from a TOML file, falling back to defaults when it is absent.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if !path.as_ref().exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.as_ref().display()))?;
        let config = toml::from_str(&contents)
            .with_context(|| format!("parsing {}", path.as_ref().display()))?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(&path, contents)
            .with_context(|| format!("writing {}", path.as_ref().display()))?;
        Ok(())
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        let defaults = DispatchConfig::default();
        DispatchConfig {
            workers: if self.forwarding.workers == 0 {
                defaults.workers
            } else {
                self.forwarding.workers
            },
            queue_capacity: self.forwarding.queue_capacity,
            hash_prefix_components: self.forwarding.dispatch_prefix_components,
            pin_workers: self.forwarding.pin_workers,
        }
    }

    pub fn cs_config(&self) -> CsConfig {
        CsConfig {
            capacity: self.forwarding.cs_capacity,
            pm_limit: self.forwarding.cs_prefix_limit,
            em_limit: self.forwarding.cs_exact_limit,
            dual_index: self.forwarding.dual_cs,
            admit: self.forwarding.cs_admit,
            serve: self.forwarding.cs_serve,
            policy: self.forwarding.cs_policy.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Config::load("/nonexistent/mwfdd.conf").unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.forwarding.cs_policy, "lru");
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mwfdd.conf");

        let mut config = Config::default();
        config.forwarding.workers = 3;
        config.forwarding.cs_policy = "lfu".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.forwarding.workers, 3);
        assert_eq!(loaded.forwarding.cs_policy, "lfu");
    }

    #[test]
    fn test_dispatch_config_auto_workers() {
        let config = Config::default();
        assert!(config.dispatch_config().workers >= 1);

        let mut fixed = Config::default();
        fixed.forwarding.workers = 2;
        assert_eq!(fixed.dispatch_config().workers, 2);
    }
}
