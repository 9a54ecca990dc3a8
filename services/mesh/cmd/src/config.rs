//! Configuration handling for the aggregation simulator.
//!
//! Settings come from a YAML file, then environment variables, then command
//! line flags, each layer overriding the one before.

use anyhow::{bail, Result};
use mesh_routing::TreeConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Simulator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Number of nodes on the line, sink included
    pub nodes: u16,
    /// Per-attempt loss probability on the radio
    pub loss: f64,
    /// Seed for the radio, the trees, and the sensed values
    pub seed: Option<u64>,
    /// Whether nodes also run the urgent sighting job
    pub detect: bool,
    /// Chance per sow tick that a node sights something
    pub detect_rate: f64,
    /// Discovery round period (milliseconds)
    pub beacon_interval_ms: u64,
    /// Sensing period (milliseconds)
    pub sow_interval_ms: u64,
    /// Nominal flush interval of each job (milliseconds)
    pub flush_interval_ms: u64,
    /// Radio resolution period (milliseconds)
    pub pump_interval_ms: u64,
    /// Stats logging period (milliseconds)
    pub stats_interval_ms: u64,
    /// Length of one collect window (seconds)
    pub window_secs: u64,
    /// Settings applied to every tree
    pub tree: TreeConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            nodes: 5,
            loss: 0.1,
            seed: None,
            detect: true,
            detect_rate: 0.05,
            beacon_interval_ms: 1000,
            sow_interval_ms: 1000,
            flush_interval_ms: 10_000,
            pump_interval_ms: 20,
            stats_interval_ms: 15_000,
            window_secs: 600,
            tree: TreeConfig::default(),
        }
    }
}

impl SimConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<SimConfig>(&content) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file {:?} ({}), using defaults", config_path.as_ref(), e);
                    Self::default()
                }
            },
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", config_path.as_ref());
                Self::default()
            }
        };

        config.apply_environment_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(nodes) = lookup("MESH_AGG_NODES").and_then(|v| v.parse::<u16>().ok()) {
            self.nodes = nodes;
            info!("Node count overridden by environment: {}", nodes);
        }

        if let Some(loss) = lookup("MESH_AGG_LOSS").and_then(|v| v.parse::<f64>().ok()) {
            self.loss = loss;
            info!("Loss overridden by environment: {}", loss);
        }

        if let Some(seed) = lookup("MESH_AGG_SEED").and_then(|v| v.parse::<u64>().ok()) {
            self.seed = Some(seed);
            info!("Seed overridden by environment: {}", seed);
        }
    }

    /// Reject settings the simulator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.nodes < 2 {
            bail!("need at least 2 nodes (sink and one sensor), got {}", self.nodes);
        }
        if !(0.0..=1.0).contains(&self.loss) {
            bail!("loss must be within 0..=1, got {}", self.loss);
        }
        if !(0.0..=1.0).contains(&self.detect_rate) {
            bail!("detect_rate must be within 0..=1, got {}", self.detect_rate);
        }
        if self.tree.max_payload < mesh_wire::MIN_FRAME_SIZE {
            bail!("max_payload {} cannot carry a single record", self.tree.max_payload);
        }
        for (name, ms) in [
            ("beacon_interval_ms", self.beacon_interval_ms),
            ("sow_interval_ms", self.sow_interval_ms),
            ("pump_interval_ms", self.pump_interval_ms),
            ("stats_interval_ms", self.stats_interval_ms),
        ] {
            if ms == 0 {
                bail!("{} must be positive", name);
            }
        }
        Ok(())
    }

    /// Discovery round period
    pub fn beacon_interval(&self) -> Duration {
        Duration::from_millis(self.beacon_interval_ms)
    }

    /// Sensing period
    pub fn sow_interval(&self) -> Duration {
        Duration::from_millis(self.sow_interval_ms)
    }

    /// Nominal flush interval of each job
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Radio resolution period
    pub fn pump_interval(&self) -> Duration {
        Duration::from_millis(self.pump_interval_ms)
    }

    /// Stats logging period
    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }

    /// Length of one collect window
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = SimConfig::default();
        assert_eq!(config.nodes, 5);
        assert_eq!(config.tree.max_payload, 128);
        assert_eq!(config.flush_interval(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let yaml_content = r#"
nodes: 9
loss: 0.25
seed: 42
detect: false
flush_interval_ms: 2500
tree:
  max_payload: 64
  ram_limit: 4096
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml_content.as_bytes()).unwrap();

        let config = SimConfig::load_from_file(temp_file.path()).unwrap();

        assert_eq!(config.nodes, 9);
        assert_eq!(config.loss, 0.25);
        assert_eq!(config.seed, Some(42));
        assert!(!config.detect);
        assert_eq!(config.flush_interval(), Duration::from_millis(2500));
        assert_eq!(config.sow_interval(), Duration::from_secs(1));
        assert_eq!(config.tree.max_payload, 64);
        assert_eq!(config.tree.ram_limit, Some(4096));
        assert_eq!(config.tree.max_retries, 4);
    }

    #[test]
    fn test_unparsable_file_uses_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"nodes: [not, a, number]\n").unwrap();

        let config = SimConfig::load_from_file(temp_file.path()).unwrap();
        assert_eq!(config.loss, SimConfig::default().loss);
    }

    #[test]
    fn test_environment_overrides() {
        let env: HashMap<&str, &str> = [
            ("MESH_AGG_NODES", "12"),
            ("MESH_AGG_LOSS", "0.5"),
            ("MESH_AGG_SEED", "not-a-seed"),
        ]
        .into_iter()
        .collect();

        let mut config = SimConfig::default();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.nodes, 12);
        assert_eq!(config.loss, 0.5);
        assert_eq!(config.seed, None);
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut config = SimConfig { nodes: 1, ..SimConfig::default() };
        assert!(config.validate().is_err());

        config.nodes = 3;
        config.loss = 1.5;
        assert!(config.validate().is_err());

        config.loss = 0.0;
        config.tree.max_payload = 4;
        assert!(config.validate().is_err());

        config.tree.max_payload = 128;
        config.pump_interval_ms = 0;
        assert!(config.validate().is_err());
    }
}
