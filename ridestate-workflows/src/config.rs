//! Application configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via RIDESTATE_CONFIG or --config)
//! 3. Environment variables

use ridestate_core::MachineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the YAML config file.
pub const CONFIG_ENV: &str = "RIDESTATE_CONFIG";

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Defaults for every workflow's state machine.
    pub machine: MachineConfig,
    /// Simulated backend behavior.
    pub simulation: SimulationConfig,
}

impl Config {
    /// Loads configuration from the file named by `RIDESTATE_CONFIG`, then
    /// applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Loads configuration from `path` if given, then applies environment
    /// variable overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_overrides(lookup)?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    /// Machine config for one workflow, named `<machine.name>.<workflow>`.
    pub fn machine_for(&self, workflow: &str) -> MachineConfig {
        MachineConfig {
            name: format!("{}.{}", self.machine.name, workflow),
            ..self.machine.clone()
        }
    }

    /// Applies overrides from `lookup`, keyed by environment variable name.
    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("RIDESTATE_MACHINE_NAME") {
            self.machine.name = name;
        }
        if let Some(threshold) = lookup("RIDESTATE_QUEUE_WARN_THRESHOLD") {
            self.machine.queue_warn_threshold =
                parse_var("RIDESTATE_QUEUE_WARN_THRESHOLD", &threshold)?;
        }
        self.simulation.apply_overrides(&lookup)
    }
}

/// Simulated backend configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Delay added to every service call.
    pub latency_ms: u64,
    /// Every Nth call fails with an outage (0 = never).
    pub fail_every: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            latency_ms: 200,
            fail_every: 0,
        }
    }
}

impl SimulationConfig {
    fn apply_overrides<F>(&mut self, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(latency) = lookup("RIDESTATE_SIM_LATENCY_MS") {
            self.latency_ms = parse_var("RIDESTATE_SIM_LATENCY_MS", &latency)?;
        }
        if let Some(every) = lookup("RIDESTATE_SIM_FAIL_EVERY") {
            self.fail_every = parse_var("RIDESTATE_SIM_FAIL_EVERY", &every)?;
        }
        Ok(())
    }

    pub fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| {
            ConfigError::ValidationError(format!("{} must be a number, got '{}'", key, value))
        })
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.machine.name, "machine");
        assert_eq!(config.machine.queue_warn_threshold, 256);
        assert_eq!(config.simulation.latency(), Duration::from_millis(200));
        assert_eq!(config.simulation.fail_every, 0);
    }

    #[test]
    fn test_machine_for_workflow() {
        let mut config = Config::default();
        config.machine.name = "rider".to_string();
        config.machine.queue_warn_threshold = 8;

        let machine = config.machine_for("pretrip");
        assert_eq!(machine.name, "rider.pretrip");
        assert_eq!(machine.queue_warn_threshold, 8);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "simulation:\n  fail_every: 3\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.simulation.fail_every, 3);
        assert_eq!(config.simulation.latency_ms, 200);
        assert_eq!(config.machine, MachineConfig::default());
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ridestate.yaml");

        let mut config = Config::default();
        config.machine.name = "driver-app".to_string();
        config.simulation.latency_ms = 50;
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::from_file(dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(..)));
        assert!(err.to_string().starts_with("failed to read config file"));
    }

    #[test]
    fn test_invalid_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "simulation:\n  latency_ms: soon\n").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(..)));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("RIDESTATE_MACHINE_NAME", "fleet"),
            ("RIDESTATE_QUEUE_WARN_THRESHOLD", "16"),
            ("RIDESTATE_SIM_LATENCY_MS", " 5 "),
            ("RIDESTATE_SIM_FAIL_EVERY", "4"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.machine.name, "fleet");
        assert_eq!(config.machine.queue_warn_threshold, 16);
        assert_eq!(config.simulation.latency_ms, 5);
        assert_eq!(config.simulation.fail_every, 4);
    }

    #[test]
    fn test_env_overrides_apply_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ridestate.yaml");
        std::fs::write(
            &path,
            "machine:\n  name: rider\nsimulation:\n  latency_ms: 50\n  fail_every: 0\n",
        )
        .unwrap();

        let config = Config::load_with(Some(path.as_path()), |key| {
            (key == "RIDESTATE_SIM_FAIL_EVERY").then(|| "2".to_string())
        })
        .unwrap();

        assert_eq!(config.simulation.fail_every, 2);
        assert_eq!(config.simulation.latency_ms, 50);
        assert_eq!(config.machine.name, "rider");
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = Config::load_with(None, |_| None).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.yaml");
        let err = Config::load_with(Some(path.as_path()), |_| None).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(..)));
    }

    #[test]
    fn test_invalid_override() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(|key| (key == "RIDESTATE_SIM_FAIL_EVERY").then(|| "often".to_string()))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "configuration validation failed: RIDESTATE_SIM_FAIL_EVERY must be a number, got 'often'"
        );
    }
}
