//! Runner configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via RFSM_CONFIG or --config)
//! 3. Environment variables

use rfsm_core::{LibrarySource, MachineOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runner configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Definition and runtime configuration.
    pub machine: MachineConfig,
    /// Periodic driving configuration.
    pub runner: RunnerConfig,
}

impl Config {
    /// Loads configuration from `path` (or RFSM_CONFIG), then applies
    /// environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        let from_env = std::env::var("RFSM_CONFIG").ok().map(PathBuf::from);
        if let Some(path) = path.map(Path::to_path_buf).or(from_env) {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();

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

    fn apply_env_overrides(&mut self) {
        self.machine.apply_env_overrides();
        self.runner.apply_env_overrides();
    }

    /// Checks that the configuration can drive a machine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.machine.definition.is_none() {
            return Err(ConfigError::ValidationError(
                "machine.definition is required".to_string(),
            ));
        }
        if self.runner.period_ms == 0 {
            return Err(ConfigError::ValidationError(
                "runner.period_ms must be greater than 0".to_string(),
            ));
        }
        if self.runner.max_ticks == Some(0) {
            return Err(ConfigError::ValidationError(
                "runner.max_ticks must be greater than 0 when set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Definition and runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Definition file to load.
    pub definition: Option<PathBuf>,
    /// Extra module search paths (directories or `?` patterns).
    pub search_paths: Vec<String>,
    /// External FSM library file. The bundled library is used when unset or missing.
    pub library: Option<PathBuf>,
    /// Route model info/warn output and log step boundaries.
    pub verbose: bool,
}

impl MachineConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("RFSM_DEFINITION") {
            self.definition = Some(PathBuf::from(path));
        }

        if let Ok(paths) = std::env::var("RFSM_SEARCH_PATH") {
            self.search_paths.extend(
                paths
                    .split(';')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string),
            );
        }

        if let Ok(path) = std::env::var("RFSM_LIBRARY") {
            if !path.is_empty() {
                self.library = Some(PathBuf::from(path));
            }
        }

        if let Ok(verbose) = std::env::var("RFSM_VERBOSE") {
            self.verbose = verbose == "1" || verbose.to_lowercase() == "true";
        }
    }

    /// Options for the state machine driver. The definition's directory is
    /// appended to the search path.
    pub fn machine_options(&self) -> MachineOptions {
        let mut options = MachineOptions::new().with_verbose(self.verbose);
        for path in &self.search_paths {
            options = options.with_search_path(path.clone());
        }
        if let Some(dir) = self
            .definition
            .as_deref()
            .and_then(Path::parent)
            .filter(|dir| !dir.as_os_str().is_empty())
        {
            options = options.with_search_path(dir.display().to_string());
        }
        if let Some(library) = &self.library {
            options = options.with_library(LibrarySource::External(library.clone()));
        }
        options
    }
}

/// Periodic driving configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Interval between `run` calls in milliseconds.
    pub period_ms: u64,
    /// Stop after this many ticks.
    pub max_ticks: Option<u64>,
    /// Attach logging callbacks to every state.
    pub dry_run: bool,
    /// Events queued right after loading.
    pub events: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            period_ms: 100,
            max_ticks: None,
            dry_run: false,
            events: Vec::new(),
        }
    }
}

impl RunnerConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(period) = std::env::var("RFSM_PERIOD_MS") {
            if let Ok(ms) = period.parse() {
                self.period_ms = ms;
            }
        }

        if let Ok(max) = std::env::var("RFSM_MAX_TICKS") {
            if let Ok(n) = max.parse() {
                self.max_ticks = Some(n);
            }
        }

        if let Ok(dry_run) = std::env::var("RFSM_DRY_RUN") {
            self.dry_run = dry_run == "1" || dry_run.to_lowercase() == "true";
        }

        if let Ok(events) = std::env::var("RFSM_EVENTS") {
            self.events = events
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    /// Returns the period as Duration.
    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms)
    }
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

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.runner.period(), Duration::from_millis(100));
        assert!(config.runner.max_ticks.is_none());
        assert!(!config.machine.verbose);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        config.machine.definition = Some(PathBuf::from("door.lua"));
        assert!(config.validate().is_ok());

        config.runner.period_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));

        config.runner.period_ms = 10;
        config.runner.max_ticks = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_partial_sections() {
        let yaml = r#"
machine:
  definition: machines/door.lua
  verbose: true
runner:
  period_ms: 250
  events: [e_open, e_close]
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.machine.definition.as_deref(),
            Some(Path::new("machines/door.lua"))
        );
        assert!(config.machine.verbose);
        assert!(config.machine.search_paths.is_empty());
        assert_eq!(config.runner.period_ms, 250);
        assert_eq!(config.runner.events, vec!["e_open", "e_close"]);
        assert!(!config.runner.dry_run);
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = Config::default();
        config.machine.definition = Some(PathBuf::from("a.lua"));
        config.runner.max_ticks = Some(5);
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.machine.definition, config.machine.definition);
        assert_eq!(parsed.runner.max_ticks, Some(5));
    }

    #[test]
    fn test_from_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.yaml");
        assert!(matches!(
            Config::from_file(&missing),
            Err(ConfigError::IoError(..))
        ));

        let bad = dir.path().join("bad.yaml");
        std::fs::write(&bad, "runner: [not, a, map]").unwrap();
        assert!(matches!(
            Config::from_file(&bad),
            Err(ConfigError::ParseError(..))
        ));
    }

    #[test]
    fn test_machine_options() {
        let config = MachineConfig {
            definition: Some(PathBuf::from("/opt/machines/door.lua")),
            search_paths: vec!["/opt/lib/?.lua".to_string()],
            library: Some(PathBuf::from("/opt/rfsm/rfsm.lua")),
            verbose: true,
        };
        let options = config.machine_options();
        assert!(options.verbose);
        assert_eq!(options.search_paths, vec!["/opt/lib/?.lua", "/opt/machines"]);
        assert_eq!(
            options.library,
            LibrarySource::External(PathBuf::from("/opt/rfsm/rfsm.lua"))
        );

        let bare = MachineConfig {
            definition: Some(PathBuf::from("door.lua")),
            ..MachineConfig::default()
        };
        assert!(bare.machine_options().search_paths.is_empty());
    }
}
