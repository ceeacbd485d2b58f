//! Engine configuration.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (HARMONIA_BASE_FREQUENCY, HARMONIA_MAX_LEVELS, ...)
//! 2. Config file (.harmonia/config.yaml)
//! 3. Defaults
//!
//! Config file discovery:
//! - Searches current directory and parents for .harmonia/config.yaml
//! - Falls back to ~/.harmonia/config.yaml (or $HARMONIA_HOME/config.yaml)
//! - Workflow files live in a `workflows/` directory next to the config file

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cluster::ClusterConfig;
use crate::core::OrchestratorConfig;
use crate::error::{HarmoniaError, HarmoniaResult};
use crate::firewall::FirewallConfig;
use crate::memory::MemoryConfig;
use crate::signal::SignalConfig;

const CONFIG_DIR: &str = ".harmonia";
const CONFIG_FILE: &str = "config.yaml";

/// Everything the engine needs at construction time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub signal: SignalConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub cluster: ClusterConfig,

    #[serde(default)]
    pub firewall: FirewallConfig,

    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

/// Configuration plus where it came from
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub engine: EngineConfig,

    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,

    /// Directory holding workflow YAML files
    pub workflows_dir: PathBuf,
}

impl EngineConfig {
    /// Load configuration from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse config YAML")
    }

    /// Find, load, override from the environment and validate
    pub fn discover() -> Result<ResolvedConfig> {
        let cwd = std::env::current_dir().context("Failed to determine current directory")?;
        let config_file = find_config_file(&cwd).or_else(home_config_file);

        let mut engine = match config_file {
            Some(ref path) => {
                debug!(path = %path.display(), "Loading config file");
                Self::from_file(path)?
            }
            None => Self::default(),
        };

        engine.apply_overrides(|key| std::env::var(key).ok())?;
        engine.validate()?;

        let workflows_dir = match config_file {
            Some(ref path) => path.parent().unwrap_or(Path::new(".")).join("workflows"),
            None => harmonia_home()?.join("workflows"),
        };

        Ok(ResolvedConfig {
            engine,
            config_file,
            workflows_dir,
        })
    }

    /// Apply HARMONIA_* overrides from `lookup` (the environment in practice)
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("HARMONIA_BASE_FREQUENCY") {
            self.signal.base_frequency = parse_var("HARMONIA_BASE_FREQUENCY", &value)?;
        }
        if let Some(value) = lookup("HARMONIA_MAX_LEVELS") {
            self.memory.max_levels = parse_var("HARMONIA_MAX_LEVELS", &value)?;
        }
        if let Some(value) = lookup("HARMONIA_LEVEL_CAPACITY") {
            self.memory.max_nodes_per_level = parse_var("HARMONIA_LEVEL_CAPACITY", &value)?;
        }
        if let Some(value) = lookup("HARMONIA_HEARTBEAT_MS") {
            self.cluster.heartbeat_interval_ms = parse_var("HARMONIA_HEARTBEAT_MS", &value)?;
        }
        if let Some(value) = lookup("HARMONIA_CONSENSUS_THRESHOLD") {
            self.cluster.consensus_threshold = parse_var("HARMONIA_CONSENSUS_THRESHOLD", &value)?;
        }
        Ok(())
    }

    /// Reject values the components cannot work with
    pub fn validate(&self) -> HarmoniaResult<()> {
        let unit = |name: &str, value: f64| {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(HarmoniaError::Config(format!("{} must be within [0, 1], got {}", name, value)))
            }
        };

        if !self.signal.base_frequency.is_finite() || self.signal.base_frequency <= 0.0 {
            return Err(HarmoniaError::Config(format!(
                "signal.base_frequency must be positive, got {}",
                self.signal.base_frequency
            )));
        }
        unit("signal.resonance_threshold", self.signal.resonance_threshold)?;

        if self.memory.max_levels == 0 {
            return Err(HarmoniaError::Config("memory.max_levels must be at least 1".to_string()));
        }
        if self.memory.max_nodes_per_level == 0 {
            return Err(HarmoniaError::Config(
                "memory.max_nodes_per_level must be at least 1".to_string(),
            ));
        }
        let ratio = self.memory.compression_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(HarmoniaError::Config(format!(
                "memory.compression_ratio must be within (0, 1], got {}",
                ratio
            )));
        }
        unit("memory.similarity_threshold", self.memory.similarity_threshold)?;

        if self.cluster.heartbeat_interval_ms == 0 {
            return Err(HarmoniaError::Config(
                "cluster.heartbeat_interval_ms must be positive".to_string(),
            ));
        }
        unit("cluster.capability_threshold", self.cluster.capability_threshold)?;
        unit("cluster.consensus_threshold", self.cluster.consensus_threshold)?;
        unit("cluster.consensus_quorum", self.cluster.consensus_quorum)?;

        for (id, rule) in &self.firewall.rules {
            if let Some(threshold) = rule.threshold {
                unit(&format!("firewall.rules.{}.threshold", id), threshold)?;
            }
        }
        unit("firewall.danger_rate", self.firewall.danger_rate)?;
        let ratio = self.firewall.target_fp_fn_ratio;
        if !ratio.is_finite() || ratio < 0.0 {
            return Err(HarmoniaError::Config(format!(
                "firewall.target_fp_fn_ratio must be non-negative, got {}",
                ratio
            )));
        }

        if self.orchestrator.history_capacity == 0 {
            return Err(HarmoniaError::Config(
                "orchestrator.history_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Render as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config")
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid value for {}: '{}'", key, value))
}

/// Search the directory and its parents for .harmonia/config.yaml
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

fn home_config_file() -> Option<PathBuf> {
    let path = harmonia_home().ok()?.join(CONFIG_FILE);
    path.exists().then_some(path)
}

/// $HARMONIA_HOME, else ~/.harmonia
pub fn harmonia_home() -> Result<PathBuf> {
    if let Ok(home) = std::env::var("HARMONIA_HOME") {
        return Ok(PathBuf::from(home));
    }
    Ok(dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(CONFIG_DIR))
}
