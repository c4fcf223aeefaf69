use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use wfcollector_core::filter::FilterChain;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub archive: ArchiveConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub filtering: FilteringConfig,
    #[serde(default)]
    pub spectra: SpectraConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ArchiveConfig {
    pub root: PathBuf,
    #[serde(default = "default_fdsn_station_url")]
    pub fdsn_station_url: String,
}

fn default_fdsn_station_url() -> String {
    "https://www.orfeus-eu.org/fdsnws/station/1/query".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    1
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            chunk_size: default_chunk_size(),
            task_timeout_secs: default_task_timeout_secs(),
            grace_period_secs: default_grace_period_secs(),
        }
    }
}

impl SchedulerConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

fn default_workers() -> usize {
    4
}
fn default_chunk_size() -> usize {
    10
}
fn default_task_timeout_secs() -> u64 {
    600
}
fn default_grace_period_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FilteringConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_allow")]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

impl Default for FilteringConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allow: default_allow(),
            deny: Vec::new(),
        }
    }
}

impl FilteringConfig {
    /// Compiled chain, or `None` when filtering is disabled.
    pub fn chain(&self) -> Result<Option<FilterChain>> {
        if !self.enabled {
            return Ok(None);
        }
        Ok(Some(FilterChain::new(&self.allow, &self.deny)?))
    }
}

fn default_allow() -> Vec<String> {
    vec!["*".to_string()]
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SpectraConfig {
    #[serde(default = "default_min_period")]
    pub min_period: f64,
    #[serde(default = "default_max_period")]
    pub max_period: f64,
}

impl Default for SpectraConfig {
    fn default() -> Self {
        Self {
            min_period: default_min_period(),
            max_period: default_max_period(),
        }
    }
}

fn default_min_period() -> f64 {
    0.01
}
fn default_max_period() -> f64 {
    100.0
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct AnalysisConfig {
    #[serde(default)]
    pub command: Option<PathBuf>,
    #[serde(default)]
    pub args: Vec<String>,
}

impl AnalysisConfig {
    pub fn is_enabled(&self) -> bool {
        self.command.is_some()
    }
}

impl Config {
    /// Configuration with defaults for everything but the archive and store.
    pub fn minimal(root: impl Into<PathBuf>, store_path: impl Into<PathBuf>) -> Self {
        Self {
            archive: ArchiveConfig {
                root: root.into(),
                fdsn_station_url: default_fdsn_station_url(),
            },
            store: StoreConfig {
                path: store_path.into(),
                max_connections: default_max_connections(),
            },
            scheduler: SchedulerConfig::default(),
            filtering: FilteringConfig::default(),
            spectra: SpectraConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.scheduler.workers == 0 {
        anyhow::bail!("scheduler.workers must be >= 1");
    }
    if config.scheduler.chunk_size == 0 {
        anyhow::bail!("scheduler.chunk_size must be >= 1");
    }
    if config.scheduler.task_timeout_secs == 0 {
        anyhow::bail!("scheduler.task_timeout_secs must be > 0");
    }
    if config.store.max_connections == 0 {
        anyhow::bail!("store.max_connections must be >= 1");
    }

    if !(config.spectra.min_period > 0.0 && config.spectra.min_period < config.spectra.max_period)
    {
        anyhow::bail!("spectra.min_period must be > 0 and smaller than spectra.max_period");
    }

    // Compile once to surface bad patterns at startup.
    FilterChain::new(&config.filtering.allow, &config.filtering.deny)
        .with_context(|| "Invalid [filtering] patterns")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("wfcollector.toml");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn minimal_file_gets_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            r#"
[archive]
root = "/data/sds"

[store]
path = "/tmp/wf.sqlite"
"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.scheduler.workers, 4);
        assert_eq!(config.scheduler.chunk_size, 10);
        assert_eq!(config.scheduler.task_timeout(), Duration::from_secs(600));
        assert!(!config.filtering.enabled);
        assert!(config.filtering.chain().unwrap().is_none());
        assert!(!config.analysis.is_enabled());
    }

    #[test]
    fn zero_workers_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            r#"
[archive]
root = "/data/sds"

[store]
path = "/tmp/wf.sqlite"

[scheduler]
workers = 0
"#,
        );
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("workers"));
    }

    #[test]
    fn bad_filter_pattern_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            r#"
[archive]
root = "/data/sds"

[store]
path = "/tmp/wf.sqlite"

[filtering]
enabled = true
allow = ["["]
"#,
        );
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn enabled_filter_builds_chain() {
        let mut config = Config::minimal("/data/sds", "/tmp/wf.sqlite");
        config.filtering.enabled = true;
        config.filtering.allow = vec!["NL.*".to_string()];
        config.filtering.deny = vec!["*.LHZ.*".to_string()];
        let chain = config.filtering.chain().unwrap().unwrap();
        assert!(chain.accepts("NL.HGN.02.BHZ.D.2020.001"));
        assert!(!chain.accepts("NL.HGN.02.LHZ.D.2020.001"));
    }
}
