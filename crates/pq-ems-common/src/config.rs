//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the grouping runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use pq_ems_events::{GroupingOptions, DEFAULT_WINDOW_MS};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::logging::LogFormat;

fn default_window_ms() -> i64 {
    DEFAULT_WINDOW_MS
}

fn default_snapshot_path() -> PathBuf {
    PathBuf::from("data/events.json")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_file_enabled() -> bool {
    true
}

fn default_metrics_enabled() -> bool {
    true
}

/// Primary configuration object for the PQ-EMS tooling.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub grouping: GroupingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "PQ_EMS_CONFIG";

    /// Load configuration from disk, respecting the `PQ_EMS_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.grouping.validate()?;
        self.store.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Parameters for the automatic mother/child grouping pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupingConfig {
    /// Inclusive span between a mother and its children, in milliseconds.
    #[serde(default = "default_window_ms")]
    pub window_ms: i64,
    /// Upper bound on children attached to one mother per pass. Unbounded when absent.
    #[serde(default)]
    pub max_children_per_group: Option<usize>,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_children_per_group: None,
        }
    }
}

impl GroupingConfig {
    /// Options for the grouping core.
    pub fn options(&self) -> GroupingOptions {
        GroupingOptions {
            window_ms: self.window_ms,
            max_children_per_group: self.max_children_per_group,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_ms <= 0 {
            return Err(anyhow!(
                "grouping.window_ms must be positive (got {})",
                self.window_ms
            ));
        }
        if self.max_children_per_group == Some(0) {
            return Err(anyhow!(
                "grouping.max_children_per_group must be at least 1 when set"
            ));
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON snapshot of the event table used by the file-backed store.
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    /// Timeout applied to each fetch/persist call against the store.
    #[serde(default)]
    #[serde_as(as = "Option<DurationSeconds<u64>>")]
    pub request_timeout: Option<Duration>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: default_snapshot_path(),
            request_timeout: None,
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.snapshot_path.as_os_str().is_empty() {
            return Err(anyhow!("store.snapshot_path must not be empty"));
        }
        if self.request_timeout == Some(Duration::ZERO) {
            return Err(anyhow!("store.request_timeout must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when neither `PQ_EMS_LOG` nor `RUST_LOG` is set.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default, alias = "format")]
    pub stdout_format: LogFormat,
    /// Keep a daily rolling file under `directory`.
    #[serde(default = "default_file_enabled")]
    pub file_enabled: bool,
    #[serde(default)]
    pub file_format: LogFormat,
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            stdout_format: LogFormat::default(),
            file_enabled: default_file_enabled(),
            file_format: LogFormat::default(),
            directory: default_logging_directory(),
            file_prefix: None,
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<()> {
        EnvFilter::try_new(&self.level)
            .map_err(|err| anyhow!("logging.level {:?} is not a valid filter: {err}", self.level))?;
        if self.file_enabled && self.directory.as_os_str().is_empty() {
            return Err(anyhow!("logging.directory must not be empty when file_enabled"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config: AppConfig = "".parse().unwrap();
        assert_eq!(config.grouping.window_ms, DEFAULT_WINDOW_MS);
        assert_eq!(config.grouping.max_children_per_group, None);
        assert_eq!(config.store.snapshot_path, PathBuf::from("data/events.json"));
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.stdout_format, LogFormat::StructuredJson);
        assert!(config.logging.file_enabled);
        assert!(config.metrics.enabled);
        assert_eq!(config.grouping.options(), GroupingOptions::default());
    }

    #[test]
    fn parses_all_sections() {
        let config: AppConfig = r#"
            [grouping]
            window_ms = 300000
            max_children_per_group = 4

            [store]
            snapshot_path = "fixtures/events.json"
            request_timeout = 15

            [logging]
            level = "debug,pq_ems_store=trace"
            stdout_format = "pretty"
            file_format = "structured-json"
            file_prefix = "pq"

            [metrics]
            enabled = false
        "#
        .parse()
        .unwrap();

        assert_eq!(config.grouping.window_ms, 300_000);
        assert_eq!(config.grouping.max_children_per_group, Some(4));
        assert_eq!(config.store.request_timeout, Some(Duration::from_secs(15)));
        assert_eq!(config.logging.level, "debug,pq_ems_store=trace");
        assert_eq!(config.logging.stdout_format, LogFormat::Pretty);
        assert_eq!(config.logging.file_format, LogFormat::StructuredJson);
        assert_eq!(config.logging.file_prefix.as_deref(), Some("pq"));
        assert_eq!(
            config.grouping.options(),
            GroupingOptions::new(300_000).with_max_children(4)
        );
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn rejects_non_positive_window() {
        let err = "[grouping]\nwindow_ms = 0\n".parse::<AppConfig>().unwrap_err();
        assert!(err.to_string().contains("window_ms"));
    }

    #[test]
    fn legacy_format_key_sets_stdout_layout() {
        let config: AppConfig = "[logging]\nformat = \"pretty\"\nfile_enabled = false\n"
            .parse()
            .unwrap();
        assert_eq!(config.logging.stdout_format, LogFormat::Pretty);
        assert_eq!(config.logging.file_format, LogFormat::StructuredJson);
        assert!(!config.logging.file_enabled);
    }

    #[test]
    fn rejects_malformed_log_level() {
        let err = "[logging]\nlevel = \"info,pq_ems=loud\"\n"
            .parse::<AppConfig>()
            .unwrap_err();
        assert!(err.to_string().contains("logging.level"));
    }

    #[test]
    fn rejects_zero_child_cap() {
        let err = "[grouping]\nmax_children_per_group = 0\n"
            .parse::<AppConfig>()
            .unwrap_err();
        assert!(err.to_string().contains("max_children_per_group"));
    }

    #[test]
    fn load_prefers_first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pq-ems.toml");
        fs::write(&path, "[grouping]\nwindow_ms = 120000\n").unwrap();
        let missing = dir.path().join("missing.toml");

        let loaded = AppConfig::load_with_source(&[missing, path.clone()]).unwrap();
        assert_eq!(loaded.source, path);
        assert_eq!(loaded.config.grouping.window_ms, 120_000);
    }
}
