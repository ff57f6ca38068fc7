//! Compiler configuration: default engine, optimization level, and the
//! time-spine table to compile against when a caller doesn't build a
//! `TimeSpineSource` by hand. Loaded with a search order borrowed from the
//! teacher's connection config: an explicit env var, then a project file,
//! then a user config dir, then hardcoded defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::EngineKind;
use crate::error::Result;
use crate::optimizer::OptimizationLevel;
use crate::specs::TimeGranularity;

/// Env var checked before any file-based config path.
pub const CONFIG_ENV_VAR: &str = "DATAFLOW_SQL_CONFIG";

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompilerConfig {
    pub engine: EngineSetting,
    pub optimization_level: OptimizationSetting,
    pub time_spine: TimeSpineConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngineSetting {
    DuckDb,
    Postgres,
    BigQuery,
    Snowflake,
    Redshift,
}

impl Default for EngineSetting {
    fn default() -> Self {
        EngineSetting::DuckDb
    }
}

impl From<EngineSetting> for EngineKind {
    fn from(value: EngineSetting) -> Self {
        match value {
            EngineSetting::DuckDb => EngineKind::DuckDb,
            EngineSetting::Postgres => EngineKind::Postgres,
            EngineSetting::BigQuery => EngineKind::BigQuery,
            EngineSetting::Snowflake => EngineKind::Snowflake,
            EngineSetting::Redshift => EngineKind::Redshift,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationSetting {
    None,
    Standard,
    Aggressive,
}

impl Default for OptimizationSetting {
    fn default() -> Self {
        OptimizationSetting::Standard
    }
}

impl From<OptimizationSetting> for OptimizationLevel {
    fn from(value: OptimizationSetting) -> Self {
        match value {
            OptimizationSetting::None => OptimizationLevel::None,
            OptimizationSetting::Standard => OptimizationLevel::Standard,
            OptimizationSetting::Aggressive => OptimizationLevel::Aggressive,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimeSpineConfig {
    pub table_name: String,
    pub time_column_name: String,
    pub base_granularity: TimeGranularitySetting,
}

impl Default for TimeSpineConfig {
    fn default() -> Self {
        Self {
            table_name: "time_spine_day".to_string(),
            time_column_name: "ds".to_string(),
            base_granularity: TimeGranularitySetting::Day,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeGranularitySetting {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl From<TimeGranularitySetting> for TimeGranularity {
    fn from(value: TimeGranularitySetting) -> Self {
        match value {
            TimeGranularitySetting::Day => TimeGranularity::Day,
            TimeGranularitySetting::Week => TimeGranularity::Week,
            TimeGranularitySetting::Month => TimeGranularity::Month,
            TimeGranularitySetting::Quarter => TimeGranularity::Quarter,
            TimeGranularitySetting::Year => TimeGranularity::Year,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl CompilerConfig {
    /// Load configuration from the first source found, in order:
    /// `DATAFLOW_SQL_CONFIG` env var path, `./dataflow_sql.toml`,
    /// `~/.config/dataflow_sql/config.toml`, then built-in defaults.
    pub fn load_default() -> Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Self::load_from_path(path);
        }
        let cwd_config = PathBuf::from("dataflow_sql.toml");
        if cwd_config.exists() {
            return Self::load_from_path(cwd_config);
        }
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("dataflow_sql").join("config.toml");
            if user_config.exists() {
                return Self::load_from_path(user_config);
            }
        }
        tracing::debug!("no config file found, using built-in defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;
        let config: CompilerConfig = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("failed to parse config file {}: {e}", path.display()))?;
        tracing::info!(path = %path.display(), "loaded compiler config");
        Ok(config)
    }
}
