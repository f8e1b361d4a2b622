//! Export configuration module.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults are
//! the base layer; a user file only needs the keys it wants to change.
//!
//! ## Config File Location
//!
//! `config.toml` is read from the directory passed with `--config` (the
//! current directory by default):
//!
//! ```text
//! ~/sd/
//! ├── config.toml     # Export settings (overrides stock defaults)
//! ├── outputs/        # Watched directory the backend writes into
//! └── exported/       # Where named images end up
//! ```
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [naming]
//! timestamp = "date-time"   # none | date | date-time | unix-epoch
//! include_prompt = true
//! include_seed = true
//! include_scale = true
//! include_sampler = true
//! include_model = false
//!
//! [output]
//! subfolders_per_prompt = false
//! session_subfolder = false
//!
//! [prompt]
//! strip_wildcards = true    # Drop __wildcard__ and ~wildcard references
//!
//! [pipeline]
//! poll_interval_ms = 100
//! startup_delay_ms = 1000
//! minimum_age_ms = 200      # Don't touch files written more recently
//! log_correlation_lines = 5
//!
//! [processing]
//! max_processes = 4         # Max parallel workers (omit for auto = CPU cores)
//!
//! [logging]
//! level = "info"
//! ```
//!
//! ## Partial Configuration
//!
//! ```toml
//! # Only switch to per-prompt folders
//! [output]
//! subfolders_per_prompt = true
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::naming::{NamingOptions, TimestampMode};
use crate::pipeline::PipelineSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Export configuration loaded from `config.toml`.
///
/// All fields have sensible defaults. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    /// Which tokens go into exported filenames.
    pub naming: NamingConfig,
    /// Output directory layout.
    pub output: OutputConfig,
    /// Prompt clean-up before naming.
    pub prompt: PromptConfig,
    /// Export loop timing.
    pub pipeline: PipelineConfig,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
    pub logging: LoggingConfig,
}

impl ExportConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.poll_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "pipeline.poll_interval_ms must be non-zero".into(),
            ));
        }
        if self.pipeline.log_correlation_lines == 0 {
            return Err(ConfigError::Validation(
                "pipeline.log_correlation_lines must be non-zero".into(),
            ));
        }
        if !LOG_LEVELS.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {}",
                LOG_LEVELS.join(", ")
            )));
        }
        Ok(())
    }

    /// Naming options for a session, with an optional model override.
    pub fn naming_options(&self, model_name: Option<&str>) -> NamingOptions {
        NamingOptions {
            timestamp: self.naming.timestamp,
            include_prompt: self.naming.include_prompt,
            include_seed: self.naming.include_seed,
            include_scale: self.naming.include_scale,
            include_sampler: self.naming.include_sampler,
            include_model: self.naming.include_model,
            model_name: model_name.unwrap_or_default().to_string(),
            strip_wildcards: self.prompt.strip_wildcards,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NamingConfig {
    pub timestamp: TimestampMode,
    pub include_prompt: bool,
    pub include_seed: bool,
    pub include_scale: bool,
    pub include_sampler: bool,
    pub include_model: bool,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            timestamp: TimestampMode::DateTime,
            include_prompt: true,
            include_seed: true,
            include_scale: true,
            include_sampler: true,
            include_model: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    /// One subfolder per distinct prompt. The prompt then leaves the filename.
    pub subfolders_per_prompt: bool,
    /// One subfolder per run, named after its start time.
    pub session_subfolder: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PromptConfig {
    pub strip_wildcards: bool,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            strip_wildcards: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub poll_interval_ms: u64,
    pub startup_delay_ms: u64,
    pub minimum_age_ms: u64,
    pub log_correlation_lines: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            startup_delay_ms: 1000,
            minimum_age_ms: 200,
            log_correlation_lines: 5,
        }
    }
}

impl PipelineConfig {
    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            startup_delay: Duration::from_millis(self.startup_delay_ms),
            minimum_age: Duration::from_millis(self.minimum_age_ms),
            log_correlation_lines: self.log_correlation_lines,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel metadata readers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default level for this crate's logs. `RUST_LOG` takes precedence.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the base layer user overrides are merged on top of.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(ExportConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load `config.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if the directory has no `config.toml`.
pub fn load_raw_config(dir: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = dir.join("config.toml");
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<ExportConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: ExportConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `config.toml` in the given directory.
pub fn load_config(dir: &Path) -> Result<ExportConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(dir)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# sd-export Configuration
# =======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# File naming
# ---------------------------------------------------------------------------
[naming]
# Leading timestamp: "none", "date" (20240131), "date-time" (20240131-142501)
# or "unix-epoch" (seconds).
timestamp = "date-time"

# Optional tokens. They are added in priority order seed, scale, sampler,
# prompt, model, each only if it still fits in the 255-byte path limit.
# The prompt is shortened to fit instead of being dropped.
include_prompt = true
include_seed = true
include_scale = true
include_sampler = true
include_model = false

# ---------------------------------------------------------------------------
# Output layout
# ---------------------------------------------------------------------------
[output]
# Put images into one folder per prompt. The prompt is then left out of
# the filename.
subfolders_per_prompt = false

# Put each run into its own folder named after the start time.
session_subfolder = false

# ---------------------------------------------------------------------------
# Prompt clean-up
# ---------------------------------------------------------------------------
[prompt]
# Remove __wildcard__ and ~wildcard references before naming.
strip_wildcards = true

# ---------------------------------------------------------------------------
# Export loop
# ---------------------------------------------------------------------------
[pipeline]
# Pause between passes over the watched directory.
poll_interval_ms = 100

# Pause before the first pass.
startup_delay_ms = 1000

# Files written more recently than this are left alone until the next pass.
minimum_age_ms = 200

# For backends that log saved file names: how many recent log lines an
# image must be mentioned in before it is exported.
log_correlation_lines = 5

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel metadata readers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4

# ---------------------------------------------------------------------------
# Logging
# ---------------------------------------------------------------------------
[logging]
# trace, debug, info, warn or error. RUST_LOG overrides this.
level = "info"
"##
}
