//! Engine configuration stored in `actions.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::engine::EngineOptions;
use crate::store::StoreOptions;

/// Default location of the config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "actions.toml";

/// Engine configuration (TOML).
///
/// Missing fields take their defaults, so an empty file is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ActionsConfig {
    /// Cycles one dispatch may run before it is aborted as unbounded.
    pub max_cycles: usize,

    /// Dispatches that may be nested inside one another through listeners.
    pub max_nesting: usize,

    /// Store updates that may be nested inside listener callbacks.
    pub max_update_depth: usize,

    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding persisted state documents.
    pub dir: PathBuf,
    /// Storage key of the state document.
    pub key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".actions/state"),
            key: "4.state".to_string(),
        }
    }
}

impl Default for ActionsConfig {
    fn default() -> Self {
        Self {
            max_cycles: 1000,
            max_nesting: 32,
            max_update_depth: 64,
            storage: StorageConfig::default(),
        }
    }
}

impl ActionsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_cycles == 0 {
            return Err(anyhow!("max_cycles must be > 0"));
        }
        if self.max_nesting == 0 {
            return Err(anyhow!("max_nesting must be > 0"));
        }
        if self.max_update_depth == 0 {
            return Err(anyhow!("max_update_depth must be > 0"));
        }
        if self.storage.key.trim().is_empty() {
            return Err(anyhow!("storage.key must not be empty"));
        }
        if self.storage.key.contains(['/', '\\']) {
            return Err(anyhow!("storage.key must not contain path separators"));
        }
        Ok(())
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            max_cycles: self.max_cycles,
            max_nesting: self.max_nesting,
        }
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            max_update_depth: self.max_update_depth,
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ActionsConfig::default()`.
pub fn load_config(path: &Path) -> Result<ActionsConfig> {
    if !path.exists() {
        let cfg = ActionsConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ActionsConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &ActionsConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
