//! Engine configuration.
//!
//! Stored as JSON under the user config directory. Missing fields take their
//! defaults, so an empty object is a valid config file.

use crate::errors::{MappingError, MappingResult};
use paramforge_core::fit::DEFAULT_ACCEPT_R2;
use paramforge_core::grouping::DEFAULT_ACTIVE_THRESHOLD;
use paramforge_core::invert::{
    DEFAULT_ABSOLUTE_TOLERANCE, DEFAULT_MAX_ITERATIONS, DEFAULT_RELATIVE_TOLERANCE,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "engine.json";
const APP_DIR: &str = "ParamForge";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub reaper_url: String,
    pub request_timeout_ms: u64,
    /// Wait between a write and its readback.
    pub settle_ms: u64,
    pub quick_anchors: Vec<f64>,
    pub quick_extra_points: usize,
    pub quick_accept_r2: f64,
    pub coarse_points: usize,
    pub resolution: usize,
    pub max_label_steps: usize,
    pub fit_accept_r2: f64,
    pub refine_max_iterations: usize,
    pub refine_relative_tolerance: f64,
    pub refine_absolute_tolerance: f64,
    pub active_threshold: f64,
    pub snapshot_ttl_ms: u64,
    pub mapping_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reaper_url: "http://127.0.0.1:8888".to_string(),
            request_timeout_ms: 500,
            settle_ms: 30,
            quick_anchors: vec![0.0, 0.5, 1.0],
            quick_extra_points: 2,
            quick_accept_r2: 0.99,
            coarse_points: 9,
            resolution: 33,
            max_label_steps: 64,
            fit_accept_r2: DEFAULT_ACCEPT_R2,
            refine_max_iterations: DEFAULT_MAX_ITERATIONS,
            refine_relative_tolerance: DEFAULT_RELATIVE_TOLERANCE,
            refine_absolute_tolerance: DEFAULT_ABSOLUTE_TOLERANCE,
            active_threshold: DEFAULT_ACTIVE_THRESHOLD,
            snapshot_ttl_ms: 1000,
            mapping_dir: None,
        }
    }
}

fn config_error(message: impl Into<String>) -> MappingError {
    MappingError::Config {
        message: message.into(),
    }
}

fn base_dir(dir: Option<PathBuf>) -> PathBuf {
    dir.or_else(dirs::home_dir).unwrap_or_else(|| PathBuf::from("."))
}

/// `<config dir>/ParamForge/engine.json`
pub fn default_config_path() -> PathBuf {
    base_dir(dirs::config_dir()).join(APP_DIR).join(CONFIG_FILE)
}

/// `<data dir>/ParamForge/mappings`
pub fn default_mapping_dir() -> PathBuf {
    base_dir(dirs::data_dir()).join(APP_DIR).join("mappings")
}

impl EngineConfig {
    pub fn load(path: &Path) -> MappingResult<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| config_error(format!("Failed to read {}: {}", path.display(), e)))?;
        let config: EngineConfig = serde_json::from_str(&text)
            .map_err(|e| config_error(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the default path; a missing file yields the defaults.
    pub fn load_or_default() -> MappingResult<Self> {
        Self::load_if_present(&default_config_path())
    }

    fn load_if_present(path: &Path) -> MappingResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> MappingResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn validate(&self) -> MappingResult<()> {
        if self.reaper_url.trim().is_empty() {
            return Err(config_error("reaper_url must not be empty"));
        }
        if self.request_timeout_ms == 0 {
            return Err(config_error("request_timeout_ms must be positive"));
        }
        if self.quick_anchors.len() < 2 {
            return Err(config_error("quick_anchors needs at least two values"));
        }
        if self.quick_anchors.iter().any(|x| !(0.0..=1.0).contains(x)) {
            return Err(config_error("quick_anchors must lie in [0, 1]"));
        }
        if self.coarse_points < 2 || self.resolution < 2 {
            return Err(config_error("coarse_points and resolution must be at least 2"));
        }
        if self.max_label_steps < 2 {
            return Err(config_error("max_label_steps must be at least 2"));
        }
        for (name, value) in [
            ("quick_accept_r2", self.quick_accept_r2),
            ("fit_accept_r2", self.fit_accept_r2),
            ("active_threshold", self.active_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(config_error(format!("{} must lie in [0, 1], got {}", name, value)));
            }
        }
        if self.refine_relative_tolerance < 0.0 || self.refine_absolute_tolerance < 0.0 {
            return Err(config_error("refinement tolerances must not be negative"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_millis(self.snapshot_ttl_ms)
    }

    pub fn mapping_dir(&self) -> PathBuf {
        self.mapping_dir.clone().unwrap_or_else(default_mapping_dir)
    }
}
