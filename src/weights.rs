use crate::errors::EngineError;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

pub const WEIGHT_SCHEMA_VERSION: u32 = 1;

/// Factor weights plus the provenance of the last optimization run.
/// A single current instance is persisted; the auto strategy manager
/// replaces it atomically and keeps the previous weights for rollback.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WeightConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    pub momentum_weight: f64,
    pub short_mom_weight: f64,
    pub volatility_weight: f64,
    pub volume_weight: f64,
    pub target_count: usize,
    pub optimized_date: Option<DateTime<Utc>>,
    pub baseline_sharpe: f64,
    pub baseline_return: f64,
    pub baseline_mdd: f64,
    pub auto_update: bool,
    pub previous_weights: Option<Box<WeightConfig>>,
}

fn default_version() -> u32 {
    WEIGHT_SCHEMA_VERSION
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            version: WEIGHT_SCHEMA_VERSION,
            momentum_weight: 0.40,
            short_mom_weight: 0.20,
            volatility_weight: 0.20,
            volume_weight: 0.20,
            target_count: 10,
            optimized_date: None,
            baseline_sharpe: 0.0,
            baseline_return: 0.0,
            baseline_mdd: 0.0,
            auto_update: true,
            previous_weights: None,
        }
    }
}

impl WeightConfig {
    /// Rejects a proposed config before it is ever persisted.
    pub fn validate(&self) -> Result<(), EngineError> {
        let weights = [
            ("momentumWeight", self.momentum_weight),
            ("shortMomWeight", self.short_mom_weight),
            ("volatilityWeight", self.volatility_weight),
            ("volumeWeight", self.volume_weight),
        ];
        for (key, value) in weights {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(EngineError::ConfigValidation {
                    message: format!("{} must be within [0, 1] (value: {})", key, value),
                });
            }
        }
        let total = self.momentum_weight
            + self.short_mom_weight
            + self.volatility_weight
            + self.volume_weight;
        if total <= 0.0 {
            return Err(EngineError::ConfigValidation {
                message: "factor weights must not all be zero".to_string(),
            });
        }
        if self.target_count == 0 {
            return Err(EngineError::ConfigValidation {
                message: "targetCount must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Shared weight configuration. Reads take a snapshot copy; writes replace
/// the whole config and persist it atomically (temp file + rename), so a
/// crash never leaves a partially written file behind.
pub struct WeightStore {
    path: PathBuf,
    current: RwLock<WeightConfig>,
}

impl WeightStore {
    /// Loads the store from disk. A missing, corrupt or partially written
    /// file degrades to defaults with a warning rather than failing startup.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let config = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<WeightConfig>(&raw) {
                Ok(config) => {
                    if let Err(error) = config.validate() {
                        warn!(
                            "Weight config at {} failed validation ({}); using defaults",
                            path.display(),
                            error
                        );
                        WeightConfig::default()
                    } else {
                        config
                    }
                }
                Err(error) => {
                    warn!(
                        "Weight config at {} is unreadable ({}); using defaults",
                        path.display(),
                        error
                    );
                    WeightConfig::default()
                }
            },
            Err(_) => {
                info!(
                    "No weight config at {}; starting with defaults",
                    path.display()
                );
                WeightConfig::default()
            }
        };
        Self {
            path,
            current: RwLock::new(config),
        }
    }

    /// Snapshot copy of the current config.
    pub fn snapshot(&self) -> WeightConfig {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Validates, persists and installs a full replacement config. The
    /// outgoing config is recorded in `previous_weights` for rollback.
    pub fn replace(&self, mut next: WeightConfig) -> Result<()> {
        next.validate()?;
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut previous = guard.clone();
        previous.previous_weights = None;
        next.previous_weights = Some(Box::new(previous));
        next.version = WEIGHT_SCHEMA_VERSION;
        Self::persist(&self.path, &next)?;
        *guard = next;
        Ok(())
    }

    /// Restores `previous_weights` as the active config, if present.
    pub fn rollback(&self) -> Result<bool> {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(previous) = guard.previous_weights.take() else {
            return Ok(false);
        };
        let restored = *previous;
        Self::persist(&self.path, &restored)?;
        *guard = restored;
        Ok(true)
    }

    pub fn reset(&self) -> Result<()> {
        let defaults = WeightConfig::default();
        Self::persist(&self.path, &defaults)?;
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = defaults;
        Ok(())
    }

    fn persist(path: &Path, config: &WeightConfig) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating state directory {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(config)?;
        let temp = path.with_extension("json.tmp");
        fs::write(&temp, serialized)
            .with_context(|| format!("writing weight config to {}", temp.display()))?;
        fs::rename(&temp, path)
            .with_context(|| format!("installing weight config at {}", path.display()))?;
        Ok(())
    }
}
