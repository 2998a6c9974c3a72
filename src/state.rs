use crate::models::Position;
use crate::risk::RiskState;
use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const POSITION_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionFile {
    #[serde(default = "default_version")]
    version: u32,
    positions: Vec<Position>,
}

fn default_version() -> u32 {
    POSITION_SCHEMA_VERSION
}

/// Persists the open position book so a restart resumes monitoring without
/// losing state. Same durability rules as the weight store: atomic
/// temp-file-and-rename writes, corrupt files degrade to an empty book.
pub struct PositionStore {
    path: PathBuf,
}

impl PositionStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self) -> Vec<Position> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => match serde_json::from_str::<PositionFile>(&raw) {
                Ok(file) => {
                    info!(
                        "Restored {} open position(s) from {}",
                        file.positions.len(),
                        self.path.display()
                    );
                    file.positions
                }
                Err(error) => {
                    warn!(
                        "Position file at {} is unreadable ({}); starting with an empty book",
                        self.path.display(),
                        error
                    );
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        }
    }

    pub fn save(&self, positions: &[Position]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating state directory {}", parent.display()))?;
        }
        let file = PositionFile {
            version: POSITION_SCHEMA_VERSION,
            positions: positions.to_vec(),
        };
        let serialized = serde_json::to_string_pretty(&file)?;
        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, serialized)
            .with_context(|| format!("writing positions to {}", temp.display()))?;
        fs::rename(&temp, &self.path)
            .with_context(|| format!("installing positions at {}", self.path.display()))?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.save(&[])
    }
}

/// Persists the circuit-breaker flags so a tripped risk pause survives a
/// restart. Cleared by the `reset --risk` entry point.
pub struct RiskStateStore {
    path: PathBuf,
}

impl RiskStateStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn load(&self) -> RiskState {
        match fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|error| {
                warn!(
                    "Risk state at {} is unreadable ({}); starting unpaused",
                    self.path.display(),
                    error
                );
                RiskState::default()
            }),
            Err(_) => RiskState::default(),
        }
    }

    pub fn save(&self, state: &RiskState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating state directory {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(state)?;
        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, serialized)
            .with_context(|| format!("writing risk state to {}", temp.display()))?;
        fs::rename(&temp, &self.path)
            .with_context(|| format!("installing risk state at {}", self.path.display()))?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        self.save(&RiskState::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::tempdir;

    #[test]
    fn positions_survive_a_reload() {
        let dir = tempdir().unwrap();
        let store = PositionStore::new(dir.path().join("positions.json"));
        let position = Position::open("005930", 50_000.0, 100, Utc::now(), 46_500.0, 55_250.0, 58_750.0);
        store.save(&[position]).unwrap();

        let restored = store.load();
        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].code, "005930");
        assert_eq!(restored[0].quantity, 100);
    }

    #[test]
    fn corrupt_file_degrades_to_empty_book() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("positions.json");
        fs::write(&path, "[{ truncated").unwrap();
        let store = PositionStore::new(&path);
        assert!(store.load().is_empty());
    }

    #[test]
    fn tripped_risk_pause_survives_a_reload() {
        let dir = tempdir().unwrap();
        let store = RiskStateStore::new(dir.path().join("risk.json"));
        store
            .save(&RiskState {
                consecutive_losses: 5,
                is_trading_paused: true,
            })
            .unwrap();
        let restored = store.load();
        assert!(restored.is_trading_paused);
        assert_eq!(restored.consecutive_losses, 5);

        store.clear().unwrap();
        assert_eq!(store.load(), RiskState::default());
    }

    #[test]
    fn missing_file_is_an_empty_book() {
        let dir = tempdir().unwrap();
        let store = PositionStore::new(dir.path().join("positions.json"));
        assert!(store.load().is_empty());
    }
}
