use crate::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Position sizing policy selected for new entries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SizingPolicy {
    EqualWeight,
    RiskBased,
    VolatilityAdjusted,
}

impl Default for SizingPolicy {
    fn default() -> Self {
        SizingPolicy::EqualWeight
    }
}

/// Circuit breaker limits consumed by the risk monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskLimits {
    pub max_drawdown_ratio: f64,
    pub max_consecutive_losses: u32,
    pub daily_loss_limit_ratio: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_drawdown_ratio: 0.15,
            max_consecutive_losses: 5,
            daily_loss_limit_ratio: 0.03,
        }
    }
}

/// Exit rule parameters applied by the position lifecycle manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExitRules {
    pub stop_loss_ratio: f64,
    pub trailing_stop_ratio: f64,
    pub atr_multiplier: f64,
    pub use_atr_stop: bool,
}

impl Default for ExitRules {
    fn default() -> Self {
        Self {
            stop_loss_ratio: 0.07,
            trailing_stop_ratio: 0.10,
            atr_multiplier: 2.0,
            use_atr_stop: false,
        }
    }
}

/// Live engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    pub initial_capital: f64,
    pub target_count: usize,
    pub cash_reserve_ratio: f64,
    pub max_position_weight: f64,
    pub risk_per_trade: f64,
    pub sizing_policy: SizingPolicy,
    pub monitor_interval_secs: u64,
    pub dry_run: bool,
    pub exit_rules: ExitRules,
    pub risk_limits: RiskLimits,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_capital: 100_000_000.0,
            target_count: 10,
            cash_reserve_ratio: 0.10,
            max_position_weight: 0.10,
            risk_per_trade: 0.02,
            sizing_policy: SizingPolicy::EqualWeight,
            monitor_interval_secs: 60,
            dry_run: true,
            exit_rules: ExitRules::default(),
            risk_limits: RiskLimits::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        require_ratio("cashReserveRatio", self.cash_reserve_ratio)?;
        require_ratio("maxPositionWeight", self.max_position_weight)?;
        require_ratio("riskPerTrade", self.risk_per_trade)?;
        require_ratio("stopLossRatio", self.exit_rules.stop_loss_ratio)?;
        require_ratio("trailingStopRatio", self.exit_rules.trailing_stop_ratio)?;
        require_ratio("maxDrawdownRatio", self.risk_limits.max_drawdown_ratio)?;
        require_ratio(
            "dailyLossLimitRatio",
            self.risk_limits.daily_loss_limit_ratio,
        )?;
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(EngineError::ConfigValidation {
                message: format!(
                    "initialCapital must be positive (value: {})",
                    self.initial_capital
                ),
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

/// Backtest run configuration. Commission and slippage are deducted on
/// every fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestConfig {
    pub initial_capital: f64,
    pub commission_rate: f64,
    pub slippage_rate: f64,
    pub target_count: usize,
    pub max_position_weight: f64,
    pub rebalance_every_days: usize,
    pub stop_loss_ratio: f64,
    pub take_profit_ratio: f64,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: 100_000_000.0,
            commission_rate: 0.00015,
            slippage_rate: 0.001,
            target_count: 10,
            max_position_weight: 0.10,
            rebalance_every_days: 21,
            stop_loss_ratio: 0.07,
            take_profit_ratio: 0.20,
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        require_ratio("commissionRate", self.commission_rate)?;
        require_ratio("slippageRate", self.slippage_rate)?;
        require_ratio("maxPositionWeight", self.max_position_weight)?;
        require_ratio("stopLossRatio", self.stop_loss_ratio)?;
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(EngineError::ConfigValidation {
                message: format!(
                    "initialCapital must be positive (value: {})",
                    self.initial_capital
                ),
            });
        }
        if self.target_count == 0 || self.rebalance_every_days == 0 {
            return Err(EngineError::ConfigValidation {
                message: "targetCount and rebalanceEveryDays must be greater than zero"
                    .to_string(),
            });
        }
        Ok(())
    }
}

/// Where persisted state lives on disk.
#[derive(Debug, Clone)]
pub struct StatePaths {
    pub weights_file: PathBuf,
    pub positions_file: PathBuf,
    pub scheduler_file: PathBuf,
    pub risk_file: PathBuf,
}

impl StatePaths {
    pub fn under(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            weights_file: dir.join("weights.json"),
            positions_file: dir.join("positions.json"),
            scheduler_file: dir.join("scheduler.json"),
            risk_file: dir.join("risk.json"),
        }
    }
}

fn require_ratio(key: &str, value: f64) -> Result<(), EngineError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(EngineError::ConfigValidation {
            message: format!("{} must be within [0, 1] (value: {})", key, value),
        });
    }
    Ok(())
}
