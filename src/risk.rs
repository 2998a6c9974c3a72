use crate::config::RiskLimits;
use crate::errors::EngineError;
use crate::models::{ClosedTrade, PortfolioSnapshot, RiskAlert, RiskAlertKind, Severity};
use chrono::NaiveDate;
use log::warn;
use serde::{Deserialize, Serialize};

/// The slice of monitor state that survives a process restart, so a
/// tripped breaker stays tripped until an explicit reset.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RiskState {
    pub consecutive_losses: u32,
    pub is_trading_paused: bool,
}

/// Stateful circuit breaker over the portfolio. Consumes closed-trade
/// outcomes and snapshots; can halt new entries. Exits are never gated by
/// this monitor so risk containment cannot prevent de-risking.
pub struct RiskMonitor {
    limits: RiskLimits,
    consecutive_losses: u32,
    is_trading_paused: bool,
    peak_value: f64,
    daily_date: Option<NaiveDate>,
    daily_pnl: f64,
    drawdown_alerted: bool,
    losses_alerted: bool,
    daily_loss_alerted: bool,
}

impl RiskMonitor {
    pub fn new(limits: RiskLimits) -> Self {
        Self {
            limits,
            consecutive_losses: 0,
            is_trading_paused: false,
            peak_value: 0.0,
            daily_date: None,
            daily_pnl: 0.0,
            drawdown_alerted: false,
            losses_alerted: false,
            daily_loss_alerted: false,
        }
    }

    pub fn is_trading_paused(&self) -> bool {
        self.is_trading_paused
    }

    /// Gate for new entries. Exits are never gated.
    pub fn ensure_entries_allowed(&self) -> Result<(), EngineError> {
        if self.is_trading_paused {
            return Err(EngineError::RiskLimitExceeded {
                message: format!(
                    "new entries paused ({} consecutive losses); reset required",
                    self.consecutive_losses
                ),
            });
        }
        Ok(())
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    pub fn snapshot_state(&self) -> RiskState {
        RiskState {
            consecutive_losses: self.consecutive_losses,
            is_trading_paused: self.is_trading_paused,
        }
    }

    pub fn restore_state(&mut self, state: RiskState) {
        self.consecutive_losses = state.consecutive_losses;
        self.is_trading_paused = state.is_trading_paused;
    }

    /// Explicit operator reset. A winning trade alone never clears a pause.
    pub fn reset(&mut self) {
        self.is_trading_paused = false;
        self.consecutive_losses = 0;
        self.drawdown_alerted = false;
        self.losses_alerted = false;
        self.daily_loss_alerted = false;
    }

    /// Feeds one closed trade into the loss streak and daily P&L tracking.
    pub fn record_trade(&mut self, trade: &ClosedTrade) {
        if trade.pnl < 0.0 {
            self.consecutive_losses += 1;
        } else if trade.pnl > 0.0 {
            self.consecutive_losses = 0;
            self.losses_alerted = false;
        }
        let trade_date = trade.exit_date.date_naive();
        if self.daily_date == Some(trade_date) {
            self.daily_pnl += trade.pnl;
        } else {
            self.daily_date = Some(trade_date);
            self.daily_pnl = trade.pnl;
            self.daily_loss_alerted = false;
        }
    }

    /// Evaluates every limit, in order: max drawdown (critical),
    /// consecutive losses (pauses entries until reset), daily loss.
    pub fn check_all_risks(&mut self, snapshot: &PortfolioSnapshot) -> Vec<RiskAlert> {
        let mut alerts = Vec::new();

        if snapshot.total_value > self.peak_value {
            self.peak_value = snapshot.total_value;
        }
        let drawdown = if self.peak_value > 0.0 {
            (self.peak_value - snapshot.total_value) / self.peak_value
        } else {
            0.0
        };
        if drawdown >= self.limits.max_drawdown_ratio {
            if !self.drawdown_alerted {
                self.drawdown_alerted = true;
                self.is_trading_paused = true;
                alerts.push(RiskAlert {
                    kind: RiskAlertKind::DrawdownExceeded,
                    severity: Severity::Critical,
                    message: format!(
                        "drawdown {:.2}% breached limit {:.2}%; new entries halted",
                        drawdown * 100.0,
                        self.limits.max_drawdown_ratio * 100.0
                    ),
                    metric_value: drawdown,
                });
            }
        } else {
            self.drawdown_alerted = false;
        }

        // Gated on its own flag, not the pause flag: a pause caused by
        // another limit must not swallow the loss-streak alert.
        if self.consecutive_losses >= self.limits.max_consecutive_losses
            && !self.losses_alerted
        {
            self.losses_alerted = true;
            self.is_trading_paused = true;
            warn!(
                "Pausing new entries after {} consecutive losing trades",
                self.consecutive_losses
            );
            alerts.push(RiskAlert {
                kind: RiskAlertKind::ConsecutiveLosses,
                severity: Severity::Warning,
                message: format!(
                    "{} consecutive losses reached limit {}; new entries paused until reset",
                    self.consecutive_losses, self.limits.max_consecutive_losses
                ),
                metric_value: self.consecutive_losses as f64,
            });
        }

        let daily_loss_limit = snapshot.total_value * self.limits.daily_loss_limit_ratio;
        if self.daily_pnl < -daily_loss_limit && !self.daily_loss_alerted {
            self.daily_loss_alerted = true;
            self.is_trading_paused = true;
            alerts.push(RiskAlert {
                kind: RiskAlertKind::DailyLossLimit,
                severity: Severity::Warning,
                message: format!(
                    "daily loss {:.0} breached limit {:.0}; new entries paused",
                    self.daily_pnl, -daily_loss_limit
                ),
                metric_value: self.daily_pnl,
            });
        }

        alerts
    }
}
