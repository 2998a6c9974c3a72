use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Daily OHLCV bar for a single instrument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub code: String,
    pub date: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume_shares: i64,
}

/// Live quote as returned by the market data port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub code: String,
    pub price: f64,
    pub high: f64,
    pub low: f64,
    pub volume_shares: i64,
    pub timestamp: DateTime<Utc>,
}

/// Fundamental and momentum inputs consumed by the factor scorer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentMetrics {
    pub code: String,
    #[serde(default)]
    pub name: Option<String>,
    pub per: f64,
    pub pbr: f64,
    pub roe: f64,
    pub operating_margin: f64,
    pub debt_ratio: f64,
    pub eps_growth: f64,
    pub return_1m: f64,
    pub return_3m: f64,
    pub return_6m: f64,
    pub return_12m: f64,
    pub price: f64,
    pub high_52w: f64,
    #[serde(default)]
    pub realized_volatility: f64,
}

/// Output of one scoring pass for one instrument. Immutable once ranked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactorScore {
    pub code: String,
    pub value_score: f64,
    pub momentum_score: f64,
    pub quality_score: f64,
    pub composite_score: f64,
    pub passed_filter: bool,
    pub filter_reason: Option<String>,
    pub rank: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

/// An order produced by the engine, consumed exactly once by the order port.
/// A price of 0.0 means market order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOrder {
    pub code: String,
    pub side: OrderSide,
    pub quantity: i32,
    pub price: f64,
    pub reason: String,
    pub stop_loss: Option<f64>,
    pub target_1: Option<f64>,
    pub target_2: Option<f64>,
}

/// Fill report returned by the order execution port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderOutcome {
    pub success: bool,
    pub order_id: Option<String>,
    pub filled_price: f64,
    pub filled_quantity: i32,
    pub message: Option<String>,
}

/// One fill that contributed to a position's cost basis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryFill {
    pub price: f64,
    pub quantity: i32,
    pub date: DateTime<Utc>,
}

/// An open position. Entry price is the size-weighted average across all
/// entries; all P&L and stop/target math uses that average.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub code: String,
    pub entry_price: f64,
    pub current_price: f64,
    pub quantity: i32,
    pub original_quantity: i32,
    pub entered_at: DateTime<Utc>,
    pub stop_loss: f64,
    pub target_1: f64,
    pub target_2: f64,
    pub highest_price: f64,
    pub stage_one_done: bool,
    pub stage_two_done: bool,
    pub entries: Vec<EntryFill>,
}

impl Position {
    pub fn open(
        code: &str,
        price: f64,
        quantity: i32,
        date: DateTime<Utc>,
        stop_loss: f64,
        target_1: f64,
        target_2: f64,
    ) -> Self {
        Self {
            code: code.to_string(),
            entry_price: price,
            current_price: price,
            quantity,
            original_quantity: quantity,
            entered_at: date,
            stop_loss,
            target_1,
            target_2,
            highest_price: price,
            stage_one_done: false,
            stage_two_done: false,
            entries: vec![EntryFill {
                price,
                quantity,
                date,
            }],
        }
    }

    /// Pyramid into the position. Recomputes the size-weighted average
    /// entry price over the full entry history.
    pub fn add_entry(&mut self, price: f64, quantity: i32, date: DateTime<Utc>) {
        self.entries.push(EntryFill {
            price,
            quantity,
            date,
        });
        let mut total_cost = 0.0;
        let mut total_quantity = 0i64;
        for fill in &self.entries {
            total_cost += fill.price * fill.quantity as f64;
            total_quantity += fill.quantity as i64;
        }
        if total_quantity > 0 {
            self.entry_price = total_cost / total_quantity as f64;
        }
        self.quantity += quantity;
        self.original_quantity += quantity;
        if price > self.highest_price {
            self.highest_price = price;
        }
        self.current_price = price;
    }

    pub fn update_price(&mut self, price: f64) {
        self.current_price = price;
        if price > self.highest_price {
            self.highest_price = price;
        }
    }

    pub fn market_value(&self) -> f64 {
        self.current_price * self.quantity as f64
    }

    pub fn unrealized_pnl(&self) -> f64 {
        (self.current_price - self.entry_price) * self.quantity as f64
    }

    pub fn pnl_ratio(&self) -> f64 {
        if self.entry_price > 0.0 {
            (self.current_price - self.entry_price) / self.entry_price
        } else {
            0.0
        }
    }
}

/// Point-in-time view of the whole portfolio. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioSnapshot {
    pub timestamp: DateTime<Utc>,
    pub total_value: f64,
    pub cash: f64,
    pub invested_value: f64,
    pub positions: Vec<Position>,
    pub max_drawdown: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RiskAlertKind {
    DrawdownExceeded,
    ConsecutiveLosses,
    DailyLossLimit,
}

impl RiskAlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskAlertKind::DrawdownExceeded => "drawdown_exceeded",
            RiskAlertKind::ConsecutiveLosses => "consecutive_losses",
            RiskAlertKind::DailyLossLimit => "daily_loss_limit",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAlert {
    pub kind: RiskAlertKind,
    pub severity: Severity,
    pub message: String,
    pub metric_value: f64,
}

/// A fully closed round trip, used for the daily report and the analyzer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClosedTrade {
    pub code: String,
    pub quantity: i32,
    pub entry_price: f64,
    pub exit_price: f64,
    pub entry_date: DateTime<Utc>,
    pub exit_date: DateTime<Utc>,
    pub pnl: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EngineState {
    Stopped,
    Running,
    Paused,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Stopped => "stopped",
            EngineState::Running => "running",
            EngineState::Paused => "paused",
        }
    }
}

/// Daily phase sequence governing what the engine may do.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SchedulePhase {
    Screening,
    MarketOpen,
    IntradayMonitor,
    MarketClose,
    AfterMarket,
}

impl SchedulePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulePhase::Screening => "screening",
            SchedulePhase::MarketOpen => "market_open",
            SchedulePhase::IntradayMonitor => "intraday_monitor",
            SchedulePhase::MarketClose => "market_close",
            SchedulePhase::AfterMarket => "after_market",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyReturn {
    pub year: i32,
    pub month: u32,
    pub return_ratio: f64,
}

/// Risk-adjusted statistics derived from an equity curve and a trade log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    pub total_return: f64,
    pub cagr: f64,
    pub annualized_volatility: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub max_drawdown: f64,
    pub max_drawdown_days: i64,
    pub total_trades: i32,
    pub winning_trades: i32,
    pub losing_trades: i32,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    /// None when there are no losing trades (infinite profit factor).
    pub profit_factor: Option<f64>,
}

/// Immutable output of one backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacktestResult {
    pub id: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub initial_capital: f64,
    pub final_value: f64,
    pub performance: PerformanceReport,
    pub monthly_returns: Vec<MonthlyReturn>,
    pub daily_snapshots: Vec<PortfolioSnapshot>,
    pub trades: Vec<ClosedTrade>,
    pub created_at: DateTime<Utc>,
}
