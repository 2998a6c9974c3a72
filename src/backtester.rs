use crate::config::BacktestConfig;
use crate::errors::EngineError;
use crate::models::{
    BacktestResult, Candle, ClosedTrade, PortfolioSnapshot, Position,
};
use crate::performance::PerformanceCalculator;
use crate::signals::TradeSignal;
use chrono::{DateTime, Utc};
use log::debug;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// Deterministic historical replay. Owns a throwaway position set per run;
/// the same inputs always produce the same trades and equity curve.
pub struct Backtester {
    config: BacktestConfig,
}

impl Backtester {
    pub fn new(config: BacktestConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Replays the signal stream over the candle history day by day,
    /// deducting commission and slippage on every fill, and hands the trade
    /// log plus equity curve to the performance analyzer.
    pub fn run(
        &self,
        candles_by_code: &HashMap<String, Vec<Candle>>,
        signals: &[TradeSignal],
    ) -> Result<BacktestResult, EngineError> {
        let dates = Self::trading_dates(candles_by_code);
        if dates.is_empty() {
            return Err(EngineError::OptimizationFailure {
                message: "no candles to backtest".to_string(),
            });
        }

        let mut cash = self.config.initial_capital;
        let mut positions: HashMap<String, Position> = HashMap::new();
        let mut trades: Vec<ClosedTrade> = Vec::new();
        let mut snapshots: Vec<PortfolioSnapshot> = Vec::new();
        let mut peak_value = self.config.initial_capital;
        let mut running_mdd = 0.0;
        let mut signal_cursor = 0usize;
        let mut pending: Vec<&TradeSignal> = Vec::new();
        let mut day_index = 0usize;

        for date in &dates {
            let closes = Self::closes_on(candles_by_code, *date);

            // Mark open positions and run exits before any new entry.
            let mut exited: Vec<String> = Vec::new();
            let mut codes: Vec<&String> = positions.keys().collect();
            codes.sort();
            let codes: Vec<String> = codes.into_iter().cloned().collect();
            for code in codes {
                let Some(close) = closes.get(&code).copied() else {
                    continue;
                };
                let position = positions.get_mut(&code).unwrap();
                position.update_price(close);

                let stop = position.entry_price * (1.0 - self.config.stop_loss_ratio);
                let target = position.entry_price * (1.0 + self.config.take_profit_ratio);
                let (exit_price, reason) = if close <= stop {
                    (close * (1.0 - self.config.slippage_rate), "stop_loss")
                } else if close >= target {
                    (close * (1.0 - self.config.slippage_rate), "take_profit")
                } else {
                    continue;
                };

                let proceeds = exit_price * position.quantity as f64;
                let commission = proceeds * self.config.commission_rate;
                cash += proceeds - commission;
                trades.push(ClosedTrade {
                    code: code.clone(),
                    quantity: position.quantity,
                    entry_price: position.entry_price,
                    exit_price,
                    entry_date: position.entered_at,
                    exit_date: *date,
                    pnl: (exit_price - position.entry_price) * position.quantity as f64
                        - commission,
                    reason: reason.to_string(),
                });
                exited.push(code);
            }
            for code in exited {
                positions.remove(&code);
            }

            // Entries happen on rebalance days only. Signals arriving on the
            // days in between are buffered and acted on at the next
            // rebalance day, never dropped.
            while signal_cursor < signals.len() && signals[signal_cursor].date <= *date {
                pending.push(&signals[signal_cursor]);
                signal_cursor += 1;
            }
            let rebalance_day = day_index % self.config.rebalance_every_days == 0;
            if rebalance_day {
                pending.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.code.cmp(&b.code)));
                for signal in pending.drain(..) {
                    if positions.len() >= self.config.target_count {
                        break;
                    }
                    if positions.contains_key(&signal.code) {
                        continue;
                    }
                    let Some(close) = closes.get(&signal.code).copied() else {
                        continue;
                    };
                    let equity = cash
                        + positions.values().map(Position::market_value).sum::<f64>();
                    let slot = equity / self.config.target_count as f64;
                    let allocation = slot.min(equity * self.config.max_position_weight);
                    let fill_price = close * (1.0 + self.config.slippage_rate);
                    let quantity = (allocation / fill_price).floor() as i32;
                    if quantity <= 0 {
                        continue;
                    }
                    let cost = fill_price * quantity as f64;
                    let commission = cost * self.config.commission_rate;
                    if cost + commission > cash {
                        debug!("Skipping {} on {}: not enough cash", signal.code, date);
                        continue;
                    }
                    cash -= cost + commission;
                    let stop = fill_price * (1.0 - self.config.stop_loss_ratio);
                    let target_1 = fill_price * (1.0 + self.config.take_profit_ratio);
                    positions.insert(
                        signal.code.clone(),
                        Position::open(
                            &signal.code,
                            fill_price,
                            quantity,
                            *date,
                            stop,
                            target_1,
                            target_1,
                        ),
                    );
                }
            }

            let invested: f64 = positions.values().map(Position::market_value).sum();
            let total_value = cash + invested;
            if total_value > peak_value {
                peak_value = total_value;
            } else if peak_value > 0.0 {
                let drawdown = (peak_value - total_value) / peak_value;
                if drawdown > running_mdd {
                    running_mdd = drawdown;
                }
            }
            snapshots.push(PortfolioSnapshot {
                timestamp: *date,
                total_value,
                cash,
                invested_value: invested,
                positions: positions.values().cloned().collect(),
                max_drawdown: running_mdd,
            });
            day_index += 1;
        }

        let start_date = dates[0];
        let end_date = *dates.last().unwrap();
        let final_value = snapshots.last().map(|s| s.total_value).unwrap_or(cash);
        let performance = PerformanceCalculator::calculate_performance(
            &trades,
            self.config.initial_capital,
            final_value,
            start_date,
            end_date,
            &snapshots,
        );
        let monthly_returns = PerformanceCalculator::monthly_returns(&snapshots);

        Ok(BacktestResult {
            id: Uuid::new_v4().to_string(),
            start_date,
            end_date,
            initial_capital: self.config.initial_capital,
            final_value,
            performance,
            monthly_returns,
            daily_snapshots: snapshots,
            trades,
            created_at: Utc::now(),
        })
    }

    fn trading_dates(candles_by_code: &HashMap<String, Vec<Candle>>) -> Vec<DateTime<Utc>> {
        let set: BTreeSet<DateTime<Utc>> = candles_by_code
            .values()
            .flat_map(|candles| candles.iter().map(|c| c.date))
            .collect();
        set.into_iter().collect()
    }

    fn closes_on(
        candles_by_code: &HashMap<String, Vec<Candle>>,
        date: DateTime<Utc>,
    ) -> HashMap<String, f64> {
        let mut closes = HashMap::new();
        for (code, candles) in candles_by_code {
            if let Some(candle) = candles.iter().find(|c| c.date == date) {
                closes.insert(code.clone(), candle.close);
            }
        }
        closes
    }
}
