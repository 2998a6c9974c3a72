use crate::models::{ClosedTrade, MonthlyReturn, PerformanceReport, PortfolioSnapshot};
use chrono::{DateTime, Datelike, Utc};
use statrs::statistics::Statistics;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const RISK_FREE_RATE: f64 = 0.02;

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    /// Full report over one equity curve and its closed trades. All ratios
    /// are expressed as fractions (0.15 = 15%), never percent.
    pub fn calculate_performance(
        trades: &[ClosedTrade],
        initial_capital: f64,
        final_value: f64,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        daily_snapshots: &[PortfolioSnapshot],
    ) -> PerformanceReport {
        let final_value = if final_value.is_finite() {
            final_value
        } else {
            daily_snapshots
                .last()
                .map(|s| s.total_value)
                .unwrap_or(initial_capital)
        };

        let total_return = if initial_capital > 0.0 {
            (final_value - initial_capital) / initial_capital
        } else {
            0.0
        };
        let cagr = Self::calculate_cagr(initial_capital, final_value, start_date, end_date);

        let returns = Self::daily_returns(daily_snapshots);
        let annualized_volatility = if returns.len() >= 2 {
            returns.clone().std_dev() * TRADING_DAYS_PER_YEAR.sqrt()
        } else {
            0.0
        };
        let sharpe_ratio = Self::calculate_sharpe_ratio(&returns);
        let sortino_ratio = Self::calculate_sortino_ratio(&returns);
        let (max_drawdown, max_drawdown_days) = Self::calculate_max_drawdown(daily_snapshots);
        let calmar_ratio = if max_drawdown > f64::EPSILON && cagr.is_finite() {
            cagr / max_drawdown
        } else {
            0.0
        };

        let mut winning_pnls = Vec::new();
        let mut losing_pnls = Vec::new();
        for trade in trades {
            if trade.pnl > 0.0 {
                winning_pnls.push(trade.pnl);
            } else if trade.pnl < 0.0 {
                losing_pnls.push(trade.pnl);
            }
        }
        let total_trades = trades.len() as i32;
        let winning_trades = winning_pnls.len() as i32;
        let losing_trades = losing_pnls.len() as i32;
        let win_rate = if total_trades > 0 {
            winning_trades as f64 / total_trades as f64
        } else {
            0.0
        };
        let gross_profit: f64 = winning_pnls.iter().sum();
        let gross_loss: f64 = losing_pnls.iter().map(|pnl| pnl.abs()).sum();
        // Infinite profit factor (no losing trades) is reported as None so
        // downstream comparisons never see an f64 infinity.
        let profit_factor = if gross_loss > 0.0 {
            Some(gross_profit / gross_loss)
        } else {
            None
        };

        PerformanceReport {
            total_return,
            cagr,
            annualized_volatility,
            sharpe_ratio,
            sortino_ratio,
            calmar_ratio,
            max_drawdown,
            max_drawdown_days,
            total_trades,
            winning_trades,
            losing_trades,
            win_rate,
            avg_win: Self::average(&winning_pnls),
            avg_loss: Self::average(&losing_pnls),
            profit_factor,
        }
    }

    /// Calendar-month returns from the daily equity curve. Each month's
    /// return is measured against the last value of the previous month.
    pub fn monthly_returns(daily_snapshots: &[PortfolioSnapshot]) -> Vec<MonthlyReturn> {
        let mut out: Vec<MonthlyReturn> = Vec::new();
        let mut month_key: Option<(i32, u32)> = None;
        let mut month_base = 0.0;
        let mut month_last = 0.0;

        for snapshot in daily_snapshots {
            let key = (snapshot.timestamp.year(), snapshot.timestamp.month());
            match month_key {
                Some(current) if current == key => {
                    month_last = snapshot.total_value;
                }
                Some((year, month)) => {
                    out.push(MonthlyReturn {
                        year,
                        month,
                        return_ratio: Self::ratio(month_base, month_last),
                    });
                    month_key = Some(key);
                    month_base = month_last;
                    month_last = snapshot.total_value;
                }
                None => {
                    month_key = Some(key);
                    month_base = snapshot.total_value;
                    month_last = snapshot.total_value;
                }
            }
        }
        if let Some((year, month)) = month_key {
            out.push(MonthlyReturn {
                year,
                month,
                return_ratio: Self::ratio(month_base, month_last),
            });
        }
        out
    }

    fn ratio(base: f64, value: f64) -> f64 {
        if base > 0.0 {
            (value - base) / base
        } else {
            0.0
        }
    }

    fn calculate_cagr(
        initial_capital: f64,
        final_value: f64,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> f64 {
        if initial_capital <= 0.0 || !final_value.is_finite() || end_date <= start_date {
            return 0.0;
        }
        let years = (end_date - start_date).num_seconds() as f64
            / (365.25_f64 * 24.0 * 60.0 * 60.0);
        if years <= 0.0 {
            return 0.0;
        }
        let growth = final_value / initial_capital;
        if growth <= 0.0 {
            return -1.0;
        }
        growth.powf(1.0 / years) - 1.0
    }

    fn daily_returns(daily_snapshots: &[PortfolioSnapshot]) -> Vec<f64> {
        daily_snapshots
            .windows(2)
            .map(|window| Self::ratio(window[0].total_value, window[1].total_value))
            .collect()
    }

    pub fn calculate_sharpe_ratio(returns: &[f64]) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }
        let mean_return = returns.to_vec().mean();
        let std_dev = returns.to_vec().std_dev();
        if std_dev == 0.0 {
            return 0.0;
        }
        let annualized_return = mean_return * TRADING_DAYS_PER_YEAR;
        let annualized_volatility = std_dev * TRADING_DAYS_PER_YEAR.sqrt();
        (annualized_return - RISK_FREE_RATE) / annualized_volatility
    }

    /// Sharpe variant penalizing only downside deviation. Zero when the
    /// curve never had a down day.
    pub fn calculate_sortino_ratio(returns: &[f64]) -> f64 {
        if returns.len() < 2 {
            return 0.0;
        }
        let downside_sq_sum: f64 = returns
            .iter()
            .filter(|r| **r < 0.0)
            .map(|r| r * r)
            .sum();
        let downside_dev = (downside_sq_sum / returns.len() as f64).sqrt();
        if downside_dev == 0.0 {
            return 0.0;
        }
        let mean_return = returns.to_vec().mean();
        let annualized_return = mean_return * TRADING_DAYS_PER_YEAR;
        let annualized_downside = downside_dev * TRADING_DAYS_PER_YEAR.sqrt();
        (annualized_return - RISK_FREE_RATE) / annualized_downside
    }

    /// Deepest peak-to-trough drawdown as a fraction, plus the day count of
    /// that drawdown episode (peak until recovery, or until the series ends
    /// while still underwater).
    fn calculate_max_drawdown(daily_snapshots: &[PortfolioSnapshot]) -> (f64, i64) {
        if daily_snapshots.is_empty() {
            return (0.0, 0);
        }
        let mut max_drawdown = 0.0;
        let mut max_drawdown_days = 0i64;
        let mut peak_value = daily_snapshots[0].total_value;
        let mut peak_date = daily_snapshots[0].timestamp;
        let mut episode_deepest = 0.0;

        for snapshot in daily_snapshots {
            if snapshot.total_value >= peak_value {
                if episode_deepest >= max_drawdown && episode_deepest > 0.0 {
                    max_drawdown_days = (snapshot.timestamp - peak_date).num_days();
                }
                peak_value = snapshot.total_value;
                peak_date = snapshot.timestamp;
                episode_deepest = 0.0;
            } else if peak_value > 0.0 {
                let drawdown = (peak_value - snapshot.total_value) / peak_value;
                if drawdown > episode_deepest {
                    episode_deepest = drawdown;
                }
                if drawdown > max_drawdown {
                    max_drawdown = drawdown;
                }
                if drawdown >= max_drawdown {
                    max_drawdown_days = (snapshot.timestamp - peak_date).num_days();
                }
            }
        }
        (max_drawdown, max_drawdown_days)
    }

    fn average(values: &[f64]) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        for value in values.iter().copied() {
            if value.is_finite() {
                sum += value;
                count += 1;
            }
        }
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot(date: DateTime<Utc>, total_value: f64) -> PortfolioSnapshot {
        PortfolioSnapshot {
            timestamp: date,
            total_value,
            cash: total_value,
            invested_value: 0.0,
            positions: Vec::new(),
            max_drawdown: 0.0,
        }
    }

    fn day(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
    }

    fn trade(pnl: f64) -> ClosedTrade {
        let now = Utc::now();
        ClosedTrade {
            code: "005930".to_string(),
            quantity: 10,
            entry_price: 100.0,
            exit_price: 100.0 + pnl / 10.0,
            entry_date: now,
            exit_date: now,
            pnl,
            reason: "test".to_string(),
        }
    }

    #[test]
    fn total_return_and_cagr_from_curve_endpoints() {
        let start = day(2020, 1, 1);
        let end = day(2023, 1, 1);
        let snapshots = vec![snapshot(start, 100_000.0), snapshot(end, 121_000.0)];
        let report = PerformanceCalculator::calculate_performance(
            &[],
            100_000.0,
            121_000.0,
            start,
            end,
            &snapshots,
        );
        assert!((report.total_return - 0.21).abs() < 1e-9);
        let years = (end - start).num_seconds() as f64 / (365.25 * 24.0 * 3600.0);
        let expected_cagr = 1.21_f64.powf(1.0 / years) - 1.0;
        assert!((report.cagr - expected_cagr).abs() < 1e-9);
    }

    #[test]
    fn profit_factor_is_none_without_losses() {
        let start = day(2024, 1, 1);
        let end = day(2024, 6, 1);
        let trades = vec![trade(500.0), trade(250.0)];
        let snapshots = vec![snapshot(start, 100_000.0), snapshot(end, 100_750.0)];
        let report = PerformanceCalculator::calculate_performance(
            &trades, 100_000.0, 100_750.0, start, end, &snapshots,
        );
        assert!(report.profit_factor.is_none());
        assert_eq!(report.winning_trades, 2);
        assert_eq!(report.losing_trades, 0);
        assert!((report.win_rate - 1.0).abs() < 1e-9);
    }

    #[test]
    fn profit_factor_uses_gross_profit_over_gross_loss() {
        let start = day(2024, 1, 1);
        let end = day(2024, 6, 1);
        let trades = vec![trade(600.0), trade(-200.0), trade(-100.0)];
        let snapshots = vec![snapshot(start, 100_000.0), snapshot(end, 100_300.0)];
        let report = PerformanceCalculator::calculate_performance(
            &trades, 100_000.0, 100_300.0, start, end, &snapshots,
        );
        assert!((report.profit_factor.unwrap() - 2.0).abs() < 1e-9);
        assert!((report.avg_win - 600.0).abs() < 1e-9);
        assert!((report.avg_loss + 150.0).abs() < 1e-9);
    }

    #[test]
    fn sortino_is_zero_without_down_days() {
        let returns = vec![0.01, 0.02, 0.0, 0.005];
        assert_eq!(PerformanceCalculator::calculate_sortino_ratio(&returns), 0.0);
    }

    #[test]
    fn drawdown_depth_and_duration_are_tracked() {
        let snapshots = vec![
            snapshot(day(2024, 1, 1), 100_000.0),
            snapshot(day(2024, 1, 2), 110_000.0),
            snapshot(day(2024, 1, 5), 88_000.0),
            snapshot(day(2024, 1, 12), 99_000.0),
            snapshot(day(2024, 1, 20), 112_000.0),
        ];
        let report = PerformanceCalculator::calculate_performance(
            &[],
            100_000.0,
            112_000.0,
            day(2024, 1, 1),
            day(2024, 1, 20),
            &snapshots,
        );
        // Peak 110k on Jan 2, trough 88k on Jan 5: 20% drawdown.
        assert!((report.max_drawdown - 0.20).abs() < 1e-9);
        // Underwater from Jan 2 until the new peak on Jan 20.
        assert_eq!(report.max_drawdown_days, 18);
    }

    #[test]
    fn monthly_returns_chain_across_month_boundaries() {
        let snapshots = vec![
            snapshot(day(2024, 1, 2), 100_000.0),
            snapshot(day(2024, 1, 31), 105_000.0),
            snapshot(day(2024, 2, 15), 102_900.0),
            snapshot(day(2024, 2, 28), 110_250.0),
        ];
        let monthly = PerformanceCalculator::monthly_returns(&snapshots);
        assert_eq!(monthly.len(), 2);
        assert_eq!((monthly[0].year, monthly[0].month), (2024, 1));
        assert!((monthly[0].return_ratio - 0.05).abs() < 1e-9);
        assert_eq!((monthly[1].year, monthly[1].month), (2024, 2));
        assert!((monthly[1].return_ratio - 0.05).abs() < 1e-9);
    }
}
