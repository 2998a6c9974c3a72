use crate::errors::EngineError;
use crate::models::Candle;
use crate::weights::WeightConfig;
use chrono::{DateTime, Datelike, Utc};
use std::collections::HashMap;

/// A dated BUY candidate produced by a strategy for the backtester.
#[derive(Debug, Clone)]
pub struct TradeSignal {
    pub code: String,
    pub date: DateTime<Utc>,
    pub score: f64,
}

/// Signal generator over historical candles. Implementations must be pure:
/// the same history and weights always yield the same signal stream.
pub trait Strategy: Send + Sync {
    fn id(&self) -> &'static str;

    fn generate_signals(
        &self,
        candles_by_code: &HashMap<String, Vec<Candle>>,
        weights: &WeightConfig,
    ) -> Vec<TradeSignal>;
}

/// Strategy registry, resolved at compile time and validated at startup.
pub fn create_strategy(id: &str) -> Result<Box<dyn Strategy>, EngineError> {
    match id {
        "momentum_rank" => Ok(Box::new(MomentumRankStrategy)),
        "high_breakout" => Ok(Box::new(HighBreakoutStrategy::default())),
        other => Err(EngineError::ConfigValidation {
            message: format!("unknown strategy '{}'", other),
        }),
    }
}

pub fn strategy_ids() -> &'static [&'static str] {
    &["momentum_rank", "high_breakout"]
}

fn first_trading_days(candles_by_code: &HashMap<String, Vec<Candle>>) -> Vec<DateTime<Utc>> {
    let mut dates: Vec<DateTime<Utc>> = candles_by_code
        .values()
        .flat_map(|candles| candles.iter().map(|c| c.date))
        .collect();
    dates.sort();
    dates.dedup();

    let mut firsts = Vec::new();
    let mut seen_month: Option<(i32, u32)> = None;
    for date in dates {
        let key = (date.year(), date.month());
        if seen_month != Some(key) {
            seen_month = Some(key);
            firsts.push(date);
        }
    }
    firsts
}

fn trailing_return(candles: &[Candle], as_of: DateTime<Utc>, bars: usize) -> Option<f64> {
    let upto: Vec<&Candle> = candles.iter().filter(|c| c.date <= as_of).collect();
    if upto.len() <= bars {
        return None;
    }
    let latest = upto.last()?.close;
    let earlier = upto[upto.len() - 1 - bars].close;
    if earlier > 0.0 {
        Some((latest - earlier) / earlier)
    } else {
        None
    }
}

/// Monthly cross-sectional momentum: on each first trading day of a month,
/// ranks the universe by a weighted blend of trailing 1/3/6-month returns
/// and signals the top half.
pub struct MomentumRankStrategy;

impl Strategy for MomentumRankStrategy {
    fn id(&self) -> &'static str {
        "momentum_rank"
    }

    fn generate_signals(
        &self,
        candles_by_code: &HashMap<String, Vec<Candle>>,
        weights: &WeightConfig,
    ) -> Vec<TradeSignal> {
        let weight_total =
            (weights.momentum_weight + weights.short_mom_weight).max(f64::EPSILON);
        let mut signals = Vec::new();
        for rebalance_date in first_trading_days(candles_by_code) {
            let mut ranked: Vec<TradeSignal> = candles_by_code
                .iter()
                .filter_map(|(code, candles)| {
                    let long = trailing_return(candles, rebalance_date, 63)?;
                    let short = trailing_return(candles, rebalance_date, 21)?;
                    let score = (long * weights.momentum_weight
                        + short * weights.short_mom_weight)
                        / weight_total;
                    Some(TradeSignal {
                        code: code.clone(),
                        date: rebalance_date,
                        score,
                    })
                })
                .collect();
            ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.code.cmp(&b.code)));
            let keep = ranked.len().div_ceil(2);
            signals.extend(ranked.into_iter().take(keep).filter(|s| s.score > 0.0));
        }
        signals.sort_by(|a, b| a.date.cmp(&b.date).then(a.code.cmp(&b.code)));
        signals
    }
}

/// Signals a close at a new N-day high. Weight config is ignored; the
/// breakout window is the only parameter.
pub struct HighBreakoutStrategy {
    pub window: usize,
}

impl Default for HighBreakoutStrategy {
    fn default() -> Self {
        Self { window: 60 }
    }
}

impl Strategy for HighBreakoutStrategy {
    fn id(&self) -> &'static str {
        "high_breakout"
    }

    fn generate_signals(
        &self,
        candles_by_code: &HashMap<String, Vec<Candle>>,
        _weights: &WeightConfig,
    ) -> Vec<TradeSignal> {
        let mut signals = Vec::new();
        for (code, candles) in candles_by_code {
            for i in self.window..candles.len() {
                let close = candles[i].close;
                let prior_high = candles[i - self.window..i]
                    .iter()
                    .map(|c| c.high)
                    .fold(f64::MIN, f64::max);
                if close > prior_high {
                    signals.push(TradeSignal {
                        code: code.clone(),
                        date: candles[i].date,
                        score: close / prior_high - 1.0,
                    });
                }
            }
        }
        signals.sort_by(|a, b| a.date.cmp(&b.date).then(a.code.cmp(&b.code)));
        signals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candles(code: &str, start_day: u32, closes: &[f64]) -> Vec<Candle> {
        closes
            .iter()
            .enumerate()
            .map(|(i, close)| Candle {
                code: code.to_string(),
                date: Utc.with_ymd_and_hms(2024, 1, start_day, 0, 0, 0).unwrap()
                    + chrono::Duration::days(i as i64),
                open: *close,
                high: *close,
                low: *close,
                close: *close,
                volume_shares: 1_000,
            })
            .collect()
    }

    #[test]
    fn unknown_strategy_is_rejected_at_startup() {
        assert!(create_strategy("momentum_rank").is_ok());
        assert!(matches!(
            create_strategy("does_not_exist"),
            Err(EngineError::ConfigValidation { .. })
        ));
    }

    #[test]
    fn breakout_signals_only_on_new_highs() {
        let mut universe = HashMap::new();
        let mut closes: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
        closes.push(95.0); // pullback, no signal
        closes.push(120.0); // breakout
        universe.insert("AAA".to_string(), candles("AAA", 1, &closes));

        let strategy = HighBreakoutStrategy { window: 5 };
        let signals = strategy.generate_signals(&universe, &WeightConfig::default());
        let last = signals.last().unwrap();
        assert_eq!(last.code, "AAA");
        assert!(last.score > 0.0);
        // The pullback day produced nothing.
        assert!(signals
            .iter()
            .all(|s| s.date != universe["AAA"][10].date));
    }

    #[test]
    fn signal_generation_is_deterministic() {
        let mut universe = HashMap::new();
        universe.insert(
            "AAA".to_string(),
            candles("AAA", 1, &(0..90).map(|i| 100.0 + i as f64).collect::<Vec<_>>()),
        );
        universe.insert(
            "BBB".to_string(),
            candles("BBB", 1, &(0..90).map(|i| 100.0 - i as f64 * 0.1).collect::<Vec<_>>()),
        );
        let strategy = MomentumRankStrategy;
        let weights = WeightConfig::default();
        let first = strategy.generate_signals(&universe, &weights);
        let second = strategy.generate_signals(&universe, &weights);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.code, b.code);
            assert_eq!(a.date, b.date);
            assert!((a.score - b.score).abs() < 1e-12);
        }
    }
}
