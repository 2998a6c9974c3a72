use crate::backtester::Backtester;
use crate::config::BacktestConfig;
use crate::errors::EngineError;
use crate::models::Candle;
use crate::ports::{MarketData, Notifier};
use crate::retry::retry_port_operation;
use crate::scheduler::{JobKind, JobScheduler};
use crate::signals::{create_strategy, MomentumRankStrategy, Strategy};
use crate::weights::{WeightConfig, WeightStore};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use crossbeam_channel::unbounded;
use indicatif::ProgressBar;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

/// Candidate must beat this fraction of the recorded baseline Sharpe to be
/// promoted; anything below retains the existing config.
const PROMOTION_FLOOR: f64 = 0.8;
/// Trailing window of the monthly monitoring backtest, in calendar days.
const MONITORING_WINDOW_DAYS: i64 = 92;
/// History fetched per instrument so signal lookbacks have enough bars.
const HISTORY_BARS: usize = 260;
/// Strategy replayed by the monthly monitoring backtest.
const MONITOR_STRATEGY: &str = "momentum_rank";

/// Alert thresholds for the monthly monitoring job.
#[derive(Debug, Clone)]
pub struct MonitorThresholds {
    pub sharpe_floor: f64,
    pub mdd_ceiling: f64,
    pub sharpe_drop_ratio: f64,
}

impl Default for MonitorThresholds {
    fn default() -> Self {
        Self {
            sharpe_floor: 0.5,
            mdd_ceiling: 0.20,
            sharpe_drop_ratio: 0.30,
        }
    }
}

/// Runs on its own schedule, decoupled from the engine's clock: a monthly
/// monitoring backtest over the trailing window, and a semiannual grid
/// search that may atomically replace the stored weight config.
pub struct StrategyManager {
    weights: Arc<WeightStore>,
    market: Arc<dyn MarketData>,
    notifier: Arc<dyn Notifier>,
    scheduler: Arc<Mutex<JobScheduler>>,
    thresholds: MonitorThresholds,
    backtest_config: BacktestConfig,
}

impl StrategyManager {
    pub fn new(
        weights: Arc<WeightStore>,
        market: Arc<dyn MarketData>,
        notifier: Arc<dyn Notifier>,
        scheduler: Arc<Mutex<JobScheduler>>,
        thresholds: MonitorThresholds,
        backtest_config: BacktestConfig,
    ) -> Result<Self, EngineError> {
        backtest_config.validate()?;
        Ok(Self {
            weights,
            market,
            notifier,
            scheduler,
            thresholds,
            backtest_config,
        })
    }

    /// Runs whichever manager jobs are due at `now`.
    pub async fn run_due_jobs(&self, now: DateTime<Utc>) -> Result<()> {
        let monitoring_due = self.is_due(JobKind::MonthlyMonitoring, now);
        let optimization_due = self.is_due(JobKind::SemiannualOptimization, now);
        if monitoring_due {
            self.run_monitoring(now).await?;
        }
        if optimization_due {
            self.run_optimization(now).await?;
        }
        Ok(())
    }

    fn is_due(&self, job: JobKind, now: DateTime<Utc>) -> bool {
        self.scheduler
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_due(job, now)
    }

    fn mark_ran(&self, job: JobKind, now: DateTime<Utc>) -> Result<()> {
        self.scheduler
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .mark_ran(job, now)
    }

    /// Re-runs the backtester over the trailing window with the currently
    /// active weights and compares against the recorded baseline. Always
    /// emits a report, alert or not.
    pub async fn run_monitoring(&self, now: DateTime<Utc>) -> Result<()> {
        let active = self.weights.snapshot();
        let history = match self.load_history().await {
            Ok(history) => history,
            Err(error) => {
                warn!("Monitoring backtest skipped: {}", error);
                self.notifier
                    .send("monitoring skipped", &error.to_string())
                    .await;
                return Ok(());
            }
        };

        let strategy = create_strategy(MONITOR_STRATEGY)?;
        let signals = strategy.generate_signals(&history, &active);
        let (window, window_signals) = Self::trailing_window(&history, &signals);
        let backtester = Backtester::new(self.backtest_config.clone())?;
        let result = match backtester.run(&window, &window_signals) {
            Ok(result) => result,
            Err(error) => {
                self.notifier
                    .send("monitoring failed", &error.to_string())
                    .await;
                return Ok(());
            }
        };

        let perf = &result.performance;
        let mut alerts: Vec<String> = Vec::new();
        if perf.sharpe_ratio < self.thresholds.sharpe_floor {
            alerts.push(format!(
                "Sharpe {:.2} below floor {:.2}",
                perf.sharpe_ratio, self.thresholds.sharpe_floor
            ));
        }
        if perf.max_drawdown > self.thresholds.mdd_ceiling {
            alerts.push(format!(
                "drawdown {:.1}% above ceiling {:.1}%",
                perf.max_drawdown * 100.0,
                self.thresholds.mdd_ceiling * 100.0
            ));
        }
        if active.baseline_sharpe > 0.0
            && perf.sharpe_ratio
                < active.baseline_sharpe * (1.0 - self.thresholds.sharpe_drop_ratio)
        {
            alerts.push(format!(
                "Sharpe {:.2} dropped more than {:.0}% from baseline {:.2}",
                perf.sharpe_ratio,
                self.thresholds.sharpe_drop_ratio * 100.0,
                active.baseline_sharpe
            ));
        }

        let verdict = if alerts.is_empty() {
            "within thresholds".to_string()
        } else {
            alerts.join("; ")
        };
        let body = format!(
            "trailing window {} -> {}\nreturn {:.2}%, sharpe {:.2}, mdd {:.1}%, trades {}\nverdict: {}",
            result.start_date.date_naive(),
            result.end_date.date_naive(),
            perf.total_return * 100.0,
            perf.sharpe_ratio,
            perf.max_drawdown * 100.0,
            perf.total_trades,
            verdict
        );
        info!("Monthly monitoring done: {}", verdict);
        self.notifier.send("monthly monitoring", &body).await;
        self.mark_ran(JobKind::MonthlyMonitoring, now)?;
        Ok(())
    }

    /// Grid search over weight combinations and target counts, each
    /// candidate backtested in a worker pool. Promotes the best candidate
    /// only when its Sharpe clears the baseline threshold; the outgoing
    /// config is kept for rollback either way.
    pub async fn run_optimization(&self, now: DateTime<Utc>) -> Result<()> {
        let active = self.weights.snapshot();
        let history = match self.load_history().await {
            Ok(history) => Arc::new(history),
            Err(error) => {
                warn!("Optimization skipped: {}", error);
                self.notifier
                    .send("optimization skipped", &error.to_string())
                    .await;
                return Ok(());
            }
        };

        let candidates = Self::build_grid(&active);
        info!("Optimizing over {} weight candidates", candidates.len());
        let results = self.backtest_candidates(Arc::clone(&history), candidates)?;

        let Some((best_config, best_sharpe, best_return, best_mdd)) = results
            .into_iter()
            .max_by(|a, b| a.1.total_cmp(&b.1))
        else {
            self.notifier
                .send(
                    "optimization failed",
                    "no candidate produced a valid backtest; existing config retained",
                )
                .await;
            self.mark_ran(JobKind::SemiannualOptimization, now)?;
            return Err(EngineError::OptimizationFailure {
                message: "every grid candidate failed".to_string(),
            }
            .into());
        };

        let threshold = active.baseline_sharpe * PROMOTION_FLOOR;
        let promotable = active.baseline_sharpe <= 0.0 || best_sharpe > threshold;
        if !promotable {
            let body = format!(
                "best candidate sharpe {:.2} below baseline {:.2} x {:.1}; existing config retained",
                best_sharpe, active.baseline_sharpe, PROMOTION_FLOOR
            );
            info!("{}", body);
            self.notifier.send("optimization report", &body).await;
            self.mark_ran(JobKind::SemiannualOptimization, now)?;
            return Ok(());
        }
        if !active.auto_update {
            let body = format!(
                "best candidate sharpe {:.2} beats threshold but autoUpdate is off; existing config retained",
                best_sharpe
            );
            info!("{}", body);
            self.notifier.send("optimization report", &body).await;
            self.mark_ran(JobKind::SemiannualOptimization, now)?;
            return Ok(());
        }

        let mut next = best_config;
        next.optimized_date = Some(now);
        next.baseline_sharpe = best_sharpe;
        next.baseline_return = best_return;
        next.baseline_mdd = best_mdd;
        next.auto_update = active.auto_update;
        match self.weights.replace(next.clone()) {
            Ok(()) => {
                let body = format!(
                    "promoted weights m={:.2} s={:.2} v={:.2} vol={:.2} targets={} (sharpe {:.2}, prev baseline {:.2})",
                    next.momentum_weight,
                    next.short_mom_weight,
                    next.volatility_weight,
                    next.volume_weight,
                    next.target_count,
                    best_sharpe,
                    active.baseline_sharpe
                );
                info!("{}", body);
                self.notifier.send("optimization report", &body).await;
            }
            Err(error) => {
                // Persist failure leaves the previous config active.
                warn!("Failed to install optimized weights: {}", error);
                self.notifier
                    .send(
                        "optimization failed",
                        &format!("could not persist new weights ({}); existing config retained", error),
                    )
                    .await;
            }
        }
        self.mark_ran(JobKind::SemiannualOptimization, now)?;
        Ok(())
    }

    fn backtest_candidates(
        &self,
        history: Arc<HashMap<String, Vec<Candle>>>,
        candidates: Vec<WeightConfig>,
    ) -> Result<Vec<(WeightConfig, f64, f64, f64)>> {
        let total = candidates.len();
        let (task_tx, task_rx) = unbounded::<WeightConfig>();
        let (result_tx, result_rx) = unbounded::<Option<(WeightConfig, f64, f64, f64)>>();
        for candidate in candidates {
            task_tx.send(candidate)?;
        }
        drop(task_tx);

        let workers = num_cpus::get().clamp(1, total.max(1));
        let mut handles = Vec::with_capacity(workers);
        for _ in 0..workers {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            let history = Arc::clone(&history);
            let base_config = self.backtest_config.clone();
            handles.push(thread::spawn(move || {
                while let Ok(candidate) = task_rx.recv() {
                    let strategy = MomentumRankStrategy;
                    let signals = strategy.generate_signals(&history, &candidate);
                    let mut config = base_config.clone();
                    config.target_count = candidate.target_count;
                    let outcome = Backtester::new(config)
                        .and_then(|backtester| backtester.run(&history, &signals));
                    let message = match outcome {
                        Ok(result) => Some((
                            candidate,
                            result.performance.sharpe_ratio,
                            result.performance.total_return,
                            result.performance.max_drawdown,
                        )),
                        Err(error) => {
                            warn!("Candidate backtest failed: {}", error);
                            None
                        }
                    };
                    if result_tx.send(message).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(result_tx);

        let bar = ProgressBar::new(total as u64);
        let mut results = Vec::with_capacity(total);
        for message in result_rx.iter() {
            bar.inc(1);
            if let Some(result) = message {
                results.push(result);
            }
        }
        bar.finish_and_clear();
        for handle in handles {
            let _ = handle.join();
        }
        Ok(results)
    }

    /// The weight grid: each combination leaves a non-negative remainder
    /// for the volume leg so the four weights always sum to one.
    fn build_grid(active: &WeightConfig) -> Vec<WeightConfig> {
        let momentum_steps = [0.3, 0.4, 0.5];
        let short_steps = [0.1, 0.2];
        let volatility_steps = [0.1, 0.2];
        let target_counts = [5usize, 10, 15];
        let mut grid = Vec::new();
        for momentum in momentum_steps {
            for short in short_steps {
                for volatility in volatility_steps {
                    let volume = 1.0 - momentum - short - volatility;
                    if volume < 0.0 {
                        continue;
                    }
                    for target_count in target_counts {
                        grid.push(WeightConfig {
                            momentum_weight: momentum,
                            short_mom_weight: short,
                            volatility_weight: volatility,
                            volume_weight: volume,
                            target_count,
                            ..active.clone()
                        });
                    }
                }
            }
        }
        grid
    }

    async fn load_history(&self) -> Result<HashMap<String, Vec<Candle>>, EngineError> {
        let metrics = retry_port_operation!(
            "universe metrics",
            self.market.get_universe_metrics()
        )?;
        let mut history = HashMap::new();
        for metric in &metrics {
            match self.market.get_history(&metric.code, HISTORY_BARS).await {
                Ok(candles) if !candles.is_empty() => {
                    history.insert(metric.code.clone(), candles);
                }
                Ok(_) => {}
                Err(error) => {
                    warn!("Skipping history for {}: {}", metric.code, error);
                }
            }
        }
        if history.is_empty() {
            return Err(EngineError::OptimizationFailure {
                message: "no instrument history available".to_string(),
            });
        }
        Ok(history)
    }

    /// Restricts candles and signals to the trailing monitoring window.
    /// Signals keep their full-history lookback; only the replay is cut.
    fn trailing_window(
        history: &HashMap<String, Vec<Candle>>,
        signals: &[crate::signals::TradeSignal],
    ) -> (HashMap<String, Vec<Candle>>, Vec<crate::signals::TradeSignal>) {
        let latest = history
            .values()
            .filter_map(|candles| candles.last().map(|c| c.date))
            .max()
            .unwrap_or_else(Utc::now);
        let cutoff = latest - Duration::days(MONITORING_WINDOW_DAYS);
        let window: HashMap<String, Vec<Candle>> = history
            .iter()
            .map(|(code, candles)| {
                (
                    code.clone(),
                    candles.iter().filter(|c| c.date >= cutoff).cloned().collect(),
                )
            })
            .filter(|(_, candles): &(String, Vec<Candle>)| !candles.is_empty())
            .collect();
        let window_signals: Vec<crate::signals::TradeSignal> = signals
            .iter()
            .filter(|s| s.date >= cutoff)
            .cloned()
            .collect();
        (window, window_signals)
    }
}
