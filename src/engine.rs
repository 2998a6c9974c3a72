use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::lifecycle::{
    apply_exit_fill, average_true_range, calculate_atr_stop, calculate_fixed_stop,
    calculate_targets, evaluate_exits, update_trailing_stop, ATR_PERIOD,
};
use crate::models::{
    ClosedTrade, EngineState, FactorScore, InstrumentMetrics, OrderSide, PendingOrder,
    PortfolioSnapshot, Position, SchedulePhase, Severity,
};
use crate::ports::{MarketData, Notifier, OrderExecution};
use crate::retry::retry_port_operation;
use crate::risk::RiskMonitor;
use crate::scheduler::{JobKind, JobScheduler};
use crate::scoring::CompositeScoreCalculator;
use crate::sizing::{determine_quantity, SizingParams};
use crate::state::{PositionStore, RiskStateStore};
use crate::weights::WeightStore;
use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const PORT_TIMEOUT_SECS: u64 = 10;

/// The orchestrator. Owns the live position book and the engine state
/// machine; everything external is reached through the injected ports.
pub struct TradingEngine {
    config: EngineConfig,
    weights: Arc<WeightStore>,
    market: Arc<dyn MarketData>,
    broker: Arc<dyn OrderExecution>,
    notifier: Arc<dyn Notifier>,
    position_store: PositionStore,
    risk_store: RiskStateStore,
    scheduler: Arc<Mutex<JobScheduler>>,
    risk: RiskMonitor,
    state: EngineState,
    cash: f64,
    positions: HashMap<String, Position>,
    ranked: Vec<FactorScore>,
    universe_cache: HashMap<String, InstrumentMetrics>,
    atr_cache: HashMap<String, f64>,
    trades_today: Vec<ClosedTrade>,
    peak_value: f64,
    running_mdd: f64,
}

impl TradingEngine {
    pub fn new(
        config: EngineConfig,
        weights: Arc<WeightStore>,
        market: Arc<dyn MarketData>,
        broker: Arc<dyn OrderExecution>,
        notifier: Arc<dyn Notifier>,
        position_store: PositionStore,
        risk_store: RiskStateStore,
        scheduler: Arc<Mutex<JobScheduler>>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let positions: HashMap<String, Position> = position_store
            .load()
            .into_iter()
            .map(|p| (p.code.clone(), p))
            .collect();
        let invested_cost: f64 = positions
            .values()
            .map(|p| p.entry_price * p.quantity as f64)
            .sum();
        let mut risk = RiskMonitor::new(config.risk_limits.clone());
        risk.restore_state(risk_store.load());
        Ok(Self {
            cash: (config.initial_capital - invested_cost).max(0.0),
            peak_value: config.initial_capital,
            running_mdd: 0.0,
            config,
            weights,
            market,
            broker,
            notifier,
            position_store,
            risk_store,
            scheduler,
            risk,
            state: EngineState::Stopped,
            positions,
            ranked: Vec::new(),
            universe_cache: HashMap::new(),
            atr_cache: HashMap::new(),
            trades_today: Vec::new(),
        })
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn risk_monitor(&mut self) -> &mut RiskMonitor {
        &mut self.risk
    }

    /// Explicit operator reset of the circuit breaker, persisted.
    pub fn reset_risk(&mut self) -> Result<()> {
        self.risk.reset();
        self.risk_store.save(&self.risk.snapshot_state())
    }

    pub fn open_positions(&self) -> Vec<&Position> {
        let mut positions: Vec<&Position> = self.positions.values().collect();
        positions.sort_by(|a, b| a.code.cmp(&b.code));
        positions
    }

    pub fn start(&mut self) -> Result<(), EngineError> {
        self.transition(EngineState::Stopped, EngineState::Running)
    }

    pub fn pause(&mut self) -> Result<(), EngineError> {
        self.transition(EngineState::Running, EngineState::Paused)
    }

    pub fn resume(&mut self) -> Result<(), EngineError> {
        self.transition(EngineState::Paused, EngineState::Running)
    }

    pub fn stop(&mut self) {
        info!("Engine stopping (was {})", self.state.as_str());
        self.state = EngineState::Stopped;
    }

    fn transition(&mut self, from: EngineState, to: EngineState) -> Result<(), EngineError> {
        if self.state != from {
            return Err(EngineError::ConfigValidation {
                message: format!(
                    "invalid engine transition {} -> {}",
                    self.state.as_str(),
                    to.as_str()
                ),
            });
        }
        info!("Engine {} -> {}", from.as_str(), to.as_str());
        self.state = to;
        Ok(())
    }

    /// One full trading day: screening, conditional rebalance, a monitoring
    /// tick, then the close report. Re-invoking on the same calendar day is
    /// a no-op.
    pub async fn run_daily_cycle(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.state == EngineState::Stopped {
            warn!("Daily cycle requested while stopped; ignoring");
            return Ok(());
        }
        let due = {
            let scheduler = self.scheduler.lock().unwrap_or_else(|p| p.into_inner());
            scheduler.is_due(JobKind::DailyCycle, now)
        };
        if !due {
            info!("Daily cycle already ran on {}; skipping", now.date_naive());
            return Ok(());
        }
        for phase in [
            SchedulePhase::Screening,
            SchedulePhase::MarketOpen,
            SchedulePhase::IntradayMonitor,
            SchedulePhase::MarketClose,
            SchedulePhase::AfterMarket,
        ] {
            self.run_phase(phase, now).await?;
        }
        self.scheduler
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .mark_ran(JobKind::DailyCycle, now)?;
        Ok(())
    }

    pub async fn run_phase(&mut self, phase: SchedulePhase, now: DateTime<Utc>) -> Result<()> {
        info!("Phase {}", phase.as_str());
        match phase {
            SchedulePhase::Screening => self.run_screening().await,
            SchedulePhase::MarketOpen => self.run_rebalance(now).await,
            SchedulePhase::IntradayMonitor => self.monitoring_tick(now).await,
            SchedulePhase::MarketClose => self.daily_report(now).await,
            SchedulePhase::AfterMarket => Ok(()),
        }
    }

    /// Scores and ranks the universe with the currently active weights and
    /// caches the result for the next rebalance.
    pub async fn run_screening(&mut self) -> Result<()> {
        let metrics = match retry_port_operation!(
            "universe metrics",
            self.market.get_universe_metrics()
        ) {
            Ok(metrics) => metrics,
            Err(error) => {
                warn!("Screening failed: {}; keeping previous ranking", error);
                self.notifier
                    .send("screening failed", &error.to_string())
                    .await;
                return Ok(());
            }
        };
        let calculator = CompositeScoreCalculator::new(self.weights.snapshot());
        self.ranked = calculator.rank_universe(&metrics);
        self.universe_cache = metrics
            .into_iter()
            .map(|m| (m.code.clone(), m))
            .collect();
        let passing = self.ranked.iter().filter(|s| s.passed_filter).count();
        info!(
            "Screening ranked {} instruments ({} passed filters)",
            self.ranked.len(),
            passing
        );
        if self.config.exit_rules.use_atr_stop {
            self.refresh_atr_cache().await;
        }
        Ok(())
    }

    /// ATR per top-ranked candidate, used for entry stops when the ATR stop
    /// is enabled. A history failure falls back to the fixed-ratio stop.
    async fn refresh_atr_cache(&mut self) {
        self.atr_cache.clear();
        let candidates: Vec<String> = self
            .ranked
            .iter()
            .filter(|s| s.passed_filter)
            .take(self.config.target_count)
            .map(|s| s.code.clone())
            .collect();
        for code in candidates {
            match self.market.get_history(&code, ATR_PERIOD + 1).await {
                Ok(candles) => {
                    if let Some(atr) = average_true_range(&candles, ATR_PERIOD) {
                        if atr > 0.0 {
                            self.atr_cache.insert(code, atr);
                        }
                    }
                }
                Err(error) => {
                    warn!("No ATR for {}: {}", code, error);
                }
            }
        }
    }

    fn entry_stop(&self, code: &str, price: f64) -> f64 {
        let fixed = calculate_fixed_stop(price, self.config.exit_rules.stop_loss_ratio);
        if !self.config.exit_rules.use_atr_stop {
            return fixed;
        }
        match self.atr_cache.get(code) {
            Some(atr) => {
                let stop = calculate_atr_stop(price, *atr, self.config.exit_rules.atr_multiplier);
                if stop > 0.0 && stop < price {
                    stop
                } else {
                    fixed
                }
            }
            None => fixed,
        }
    }

    /// Buy orders realigning the portfolio to the top-ranked candidates.
    /// Returns an empty list before any screening pass, when paused by the
    /// operator, or when the risk monitor has tripped.
    pub fn generate_rebalance_orders(&mut self) -> Vec<PendingOrder> {
        if self.ranked.is_empty() {
            info!("No ranked candidates yet; nothing to rebalance");
            return Vec::new();
        }
        if self.state != EngineState::Running {
            info!("New entries gated (state: {})", self.state.as_str());
            return Vec::new();
        }
        if let Err(error) = self.risk.ensure_entries_allowed() {
            info!("{}", error);
            return Vec::new();
        }

        let weights = self.weights.snapshot();
        let target_count = weights.target_count.min(self.config.target_count);
        let capital = self.total_value();
        // Sizing works off total portfolio value, but every entry is paid
        // from cash. Track what is left as orders stack up.
        let mut cash_left = self.cash;
        let mut orders = Vec::new();
        for score in self
            .ranked
            .iter()
            .filter(|s| s.passed_filter)
            .take(target_count)
        {
            if self.positions.contains_key(&score.code) {
                continue;
            }
            if self.positions.len() + orders.len() >= target_count {
                break;
            }
            let Some(metrics_price) = self.ranked_price(&score.code) else {
                continue;
            };
            let stop = self.entry_stop(&score.code, metrics_price);
            let params = SizingParams {
                capital,
                price: metrics_price,
                target_count,
                cash_reserve_ratio: self.config.cash_reserve_ratio,
                max_position_weight: self.config.max_position_weight,
                risk_per_trade: self.config.risk_per_trade,
                stop_loss: Some(stop),
                realized_volatility: self.ranked_volatility(&score.code),
            };
            let quantity =
                match determine_quantity(self.config.sizing_policy, &score.code, &params) {
                    Ok(q) if q > 0 => q,
                    Ok(_) => continue,
                    Err(error) => {
                        warn!("Sizing rejected {}: {}", score.code, error);
                        continue;
                    }
                };
            let affordable = (cash_left / metrics_price).floor() as i32;
            let quantity = quantity.min(affordable);
            if quantity <= 0 {
                info!("Skipping {}: not enough cash for an entry", score.code);
                continue;
            }
            cash_left -= metrics_price * quantity as f64;
            let (target_1, target_2) = calculate_targets(metrics_price, stop);
            orders.push(PendingOrder {
                code: score.code.clone(),
                side: OrderSide::Buy,
                quantity,
                price: 0.0,
                reason: format!("rebalance rank {} (score {:.1})", score.rank, score.composite_score),
                stop_loss: Some(stop),
                target_1: Some(target_1),
                target_2: Some(target_2),
            });
        }
        orders
    }

    /// Submits rebalance orders if today is the first trading day of a new
    /// month. Idempotent per calendar month.
    pub async fn run_rebalance(&mut self, now: DateTime<Utc>) -> Result<()> {
        let due = {
            let scheduler = self.scheduler.lock().unwrap_or_else(|p| p.into_inner());
            scheduler.is_due(JobKind::MonthlyRebalance, now)
        };
        if !due {
            info!("Rebalance already ran this month; skipping");
            return Ok(());
        }
        let orders = self.generate_rebalance_orders();
        if orders.is_empty() {
            info!("Rebalance produced no orders");
            return Ok(());
        }
        for order in orders {
            self.submit_entry(order, now).await;
        }
        self.persist_positions();
        self.scheduler
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .mark_ran(JobKind::MonthlyRebalance, now)?;
        Ok(())
    }

    async fn submit_entry(&mut self, order: PendingOrder, now: DateTime<Utc>) {
        if self.config.dry_run {
            info!(
                "[dry-run] would buy {} x{} ({})",
                order.code, order.quantity, order.reason
            );
            return;
        }
        let estimated_price = if order.price > 0.0 {
            order.price
        } else {
            self.ranked_price(&order.code).unwrap_or(0.0)
        };
        if estimated_price > 0.0 && estimated_price * order.quantity as f64 > self.cash {
            warn!(
                "Skipping entry for {}: estimated cost {:.0} exceeds cash {:.0}",
                order.code,
                estimated_price * order.quantity as f64,
                self.cash
            );
            return;
        }
        let outcome = match tokio::time::timeout(
            std::time::Duration::from_secs(PORT_TIMEOUT_SECS),
            self.broker.place_order(&order),
        )
        .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(error)) => {
                warn!("Entry order for {} rejected: {}", order.code, error);
                self.notifier
                    .send("order rejected", &format!("{}: {}", order.code, error))
                    .await;
                return;
            }
            Err(_) => {
                warn!("Entry order for {} timed out; dropping it", order.code);
                self.notifier
                    .send("order timeout", &format!("{} entry dropped", order.code))
                    .await;
                return;
            }
        };
        if !outcome.success || outcome.filled_quantity <= 0 {
            warn!(
                "Entry order for {} not filled: {:?}",
                order.code, outcome.message
            );
            return;
        }
        let fill_price = outcome.filled_price;
        let fill_quantity = outcome.filled_quantity;
        self.cash -= fill_price * fill_quantity as f64;
        match self.positions.get_mut(&order.code) {
            Some(position) => position.add_entry(fill_price, fill_quantity, now),
            None => {
                let stop = order
                    .stop_loss
                    .unwrap_or_else(|| {
                        calculate_fixed_stop(fill_price, self.config.exit_rules.stop_loss_ratio)
                    });
                let (default_t1, default_t2) = calculate_targets(fill_price, stop);
                self.positions.insert(
                    order.code.clone(),
                    Position::open(
                        &order.code,
                        fill_price,
                        fill_quantity,
                        now,
                        stop,
                        order.target_1.unwrap_or(default_t1),
                        order.target_2.unwrap_or(default_t2),
                    ),
                );
            }
        }
        info!(
            "Entered {} x{} @ {:.2}",
            order.code, fill_quantity, fill_price
        );
    }

    /// One monitoring pass: refresh quotes, ratchet trailing stops, submit
    /// exits as triggered, update the risk monitor. A quote failure for one
    /// instrument skips only that instrument. Exits run even while paused.
    pub async fn monitoring_tick(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.state == EngineState::Stopped {
            return Ok(());
        }
        let mut codes: Vec<String> = self.positions.keys().cloned().collect();
        codes.sort();

        // Quotes are independent per instrument; fetch them concurrently.
        let quotes = futures::future::join_all(codes.into_iter().map(|code| {
            let market = Arc::clone(&self.market);
            async move {
                let result = retry_port_operation!(
                    format!("quote for {}", code),
                    market.get_quote(&code)
                );
                (code, result)
            }
        }))
        .await;

        for (code, result) in quotes {
            let quote = match result {
                Ok(quote) => quote,
                Err(error) => {
                    warn!("Skipping {} this tick: {}", code, error);
                    continue;
                }
            };

            let decisions = {
                let Some(position) = self.positions.get_mut(&code) else {
                    continue;
                };
                position.update_price(quote.price);
                if let Some(new_stop) =
                    update_trailing_stop(position, self.config.exit_rules.trailing_stop_ratio)
                {
                    info!("Trailing stop for {} raised to {:.2}", code, new_stop);
                }
                evaluate_exits(position)
            };

            for decision in decisions {
                self.submit_exit(&code, decision, now).await;
            }
        }

        let snapshot = self.portfolio_snapshot(now);
        let alerts = self.risk.check_all_risks(&snapshot);
        for alert in alerts {
            warn!("Risk alert [{}]: {}", alert.severity.as_str(), alert.message);
            self.notifier
                .send(
                    &format!("risk alert: {}", alert.kind.as_str()),
                    &alert.message,
                )
                .await;
            if alert.severity == Severity::Critical {
                self.notifier
                    .send("entries halted", "critical risk limit breached")
                    .await;
            }
        }
        self.persist_positions();
        if let Err(error) = self.risk_store.save(&self.risk.snapshot_state()) {
            warn!("Failed to persist risk state: {}", error);
        }
        Ok(())
    }

    async fn submit_exit(
        &mut self,
        code: &str,
        decision: crate::lifecycle::ExitDecision,
        now: DateTime<Utc>,
    ) {
        let Some(position) = self.positions.get(code) else {
            return;
        };
        let order = PendingOrder {
            code: code.to_string(),
            side: OrderSide::Sell,
            quantity: decision.quantity,
            price: 0.0,
            reason: decision.trigger.as_str().to_string(),
            stop_loss: None,
            target_1: None,
            target_2: None,
        };
        if self.config.dry_run {
            info!(
                "[dry-run] would sell {} x{} ({})",
                code, decision.quantity, order.reason
            );
            return;
        }
        let entry_price = position.entry_price;
        let entered_at = position.entered_at;
        let outcome = match tokio::time::timeout(
            std::time::Duration::from_secs(PORT_TIMEOUT_SECS),
            self.broker.place_order(&order),
        )
        .await
        {
            Ok(Ok(outcome)) if outcome.success => outcome,
            Ok(Ok(outcome)) => {
                warn!("Exit order for {} not filled: {:?}", code, outcome.message);
                return;
            }
            Ok(Err(error)) => {
                warn!("Exit order for {} rejected: {}", code, error);
                self.notifier
                    .send("order rejected", &format!("{}: {}", code, error))
                    .await;
                return;
            }
            Err(_) => {
                warn!("Exit order for {} timed out; dropping it", code);
                return;
            }
        };

        self.cash += outcome.filled_price * outcome.filled_quantity as f64;
        let trade = ClosedTrade {
            code: code.to_string(),
            quantity: outcome.filled_quantity,
            entry_price,
            exit_price: outcome.filled_price,
            entry_date: entered_at,
            exit_date: now,
            pnl: (outcome.filled_price - entry_price) * outcome.filled_quantity as f64,
            reason: decision.trigger.as_str().to_string(),
        };
        self.risk.record_trade(&trade);
        info!(
            "Exited {} x{} @ {:.2} ({}) pnl {:.0}",
            code, trade.quantity, trade.exit_price, trade.reason, trade.pnl
        );
        self.trades_today.push(trade);

        if let Some(position) = self.positions.get_mut(code) {
            apply_exit_fill(position, &decision);
            if position.quantity <= 0 {
                self.positions.remove(code);
            }
        }
    }

    /// Market-close report: trade count, realized P&L, per-trade outcomes.
    pub async fn daily_report(&mut self, now: DateTime<Utc>) -> Result<()> {
        let snapshot = self.portfolio_snapshot(now);
        let realized: f64 = self.trades_today.iter().map(|t| t.pnl).sum();
        let unrealized: f64 = self.positions.values().map(Position::unrealized_pnl).sum();
        let wins = self.trades_today.iter().filter(|t| t.pnl > 0.0).count();
        let mut body = format!(
            "value {:.0} (cash {:.0}, invested {:.0})\ntrades {} ({} wins), realized {:.0}, unrealized {:.0}",
            snapshot.total_value,
            snapshot.cash,
            snapshot.invested_value,
            self.trades_today.len(),
            wins,
            realized,
            unrealized
        );
        for trade in &self.trades_today {
            body.push_str(&format!(
                "\n  {} x{} {:.2} -> {:.2} ({}) pnl {:.0}",
                trade.code,
                trade.quantity,
                trade.entry_price,
                trade.exit_price,
                trade.reason,
                trade.pnl
            ));
        }
        self.notifier.send("daily report", &body).await;
        self.trades_today.clear();
        Ok(())
    }

    pub fn portfolio_snapshot(&mut self, now: DateTime<Utc>) -> PortfolioSnapshot {
        let invested: f64 = self.positions.values().map(Position::market_value).sum();
        let total_value = self.cash + invested;
        if total_value > self.peak_value {
            self.peak_value = total_value;
        } else if self.peak_value > 0.0 {
            let drawdown = (self.peak_value - total_value) / self.peak_value;
            if drawdown > self.running_mdd {
                self.running_mdd = drawdown;
            }
        }
        PortfolioSnapshot {
            timestamp: now,
            total_value,
            cash: self.cash,
            invested_value: invested,
            positions: self.positions.values().cloned().collect(),
            max_drawdown: self.running_mdd,
        }
    }

    fn total_value(&self) -> f64 {
        self.cash + self.positions.values().map(Position::market_value).sum::<f64>()
    }

    fn ranked_price(&self, code: &str) -> Option<f64> {
        self.universe_metric(code, |m| m.price)
    }

    fn ranked_volatility(&self, code: &str) -> Option<f64> {
        self.universe_metric(code, |m| m.realized_volatility)
    }

    fn universe_metric(
        &self,
        code: &str,
        pick: impl Fn(&InstrumentMetrics) -> f64,
    ) -> Option<f64> {
        self.universe_cache
            .get(code)
            .map(pick)
            .filter(|v| *v > 0.0 && v.is_finite())
    }

    fn persist_positions(&self) {
        let positions: Vec<Position> = self.positions.values().cloned().collect();
        if let Err(error) = self.position_store.save(&positions) {
            warn!("Failed to persist positions: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{FileMarketData, LogNotifier, PaperOrderExecutor};
    use chrono::TimeZone;
    use std::fs;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};

    fn metrics(code: &str, price: f64) -> InstrumentMetrics {
        InstrumentMetrics {
            code: code.to_string(),
            name: None,
            per: 10.0,
            pbr: 1.0,
            roe: 0.15,
            operating_margin: 0.12,
            debt_ratio: 0.6,
            eps_growth: 0.10,
            return_1m: 0.02,
            return_3m: 0.06,
            return_6m: 0.12,
            return_12m: 0.20,
            price,
            high_52w: price * 1.1,
            realized_volatility: 0.20,
        }
    }

    fn write_universe(dir: &Path, instruments: &[(&str, f64)]) {
        let all: Vec<InstrumentMetrics> = instruments
            .iter()
            .map(|(code, price)| metrics(code, *price))
            .collect();
        fs::write(
            dir.join("metrics.json"),
            serde_json::to_string(&all).unwrap(),
        )
        .unwrap();
        let candle_dir = dir.join("candles");
        fs::create_dir_all(&candle_dir).unwrap();
        for (code, price) in instruments {
            let candles = vec![crate::models::Candle {
                code: code.to_string(),
                date: Utc::now(),
                open: *price,
                high: *price,
                low: *price,
                close: *price,
                volume_shares: 100_000,
            }];
            fs::write(
                candle_dir.join(format!("{}.json", code)),
                serde_json::to_string(&candles).unwrap(),
            )
            .unwrap();
        }
    }

    fn set_price(dir: &Path, code: &str, price: f64) {
        let candles = vec![crate::models::Candle {
            code: code.to_string(),
            date: Utc::now(),
            open: price,
            high: price,
            low: price,
            close: price,
            volume_shares: 100_000,
        }];
        fs::write(
            dir.join("candles").join(format!("{}.json", code)),
            serde_json::to_string(&candles).unwrap(),
        )
        .unwrap();
    }

    fn engine_with(dir: &TempDir, config: EngineConfig) -> TradingEngine {
        let data_dir = dir.path().join("data");
        fs::create_dir_all(&data_dir).unwrap();
        let market: Arc<dyn MarketData> = Arc::new(FileMarketData::new(&data_dir));
        let broker: Arc<dyn OrderExecution> =
            Arc::new(PaperOrderExecutor::new(Arc::clone(&market)));
        let weights = Arc::new(WeightStore::load(dir.path().join("weights.json")));
        let scheduler = Arc::new(Mutex::new(JobScheduler::load(
            dir.path().join("scheduler.json"),
        )));
        TradingEngine::new(
            config,
            weights,
            market,
            broker,
            Arc::new(LogNotifier),
            PositionStore::new(dir.path().join("positions.json")),
            RiskStateStore::new(dir.path().join("risk.json")),
            scheduler,
        )
        .unwrap()
    }

    fn test_config() -> EngineConfig {
        EngineConfig {
            initial_capital: 100_000_000.0,
            dry_run: false,
            target_count: 3,
            ..EngineConfig::default()
        }
    }

    fn data_dir(dir: &TempDir) -> std::path::PathBuf {
        dir.path().join("data")
    }

    #[test]
    fn rebalance_orders_are_empty_before_screening() {
        let dir = tempdir().unwrap();
        let mut engine = engine_with(&dir, test_config());
        engine.start().unwrap();
        assert!(engine.generate_rebalance_orders().is_empty());
    }

    #[test]
    fn state_machine_rejects_invalid_transitions() {
        let dir = tempdir().unwrap();
        let mut engine = engine_with(&dir, test_config());
        assert_eq!(engine.state(), EngineState::Stopped);
        // Cannot pause a stopped engine.
        assert!(engine.pause().is_err());
        engine.start().unwrap();
        engine.pause().unwrap();
        engine.resume().unwrap();
        engine.stop();
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[tokio::test]
    async fn screening_then_rebalance_opens_top_ranked_positions() {
        let dir = tempdir().unwrap();
        let mut engine = engine_with(&dir, test_config());
        write_universe(
            &data_dir(&dir),
            &[("AAA", 50_000.0), ("BBB", 30_000.0), ("CCC", 20_000.0), ("DDD", 10_000.0)],
        );
        engine.start().unwrap();
        engine.run_screening().await.unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        engine.run_rebalance(now).await.unwrap();
        let open = engine.open_positions();
        assert_eq!(open.len(), 3);
        for position in &open {
            assert!(position.stop_loss < position.entry_price);
            assert!(position.target_1 > position.entry_price);
        }
    }

    #[tokio::test]
    async fn rebalance_is_idempotent_per_month() {
        let dir = tempdir().unwrap();
        let mut engine = engine_with(&dir, test_config());
        write_universe(&data_dir(&dir), &[("AAA", 50_000.0)]);
        engine.start().unwrap();
        engine.run_screening().await.unwrap();
        let first = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        engine.run_rebalance(first).await.unwrap();
        let held = engine.open_positions()[0].quantity;

        // Later the same month: must not pyramid again.
        let later = Utc.with_ymd_and_hms(2024, 3, 20, 9, 0, 0).unwrap();
        engine.run_rebalance(later).await.unwrap();
        assert_eq!(engine.open_positions()[0].quantity, held);
    }

    #[tokio::test]
    async fn stop_hit_exits_and_records_closed_trade() {
        let dir = tempdir().unwrap();
        let mut engine = engine_with(&dir, test_config());
        write_universe(&data_dir(&dir), &[("AAA", 50_000.0)]);
        engine.start().unwrap();
        engine.run_screening().await.unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        engine.run_rebalance(now).await.unwrap();
        assert_eq!(engine.open_positions().len(), 1);

        // Gap well below the 7% stop.
        set_price(&data_dir(&dir), "AAA", 40_000.0);
        engine.monitoring_tick(now).await.unwrap();
        assert!(engine.open_positions().is_empty());
        assert_eq!(engine.trades_today.len(), 1);
        assert!(engine.trades_today[0].pnl < 0.0);
        assert_eq!(engine.trades_today[0].reason, "stop_loss");
    }

    #[tokio::test(start_paused = true)]
    async fn quote_failure_skips_only_that_instrument() {
        let dir = tempdir().unwrap();
        let mut engine = engine_with(&dir, test_config());
        write_universe(&data_dir(&dir), &[("AAA", 50_000.0), ("BBB", 30_000.0)]);
        engine.start().unwrap();
        engine.run_screening().await.unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        engine.run_rebalance(now).await.unwrap();

        // Remove BBB's candle file so its quote fails; AAA gaps down.
        fs::remove_file(data_dir(&dir).join("candles").join("BBB.json")).unwrap();
        set_price(&data_dir(&dir), "AAA", 40_000.0);
        engine.monitoring_tick(now).await.unwrap();

        // AAA exited; BBB survived the failed quote untouched.
        let open = engine.open_positions();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].code, "BBB");
    }

    #[tokio::test]
    async fn risk_pause_gates_new_entries_only() {
        let dir = tempdir().unwrap();
        let mut config = test_config();
        config.risk_limits.max_consecutive_losses = 1;
        let mut engine = engine_with(&dir, config);
        write_universe(&data_dir(&dir), &[("AAA", 50_000.0), ("BBB", 30_000.0)]);
        engine.start().unwrap();
        engine.run_screening().await.unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        engine.run_rebalance(now).await.unwrap();

        // One losing exit trips the single-loss limit.
        set_price(&data_dir(&dir), "AAA", 40_000.0);
        engine.monitoring_tick(now).await.unwrap();
        assert!(engine.risk_monitor().is_trading_paused());

        // Entries are gated while paused.
        assert!(engine.generate_rebalance_orders().is_empty());

        // But exits still run: BBB gaps down and is sold next tick.
        set_price(&data_dir(&dir), "BBB", 20_000.0);
        engine.monitoring_tick(now).await.unwrap();
        assert!(engine.open_positions().is_empty());

        // The tripped breaker survives a restart until explicitly reset.
        drop(engine);
        let mut restarted = engine_with(&dir, test_config());
        assert!(restarted.risk_monitor().is_trading_paused());
        restarted.reset_risk().unwrap();
        assert!(!restarted.risk_monitor().is_trading_paused());
    }

    #[tokio::test]
    async fn entries_never_spend_more_than_available_cash() {
        let dir = tempdir().unwrap();
        let mut engine = engine_with(&dir, test_config());
        write_universe(&data_dir(&dir), &[("AAA", 50_000.0)]);
        engine.start().unwrap();
        engine.run_screening().await.unwrap();

        // An appreciated holding dominates total value while cash is thin,
        // so value-based sizing would ask for far more than cash can pay.
        let entered = Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap();
        engine.positions.insert(
            "ZZZ".to_string(),
            Position::open("ZZZ", 100_000.0, 990, entered, 93_000.0, 110_000.0, 120_000.0),
        );
        engine.cash = 100_000.0;

        let now = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        engine.run_rebalance(now).await.unwrap();

        assert!(engine.cash >= 0.0);
        // The AAA entry was clamped to the two shares cash could cover.
        let aaa = engine.positions.get("AAA").unwrap();
        assert_eq!(aaa.quantity, 2);
    }

    #[tokio::test]
    async fn positions_survive_an_engine_restart() {
        let dir = tempdir().unwrap();
        {
            let mut engine = engine_with(&dir, test_config());
            write_universe(&data_dir(&dir), &[("AAA", 50_000.0)]);
            engine.start().unwrap();
            engine.run_screening().await.unwrap();
            let now = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
            engine.run_rebalance(now).await.unwrap();
            assert_eq!(engine.open_positions().len(), 1);
        }
        let engine = engine_with(&dir, test_config());
        assert_eq!(engine.open_positions().len(), 1);
        assert_eq!(engine.open_positions()[0].code, "AAA");
    }

    #[tokio::test]
    async fn dry_run_never_mutates_the_book() {
        let dir = tempdir().unwrap();
        let mut config = test_config();
        config.dry_run = true;
        let mut engine = engine_with(&dir, config);
        write_universe(&data_dir(&dir), &[("AAA", 50_000.0)]);
        engine.start().unwrap();
        engine.run_screening().await.unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        engine.run_rebalance(now).await.unwrap();
        assert!(engine.open_positions().is_empty());
    }
}
