use crate::adapters::{BestEffortNotifier, FileMarketData, LogNotifier, PaperOrderExecutor};
use crate::config::{BacktestConfig, EngineConfig, StatePaths};
use crate::engine::TradingEngine;
use crate::manager::{MonitorThresholds, StrategyManager};
use crate::ports::{MarketData, Notifier, OrderExecution};
use crate::scheduler::JobScheduler;
use crate::state::{PositionStore, RiskStateStore};
use crate::weights::WeightStore;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Dependency-injected wiring shared by every command: the ports, the
/// persisted stores, and the configs. Commands construct the engine or
/// strategy manager from this instead of reaching for globals.
pub struct AppContext {
    pub state_paths: StatePaths,
    pub weights: Arc<WeightStore>,
    pub scheduler: Arc<Mutex<JobScheduler>>,
    pub market: Arc<dyn MarketData>,
    pub broker: Arc<dyn OrderExecution>,
    pub notifier: Arc<dyn Notifier>,
    pub engine_config: EngineConfig,
    pub backtest_config: BacktestConfig,
}

impl AppContext {
    /// Builds a context over the file/paper/log adapters. `state_dir` holds
    /// the persisted JSON state; `data_dir` holds candle and metrics files.
    pub fn initialize(
        state_dir: PathBuf,
        data_dir: PathBuf,
        engine_config: EngineConfig,
    ) -> Result<Self> {
        engine_config.validate()?;
        let state_paths = StatePaths::under(state_dir);
        let weights = Arc::new(WeightStore::load(&state_paths.weights_file));
        let scheduler = Arc::new(Mutex::new(JobScheduler::load(&state_paths.scheduler_file)));
        let market: Arc<dyn MarketData> = Arc::new(FileMarketData::new(data_dir));
        let broker: Arc<dyn OrderExecution> =
            Arc::new(PaperOrderExecutor::new(Arc::clone(&market)));
        Ok(Self {
            state_paths,
            weights,
            scheduler,
            market,
            broker,
            notifier: Arc::new(BestEffortNotifier::new(LogNotifier)),
            engine_config,
            backtest_config: BacktestConfig::default(),
        })
    }

    pub fn engine(&self) -> Result<TradingEngine> {
        Ok(TradingEngine::new(
            self.engine_config.clone(),
            Arc::clone(&self.weights),
            Arc::clone(&self.market),
            Arc::clone(&self.broker),
            Arc::clone(&self.notifier),
            PositionStore::new(&self.state_paths.positions_file),
            RiskStateStore::new(&self.state_paths.risk_file),
            Arc::clone(&self.scheduler),
        )?)
    }

    pub fn manager(&self) -> Result<StrategyManager> {
        Ok(StrategyManager::new(
            Arc::clone(&self.weights),
            Arc::clone(&self.market),
            Arc::clone(&self.notifier),
            Arc::clone(&self.scheduler),
            MonitorThresholds::default(),
            self.backtest_config.clone(),
        )?)
    }
}
