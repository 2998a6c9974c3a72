use crate::errors::EngineError;
use crate::models::{Candle, InstrumentMetrics, OrderOutcome, PendingOrder, Quote};
use crate::ports::{MarketData, Notifier, OrderExecution};
use async_trait::async_trait;
use chrono::Utc;
use log::{error, info};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Market data served from a directory of JSON files: `metrics.json` with
/// the scoring inputs for the whole universe and `candles/<code>.json` with
/// daily bars per instrument. Quotes are derived from the latest bar.
pub struct FileMarketData {
    data_dir: PathBuf,
}

impl FileMarketData {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn read_candles(&self, code: &str) -> Result<Vec<Candle>, EngineError> {
        let path = self.data_dir.join("candles").join(format!("{}.json", code));
        let raw = fs::read_to_string(&path).map_err(|err| {
            EngineError::market_data(code, format!("reading {}: {}", path.display(), err))
        })?;
        let mut candles: Vec<Candle> = serde_json::from_str(&raw).map_err(|err| {
            EngineError::market_data(code, format!("parsing {}: {}", path.display(), err))
        })?;
        candles.sort_by(|a, b| a.date.cmp(&b.date));
        Ok(candles)
    }
}

#[async_trait]
impl MarketData for FileMarketData {
    async fn get_quote(&self, code: &str) -> Result<Quote, EngineError> {
        let candles = self.read_candles(code)?;
        let last = candles
            .last()
            .ok_or_else(|| EngineError::market_data(code, "no candles on file"))?;
        Ok(Quote {
            code: code.to_string(),
            price: last.close,
            high: last.high,
            low: last.low,
            volume_shares: last.volume_shares,
            timestamp: last.date,
        })
    }

    async fn get_history(&self, code: &str, days: usize) -> Result<Vec<Candle>, EngineError> {
        let candles = self.read_candles(code)?;
        let skip = candles.len().saturating_sub(days);
        Ok(candles.into_iter().skip(skip).collect())
    }

    async fn get_universe_metrics(&self) -> Result<Vec<InstrumentMetrics>, EngineError> {
        let path = self.data_dir.join("metrics.json");
        let raw = fs::read_to_string(&path).map_err(|err| {
            EngineError::market_data("universe", format!("reading {}: {}", path.display(), err))
        })?;
        serde_json::from_str(&raw).map_err(|err| {
            EngineError::market_data("universe", format!("parsing {}: {}", path.display(), err))
        })
    }
}

/// Simulated broker. Every accepted order fills in full, market orders at
/// the current quote and limit orders at their limit price. Never touches a
/// real account.
pub struct PaperOrderExecutor {
    market: Arc<dyn MarketData>,
}

impl PaperOrderExecutor {
    pub fn new(market: Arc<dyn MarketData>) -> Self {
        Self { market }
    }
}

#[async_trait]
impl OrderExecution for PaperOrderExecutor {
    async fn place_order(&self, order: &PendingOrder) -> Result<OrderOutcome, EngineError> {
        if order.quantity <= 0 {
            return Err(EngineError::order_rejected(
                &order.code,
                format!("quantity must be positive (value: {})", order.quantity),
            ));
        }
        let filled_price = if order.price > 0.0 {
            order.price
        } else {
            self.market.get_quote(&order.code).await?.price
        };
        info!(
            "[paper] {} {} x{} @ {:.2} ({})",
            order.side.as_str(),
            order.code,
            order.quantity,
            filled_price,
            order.reason
        );
        Ok(OrderOutcome {
            success: true,
            order_id: Some(Uuid::new_v4().to_string()),
            filled_price,
            filled_quantity: order.quantity,
            message: None,
        })
    }
}

/// Notification sink that writes to the process log. A stand-in for a chat
/// or email channel in deployments that have one.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, subject: &str, body: &str) {
        info!("[notify] {}: {}", subject, body);
    }
}

/// Wraps another notifier and never lets a send failure surface.
pub struct BestEffortNotifier<N> {
    inner: N,
}

impl<N: Notifier> BestEffortNotifier<N> {
    pub fn new(inner: N) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<N: Notifier> Notifier for BestEffortNotifier<N> {
    async fn send(&self, subject: &str, body: &str) {
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            self.inner.send(subject, body),
        )
        .await;
        if result.is_err() {
            error!("Notification '{}' timed out; dropping it", subject);
        }
    }
}
