use crate::errors::EngineError;
use crate::models::{Candle, InstrumentMetrics, OrderOutcome, PendingOrder, Quote};
use async_trait::async_trait;

/// Market data source. Implementations must be safe to call concurrently;
/// a failure for one instrument must not poison calls for others.
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn get_quote(&self, code: &str) -> Result<Quote, EngineError>;

    /// Daily candles, oldest first, at most `days` bars.
    async fn get_history(&self, code: &str, days: usize) -> Result<Vec<Candle>, EngineError>;

    /// Scoring inputs for the whole tradable universe.
    async fn get_universe_metrics(&self) -> Result<Vec<InstrumentMetrics>, EngineError>;
}

/// Order placement. Exactly one outcome per order; the caller never retries
/// a rejected order on its own.
#[async_trait]
pub trait OrderExecution: Send + Sync {
    async fn place_order(&self, order: &PendingOrder) -> Result<OrderOutcome, EngineError>;
}

/// Outbound notifications (fills, risk alerts, daily reports). Send
/// failures are logged and swallowed; notification must never stall the
/// trading loop.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, subject: &str, body: &str);
}
