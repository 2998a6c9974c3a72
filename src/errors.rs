use thiserror::Error;

/// Failure taxonomy for the trading core. Per-instrument failures are
/// recovered by skip-and-continue; only configuration errors at startup
/// terminate the process.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Quote or history fetch failed for one instrument. The caller skips
    /// that instrument and continues the pass.
    #[error("market data unavailable for {code}: {message}")]
    MarketDataUnavailable { code: String, message: String },

    /// The order port refused an order. The pending order is discarded and
    /// position state is left unchanged.
    #[error("order rejected for {code}: {message}")]
    OrderRejected { code: String, message: String },

    /// Sizing math produced a nonsensical quantity (e.g. stop at or above
    /// entry). Fatal for that candidate only.
    #[error("invalid sizing for {code}: {message}")]
    InvalidSizing { code: String, message: String },

    /// A circuit breaker tripped. Halts new entries without crashing.
    #[error("risk limit exceeded: {message}")]
    RiskLimitExceeded { message: String },

    /// A weight optimization run failed. The previous config stays active.
    #[error("optimization failure: {message}")]
    OptimizationFailure { message: String },

    /// A proposed configuration was rejected before persistence.
    #[error("config validation failed: {message}")]
    ConfigValidation { message: String },
}

impl EngineError {
    pub fn market_data(code: &str, message: impl Into<String>) -> Self {
        Self::MarketDataUnavailable {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn order_rejected(code: &str, message: impl Into<String>) -> Self {
        Self::OrderRejected {
            code: code.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid_sizing(code: &str, message: impl Into<String>) -> Self {
        Self::InvalidSizing {
            code: code.to_string(),
            message: message.into(),
        }
    }
}
