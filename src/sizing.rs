use crate::config::SizingPolicy;
use crate::errors::EngineError;

pub const PRICE_EPSILON: f64 = 1e-6;

/// Inputs shared by every sizing policy. Stop distance is only required
/// for risk-based sizing, realized volatility only for the
/// volatility-adjusted policy.
#[derive(Debug, Clone)]
pub struct SizingParams {
    pub capital: f64,
    pub price: f64,
    pub target_count: usize,
    pub cash_reserve_ratio: f64,
    pub max_position_weight: f64,
    pub risk_per_trade: f64,
    pub stop_loss: Option<f64>,
    pub realized_volatility: Option<f64>,
}

/// Converts a ranked candidate plus total capital into an order quantity.
/// All policies are pure functions of their inputs.
pub fn determine_quantity(
    policy: SizingPolicy,
    code: &str,
    params: &SizingParams,
) -> Result<i32, EngineError> {
    if params.price <= 0.0 || !params.price.is_finite() {
        return Err(EngineError::invalid_sizing(
            code,
            format!("price must be positive (value: {})", params.price),
        ));
    }
    if params.capital <= 0.0 || !params.capital.is_finite() {
        return Err(EngineError::invalid_sizing(
            code,
            format!("capital must be positive (value: {})", params.capital),
        ));
    }

    let allocation = match policy {
        SizingPolicy::EqualWeight => equal_weight_allocation(params),
        SizingPolicy::RiskBased => risk_based_allocation(code, params)?,
        SizingPolicy::VolatilityAdjusted => volatility_adjusted_allocation(params),
    };

    let cap = params.capital * params.max_position_weight;
    let capped = allocation.min(cap);
    Ok((capped / params.price).floor().max(0.0) as i32)
}

fn equal_weight_allocation(params: &SizingParams) -> f64 {
    let investable = params.capital * (1.0 - params.cash_reserve_ratio);
    if params.target_count == 0 {
        return 0.0;
    }
    investable / params.target_count as f64
}

fn risk_based_allocation(code: &str, params: &SizingParams) -> Result<f64, EngineError> {
    let stop = params.stop_loss.ok_or_else(|| {
        EngineError::invalid_sizing(code, "risk-based sizing requires a stop loss")
    })?;
    let risk_per_unit = params.price - stop;
    if risk_per_unit <= PRICE_EPSILON {
        return Err(EngineError::invalid_sizing(
            code,
            format!(
                "stop {} is at or above entry {}; risk per unit must be positive",
                stop, params.price
            ),
        ));
    }
    let risk_budget = params.capital * params.risk_per_trade;
    let quantity = risk_budget / risk_per_unit;
    Ok(quantity * params.price)
}

fn volatility_adjusted_allocation(params: &SizingParams) -> f64 {
    let base = equal_weight_allocation(params);
    match params.realized_volatility {
        Some(vol) if vol > 0.0 && vol.is_finite() => {
            // Scale the equal-weight slice inversely to realized vol,
            // anchored at 20% annualized. Never scale up past the cap.
            let scale = (0.20 / vol).min(2.0);
            base * scale
        }
        _ => base,
    }
}
