use crate::models::{Candle, Position};

const FIRST_STAGE_RATIO: f64 = 0.30;
const SECOND_STAGE_RATIO: f64 = 0.50;
const FIRST_TARGET_MULTIPLE: f64 = 1.5;
const SECOND_TARGET_MULTIPLE: f64 = 2.5;

pub const ATR_PERIOD: usize = 14;

pub fn calculate_fixed_stop(entry: f64, ratio: f64) -> f64 {
    entry * (1.0 - ratio)
}

pub fn calculate_atr_stop(entry: f64, atr: f64, multiplier: f64) -> f64 {
    entry - atr * multiplier
}

/// Average true range over the last `period` bars. Needs `period + 1`
/// candles so every true range has a previous close.
pub fn average_true_range(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() <= period {
        return None;
    }
    let window = &candles[candles.len() - period - 1..];
    let mut sum = 0.0;
    for pair in window.windows(2) {
        let previous_close = pair[0].close;
        let bar = &pair[1];
        let true_range = (bar.high - bar.low)
            .max((bar.high - previous_close).abs())
            .max((bar.low - previous_close).abs());
        sum += true_range;
    }
    Some(sum / period as f64)
}

/// First and second take-profit levels from the initial risk
/// (entry minus stop): 1.5R and 2.5R above entry.
pub fn calculate_targets(entry: f64, stop: f64) -> (f64, f64) {
    let risk = entry - stop;
    (
        entry + risk * FIRST_TARGET_MULTIPLE,
        entry + risk * SECOND_TARGET_MULTIPLE,
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SellStage {
    First,
    Second,
}

/// Staged exit quantity, always a share of the ORIGINAL position size:
/// 30% at the first target, 50% at the second, leaving a runner.
pub fn calculate_staged_sell_qty(original_quantity: i32, stage: SellStage) -> i32 {
    let ratio = match stage {
        SellStage::First => FIRST_STAGE_RATIO,
        SellStage::Second => SECOND_STAGE_RATIO,
    };
    (original_quantity as f64 * ratio).floor() as i32
}

/// Raises the stop to `highest_price * (1 - trail_ratio)` when that beats
/// the current stop. The stop never retreats and is never placed above the
/// current price. Returns the new stop when it moved.
pub fn update_trailing_stop(position: &mut Position, trail_ratio: f64) -> Option<f64> {
    if trail_ratio <= 0.0 || trail_ratio >= 1.0 {
        return None;
    }
    let candidate = (position.highest_price * (1.0 - trail_ratio)).min(position.current_price);
    if candidate > position.stop_loss {
        position.stop_loss = candidate;
        Some(candidate)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitTrigger {
    StopLoss,
    FirstTarget,
    SecondTarget,
}

impl ExitTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitTrigger::StopLoss => "stop_loss",
            ExitTrigger::FirstTarget => "first_target",
            ExitTrigger::SecondTarget => "second_target",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExitDecision {
    pub trigger: ExitTrigger,
    pub quantity: i32,
}

/// Evaluates a position against its stop and staged targets at the current
/// price. A stop hit exits the full remaining quantity and supersedes any
/// target. A gap through both targets yields both stage decisions at once.
pub fn evaluate_exits(position: &Position) -> Vec<ExitDecision> {
    if position.quantity <= 0 {
        return Vec::new();
    }

    if position.current_price <= position.stop_loss {
        return vec![ExitDecision {
            trigger: ExitTrigger::StopLoss,
            quantity: position.quantity,
        }];
    }

    let mut decisions = Vec::new();
    let mut remaining = position.quantity;
    if !position.stage_one_done && position.current_price >= position.target_1 {
        let quantity =
            calculate_staged_sell_qty(position.original_quantity, SellStage::First).min(remaining);
        if quantity > 0 {
            decisions.push(ExitDecision {
                trigger: ExitTrigger::FirstTarget,
                quantity,
            });
            remaining -= quantity;
        }
    }
    if !position.stage_two_done && position.current_price >= position.target_2 && remaining > 0 {
        let quantity =
            calculate_staged_sell_qty(position.original_quantity, SellStage::Second).min(remaining);
        if quantity > 0 {
            decisions.push(ExitDecision {
                trigger: ExitTrigger::SecondTarget,
                quantity,
            });
        }
    }
    decisions
}

/// Applies a filled exit to the position: reduces quantity, records stage
/// flags, and moves the stop to breakeven after the first target fill.
pub fn apply_exit_fill(position: &mut Position, decision: &ExitDecision) {
    position.quantity = (position.quantity - decision.quantity).max(0);
    match decision.trigger {
        ExitTrigger::StopLoss => {
            position.quantity = 0;
        }
        ExitTrigger::FirstTarget => {
            position.stage_one_done = true;
            // Hard invariant: once the first target fills, the remaining
            // shares can no longer turn this trade into a loss.
            if position.stop_loss < position.entry_price {
                position.stop_loss = position.entry_price;
            }
        }
        ExitTrigger::SecondTarget => {
            position.stage_two_done = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn position(entry: f64, stop: f64) -> Position {
        let (target_1, target_2) = calculate_targets(entry, stop);
        Position::open("005930", entry, 100, Utc::now(), stop, target_1, target_2)
    }

    #[test]
    fn targets_are_one_and_a_half_and_two_and_a_half_r() {
        let (first, second) = calculate_targets(50_000.0, 46_500.0);
        assert!((first - 55_250.0).abs() < 1e-9);
        assert!((second - 58_750.0).abs() < 1e-9);
    }

    #[test]
    fn average_true_range_needs_a_full_window() {
        let bar = |high: f64, low: f64, close: f64| Candle {
            code: "005930".to_string(),
            date: Utc::now(),
            open: close,
            high,
            low,
            close,
            volume_shares: 1_000,
        };
        let candles = vec![
            bar(102.0, 98.0, 100.0),
            bar(104.0, 100.0, 103.0),
            bar(103.0, 99.0, 100.0),
        ];
        // TRs: max(4, 4, 0)=4 and max(4, 0, 4)=4.
        let atr = average_true_range(&candles, 2).unwrap();
        assert!((atr - 4.0).abs() < 1e-9);
        assert!(average_true_range(&candles, 3).is_none());
    }

    #[test]
    fn staged_quantities_use_original_size() {
        assert_eq!(calculate_staged_sell_qty(100, SellStage::First), 30);
        assert_eq!(calculate_staged_sell_qty(100, SellStage::Second), 50);
    }

    #[test]
    fn trailing_stop_never_retreats() {
        let mut pos = position(50_000.0, 46_500.0);
        pos.update_price(60_000.0);
        let raised = update_trailing_stop(&mut pos, 0.10).unwrap();
        assert!((raised - 54_000.0).abs() < 1e-9);

        // Price falls back; highest price is unchanged, stop must not move.
        pos.update_price(55_000.0);
        assert!(update_trailing_stop(&mut pos, 0.10).is_none());
        assert!((pos.stop_loss - 54_000.0).abs() < 1e-9);

        // New high ratchets the stop up again.
        pos.update_price(70_000.0);
        let raised = update_trailing_stop(&mut pos, 0.10).unwrap();
        assert!((raised - 63_000.0).abs() < 1e-9);
    }

    #[test]
    fn trailing_stop_is_never_above_current_price() {
        let mut pos = position(50_000.0, 30_000.0);
        pos.update_price(100_000.0);
        pos.update_price(85_000.0);
        // Raw candidate 90,000 exceeds the current price; clamp to it.
        let raised = update_trailing_stop(&mut pos, 0.10).unwrap();
        assert!((raised - 85_000.0).abs() < 1e-9);
        assert!(pos.stop_loss <= pos.current_price);
    }

    #[test]
    fn stop_hit_exits_full_remaining_quantity() {
        let mut pos = position(50_000.0, 46_500.0);
        pos.update_price(46_000.0);
        let decisions = evaluate_exits(&pos);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].trigger, ExitTrigger::StopLoss);
        assert_eq!(decisions[0].quantity, 100);
    }

    #[test]
    fn first_target_fill_moves_stop_to_breakeven() {
        let mut pos = position(50_000.0, 46_500.0);
        pos.update_price(55_300.0);
        let decisions = evaluate_exits(&pos);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].trigger, ExitTrigger::FirstTarget);
        assert_eq!(decisions[0].quantity, 30);

        apply_exit_fill(&mut pos, &decisions[0]);
        assert_eq!(pos.quantity, 70);
        assert!(pos.stage_one_done);
        assert!((pos.stop_loss - 50_000.0).abs() < 1e-9);
    }

    #[test]
    fn gap_through_both_targets_stages_both_exits() {
        let mut pos = position(50_000.0, 46_500.0);
        pos.update_price(59_000.0);
        let decisions = evaluate_exits(&pos);
        assert_eq!(decisions.len(), 2);
        assert_eq!(decisions[0].trigger, ExitTrigger::FirstTarget);
        assert_eq!(decisions[0].quantity, 30);
        assert_eq!(decisions[1].trigger, ExitTrigger::SecondTarget);
        assert_eq!(decisions[1].quantity, 50);
    }

    #[test]
    fn second_target_not_retriggered_once_done() {
        let mut pos = position(50_000.0, 46_500.0);
        pos.update_price(59_000.0);
        for decision in evaluate_exits(&pos) {
            apply_exit_fill(&mut pos, &decision);
        }
        assert_eq!(pos.quantity, 20);
        // Runner remains; no further target decisions at the same price.
        assert!(evaluate_exits(&pos).is_empty());
    }
}
