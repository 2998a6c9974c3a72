use crate::models::{FactorScore, InstrumentMetrics};
use crate::weights::WeightConfig;

/// 1-month return above this is treated as overheated and penalized.
pub const OVERHEAT_THRESHOLD: f64 = 0.25;
const OVERHEAT_PENALTY: f64 = 15.0;
/// Bonus when price sits within 5% of the 52-week high.
const NEAR_HIGH_RATIO: f64 = 0.95;
const NEAR_HIGH_BONUS: f64 = 10.0;
/// Debt ratio above 300% fails the quality filter.
pub const MAX_DEBT_RATIO: f64 = 3.0;

/// P/E at or above this scores zero on the earnings leg.
const PER_SCALE: f64 = 30.0;
const PBR_SCALE: f64 = 5.0;
const ROE_SCALE: f64 = 0.20;
const MARGIN_SCALE: f64 = 0.15;
const EPS_GROWTH_SCALE: f64 = 0.30;

fn clamp_score(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

/// Maps a periodic return onto 0..100 with 50 at zero return.
fn score_return(value: f64, scale: f64) -> f64 {
    clamp_score(50.0 + (value / scale) * 50.0)
}

/// Low P/E and low P/B score higher. Negative earnings fail the filter.
pub fn value_score(metrics: &InstrumentMetrics) -> (f64, Option<String>) {
    if metrics.per <= 0.0 {
        return (
            0.0,
            Some(format!(
                "negative earnings (P/E {:.1})",
                metrics.per
            )),
        );
    }
    let per_score = clamp_score((1.0 - metrics.per / PER_SCALE) * 100.0);
    let pbr_score = if metrics.pbr > 0.0 {
        clamp_score((1.0 - metrics.pbr / PBR_SCALE) * 100.0)
    } else {
        0.0
    };
    (clamp_score(per_score * 0.6 + pbr_score * 0.4), None)
}

/// Weighted blend of 1/3/6/12-month returns. The active weight config
/// splits the blend between the short (1-month) and long (3/6/12-month)
/// legs, applies an overheat penalty and a 52-week-high proximity bonus.
pub fn momentum_score(metrics: &InstrumentMetrics, weights: &WeightConfig) -> f64 {
    let long_blend = score_return(metrics.return_3m, 0.30) * 0.3
        + score_return(metrics.return_6m, 0.40) * 0.3
        + score_return(metrics.return_12m, 0.50) * 0.4;
    let short = score_return(metrics.return_1m, 0.15);

    let stability = if metrics.realized_volatility > 0.0 {
        clamp_score((1.0 - metrics.realized_volatility / 0.60) * 100.0)
    } else {
        50.0
    };
    let proximity = if metrics.high_52w > 0.0 {
        clamp_score(metrics.price / metrics.high_52w * 100.0)
    } else {
        50.0
    };

    let weight_total = weights.momentum_weight
        + weights.short_mom_weight
        + weights.volatility_weight
        + weights.volume_weight;
    let mut score = if weight_total > 0.0 {
        (long_blend * weights.momentum_weight
            + short * weights.short_mom_weight
            + stability * weights.volatility_weight
            + proximity * weights.volume_weight)
            / weight_total
    } else {
        long_blend
    };

    if metrics.return_1m > OVERHEAT_THRESHOLD {
        score -= OVERHEAT_PENALTY;
    }
    if metrics.high_52w > 0.0 && metrics.price >= metrics.high_52w * NEAR_HIGH_RATIO {
        score += NEAR_HIGH_BONUS;
    }
    clamp_score(score)
}

/// ROE, operating margin, leverage and EPS growth. Excessive leverage
/// fails the filter.
pub fn quality_score(metrics: &InstrumentMetrics) -> (f64, Option<String>) {
    if metrics.debt_ratio > MAX_DEBT_RATIO {
        return (
            0.0,
            Some(format!(
                "excessive leverage (debt ratio {:.0}%)",
                metrics.debt_ratio * 100.0
            )),
        );
    }
    let roe = clamp_score(metrics.roe / ROE_SCALE * 100.0);
    let margin = clamp_score(metrics.operating_margin / MARGIN_SCALE * 100.0);
    let leverage = clamp_score((1.0 - metrics.debt_ratio / MAX_DEBT_RATIO) * 100.0);
    let growth = score_return(metrics.eps_growth, EPS_GROWTH_SCALE);
    (
        clamp_score(roe * 0.35 + margin * 0.25 + leverage * 0.2 + growth * 0.2),
        None,
    )
}

/// Combines sub-scores into a single 0-100 composite using the currently
/// active weight config and applies the hard filters.
pub struct CompositeScoreCalculator {
    weights: WeightConfig,
}

impl CompositeScoreCalculator {
    pub fn new(weights: WeightConfig) -> Self {
        Self { weights }
    }

    pub fn calculate(&self, metrics: &InstrumentMetrics) -> FactorScore {
        let (value, value_reason) = value_score(metrics);
        let momentum = momentum_score(metrics, &self.weights);
        let (quality, quality_reason) = quality_score(metrics);

        let filter_reason = value_reason.or(quality_reason);
        let passed_filter = filter_reason.is_none();
        let composite = if passed_filter {
            clamp_score(value * 0.3 + momentum * 0.4 + quality * 0.3)
        } else {
            0.0
        };

        FactorScore {
            code: metrics.code.clone(),
            value_score: value,
            momentum_score: momentum,
            quality_score: quality,
            composite_score: composite,
            passed_filter,
            filter_reason,
            rank: 0,
        }
    }

    /// Scores the whole universe, sorts by composite descending and assigns
    /// dense ranks (equal composites share a rank). Filtered-out
    /// instruments sink below every passing one.
    pub fn rank_universe(&self, universe: &[InstrumentMetrics]) -> Vec<FactorScore> {
        let mut scores: Vec<FactorScore> =
            universe.iter().map(|metrics| self.calculate(metrics)).collect();
        scores.sort_by(|a, b| {
            b.passed_filter
                .cmp(&a.passed_filter)
                .then(b.composite_score.total_cmp(&a.composite_score))
        });
        let mut rank = 0usize;
        let mut last_score = f64::NAN;
        for score in scores.iter_mut() {
            if score.composite_score.total_cmp(&last_score) != std::cmp::Ordering::Equal {
                rank += 1;
                last_score = score.composite_score;
            }
            score.rank = rank;
        }
        scores
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(code: &str) -> InstrumentMetrics {
        InstrumentMetrics {
            code: code.to_string(),
            name: None,
            per: 12.0,
            pbr: 1.2,
            roe: 0.15,
            operating_margin: 0.10,
            debt_ratio: 0.8,
            eps_growth: 0.10,
            return_1m: 0.03,
            return_3m: 0.08,
            return_6m: 0.15,
            return_12m: 0.25,
            price: 50_000.0,
            high_52w: 55_000.0,
            realized_volatility: 0.25,
        }
    }

    #[test]
    fn negative_earnings_always_fail_filter() {
        let calculator = CompositeScoreCalculator::new(WeightConfig::default());
        let mut input = metrics("005930");
        input.per = -10.0;
        // Even with outstanding momentum and quality numbers.
        input.return_12m = 0.9;
        input.roe = 0.4;
        let score = calculator.calculate(&input);
        assert!(!score.passed_filter);
        assert!((score.composite_score - 0.0).abs() < 1e-9);
        let reason = score.filter_reason.unwrap();
        assert!(reason.contains("negative earnings"), "reason: {}", reason);
    }

    #[test]
    fn excessive_leverage_fails_filter() {
        let calculator = CompositeScoreCalculator::new(WeightConfig::default());
        let mut input = metrics("005930");
        input.debt_ratio = 3.5;
        let score = calculator.calculate(&input);
        assert!(!score.passed_filter);
        assert!(score.filter_reason.unwrap().contains("leverage"));
    }

    #[test]
    fn overheated_momentum_is_penalized() {
        let weights = WeightConfig::default();
        let cool = metrics("A");
        let mut hot = metrics("B");
        hot.return_1m = 0.40;
        assert!(momentum_score(&hot, &weights) < momentum_score(&cool, &weights) + 1e-9);
    }

    #[test]
    fn near_52_week_high_earns_bonus() {
        let weights = WeightConfig::default();
        let mut near = metrics("A");
        near.price = 54_500.0; // within 5% of 55,000
        let mut far = metrics("B");
        far.price = 40_000.0;
        assert!(momentum_score(&near, &weights) > momentum_score(&far, &weights));
    }

    #[test]
    fn ranking_sorts_passing_candidates_first_with_dense_ranks() {
        let calculator = CompositeScoreCalculator::new(WeightConfig::default());
        let strong = metrics("STRONG");
        let mut weak = metrics("WEAK");
        weak.per = 28.0;
        weak.return_12m = -0.20;
        let mut failed = metrics("FAIL");
        failed.per = -1.0;

        let ranked = calculator.rank_universe(&[weak.clone(), failed, strong]);
        assert_eq!(ranked[0].code, "STRONG");
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[1].code, "WEAK");
        assert_eq!(ranked[1].rank, 2);
        assert_eq!(ranked[2].code, "FAIL");
        assert!(!ranked[2].passed_filter);
    }
}
