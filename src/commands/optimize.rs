use crate::context::AppContext;
use anyhow::Result;
use chrono::Utc;
use log::info;

/// Runs the weight grid search once, regardless of schedule.
pub async fn run(app: &AppContext) -> Result<()> {
    info!("Received optimize command");
    let manager = app.manager()?;
    manager.run_optimization(Utc::now()).await?;
    let weights = app.weights.snapshot();
    info!(
        "Active weights: m={:.2} s={:.2} v={:.2} vol={:.2} targets={} (baseline sharpe {:.2})",
        weights.momentum_weight,
        weights.short_mom_weight,
        weights.volatility_weight,
        weights.volume_weight,
        weights.target_count,
        weights.baseline_sharpe
    );
    Ok(())
}
