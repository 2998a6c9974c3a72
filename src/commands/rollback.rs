use crate::context::AppContext;
use anyhow::Result;
use log::{info, warn};

/// Restores the weight config that was active before the last promotion.
pub async fn run(app: &AppContext) -> Result<()> {
    if app.weights.rollback()? {
        let restored = app.weights.snapshot();
        info!(
            "Rolled back to weights m={:.2} s={:.2} v={:.2} vol={:.2} targets={}",
            restored.momentum_weight,
            restored.short_mom_weight,
            restored.volatility_weight,
            restored.volume_weight,
            restored.target_count
        );
    } else {
        warn!("No previous weight config recorded; nothing to roll back");
    }
    Ok(())
}
