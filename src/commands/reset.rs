use crate::context::AppContext;
use crate::state::{PositionStore, RiskStateStore};
use anyhow::Result;
use log::info;

/// Clears persisted state. With `risk_only`, only the tripped circuit
/// breaker is cleared; weights, positions and schedule are left intact.
pub async fn run(app: &AppContext, risk_only: bool) -> Result<()> {
    let risk_store = RiskStateStore::new(&app.state_paths.risk_file);
    risk_store.clear()?;
    info!("Risk pause cleared");
    if risk_only {
        return Ok(());
    }

    app.weights.reset()?;
    PositionStore::new(&app.state_paths.positions_file).clear()?;
    app.scheduler
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .reset()?;
    info!("Weights, positions and scheduler state reset to defaults");
    Ok(())
}
