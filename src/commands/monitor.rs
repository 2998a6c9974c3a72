use crate::context::AppContext;
use anyhow::Result;
use chrono::Utc;
use log::info;

/// Runs the monthly monitoring backtest once, regardless of schedule.
pub async fn run(app: &AppContext) -> Result<()> {
    info!("Received monitor command");
    let manager = app.manager()?;
    manager.run_monitoring(Utc::now()).await?;
    Ok(())
}
