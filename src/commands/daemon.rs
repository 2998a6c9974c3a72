use crate::context::AppContext;
use anyhow::Result;
use chrono::Utc;
use log::{info, warn};
use std::time::Duration;

/// Continuous operation: the engine's daily cycle plus intraday monitoring
/// ticks, and the strategy manager's scheduled jobs, until Ctrl-C. Stop is
/// cooperative: an in-flight tick always finishes before the engine
/// transitions to stopped.
pub async fn run(app: &AppContext) -> Result<()> {
    let mut engine = app.engine()?;
    let manager = app.manager()?;
    engine.start()?;
    info!(
        "Daemon started (monitor interval {}s, dry run: {})",
        app.engine_config.monitor_interval_secs, app.engine_config.dry_run
    );

    let mut interval =
        tokio::time::interval(Duration::from_secs(app.engine_config.monitor_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested; draining in-flight work");
                break;
            }
            _ = interval.tick() => {
                let now = Utc::now();
                // The daily cycle is idempotent per day; on every other
                // tick it falls through to a plain monitoring pass.
                if let Err(error) = engine.run_daily_cycle(now).await {
                    warn!("Daily cycle failed: {}", error);
                }
                if let Err(error) = engine.monitoring_tick(now).await {
                    warn!("Monitoring tick failed: {}", error);
                }
                if let Err(error) = manager.run_due_jobs(now).await {
                    warn!("Strategy manager job failed: {}", error);
                }
            }
        }
    }

    engine.stop();
    info!("Daemon stopped");
    Ok(())
}
