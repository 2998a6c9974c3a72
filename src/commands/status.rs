use crate::context::AppContext;
use crate::scheduler::JobKind;
use crate::signals::strategy_ids;
use anyhow::Result;

/// Prints the active weight config, open positions, and job schedule.
pub async fn run(app: &AppContext) -> Result<()> {
    let weights = app.weights.snapshot();
    println!("Active weights:");
    println!("{}", serde_json::to_string_pretty(&weights)?);
    println!("Available strategies: {}", strategy_ids().join(", "));

    let engine = app.engine()?;
    println!("\nEngine state: {}", engine.state().as_str());
    let positions = engine.open_positions();
    if positions.is_empty() {
        println!("No open positions");
    } else {
        println!("Open positions:");
        for position in positions {
            println!(
                "  {} x{} @ {:.2} (now {:.2}, stop {:.2}, pnl {:+.2}%)",
                position.code,
                position.quantity,
                position.entry_price,
                position.current_price,
                position.stop_loss,
                position.pnl_ratio() * 100.0
            );
        }
    }

    println!("\nJobs:");
    let scheduler = app.scheduler.lock().unwrap_or_else(|p| p.into_inner());
    for job in [
        JobKind::MonthlyRebalance,
        JobKind::DailyCycle,
        JobKind::MonthlyMonitoring,
        JobKind::SemiannualOptimization,
    ] {
        match (scheduler.last_run(job), scheduler.next_due(job)) {
            (Some(last), Some(next)) => {
                println!("  {}: last {}, next due {}", job.as_str(), last, next)
            }
            _ => println!("  {}: never run (due now)", job.as_str()),
        }
    }
    Ok(())
}
