use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, Months, TimeZone, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Recurring jobs owned by the scheduler. Cadence is a property of the job
/// kind, never ad-hoc call-site arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// Engine rebalance, once per calendar month (first trading day).
    MonthlyRebalance,
    /// Engine daily cycle, once per calendar day.
    DailyCycle,
    /// Strategy manager monitoring backtest, once per calendar month.
    MonthlyMonitoring,
    /// Strategy manager weight grid search, every six months.
    SemiannualOptimization,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::MonthlyRebalance => "monthly_rebalance",
            JobKind::DailyCycle => "daily_cycle",
            JobKind::MonthlyMonitoring => "monthly_monitoring",
            JobKind::SemiannualOptimization => "semiannual_optimization",
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SchedulerFile {
    #[serde(default)]
    last_runs: HashMap<String, DateTime<Utc>>,
}

/// Per-job last-run timestamps persisted to a JSON file, making "already
/// ran this month" a testable property instead of a side-effect marker.
pub struct JobScheduler {
    path: PathBuf,
    last_runs: HashMap<String, DateTime<Utc>>,
}

impl JobScheduler {
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let last_runs = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<SchedulerFile>(&raw) {
                Ok(file) => file.last_runs,
                Err(error) => {
                    warn!(
                        "Scheduler state at {} is unreadable ({}); treating every job as never run",
                        path.display(),
                        error
                    );
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        Self { path, last_runs }
    }

    pub fn last_run(&self, job: JobKind) -> Option<DateTime<Utc>> {
        self.last_runs.get(job.as_str()).copied()
    }

    /// Whether the job should run now. Re-asking within the same period is
    /// always false once the job has been marked as run.
    pub fn is_due(&self, job: JobKind, now: DateTime<Utc>) -> bool {
        let Some(last) = self.last_run(job) else {
            return true;
        };
        match job {
            JobKind::DailyCycle => last.date_naive() < now.date_naive(),
            JobKind::MonthlyRebalance | JobKind::MonthlyMonitoring => {
                (last.year(), last.month()) < (now.year(), now.month())
            }
            JobKind::SemiannualOptimization => Self::next_after(job, last) <= now,
        }
    }

    /// Earliest time at which the job becomes due again.
    pub fn next_due(&self, job: JobKind) -> Option<DateTime<Utc>> {
        self.last_run(job).map(|last| Self::next_after(job, last))
    }

    fn next_after(job: JobKind, last: DateTime<Utc>) -> DateTime<Utc> {
        match job {
            JobKind::DailyCycle => Utc
                .from_utc_datetime(
                    &(last.date_naive() + chrono::Duration::days(1)).and_hms_opt(0, 0, 0).unwrap(),
                ),
            JobKind::MonthlyRebalance | JobKind::MonthlyMonitoring => {
                start_of_next_month(last, 1)
            }
            JobKind::SemiannualOptimization => start_of_next_month(last, 6),
        }
    }

    pub fn mark_ran(&mut self, job: JobKind, at: DateTime<Utc>) -> Result<()> {
        self.last_runs.insert(job.as_str().to_string(), at);
        self.persist()
    }

    pub fn reset(&mut self) -> Result<()> {
        self.last_runs.clear();
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating state directory {}", parent.display()))?;
        }
        let file = SchedulerFile {
            last_runs: self.last_runs.clone(),
        };
        let serialized = serde_json::to_string_pretty(&file)?;
        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, serialized)
            .with_context(|| format!("writing scheduler state to {}", temp.display()))?;
        fs::rename(&temp, &self.path)
            .with_context(|| format!("installing scheduler state at {}", self.path.display()))?;
        Ok(())
    }
}

fn start_of_next_month(from: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    let first_of_month = Utc
        .with_ymd_and_hms(from.year(), from.month(), 1, 0, 0, 0)
        .unwrap();
    first_of_month
        .checked_add_months(Months::new(months))
        .unwrap_or(first_of_month)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 9, 0, 0).unwrap()
    }

    #[test]
    fn monthly_job_runs_once_per_month() {
        let dir = tempdir().unwrap();
        let mut scheduler = JobScheduler::load(dir.path().join("scheduler.json"));
        let job = JobKind::MonthlyRebalance;

        assert!(scheduler.is_due(job, at(2024, 3, 4)));
        scheduler.mark_ran(job, at(2024, 3, 4)).unwrap();
        // Same month, later day: a no-op.
        assert!(!scheduler.is_due(job, at(2024, 3, 25)));
        assert!(scheduler.is_due(job, at(2024, 4, 1)));
        assert_eq!(scheduler.next_due(job), Some(at(2024, 4, 1) - chrono::Duration::hours(9)));
    }

    #[test]
    fn daily_job_deduplicates_within_a_day() {
        let dir = tempdir().unwrap();
        let mut scheduler = JobScheduler::load(dir.path().join("scheduler.json"));
        let job = JobKind::DailyCycle;
        scheduler.mark_ran(job, at(2024, 3, 4)).unwrap();
        assert!(!scheduler.is_due(job, at(2024, 3, 4)));
        assert!(scheduler.is_due(job, at(2024, 3, 5)));
    }

    #[test]
    fn semiannual_job_waits_six_months() {
        let dir = tempdir().unwrap();
        let mut scheduler = JobScheduler::load(dir.path().join("scheduler.json"));
        let job = JobKind::SemiannualOptimization;
        scheduler.mark_ran(job, at(2024, 1, 15)).unwrap();
        assert!(!scheduler.is_due(job, at(2024, 4, 15)));
        assert!(!scheduler.is_due(job, at(2024, 6, 30)));
        assert!(scheduler.is_due(job, at(2024, 7, 1)));
    }

    #[test]
    fn state_survives_a_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scheduler.json");
        {
            let mut scheduler = JobScheduler::load(&path);
            scheduler
                .mark_ran(JobKind::MonthlyMonitoring, at(2024, 5, 2))
                .unwrap();
        }
        let reloaded = JobScheduler::load(&path);
        assert!(!reloaded.is_due(JobKind::MonthlyMonitoring, at(2024, 5, 20)));
    }

    #[test]
    fn corrupt_state_treats_jobs_as_never_run() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scheduler.json");
        fs::write(&path, "not json at all").unwrap();
        let scheduler = JobScheduler::load(&path);
        assert!(scheduler.is_due(JobKind::MonthlyRebalance, at(2024, 1, 1)));
    }
}
