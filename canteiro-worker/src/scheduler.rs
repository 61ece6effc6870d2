/// Job scheduler
///
/// Runs every registered job once per round, sequentially, then sleeps for the poll
/// interval. A failing job is logged and the round continues with the next one.
///
/// # Architecture
///
/// ```text
/// Scheduler
///   ├─> expire_workflow_sessions
///   ├─> compliance_alerts
///   ├─> stock_alerts
///   └─> vacation_reminders
/// ```
///
/// # Example
///
/// ```no_run
/// use canteiro_worker::{config::WorkerConfig, jobs::default_jobs, scheduler::Scheduler};
/// use sqlx::PgPool;
///
/// # async fn example(pool: PgPool) -> anyhow::Result<()> {
/// let config = WorkerConfig::from_env()?;
/// let scheduler = Scheduler::new(pool, config.poll_interval(), default_jobs(&config));
///
/// let shutdown = scheduler.shutdown_token();
/// tokio::spawn(async move {
///     let _ = tokio::signal::ctrl_c().await;
///     shutdown.cancel();
/// });
///
/// scheduler.run().await;
/// # Ok(())
/// # }
/// ```

use crate::jobs::{Job, JobContext};
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Result of one job in a round
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRun {
    pub job: &'static str,
    /// Rows affected, or the error message
    pub outcome: Result<u64, String>,
}

pub struct Scheduler {
    db: PgPool,
    interval: Duration,
    jobs: Vec<Arc<dyn Job>>,
    shutdown_token: CancellationToken,
}

impl Scheduler {
    pub fn new(db: PgPool, interval: Duration, jobs: Vec<Arc<dyn Job>>) -> Self {
        Self {
            db,
            interval,
            jobs,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Cancelling it stops the loop after the job in progress
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Runs every job once
    pub async fn run_once(&self) -> Vec<JobRun> {
        let ctx = JobContext::new(self.db.clone(), Utc::now());
        let mut runs = Vec::with_capacity(self.jobs.len());

        for job in &self.jobs {
            if self.shutdown_token.is_cancelled() {
                break;
            }

            let started = Instant::now();
            let outcome = match job.run(&ctx).await {
                Ok(affected) => {
                    tracing::debug!(
                        job = job.name(),
                        affected,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Job finished"
                    );
                    Ok(affected)
                }
                Err(e) => {
                    tracing::error!(job = job.name(), error = %e, "Job failed");
                    Err(e.to_string())
                }
            };

            runs.push(JobRun {
                job: job.name(),
                outcome,
            });
        }

        runs
    }

    /// Runs rounds until the shutdown token is cancelled
    pub async fn run(&self) {
        tracing::info!(
            jobs = self.jobs.len(),
            interval_secs = self.interval.as_secs(),
            "Scheduler starting"
        );

        loop {
            if self.shutdown_token.is_cancelled() {
                break;
            }

            let runs = self.run_once().await;
            let failed = runs.iter().filter(|run| run.outcome.is_err()).count();
            if failed > 0 {
                tracing::warn!(failed, total = runs.len(), "Round finished with failures");
            }

            tokio::select! {
                _ = self.shutdown_token.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        tracing::info!("Scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use canteiro_shared::db::pool::{create_lazy_pool, DatabaseConfig};
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Counting {
        name: &'static str,
        calls: AtomicU64,
    }

    #[async_trait]
    impl Job for Counting {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn run(&self, _ctx: &JobContext) -> anyhow::Result<u64> {
            Ok(self.calls.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }

    struct Failing;

    #[async_trait]
    impl Job for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn run(&self, _ctx: &JobContext) -> anyhow::Result<u64> {
            anyhow::bail!("database unavailable")
        }
    }

    fn counting(name: &'static str) -> Arc<Counting> {
        Arc::new(Counting {
            name,
            calls: AtomicU64::new(0),
        })
    }

    fn lazy_pool() -> PgPool {
        create_lazy_pool(DatabaseConfig {
            url: "postgresql://localhost:1/canteiro_test".to_string(),
            min_connections: 0,
            ..DatabaseConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_failing_job_does_not_stop_round() {
        let after = counting("after");
        let jobs: Vec<Arc<dyn Job>> = vec![Arc::new(Failing), after.clone()];
        let scheduler = Scheduler::new(lazy_pool(), Duration::from_secs(60), jobs);

        let runs = scheduler.run_once().await;

        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].outcome, Err("database unavailable".to_string()));
        assert_eq!(runs[1], JobRun { job: "after", outcome: Ok(1) });
        assert_eq!(after.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_scheduler_runs_nothing() {
        let job = counting("job");
        let jobs: Vec<Arc<dyn Job>> = vec![job.clone()];
        let scheduler = Scheduler::new(lazy_pool(), Duration::from_secs(60), jobs);

        scheduler.shutdown_token().cancel();
        scheduler.run().await;

        assert_eq!(job.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_repeats_until_cancelled() {
        let job = counting("job");
        let jobs: Vec<Arc<dyn Job>> = vec![job.clone()];
        let scheduler = Arc::new(Scheduler::new(lazy_pool(), Duration::from_secs(60), jobs));
        let shutdown = scheduler.shutdown_token();

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });

        // Paused time auto-advances once both tasks are sleeping
        while job.calls.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        shutdown.cancel();
        handle.await.unwrap();

        assert!(job.calls.load(Ordering::SeqCst) >= 3);
    }
}
