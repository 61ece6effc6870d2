/// Periodic jobs
///
/// Every job is idempotent: running it twice over the same data changes nothing the
/// second time. Alert jobs rely on the notification dedupe key for this; the session
/// sweep only deletes rows that are already dead.
///
/// # Jobs
///
/// - `expire_workflow_sessions`: drops abandoned wizard sessions
/// - `compliance_alerts`: CA, ASO, training and contract deadlines
/// - `stock_alerts`: PPE and supplies at or below their minimum
/// - `vacation_reminders`: approved vacations about to start

use crate::config::WorkerConfig;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use std::sync::Arc;

pub mod alerts;
pub mod compliance;
pub mod sessions;
pub mod stock;
pub mod vacations;

pub use compliance::ComplianceAlerts;
pub use sessions::ExpireWorkflowSessions;
pub use stock::StockAlerts;
pub use vacations::VacationReminders;

/// Inputs shared by every job in one round
#[derive(Debug, Clone)]
pub struct JobContext {
    pub db: PgPool,
    pub now: DateTime<Utc>,
}

impl JobContext {
    pub fn new(db: PgPool, now: DateTime<Utc>) -> Self {
        Self { db, now }
    }

    pub fn today(&self) -> NaiveDate {
        self.now.date_naive()
    }
}

#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs one pass; returns the number of rows written or deleted
    async fn run(&self, ctx: &JobContext) -> anyhow::Result<u64>;
}

/// The jobs the worker runs each round, in order
pub fn default_jobs(config: &WorkerConfig) -> Vec<Arc<dyn Job>> {
    vec![
        Arc::new(ExpireWorkflowSessions::new(config.workflow_retention_days)),
        Arc::new(ComplianceAlerts::new(config.alert_window_days)),
        Arc::new(StockAlerts),
        Arc::new(VacationReminders::default()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_jobs_order() {
        let jobs = default_jobs(&WorkerConfig::for_tests("postgresql://localhost/test"));
        let names: Vec<_> = jobs.iter().map(|job| job.name()).collect();

        assert_eq!(
            names,
            vec![
                "expire_workflow_sessions",
                "compliance_alerts",
                "stock_alerts",
                "vacation_reminders"
            ]
        );
    }
}
