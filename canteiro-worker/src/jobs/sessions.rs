use super::{Job, JobContext};
use async_trait::async_trait;
use canteiro_shared::models::workflow_session::WorkflowSession;
use chrono::Duration;

/// Deletes sessions past their expiry and completed sessions past retention
#[derive(Debug, Clone)]
pub struct ExpireWorkflowSessions {
    retention: Duration,
}

impl ExpireWorkflowSessions {
    pub fn new(retention_days: i64) -> Self {
        Self {
            retention: Duration::days(retention_days),
        }
    }
}

#[async_trait]
impl Job for ExpireWorkflowSessions {
    fn name(&self) -> &'static str {
        "expire_workflow_sessions"
    }

    async fn run(&self, ctx: &JobContext) -> anyhow::Result<u64> {
        let expired = WorkflowSession::delete_expired(&ctx.db, ctx.now).await?;
        let purged = WorkflowSession::delete_completed_before(&ctx.db, ctx.now - self.retention).await?;

        if expired > 0 || purged > 0 {
            tracing::info!(expired, purged, "Workflow sessions swept");
        }

        Ok(expired + purged)
    }
}
