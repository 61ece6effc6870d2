/// Regulatory deadline alerts
///
/// Per company:
/// - PPE items whose CA is expired or expires within the window
/// - Active employees whose every ASO is expired or expires within the window
/// - Trainings of active employees expiring within the window
/// - Active contracts ending within `CONTRACT_WINDOW_DAYS`

use super::alerts::{aso_alert, ca_alert, contract_alert, publish, training_alert, Deadline};
use super::{Job, JobContext};
use async_trait::async_trait;
use canteiro_shared::models::company::Company;
use chrono::{Duration, NaiveDate};
use sqlx::PgPool;
use uuid::Uuid;

pub const CONTRACT_WINDOW_DAYS: i64 = 15;

#[derive(Debug, Clone)]
pub struct ComplianceAlerts {
    window_days: i64,
}

impl ComplianceAlerts {
    pub fn new(window_days: i64) -> Self {
        Self { window_days }
    }
}

async fn expiring_cas(pool: &PgPool, company_id: Uuid, horizon: NaiveDate) -> Result<Vec<Deadline>, sqlx::Error> {
    sqlx::query_as::<_, Deadline>(
        r#"
        SELECT id AS entity_id, name || ' (CA ' || ca_number || ')' AS label, ca_expires_on AS due_on
        FROM ppe_items
        WHERE company_id = $1 AND ca_expires_on <= $2
        "#,
    )
    .bind(company_id)
    .bind(horizon)
    .fetch_all(pool)
    .await
}

/// Certificates without an expiry never lapse, so one of them clears the employee
async fn due_health_certificates(
    pool: &PgPool,
    company_id: Uuid,
    horizon: NaiveDate,
) -> Result<Vec<Deadline>, sqlx::Error> {
    sqlx::query_as::<_, Deadline>(
        r#"
        SELECT e.id AS entity_id, e.name AS label, MAX(h.expires_on) AS due_on
        FROM employees e
        JOIN health_certificates h ON h.employee_id = e.id
        WHERE e.company_id = $1 AND e.status = 'active'
        GROUP BY e.id, e.name
        HAVING COUNT(*) = COUNT(h.expires_on) AND MAX(h.expires_on) <= $2
        "#,
    )
    .bind(company_id)
    .bind(horizon)
    .fetch_all(pool)
    .await
}

async fn expiring_trainings(
    pool: &PgPool,
    company_id: Uuid,
    today: NaiveDate,
    horizon: NaiveDate,
) -> Result<Vec<Deadline>, sqlx::Error> {
    sqlx::query_as::<_, Deadline>(
        r#"
        SELECT t.id AS entity_id, t.title || ' for ' || e.name AS label, t.expires_on AS due_on
        FROM trainings t
        JOIN employees e ON e.id = t.employee_id
        WHERE t.company_id = $1 AND e.status = 'active'
          AND t.expires_on >= $2 AND t.expires_on <= $3
        "#,
    )
    .bind(company_id)
    .bind(today)
    .bind(horizon)
    .fetch_all(pool)
    .await
}

async fn ending_contracts(
    pool: &PgPool,
    company_id: Uuid,
    today: NaiveDate,
    horizon: NaiveDate,
) -> Result<Vec<Deadline>, sqlx::Error> {
    sqlx::query_as::<_, Deadline>(
        r#"
        SELECT c.id AS entity_id, e.name AS label, c.end_date AS due_on
        FROM contracts c
        JOIN employees e ON e.id = c.employee_id
        WHERE c.company_id = $1 AND c.status = 'active'
          AND c.end_date >= $2 AND c.end_date <= $3
        "#,
    )
    .bind(company_id)
    .bind(today)
    .bind(horizon)
    .fetch_all(pool)
    .await
}

#[async_trait]
impl Job for ComplianceAlerts {
    fn name(&self) -> &'static str {
        "compliance_alerts"
    }

    async fn run(&self, ctx: &JobContext) -> anyhow::Result<u64> {
        let today = ctx.today();
        let horizon = today + Duration::days(self.window_days);
        let contract_horizon = today + Duration::days(CONTRACT_WINDOW_DAYS);

        let mut created = 0;
        for company_id in Company::list_ids(&ctx.db).await? {
            let mut alerts = Vec::new();

            alerts.extend(
                expiring_cas(&ctx.db, company_id, horizon)
                    .await?
                    .iter()
                    .map(|d| ca_alert(d, today)),
            );
            alerts.extend(
                due_health_certificates(&ctx.db, company_id, horizon)
                    .await?
                    .iter()
                    .map(|d| aso_alert(d, today)),
            );
            alerts.extend(
                expiring_trainings(&ctx.db, company_id, today, horizon)
                    .await?
                    .iter()
                    .map(|d| training_alert(d, today)),
            );
            alerts.extend(
                ending_contracts(&ctx.db, company_id, today, contract_horizon)
                    .await?
                    .iter()
                    .map(|d| contract_alert(d, today)),
            );

            let new = publish(&ctx.db, company_id, alerts).await?;
            if new > 0 {
                tracing::info!(company_id = %company_id, created = new, "Compliance alerts raised");
            }
            created += new;
        }

        Ok(created)
    }
}
