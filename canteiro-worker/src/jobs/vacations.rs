use super::alerts::{publish, vacation_alert, UpcomingVacation};
use super::{Job, JobContext};
use async_trait::async_trait;
use canteiro_shared::models::company::Company;
use chrono::Duration;

pub const REMINDER_DAYS: i64 = 7;

/// Reminders for approved vacations starting soon
#[derive(Debug, Clone)]
pub struct VacationReminders {
    days_ahead: i64,
}

impl Default for VacationReminders {
    fn default() -> Self {
        Self {
            days_ahead: REMINDER_DAYS,
        }
    }
}

#[async_trait]
impl Job for VacationReminders {
    fn name(&self) -> &'static str {
        "vacation_reminders"
    }

    async fn run(&self, ctx: &JobContext) -> anyhow::Result<u64> {
        let today = ctx.today();
        let horizon = today + Duration::days(self.days_ahead);

        let mut created = 0;
        for company_id in Company::list_ids(&ctx.db).await? {
            let upcoming = sqlx::query_as::<_, UpcomingVacation>(
                r#"
                SELECT v.id AS entity_id, e.name AS employee_name, v.start_date, v.end_date
                FROM vacations v
                JOIN employees e ON e.id = v.employee_id
                WHERE v.company_id = $1 AND v.status = 'approved'
                  AND v.start_date >= $2 AND v.start_date <= $3
                "#,
            )
            .bind(company_id)
            .bind(today)
            .bind(horizon)
            .fetch_all(&ctx.db)
            .await?;

            let alerts = upcoming.iter().map(|v| vacation_alert(v, today)).collect();
            let new = publish(&ctx.db, company_id, alerts).await?;
            created += new;
        }

        if created > 0 {
            tracing::info!(created, "Vacation reminders raised");
        }

        Ok(created)
    }
}
