//! Dashboard aggregates
//!
//! One call collects the counters and series the dashboard charts: headcount, compliance
//! deadlines, stock levels and PPE deliveries per month.

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use super::timesheet::Month;

/// Days ahead that count as "expiring"
pub const EXPIRY_WINDOW_DAYS: i64 = 30;

/// Months in the delivery series, current month included
pub const SERIES_MONTHS: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyDeliveries {
    /// `YYYY-MM`
    pub month: String,
    pub deliveries: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub generated_on: NaiveDate,
    pub active_employees: i64,
    pub employees_by_status: Vec<StatusCount>,
    pub active_ppe_deliveries: i64,
    pub ca_expiring: i64,
    pub overdue_health_certificates: i64,
    pub trainings_expiring: i64,
    pub low_stock_ppe: i64,
    pub low_stock_supplies: i64,
    pub assets_by_status: Vec<StatusCount>,
    pub pending_vacations: i64,
    pub unread_notifications: i64,
    pub deliveries_by_month: Vec<MonthlyDeliveries>,
}

/// Builds the monthly series ending at `last`, oldest first, filling gaps with zeros
pub fn delivery_series(last: Month, months: usize, rows: &[(String, i64, i64)]) -> Vec<MonthlyDeliveries> {
    let mut keys = Vec::with_capacity(months);
    let mut month = last;
    for _ in 0..months {
        keys.push(month.to_string());
        month = month.previous();
    }
    keys.reverse();

    keys.into_iter()
        .map(|key| {
            let (deliveries, quantity) = rows
                .iter()
                .find(|(month, _, _)| *month == key)
                .map(|(_, deliveries, quantity)| (*deliveries, *quantity))
                .unwrap_or((0, 0));
            MonthlyDeliveries {
                month: key,
                deliveries,
                quantity,
            }
        })
        .collect()
}

async fn count(pool: &PgPool, sql: &str, company_id: Uuid, date: Option<NaiveDate>) -> Result<i64, sqlx::Error> {
    let mut query = sqlx::query_scalar::<_, i64>(sql).bind(company_id);
    if let Some(date) = date {
        query = query.bind(date);
    }
    let value = query.fetch_one(pool).await?;

    Ok(value)
}

impl Dashboard {
    pub async fn load(pool: &PgPool, company_id: Uuid, today: NaiveDate) -> Result<Self, sqlx::Error> {
        let horizon = today + Duration::days(EXPIRY_WINDOW_DAYS);

        let employees_by_status = sqlx::query_as::<_, StatusCount>(
            r#"
            SELECT status::text AS status, COUNT(*) AS count
            FROM employees WHERE company_id = $1
            GROUP BY status ORDER BY status
            "#,
        )
        .bind(company_id)
        .fetch_all(pool)
        .await?;

        let active_employees = employees_by_status
            .iter()
            .find(|row| row.status == "active")
            .map(|row| row.count)
            .unwrap_or(0);

        let assets_by_status = sqlx::query_as::<_, StatusCount>(
            r#"
            SELECT status::text AS status, COUNT(*) AS count
            FROM assets WHERE company_id = $1
            GROUP BY status ORDER BY status
            "#,
        )
        .bind(company_id)
        .fetch_all(pool)
        .await?;

        let active_ppe_deliveries = count(
            pool,
            "SELECT COUNT(*) FROM ppe_deliveries WHERE company_id = $1 AND returned_at IS NULL",
            company_id,
            None,
        )
        .await?;

        let ca_expiring = count(
            pool,
            "SELECT COUNT(*) FROM ppe_items WHERE company_id = $1 AND ca_expires_on <= $2",
            company_id,
            Some(horizon),
        )
        .await?;

        // Active employees whose every ASO is past its expiry
        let overdue_health_certificates = count(
            pool,
            r#"
            SELECT COUNT(*) FROM employees e
            WHERE e.company_id = $1 AND e.status = 'active'
              AND EXISTS (SELECT 1 FROM health_certificates h WHERE h.employee_id = e.id)
              AND NOT EXISTS (
                  SELECT 1 FROM health_certificates h
                  WHERE h.employee_id = e.id AND (h.expires_on IS NULL OR h.expires_on >= $2)
              )
            "#,
            company_id,
            Some(today),
        )
        .await?;

        let trainings_expiring = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*) FROM trainings
            WHERE company_id = $1 AND expires_on >= $2 AND expires_on <= $3
            "#,
        )
        .bind(company_id)
        .bind(today)
        .bind(horizon)
        .fetch_one(pool)
        .await?;

        let low_stock_ppe = count(
            pool,
            "SELECT COUNT(*) FROM ppe_items WHERE company_id = $1 AND stock_quantity <= min_stock",
            company_id,
            None,
        )
        .await?;

        let low_stock_supplies = count(
            pool,
            r#"
            SELECT COUNT(*) FROM assets
            WHERE company_id = $1 AND kind = 'supply' AND status <> 'retired' AND quantity <= min_quantity
            "#,
            company_id,
            None,
        )
        .await?;

        let pending_vacations = count(
            pool,
            "SELECT COUNT(*) FROM vacations WHERE company_id = $1 AND status = 'requested'",
            company_id,
            None,
        )
        .await?;

        let unread_notifications = count(
            pool,
            "SELECT COUNT(*) FROM notifications WHERE company_id = $1 AND read_at IS NULL",
            company_id,
            None,
        )
        .await?;

        let current = Month::of(today);
        let mut first = current;
        for _ in 1..SERIES_MONTHS {
            first = first.previous();
        }
        let since = first.first_day().unwrap_or(today);

        let rows: Vec<(String, i64, i64)> = sqlx::query_as(
            r#"
            SELECT to_char(date_trunc('month', delivered_on), 'YYYY-MM') AS month,
                   COUNT(*) AS deliveries,
                   COALESCE(SUM(quantity), 0)::BIGINT AS quantity
            FROM ppe_deliveries
            WHERE company_id = $1 AND delivered_on >= $2
            GROUP BY 1
            "#,
        )
        .bind(company_id)
        .bind(since)
        .fetch_all(pool)
        .await?;

        Ok(Dashboard {
            generated_on: today,
            active_employees,
            employees_by_status,
            active_ppe_deliveries,
            ca_expiring,
            overdue_health_certificates,
            trainings_expiring,
            low_stock_ppe,
            low_stock_supplies,
            assets_by_status,
            pending_vacations,
            unread_notifications,
            deliveries_by_month: delivery_series(current, SERIES_MONTHS, &rows),
        })
    }
}
