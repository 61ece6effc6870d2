//! Notifications
//!
//! Alerts are written by worker jobs and workflow completion. Each carries a dedupe key
//! unique per company, so re-running a job over the same condition inserts nothing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{Page, PageRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "notification_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    CaExpiring,
    AsoDue,
    TrainingExpiring,
    ContractEnding,
    VacationUpcoming,
    LowStock,
    WorkflowCompleted,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::CaExpiring => "ca_expiring",
            NotificationKind::AsoDue => "aso_due",
            NotificationKind::TrainingExpiring => "training_expiring",
            NotificationKind::ContractEnding => "contract_ending",
            NotificationKind::VacationUpcoming => "vacation_upcoming",
            NotificationKind::LowStock => "low_stock",
            NotificationKind::WorkflowCompleted => "workflow_completed",
        }
    }

    /// Dedupe key for an alert about an entity
    ///
    /// `marker` distinguishes occurrences of the same condition, usually the date the
    /// condition refers to, so a renewed CA that expires again alerts again.
    pub fn dedupe_key(&self, entity_id: Uuid, marker: impl std::fmt::Display) -> String {
        format!("{}:{}:{}", self.as_str(), entity_id, marker)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "notification_severity", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: Uuid,
    pub company_id: Uuid,
    pub kind: NotificationKind,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<Uuid>,
    #[serde(skip_serializing)]
    pub dedupe_key: String,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub kind: NotificationKind,
    pub severity: Severity,
    pub title: String,
    pub message: String,
    pub entity_type: Option<&'static str>,
    pub entity_id: Option<Uuid>,
    pub dedupe_key: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationFilter {
    /// Only notifications not yet read
    pub unread: Option<bool>,
    pub kind: Option<NotificationKind>,
    pub severity: Option<Severity>,
}

const COLUMNS: &str = "id, company_id, kind, severity, title, message, entity_type, entity_id, dedupe_key, \
                       read_at, created_at";

fn push_filters(
    qb: &mut QueryBuilder<'_, Postgres>,
    company_id: Uuid,
    filter: &NotificationFilter,
    page: &PageRequest,
) {
    qb.push(" WHERE company_id = ").push_bind(company_id);

    match filter.unread {
        Some(true) => {
            qb.push(" AND read_at IS NULL");
        }
        Some(false) => {
            qb.push(" AND read_at IS NOT NULL");
        }
        None => {}
    }
    if let Some(kind) = filter.kind {
        qb.push(" AND kind = ").push_bind(kind);
    }
    if let Some(severity) = filter.severity {
        qb.push(" AND severity = ").push_bind(severity);
    }
    if let Some(pattern) = &page.search {
        qb.push(" AND (title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR message ILIKE ")
            .push_bind(pattern.clone())
            .push(")");
    }
}

impl Notification {
    pub const SORTABLE: &'static [&'static str] = &["created_at", "severity", "kind"];

    /// Inserts a notification unless its dedupe key already exists
    ///
    /// Returns `None` for a duplicate.
    pub async fn create<'e>(
        executor: impl PgExecutor<'e>,
        company_id: Uuid,
        data: NewNotification,
    ) -> Result<Option<Self>, sqlx::Error> {
        let notification = sqlx::query_as::<_, Notification>(&format!(
            r#"
            INSERT INTO notifications
                (company_id, kind, severity, title, message, entity_type, entity_id, dedupe_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (company_id, dedupe_key) DO NOTHING
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(company_id)
        .bind(data.kind)
        .bind(data.severity)
        .bind(data.title)
        .bind(data.message)
        .bind(data.entity_type)
        .bind(data.entity_id)
        .bind(data.dedupe_key)
        .fetch_optional(executor)
        .await?;

        Ok(notification)
    }

    pub async fn list(
        pool: &PgPool,
        company_id: Uuid,
        filter: &NotificationFilter,
        page: &PageRequest,
    ) -> Result<Page<Self>, sqlx::Error> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM notifications");
        push_filters(&mut count, company_id, filter, page);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(pool).await?;

        let mut query = QueryBuilder::new(format!("SELECT {} FROM notifications", COLUMNS));
        push_filters(&mut query, company_id, filter, page);
        page.push_tail(&mut query);
        let items = query.build_query_as::<Notification>().fetch_all(pool).await?;

        Ok(Page::new(items, total, page))
    }

    pub async fn unread_count(pool: &PgPool, company_id: Uuid) -> Result<i64, sqlx::Error> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE company_id = $1 AND read_at IS NULL")
                .bind(company_id)
                .fetch_one(pool)
                .await?;

        Ok(count)
    }

    /// Marks one notification read; already-read notifications keep their timestamp
    pub async fn mark_read(pool: &PgPool, company_id: Uuid, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let notification = sqlx::query_as::<_, Notification>(&format!(
            r#"
            UPDATE notifications SET read_at = COALESCE(read_at, NOW())
            WHERE company_id = $1 AND id = $2
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(company_id)
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(notification)
    }

    /// Marks every unread notification read, returning how many changed
    pub async fn mark_all_read(pool: &PgPool, company_id: Uuid) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("UPDATE notifications SET read_at = NOW() WHERE company_id = $1 AND read_at IS NULL")
            .bind(company_id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_dedupe_key() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        let date = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        assert_eq!(
            NotificationKind::CaExpiring.dedupe_key(id, date),
            "ca_expiring:550e8400-e29b-41d4-a716-446655440000:2025-07-01"
        );
    }

    #[test]
    fn test_severity_order() {
        assert!(Severity::Critical > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn test_filter_from_query() {
        let filter: NotificationFilter = serde_json::from_str(r#"{"unread":true,"kind":"low_stock"}"#).unwrap();
        assert_eq!(filter.unread, Some(true));
        assert_eq!(filter.kind, Some(NotificationKind::LowStock));
    }
}
