//! Vacation requests
//!
//! ```text
//! requested ──approve──▶ approved ──cancel──▶ cancelled
//!     │ └──reject──▶ rejected
//!     └──cancel──▶ cancelled
//! ```
//!
//! A vacation spans at most [`MAX_VACATION_DAYS`] calendar days and may not overlap an
//! approved vacation of the same employee. Overlap is checked at request time and again,
//! under a row lock, at approval.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use std::borrow::Cow;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::{Page, PageRequest};

/// Longest single vacation period, inclusive of both ends
pub const MAX_VACATION_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "vacation_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VacationStatus {
    #[default]
    Requested,
    Approved,
    Rejected,
    Cancelled,
}

impl VacationStatus {
    /// Whether a request in this status may move to `to`
    pub fn can_transition(&self, to: VacationStatus) -> bool {
        use VacationStatus::*;
        matches!(
            (self, to),
            (Requested, Approved) | (Requested, Rejected) | (Requested, Cancelled) | (Approved, Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VacationStatus::Requested => "requested",
            VacationStatus::Approved => "approved",
            VacationStatus::Rejected => "rejected",
            VacationStatus::Cancelled => "cancelled",
        }
    }
}

/// Number of calendar days covered, both ends included
pub fn vacation_days(start: NaiveDate, end: NaiveDate) -> i64 {
    (end - start).num_days() + 1
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Vacation {
    pub id: Uuid,
    pub company_id: Uuid,
    pub employee_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: VacationStatus,
    pub notes: Option<String>,
    pub decided_by: Option<Uuid>,
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "check_period"))]
pub struct CreateVacation {
    pub employee_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

fn check_period(data: &CreateVacation) -> Result<(), ValidationError> {
    let message = if data.end_date < data.start_date {
        "End date must not be before start date"
    } else if vacation_days(data.start_date, data.end_date) > MAX_VACATION_DAYS {
        "A vacation period may not exceed 30 days"
    } else {
        return Ok(());
    };

    let mut err = ValidationError::new("end_date");
    err.message = Some(Cow::Borrowed(message));
    Err(err)
}

/// Notes may be edited while a request is pending
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateVacation {
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VacationFilter {
    pub employee_id: Option<Uuid>,
    pub status: Option<VacationStatus>,
    /// Only vacations that include or follow this date
    pub from: Option<NaiveDate>,
}

/// Result of a create or status change
#[derive(Debug)]
pub enum VacationOutcome {
    Saved(Vacation),
    NotFound,
    /// Employee not in the company
    UnknownEmployee,
    InvalidTransition { from: VacationStatus, to: VacationStatus },
    /// Overlaps an approved vacation of the same employee
    Overlap,
}

const COLUMNS: &str = "id, company_id, employee_id, start_date, end_date, status, notes, \
                       decided_by, decided_at, created_at, updated_at";

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, company_id: Uuid, filter: &VacationFilter, page: &PageRequest) {
    qb.push(" WHERE company_id = ").push_bind(company_id);

    if let Some(employee_id) = filter.employee_id {
        qb.push(" AND employee_id = ").push_bind(employee_id);
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(from) = filter.from {
        qb.push(" AND end_date >= ").push_bind(from);
    }
    if let Some(pattern) = &page.search {
        qb.push(" AND notes ILIKE ").push_bind(pattern.clone());
    }
}

/// True when an approved vacation of the employee intersects the period
async fn overlaps_approved(
    conn: &mut PgConnection,
    employee_id: Uuid,
    start: NaiveDate,
    end: NaiveDate,
    exclude: Option<Uuid>,
) -> Result<bool, sqlx::Error> {
    let overlaps: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM vacations
            WHERE employee_id = $1
              AND status = 'approved'
              AND start_date <= $3
              AND end_date >= $2
              AND ($4::uuid IS NULL OR id <> $4)
        )
        "#,
    )
    .bind(employee_id)
    .bind(start)
    .bind(end)
    .bind(exclude)
    .fetch_one(&mut *conn)
    .await?;

    Ok(overlaps)
}

impl Vacation {
    pub const SORTABLE: &'static [&'static str] = &["start_date", "end_date", "status", "created_at"];

    /// Files a vacation request
    pub async fn create(pool: &PgPool, company_id: Uuid, data: CreateVacation) -> Result<VacationOutcome, sqlx::Error> {
        let mut tx = pool.begin().await?;

        // Serializes requests and approvals for the same employee
        let exists: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM employees WHERE company_id = $1 AND id = $2 FOR UPDATE",
        )
        .bind(company_id)
        .bind(data.employee_id)
        .fetch_optional(&mut *tx)
        .await?;
        if exists.is_none() {
            return Ok(VacationOutcome::UnknownEmployee);
        }

        if overlaps_approved(&mut tx, data.employee_id, data.start_date, data.end_date, None).await? {
            return Ok(VacationOutcome::Overlap);
        }

        let vacation = sqlx::query_as::<_, Vacation>(&format!(
            r#"
            INSERT INTO vacations (company_id, employee_id, start_date, end_date, notes)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(company_id)
        .bind(data.employee_id)
        .bind(data.start_date)
        .bind(data.end_date)
        .bind(data.notes)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(VacationOutcome::Saved(vacation))
    }

    pub async fn find_by_id(pool: &PgPool, company_id: Uuid, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let vacation = sqlx::query_as::<_, Vacation>(&format!(
            "SELECT {} FROM vacations WHERE company_id = $1 AND id = $2",
            COLUMNS
        ))
        .bind(company_id)
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(vacation)
    }

    pub async fn list(
        pool: &PgPool,
        company_id: Uuid,
        filter: &VacationFilter,
        page: &PageRequest,
    ) -> Result<Page<Self>, sqlx::Error> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM vacations");
        push_filters(&mut count, company_id, filter, page);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(pool).await?;

        let mut query = QueryBuilder::new(format!("SELECT {} FROM vacations", COLUMNS));
        push_filters(&mut query, company_id, filter, page);
        page.push_tail(&mut query);
        let items = query.build_query_as::<Vacation>().fetch_all(pool).await?;

        Ok(Page::new(items, total, page))
    }

    /// Updates notes on a pending request
    pub async fn update_notes(
        pool: &PgPool,
        company_id: Uuid,
        id: Uuid,
        data: UpdateVacation,
    ) -> Result<Option<Self>, sqlx::Error> {
        let vacation = sqlx::query_as::<_, Vacation>(&format!(
            r#"
            UPDATE vacations SET notes = $3, updated_at = NOW()
            WHERE company_id = $1 AND id = $2 AND status = 'requested'
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(company_id)
        .bind(id)
        .bind(data.notes)
        .fetch_optional(pool)
        .await?;

        Ok(vacation)
    }

    /// Moves a request to a new status, recording who decided
    pub async fn transition(
        pool: &PgPool,
        company_id: Uuid,
        id: Uuid,
        to: VacationStatus,
        decided_by: Uuid,
    ) -> Result<VacationOutcome, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let current = sqlx::query_as::<_, Vacation>(&format!(
            "SELECT {} FROM vacations WHERE company_id = $1 AND id = $2 FOR UPDATE",
            COLUMNS
        ))
        .bind(company_id)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current) = current else {
            return Ok(VacationOutcome::NotFound);
        };

        if !current.status.can_transition(to) {
            return Ok(VacationOutcome::InvalidTransition { from: current.status, to });
        }

        if to == VacationStatus::Approved {
            sqlx::query("SELECT id FROM employees WHERE id = $1 FOR UPDATE")
                .bind(current.employee_id)
                .execute(&mut *tx)
                .await?;

            let overlap = overlaps_approved(
                &mut tx,
                current.employee_id,
                current.start_date,
                current.end_date,
                Some(current.id),
            )
            .await?;
            if overlap {
                return Ok(VacationOutcome::Overlap);
            }
        }

        let vacation = sqlx::query_as::<_, Vacation>(&format!(
            r#"
            UPDATE vacations
            SET status = $3, decided_by = $4, decided_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND company_id = $2
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(id)
        .bind(company_id)
        .bind(to)
        .bind(decided_by)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(VacationOutcome::Saved(vacation))
    }

    pub async fn delete(pool: &PgPool, company_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM vacations WHERE company_id = $1 AND id = $2")
            .bind(company_id)
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
