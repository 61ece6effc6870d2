//! Timesheet entries
//!
//! An entry is a clock-in with an optional clock-out. Each employee has at most one open
//! entry; clocking while one is open closes it. Monthly summaries only count closed
//! entries whose clock-in falls inside the month.

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::borrow::Cow;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::{double_option, push_set, Page, PageRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "clock_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ClockMethod {
    QrCode,
    Face,
    Fingerprint,
    #[default]
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TimesheetEntry {
    pub id: Uuid,
    pub company_id: Uuid,
    pub employee_id: Uuid,
    pub clock_in: DateTime<Utc>,
    pub clock_out: Option<DateTime<Utc>>,
    pub method: ClockMethod,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TimesheetEntry {
    /// Worked minutes for a closed entry
    pub fn worked_minutes(&self) -> Option<i64> {
        self.clock_out.map(|out| (out - self.clock_in).num_minutes())
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "check_entry_order"))]
pub struct CreateTimesheetEntry {
    pub employee_id: Uuid,
    pub clock_in: DateTime<Utc>,
    pub clock_out: Option<DateTime<Utc>>,

    #[serde(default)]
    pub method: ClockMethod,

    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

fn check_entry_order(data: &CreateTimesheetEntry) -> Result<(), ValidationError> {
    match data.clock_out {
        Some(out) if out <= data.clock_in => {
            let mut err = ValidationError::new("clock_out");
            err.message = Some(Cow::Borrowed("Clock-out must be after clock-in"));
            Err(err)
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateTimesheetEntry {
    pub clock_in: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "double_option")]
    pub clock_out: Option<Option<DateTime<Utc>>>,

    pub method: Option<ClockMethod>,

    #[serde(default, deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimesheetFilter {
    pub employee_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Only entries without a clock-out
    pub open: Option<bool>,
}

/// Result of a clock toggle
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "entry", rename_all = "snake_case")]
pub enum ClockEvent {
    ClockIn(TimesheetEntry),
    ClockOut(TimesheetEntry),
}

/// Month given as `YYYY-MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Month {
    pub year: i32,
    pub month: u32,
}

impl Month {
    pub fn parse(input: &str) -> Option<Self> {
        let (year, month) = input.trim().split_once('-')?;
        if year.len() != 4 || month.len() != 2 {
            return None;
        }
        let year: i32 = year.parse().ok()?;
        let month: u32 = month.parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, 1)?;
        Some(Self { year, month })
    }

    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }

    pub fn previous(&self) -> Self {
        if self.month == 1 {
            Self { year: self.year - 1, month: 12 }
        } else {
            Self { year: self.year, month: self.month - 1 }
        }
    }

    pub fn of(date: NaiveDate) -> Self {
        Self { year: date.year(), month: date.month() }
    }

    /// `[start, end)` in UTC
    pub fn bounds(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let start = self.first_day()?.and_hms_opt(0, 0, 0)?;
        let end = self.next().first_day()?.and_hms_opt(0, 0, 0)?;
        Some((Utc.from_utc_datetime(&start), Utc.from_utc_datetime(&end)))
    }
}

impl std::fmt::Display for Month {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Worked time totals for one employee and month
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimesheetSummary {
    pub employee_id: Uuid,
    pub month: String,
    pub worked_minutes: i64,
    pub closed_entries: i64,
    pub open_entries: i64,
    /// Distinct days with at least one clock-in
    pub days_worked: i64,
}

/// Folds entries into a summary
pub fn summarize(employee_id: Uuid, month: Month, entries: &[TimesheetEntry]) -> TimesheetSummary {
    let mut days: Vec<NaiveDate> = entries.iter().map(|e| e.clock_in.date_naive()).collect();
    days.sort_unstable();
    days.dedup();

    TimesheetSummary {
        employee_id,
        month: month.to_string(),
        worked_minutes: entries.iter().filter_map(TimesheetEntry::worked_minutes).sum(),
        closed_entries: entries.iter().filter(|e| e.clock_out.is_some()).count() as i64,
        open_entries: entries.iter().filter(|e| e.clock_out.is_none()).count() as i64,
        days_worked: days.len() as i64,
    }
}

const COLUMNS: &str = "id, company_id, employee_id, clock_in, clock_out, method, notes, created_at, updated_at";

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, company_id: Uuid, filter: &TimesheetFilter, page: &PageRequest) {
    qb.push(" WHERE company_id = ").push_bind(company_id);

    if let Some(employee_id) = filter.employee_id {
        qb.push(" AND employee_id = ").push_bind(employee_id);
    }
    if let Some(from) = filter.from {
        qb.push(" AND clock_in >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        qb.push(" AND clock_in < ").push_bind(to);
    }
    match filter.open {
        Some(true) => {
            qb.push(" AND clock_out IS NULL");
        }
        Some(false) => {
            qb.push(" AND clock_out IS NOT NULL");
        }
        None => {}
    }
    if let Some(pattern) = &page.search {
        qb.push(" AND notes ILIKE ").push_bind(pattern.clone());
    }
}

impl TimesheetEntry {
    pub const SORTABLE: &'static [&'static str] = &["clock_in", "clock_out", "method", "created_at"];

    /// Records a manual entry; `None` when the employee is not in the company
    ///
    /// A second open entry for the same employee violates `timesheet_entries_open_key`.
    pub async fn create(
        pool: &PgPool,
        company_id: Uuid,
        data: CreateTimesheetEntry,
    ) -> Result<Option<Self>, sqlx::Error> {
        let entry = sqlx::query_as::<_, TimesheetEntry>(&format!(
            r#"
            INSERT INTO timesheet_entries (company_id, employee_id, clock_in, clock_out, method, notes)
            SELECT $1, $2, $3, $4, $5, $6
            WHERE EXISTS (SELECT 1 FROM employees WHERE id = $2 AND company_id = $1)
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(company_id)
        .bind(data.employee_id)
        .bind(data.clock_in)
        .bind(data.clock_out)
        .bind(data.method)
        .bind(data.notes)
        .fetch_optional(pool)
        .await?;

        Ok(entry)
    }

    /// Clocks an employee in, or out when an entry is open
    ///
    /// Returns `None` when the employee is not an active member of the company.
    pub async fn clock(
        pool: &PgPool,
        company_id: Uuid,
        employee_id: Uuid,
        method: ClockMethod,
        at: DateTime<Utc>,
    ) -> Result<Option<ClockEvent>, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let active: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM employees WHERE company_id = $1 AND id = $2 AND status = 'active' FOR UPDATE",
        )
        .bind(company_id)
        .bind(employee_id)
        .fetch_optional(&mut *tx)
        .await?;
        if active.is_none() {
            return Ok(None);
        }

        let closed = sqlx::query_as::<_, TimesheetEntry>(&format!(
            r#"
            UPDATE timesheet_entries
            SET clock_out = GREATEST($2, clock_in + INTERVAL '1 minute'), updated_at = NOW()
            WHERE employee_id = $1 AND clock_out IS NULL
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(employee_id)
        .bind(at)
        .fetch_optional(&mut *tx)
        .await?;

        let event = match closed {
            Some(entry) => ClockEvent::ClockOut(entry),
            None => {
                let entry = sqlx::query_as::<_, TimesheetEntry>(&format!(
                    r#"
                    INSERT INTO timesheet_entries (company_id, employee_id, clock_in, method)
                    VALUES ($1, $2, $3, $4)
                    RETURNING {}
                    "#,
                    COLUMNS
                ))
                .bind(company_id)
                .bind(employee_id)
                .bind(at)
                .bind(method)
                .fetch_one(&mut *tx)
                .await?;
                ClockEvent::ClockIn(entry)
            }
        };

        tx.commit().await?;

        Ok(Some(event))
    }

    /// Entries whose clock-in falls inside the month
    pub async fn for_month(
        pool: &PgPool,
        company_id: Uuid,
        employee_id: Uuid,
        month: Month,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let Some((start, end)) = month.bounds() else {
            return Ok(Vec::new());
        };

        let entries = sqlx::query_as::<_, TimesheetEntry>(&format!(
            r#"
            SELECT {}
            FROM timesheet_entries
            WHERE company_id = $1 AND employee_id = $2 AND clock_in >= $3 AND clock_in < $4
            ORDER BY clock_in
            "#,
            COLUMNS
        ))
        .bind(company_id)
        .bind(employee_id)
        .bind(start)
        .bind(end)
        .fetch_all(pool)
        .await?;

        Ok(entries)
    }

    pub async fn find_by_id(pool: &PgPool, company_id: Uuid, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let entry = sqlx::query_as::<_, TimesheetEntry>(&format!(
            "SELECT {} FROM timesheet_entries WHERE company_id = $1 AND id = $2",
            COLUMNS
        ))
        .bind(company_id)
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(entry)
    }

    pub async fn list(
        pool: &PgPool,
        company_id: Uuid,
        filter: &TimesheetFilter,
        page: &PageRequest,
    ) -> Result<Page<Self>, sqlx::Error> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM timesheet_entries");
        push_filters(&mut count, company_id, filter, page);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(pool).await?;

        let mut query = QueryBuilder::new(format!("SELECT {} FROM timesheet_entries", COLUMNS));
        push_filters(&mut query, company_id, filter, page);
        page.push_tail(&mut query);
        let items = query.build_query_as::<TimesheetEntry>().fetch_all(pool).await?;

        Ok(Page::new(items, total, page))
    }

    /// Partial update; the order check constraint rejects a clock-out before clock-in
    pub async fn update(
        pool: &PgPool,
        company_id: Uuid,
        id: Uuid,
        data: UpdateTimesheetEntry,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut qb = QueryBuilder::new("UPDATE timesheet_entries SET updated_at = NOW()");
        push_set(&mut qb, "clock_in", data.clock_in);
        push_set(&mut qb, "clock_out", data.clock_out);
        push_set(&mut qb, "method", data.method);
        push_set(&mut qb, "notes", data.notes);
        qb.push(" WHERE company_id = ")
            .push_bind(company_id)
            .push(" AND id = ")
            .push_bind(id)
            .push(" RETURNING ")
            .push(COLUMNS);

        let entry = qb.build_query_as::<TimesheetEntry>().fetch_optional(pool).await?;

        Ok(entry)
    }

    pub async fn delete(pool: &PgPool, company_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM timesheet_entries WHERE company_id = $1 AND id = $2")
            .bind(company_id)
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(clock_in: DateTime<Utc>, minutes: Option<i64>) -> TimesheetEntry {
        TimesheetEntry {
            id: Uuid::new_v4(),
            company_id: Uuid::nil(),
            employee_id: Uuid::nil(),
            clock_in,
            clock_out: minutes.map(|m| clock_in + Duration::minutes(m)),
            method: ClockMethod::QrCode,
            notes: None,
            created_at: clock_in,
            updated_at: clock_in,
        }
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_month_parse() {
        assert_eq!(Month::parse("2025-03"), Some(Month { year: 2025, month: 3 }));
        assert_eq!(Month::parse("2025-3"), None);
        assert_eq!(Month::parse("2025-13"), None);
        assert_eq!(Month::parse("march"), None);
        assert_eq!(Month { year: 2025, month: 3 }.to_string(), "2025-03");
    }

    #[test]
    fn test_month_bounds_roll_over_year() {
        let (start, end) = Month { year: 2024, month: 12 }.bounds().unwrap();
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_summarize() {
        let employee = Uuid::new_v4();
        let entries = vec![
            entry(at(3, 7), Some(4 * 60)),
            entry(at(3, 13), Some(4 * 60 + 30)),
            entry(at(4, 7), Some(8 * 60)),
            entry(at(5, 7), None),
        ];

        let summary = summarize(employee, Month { year: 2025, month: 3 }, &entries);

        assert_eq!(summary.worked_minutes, 16 * 60 + 30);
        assert_eq!(summary.closed_entries, 3);
        assert_eq!(summary.open_entries, 1);
        assert_eq!(summary.days_worked, 3);
        assert_eq!(summary.month, "2025-03");
    }

    #[test]
    fn test_entry_order_validation() {
        let data = CreateTimesheetEntry {
            employee_id: Uuid::new_v4(),
            clock_in: at(3, 8),
            clock_out: Some(at(3, 7)),
            method: ClockMethod::Manual,
            notes: None,
        };
        assert!(data.validate().is_err());
    }

    #[test]
    fn test_clock_event_serde() {
        let json = serde_json::to_value(ClockEvent::ClockIn(entry(at(3, 7), None))).unwrap();
        assert_eq!(json["event"], "clock_in");
        assert!(json["entry"]["clock_out"].is_null());
    }
}
