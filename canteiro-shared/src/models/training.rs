//! Training records
//!
//! Regulatory trainings carry an NR code (stored normalized as `NR-35`) and usually an
//! expiry date after which the employee must be retrained.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::borrow::Cow;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::{double_option, push_set, Page, PageRequest};
use crate::validation::{normalize_nr_code, validate_nr_code};

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Training {
    pub id: Uuid,
    pub company_id: Uuid,
    pub employee_id: Uuid,
    pub title: String,
    pub nr_code: Option<String>,
    pub workload_hours: i16,
    pub instructor: Option<String>,
    pub completed_on: NaiveDate,
    pub expires_on: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "check_training_dates"))]
pub struct CreateTraining {
    pub employee_id: Uuid,

    #[validate(length(min = 1, max = 255, message = "Title must be 1 to 255 characters"))]
    pub title: String,

    #[validate(custom(function = "validate_nr_code"))]
    pub nr_code: Option<String>,

    #[validate(range(min = 1, max = 1000, message = "Workload must be between 1 and 1000 hours"))]
    pub workload_hours: i16,

    #[validate(length(max = 255))]
    pub instructor: Option<String>,

    pub completed_on: NaiveDate,
    pub expires_on: Option<NaiveDate>,
}

fn check_training_dates(data: &CreateTraining) -> Result<(), ValidationError> {
    match data.expires_on {
        Some(expires) if expires <= data.completed_on => {
            let mut err = ValidationError::new("expires_on");
            err.message = Some(Cow::Borrowed("Expiry must be after completion"));
            Err(err)
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateTraining {
    #[validate(length(min = 1, max = 255, message = "Title must be 1 to 255 characters"))]
    pub title: Option<String>,

    #[serde(default, deserialize_with = "double_option")]
    pub nr_code: Option<Option<String>>,

    #[validate(range(min = 1, max = 1000, message = "Workload must be between 1 and 1000 hours"))]
    pub workload_hours: Option<i16>,

    #[serde(default, deserialize_with = "double_option")]
    pub instructor: Option<Option<String>>,

    pub completed_on: Option<NaiveDate>,

    #[serde(default, deserialize_with = "double_option")]
    pub expires_on: Option<Option<NaiveDate>>,
}

impl UpdateTraining {
    /// Normalizes the NR code, returning an error message for an invalid one
    pub fn normalized_nr_code(&self) -> Result<Option<Option<String>>, &'static str> {
        match &self.nr_code {
            Some(Some(code)) => normalize_nr_code(code)
                .map(|c| Some(Some(c)))
                .ok_or("NR code must be between NR-1 and NR-38"),
            other => Ok(other.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrainingFilter {
    pub employee_id: Option<Uuid>,
    pub nr_code: Option<String>,
    /// Only trainings expiring on or before this date
    pub expires_before: Option<NaiveDate>,
}

const COLUMNS: &str = "id, company_id, employee_id, title, nr_code, workload_hours, instructor, \
                       completed_on, expires_on, created_at, updated_at";

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, company_id: Uuid, filter: &TrainingFilter, page: &PageRequest) {
    qb.push(" WHERE company_id = ").push_bind(company_id);

    if let Some(employee_id) = filter.employee_id {
        qb.push(" AND employee_id = ").push_bind(employee_id);
    }
    if let Some(code) = filter.nr_code.as_deref().and_then(normalize_nr_code) {
        qb.push(" AND nr_code = ").push_bind(code);
    }
    if let Some(date) = filter.expires_before {
        qb.push(" AND expires_on <= ").push_bind(date);
    }
    if let Some(pattern) = &page.search {
        qb.push(" AND (title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR instructor ILIKE ")
            .push_bind(pattern.clone())
            .push(")");
    }
}

impl Training {
    pub const SORTABLE: &'static [&'static str] =
        &["title", "nr_code", "completed_on", "expires_on", "created_at"];

    /// Creates a training record; `None` when the employee is not in the company
    pub async fn create(pool: &PgPool, company_id: Uuid, data: CreateTraining) -> Result<Option<Self>, sqlx::Error> {
        let nr_code = data.nr_code.as_deref().and_then(normalize_nr_code);

        let training = sqlx::query_as::<_, Training>(&format!(
            r#"
            INSERT INTO trainings
                (company_id, employee_id, title, nr_code, workload_hours, instructor, completed_on, expires_on)
            SELECT $1, $2, $3, $4, $5, $6, $7, $8
            WHERE EXISTS (SELECT 1 FROM employees WHERE id = $2 AND company_id = $1)
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(company_id)
        .bind(data.employee_id)
        .bind(data.title)
        .bind(nr_code)
        .bind(data.workload_hours)
        .bind(data.instructor)
        .bind(data.completed_on)
        .bind(data.expires_on)
        .fetch_optional(pool)
        .await?;

        Ok(training)
    }

    pub async fn find_by_id(pool: &PgPool, company_id: Uuid, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let training = sqlx::query_as::<_, Training>(&format!(
            "SELECT {} FROM trainings WHERE company_id = $1 AND id = $2",
            COLUMNS
        ))
        .bind(company_id)
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(training)
    }

    pub async fn list(
        pool: &PgPool,
        company_id: Uuid,
        filter: &TrainingFilter,
        page: &PageRequest,
    ) -> Result<Page<Self>, sqlx::Error> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM trainings");
        push_filters(&mut count, company_id, filter, page);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(pool).await?;

        let mut query = QueryBuilder::new(format!("SELECT {} FROM trainings", COLUMNS));
        push_filters(&mut query, company_id, filter, page);
        page.push_tail(&mut query);
        let items = query.build_query_as::<Training>().fetch_all(pool).await?;

        Ok(Page::new(items, total, page))
    }

    /// Partial update; `nr_code` must already be normalized
    pub async fn update(
        pool: &PgPool,
        company_id: Uuid,
        id: Uuid,
        data: UpdateTraining,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut qb = QueryBuilder::new("UPDATE trainings SET updated_at = NOW()");
        push_set(&mut qb, "title", data.title);
        push_set(&mut qb, "nr_code", data.nr_code);
        push_set(&mut qb, "workload_hours", data.workload_hours);
        push_set(&mut qb, "instructor", data.instructor);
        push_set(&mut qb, "completed_on", data.completed_on);
        push_set(&mut qb, "expires_on", data.expires_on);
        qb.push(" WHERE company_id = ")
            .push_bind(company_id)
            .push(" AND id = ")
            .push_bind(id)
            .push(" RETURNING ")
            .push(COLUMNS);

        let training = qb.build_query_as::<Training>().fetch_optional(pool).await?;

        Ok(training)
    }

    pub async fn delete(pool: &PgPool, company_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM trainings WHERE company_id = $1 AND id = $2")
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

    fn training(nr: Option<&str>, expires: Option<NaiveDate>) -> CreateTraining {
        CreateTraining {
            employee_id: Uuid::new_v4(),
            title: "Trabalho em altura".to_string(),
            nr_code: nr.map(str::to_string),
            workload_hours: 8,
            instructor: None,
            completed_on: NaiveDate::from_ymd_opt(2025, 5, 10).unwrap(),
            expires_on: expires,
        }
    }

    #[test]
    fn test_create_validation() {
        assert!(training(Some("nr35"), NaiveDate::from_ymd_opt(2027, 5, 10)).validate().is_ok());
        assert!(training(Some("NR-99"), None).validate().is_err());
        assert!(training(None, NaiveDate::from_ymd_opt(2025, 5, 10)).validate().is_err());
    }

    #[test]
    fn test_update_nr_code_normalization() {
        let patch: UpdateTraining = serde_json::from_str(r#"{"nr_code": "nr 10"}"#).unwrap();
        assert_eq!(patch.normalized_nr_code(), Ok(Some(Some("NR-10".to_string()))));

        let cleared: UpdateTraining = serde_json::from_str(r#"{"nr_code": null}"#).unwrap();
        assert_eq!(cleared.normalized_nr_code(), Ok(Some(None)));

        let bad: UpdateTraining = serde_json::from_str(r#"{"nr_code": "NR-0"}"#).unwrap();
        assert!(bad.normalized_nr_code().is_err());
    }
}
