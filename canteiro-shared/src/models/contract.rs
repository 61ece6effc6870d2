//! Employment contracts

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::borrow::Cow;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::{double_option, push_set, Page, PageRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "contract_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContractType {
    Clt,
    Pj,
    Temporary,
    Internship,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "contract_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    #[default]
    Active,
    Ended,
    Suspended,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Contract {
    pub id: Uuid,
    pub company_id: Uuid,
    pub employee_id: Uuid,
    pub contract_type: ContractType,
    pub job_title: String,
    pub salary_cents: i64,
    pub weekly_hours: i16,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub status: ContractStatus,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "check_contract_dates"))]
pub struct CreateContract {
    pub employee_id: Uuid,
    pub contract_type: ContractType,

    #[validate(length(min = 1, max = 120, message = "Job title must be 1 to 120 characters"))]
    pub job_title: String,

    #[validate(range(min = 0, message = "Salary must not be negative"))]
    pub salary_cents: i64,

    #[serde(default = "default_weekly_hours")]
    #[validate(range(min = 1, max = 60, message = "Weekly hours must be between 1 and 60"))]
    pub weekly_hours: i16,

    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,

    #[serde(default)]
    pub status: ContractStatus,

    pub notes: Option<String>,
}

fn default_weekly_hours() -> i16 {
    44
}

fn check_contract_dates(data: &CreateContract) -> Result<(), ValidationError> {
    match data.end_date {
        Some(end) if end < data.start_date => {
            let mut err = ValidationError::new("end_date");
            err.message = Some(Cow::Borrowed("End date must not be before start date"));
            Err(err)
        }
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateContract {
    pub contract_type: Option<ContractType>,

    #[validate(length(min = 1, max = 120, message = "Job title must be 1 to 120 characters"))]
    pub job_title: Option<String>,

    #[validate(range(min = 0, message = "Salary must not be negative"))]
    pub salary_cents: Option<i64>,

    #[validate(range(min = 1, max = 60, message = "Weekly hours must be between 1 and 60"))]
    pub weekly_hours: Option<i16>,

    pub start_date: Option<NaiveDate>,

    #[serde(default, deserialize_with = "double_option")]
    pub end_date: Option<Option<NaiveDate>>,

    pub status: Option<ContractStatus>,

    #[serde(default, deserialize_with = "double_option")]
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContractFilter {
    pub employee_id: Option<Uuid>,
    pub status: Option<ContractStatus>,
    pub contract_type: Option<ContractType>,
}

const COLUMNS: &str = "id, company_id, employee_id, contract_type, job_title, salary_cents, \
                       weekly_hours, start_date, end_date, status, notes, created_at, updated_at";

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, company_id: Uuid, filter: &ContractFilter, page: &PageRequest) {
    qb.push(" WHERE company_id = ").push_bind(company_id);

    if let Some(employee_id) = filter.employee_id {
        qb.push(" AND employee_id = ").push_bind(employee_id);
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(contract_type) = filter.contract_type {
        qb.push(" AND contract_type = ").push_bind(contract_type);
    }
    if let Some(pattern) = &page.search {
        qb.push(" AND job_title ILIKE ").push_bind(pattern.clone());
    }
}

impl Contract {
    pub const SORTABLE: &'static [&'static str] =
        &["start_date", "end_date", "job_title", "salary_cents", "status", "created_at"];

    /// Creates a contract; `None` when the employee is not in the company
    pub async fn create(pool: &PgPool, company_id: Uuid, data: CreateContract) -> Result<Option<Self>, sqlx::Error> {
        let contract = sqlx::query_as::<_, Contract>(&format!(
            r#"
            INSERT INTO contracts
                (company_id, employee_id, contract_type, job_title, salary_cents, weekly_hours,
                 start_date, end_date, status, notes)
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9, $10
            WHERE EXISTS (SELECT 1 FROM employees WHERE id = $2 AND company_id = $1)
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(company_id)
        .bind(data.employee_id)
        .bind(data.contract_type)
        .bind(data.job_title)
        .bind(data.salary_cents)
        .bind(data.weekly_hours)
        .bind(data.start_date)
        .bind(data.end_date)
        .bind(data.status)
        .bind(data.notes)
        .fetch_optional(pool)
        .await?;

        Ok(contract)
    }

    pub async fn find_by_id(pool: &PgPool, company_id: Uuid, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let contract = sqlx::query_as::<_, Contract>(&format!(
            "SELECT {} FROM contracts WHERE company_id = $1 AND id = $2",
            COLUMNS
        ))
        .bind(company_id)
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(contract)
    }

    pub async fn list(
        pool: &PgPool,
        company_id: Uuid,
        filter: &ContractFilter,
        page: &PageRequest,
    ) -> Result<Page<Self>, sqlx::Error> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM contracts");
        push_filters(&mut count, company_id, filter, page);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(pool).await?;

        let mut query = QueryBuilder::new(format!("SELECT {} FROM contracts", COLUMNS));
        push_filters(&mut query, company_id, filter, page);
        page.push_tail(&mut query);
        let items = query.build_query_as::<Contract>().fetch_all(pool).await?;

        Ok(Page::new(items, total, page))
    }

    /// Partial update; the date check constraint rejects an end before the start
    pub async fn update(
        pool: &PgPool,
        company_id: Uuid,
        id: Uuid,
        data: UpdateContract,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut qb = QueryBuilder::new("UPDATE contracts SET updated_at = NOW()");
        push_set(&mut qb, "contract_type", data.contract_type);
        push_set(&mut qb, "job_title", data.job_title);
        push_set(&mut qb, "salary_cents", data.salary_cents);
        push_set(&mut qb, "weekly_hours", data.weekly_hours);
        push_set(&mut qb, "start_date", data.start_date);
        push_set(&mut qb, "end_date", data.end_date);
        push_set(&mut qb, "status", data.status);
        push_set(&mut qb, "notes", data.notes);
        qb.push(" WHERE company_id = ")
            .push_bind(company_id)
            .push(" AND id = ")
            .push_bind(id)
            .push(" RETURNING ")
            .push(COLUMNS);

        let contract = qb.build_query_as::<Contract>().fetch_optional(pool).await?;

        Ok(contract)
    }

    pub async fn delete(pool: &PgPool, company_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM contracts WHERE company_id = $1 AND id = $2")
            .bind(company_id)
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
