//! Employees (collaborators)
//!
//! An employee belongs to one company and is identified on the job site by a QR badge
//! (`qr_hash`, see `crate::badge`) or by an enrolled biometric template. CPF is unique
//! per company and stored as 11 bare digits.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;
use validator::Validate;

use super::{double_option, push_set, Page, PageRequest};
use crate::validation::{normalize_cpf, validate_cpf, validate_not_blank};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "employee_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EmployeeStatus {
    #[default]
    Active,
    OnLeave,
    Terminated,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Employee {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub cpf: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub job_title: String,
    pub department: Option<String>,
    pub hire_date: NaiveDate,
    pub status: EmployeeStatus,
    pub photo_url: Option<String>,
    pub qr_hash: Option<String>,
    pub badge_version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateEmployee {
    #[validate(
        length(min = 1, max = 255, message = "Name must be 1 to 255 characters"),
        custom(function = "validate_not_blank")
    )]
    pub name: String,

    #[validate(custom(function = "validate_cpf"))]
    pub cpf: String,

    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,

    #[validate(length(max = 32, message = "Phone must be at most 32 characters"))]
    pub phone: Option<String>,

    #[validate(length(min = 1, max = 120, message = "Job title must be 1 to 120 characters"))]
    pub job_title: String,

    #[validate(length(max = 120, message = "Department must be at most 120 characters"))]
    pub department: Option<String>,

    pub hire_date: NaiveDate,

    #[serde(default)]
    pub status: EmployeeStatus,

    #[validate(url(message = "Invalid photo URL"))]
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateEmployee {
    #[validate(length(min = 1, max = 255, message = "Name must be 1 to 255 characters"))]
    pub name: Option<String>,

    #[validate(custom(function = "validate_cpf"))]
    pub cpf: Option<String>,

    #[serde(default, deserialize_with = "double_option")]
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<Option<String>>,

    #[serde(default, deserialize_with = "double_option")]
    #[validate(length(max = 32, message = "Phone must be at most 32 characters"))]
    pub phone: Option<Option<String>>,

    #[validate(length(min = 1, max = 120, message = "Job title must be 1 to 120 characters"))]
    pub job_title: Option<String>,

    #[serde(default, deserialize_with = "double_option")]
    #[validate(length(max = 120, message = "Department must be at most 120 characters"))]
    pub department: Option<Option<String>>,

    pub hire_date: Option<NaiveDate>,

    pub status: Option<EmployeeStatus>,

    #[serde(default, deserialize_with = "double_option")]
    pub photo_url: Option<Option<String>>,
}

/// Per-table list filters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmployeeFilter {
    pub status: Option<EmployeeStatus>,
    pub department: Option<String>,
}

/// Badge lookup result returned to scanners
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct EmployeeSummary {
    pub id: Uuid,
    pub name: String,
    pub job_title: String,
    pub department: Option<String>,
    pub photo_url: Option<String>,
    pub status: EmployeeStatus,
}

const COLUMNS: &str = "id, company_id, name, cpf, email, phone, job_title, department, hire_date, \
                       status, photo_url, qr_hash, badge_version, created_at, updated_at";

fn push_filters(
    qb: &mut QueryBuilder<'_, Postgres>,
    company_id: Uuid,
    filter: &EmployeeFilter,
    page: &PageRequest,
) {
    qb.push(" WHERE company_id = ").push_bind(company_id);

    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(department) = &filter.department {
        qb.push(" AND department = ").push_bind(department.clone());
    }
    if let Some(pattern) = &page.search {
        qb.push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR job_title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR cpf LIKE ")
            .push_bind(pattern.clone())
            .push(")");
    }
}

impl Employee {
    pub const SORTABLE: &'static [&'static str] =
        &["name", "job_title", "department", "hire_date", "status", "created_at"];

    /// Inserts an employee with a caller-chosen id so the badge hash can be derived first
    pub async fn create<'e>(
        executor: impl PgExecutor<'e>,
        company_id: Uuid,
        id: Uuid,
        data: CreateEmployee,
        qr_hash: &str,
    ) -> Result<Self, sqlx::Error> {
        let cpf = normalize_cpf(&data.cpf).unwrap_or(data.cpf);

        let employee = sqlx::query_as::<_, Employee>(&format!(
            r#"
            INSERT INTO employees
                (id, company_id, name, cpf, email, phone, job_title, department, hire_date,
                 status, photo_url, qr_hash, badge_version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, 0)
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(id)
        .bind(company_id)
        .bind(data.name.trim().to_string())
        .bind(cpf)
        .bind(data.email)
        .bind(data.phone)
        .bind(data.job_title)
        .bind(data.department)
        .bind(data.hire_date)
        .bind(data.status)
        .bind(data.photo_url)
        .bind(qr_hash.to_string())
        .fetch_one(executor)
        .await?;

        Ok(employee)
    }

    pub async fn find_by_id(pool: &PgPool, company_id: Uuid, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let employee = sqlx::query_as::<_, Employee>(&format!(
            "SELECT {} FROM employees WHERE company_id = $1 AND id = $2",
            COLUMNS
        ))
        .bind(company_id)
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(employee)
    }

    /// Loads an employee and locks the row until the transaction ends
    pub async fn lock<'e>(
        executor: impl PgExecutor<'e>,
        company_id: Uuid,
        id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error> {
        let employee = sqlx::query_as::<_, Employee>(&format!(
            "SELECT {} FROM employees WHERE company_id = $1 AND id = $2 FOR UPDATE",
            COLUMNS
        ))
        .bind(company_id)
        .bind(id)
        .fetch_optional(executor)
        .await?;

        Ok(employee)
    }

    /// Resolves an active employee by badge hash inside a company
    pub async fn find_active_by_qr_hash(
        pool: &PgPool,
        company_id: Uuid,
        qr_hash: &str,
    ) -> Result<Option<EmployeeSummary>, sqlx::Error> {
        let employee = sqlx::query_as::<_, EmployeeSummary>(
            r#"
            SELECT id, name, job_title, department, photo_url, status
            FROM employees
            WHERE company_id = $1 AND qr_hash = $2 AND status = 'active'
            "#,
        )
        .bind(company_id)
        .bind(qr_hash.to_string())
        .fetch_optional(pool)
        .await?;

        Ok(employee)
    }

    /// Resolves an active employee by id, as used for manual identification
    pub async fn find_active_summary(
        pool: &PgPool,
        company_id: Uuid,
        id: Uuid,
    ) -> Result<Option<EmployeeSummary>, sqlx::Error> {
        let employee = sqlx::query_as::<_, EmployeeSummary>(
            r#"
            SELECT id, name, job_title, department, photo_url, status
            FROM employees
            WHERE company_id = $1 AND id = $2 AND status = 'active'
            "#,
        )
        .bind(company_id)
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(employee)
    }

    pub async fn list(
        pool: &PgPool,
        company_id: Uuid,
        filter: &EmployeeFilter,
        page: &PageRequest,
    ) -> Result<Page<Self>, sqlx::Error> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM employees");
        push_filters(&mut count, company_id, filter, page);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(pool).await?;

        let mut query = QueryBuilder::new(format!("SELECT {} FROM employees", COLUMNS));
        push_filters(&mut query, company_id, filter, page);
        page.push_tail(&mut query);
        let items = query.build_query_as::<Employee>().fetch_all(pool).await?;

        Ok(Page::new(items, total, page))
    }

    pub async fn update(
        pool: &PgPool,
        company_id: Uuid,
        id: Uuid,
        data: UpdateEmployee,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut qb = QueryBuilder::new("UPDATE employees SET updated_at = NOW()");
        push_set(&mut qb, "name", data.name.map(|n| n.trim().to_string()));
        push_set(
            &mut qb,
            "cpf",
            data.cpf.map(|c| normalize_cpf(&c).unwrap_or(c)),
        );
        push_set(&mut qb, "email", data.email);
        push_set(&mut qb, "phone", data.phone);
        push_set(&mut qb, "job_title", data.job_title);
        push_set(&mut qb, "department", data.department);
        push_set(&mut qb, "hire_date", data.hire_date);
        push_set(&mut qb, "status", data.status);
        push_set(&mut qb, "photo_url", data.photo_url);
        qb.push(" WHERE company_id = ")
            .push_bind(company_id)
            .push(" AND id = ")
            .push_bind(id)
            .push(" RETURNING ")
            .push(COLUMNS);

        let employee = qb.build_query_as::<Employee>().fetch_optional(pool).await?;

        Ok(employee)
    }

    /// Stores a regenerated badge; the previous hash stops resolving immediately
    pub async fn set_badge<'e>(
        executor: impl PgExecutor<'e>,
        company_id: Uuid,
        id: Uuid,
        version: i32,
        qr_hash: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let employee = sqlx::query_as::<_, Employee>(&format!(
            r#"
            UPDATE employees
            SET badge_version = $3, qr_hash = $4, updated_at = NOW()
            WHERE company_id = $1 AND id = $2
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(company_id)
        .bind(id)
        .bind(version)
        .bind(qr_hash.to_string())
        .fetch_optional(executor)
        .await?;

        Ok(employee)
    }

    pub async fn delete(pool: &PgPool, company_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM employees WHERE company_id = $1 AND id = $2")
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

    fn valid() -> CreateEmployee {
        CreateEmployee {
            name: "João da Silva".to_string(),
            cpf: "529.982.247-25".to_string(),
            email: Some("joao@alfa.com.br".to_string()),
            phone: None,
            job_title: "Pedreiro".to_string(),
            department: Some("Obras".to_string()),
            hire_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            status: EmployeeStatus::Active,
            photo_url: None,
        }
    }

    #[test]
    fn test_create_validation() {
        assert!(valid().validate().is_ok());

        let mut bad = valid();
        bad.cpf = "123.456.789-00".to_string();
        bad.email = Some("not-an-email".to_string());
        bad.name = "   ".to_string();

        let errors = bad.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("cpf"));
        assert!(fields.contains_key("email"));
        assert!(fields.contains_key("name"));
    }

    #[test]
    fn test_update_distinguishes_null_from_absent() {
        let patch: UpdateEmployee =
            serde_json::from_str(r#"{"department": null, "status": "on_leave"}"#).unwrap();

        assert_eq!(patch.department, Some(None));
        assert_eq!(patch.email, None);
        assert_eq!(patch.status, Some(EmployeeStatus::OnLeave));
    }

    #[test]
    fn test_update_sql_only_sets_present_fields() {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE employees SET updated_at = NOW()");
        push_set(&mut qb, "name", Some("Ana".to_string()));
        push_set(&mut qb, "job_title", None::<String>);
        push_set(&mut qb, "department", Some(None::<String>));

        assert_eq!(
            qb.sql(),
            "UPDATE employees SET updated_at = NOW(), name = $1, department = $2"
        );
    }

    #[test]
    fn test_status_serde() {
        assert_eq!(
            serde_json::to_string(&EmployeeStatus::OnLeave).unwrap(),
            "\"on_leave\""
        );
    }
}
