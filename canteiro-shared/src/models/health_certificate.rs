//! Occupational health certificates (ASO)

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::borrow::Cow;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::{double_option, push_set, Page, PageRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "aso_exam_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExamType {
    Admission,
    Periodic,
    ReturnToWork,
    RoleChange,
    Dismissal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "aso_result", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExamResult {
    Fit,
    Unfit,
    FitWithRestrictions,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct HealthCertificate {
    pub id: Uuid,
    pub company_id: Uuid,
    pub employee_id: Uuid,
    pub exam_type: ExamType,
    pub exam_date: NaiveDate,
    pub expires_on: Option<NaiveDate>,
    pub result: ExamResult,
    pub physician_name: String,
    pub physician_crm: String,
    pub restrictions: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "check_certificate"))]
pub struct CreateHealthCertificate {
    pub employee_id: Uuid,
    pub exam_type: ExamType,
    pub exam_date: NaiveDate,
    pub expires_on: Option<NaiveDate>,
    pub result: ExamResult,

    #[validate(length(min = 1, max = 255, message = "Physician name is required"))]
    pub physician_name: String,

    #[validate(length(min = 1, max = 32, message = "Physician CRM is required"))]
    pub physician_crm: String,

    pub restrictions: Option<String>,
}

fn check_certificate(data: &CreateHealthCertificate) -> Result<(), ValidationError> {
    if matches!(data.expires_on, Some(expires) if expires <= data.exam_date) {
        let mut err = ValidationError::new("expires_on");
        err.message = Some(Cow::Borrowed("Expiry must be after the exam date"));
        return Err(err);
    }

    let has_restrictions = data
        .restrictions
        .as_deref()
        .is_some_and(|r| !r.trim().is_empty());
    if data.result == ExamResult::FitWithRestrictions && !has_restrictions {
        let mut err = ValidationError::new("restrictions");
        err.message = Some(Cow::Borrowed("Restrictions must be described"));
        return Err(err);
    }

    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateHealthCertificate {
    pub exam_type: Option<ExamType>,
    pub exam_date: Option<NaiveDate>,

    #[serde(default, deserialize_with = "double_option")]
    pub expires_on: Option<Option<NaiveDate>>,

    pub result: Option<ExamResult>,

    #[validate(length(min = 1, max = 255, message = "Physician name is required"))]
    pub physician_name: Option<String>,

    #[validate(length(min = 1, max = 32, message = "Physician CRM is required"))]
    pub physician_crm: Option<String>,

    #[serde(default, deserialize_with = "double_option")]
    pub restrictions: Option<Option<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HealthCertificateFilter {
    pub employee_id: Option<Uuid>,
    pub exam_type: Option<ExamType>,
    pub result: Option<ExamResult>,
    /// Only certificates expired or expiring on or before this date
    pub expires_before: Option<NaiveDate>,
}

const COLUMNS: &str = "id, company_id, employee_id, exam_type, exam_date, expires_on, result, \
                       physician_name, physician_crm, restrictions, created_at, updated_at";

fn push_filters(
    qb: &mut QueryBuilder<'_, Postgres>,
    company_id: Uuid,
    filter: &HealthCertificateFilter,
    page: &PageRequest,
) {
    qb.push(" WHERE company_id = ").push_bind(company_id);

    if let Some(employee_id) = filter.employee_id {
        qb.push(" AND employee_id = ").push_bind(employee_id);
    }
    if let Some(exam_type) = filter.exam_type {
        qb.push(" AND exam_type = ").push_bind(exam_type);
    }
    if let Some(result) = filter.result {
        qb.push(" AND result = ").push_bind(result);
    }
    if let Some(date) = filter.expires_before {
        qb.push(" AND expires_on <= ").push_bind(date);
    }
    if let Some(pattern) = &page.search {
        qb.push(" AND physician_name ILIKE ").push_bind(pattern.clone());
    }
}

impl HealthCertificate {
    pub const SORTABLE: &'static [&'static str] =
        &["exam_date", "expires_on", "exam_type", "result", "created_at"];

    /// Creates a certificate; `None` when the employee is not in the company
    pub async fn create(
        pool: &PgPool,
        company_id: Uuid,
        data: CreateHealthCertificate,
    ) -> Result<Option<Self>, sqlx::Error> {
        let certificate = sqlx::query_as::<_, HealthCertificate>(&format!(
            r#"
            INSERT INTO health_certificates
                (company_id, employee_id, exam_type, exam_date, expires_on, result,
                 physician_name, physician_crm, restrictions)
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, $9
            WHERE EXISTS (SELECT 1 FROM employees WHERE id = $2 AND company_id = $1)
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(company_id)
        .bind(data.employee_id)
        .bind(data.exam_type)
        .bind(data.exam_date)
        .bind(data.expires_on)
        .bind(data.result)
        .bind(data.physician_name)
        .bind(data.physician_crm)
        .bind(data.restrictions)
        .fetch_optional(pool)
        .await?;

        Ok(certificate)
    }

    pub async fn find_by_id(pool: &PgPool, company_id: Uuid, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let certificate = sqlx::query_as::<_, HealthCertificate>(&format!(
            "SELECT {} FROM health_certificates WHERE company_id = $1 AND id = $2",
            COLUMNS
        ))
        .bind(company_id)
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(certificate)
    }

    pub async fn list(
        pool: &PgPool,
        company_id: Uuid,
        filter: &HealthCertificateFilter,
        page: &PageRequest,
    ) -> Result<Page<Self>, sqlx::Error> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM health_certificates");
        push_filters(&mut count, company_id, filter, page);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(pool).await?;

        let mut query = QueryBuilder::new(format!("SELECT {} FROM health_certificates", COLUMNS));
        push_filters(&mut query, company_id, filter, page);
        page.push_tail(&mut query);
        let items = query.build_query_as::<HealthCertificate>().fetch_all(pool).await?;

        Ok(Page::new(items, total, page))
    }

    pub async fn update(
        pool: &PgPool,
        company_id: Uuid,
        id: Uuid,
        data: UpdateHealthCertificate,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut qb = QueryBuilder::new("UPDATE health_certificates SET updated_at = NOW()");
        push_set(&mut qb, "exam_type", data.exam_type);
        push_set(&mut qb, "exam_date", data.exam_date);
        push_set(&mut qb, "expires_on", data.expires_on);
        push_set(&mut qb, "result", data.result);
        push_set(&mut qb, "physician_name", data.physician_name);
        push_set(&mut qb, "physician_crm", data.physician_crm);
        push_set(&mut qb, "restrictions", data.restrictions);
        qb.push(" WHERE company_id = ")
            .push_bind(company_id)
            .push(" AND id = ")
            .push_bind(id)
            .push(" RETURNING ")
            .push(COLUMNS);

        let certificate = qb
            .build_query_as::<HealthCertificate>()
            .fetch_optional(pool)
            .await?;

        Ok(certificate)
    }

    pub async fn delete(pool: &PgPool, company_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM health_certificates WHERE company_id = $1 AND id = $2")
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

    fn aso(result: ExamResult, restrictions: Option<&str>) -> CreateHealthCertificate {
        CreateHealthCertificate {
            employee_id: Uuid::new_v4(),
            exam_type: ExamType::Periodic,
            exam_date: NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(),
            expires_on: NaiveDate::from_ymd_opt(2026, 4, 1),
            result,
            physician_name: "Dra. Ana Lima".to_string(),
            physician_crm: "CRM-SP 123456".to_string(),
            restrictions: restrictions.map(str::to_string),
        }
    }

    #[test]
    fn test_restrictions_required_when_restricted() {
        assert!(aso(ExamResult::Fit, None).validate().is_ok());
        assert!(aso(ExamResult::FitWithRestrictions, None).validate().is_err());
        assert!(aso(ExamResult::FitWithRestrictions, Some("   ")).validate().is_err());
        assert!(aso(ExamResult::FitWithRestrictions, Some("Sem trabalho em altura"))
            .validate()
            .is_ok());
    }

    #[test]
    fn test_expiry_after_exam() {
        let mut data = aso(ExamResult::Fit, None);
        data.expires_on = Some(data.exam_date);
        assert!(data.validate().is_err());
    }

    #[test]
    fn test_enum_serde() {
        assert_eq!(
            serde_json::to_string(&ExamType::ReturnToWork).unwrap(),
            "\"return_to_work\""
        );
        assert_eq!(
            serde_json::to_string(&ExamResult::FitWithRestrictions).unwrap(),
            "\"fit_with_restrictions\""
        );
    }
}
