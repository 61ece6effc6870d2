//! Enrolled biometric templates
//!
//! Only the digest from `crate::biometric::template_digest` is stored. A digest is
//! unique per company and kind, so one sample cannot identify two employees.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::biometric::{template_digest, BiometricKind};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct BiometricTemplate {
    pub id: Uuid,
    pub company_id: Uuid,
    pub employee_id: Uuid,
    pub kind: BiometricKind,
    #[serde(skip_serializing)]
    pub digest: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl BiometricTemplate {
    /// Enrols a sample for an employee
    ///
    /// Fails with a `biometric_templates_digest_key` unique violation when the same
    /// sample is already enrolled in the company.
    pub async fn enroll(
        pool: &PgPool,
        company_id: Uuid,
        employee_id: Uuid,
        kind: BiometricKind,
        sample: &[u8],
    ) -> Result<Self, sqlx::Error> {
        let template = sqlx::query_as::<_, BiometricTemplate>(
            r#"
            INSERT INTO biometric_templates (company_id, employee_id, kind, digest)
            VALUES ($1, $2, $3, $4)
            RETURNING id, company_id, employee_id, kind, digest, created_at
            "#,
        )
        .bind(company_id)
        .bind(employee_id)
        .bind(kind)
        .bind(template_digest(kind, sample))
        .fetch_one(pool)
        .await?;

        Ok(template)
    }

    pub async fn list_for_employee(
        pool: &PgPool,
        company_id: Uuid,
        employee_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error> {
        let templates = sqlx::query_as::<_, BiometricTemplate>(
            r#"
            SELECT id, company_id, employee_id, kind, digest, created_at
            FROM biometric_templates
            WHERE company_id = $1 AND employee_id = $2
            ORDER BY created_at
            "#,
        )
        .bind(company_id)
        .bind(employee_id)
        .fetch_all(pool)
        .await?;

        Ok(templates)
    }

    /// Removes every template of one kind for an employee
    pub async fn delete_for_employee(
        pool: &PgPool,
        company_id: Uuid,
        employee_id: Uuid,
        kind: BiometricKind,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM biometric_templates WHERE company_id = $1 AND employee_id = $2 AND kind = $3",
        )
        .bind(company_id)
        .bind(employee_id)
        .bind(kind)
        .execute(pool)
        .await?;

        Ok(result.rows_affected())
    }
}
