//! Companies (tenants)
//!
//! A company owns every employee, inventory and HR row. Operators reach a company
//! through a membership.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::validation::validate_cnpj;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    /// 14 digits, no punctuation
    pub cnpj: Option<String>,
    pub settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateCompany {
    #[validate(length(min = 1, max = 255, message = "Company name must be 1 to 255 characters"))]
    pub name: String,

    #[validate(custom(function = "validate_cnpj"))]
    pub cnpj: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateCompany {
    #[validate(length(min = 1, max = 255, message = "Company name must be 1 to 255 characters"))]
    pub name: Option<String>,

    pub settings: Option<serde_json::Value>,
}

const COLUMNS: &str = "id, name, cnpj, settings, created_at, updated_at";

impl Company {
    /// Creates a company; the CNPJ is stored as bare digits
    pub async fn create<'e>(executor: impl PgExecutor<'e>, data: CreateCompany) -> Result<Self, sqlx::Error> {
        let cnpj = data
            .cnpj
            .as_deref()
            .and_then(crate::validation::normalize_cnpj);

        sqlx::query_as::<_, Company>(&format!(
            "INSERT INTO companies (name, cnpj) VALUES ($1, $2) RETURNING {}",
            COLUMNS
        ))
        .bind(data.name.trim())
        .bind(cnpj)
        .fetch_one(executor)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Company>(&format!("SELECT {} FROM companies WHERE id = $1", COLUMNS))
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn update(pool: &PgPool, id: Uuid, data: UpdateCompany) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Company>(&format!(
            r#"
            UPDATE companies
            SET name = COALESCE($2, name),
                settings = COALESCE($3, settings),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(id)
        .bind(data.name)
        .bind(data.settings)
        .fetch_optional(pool)
        .await
    }

    /// Every company id, used by the worker to fan out per-tenant jobs
    pub async fn list_ids(pool: &PgPool) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar("SELECT id FROM companies ORDER BY created_at")
            .fetch_all(pool)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_company_validation() {
        let ok = CreateCompany {
            name: "Construtora Alfa".to_string(),
            cnpj: Some("11.222.333/0001-81".to_string()),
        };
        assert!(ok.validate().is_ok());

        let bad = CreateCompany {
            name: String::new(),
            cnpj: Some("11.222.333/0001-00".to_string()),
        };
        let errors = bad.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("name"));
        assert!(fields.contains_key("cnpj"));
    }
}
