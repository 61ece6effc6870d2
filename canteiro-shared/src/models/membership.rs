//! Operator roles inside a company
//!
//! - **owner**: everything, including company settings
//! - **admin**: approvals, badges, biometric enrolment, deletions
//! - **member**: day-to-day records and QR workflows
//! - **viewer**: read-only dashboards

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "membership_role", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MembershipRole {
    Owner,
    Admin,
    Member,
    Viewer,
}

impl MembershipRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MembershipRole::Owner => "owner",
            MembershipRole::Admin => "admin",
            MembershipRole::Member => "member",
            MembershipRole::Viewer => "viewer",
        }
    }

    /// True when this role is at least `required`
    pub fn has_permission(&self, required: &MembershipRole) -> bool {
        self.level() >= required.level()
    }

    fn level(&self) -> u8 {
        match self {
            MembershipRole::Owner => 4,
            MembershipRole::Admin => 3,
            MembershipRole::Member => 2,
            MembershipRole::Viewer => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Membership {
    pub company_id: Uuid,
    pub user_id: Uuid,
    pub role: MembershipRole,
    pub created_at: DateTime<Utc>,
}

impl Membership {
    pub async fn create<'e>(
        executor: impl PgExecutor<'e>,
        company_id: Uuid,
        user_id: Uuid,
        role: MembershipRole,
    ) -> Result<Self, sqlx::Error> {
        sqlx::query_as::<_, Membership>(
            r#"
            INSERT INTO memberships (company_id, user_id, role)
            VALUES ($1, $2, $3)
            RETURNING company_id, user_id, role, created_at
            "#,
        )
        .bind(company_id)
        .bind(user_id)
        .bind(role)
        .fetch_one(executor)
        .await
    }

    pub async fn get_role(
        pool: &PgPool,
        company_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<MembershipRole>, sqlx::Error> {
        sqlx::query_scalar("SELECT role FROM memberships WHERE company_id = $1 AND user_id = $2")
            .bind(company_id)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }

    /// The company an operator logs into by default (oldest membership)
    pub async fn default_for_user(pool: &PgPool, user_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Membership>(
            r#"
            SELECT company_id, user_id, role, created_at
            FROM memberships
            WHERE user_id = $1
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_hierarchy() {
        assert!(MembershipRole::Owner.has_permission(&MembershipRole::Admin));
        assert!(MembershipRole::Admin.has_permission(&MembershipRole::Admin));
        assert!(MembershipRole::Member.has_permission(&MembershipRole::Viewer));
        assert!(!MembershipRole::Member.has_permission(&MembershipRole::Admin));
        assert!(!MembershipRole::Viewer.has_permission(&MembershipRole::Member));
    }

    #[test]
    fn test_role_serde() {
        assert_eq!(serde_json::to_string(&MembershipRole::Admin).unwrap(), "\"admin\"");
        let role: MembershipRole = serde_json::from_str("\"viewer\"").unwrap();
        assert_eq!(role, MembershipRole::Viewer);
    }
}
