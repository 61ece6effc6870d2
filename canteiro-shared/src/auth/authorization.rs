//! Role checks against company memberships
//!
//! Hierarchy: owner > admin > member > viewer.
//!
//! | Permission | Minimum role | Used for |
//! |------------|--------------|----------|
//! | Read       | viewer       | lists, reports, lookups |
//! | Write      | member       | records, workflows, clock-in |
//! | Manage     | admin        | vacation decisions, badges, biometric enrolment, deletes |
//! | Own        | owner        | company settings |

use sqlx::PgPool;
use uuid::Uuid;

use super::middleware::AuthContext;
use crate::models::membership::{Membership, MembershipRole};

/// Error type for authorization checks
#[derive(Debug, thiserror::Error)]
pub enum AuthzError {
    /// Operator is not a member of the company
    #[error("Not a member of company {0}")]
    NotMember(Uuid),

    /// Operator role is below the required one
    #[error("Insufficient permissions: requires {required:?}, has {actual:?}")]
    InsufficientRole {
        required: MembershipRole,
        actual: MembershipRole,
    },

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

/// Permission levels for authorization checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourcePermission {
    Read,
    Write,
    Manage,
    Own,
}

impl ResourcePermission {
    /// Minimum role that grants this permission
    pub fn min_role(&self) -> MembershipRole {
        match self {
            ResourcePermission::Read => MembershipRole::Viewer,
            ResourcePermission::Write => MembershipRole::Member,
            ResourcePermission::Manage => MembershipRole::Admin,
            ResourcePermission::Own => MembershipRole::Owner,
        }
    }
}

/// Checks a role against a required one without touching the database
pub fn check_role(
    company_id: Uuid,
    role: Option<MembershipRole>,
    required: MembershipRole,
) -> Result<MembershipRole, AuthzError> {
    let actual = role.ok_or(AuthzError::NotMember(company_id))?;

    if !actual.has_permission(&required) {
        return Err(AuthzError::InsufficientRole { required, actual });
    }

    Ok(actual)
}

/// Requires the operator to hold `required` (or higher) in the company
pub async fn require_role(
    pool: &PgPool,
    company_id: Uuid,
    user_id: Uuid,
    required: MembershipRole,
) -> Result<MembershipRole, AuthzError> {
    let role = Membership::get_role(pool, company_id, user_id).await?;
    check_role(company_id, role, required)
}

/// Requires the authenticated operator to hold a permission in their company
///
/// ```no_run
/// # use canteiro_shared::auth::authorization::{require_permission, ResourcePermission};
/// # use canteiro_shared::auth::middleware::AuthContext;
/// # use sqlx::PgPool;
/// # async fn example(pool: PgPool, auth: AuthContext) -> Result<(), Box<dyn std::error::Error>> {
/// require_permission(&pool, &auth, ResourcePermission::Write).await?;
/// # Ok(())
/// # }
/// ```
pub async fn require_permission(
    pool: &PgPool,
    auth: &AuthContext,
    permission: ResourcePermission,
) -> Result<MembershipRole, AuthzError> {
    require_role(pool, auth.company_id, auth.user_id, permission.min_role()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_permission_min_role() {
        assert_eq!(ResourcePermission::Read.min_role(), MembershipRole::Viewer);
        assert_eq!(ResourcePermission::Write.min_role(), MembershipRole::Member);
        assert_eq!(ResourcePermission::Manage.min_role(), MembershipRole::Admin);
        assert_eq!(ResourcePermission::Own.min_role(), MembershipRole::Owner);
    }

    #[test]
    fn test_check_role() {
        let company = Uuid::new_v4();

        assert!(check_role(company, Some(MembershipRole::Admin), MembershipRole::Member).is_ok());
        assert!(check_role(company, Some(MembershipRole::Owner), MembershipRole::Owner).is_ok());

        assert!(matches!(
            check_role(company, Some(MembershipRole::Viewer), MembershipRole::Member),
            Err(AuthzError::InsufficientRole { .. })
        ));
        assert!(matches!(
            check_role(company, None, MembershipRole::Viewer),
            Err(AuthzError::NotMember(id)) if id == company
        ));
    }

    #[test]
    fn test_authz_error_display() {
        let err = AuthzError::NotMember(Uuid::nil());
        assert!(err.to_string().contains("Not a member"));

        let err = AuthzError::InsufficientRole {
            required: MembershipRole::Admin,
            actual: MembershipRole::Member,
        };
        assert!(err.to_string().contains("Admin"));
    }
}
