//! Persisted workflow sessions
//!
//! The wizard state lives in `state` (JSONB); `kind` and `step` are mirrored in columns
//! for filtering and for the expiry sweep. Every save pushes `expires_at` forward, so a
//! session only expires after a full TTL without activity.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::workflow::{WorkflowKind, WorkflowState, WorkflowStep};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WorkflowSession {
    pub id: Uuid,
    pub company_id: Uuid,
    pub created_by: Option<Uuid>,
    pub kind: WorkflowKind,
    pub step: WorkflowStep,
    pub state: Json<WorkflowState>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowSession {
    /// Completed sessions never expire
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.step != WorkflowStep::Complete && self.expires_at <= now
    }
}

const COLUMNS: &str = "id, company_id, created_by, kind, step, state, expires_at, created_at, updated_at";

impl WorkflowSession {
    pub async fn create(
        pool: &PgPool,
        company_id: Uuid,
        created_by: Uuid,
        state: WorkflowState,
        ttl: Duration,
    ) -> Result<Self, sqlx::Error> {
        let expires_at = state.updated_at + ttl;

        let session = sqlx::query_as::<_, WorkflowSession>(&format!(
            r#"
            INSERT INTO workflow_sessions (company_id, created_by, kind, step, state, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(company_id)
        .bind(created_by)
        .bind(state.kind)
        .bind(state.step)
        .bind(Json(&state))
        .bind(expires_at)
        .fetch_one(pool)
        .await?;

        Ok(session)
    }

    pub async fn find_by_id(pool: &PgPool, company_id: Uuid, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let session = sqlx::query_as::<_, WorkflowSession>(&format!(
            "SELECT {} FROM workflow_sessions WHERE company_id = $1 AND id = $2",
            COLUMNS
        ))
        .bind(company_id)
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(session)
    }

    /// Loads a session and locks it until the transaction ends
    pub async fn lock(conn: &mut PgConnection, company_id: Uuid, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let session = sqlx::query_as::<_, WorkflowSession>(&format!(
            "SELECT {} FROM workflow_sessions WHERE company_id = $1 AND id = $2 FOR UPDATE",
            COLUMNS
        ))
        .bind(company_id)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(session)
    }

    /// Writes the state back and extends the expiry
    pub async fn save(
        conn: &mut PgConnection,
        company_id: Uuid,
        id: Uuid,
        state: &WorkflowState,
        ttl: Duration,
    ) -> Result<Self, sqlx::Error> {
        let session = sqlx::query_as::<_, WorkflowSession>(&format!(
            r#"
            UPDATE workflow_sessions
            SET step = $3, state = $4, expires_at = $5, updated_at = NOW()
            WHERE company_id = $1 AND id = $2
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(company_id)
        .bind(id)
        .bind(state.step)
        .bind(Json(state))
        .bind(state.updated_at + ttl)
        .fetch_one(&mut *conn)
        .await?;

        Ok(session)
    }

    /// Sessions of a company that are still in progress
    pub async fn list_open(pool: &PgPool, company_id: Uuid, now: DateTime<Utc>) -> Result<Vec<Self>, sqlx::Error> {
        let sessions = sqlx::query_as::<_, WorkflowSession>(&format!(
            r#"
            SELECT {}
            FROM workflow_sessions
            WHERE company_id = $1 AND step <> 'complete' AND expires_at > $2
            ORDER BY updated_at DESC
            "#,
            COLUMNS
        ))
        .bind(company_id)
        .bind(now)
        .fetch_all(pool)
        .await?;

        Ok(sessions)
    }

    pub async fn delete(conn: &mut PgConnection, company_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM workflow_sessions WHERE company_id = $1 AND id = $2")
            .bind(company_id)
            .bind(id)
            .execute(&mut *conn)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Removes unfinished sessions past their expiry, across all companies
    pub async fn delete_expired(pool: &PgPool, now: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM workflow_sessions WHERE step <> 'complete' AND expires_at <= $1")
            .bind(now)
            .execute(pool)
            .await?;

        Ok(result.rows_affected())
    }

    /// Removes completed sessions last touched before `cutoff`
    ///
    /// Deliveries and movements keep the session id as a plain reference.
    pub async fn delete_completed_before(pool: &PgPool, cutoff: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM workflow_sessions WHERE step = 'complete' AND updated_at < $1")
            .bind(cutoff)
            .execute(pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(step: WorkflowStep, expires_at: DateTime<Utc>) -> WorkflowSession {
        let now = Utc::now();
        let mut state = WorkflowState::new(WorkflowKind::Delivery, now);
        state.step = step;
        WorkflowSession {
            id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            created_by: None,
            kind: WorkflowKind::Delivery,
            step,
            state: Json(state),
            expires_at,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        assert!(session(WorkflowStep::ScanItems, now - Duration::minutes(1)).is_expired(now));
        assert!(!session(WorkflowStep::ScanItems, now + Duration::minutes(1)).is_expired(now));
        assert!(!session(WorkflowStep::Complete, now - Duration::days(1)).is_expired(now));
    }

    #[test]
    fn test_serializes_state_inline() {
        let now = Utc::now();
        let value = serde_json::to_value(session(WorkflowStep::Authenticate, now)).unwrap();
        assert_eq!(value["state"]["kind"], "delivery");
        assert_eq!(value["step"], "authenticate");
    }
}
