/// API route handlers
///
/// This module contains all route handlers organized by resource:
///
/// - `health`: Health check endpoint
/// - `auth`: Operator registration, login and token refresh
/// - `company`: The caller's company profile and settings
/// - `employees`, `contracts`, `trainings`, `vacations`, `timesheets`,
///   `health_certificates`: HR records
/// - `ppe`, `assets`: inventory and deliveries
/// - `notifications`, `audit`, `reports`: alerts, audit trail and dashboard
/// - `functions`: badge and biometric identification
/// - `workflows`: the QR wizard

pub mod assets;
pub mod audit;
pub mod auth;
pub mod company;
pub mod contracts;
pub mod employees;
pub mod functions;
pub mod health;
pub mod health_certificates;
pub mod notifications;
pub mod ppe;
pub mod reports;
pub mod timesheets;
pub mod trainings;
pub mod vacations;
pub mod workflows;

use crate::app::AppState;
use canteiro_shared::{
    auth::middleware::AuthContext,
    models::audit_log::{AuditEntry, NewAuditEntry},
};
use uuid::Uuid;

/// Appends an audit entry for a committed mutation
///
/// The mutation has already been committed, so a failed append is logged instead of
/// turning a successful request into an error.
pub(crate) async fn record_audit(
    state: &AppState,
    auth: &AuthContext,
    action: &'static str,
    entity_type: &'static str,
    entity_id: Option<Uuid>,
    payload: serde_json::Value,
) {
    let entry = NewAuditEntry {
        actor_id: Some(auth.user_id),
        action,
        entity_type,
        entity_id,
        payload,
    };

    if let Err(e) = AuditEntry::record(&state.db, auth.company_id, entry).await {
        tracing::error!(
            company_id = %auth.company_id,
            action,
            entity_type,
            error = %e,
            "Failed to append audit entry"
        );
    }
}
