/// Audit log endpoints
///
/// - `GET /v1/audit-logs` - List (filters: `action`, `entity_type`, `entity_id`,
///   `actor_id`), newest first unless `order=asc`
/// - `GET /v1/audit-logs/verify` - Recompute the company's hash chain

use crate::{app::AppState, error::ApiResult};
use axum::{
    extract::{Query, State},
    Json,
};
use canteiro_shared::{
    auth::{
        authorization::{require_permission, ResourcePermission},
        middleware::AuthContext,
    },
    models::{
        audit_log::{AuditEntry, AuditFilter, ChainVerification},
        ListParams, Page, SortOrder,
    },
};

pub async fn list_entries(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(mut params): Query<ListParams>,
    Query(filter): Query<AuditFilter>,
) -> ApiResult<Json<Page<AuditEntry>>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    params.order = params.order.or(Some(SortOrder::Desc));
    let page = params.page(AuditEntry::SORTABLE, "seq")?;
    let entries = AuditEntry::list(&state.db, auth.company_id, &filter, &page).await?;

    Ok(Json(entries))
}

/// Verify the chain
///
/// ```json
/// { "valid": false, "entries": 1204, "first_broken_seq": 877 }
/// ```
pub async fn verify_chain(State(state): State<AppState>, auth: AuthContext) -> ApiResult<Json<ChainVerification>> {
    require_permission(&state.db, &auth, ResourcePermission::Manage).await?;

    let verification = AuditEntry::verify_chain(&state.db, auth.company_id).await?;

    if !verification.valid {
        tracing::error!(
            company_id = %auth.company_id,
            first_broken_seq = ?verification.first_broken_seq,
            "Audit chain verification failed"
        );
    }

    Ok(Json(verification))
}
