/// Vacation request endpoints
///
/// - `GET|POST /v1/vacations` - List (filters: `employee_id`, `status`, `from`) / request
/// - `GET|PATCH|DELETE /v1/vacations/:id` - PATCH edits notes while still requested
/// - `POST /v1/vacations/:id/approve|reject|cancel`
///
/// Status rules: requested → approved | rejected | cancelled, approved → cancelled.
/// Overlap with another approved vacation is checked on request and again on approval.

use super::record_audit;
use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use canteiro_shared::{
    auth::{
        authorization::{require_permission, ResourcePermission},
        middleware::AuthContext,
    },
    models::{
        vacation::{CreateVacation, UpdateVacation, Vacation, VacationFilter, VacationOutcome, VacationStatus},
        ListParams, Page,
    },
};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

fn saved(outcome: VacationOutcome) -> ApiResult<Vacation> {
    match outcome {
        VacationOutcome::Saved(vacation) => Ok(vacation),
        VacationOutcome::NotFound => Err(ApiError::not_found("Vacation")),
        VacationOutcome::UnknownEmployee => Err(ApiError::not_found("Employee")),
        VacationOutcome::InvalidTransition { from, to } => Err(ApiError::Conflict(format!(
            "Cannot move a vacation from {} to {}",
            from.as_str(),
            to.as_str()
        ))),
        VacationOutcome::Overlap => Err(ApiError::Conflict(
            "Period overlaps an approved vacation of this employee".to_string(),
        )),
    }
}

pub async fn list_vacations(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<ListParams>,
    Query(filter): Query<VacationFilter>,
) -> ApiResult<Json<Page<Vacation>>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let page = params.page(Vacation::SORTABLE, "start_date")?;
    let vacations = Vacation::list(&state.db, auth.company_id, &filter, &page).await?;

    Ok(Json(vacations))
}

/// Request a vacation
///
/// # Errors
///
/// - `404 Not Found`: unknown employee
/// - `409 Conflict`: overlaps an approved vacation
/// - `422 Unprocessable Entity`: end before start, or longer than 30 days
pub async fn create_vacation(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateVacation>,
) -> ApiResult<(StatusCode, Json<Vacation>)> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;
    req.validate()?;

    let vacation = saved(Vacation::create(&state.db, auth.company_id, req).await?)?;

    record_audit(
        &state,
        &auth,
        "vacation.requested",
        "vacation",
        Some(vacation.id),
        json!({
            "employee_id": vacation.employee_id,
            "start_date": vacation.start_date,
            "end_date": vacation.end_date,
        }),
    )
    .await;

    Ok((StatusCode::CREATED, Json(vacation)))
}

pub async fn get_vacation(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vacation>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let vacation = Vacation::find_by_id(&state.db, auth.company_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Vacation"))?;

    Ok(Json(vacation))
}

pub async fn update_vacation(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateVacation>,
) -> ApiResult<Json<Vacation>> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;
    req.validate()?;

    if let Some(vacation) = Vacation::update_notes(&state.db, auth.company_id, id, req).await? {
        return Ok(Json(vacation));
    }

    // Nothing updated: tell a missing row apart from a decided one
    match Vacation::find_by_id(&state.db, auth.company_id, id).await? {
        None => Err(ApiError::not_found("Vacation")),
        Some(vacation) => Err(ApiError::Conflict(format!(
            "Vacation is already {}",
            vacation.status.as_str()
        ))),
    }
}

pub async fn delete_vacation(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    require_permission(&state.db, &auth, ResourcePermission::Manage).await?;

    if !Vacation::delete(&state.db, auth.company_id, id).await? {
        return Err(ApiError::not_found("Vacation"));
    }

    record_audit(&state, &auth, "vacation.deleted", "vacation", Some(id), json!({})).await;

    Ok(StatusCode::NO_CONTENT)
}

async fn decide(
    state: &AppState,
    auth: &AuthContext,
    id: Uuid,
    to: VacationStatus,
    permission: ResourcePermission,
    action: &'static str,
) -> ApiResult<Json<Vacation>> {
    require_permission(&state.db, auth, permission).await?;

    let vacation = saved(Vacation::transition(&state.db, auth.company_id, id, to, auth.user_id).await?)?;

    tracing::info!(
        company_id = %auth.company_id,
        vacation_id = %id,
        status = to.as_str(),
        "Vacation status changed"
    );
    record_audit(
        state,
        auth,
        action,
        "vacation",
        Some(id),
        json!({ "employee_id": vacation.employee_id, "status": to.as_str() }),
    )
    .await;

    Ok(Json(vacation))
}

pub async fn approve_vacation(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vacation>> {
    decide(&state, &auth, id, VacationStatus::Approved, ResourcePermission::Manage, "vacation.approved").await
}

pub async fn reject_vacation(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vacation>> {
    decide(&state, &auth, id, VacationStatus::Rejected, ResourcePermission::Manage, "vacation.rejected").await
}

/// Members may withdraw a request; cancelling an approved vacation is the same call
pub async fn cancel_vacation(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vacation>> {
    decide(&state, &auth, id, VacationStatus::Cancelled, ResourcePermission::Write, "vacation.cancelled").await
}
