/// Timesheet endpoints
///
/// - `GET|POST /v1/timesheets` - List (filters: `employee_id`, `from`, `to`, `open`) /
///   manual entry
/// - `POST /v1/timesheets/clock` - Toggle an employee's open entry
/// - `GET /v1/timesheets/summary?employee_id=..&month=YYYY-MM` - Monthly totals
/// - `GET|PATCH|DELETE /v1/timesheets/:id`

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
    badge::extract_badge_hash,
    models::{
        employee::Employee,
        timesheet::{
            summarize, ClockEvent, ClockMethod, CreateTimesheetEntry, Month, TimesheetEntry, TimesheetFilter,
            TimesheetSummary, UpdateTimesheetEntry,
        },
        ListParams, Page,
    },
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

/// Clock request: the employee is given either by id or by a scanned badge
#[derive(Debug, Deserialize)]
pub struct ClockRequest {
    pub employee_id: Option<Uuid>,
    /// Bare badge hash or full badge payload; implies `qr_code`
    pub qr_hash: Option<String>,
    pub method: Option<ClockMethod>,
}

#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    pub employee_id: Uuid,
    /// `YYYY-MM`, defaults to the current month
    pub month: Option<String>,
}

/// Resolves the clock target and method
async fn clock_target(state: &AppState, auth: &AuthContext, req: &ClockRequest) -> ApiResult<(Uuid, ClockMethod)> {
    match (req.employee_id, req.qr_hash.as_deref()) {
        (Some(employee_id), None) => Ok((employee_id, req.method.unwrap_or_default())),
        (None, Some(raw)) => {
            let hash = extract_badge_hash(raw)?;
            let employee = Employee::find_active_by_qr_hash(&state.db, auth.company_id, &hash)
                .await?
                .ok_or_else(|| ApiError::not_found("Employee"))?;
            Ok((employee.id, ClockMethod::QrCode))
        }
        _ => Err(ApiError::field(
            "employee_id",
            "Provide exactly one of employee_id or qr_hash",
        )),
    }
}

pub async fn list_entries(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<ListParams>,
    Query(filter): Query<TimesheetFilter>,
) -> ApiResult<Json<Page<TimesheetEntry>>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let page = params.page(TimesheetEntry::SORTABLE, "clock_in")?;
    let entries = TimesheetEntry::list(&state.db, auth.company_id, &filter, &page).await?;

    Ok(Json(entries))
}

/// Record a manual entry
///
/// # Errors
///
/// - `404 Not Found`: unknown employee
/// - `409 Conflict`: an open entry already exists and this one has no clock-out
/// - `422 Unprocessable Entity`: clock-out not after clock-in
pub async fn create_entry(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateTimesheetEntry>,
) -> ApiResult<(StatusCode, Json<TimesheetEntry>)> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;
    req.validate()?;

    let entry = TimesheetEntry::create(&state.db, auth.company_id, req)
        .await?
        .ok_or_else(|| ApiError::not_found("Employee"))?;

    record_audit(
        &state,
        &auth,
        "timesheet.created",
        "timesheet_entry",
        Some(entry.id),
        json!({
            "employee_id": entry.employee_id,
            "clock_in": entry.clock_in,
            "clock_out": entry.clock_out,
        }),
    )
    .await;

    Ok((StatusCode::CREATED, Json(entry)))
}

/// Clock in, or out when the employee has an open entry
///
/// ```text
/// POST /v1/timesheets/clock
///
/// { "qr_hash": "CANTEIRO:EMP:9f2c..." }
/// ```
///
/// ```json
/// { "event": "clock_in", "entry": { "id": "...", "clock_in": "...", "clock_out": null } }
/// ```
pub async fn clock(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<ClockRequest>,
) -> ApiResult<Json<ClockEvent>> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;

    let (employee_id, method) = clock_target(&state, &auth, &req).await?;

    let event = TimesheetEntry::clock(&state.db, auth.company_id, employee_id, method, Utc::now())
        .await?
        .ok_or_else(|| ApiError::not_found("Employee"))?;

    let (action, entry) = match &event {
        ClockEvent::ClockIn(entry) => ("timesheet.clock_in", entry),
        ClockEvent::ClockOut(entry) => ("timesheet.clock_out", entry),
    };
    tracing::info!(company_id = %auth.company_id, employee_id = %employee_id, action, "Clock event");
    record_audit(
        &state,
        &auth,
        action,
        "timesheet_entry",
        Some(entry.id),
        json!({ "employee_id": employee_id, "method": method }),
    )
    .await;

    Ok(Json(event))
}

pub async fn summary(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(query): Query<SummaryQuery>,
) -> ApiResult<Json<TimesheetSummary>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let month = match query.month.as_deref() {
        Some(raw) => Month::parse(raw).ok_or_else(|| ApiError::field("month", "Month must be YYYY-MM"))?,
        None => Month::of(Utc::now().date_naive()),
    };

    if Employee::find_by_id(&state.db, auth.company_id, query.employee_id)
        .await?
        .is_none()
    {
        return Err(ApiError::not_found("Employee"));
    }

    let entries = TimesheetEntry::for_month(&state.db, auth.company_id, query.employee_id, month).await?;

    Ok(Json(summarize(query.employee_id, month, &entries)))
}

pub async fn get_entry(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TimesheetEntry>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let entry = TimesheetEntry::find_by_id(&state.db, auth.company_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Timesheet entry"))?;

    Ok(Json(entry))
}

/// Ordering of clock-in and clock-out is enforced by the database
pub async fn update_entry(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateTimesheetEntry>,
) -> ApiResult<Json<TimesheetEntry>> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;
    req.validate()?;

    let entry = TimesheetEntry::update(&state.db, auth.company_id, id, req)
        .await?
        .ok_or_else(|| ApiError::not_found("Timesheet entry"))?;

    record_audit(
        &state,
        &auth,
        "timesheet.updated",
        "timesheet_entry",
        Some(id),
        json!({ "clock_in": entry.clock_in, "clock_out": entry.clock_out }),
    )
    .await;

    Ok(Json(entry))
}

pub async fn delete_entry(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    require_permission(&state.db, &auth, ResourcePermission::Manage).await?;

    if !TimesheetEntry::delete(&state.db, auth.company_id, id).await? {
        return Err(ApiError::not_found("Timesheet entry"));
    }

    record_audit(&state, &auth, "timesheet.deleted", "timesheet_entry", Some(id), json!({})).await;

    Ok(StatusCode::NO_CONTENT)
}
