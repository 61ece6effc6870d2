/// Employee endpoints
///
/// - `GET /v1/employees` - List (filters: `status`, `department`)
/// - `POST /v1/employees` - Create; the badge hash is issued at version 0
/// - `GET|PATCH|DELETE /v1/employees/:id`
/// - `GET /v1/employees/:id/ppe` - PPE currently held
/// - `POST /v1/employees/:id/ppe` - Direct PPE delivery
/// - `POST /v1/employees/:id/badge` - Regenerate the QR badge
/// - `GET|POST /v1/employees/:id/biometrics` - Enrolled templates / enrol a sample
/// - `DELETE /v1/employees/:id/biometrics/:kind` - Remove templates of one kind

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
    badge::{badge_hash, badge_payload},
    biometric::{decode_sample, BiometricKind},
    models::{
        biometric_template::BiometricTemplate,
        employee::{CreateEmployee, Employee, EmployeeFilter, UpdateEmployee},
        ppe_delivery::{ActivePpe, CreateDelivery, DeliveryOutcome, PpeDelivery},
        ListParams, Page,
    },
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

/// Regenerated badge
#[derive(Debug, Serialize)]
pub struct BadgeResponse {
    pub employee_id: Uuid,
    /// Text to encode in the printed QR code
    pub payload: String,
    pub qr_hash: String,
    pub version: i32,
}

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub kind: BiometricKind,
    /// Base64 or `data:` URL
    pub sample: String,
}

#[derive(Debug, Serialize)]
pub struct DeletedTemplates {
    pub deleted: u64,
}

pub async fn list_employees(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<ListParams>,
    Query(filter): Query<EmployeeFilter>,
) -> ApiResult<Json<Page<Employee>>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let page = params.page(Employee::SORTABLE, "name")?;
    let employees = Employee::list(&state.db, auth.company_id, &filter, &page).await?;

    Ok(Json(employees))
}

/// Create an employee
///
/// The id is chosen before the insert so the badge hash can be derived from it.
///
/// # Errors
///
/// - `409 Conflict`: CPF already registered in the company
/// - `422 Unprocessable Entity`: invalid CPF, email or dates
pub async fn create_employee(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateEmployee>,
) -> ApiResult<(StatusCode, Json<Employee>)> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;
    req.validate()?;

    let id = Uuid::new_v4();
    let qr_hash = badge_hash(state.badge_secret(), auth.company_id, id, 0)?;
    let employee = Employee::create(&state.db, auth.company_id, id, req, &qr_hash).await?;

    tracing::info!(company_id = %auth.company_id, employee_id = %employee.id, "Employee created");
    record_audit(
        &state,
        &auth,
        "employee.created",
        "employee",
        Some(employee.id),
        json!({ "name": employee.name, "job_title": employee.job_title }),
    )
    .await;

    Ok((StatusCode::CREATED, Json(employee)))
}

pub async fn get_employee(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Employee>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let employee = Employee::find_by_id(&state.db, auth.company_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Employee"))?;

    Ok(Json(employee))
}

pub async fn update_employee(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateEmployee>,
) -> ApiResult<Json<Employee>> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;
    req.validate()?;

    let status = req.status;
    let employee = Employee::update(&state.db, auth.company_id, id, req)
        .await?
        .ok_or_else(|| ApiError::not_found("Employee"))?;

    record_audit(
        &state,
        &auth,
        "employee.updated",
        "employee",
        Some(id),
        json!({ "status": status }),
    )
    .await;

    Ok(Json(employee))
}

/// Delete an employee
///
/// Fails with `409 Conflict` while deliveries, movements or timesheets still reference
/// the employee; terminate instead.
pub async fn delete_employee(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    require_permission(&state.db, &auth, ResourcePermission::Manage).await?;

    if !Employee::delete(&state.db, auth.company_id, id).await? {
        return Err(ApiError::not_found("Employee"));
    }

    record_audit(&state, &auth, "employee.deleted", "employee", Some(id), json!({})).await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_active_ppe(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<ActivePpe>>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    if Employee::find_by_id(&state.db, auth.company_id, id).await?.is_none() {
        return Err(ApiError::not_found("Employee"));
    }

    let items = PpeDelivery::active_for_employee(&state.db, auth.company_id, id).await?;

    Ok(Json(items))
}

/// Deliver PPE directly, outside the QR wizard
///
/// Stock is taken inside the same transaction that writes the delivery row.
///
/// # Errors
///
/// - `404 Not Found`: unknown or terminated employee, unknown item
/// - `409 Conflict`: not enough stock
pub async fn deliver_ppe(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<CreateDelivery>,
) -> ApiResult<(StatusCode, Json<PpeDelivery>)> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;
    req.validate()?;

    let mut tx = state.db.begin().await?;
    let outcome = PpeDelivery::deliver(&mut tx, auth.company_id, req.into_new(id, Some(auth.user_id))).await?;

    let delivery = match outcome {
        DeliveryOutcome::Delivered(delivery) => delivery,
        DeliveryOutcome::UnknownEmployee => return Err(ApiError::not_found("Employee")),
        DeliveryOutcome::UnknownItem => return Err(ApiError::not_found("PPE item")),
        DeliveryOutcome::InsufficientStock { available } => {
            return Err(ApiError::Conflict(format!(
                "Insufficient stock: {} available",
                available
            )))
        }
    };
    tx.commit().await?;

    tracing::info!(
        company_id = %auth.company_id,
        employee_id = %id,
        delivery_id = %delivery.id,
        quantity = delivery.quantity,
        "PPE delivered"
    );
    record_audit(
        &state,
        &auth,
        "ppe.delivered",
        "ppe_delivery",
        Some(delivery.id),
        json!({
            "employee_id": id,
            "ppe_item_id": delivery.ppe_item_id,
            "quantity": delivery.quantity,
        }),
    )
    .await;

    Ok((StatusCode::CREATED, Json(delivery)))
}

/// Regenerate an employee's badge
///
/// Bumps the badge version under a row lock; the previous printed badge stops resolving.
pub async fn regenerate_badge(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<BadgeResponse>> {
    require_permission(&state.db, &auth, ResourcePermission::Manage).await?;

    let mut tx = state.db.begin().await?;

    let employee = Employee::lock(&mut *tx, auth.company_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Employee"))?;

    let version = employee.badge_version + 1;
    let qr_hash = badge_hash(state.badge_secret(), auth.company_id, id, version)?;
    Employee::set_badge(&mut *tx, auth.company_id, id, version, &qr_hash)
        .await?
        .ok_or_else(|| ApiError::not_found("Employee"))?;

    tx.commit().await?;

    tracing::info!(company_id = %auth.company_id, employee_id = %id, version, "Badge regenerated");
    record_audit(
        &state,
        &auth,
        "employee.badge_regenerated",
        "employee",
        Some(id),
        json!({ "version": version }),
    )
    .await;

    Ok(Json(BadgeResponse {
        employee_id: id,
        payload: badge_payload(&qr_hash),
        qr_hash,
        version,
    }))
}

pub async fn list_biometrics(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<BiometricTemplate>>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let templates = BiometricTemplate::list_for_employee(&state.db, auth.company_id, id).await?;

    Ok(Json(templates))
}

/// Enrol a biometric sample
///
/// # Errors
///
/// - `404 Not Found`: unknown employee
/// - `409 Conflict`: the same sample is already enrolled in the company
/// - `422 Unprocessable Entity`: empty, oversized or undecodable sample
pub async fn enroll_biometric(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<EnrollRequest>,
) -> ApiResult<(StatusCode, Json<BiometricTemplate>)> {
    require_permission(&state.db, &auth, ResourcePermission::Manage).await?;

    let sample = decode_sample(&req.sample)?;

    if Employee::find_by_id(&state.db, auth.company_id, id).await?.is_none() {
        return Err(ApiError::not_found("Employee"));
    }

    let template = BiometricTemplate::enroll(&state.db, auth.company_id, id, req.kind, &sample).await?;

    tracing::info!(company_id = %auth.company_id, employee_id = %id, kind = %req.kind, "Biometric enrolled");
    record_audit(
        &state,
        &auth,
        "employee.biometric_enrolled",
        "employee",
        Some(id),
        json!({ "kind": req.kind.as_str() }),
    )
    .await;

    Ok((StatusCode::CREATED, Json(template)))
}

pub async fn delete_biometrics(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((id, kind)): Path<(Uuid, BiometricKind)>,
) -> ApiResult<Json<DeletedTemplates>> {
    require_permission(&state.db, &auth, ResourcePermission::Manage).await?;

    let deleted = BiometricTemplate::delete_for_employee(&state.db, auth.company_id, id, kind).await?;

    if deleted > 0 {
        record_audit(
            &state,
            &auth,
            "employee.biometric_removed",
            "employee",
            Some(id),
            json!({ "kind": kind.as_str(), "templates": deleted }),
        )
        .await;
    }

    Ok(Json(DeletedTemplates { deleted }))
}
