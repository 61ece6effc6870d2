/// Occupational health certificate (ASO) endpoints
///
/// - `GET /v1/health-certificates` - List (filters: `employee_id`, `exam_type`, `result`,
///   `expires_before`)
/// - `POST /v1/health-certificates` - Create
/// - `GET|PATCH|DELETE /v1/health-certificates/:id`

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
        health_certificate::{
            CreateHealthCertificate, HealthCertificate, HealthCertificateFilter, UpdateHealthCertificate,
        },
        ListParams, Page,
    },
};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

pub async fn list_certificates(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<ListParams>,
    Query(filter): Query<HealthCertificateFilter>,
) -> ApiResult<Json<Page<HealthCertificate>>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let page = params.page(HealthCertificate::SORTABLE, "exam_date")?;
    let certificates = HealthCertificate::list(&state.db, auth.company_id, &filter, &page).await?;

    Ok(Json(certificates))
}

/// Create a certificate
///
/// `fit_with_restrictions` requires `restrictions` to be filled in.
pub async fn create_certificate(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateHealthCertificate>,
) -> ApiResult<(StatusCode, Json<HealthCertificate>)> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;
    req.validate()?;

    let certificate = HealthCertificate::create(&state.db, auth.company_id, req)
        .await?
        .ok_or_else(|| ApiError::not_found("Employee"))?;

    record_audit(
        &state,
        &auth,
        "health_certificate.created",
        "health_certificate",
        Some(certificate.id),
        json!({
            "employee_id": certificate.employee_id,
            "exam_type": certificate.exam_type,
            "result": certificate.result,
        }),
    )
    .await;

    Ok((StatusCode::CREATED, Json(certificate)))
}

pub async fn get_certificate(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<HealthCertificate>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let certificate = HealthCertificate::find_by_id(&state.db, auth.company_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Health certificate"))?;

    Ok(Json(certificate))
}

pub async fn update_certificate(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateHealthCertificate>,
) -> ApiResult<Json<HealthCertificate>> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;
    req.validate()?;

    let certificate = HealthCertificate::update(&state.db, auth.company_id, id, req)
        .await?
        .ok_or_else(|| ApiError::not_found("Health certificate"))?;

    record_audit(
        &state,
        &auth,
        "health_certificate.updated",
        "health_certificate",
        Some(id),
        json!({ "result": certificate.result, "expires_on": certificate.expires_on }),
    )
    .await;

    Ok(Json(certificate))
}

pub async fn delete_certificate(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    require_permission(&state.db, &auth, ResourcePermission::Manage).await?;

    if !HealthCertificate::delete(&state.db, auth.company_id, id).await? {
        return Err(ApiError::not_found("Health certificate"));
    }

    record_audit(
        &state,
        &auth,
        "health_certificate.deleted",
        "health_certificate",
        Some(id),
        json!({}),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}
