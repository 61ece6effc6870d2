/// Tool, machine and supply endpoints
///
/// - `GET|POST /v1/assets` - List (filters: `kind`, `status`, `holder_employee_id`,
///   `low_stock`) / create
/// - `GET|PATCH|DELETE /v1/assets/:id`
/// - `GET /v1/assets/:id/movements` - Movement history, newest first
/// - `POST /v1/assets/:id/checkout` - Lend a tool or machine to an employee
/// - `POST /v1/assets/:id/checkin` - Take it back; damaged goes to maintenance, lost is retired
/// - `POST /v1/assets/:id/consume` - Consume supply units at a work site

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
        asset::{Asset, AssetFilter, CreateAsset, UpdateAsset},
        asset_movement::{
            AssetMovement, CheckinRequest, CheckoutRequest, ConsumeRequest, MovementContext, MovementOutcome,
        },
        ListParams, Page,
    },
};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

/// Asset after a movement, with the movement row
#[derive(Debug, Serialize)]
pub struct MovementResponse {
    pub asset: Asset,
    pub movement: AssetMovement,
}

const MOVEMENT_SORTABLE: &[&str] = &["created_at"];

fn recorded(outcome: MovementOutcome) -> ApiResult<MovementResponse> {
    match outcome {
        MovementOutcome::Recorded { asset, movement } => Ok(MovementResponse { asset, movement }),
        MovementOutcome::UnknownAsset => Err(ApiError::not_found("Asset")),
        MovementOutcome::UnknownEmployee => Err(ApiError::not_found("Employee")),
        MovementOutcome::WrongKind(kind) => Err(ApiError::Conflict(format!(
            "Operation does not apply to a {}",
            kind.as_str()
        ))),
        MovementOutcome::Unavailable(status) => {
            Err(ApiError::Conflict(format!("Asset is {}", status.as_str())))
        }
        MovementOutcome::NotHeld => Err(ApiError::Conflict(
            "Asset is not held by this employee".to_string(),
        )),
        MovementOutcome::InsufficientQuantity { available } => Err(ApiError::Conflict(format!(
            "Insufficient quantity: {} available",
            available
        ))),
    }
}

fn context(auth: &AuthContext, notes: Option<String>) -> MovementContext {
    MovementContext {
        notes,
        workflow_session_id: None,
        created_by: Some(auth.user_id),
    }
}

pub async fn list_assets(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<ListParams>,
    Query(filter): Query<AssetFilter>,
) -> ApiResult<Json<Page<Asset>>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let page = params.page(Asset::SORTABLE, "name")?;
    let assets = Asset::list(&state.db, auth.company_id, &filter, &page).await?;

    Ok(Json(assets))
}

pub async fn create_asset(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateAsset>,
) -> ApiResult<(StatusCode, Json<Asset>)> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;
    req.validate()?;

    let asset = Asset::create(&state.db, auth.company_id, req).await?;

    record_audit(
        &state,
        &auth,
        "asset.created",
        "asset",
        Some(asset.id),
        json!({ "code": asset.code, "kind": asset.kind.as_str(), "name": asset.name }),
    )
    .await;

    Ok((StatusCode::CREATED, Json(asset)))
}

pub async fn get_asset(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Asset>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let asset = Asset::find_by_id(&state.db, auth.company_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Asset"))?;

    Ok(Json(asset))
}

/// Status can be set to anything but `in_use`, which only a checkout produces
pub async fn update_asset(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateAsset>,
) -> ApiResult<Json<Asset>> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;
    req.validate()?;
    if !req.status_allowed() {
        return Err(ApiError::field("status", "Use checkout to put an asset in use"));
    }

    let asset = Asset::update(&state.db, auth.company_id, id, req)
        .await?
        .ok_or_else(|| ApiError::not_found("Asset"))?;

    record_audit(
        &state,
        &auth,
        "asset.updated",
        "asset",
        Some(id),
        json!({ "status": asset.status.as_str() }),
    )
    .await;

    Ok(Json(asset))
}

pub async fn delete_asset(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    require_permission(&state.db, &auth, ResourcePermission::Manage).await?;

    if !Asset::delete(&state.db, auth.company_id, id).await? {
        return Err(ApiError::not_found("Asset"));
    }

    record_audit(&state, &auth, "asset.deleted", "asset", Some(id), json!({})).await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_movements(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Page<AssetMovement>>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let page = params.page(MOVEMENT_SORTABLE, "created_at")?;
    let movements = AssetMovement::list_for_asset(&state.db, auth.company_id, id, &page).await?;

    Ok(Json(movements))
}

/// Check a tool or machine out to an employee
///
/// # Errors
///
/// - `404 Not Found`: unknown asset, unknown or terminated employee
/// - `409 Conflict`: asset is a supply, or not `available`
pub async fn checkout(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<CheckoutRequest>,
) -> ApiResult<Json<MovementResponse>> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;
    req.validate()?;

    let mut tx = state.db.begin().await?;
    let outcome = AssetMovement::checkout(
        &mut tx,
        auth.company_id,
        id,
        req.employee_id,
        context(&auth, req.notes),
    )
    .await?;
    let response = recorded(outcome)?;
    tx.commit().await?;

    tracing::info!(company_id = %auth.company_id, asset_id = %id, employee_id = %req.employee_id, "Asset checked out");
    record_audit(
        &state,
        &auth,
        "asset.checked_out",
        "asset",
        Some(id),
        json!({ "employee_id": req.employee_id, "movement_id": response.movement.id }),
    )
    .await;

    Ok(Json(response))
}

/// Check a tool or machine back in
///
/// Only the current holder can return it (`409 Conflict` otherwise).
pub async fn checkin(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<CheckinRequest>,
) -> ApiResult<Json<MovementResponse>> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;
    req.validate()?;

    let mut tx = state.db.begin().await?;
    let outcome = AssetMovement::checkin(
        &mut tx,
        auth.company_id,
        id,
        req.employee_id,
        req.condition,
        context(&auth, req.notes),
    )
    .await?;
    let response = recorded(outcome)?;
    tx.commit().await?;

    record_audit(
        &state,
        &auth,
        "asset.checked_in",
        "asset",
        Some(id),
        json!({
            "employee_id": req.employee_id,
            "condition": req.condition,
            "status": response.asset.status.as_str(),
        }),
    )
    .await;

    Ok(Json(response))
}

/// Consume units of a supply
///
/// # Errors
///
/// - `409 Conflict`: asset is not a supply, or the quantity exceeds what is on hand
pub async fn consume(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<ConsumeRequest>,
) -> ApiResult<Json<MovementResponse>> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;
    req.validate()?;

    let mut tx = state.db.begin().await?;
    let outcome = AssetMovement::consume(
        &mut tx,
        auth.company_id,
        id,
        req.employee_id,
        req.quantity,
        req.work_site.trim().to_string(),
        context(&auth, req.notes),
    )
    .await?;
    let response = recorded(outcome)?;
    tx.commit().await?;

    record_audit(
        &state,
        &auth,
        "asset.consumed",
        "asset",
        Some(id),
        json!({
            "employee_id": req.employee_id,
            "quantity": req.quantity,
            "work_site": response.movement.work_site,
            "remaining": response.asset.quantity,
        }),
    )
    .await;

    Ok(Json(response))
}
