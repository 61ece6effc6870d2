/// PPE (EPI) catalog and delivery endpoints
///
/// - `GET|POST /v1/ppe/items` - List (filters: `category`, `low_stock`,
///   `ca_expires_before`) / create
/// - `GET|PATCH|DELETE /v1/ppe/items/:id`
/// - `POST /v1/ppe/items/:id/stock` - Purchase or inventory correction
/// - `GET /v1/ppe/deliveries` - List (filters: `employee_id`, `ppe_item_id`, `active`,
///   `reason`, `delivered_from`, `delivered_to`)
/// - `GET /v1/ppe/deliveries/:id`
/// - `POST /v1/ppe/deliveries/:id/return`
///
/// Deliveries are created through `POST /v1/employees/:id/ppe` or the QR wizard.

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
        ppe_delivery::{DeliveryFilter, PpeDelivery, ReturnDelivery, ReturnOutcome},
        ppe_item::{CreatePpeItem, PpeItem, PpeItemFilter, StockAdjustment, UpdatePpeItem},
        ListParams, Page,
    },
};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

pub async fn list_items(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<ListParams>,
    Query(filter): Query<PpeItemFilter>,
) -> ApiResult<Json<Page<PpeItem>>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let page = params.page(PpeItem::SORTABLE, "name")?;
    let items = PpeItem::list(&state.db, auth.company_id, &filter, &page).await?;

    Ok(Json(items))
}

pub async fn create_item(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreatePpeItem>,
) -> ApiResult<(StatusCode, Json<PpeItem>)> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;
    req.validate()?;

    let item = PpeItem::create(&state.db, auth.company_id, req).await?;

    record_audit(
        &state,
        &auth,
        "ppe_item.created",
        "ppe_item",
        Some(item.id),
        json!({
            "name": item.name,
            "ca_number": item.ca_number,
            "stock_quantity": item.stock_quantity,
        }),
    )
    .await;

    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn get_item(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PpeItem>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let item = PpeItem::find_by_id(&state.db, auth.company_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("PPE item"))?;

    Ok(Json(item))
}

pub async fn update_item(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdatePpeItem>,
) -> ApiResult<Json<PpeItem>> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;
    req.validate()?;

    let item = PpeItem::update(&state.db, auth.company_id, id, req)
        .await?
        .ok_or_else(|| ApiError::not_found("PPE item"))?;

    record_audit(
        &state,
        &auth,
        "ppe_item.updated",
        "ppe_item",
        Some(id),
        json!({ "ca_number": item.ca_number, "ca_expires_on": item.ca_expires_on }),
    )
    .await;

    Ok(Json(item))
}

/// Items with delivery history cannot be deleted (`409 Conflict`)
pub async fn delete_item(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    require_permission(&state.db, &auth, ResourcePermission::Manage).await?;

    if !PpeItem::delete(&state.db, auth.company_id, id).await? {
        return Err(ApiError::not_found("PPE item"));
    }

    record_audit(&state, &auth, "ppe_item.deleted", "ppe_item", Some(id), json!({})).await;

    Ok(StatusCode::NO_CONTENT)
}

/// Adjust stock by a signed delta
///
/// ```text
/// POST /v1/ppe/items/:id/stock
///
/// { "delta": 50, "reason": "NF 1234" }
/// ```
///
/// # Errors
///
/// - `409 Conflict`: the adjustment would take stock below zero
/// - `422 Unprocessable Entity`: zero or out-of-range delta
pub async fn adjust_stock(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<StockAdjustment>,
) -> ApiResult<Json<PpeItem>> {
    require_permission(&state.db, &auth, ResourcePermission::Manage).await?;
    req.validate()?;
    if req.delta == 0 {
        return Err(ApiError::field("delta", "Adjustment must not be zero"));
    }

    let mut tx = state.db.begin().await?;

    let current = PpeItem::lock(&mut tx, auth.company_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("PPE item"))?;

    let Some(item) = PpeItem::adjust_stock(&mut tx, auth.company_id, id, req.delta).await? else {
        return Err(ApiError::Conflict(format!(
            "Insufficient stock: {} available",
            current.stock_quantity
        )));
    };
    tx.commit().await?;

    tracing::info!(
        company_id = %auth.company_id,
        ppe_item_id = %id,
        delta = req.delta,
        stock = item.stock_quantity,
        "PPE stock adjusted"
    );
    record_audit(
        &state,
        &auth,
        "ppe_item.stock_adjusted",
        "ppe_item",
        Some(id),
        json!({
            "delta": req.delta,
            "reason": req.reason,
            "stock_quantity": item.stock_quantity,
        }),
    )
    .await;

    Ok(Json(item))
}

pub async fn list_deliveries(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<ListParams>,
    Query(filter): Query<DeliveryFilter>,
) -> ApiResult<Json<Page<PpeDelivery>>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let page = params.page(PpeDelivery::SORTABLE, "delivered_on")?;
    let deliveries = PpeDelivery::list(&state.db, auth.company_id, &filter, &page).await?;

    Ok(Json(deliveries))
}

pub async fn get_delivery(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PpeDelivery>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let delivery = PpeDelivery::find_by_id(&state.db, auth.company_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Delivery"))?;

    Ok(Json(delivery))
}

/// Return a delivered PPE line
///
/// Items returned in `good` or `worn` condition go back to stock. A `quantity` below the
/// line's splits it: the returned part becomes its own row and the rest stays active.
///
/// # Errors
///
/// - `404 Not Found`: unknown delivery
/// - `409 Conflict`: already returned
pub async fn return_delivery(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<ReturnDelivery>,
) -> ApiResult<Json<PpeDelivery>> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;
    req.validate()?;

    let condition = req.condition;
    let mut tx = state.db.begin().await?;
    let delivery = match PpeDelivery::return_delivery(&mut tx, auth.company_id, id, req).await? {
        ReturnOutcome::Returned(delivery) => delivery,
        ReturnOutcome::NotFound => return Err(ApiError::not_found("Delivery")),
        ReturnOutcome::AlreadyReturned => {
            return Err(ApiError::Conflict("Delivery was already returned".to_string()))
        }
        ReturnOutcome::ExceedsHeld { held } => {
            return Err(ApiError::field(
                "quantity",
                format!("Delivery holds only {} units", held),
            ))
        }
    };
    tx.commit().await?;

    record_audit(
        &state,
        &auth,
        "ppe.returned",
        "ppe_delivery",
        Some(id),
        json!({
            "employee_id": delivery.employee_id,
            "condition": condition,
            "restocked": condition.restocks(),
        }),
    )
    .await;

    Ok(Json(delivery))
}
