/// Employment contract endpoints
///
/// - `GET /v1/contracts` - List (filters: `employee_id`, `status`, `contract_type`)
/// - `POST /v1/contracts` - Create
/// - `GET|PATCH|DELETE /v1/contracts/:id`

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
        contract::{Contract, ContractFilter, CreateContract, UpdateContract},
        ListParams, Page,
    },
};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

pub async fn list_contracts(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<ListParams>,
    Query(filter): Query<ContractFilter>,
) -> ApiResult<Json<Page<Contract>>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let page = params.page(Contract::SORTABLE, "start_date")?;
    let contracts = Contract::list(&state.db, auth.company_id, &filter, &page).await?;

    Ok(Json(contracts))
}

/// Create a contract
///
/// # Errors
///
/// - `404 Not Found`: the employee is not in the caller's company
/// - `422 Unprocessable Entity`: end date before start date, negative salary
pub async fn create_contract(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateContract>,
) -> ApiResult<(StatusCode, Json<Contract>)> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;
    req.validate()?;

    let contract = Contract::create(&state.db, auth.company_id, req)
        .await?
        .ok_or_else(|| ApiError::not_found("Employee"))?;

    record_audit(
        &state,
        &auth,
        "contract.created",
        "contract",
        Some(contract.id),
        json!({
            "employee_id": contract.employee_id,
            "contract_type": contract.contract_type,
            "start_date": contract.start_date,
        }),
    )
    .await;

    Ok((StatusCode::CREATED, Json(contract)))
}

pub async fn get_contract(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Contract>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let contract = Contract::find_by_id(&state.db, auth.company_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Contract"))?;

    Ok(Json(contract))
}

/// Dates are re-checked by the database, so a patch moving only one of them still
/// cannot invert the range
pub async fn update_contract(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateContract>,
) -> ApiResult<Json<Contract>> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;
    req.validate()?;

    let contract = Contract::update(&state.db, auth.company_id, id, req)
        .await?
        .ok_or_else(|| ApiError::not_found("Contract"))?;

    record_audit(
        &state,
        &auth,
        "contract.updated",
        "contract",
        Some(id),
        json!({ "status": contract.status, "end_date": contract.end_date }),
    )
    .await;

    Ok(Json(contract))
}

pub async fn delete_contract(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    require_permission(&state.db, &auth, ResourcePermission::Manage).await?;

    if !Contract::delete(&state.db, auth.company_id, id).await? {
        return Err(ApiError::not_found("Contract"));
    }

    record_audit(&state, &auth, "contract.deleted", "contract", Some(id), json!({})).await;

    Ok(StatusCode::NO_CONTENT)
}
