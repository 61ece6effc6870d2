/// Training record endpoints
///
/// - `GET /v1/trainings` - List (filters: `employee_id`, `nr_code`, `expires_before`)
/// - `POST /v1/trainings` - Create
/// - `GET|PATCH|DELETE /v1/trainings/:id`
///
/// NR codes are accepted loosely (`nr35`, `NR 35`) and stored as `NR-35`.

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
        training::{CreateTraining, Training, TrainingFilter, UpdateTraining},
        ListParams, Page,
    },
};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

pub async fn list_trainings(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(params): Query<ListParams>,
    Query(filter): Query<TrainingFilter>,
) -> ApiResult<Json<Page<Training>>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let page = params.page(Training::SORTABLE, "completed_on")?;
    let trainings = Training::list(&state.db, auth.company_id, &filter, &page).await?;

    Ok(Json(trainings))
}

pub async fn create_training(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<CreateTraining>,
) -> ApiResult<(StatusCode, Json<Training>)> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;
    req.validate()?;

    let training = Training::create(&state.db, auth.company_id, req)
        .await?
        .ok_or_else(|| ApiError::not_found("Employee"))?;

    record_audit(
        &state,
        &auth,
        "training.created",
        "training",
        Some(training.id),
        json!({
            "employee_id": training.employee_id,
            "title": training.title,
            "nr_code": training.nr_code,
        }),
    )
    .await;

    Ok((StatusCode::CREATED, Json(training)))
}

pub async fn get_training(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Training>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let training = Training::find_by_id(&state.db, auth.company_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Training"))?;

    Ok(Json(training))
}

pub async fn update_training(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(mut req): Json<UpdateTraining>,
) -> ApiResult<Json<Training>> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;
    req.validate()?;
    req.nr_code = req.normalized_nr_code().map_err(|msg| ApiError::field("nr_code", msg))?;

    let training = Training::update(&state.db, auth.company_id, id, req)
        .await?
        .ok_or_else(|| ApiError::not_found("Training"))?;

    record_audit(
        &state,
        &auth,
        "training.updated",
        "training",
        Some(id),
        json!({ "expires_on": training.expires_on }),
    )
    .await;

    Ok(Json(training))
}

pub async fn delete_training(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    require_permission(&state.db, &auth, ResourcePermission::Manage).await?;

    if !Training::delete(&state.db, auth.company_id, id).await? {
        return Err(ApiError::not_found("Training"));
    }

    record_audit(&state, &auth, "training.deleted", "training", Some(id), json!({})).await;

    Ok(StatusCode::NO_CONTENT)
}
