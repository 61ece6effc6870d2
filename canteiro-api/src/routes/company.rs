/// The caller's company
///
/// - `GET /v1/company` - Company profile and settings
/// - `PATCH /v1/company` - Rename or replace settings (owner only)

use super::record_audit;
use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{extract::State, Json};
use canteiro_shared::{
    auth::{
        authorization::{require_permission, ResourcePermission},
        middleware::AuthContext,
    },
    models::company::{Company, UpdateCompany},
};
use serde_json::json;
use validator::Validate;

pub async fn get_company(State(state): State<AppState>, auth: AuthContext) -> ApiResult<Json<Company>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let company = Company::find_by_id(&state.db, auth.company_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Company"))?;

    Ok(Json(company))
}

/// `settings` must be a JSON object and replaces the stored one
pub async fn update_company(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<UpdateCompany>,
) -> ApiResult<Json<Company>> {
    require_permission(&state.db, &auth, ResourcePermission::Own).await?;
    req.validate()?;

    if req.settings.as_ref().is_some_and(|s| !s.is_object()) {
        return Err(ApiError::field("settings", "Settings must be a JSON object"));
    }

    let changed: Vec<&str> = [
        req.name.as_ref().map(|_| "name"),
        req.settings.as_ref().map(|_| "settings"),
    ]
    .into_iter()
    .flatten()
    .collect();

    let company = Company::update(&state.db, auth.company_id, req)
        .await?
        .ok_or_else(|| ApiError::not_found("Company"))?;

    record_audit(
        &state,
        &auth,
        "company.updated",
        "company",
        Some(company.id),
        json!({ "fields": changed }),
    )
    .await;

    Ok(Json(company))
}
