/// Dashboard report
///
/// ```text
/// GET /v1/reports/dashboard
/// ```
///
/// Counts are computed on request against today's date (UTC); the delivery series
/// covers the last six months including the current one.

use crate::{app::AppState, error::ApiResult};
use axum::{extract::State, Json};
use canteiro_shared::{
    auth::{
        authorization::{require_permission, ResourcePermission},
        middleware::AuthContext,
    },
    models::report::Dashboard,
};
use chrono::Utc;

pub async fn dashboard(State(state): State<AppState>, auth: AuthContext) -> ApiResult<Json<Dashboard>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let dashboard = Dashboard::load(&state.db, auth.company_id, Utc::now().date_naive()).await?;

    Ok(Json(dashboard))
}
