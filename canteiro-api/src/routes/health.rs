/// Health check endpoint
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
///
/// # Response
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "database": "connected",
///   "pool": { "active": 1, "idle": 3 }
/// }
/// ```

use crate::{app::AppState, error::ApiResult};
use axum::{extract::State, Json};
use canteiro_shared::db::pool::{get_pool_stats, health_check as db_health_check};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `healthy` or `degraded`
    pub status: String,
    pub version: String,
    /// `connected` or `disconnected`
    pub database: String,
    pub pool: PoolInfo,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PoolInfo {
    pub active: usize,
    pub idle: usize,
}

/// Reports service health; never fails so load balancers always get a body
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    let connected = db_health_check(&state.db).await.is_ok();
    let stats = get_pool_stats(&state.db);

    Ok(Json(HealthResponse {
        status: if connected { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if connected { "connected" } else { "disconnected" }.to_string(),
        pool: PoolInfo {
            active: stats.active_connections,
            idle: stats.idle_connections,
        },
    }))
}
