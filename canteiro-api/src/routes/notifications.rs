/// Notification endpoints
///
/// - `GET /v1/notifications` - List (filters: `unread`, `kind`, `severity`), newest first
/// - `GET /v1/notifications/unread-count`
/// - `POST /v1/notifications/read-all`
/// - `POST /v1/notifications/:id/read`
///
/// Notifications are written by the worker's alert jobs and by workflow completion.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, Query, State},
    Json,
};
use canteiro_shared::{
    auth::{
        authorization::{require_permission, ResourcePermission},
        middleware::AuthContext,
    },
    models::{
        notification::{Notification, NotificationFilter},
        ListParams, Page, SortOrder,
    },
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct UnreadCount {
    pub unread: i64,
}

#[derive(Debug, Serialize)]
pub struct MarkedRead {
    pub updated: u64,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(mut params): Query<ListParams>,
    Query(filter): Query<NotificationFilter>,
) -> ApiResult<Json<Page<Notification>>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    if params.sort.is_none() && params.order.is_none() {
        params.order = Some(SortOrder::Desc);
    }
    let page = params.page(Notification::SORTABLE, "created_at")?;
    let notifications = Notification::list(&state.db, auth.company_id, &filter, &page).await?;

    Ok(Json(notifications))
}

pub async fn unread_count(State(state): State<AppState>, auth: AuthContext) -> ApiResult<Json<UnreadCount>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let unread = Notification::unread_count(&state.db, auth.company_id).await?;

    Ok(Json(UnreadCount { unread }))
}

pub async fn mark_all_read(State(state): State<AppState>, auth: AuthContext) -> ApiResult<Json<MarkedRead>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let updated = Notification::mark_all_read(&state.db, auth.company_id).await?;

    Ok(Json(MarkedRead { updated }))
}

/// Marking an already read notification is a no-op that returns it unchanged
pub async fn mark_read(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Notification>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let notification = Notification::mark_read(&state.db, auth.company_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Notification"))?;

    Ok(Json(notification))
}
