/// Wizard endpoints for deliveries, returns, exchanges and supply applications
///
/// A session walks `authenticate -> scan_items -> details -> confirm -> complete`.
/// Every step locks the session row, applies the transition and pushes the expiry
/// forward by the configured TTL; an expired session answers `410 Gone`.
///
/// - `GET /v1/workflows` - Open sessions
/// - `POST /v1/workflows` - Start a session `{ "kind": "delivery" }`
/// - `GET|DELETE /v1/workflows/:id`
/// - `POST /v1/workflows/:id/authenticate` - Badge, biometric sample or employee id
/// - `POST /v1/workflows/:id/items` - Scan an item label
/// - `DELETE /v1/workflows/:id/items/:item_id`
/// - `POST /v1/workflows/:id/items/done`
/// - `POST /v1/workflows/:id/details`
/// - `POST /v1/workflows/:id/back`
/// - `POST /v1/workflows/:id/confirm` - Writes deliveries, returns and movements

use super::record_audit;
use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use canteiro_shared::{
    auth::{
        authorization::{require_permission, ResourcePermission},
        middleware::AuthContext,
    },
    badge::extract_badge_hash,
    biometric::{decode_sample, BiometricKind},
    models::{asset::Asset, employee::Employee, ppe_item::PpeItem, workflow_session::WorkflowSession},
    qr::QrPayload,
    workflow::{
        completion::{self, CompletionOutcome},
        AuthMethod, AuthenticatedEmployee, Details, ItemType, ScannedItem, WorkflowError, WorkflowKind,
        WorkflowState, WorkflowStep,
    },
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Deserialize)]
pub struct StartWorkflowRequest {
    pub kind: WorkflowKind,
}

#[derive(Debug, Deserialize)]
pub struct BiometricInput {
    pub kind: BiometricKind,
    pub sample: String,
}

/// Exactly one identification method
#[derive(Debug, Default, Deserialize)]
pub struct AuthenticateRequest {
    /// Bare hash or full badge payload
    pub qr_hash: Option<String>,
    pub biometric: Option<BiometricInput>,
    /// Manual selection by a supervisor
    pub employee_id: Option<Uuid>,
}

#[derive(Debug)]
enum Identification<'a> {
    Badge(&'a str),
    Biometric(&'a BiometricInput),
    Manual(Uuid),
}

impl AuthenticateRequest {
    fn identification(&self) -> ApiResult<Identification<'_>> {
        match (&self.qr_hash, &self.biometric, self.employee_id) {
            (Some(hash), None, None) => Ok(Identification::Badge(hash)),
            (None, Some(sample), None) => Ok(Identification::Biometric(sample)),
            (None, None, Some(id)) => Ok(Identification::Manual(id)),
            _ => Err(ApiError::field(
                "__all__",
                "Provide exactly one of qr_hash, biometric or employee_id",
            )),
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddItemRequest {
    /// Scanned `CANTEIRO:PPE:` or `CANTEIRO:AST:` label
    pub payload: String,
    #[serde(default = "one")]
    #[validate(range(min = 1, max = 1000, message = "Quantity must be between 1 and 1000"))]
    pub quantity: i32,
}

fn one() -> i32 {
    1
}

/// Locks the session, applies one transition and saves it with a fresh expiry
async fn advance<F>(state: &AppState, auth: &AuthContext, id: Uuid, apply: F) -> ApiResult<WorkflowSession>
where
    F: FnOnce(&mut WorkflowState, DateTime<Utc>) -> Result<(), WorkflowError>,
{
    let now = Utc::now();
    let mut tx = state.db.begin().await?;

    let session = WorkflowSession::lock(&mut *tx, auth.company_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Workflow session"))?;
    if session.is_expired(now) {
        return Err(WorkflowError::Expired.into());
    }

    let mut workflow = session.state.0.clone();
    apply(&mut workflow, now)?;

    let saved = WorkflowSession::save(&mut *tx, auth.company_id, id, &workflow, state.workflow_ttl()).await?;
    tx.commit().await?;

    tracing::debug!(
        company_id = %auth.company_id,
        session_id = %id,
        step = ?saved.step,
        "Workflow advanced"
    );

    Ok(saved)
}

pub async fn list_open(
    State(state): State<AppState>,
    auth: AuthContext,
) -> ApiResult<Json<Vec<WorkflowSession>>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let sessions = WorkflowSession::list_open(&state.db, auth.company_id, Utc::now()).await?;
    Ok(Json(sessions))
}

pub async fn start_workflow(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<StartWorkflowRequest>,
) -> ApiResult<(StatusCode, Json<WorkflowSession>)> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;

    let workflow = WorkflowState::new(req.kind, Utc::now());
    let session = WorkflowSession::create(
        &state.db,
        auth.company_id,
        auth.user_id,
        workflow,
        state.workflow_ttl(),
    )
    .await?;

    tracing::info!(
        company_id = %auth.company_id,
        session_id = %session.id,
        kind = req.kind.as_str(),
        "Workflow started"
    );

    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn get_workflow(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WorkflowSession>> {
    require_permission(&state.db, &auth, ResourcePermission::Read).await?;

    let session = WorkflowSession::find_by_id(&state.db, auth.company_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Workflow session"))?;
    if session.is_expired(Utc::now()) {
        return Err(WorkflowError::Expired.into());
    }

    Ok(Json(session))
}

/// Abandon a session; completed sessions are kept as history
pub async fn cancel_workflow(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;

    let mut tx = state.db.begin().await?;

    let session = WorkflowSession::lock(&mut *tx, auth.company_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Workflow session"))?;
    if session.step == WorkflowStep::Complete {
        return Err(WorkflowError::AlreadyComplete.into());
    }

    WorkflowSession::delete(&mut *tx, auth.company_id, id).await?;
    tx.commit().await?;

    tracing::info!(company_id = %auth.company_id, session_id = %id, "Workflow cancelled");
    record_audit(
        &state,
        &auth,
        "workflow.cancelled",
        "workflow_session",
        Some(id),
        json!({ "kind": session.kind.as_str(), "step": session.step }),
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// Identify the employee taking part
///
/// ```text
/// POST /v1/workflows/:id/authenticate
///
/// { "qr_hash": "CANTEIRO:EMP:9f2c..." }
/// { "biometric": { "kind": "face", "sample": "data:image/jpeg;base64,..." } }
/// { "employee_id": "..." }
/// ```
///
/// Badge and biometric identification share the rate limit of the identification
/// functions. Only active employees can be identified.
pub async fn authenticate(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<AuthenticateRequest>,
) -> ApiResult<Json<WorkflowSession>> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;

    let identification = req.identification()?;
    if !matches!(identification, Identification::Manual(_)) {
        if let Err(retry_after) = state.rate_limiter.check(auth.company_id) {
            return Err(ApiError::RateLimitExceeded {
                retry_after,
                message: "Too many identification attempts, try again shortly".to_string(),
            });
        }
    }

    let employee = match identification {
        Identification::Badge(raw) => {
            let hash = extract_badge_hash(raw)?;
            Employee::find_active_by_qr_hash(&state.db, auth.company_id, &hash)
                .await?
                .map(|found| AuthenticatedEmployee {
                    id: found.id,
                    name: found.name,
                    method: AuthMethod::QrCode,
                })
        }
        Identification::Biometric(input) => {
            let sample = decode_sample(&input.sample)?;
            let method = match input.kind {
                BiometricKind::Face => AuthMethod::Face,
                BiometricKind::Fingerprint => AuthMethod::Fingerprint,
            };
            state
                .matcher
                .identify(auth.company_id, input.kind, &sample)
                .await?
                .map(|found| AuthenticatedEmployee {
                    id: found.employee_id,
                    name: found.employee_name,
                    method,
                })
        }
        Identification::Manual(employee_id) => {
            Employee::find_active_summary(&state.db, auth.company_id, employee_id)
                .await?
                .map(|found| AuthenticatedEmployee {
                    id: found.id,
                    name: found.name,
                    method: AuthMethod::Manual,
                })
        }
    };

    let employee = employee.ok_or_else(|| ApiError::NotFound("No active employee matches".to_string()))?;
    tracing::info!(
        company_id = %auth.company_id,
        session_id = %id,
        employee_id = %employee.id,
        method = ?employee.method,
        "Workflow employee identified"
    );

    let session = advance(&state, &auth, id, |workflow, now| workflow.authenticate(employee, now)).await?;
    Ok(Json(session))
}

/// Resolve a scanned label to a catalog item
async fn resolve_item(state: &AppState, company_id: Uuid, payload: &str, quantity: i32) -> ApiResult<ScannedItem> {
    match QrPayload::parse(payload)? {
        QrPayload::Badge(_) => Err(ApiError::field(
            "payload",
            "This is an employee badge, scan an item label",
        )),
        QrPayload::Ppe(item_id) => {
            let item = PpeItem::find_by_id(&state.db, company_id, item_id)
                .await?
                .ok_or_else(|| ApiError::not_found("PPE item"))?;
            Ok(ScannedItem {
                item_id: item.id,
                item_type: ItemType::Ppe,
                name: item.name,
                quantity,
            })
        }
        QrPayload::Asset(asset_id) => {
            let asset = Asset::find_by_id(&state.db, company_id, asset_id)
                .await?
                .ok_or_else(|| ApiError::not_found("Asset"))?;
            Ok(ScannedItem {
                item_id: asset.id,
                item_type: ItemType::from(asset.kind),
                name: asset.name,
                quantity,
            })
        }
    }
}

pub async fn add_item(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(req): Json<AddItemRequest>,
) -> ApiResult<Json<WorkflowSession>> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;
    req.validate()?;

    let item = resolve_item(&state, auth.company_id, &req.payload, req.quantity).await?;
    let session = advance(&state, &auth, id, |workflow, now| workflow.add_item(item, now)).await?;

    Ok(Json(session))
}

pub async fn remove_item(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<WorkflowSession>> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;

    let session = advance(&state, &auth, id, |workflow, now| workflow.remove_item(item_id, now)).await?;
    Ok(Json(session))
}

pub async fn finish_scanning(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WorkflowSession>> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;

    let session = advance(&state, &auth, id, |workflow, now| workflow.finish_scanning(now)).await?;
    Ok(Json(session))
}

/// Details for the session kind, tagged by `kind`
///
/// ```json
/// { "kind": "delivery", "reason": "first_issue", "expected_return_on": null }
/// { "kind": "return", "condition": "worn" }
/// ```
pub async fn set_details(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
    Json(details): Json<Details>,
) -> ApiResult<Json<WorkflowSession>> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;

    let session = advance(&state, &auth, id, |workflow, now| workflow.set_details(details, now)).await?;
    Ok(Json(session))
}

/// Step back; the employee, items and details already entered are kept
pub async fn back(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<WorkflowSession>> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;

    let session = advance(&state, &auth, id, |workflow, now| workflow.back(now)).await?;
    Ok(Json(session))
}

/// Complete the session
///
/// Writes every delivery, return and movement in one transaction. On failure nothing is
/// written and the session stays at the confirm step.
pub async fn confirm(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<CompletionOutcome>> {
    require_permission(&state.db, &auth, ResourcePermission::Write).await?;

    let outcome = completion::complete(
        &state.db,
        auth.company_id,
        id,
        auth.user_id,
        state.workflow_ttl(),
        Utc::now(),
    )
    .await?
    .ok_or_else(|| ApiError::not_found("Workflow session"))?;

    tracing::info!(
        company_id = %auth.company_id,
        session_id = %id,
        deliveries = outcome.deliveries.len(),
        returns = outcome.returns.len(),
        movements = outcome.movements.len(),
        "Workflow completed"
    );

    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: serde_json::Value) -> AuthenticateRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_identification_requires_exactly_one_method() {
        assert!(matches!(
            request(json!({ "qr_hash": "abc" })).identification(),
            Ok(Identification::Badge("abc"))
        ));

        let id = Uuid::new_v4();
        assert!(matches!(
            request(json!({ "employee_id": id })).identification(),
            Ok(Identification::Manual(found)) if found == id
        ));

        assert!(request(json!({})).identification().is_err());
        assert!(request(json!({ "qr_hash": "abc", "employee_id": id }))
            .identification()
            .is_err());
    }

    #[test]
    fn test_biometric_identification() {
        let req = request(json!({ "biometric": { "kind": "fingerprint", "sample": "aGVsbG8=" } }));
        match req.identification() {
            Ok(Identification::Biometric(input)) => assert_eq!(input.kind, BiometricKind::Fingerprint),
            other => panic!("unexpected identification: {:?}", other),
        }
    }

    #[test]
    fn test_add_item_quantity_defaults_to_one() {
        let req: AddItemRequest = serde_json::from_value(json!({ "payload": "CANTEIRO:PPE:x" })).unwrap();
        assert_eq!(req.quantity, 1);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_add_item_quantity_range() {
        let too_many: AddItemRequest =
            serde_json::from_value(json!({ "payload": "CANTEIRO:PPE:x", "quantity": 1001 })).unwrap();
        assert!(too_many
            .validate()
            .unwrap_err()
            .field_errors()
            .contains_key("quantity"));

        let none: AddItemRequest =
            serde_json::from_value(json!({ "payload": "CANTEIRO:PPE:x", "quantity": 0 })).unwrap();
        assert!(none.validate().is_err());
    }

    #[test]
    fn test_start_request_kind() {
        let req: StartWorkflowRequest = serde_json::from_value(json!({ "kind": "application" })).unwrap();
        assert_eq!(req.kind, WorkflowKind::Application);
    }
}
