//! Applying a confirmed workflow
//!
//! Completion runs in one transaction: the session row is locked, every scanned item is
//! applied (deliveries, returns, checkouts, checkins, consumption), the session is marked
//! complete, an audit entry and a `workflow_completed` notification are written. Any item
//! that cannot be applied rolls the whole workflow back and the session stays at
//! `confirm`, so the operator can go back and fix the list.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::{Details, ItemType, ScannedItem, WorkflowError, WorkflowState};
use crate::models::asset_movement::{AssetMovement, MovementContext, MovementOutcome};
use crate::models::audit_log::{AuditEntry, NewAuditEntry};
use crate::models::notification::{NewNotification, Notification, NotificationKind, Severity};
use crate::models::ppe_delivery::{
    DeliveryOutcome, DeliveryReason, ItemCondition, NewDelivery, PpeDelivery, ReturnDelivery, ReturnOutcome,
};
use crate::models::workflow_session::WorkflowSession;

/// Rows written by a completed workflow
#[derive(Debug, Clone, Serialize)]
pub struct CompletionOutcome {
    pub session: WorkflowSession,
    pub deliveries: Vec<PpeDelivery>,
    pub returns: Vec<PpeDelivery>,
    pub movements: Vec<AssetMovement>,
}

#[derive(Default)]
struct Effects {
    deliveries: Vec<PpeDelivery>,
    returns: Vec<PpeDelivery>,
    movements: Vec<AssetMovement>,
}

struct Scope {
    company_id: Uuid,
    session_id: Uuid,
    employee_id: Uuid,
    actor_id: Uuid,
    now: DateTime<Utc>,
}

impl Scope {
    fn context(&self, notes: &Option<String>) -> MovementContext {
        MovementContext {
            notes: notes.clone(),
            workflow_session_id: Some(self.session_id),
            created_by: Some(self.actor_id),
        }
    }
}

fn unavailable(item_id: Uuid, reason: impl Into<String>) -> WorkflowError {
    WorkflowError::ItemUnavailable {
        item_id,
        reason: reason.into(),
    }
}

fn movement(item_id: Uuid, outcome: MovementOutcome) -> Result<AssetMovement, WorkflowError> {
    match outcome {
        MovementOutcome::Recorded { movement, .. } => Ok(movement),
        MovementOutcome::UnknownAsset => Err(unavailable(item_id, "asset no longer exists")),
        MovementOutcome::UnknownEmployee => Err(WorkflowError::EmployeeUnavailable),
        MovementOutcome::WrongKind(kind) => Err(unavailable(item_id, format!("operation not valid for a {}", kind.as_str()))),
        MovementOutcome::Unavailable(status) => Err(unavailable(item_id, format!("asset is {}", status.as_str()))),
        MovementOutcome::NotHeld => Err(unavailable(item_id, "asset is not held by this employee")),
        MovementOutcome::InsufficientQuantity { available } => {
            Err(unavailable(item_id, format!("only {} available", available)))
        }
    }
}

async fn deliver_items(
    conn: &mut PgConnection,
    scope: &Scope,
    items: &[ScannedItem],
    reason: DeliveryReason,
    expected_return_on: Option<chrono::NaiveDate>,
    notes: &Option<String>,
    effects: &mut Effects,
) -> Result<(), WorkflowError> {
    for item in items {
        match item.item_type {
            ItemType::Ppe => {
                let delivery = NewDelivery {
                    employee_id: scope.employee_id,
                    ppe_item_id: item.item_id,
                    quantity: item.quantity,
                    reason,
                    delivered_on: scope.now.date_naive(),
                    expected_return_on,
                    notes: notes.clone(),
                    workflow_session_id: Some(scope.session_id),
                    delivered_by: Some(scope.actor_id),
                };
                match PpeDelivery::deliver(conn, scope.company_id, delivery).await? {
                    DeliveryOutcome::Delivered(row) => effects.deliveries.push(row),
                    DeliveryOutcome::UnknownEmployee => return Err(WorkflowError::EmployeeUnavailable),
                    DeliveryOutcome::UnknownItem => return Err(unavailable(item.item_id, "item no longer in the catalog")),
                    DeliveryOutcome::InsufficientStock { available } => {
                        return Err(unavailable(item.item_id, format!("only {} in stock", available)))
                    }
                }
            }
            ItemType::Tool | ItemType::Machine => {
                let outcome = AssetMovement::checkout(
                    conn,
                    scope.company_id,
                    item.item_id,
                    scope.employee_id,
                    scope.context(notes),
                )
                .await?;
                effects.movements.push(movement(item.item_id, outcome)?);
            }
            ItemType::Supply => return Err(unavailable(item.item_id, "supplies are consumed, not delivered")),
        }
    }
    Ok(())
}

async fn return_items(
    conn: &mut PgConnection,
    scope: &Scope,
    items: &[ScannedItem],
    condition: ItemCondition,
    notes: &Option<String>,
    effects: &mut Effects,
) -> Result<(), WorkflowError> {
    for item in items {
        match item.item_type {
            ItemType::Ppe => {
                let returned = PpeDelivery::return_quantity(
                    conn,
                    scope.company_id,
                    scope.employee_id,
                    item.item_id,
                    item.quantity,
                    condition,
                    notes.clone(),
                )
                .await?
                .ok_or_else(|| {
                    unavailable(
                        item.item_id,
                        format!("employee does not hold {} of this item", item.quantity),
                    )
                })?;
                effects.returns.extend(returned);
            }
            ItemType::Tool | ItemType::Machine => {
                let outcome = AssetMovement::checkin(
                    conn,
                    scope.company_id,
                    item.item_id,
                    scope.employee_id,
                    condition,
                    scope.context(notes),
                )
                .await?;
                effects.movements.push(movement(item.item_id, outcome)?);
            }
            ItemType::Supply => return Err(unavailable(item.item_id, "supplies are not returned")),
        }
    }
    Ok(())
}

async fn apply(
    conn: &mut PgConnection,
    scope: &Scope,
    items: &[ScannedItem],
    details: &Details,
) -> Result<Effects, WorkflowError> {
    let mut effects = Effects::default();

    match details {
        Details::Delivery(d) => {
            deliver_items(conn, scope, items, d.reason, d.expected_return_on, &d.notes, &mut effects).await?;
        }
        Details::Return(d) => {
            return_items(conn, scope, items, d.condition, &d.notes, &mut effects).await?;
        }
        Details::Exchange(d) => {
            for delivery_id in &d.replaced_delivery_ids {
                let held = PpeDelivery::lock(conn, scope.company_id, *delivery_id)
                    .await?
                    .filter(|row| row.employee_id == scope.employee_id);
                if held.is_none() {
                    return Err(unavailable(*delivery_id, "delivery does not belong to this employee"));
                }

                let data = ReturnDelivery {
                    condition: d.condition,
                    quantity: None,
                    notes: d.notes.clone(),
                };
                match PpeDelivery::return_delivery(conn, scope.company_id, *delivery_id, data).await? {
                    ReturnOutcome::Returned(row) => effects.returns.push(row),
                    ReturnOutcome::NotFound => return Err(unavailable(*delivery_id, "delivery not found")),
                    ReturnOutcome::AlreadyReturned => {
                        return Err(unavailable(*delivery_id, "delivery was already returned"))
                    }
                    ReturnOutcome::ExceedsHeld { .. } => {
                        return Err(unavailable(*delivery_id, "delivery holds fewer units"))
                    }
                }
            }

            for asset_id in &d.returned_asset_ids {
                let outcome = AssetMovement::checkin(
                    conn,
                    scope.company_id,
                    *asset_id,
                    scope.employee_id,
                    d.condition,
                    scope.context(&d.notes),
                )
                .await?;
                effects.movements.push(movement(*asset_id, outcome)?);
            }

            deliver_items(conn, scope, items, d.reason, None, &d.notes, &mut effects).await?;
        }
        Details::Application(d) => {
            for item in items {
                if item.item_type != ItemType::Supply {
                    return Err(unavailable(item.item_id, "only supplies can be applied"));
                }
                let outcome = AssetMovement::consume(
                    conn,
                    scope.company_id,
                    item.item_id,
                    scope.employee_id,
                    item.quantity,
                    d.work_site.trim().to_string(),
                    scope.context(&d.notes),
                )
                .await?;
                effects.movements.push(movement(item.item_id, outcome)?);
            }
        }
    }

    Ok(effects)
}

/// Completes a session at the confirm step
///
/// Returns `Ok(None)` when the session does not exist in the company.
pub async fn complete(
    pool: &PgPool,
    company_id: Uuid,
    session_id: Uuid,
    actor_id: Uuid,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<Option<CompletionOutcome>, WorkflowError> {
    let mut tx = pool.begin().await?;

    let Some(session) = WorkflowSession::lock(&mut tx, company_id, session_id).await? else {
        return Ok(None);
    };
    if session.is_expired(now) {
        return Err(WorkflowError::Expired);
    }

    let mut state: WorkflowState = session.state.0.clone();
    let (employee, items, details) = state.ready()?;
    let employee = employee.clone();
    let items = items.to_vec();
    let details = details.clone();

    let active: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM employees WHERE company_id = $1 AND id = $2 AND status = 'active')",
    )
    .bind(company_id)
    .bind(employee.id)
    .fetch_one(&mut *tx)
    .await?;
    if !active {
        return Err(WorkflowError::EmployeeUnavailable);
    }

    let scope = Scope {
        company_id,
        session_id,
        employee_id: employee.id,
        actor_id,
        now,
    };
    let effects = apply(&mut tx, &scope, &items, &details).await?;

    state.mark_complete(now)?;
    let session = WorkflowSession::save(&mut tx, company_id, session_id, &state, ttl).await?;

    let ids = |rows: &[PpeDelivery]| rows.iter().map(|row| row.id).collect::<Vec<_>>();
    AuditEntry::append(
        &mut tx,
        company_id,
        NewAuditEntry {
            actor_id: Some(actor_id),
            action: "workflow_completed",
            entity_type: "workflow_session",
            entity_id: Some(session_id),
            payload: json!({
                "kind": state.kind.as_str(),
                "employee_id": employee.id,
                "auth_method": employee.method,
                "items": items
                    .iter()
                    .map(|item| json!({"item_id": item.item_id, "item_type": item.item_type, "quantity": item.quantity}))
                    .collect::<Vec<_>>(),
                "deliveries": ids(&effects.deliveries),
                "returns": ids(&effects.returns),
                "movements": effects.movements.iter().map(|m| m.id).collect::<Vec<_>>(),
            }),
        },
    )
    .await?;

    Notification::create(
        &mut *tx,
        company_id,
        NewNotification {
            kind: NotificationKind::WorkflowCompleted,
            severity: Severity::Info,
            title: format!("{} workflow completed", capitalize(state.kind.as_str())),
            message: format!("{} item(s) for {}", state.total_quantity(), employee.name),
            entity_type: Some("workflow_session"),
            entity_id: Some(session_id),
            dedupe_key: NotificationKind::WorkflowCompleted.dedupe_key(session_id, "complete"),
        },
    )
    .await?;

    tx.commit().await?;

    tracing::info!(
        company_id = %company_id,
        session_id = %session_id,
        employee_id = %employee.id,
        kind = state.kind.as_str(),
        deliveries = effects.deliveries.len(),
        returns = effects.returns.len(),
        movements = effects.movements.len(),
        "Workflow completed"
    );

    Ok(Some(CompletionOutcome {
        session,
        deliveries: effects.deliveries,
        returns: effects.returns,
        movements: effects.movements,
    }))
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::asset::{AssetKind, AssetStatus};

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("delivery"), "Delivery");
        assert_eq!(capitalize(""), "");
    }

    #[test]
    fn test_movement_errors_name_the_item() {
        let id = Uuid::new_v4();

        let err = movement(id, MovementOutcome::Unavailable(AssetStatus::InUse)).unwrap_err();
        assert_eq!(err.to_string(), format!("Item {}: asset is in_use", id));

        let err = movement(id, MovementOutcome::WrongKind(AssetKind::Supply)).unwrap_err();
        assert!(err.to_string().contains("supply"));

        assert!(matches!(
            movement(id, MovementOutcome::UnknownEmployee),
            Err(WorkflowError::EmployeeUnavailable)
        ));
    }
}
