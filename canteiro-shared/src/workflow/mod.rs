//! QR workflow wizard
//!
//! A workflow walks an operator through one PPE/asset movement for one employee:
//!
//! ```text
//! authenticate ─▶ scan_items ─▶ details ─▶ confirm ─▶ complete
//!       ◀──────────── back ◀──────── back ◀────┘
//! ```
//!
//! | Kind          | Items accepted          | Effect on completion                          |
//! |---------------|-------------------------|-----------------------------------------------|
//! | `delivery`    | PPE, tools, machines    | PPE delivered from stock, assets checked out  |
//! | `return`      | PPE, tools, machines    | held PPE returned, assets checked in          |
//! | `exchange`    | PPE, tools, machines    | listed deliveries/assets returned, items delivered |
//! | `application` | supplies                | supplies consumed at a work site              |
//!
//! [`WorkflowState`] is the pure state machine; it is stored as JSONB on the session row.
//! Database effects live in [`completion`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::asset::AssetKind;
use crate::models::ppe_delivery::{DeliveryReason, ItemCondition};

/// Largest quantity one scanned line may carry, merged scans included
pub const MAX_ITEM_QUANTITY: i32 = 1000;

pub mod completion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "workflow_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Delivery,
    Return,
    Exchange,
    Application,
}

impl WorkflowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::Delivery => "delivery",
            WorkflowKind::Return => "return",
            WorkflowKind::Exchange => "exchange",
            WorkflowKind::Application => "application",
        }
    }

    /// Whether items of this type may be scanned in this kind of workflow
    pub fn accepts(&self, item_type: ItemType) -> bool {
        match self {
            WorkflowKind::Application => item_type == ItemType::Supply,
            WorkflowKind::Delivery | WorkflowKind::Return | WorkflowKind::Exchange => {
                item_type != ItemType::Supply
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "workflow_step", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    Authenticate,
    ScanItems,
    Details,
    Confirm,
    Complete,
}

impl WorkflowStep {
    /// Step reached by `back`, if any
    pub fn previous(&self) -> Option<WorkflowStep> {
        match self {
            WorkflowStep::Authenticate | WorkflowStep::Complete => None,
            WorkflowStep::ScanItems => Some(WorkflowStep::Authenticate),
            WorkflowStep::Details => Some(WorkflowStep::ScanItems),
            WorkflowStep::Confirm => Some(WorkflowStep::Details),
        }
    }
}

/// How the employee was identified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    QrCode,
    Face,
    Fingerprint,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedEmployee {
    pub id: Uuid,
    pub name: String,
    pub method: AuthMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Ppe,
    Tool,
    Machine,
    Supply,
}

impl From<AssetKind> for ItemType {
    fn from(kind: AssetKind) -> Self {
        match kind {
            AssetKind::Tool => ItemType::Tool,
            AssetKind::Machine => ItemType::Machine,
            AssetKind::Supply => ItemType::Supply,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannedItem {
    pub item_id: Uuid,
    pub item_type: ItemType,
    pub name: String,
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryDetails {
    #[serde(default)]
    pub reason: DeliveryReason,
    pub expected_return_on: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnDetails {
    pub condition: ItemCondition,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeDetails {
    /// Active PPE delivery rows being replaced
    #[serde(default)]
    pub replaced_delivery_ids: Vec<Uuid>,
    /// Tools or machines handed back in the exchange
    #[serde(default)]
    pub returned_asset_ids: Vec<Uuid>,
    /// Condition of what is handed back
    pub condition: ItemCondition,
    #[serde(default = "replacement")]
    pub reason: DeliveryReason,
    pub notes: Option<String>,
}

fn replacement() -> DeliveryReason {
    DeliveryReason::Replacement
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationDetails {
    pub work_site: String,
    pub notes: Option<String>,
}

/// Flow-specific details, tagged by workflow kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Details {
    Delivery(DeliveryDetails),
    Return(ReturnDetails),
    Exchange(ExchangeDetails),
    Application(ApplicationDetails),
}

impl Details {
    pub fn kind(&self) -> WorkflowKind {
        match self {
            Details::Delivery(_) => WorkflowKind::Delivery,
            Details::Return(_) => WorkflowKind::Return,
            Details::Exchange(_) => WorkflowKind::Exchange,
            Details::Application(_) => WorkflowKind::Application,
        }
    }

    fn check(&self, today: NaiveDate) -> Result<(), WorkflowError> {
        let notes = match self {
            Details::Delivery(d) => {
                if d.expected_return_on.is_some_and(|date| date < today) {
                    return Err(WorkflowError::InvalidDetails("expected return date is in the past"));
                }
                &d.notes
            }
            Details::Return(d) => &d.notes,
            Details::Exchange(d) => {
                if d.replaced_delivery_ids.is_empty() && d.returned_asset_ids.is_empty() {
                    return Err(WorkflowError::InvalidDetails(
                        "an exchange must hand back at least one delivery or asset",
                    ));
                }
                &d.notes
            }
            Details::Application(d) => {
                if d.work_site.trim().is_empty() {
                    return Err(WorkflowError::InvalidDetails("work site is required"));
                }
                if d.work_site.len() > 255 {
                    return Err(WorkflowError::InvalidDetails("work site is too long"));
                }
                &d.notes
            }
        };

        if notes.as_ref().is_some_and(|n| n.len() > 2000) {
            return Err(WorkflowError::InvalidDetails("notes are too long"));
        }
        Ok(())
    }
}

/// Error type for workflow operations
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow is at step {actual:?}, expected {expected:?}")]
    WrongStep {
        expected: WorkflowStep,
        actual: WorkflowStep,
    },

    #[error("Cannot go back from step {0:?}")]
    CannotGoBack(WorkflowStep),

    #[error("A {kind:?} workflow does not accept {item_type:?} items")]
    ItemNotAllowed { kind: WorkflowKind, item_type: ItemType },

    #[error("Quantity must be between 1 and 1000")]
    InvalidQuantity,

    #[error("Item {0} is not in the list")]
    ItemNotFound(Uuid),

    #[error("Scan at least one item first")]
    NoItems,

    #[error("Details for a {got:?} workflow sent to a {expected:?} workflow")]
    DetailsMismatch { expected: WorkflowKind, got: WorkflowKind },

    #[error("Invalid details: {0}")]
    InvalidDetails(&'static str),

    #[error("Workflow session has expired")]
    Expired,

    #[error("Workflow is already complete")]
    AlreadyComplete,

    #[error("Employee can no longer take part in this workflow")]
    EmployeeUnavailable,

    #[error("Item {item_id}: {reason}")]
    ItemUnavailable { item_id: Uuid, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Wizard state persisted with the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub kind: WorkflowKind,
    pub step: WorkflowStep,
    pub employee: Option<AuthenticatedEmployee>,
    pub items: Vec<ScannedItem>,
    pub details: Option<Details>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkflowState {
    pub fn new(kind: WorkflowKind, now: DateTime<Utc>) -> Self {
        Self {
            kind,
            step: WorkflowStep::Authenticate,
            employee: None,
            items: Vec::new(),
            details: None,
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    fn expect_step(&self, expected: WorkflowStep) -> Result<(), WorkflowError> {
        if self.step == WorkflowStep::Complete {
            return Err(WorkflowError::AlreadyComplete);
        }
        if self.step != expected {
            return Err(WorkflowError::WrongStep {
                expected,
                actual: self.step,
            });
        }
        Ok(())
    }

    pub fn authenticate(&mut self, employee: AuthenticatedEmployee, now: DateTime<Utc>) -> Result<(), WorkflowError> {
        self.expect_step(WorkflowStep::Authenticate)?;

        // A different employee invalidates what was scanned for the previous one
        if self.employee.as_ref().is_some_and(|e| e.id != employee.id) {
            self.items.clear();
            self.details = None;
        }

        self.employee = Some(employee);
        self.step = WorkflowStep::ScanItems;
        self.updated_at = now;
        Ok(())
    }

    /// Adds a scanned item, merging repeated scans
    ///
    /// Tools and machines are single units: scanning one already in the list changes nothing.
    pub fn add_item(&mut self, item: ScannedItem, now: DateTime<Utc>) -> Result<(), WorkflowError> {
        self.expect_step(WorkflowStep::ScanItems)?;

        if !(1..=MAX_ITEM_QUANTITY).contains(&item.quantity) {
            return Err(WorkflowError::InvalidQuantity);
        }
        if !self.kind.accepts(item.item_type) {
            return Err(WorkflowError::ItemNotAllowed {
                kind: self.kind,
                item_type: item.item_type,
            });
        }

        let lendable = matches!(item.item_type, ItemType::Tool | ItemType::Machine);
        match self.items.iter_mut().find(|existing| existing.item_id == item.item_id) {
            Some(_) if lendable => {}
            Some(existing) => {
                existing.quantity = existing
                    .quantity
                    .checked_add(item.quantity)
                    .filter(|total| *total <= MAX_ITEM_QUANTITY)
                    .ok_or(WorkflowError::InvalidQuantity)?;
            }
            None if lendable => self.items.push(ScannedItem { quantity: 1, ..item }),
            None => self.items.push(item),
        }

        self.updated_at = now;
        Ok(())
    }

    pub fn remove_item(&mut self, item_id: Uuid, now: DateTime<Utc>) -> Result<(), WorkflowError> {
        self.expect_step(WorkflowStep::ScanItems)?;

        let before = self.items.len();
        self.items.retain(|item| item.item_id != item_id);
        if self.items.len() == before {
            return Err(WorkflowError::ItemNotFound(item_id));
        }

        self.updated_at = now;
        Ok(())
    }

    pub fn finish_scanning(&mut self, now: DateTime<Utc>) -> Result<(), WorkflowError> {
        self.expect_step(WorkflowStep::ScanItems)?;

        if self.items.is_empty() {
            return Err(WorkflowError::NoItems);
        }

        self.step = WorkflowStep::Details;
        self.updated_at = now;
        Ok(())
    }

    pub fn set_details(&mut self, details: Details, now: DateTime<Utc>) -> Result<(), WorkflowError> {
        self.expect_step(WorkflowStep::Details)?;

        if details.kind() != self.kind {
            return Err(WorkflowError::DetailsMismatch {
                expected: self.kind,
                got: details.kind(),
            });
        }
        details.check(now.date_naive())?;

        self.details = Some(details);
        self.step = WorkflowStep::Confirm;
        self.updated_at = now;
        Ok(())
    }

    /// Moves one step back, keeping employee, items and details
    pub fn back(&mut self, now: DateTime<Utc>) -> Result<(), WorkflowError> {
        let previous = self.step.previous().ok_or(WorkflowError::CannotGoBack(self.step))?;

        self.step = previous;
        self.updated_at = now;
        Ok(())
    }

    /// Everything completion needs, available only at the confirm step
    pub fn ready(&self) -> Result<(&AuthenticatedEmployee, &[ScannedItem], &Details), WorkflowError> {
        self.expect_step(WorkflowStep::Confirm)?;

        match (&self.employee, &self.details) {
            (Some(employee), Some(details)) if !self.items.is_empty() => Ok((employee, &self.items, details)),
            (None, _) => Err(WorkflowError::WrongStep {
                expected: WorkflowStep::Authenticate,
                actual: self.step,
            }),
            (_, None) => Err(WorkflowError::WrongStep {
                expected: WorkflowStep::Details,
                actual: self.step,
            }),
            _ => Err(WorkflowError::NoItems),
        }
    }

    pub fn mark_complete(&mut self, now: DateTime<Utc>) -> Result<(), WorkflowError> {
        self.ready()?;

        self.step = WorkflowStep::Complete;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Total quantity scanned
    pub fn total_quantity(&self) -> i64 {
        self.items.iter().map(|item| i64::from(item.quantity)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn employee() -> AuthenticatedEmployee {
        AuthenticatedEmployee {
            id: Uuid::new_v4(),
            name: "João da Silva".to_string(),
            method: AuthMethod::QrCode,
        }
    }

    fn item(item_type: ItemType, quantity: i32) -> ScannedItem {
        ScannedItem {
            item_id: Uuid::new_v4(),
            item_type,
            name: "Luva de vaqueta".to_string(),
            quantity,
        }
    }

    fn delivery_details() -> Details {
        Details::Delivery(DeliveryDetails {
            reason: DeliveryReason::FirstIssue,
            expected_return_on: None,
            notes: None,
        })
    }

    fn at_confirm() -> WorkflowState {
        let now = Utc::now();
        let mut state = WorkflowState::new(WorkflowKind::Delivery, now);
        state.authenticate(employee(), now).unwrap();
        state.add_item(item(ItemType::Ppe, 2), now).unwrap();
        state.finish_scanning(now).unwrap();
        state.set_details(delivery_details(), now).unwrap();
        state
    }

    #[test]
    fn test_happy_path() {
        let mut state = at_confirm();
        assert_eq!(state.step, WorkflowStep::Confirm);
        assert!(state.ready().is_ok());

        state.mark_complete(Utc::now()).unwrap();
        assert_eq!(state.step, WorkflowStep::Complete);
        assert!(state.completed_at.is_some());
    }

    #[test]
    fn test_steps_are_enforced() {
        let now = Utc::now();
        let mut state = WorkflowState::new(WorkflowKind::Delivery, now);

        let err = state.add_item(item(ItemType::Ppe, 1), now).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::WrongStep {
                expected: WorkflowStep::ScanItems,
                actual: WorkflowStep::Authenticate
            }
        ));
        assert!(state.finish_scanning(now).is_err());
        assert!(state.set_details(delivery_details(), now).is_err());
        assert!(state.ready().is_err());
    }

    #[test]
    fn test_repeated_scan_increments_quantity() {
        let now = Utc::now();
        let mut state = WorkflowState::new(WorkflowKind::Delivery, now);
        state.authenticate(employee(), now).unwrap();

        let glove = item(ItemType::Ppe, 1);
        state.add_item(glove.clone(), now).unwrap();
        state.add_item(ScannedItem { quantity: 3, ..glove.clone() }, now).unwrap();

        assert_eq!(state.items.len(), 1);
        assert_eq!(state.items[0].quantity, 4);
        assert_eq!(state.total_quantity(), 4);
    }

    #[test]
    fn test_tools_are_single_units() {
        let now = Utc::now();
        let mut state = WorkflowState::new(WorkflowKind::Delivery, now);
        state.authenticate(employee(), now).unwrap();

        let drill = item(ItemType::Tool, 5);
        state.add_item(drill.clone(), now).unwrap();
        state.add_item(drill, now).unwrap();

        assert_eq!(state.items.len(), 1);
        assert_eq!(state.items[0].quantity, 1);
    }

    #[test]
    fn test_item_rules() {
        let now = Utc::now();
        let mut state = WorkflowState::new(WorkflowKind::Application, now);
        state.authenticate(employee(), now).unwrap();

        assert!(matches!(
            state.add_item(item(ItemType::Ppe, 1), now),
            Err(WorkflowError::ItemNotAllowed { .. })
        ));
        assert!(matches!(
            state.add_item(item(ItemType::Supply, 0), now),
            Err(WorkflowError::InvalidQuantity)
        ));
        assert!(state.add_item(item(ItemType::Supply, 10), now).is_ok());

        let mut delivery = WorkflowState::new(WorkflowKind::Delivery, now);
        delivery.authenticate(employee(), now).unwrap();
        assert!(delivery.add_item(item(ItemType::Supply, 1), now).is_err());
        assert!(delivery.add_item(item(ItemType::Machine, 1), now).is_ok());
    }

    #[test]
    fn test_merged_quantity_is_capped() {
        let now = Utc::now();
        let mut state = WorkflowState::new(WorkflowKind::Delivery, now);
        state.authenticate(employee(), now).unwrap();

        let gloves = item(ItemType::Ppe, MAX_ITEM_QUANTITY - 1);
        state.add_item(gloves.clone(), now).unwrap();
        state.add_item(ScannedItem { quantity: 1, ..gloves.clone() }, now).unwrap();
        assert_eq!(state.items[0].quantity, MAX_ITEM_QUANTITY);

        assert!(matches!(
            state.add_item(ScannedItem { quantity: 1, ..gloves.clone() }, now),
            Err(WorkflowError::InvalidQuantity)
        ));
        assert!(matches!(
            state.add_item(ScannedItem { quantity: i32::MAX, ..gloves }, now),
            Err(WorkflowError::InvalidQuantity)
        ));
        assert_eq!(state.items[0].quantity, MAX_ITEM_QUANTITY);
        assert!(matches!(
            state.add_item(item(ItemType::Ppe, MAX_ITEM_QUANTITY + 1), now),
            Err(WorkflowError::InvalidQuantity)
        ));
    }

    #[test]
    fn test_remove_and_finish() {
        let now = Utc::now();
        let mut state = WorkflowState::new(WorkflowKind::Return, now);
        state.authenticate(employee(), now).unwrap();

        assert!(matches!(state.finish_scanning(now), Err(WorkflowError::NoItems)));

        let helmet = item(ItemType::Ppe, 1);
        state.add_item(helmet.clone(), now).unwrap();
        state.remove_item(helmet.item_id, now).unwrap();
        assert!(matches!(
            state.remove_item(helmet.item_id, now),
            Err(WorkflowError::ItemNotFound(_))
        ));
        assert!(state.finish_scanning(now).is_err());
    }

    #[test]
    fn test_back_preserves_employee_and_items() {
        let mut state = at_confirm();
        let employee = state.employee.clone();
        let items = state.items.clone();
        let now = Utc::now();

        state.back(now).unwrap();
        assert_eq!(state.step, WorkflowStep::Details);
        state.back(now).unwrap();
        assert_eq!(state.step, WorkflowStep::ScanItems);
        state.back(now).unwrap();
        assert_eq!(state.step, WorkflowStep::Authenticate);

        assert_eq!(state.employee, employee);
        assert_eq!(state.items, items);
        assert!(state.details.is_some());
        assert!(matches!(
            state.back(now),
            Err(WorkflowError::CannotGoBack(WorkflowStep::Authenticate))
        ));
    }

    #[test]
    fn test_reauthenticating_same_employee_keeps_items() {
        let mut state = at_confirm();
        let now = Utc::now();
        let same = state.employee.clone().unwrap();
        for _ in 0..3 {
            state.back(now).unwrap();
        }

        state.authenticate(same, now).unwrap();
        assert_eq!(state.items.len(), 1);

        state.back(now).unwrap();
        state.authenticate(employee(), now).unwrap();
        assert!(state.items.is_empty());
        assert!(state.details.is_none());
    }

    #[test]
    fn test_details_must_match_kind() {
        let now = Utc::now();
        let mut state = WorkflowState::new(WorkflowKind::Return, now);
        state.authenticate(employee(), now).unwrap();
        state.add_item(item(ItemType::Ppe, 1), now).unwrap();
        state.finish_scanning(now).unwrap();

        assert!(matches!(
            state.set_details(delivery_details(), now),
            Err(WorkflowError::DetailsMismatch { .. })
        ));
        state
            .set_details(
                Details::Return(ReturnDetails {
                    condition: ItemCondition::Worn,
                    notes: None,
                }),
                now,
            )
            .unwrap();
        assert_eq!(state.step, WorkflowStep::Confirm);
    }

    #[test]
    fn test_details_checks() {
        let now = Utc::now();

        let exchange = Details::Exchange(ExchangeDetails {
            replaced_delivery_ids: vec![],
            returned_asset_ids: vec![],
            condition: ItemCondition::Damaged,
            reason: DeliveryReason::Damage,
            notes: None,
        });
        assert!(exchange.check(now.date_naive()).is_err());

        let application = Details::Application(ApplicationDetails {
            work_site: "   ".to_string(),
            notes: None,
        });
        assert!(application.check(now.date_naive()).is_err());

        let past = Details::Delivery(DeliveryDetails {
            reason: DeliveryReason::FirstIssue,
            expected_return_on: NaiveDate::from_ymd_opt(2000, 1, 1),
            notes: None,
        });
        assert!(past.check(now.date_naive()).is_err());
    }

    #[test]
    fn test_details_json_shape() {
        let details: Details = serde_json::from_str(
            r#"{"kind":"exchange","replaced_delivery_ids":["550e8400-e29b-41d4-a716-446655440000"],"condition":"damaged"}"#,
        )
        .unwrap();
        match details {
            Details::Exchange(d) => {
                assert_eq!(d.reason, DeliveryReason::Replacement);
                assert_eq!(d.replaced_delivery_ids.len(), 1);
                assert!(d.returned_asset_ids.is_empty());
            }
            other => panic!("unexpected details: {:?}", other),
        }
    }

    #[test]
    fn test_complete_is_final() {
        let mut state = at_confirm();
        let now = Utc::now();
        state.mark_complete(now).unwrap();

        assert!(matches!(state.back(now), Err(WorkflowError::CannotGoBack(WorkflowStep::Complete))));
        assert!(matches!(state.mark_complete(now), Err(WorkflowError::AlreadyComplete)));
        assert!(matches!(
            state.add_item(item(ItemType::Ppe, 1), now),
            Err(WorkflowError::AlreadyComplete)
        ));
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let state = at_confirm();
        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["step"], "confirm");
        assert_eq!(value["details"]["kind"], "delivery");
        let back: WorkflowState = serde_json::from_value(value).unwrap();
        assert_eq!(back, state);
    }
}
