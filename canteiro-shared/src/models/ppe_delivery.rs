//! PPE deliveries
//!
//! One row per delivered line. A row is active while `returned_at` is null; returning it
//! records the condition and, for items still usable, puts the quantity back in stock.
//!
//! Every stock change happens on a caller-provided connection so that direct deliveries
//! and workflow completion can wrap it in their own transaction together with the audit
//! entry.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use std::borrow::Cow;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::ppe_item::PpeItem;
use super::{Page, PageRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "delivery_reason", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeliveryReason {
    #[default]
    FirstIssue,
    Replacement,
    Loss,
    Damage,
}

/// Condition of a returned PPE line or asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "item_condition", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ItemCondition {
    Good,
    Worn,
    Damaged,
    Lost,
}

impl ItemCondition {
    /// Whether a returned item goes back to stock
    pub fn restocks(&self) -> bool {
        matches!(self, ItemCondition::Good | ItemCondition::Worn)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PpeDelivery {
    pub id: Uuid,
    pub company_id: Uuid,
    pub employee_id: Uuid,
    pub ppe_item_id: Uuid,
    pub quantity: i32,
    pub reason: DeliveryReason,
    pub delivered_on: NaiveDate,
    pub expected_return_on: Option<NaiveDate>,
    pub returned_at: Option<DateTime<Utc>>,
    pub return_condition: Option<ItemCondition>,
    pub notes: Option<String>,
    pub workflow_session_id: Option<Uuid>,
    pub delivered_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PpeDelivery {
    pub fn is_active(&self) -> bool {
        self.returned_at.is_none()
    }
}

/// Active PPE of an employee with catalog details
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ActivePpe {
    pub delivery_id: Uuid,
    pub ppe_item_id: Uuid,
    pub name: String,
    pub category: String,
    pub ca_number: String,
    pub size: Option<String>,
    pub quantity: i32,
    pub reason: DeliveryReason,
    pub delivered_on: NaiveDate,
    pub expected_return_on: Option<NaiveDate>,
}

/// Direct delivery request body
#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "check_return_date"))]
pub struct CreateDelivery {
    pub ppe_item_id: Uuid,

    #[serde(default = "default_quantity")]
    #[validate(range(min = 1, max = 1000, message = "Quantity must be between 1 and 1000"))]
    pub quantity: i32,

    #[serde(default)]
    pub reason: DeliveryReason,

    pub delivered_on: NaiveDate,

    pub expected_return_on: Option<NaiveDate>,

    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

fn default_quantity() -> i32 {
    1
}

fn check_return_date(data: &CreateDelivery) -> Result<(), ValidationError> {
    match data.expected_return_on {
        Some(date) if date < data.delivered_on => {
            let mut err = ValidationError::new("expected_return_on");
            err.message = Some(Cow::Borrowed("Expected return must not precede the delivery"));
            Err(err)
        }
        _ => Ok(()),
    }
}

impl CreateDelivery {
    pub fn into_new(self, employee_id: Uuid, delivered_by: Option<Uuid>) -> NewDelivery {
        NewDelivery {
            employee_id,
            ppe_item_id: self.ppe_item_id,
            quantity: self.quantity,
            reason: self.reason,
            delivered_on: self.delivered_on,
            expected_return_on: self.expected_return_on,
            notes: self.notes,
            workflow_session_id: None,
            delivered_by,
        }
    }
}

/// A delivery ready to be written
#[derive(Debug, Clone)]
pub struct NewDelivery {
    pub employee_id: Uuid,
    pub ppe_item_id: Uuid,
    pub quantity: i32,
    pub reason: DeliveryReason,
    pub delivered_on: NaiveDate,
    pub expected_return_on: Option<NaiveDate>,
    pub notes: Option<String>,
    pub workflow_session_id: Option<Uuid>,
    pub delivered_by: Option<Uuid>,
}

/// Return request body
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ReturnDelivery {
    pub condition: ItemCondition,

    /// Units handed back; the whole line when absent
    #[validate(range(min = 1, max = 1000, message = "Quantity must be between 1 and 1000"))]
    pub quantity: Option<i32>,

    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeliveryFilter {
    pub employee_id: Option<Uuid>,
    pub ppe_item_id: Option<Uuid>,
    /// `true` for rows not yet returned, `false` for returned rows
    pub active: Option<bool>,
    pub reason: Option<DeliveryReason>,
    pub delivered_from: Option<NaiveDate>,
    pub delivered_to: Option<NaiveDate>,
}

#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered(PpeDelivery),
    UnknownEmployee,
    UnknownItem,
    InsufficientStock { available: i32 },
}

#[derive(Debug)]
pub enum ReturnOutcome {
    Returned(PpeDelivery),
    NotFound,
    AlreadyReturned,
    /// More units requested than the line holds
    ExceedsHeld { held: i32 },
}

/// Expected return date: the explicit one, else delivery date plus the replacement period
pub fn expected_return(
    delivered_on: NaiveDate,
    explicit: Option<NaiveDate>,
    replacement_days: Option<i32>,
) -> Option<NaiveDate> {
    explicit.or_else(|| replacement_days.map(|days| delivered_on + Duration::days(i64::from(days))))
}

const COLUMNS: &str = "id, company_id, employee_id, ppe_item_id, quantity, reason, delivered_on, \
                       expected_return_on, returned_at, return_condition, notes, workflow_session_id, \
                       delivered_by, created_at, updated_at";

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, company_id: Uuid, filter: &DeliveryFilter, page: &PageRequest) {
    qb.push(" WHERE company_id = ").push_bind(company_id);

    if let Some(employee_id) = filter.employee_id {
        qb.push(" AND employee_id = ").push_bind(employee_id);
    }
    if let Some(item_id) = filter.ppe_item_id {
        qb.push(" AND ppe_item_id = ").push_bind(item_id);
    }
    match filter.active {
        Some(true) => {
            qb.push(" AND returned_at IS NULL");
        }
        Some(false) => {
            qb.push(" AND returned_at IS NOT NULL");
        }
        None => {}
    }
    if let Some(reason) = filter.reason {
        qb.push(" AND reason = ").push_bind(reason);
    }
    if let Some(from) = filter.delivered_from {
        qb.push(" AND delivered_on >= ").push_bind(from);
    }
    if let Some(to) = filter.delivered_to {
        qb.push(" AND delivered_on <= ").push_bind(to);
    }
    if let Some(pattern) = &page.search {
        qb.push(" AND notes ILIKE ").push_bind(pattern.clone());
    }
}

impl PpeDelivery {
    pub const SORTABLE: &'static [&'static str] =
        &["delivered_on", "expected_return_on", "quantity", "created_at"];

    /// Delivers PPE to an employee, taking the quantity out of stock
    ///
    /// The item row stays locked until the caller's transaction ends.
    pub async fn deliver(
        conn: &mut PgConnection,
        company_id: Uuid,
        delivery: NewDelivery,
    ) -> Result<DeliveryOutcome, sqlx::Error> {
        let employee: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM employees WHERE company_id = $1 AND id = $2 AND status <> 'terminated'",
        )
        .bind(company_id)
        .bind(delivery.employee_id)
        .fetch_optional(&mut *conn)
        .await?;
        if employee.is_none() {
            return Ok(DeliveryOutcome::UnknownEmployee);
        }

        let Some(item) = PpeItem::lock(conn, company_id, delivery.ppe_item_id).await? else {
            return Ok(DeliveryOutcome::UnknownItem);
        };
        if item.stock_quantity < delivery.quantity {
            return Ok(DeliveryOutcome::InsufficientStock {
                available: item.stock_quantity,
            });
        }

        if PpeItem::adjust_stock(conn, company_id, item.id, -delivery.quantity)
            .await?
            .is_none()
        {
            return Ok(DeliveryOutcome::InsufficientStock {
                available: item.stock_quantity,
            });
        }

        let expected = expected_return(
            delivery.delivered_on,
            delivery.expected_return_on,
            item.replacement_days,
        );

        let row = sqlx::query_as::<_, PpeDelivery>(&format!(
            r#"
            INSERT INTO ppe_deliveries
                (company_id, employee_id, ppe_item_id, quantity, reason, delivered_on,
                 expected_return_on, notes, workflow_session_id, delivered_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(company_id)
        .bind(delivery.employee_id)
        .bind(item.id)
        .bind(delivery.quantity)
        .bind(delivery.reason)
        .bind(delivery.delivered_on)
        .bind(expected)
        .bind(delivery.notes)
        .bind(delivery.workflow_session_id)
        .bind(delivery.delivered_by)
        .fetch_one(&mut *conn)
        .await?;

        Ok(DeliveryOutcome::Delivered(row))
    }

    /// Loads a delivery row and locks it
    pub async fn lock(conn: &mut PgConnection, company_id: Uuid, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let row = sqlx::query_as::<_, PpeDelivery>(&format!(
            "SELECT {} FROM ppe_deliveries WHERE company_id = $1 AND id = $2 FOR UPDATE",
            COLUMNS
        ))
        .bind(company_id)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row)
    }

    /// Closes an active row and restocks usable items
    async fn close(
        conn: &mut PgConnection,
        delivery: &PpeDelivery,
        condition: ItemCondition,
        notes: Option<String>,
    ) -> Result<PpeDelivery, sqlx::Error> {
        let row = sqlx::query_as::<_, PpeDelivery>(&format!(
            r#"
            UPDATE ppe_deliveries
            SET returned_at = NOW(), return_condition = $3, notes = COALESCE($4, notes), updated_at = NOW()
            WHERE company_id = $1 AND id = $2
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(delivery.company_id)
        .bind(delivery.id)
        .bind(condition)
        .bind(notes)
        .fetch_one(&mut *conn)
        .await?;

        if condition.restocks() {
            PpeItem::adjust_stock(conn, delivery.company_id, delivery.ppe_item_id, delivery.quantity).await?;
        }

        Ok(row)
    }

    /// Returns one delivery row
    pub async fn return_delivery(
        conn: &mut PgConnection,
        company_id: Uuid,
        id: Uuid,
        data: ReturnDelivery,
    ) -> Result<ReturnOutcome, sqlx::Error> {
        let Some(delivery) = Self::lock(conn, company_id, id).await? else {
            return Ok(ReturnOutcome::NotFound);
        };
        if !delivery.is_active() {
            return Ok(ReturnOutcome::AlreadyReturned);
        }

        let returning = match data.quantity {
            Some(quantity) if quantity > delivery.quantity => {
                return Ok(ReturnOutcome::ExceedsHeld {
                    held: delivery.quantity,
                })
            }
            Some(quantity) if quantity < delivery.quantity => Self::split_off(conn, &delivery, quantity).await?,
            _ => delivery,
        };
        let row = Self::close(conn, &returning, data.condition, data.notes).await?;

        Ok(ReturnOutcome::Returned(row))
    }

    /// Moves `quantity` units of an active row into a new row with the same delivery data
    ///
    /// The original keeps the rest and stays active. The new row is returned.
    async fn split_off(
        conn: &mut PgConnection,
        delivery: &PpeDelivery,
        quantity: i32,
    ) -> Result<PpeDelivery, sqlx::Error> {
        sqlx::query("UPDATE ppe_deliveries SET quantity = quantity - $2, updated_at = NOW() WHERE id = $1")
            .bind(delivery.id)
            .bind(quantity)
            .execute(&mut *conn)
            .await?;

        let split = sqlx::query_as::<_, PpeDelivery>(&format!(
            r#"
            INSERT INTO ppe_deliveries
                (company_id, employee_id, ppe_item_id, quantity, reason, delivered_on,
                 expected_return_on, notes, workflow_session_id, delivered_by)
            SELECT company_id, employee_id, ppe_item_id, $2, reason, delivered_on,
                   expected_return_on, notes, workflow_session_id, delivered_by
            FROM ppe_deliveries WHERE id = $1
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(delivery.id)
        .bind(quantity)
        .fetch_one(&mut *conn)
        .await?;

        Ok(split)
    }

    /// Returns `quantity` units of an item held by an employee, oldest deliveries first
    ///
    /// A row holding more than what remains is split: its quantity shrinks and a returned
    /// row is written for the returned part. Returns `None` when the employee holds less
    /// than `quantity`.
    pub async fn return_quantity(
        conn: &mut PgConnection,
        company_id: Uuid,
        employee_id: Uuid,
        ppe_item_id: Uuid,
        quantity: i32,
        condition: ItemCondition,
        notes: Option<String>,
    ) -> Result<Option<Vec<PpeDelivery>>, sqlx::Error> {
        let open = sqlx::query_as::<_, PpeDelivery>(&format!(
            r#"
            SELECT {}
            FROM ppe_deliveries
            WHERE company_id = $1 AND employee_id = $2 AND ppe_item_id = $3 AND returned_at IS NULL
            ORDER BY delivered_on, created_at
            FOR UPDATE
            "#,
            COLUMNS
        ))
        .bind(company_id)
        .bind(employee_id)
        .bind(ppe_item_id)
        .fetch_all(&mut *conn)
        .await?;

        let held: i32 = open.iter().map(|d| d.quantity).sum();
        if held < quantity {
            return Ok(None);
        }

        let mut remaining = quantity;
        let mut returned = Vec::new();
        for delivery in open {
            if remaining == 0 {
                break;
            }

            if delivery.quantity <= remaining {
                remaining -= delivery.quantity;
                returned.push(Self::close(conn, &delivery, condition, notes.clone()).await?);
                continue;
            }

            let split = Self::split_off(conn, &delivery, remaining).await?;
            returned.push(Self::close(conn, &split, condition, notes.clone()).await?);
            remaining = 0;
        }

        Ok(Some(returned))
    }

    pub async fn find_by_id(pool: &PgPool, company_id: Uuid, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let row = sqlx::query_as::<_, PpeDelivery>(&format!(
            "SELECT {} FROM ppe_deliveries WHERE company_id = $1 AND id = $2",
            COLUMNS
        ))
        .bind(company_id)
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(row)
    }

    pub async fn list(
        pool: &PgPool,
        company_id: Uuid,
        filter: &DeliveryFilter,
        page: &PageRequest,
    ) -> Result<Page<Self>, sqlx::Error> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM ppe_deliveries");
        push_filters(&mut count, company_id, filter, page);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(pool).await?;

        let mut query = QueryBuilder::new(format!("SELECT {} FROM ppe_deliveries", COLUMNS));
        push_filters(&mut query, company_id, filter, page);
        page.push_tail(&mut query);
        let items = query.build_query_as::<PpeDelivery>().fetch_all(pool).await?;

        Ok(Page::new(items, total, page))
    }

    /// PPE currently held by an employee
    pub async fn active_for_employee(
        pool: &PgPool,
        company_id: Uuid,
        employee_id: Uuid,
    ) -> Result<Vec<ActivePpe>, sqlx::Error> {
        let rows = sqlx::query_as::<_, ActivePpe>(
            r#"
            SELECT d.id AS delivery_id, d.ppe_item_id, i.name, i.category, i.ca_number, i.size,
                   d.quantity, d.reason, d.delivered_on, d.expected_return_on
            FROM ppe_deliveries d
            JOIN ppe_items i ON i.id = d.ppe_item_id
            WHERE d.company_id = $1 AND d.employee_id = $2 AND d.returned_at IS NULL
            ORDER BY d.delivered_on DESC, i.name
            "#,
        )
        .bind(company_id)
        .bind(employee_id)
        .fetch_all(pool)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restock_conditions() {
        assert!(ItemCondition::Good.restocks());
        assert!(ItemCondition::Worn.restocks());
        assert!(!ItemCondition::Damaged.restocks());
        assert!(!ItemCondition::Lost.restocks());
    }

    #[test]
    fn test_return_quantity_is_optional() {
        let whole: ReturnDelivery = serde_json::from_value(serde_json::json!({ "condition": "worn" })).unwrap();
        assert_eq!(whole.quantity, None);
        assert!(whole.validate().is_ok());

        let none: ReturnDelivery =
            serde_json::from_value(serde_json::json!({ "condition": "good", "quantity": 0 })).unwrap();
        assert!(none.validate().unwrap_err().field_errors().contains_key("quantity"));
    }

    #[test]
    fn test_expected_return() {
        let delivered = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        let explicit = NaiveDate::from_ymd_opt(2025, 2, 1).unwrap();

        assert_eq!(expected_return(delivered, Some(explicit), Some(90)), Some(explicit));
        assert_eq!(
            expected_return(delivered, None, Some(90)),
            NaiveDate::from_ymd_opt(2025, 4, 10)
        );
        assert_eq!(expected_return(delivered, None, None), None);
    }

    #[test]
    fn test_create_delivery_defaults_and_checks() {
        let item = Uuid::new_v4();
        let data: CreateDelivery = serde_json::from_str(&format!(
            r#"{{"ppe_item_id":"{}","delivered_on":"2025-03-01"}}"#,
            item
        ))
        .unwrap();
        assert_eq!(data.quantity, 1);
        assert_eq!(data.reason, DeliveryReason::FirstIssue);
        assert!(data.validate().is_ok());

        let employee = Uuid::new_v4();
        let new = data.into_new(employee, None);
        assert_eq!(new.employee_id, employee);
        assert_eq!(new.ppe_item_id, item);
        assert!(new.workflow_session_id.is_none());

        let data: CreateDelivery = serde_json::from_str(&format!(
            r#"{{"ppe_item_id":"{}","delivered_on":"2025-03-01","expected_return_on":"2025-02-01","quantity":0}}"#,
            item
        ))
        .unwrap();
        let errors = data.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("quantity"));
        assert!(errors.field_errors().contains_key("__all__"));
    }
}
