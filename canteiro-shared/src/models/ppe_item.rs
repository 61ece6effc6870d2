//! PPE catalog (EPI)
//!
//! Each item carries its CA (approval certificate) number and expiry, the stock on hand
//! and the minimum stock that triggers a low-stock alert. Stock only moves through
//! [`PpeItem::adjust_stock`], which refuses to go below zero.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;
use validator::Validate;

use super::{double_option, push_set, Page, PageRequest};
use crate::validation::validate_ca_number;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PpeItem {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub category: String,
    pub ca_number: String,
    pub ca_expires_on: Option<NaiveDate>,
    pub size: Option<String>,
    pub stock_quantity: i32,
    pub min_stock: i32,
    /// Days of use before the item should be replaced
    pub replacement_days: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PpeItem {
    pub fn is_low_stock(&self) -> bool {
        self.stock_quantity <= self.min_stock
    }

    /// True when the CA is expired or expires within `days` of `today`
    pub fn ca_expiring(&self, today: NaiveDate, days: i64) -> bool {
        self.ca_expires_on
            .is_some_and(|expires| (expires - today).num_days() <= days)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreatePpeItem {
    #[validate(length(min = 1, max = 255, message = "Name must be 1 to 255 characters"))]
    pub name: String,

    #[validate(length(min = 1, max = 120, message = "Category must be 1 to 120 characters"))]
    pub category: String,

    #[validate(custom(function = "validate_ca_number"))]
    pub ca_number: String,

    pub ca_expires_on: Option<NaiveDate>,

    #[validate(length(max = 16))]
    pub size: Option<String>,

    #[serde(default)]
    #[validate(range(min = 0, message = "Stock must not be negative"))]
    pub stock_quantity: i32,

    #[serde(default)]
    #[validate(range(min = 0, message = "Minimum stock must not be negative"))]
    pub min_stock: i32,

    #[validate(range(min = 1, message = "Replacement period must be at least one day"))]
    pub replacement_days: Option<i32>,
}

/// Stock is adjusted through deliveries, returns and restocks, not edited directly
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdatePpeItem {
    #[validate(length(min = 1, max = 255, message = "Name must be 1 to 255 characters"))]
    pub name: Option<String>,

    #[validate(length(min = 1, max = 120, message = "Category must be 1 to 120 characters"))]
    pub category: Option<String>,

    #[validate(custom(function = "validate_ca_number"))]
    pub ca_number: Option<String>,

    #[serde(default, deserialize_with = "double_option")]
    pub ca_expires_on: Option<Option<NaiveDate>>,

    #[serde(default, deserialize_with = "double_option")]
    pub size: Option<Option<String>>,

    #[validate(range(min = 0, message = "Minimum stock must not be negative"))]
    pub min_stock: Option<i32>,

    #[serde(default, deserialize_with = "double_option")]
    pub replacement_days: Option<Option<i32>>,
}

/// Stock movement outside deliveries (purchases, inventory corrections)
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StockAdjustment {
    #[validate(range(min = -100000, max = 100000, message = "Adjustment out of range"))]
    pub delta: i32,

    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PpeItemFilter {
    pub category: Option<String>,
    /// Only items at or below minimum stock
    pub low_stock: Option<bool>,
    /// Only items whose CA expires on or before this date
    pub ca_expires_before: Option<NaiveDate>,
}

const COLUMNS: &str = "id, company_id, name, category, ca_number, ca_expires_on, size, stock_quantity, \
                       min_stock, replacement_days, created_at, updated_at";

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, company_id: Uuid, filter: &PpeItemFilter, page: &PageRequest) {
    qb.push(" WHERE company_id = ").push_bind(company_id);

    if let Some(category) = &filter.category {
        qb.push(" AND category = ").push_bind(category.clone());
    }
    if filter.low_stock == Some(true) {
        qb.push(" AND stock_quantity <= min_stock");
    }
    if let Some(date) = filter.ca_expires_before {
        qb.push(" AND ca_expires_on <= ").push_bind(date);
    }
    if let Some(pattern) = &page.search {
        qb.push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR category ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR ca_number LIKE ")
            .push_bind(pattern.clone())
            .push(")");
    }
}

impl PpeItem {
    pub const SORTABLE: &'static [&'static str] =
        &["name", "category", "ca_expires_on", "stock_quantity", "created_at"];

    pub async fn create(pool: &PgPool, company_id: Uuid, data: CreatePpeItem) -> Result<Self, sqlx::Error> {
        let item = sqlx::query_as::<_, PpeItem>(&format!(
            r#"
            INSERT INTO ppe_items
                (company_id, name, category, ca_number, ca_expires_on, size, stock_quantity,
                 min_stock, replacement_days)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(company_id)
        .bind(data.name)
        .bind(data.category)
        .bind(data.ca_number.trim().to_string())
        .bind(data.ca_expires_on)
        .bind(data.size)
        .bind(data.stock_quantity)
        .bind(data.min_stock)
        .bind(data.replacement_days)
        .fetch_one(pool)
        .await?;

        Ok(item)
    }

    pub async fn find_by_id(pool: &PgPool, company_id: Uuid, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let item = sqlx::query_as::<_, PpeItem>(&format!(
            "SELECT {} FROM ppe_items WHERE company_id = $1 AND id = $2",
            COLUMNS
        ))
        .bind(company_id)
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(item)
    }

    /// Loads an item and locks it for a stock change
    pub async fn lock(conn: &mut PgConnection, company_id: Uuid, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let item = sqlx::query_as::<_, PpeItem>(&format!(
            "SELECT {} FROM ppe_items WHERE company_id = $1 AND id = $2 FOR UPDATE",
            COLUMNS
        ))
        .bind(company_id)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(item)
    }

    pub async fn list(
        pool: &PgPool,
        company_id: Uuid,
        filter: &PpeItemFilter,
        page: &PageRequest,
    ) -> Result<Page<Self>, sqlx::Error> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM ppe_items");
        push_filters(&mut count, company_id, filter, page);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(pool).await?;

        let mut query = QueryBuilder::new(format!("SELECT {} FROM ppe_items", COLUMNS));
        push_filters(&mut query, company_id, filter, page);
        page.push_tail(&mut query);
        let items = query.build_query_as::<PpeItem>().fetch_all(pool).await?;

        Ok(Page::new(items, total, page))
    }

    pub async fn update(
        pool: &PgPool,
        company_id: Uuid,
        id: Uuid,
        data: UpdatePpeItem,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut qb = QueryBuilder::new("UPDATE ppe_items SET updated_at = NOW()");
        push_set(&mut qb, "name", data.name);
        push_set(&mut qb, "category", data.category);
        push_set(&mut qb, "ca_number", data.ca_number.map(|c| c.trim().to_string()));
        push_set(&mut qb, "ca_expires_on", data.ca_expires_on);
        push_set(&mut qb, "size", data.size);
        push_set(&mut qb, "min_stock", data.min_stock);
        push_set(&mut qb, "replacement_days", data.replacement_days);
        qb.push(" WHERE company_id = ")
            .push_bind(company_id)
            .push(" AND id = ")
            .push_bind(id)
            .push(" RETURNING ")
            .push(COLUMNS);

        let item = qb.build_query_as::<PpeItem>().fetch_optional(pool).await?;

        Ok(item)
    }

    /// Adds `delta` (possibly negative) to the stock
    ///
    /// Returns the updated item, or `None` when the item does not exist or the stock
    /// would go negative.
    pub async fn adjust_stock(
        conn: &mut PgConnection,
        company_id: Uuid,
        id: Uuid,
        delta: i32,
    ) -> Result<Option<Self>, sqlx::Error> {
        let item = sqlx::query_as::<_, PpeItem>(&format!(
            r#"
            UPDATE ppe_items
            SET stock_quantity = stock_quantity + $3, updated_at = NOW()
            WHERE company_id = $1 AND id = $2 AND stock_quantity + $3 >= 0
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(company_id)
        .bind(id)
        .bind(delta)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(item)
    }

    /// Deletes an item; items with delivery history are protected by the foreign key
    pub async fn delete(pool: &PgPool, company_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM ppe_items WHERE company_id = $1 AND id = $2")
            .bind(company_id)
            .bind(id)
            .execute(pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(stock: i32, min: i32, ca_expires_on: Option<NaiveDate>) -> PpeItem {
        PpeItem {
            id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            name: "Capacete classe B".to_string(),
            category: "Proteção da cabeça".to_string(),
            ca_number: "31469".to_string(),
            ca_expires_on,
            size: None,
            stock_quantity: stock,
            min_stock: min,
            replacement_days: Some(365),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_low_stock() {
        assert!(item(5, 5, None).is_low_stock());
        assert!(item(0, 0, None).is_low_stock());
        assert!(!item(6, 5, None).is_low_stock());
    }

    #[test]
    fn test_ca_expiring() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();

        assert!(item(1, 0, NaiveDate::from_ymd_opt(2025, 6, 30)).ca_expiring(today, 30));
        assert!(item(1, 0, NaiveDate::from_ymd_opt(2025, 5, 1)).ca_expiring(today, 30));
        assert!(!item(1, 0, NaiveDate::from_ymd_opt(2025, 8, 1)).ca_expiring(today, 30));
        assert!(!item(1, 0, None).ca_expiring(today, 30));
    }

    #[test]
    fn test_create_validation() {
        let data: CreatePpeItem = serde_json::from_str(
            r#"{"name":"Luva","category":"Mãos","ca_number":"1234567","stock_quantity":-1}"#,
        )
        .unwrap();
        let errors = data.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("ca_number"));
        assert!(fields.contains_key("stock_quantity"));
    }
}
