//! Tools, machines and supplies
//!
//! Tools and machines are lent out one at a time (`holder_employee_id` while `in_use`).
//! Supplies are counted in `unit`s and consumed; `min_quantity` drives stock alerts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;
use validator::Validate;

use super::{double_option, push_set, Page, PageRequest};
use crate::validation::validate_not_blank;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "asset_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Tool,
    Machine,
    Supply,
}

impl AssetKind {
    /// Tools and machines are lent and returned; supplies are consumed
    pub fn is_lendable(&self) -> bool {
        !matches!(self, AssetKind::Supply)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Tool => "tool",
            AssetKind::Machine => "machine",
            AssetKind::Supply => "supply",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "asset_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    #[default]
    Available,
    InUse,
    Maintenance,
    Retired,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Available => "available",
            AssetStatus::InUse => "in_use",
            AssetStatus::Maintenance => "maintenance",
            AssetStatus::Retired => "retired",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Asset {
    pub id: Uuid,
    pub company_id: Uuid,
    pub kind: AssetKind,
    pub name: String,
    pub code: String,
    pub status: AssetStatus,
    pub quantity: i32,
    pub unit: String,
    pub min_quantity: i32,
    pub holder_employee_id: Option<Uuid>,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Asset {
    pub fn is_low_stock(&self) -> bool {
        self.kind == AssetKind::Supply && self.quantity <= self.min_quantity
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateAsset {
    pub kind: AssetKind,

    #[validate(length(min = 1, max = 255, message = "Name must be 1 to 255 characters"))]
    pub name: String,

    #[validate(length(min = 1, max = 64), custom(function = "validate_not_blank"))]
    pub code: String,

    #[serde(default)]
    pub status: AssetStatus,

    #[serde(default = "default_quantity")]
    #[validate(range(min = 0, message = "Quantity must not be negative"))]
    pub quantity: i32,

    #[serde(default = "default_unit")]
    #[validate(length(min = 1, max = 16))]
    pub unit: String,

    #[serde(default)]
    #[validate(range(min = 0, message = "Minimum quantity must not be negative"))]
    pub min_quantity: i32,

    #[validate(length(max = 255))]
    pub location: Option<String>,
}

fn default_quantity() -> i32 {
    1
}

fn default_unit() -> String {
    "un".to_string()
}

/// Holder and status move through checkouts and checkins
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateAsset {
    #[validate(length(min = 1, max = 255, message = "Name must be 1 to 255 characters"))]
    pub name: Option<String>,

    #[validate(length(min = 1, max = 64), custom(function = "validate_not_blank"))]
    pub code: Option<String>,

    /// Only `maintenance`, `retired` or back to `available`; see [`UpdateAsset::status_allowed`]
    pub status: Option<AssetStatus>,

    #[validate(range(min = 0, message = "Quantity must not be negative"))]
    pub quantity: Option<i32>,

    #[validate(length(min = 1, max = 16))]
    pub unit: Option<String>,

    #[validate(range(min = 0, message = "Minimum quantity must not be negative"))]
    pub min_quantity: Option<i32>,

    #[serde(default, deserialize_with = "double_option")]
    pub location: Option<Option<String>>,
}

impl UpdateAsset {
    /// `in_use` is only reachable by checking the asset out
    pub fn status_allowed(&self) -> bool {
        self.status != Some(AssetStatus::InUse)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssetFilter {
    pub kind: Option<AssetKind>,
    pub status: Option<AssetStatus>,
    pub holder_employee_id: Option<Uuid>,
    /// Only supplies at or below minimum quantity
    pub low_stock: Option<bool>,
}

pub(crate) const COLUMNS: &str = "id, company_id, kind, name, code, status, quantity, unit, min_quantity, \
                                  holder_employee_id, location, created_at, updated_at";

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, company_id: Uuid, filter: &AssetFilter, page: &PageRequest) {
    qb.push(" WHERE company_id = ").push_bind(company_id);

    if let Some(kind) = filter.kind {
        qb.push(" AND kind = ").push_bind(kind);
    }
    if let Some(status) = filter.status {
        qb.push(" AND status = ").push_bind(status);
    }
    if let Some(holder) = filter.holder_employee_id {
        qb.push(" AND holder_employee_id = ").push_bind(holder);
    }
    if filter.low_stock == Some(true) {
        qb.push(" AND kind = 'supply' AND quantity <= min_quantity");
    }
    if let Some(pattern) = &page.search {
        qb.push(" AND (name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR code ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR location ILIKE ")
            .push_bind(pattern.clone())
            .push(")");
    }
}

impl Asset {
    pub const SORTABLE: &'static [&'static str] = &["name", "code", "kind", "status", "quantity", "created_at"];

    pub async fn create(pool: &PgPool, company_id: Uuid, data: CreateAsset) -> Result<Self, sqlx::Error> {
        let asset = sqlx::query_as::<_, Asset>(&format!(
            r#"
            INSERT INTO assets (company_id, kind, name, code, status, quantity, unit, min_quantity, location)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(company_id)
        .bind(data.kind)
        .bind(data.name)
        .bind(data.code.trim().to_string())
        .bind(data.status)
        .bind(data.quantity)
        .bind(data.unit)
        .bind(data.min_quantity)
        .bind(data.location)
        .fetch_one(pool)
        .await?;

        Ok(asset)
    }

    pub async fn find_by_id(pool: &PgPool, company_id: Uuid, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let asset = sqlx::query_as::<_, Asset>(&format!(
            "SELECT {} FROM assets WHERE company_id = $1 AND id = $2",
            COLUMNS
        ))
        .bind(company_id)
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(asset)
    }

    /// Loads an asset and locks it for a movement
    pub async fn lock(conn: &mut PgConnection, company_id: Uuid, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        let asset = sqlx::query_as::<_, Asset>(&format!(
            "SELECT {} FROM assets WHERE company_id = $1 AND id = $2 FOR UPDATE",
            COLUMNS
        ))
        .bind(company_id)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(asset)
    }

    pub async fn list(
        pool: &PgPool,
        company_id: Uuid,
        filter: &AssetFilter,
        page: &PageRequest,
    ) -> Result<Page<Self>, sqlx::Error> {
        let mut count = QueryBuilder::new("SELECT COUNT(*) FROM assets");
        push_filters(&mut count, company_id, filter, page);
        let total: i64 = count.build_query_scalar::<i64>().fetch_one(pool).await?;

        let mut query = QueryBuilder::new(format!("SELECT {} FROM assets", COLUMNS));
        push_filters(&mut query, company_id, filter, page);
        page.push_tail(&mut query);
        let items = query.build_query_as::<Asset>().fetch_all(pool).await?;

        Ok(Page::new(items, total, page))
    }

    pub async fn update(
        pool: &PgPool,
        company_id: Uuid,
        id: Uuid,
        data: UpdateAsset,
    ) -> Result<Option<Self>, sqlx::Error> {
        let mut qb = QueryBuilder::new("UPDATE assets SET updated_at = NOW()");
        push_set(&mut qb, "name", data.name);
        push_set(&mut qb, "code", data.code.map(|c| c.trim().to_string()));
        push_set(&mut qb, "status", data.status);
        push_set(&mut qb, "quantity", data.quantity);
        push_set(&mut qb, "unit", data.unit);
        push_set(&mut qb, "min_quantity", data.min_quantity);
        push_set(&mut qb, "location", data.location);
        qb.push(" WHERE company_id = ")
            .push_bind(company_id)
            .push(" AND id = ")
            .push_bind(id)
            .push(" RETURNING ")
            .push(COLUMNS);

        let asset = qb.build_query_as::<Asset>().fetch_optional(pool).await?;

        Ok(asset)
    }

    pub async fn delete(pool: &PgPool, company_id: Uuid, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM assets WHERE company_id = $1 AND id = $2")
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

    #[test]
    fn test_kind_lending() {
        assert!(AssetKind::Tool.is_lendable());
        assert!(AssetKind::Machine.is_lendable());
        assert!(!AssetKind::Supply.is_lendable());
    }

    #[test]
    fn test_low_stock_only_for_supplies() {
        let mut asset = Asset {
            id: Uuid::new_v4(),
            company_id: Uuid::new_v4(),
            kind: AssetKind::Supply,
            name: "Areia".to_string(),
            code: "SUP-010".to_string(),
            status: AssetStatus::Available,
            quantity: 3,
            unit: "m3".to_string(),
            min_quantity: 5,
            holder_employee_id: None,
            location: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(asset.is_low_stock());

        asset.kind = AssetKind::Tool;
        assert!(!asset.is_low_stock());
    }

    #[test]
    fn test_create_defaults() {
        let data: CreateAsset =
            serde_json::from_str(r#"{"kind":"tool","name":"Furadeira","code":"FER-001"}"#).unwrap();
        assert_eq!(data.quantity, 1);
        assert_eq!(data.unit, "un");
        assert_eq!(data.status, AssetStatus::Available);
        assert!(data.validate().is_ok());

        let blank: CreateAsset =
            serde_json::from_str(r#"{"kind":"supply","name":"Cimento","code":"  ","quantity":-5}"#).unwrap();
        let errors = blank.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("code"));
        assert!(errors.field_errors().contains_key("quantity"));
    }

    #[test]
    fn test_status_update_rules() {
        let update: UpdateAsset = serde_json::from_str(r#"{"status":"in_use"}"#).unwrap();
        assert!(!update.status_allowed());

        let update: UpdateAsset = serde_json::from_str(r#"{"status":"maintenance"}"#).unwrap();
        assert!(update.status_allowed());
    }
}
