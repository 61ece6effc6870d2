//! Database models
//!
//! Every tenant-owned model takes the caller's `company_id` on each query; rows of
//! another company are invisible rather than forbidden.
//!
//! # Models
//!
//! - `company`, `user`, `membership`: tenants, operators and their roles
//! - `employee`, `biometric_template`: collaborators and their identification data
//! - `contract`, `training`, `vacation`, `timesheet`, `health_certificate`: HR records
//! - `ppe_item`, `ppe_delivery`: PPE catalog, stock and deliveries
//! - `asset`, `asset_movement`: tools, machines, supplies and their movements
//! - `notification`: deduplicated alerts
//! - `audit_log`: hash-chained audit trail
//! - `workflow_session`: persisted QR wizard sessions
//! - `report`: dashboard aggregates
//!
//! # Listing
//!
//! List endpoints share [`ListParams`] (`limit`, `offset`, `search`, `sort`, `order`).
//! [`ListParams::page`] checks the sort column against the model's whitelist and yields a
//! [`PageRequest`] that models append to their query builders.
//!
//! ```no_run
//! use canteiro_shared::models::{employee::{Employee, EmployeeFilter}, ListParams};
//! use canteiro_shared::db::pool::{create_pool, DatabaseConfig};
//! use uuid::Uuid;
//!
//! # async fn example(company_id: Uuid) -> Result<(), Box<dyn std::error::Error>> {
//! let pool = create_pool(DatabaseConfig::default()).await?;
//! let page = ListParams::default().page(Employee::SORTABLE, "name")?;
//! let employees = Employee::list(&pool, company_id, &EmployeeFilter::default(), &page).await?;
//! println!("{} of {}", employees.items.len(), employees.total);
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use sqlx::{Postgres, QueryBuilder};

pub mod asset;
pub mod asset_movement;
pub mod audit_log;
pub mod biometric_template;
pub mod company;
pub mod contract;
pub mod employee;
pub mod health_certificate;
pub mod membership;
pub mod notification;
pub mod ppe_delivery;
pub mod ppe_item;
pub mod report;
pub mod timesheet;
pub mod training;
pub mod user;
pub mod vacation;
pub mod workflow_session;

/// Default page size
pub const DEFAULT_LIMIT: i64 = 50;

/// Largest page size
pub const MAX_LIMIT: i64 = 200;

/// Sort direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Pagination, search and sort query parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub search: Option<String>,
    pub sort: Option<String>,
    pub order: Option<SortOrder>,
}

/// Error for list parameters outside the accepted range
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListError {
    #[error("limit must be between 1 and {MAX_LIMIT}")]
    InvalidLimit,

    #[error("offset must not be negative")]
    InvalidOffset,

    #[error("cannot sort by '{0}'")]
    InvalidSort(String),
}

impl ListError {
    /// Query parameter the error refers to
    pub fn field(&self) -> &'static str {
        match self {
            ListError::InvalidLimit => "limit",
            ListError::InvalidOffset => "offset",
            ListError::InvalidSort(_) => "sort",
        }
    }
}

impl ListParams {
    /// Validates the parameters against a model's sortable columns
    pub fn page(&self, sortable: &[&'static str], default_sort: &'static str) -> Result<PageRequest, ListError> {
        let limit = self.limit.unwrap_or(DEFAULT_LIMIT);
        if !(1..=MAX_LIMIT).contains(&limit) {
            return Err(ListError::InvalidLimit);
        }

        let offset = self.offset.unwrap_or(0);
        if offset < 0 {
            return Err(ListError::InvalidOffset);
        }

        let sort = match self.sort.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            None => default_sort,
            Some(requested) => sortable
                .iter()
                .copied()
                .find(|column| *column == requested)
                .ok_or_else(|| ListError::InvalidSort(requested.to_string()))?,
        };

        let search = self
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(like_pattern);

        Ok(PageRequest {
            limit,
            offset,
            search,
            sort,
            order: self.order.unwrap_or_default(),
        })
    }
}

/// Validated list request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: i64,
    pub offset: i64,
    /// `ILIKE` pattern built from the search term
    pub search: Option<String>,
    /// Whitelisted column name
    pub sort: &'static str,
    pub order: SortOrder,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
            search: None,
            sort: "created_at",
            order: SortOrder::Desc,
        }
    }
}

impl PageRequest {
    /// Appends `ORDER BY`, `LIMIT` and `OFFSET`
    ///
    /// `id` is the tiebreaker so pages stay stable when the sort column repeats.
    pub fn push_tail(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push(" ORDER BY ")
            .push(self.sort)
            .push(" ")
            .push(self.order.as_sql())
            .push(", id ASC LIMIT ")
            .push_bind(self.limit)
            .push(" OFFSET ")
            .push_bind(self.offset);
    }
}

/// One page of results
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, request: &PageRequest) -> Self {
        Self {
            items,
            total,
            limit: request.limit,
            offset: request.offset,
        }
    }
}

/// Escapes `ILIKE` wildcards in a search term and wraps it in `%`
pub fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Distinguishes a missing field from an explicit `null` in partial updates
///
/// Use with `#[serde(default, deserialize_with = "crate::models::double_option")]`:
/// absent is `None`, `null` is `Some(None)`, a value is `Some(Some(v))`.
pub fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Pushes `, column = value` for each present field of a partial update
pub(crate) fn push_set<'a, T>(qb: &mut QueryBuilder<'a, Postgres>, column: &str, value: Option<T>)
where
    T: 'a + Send + sqlx::Encode<'a, Postgres> + sqlx::Type<Postgres>,
{
    if let Some(value) = value {
        qb.push(", ").push(column).push(" = ").push_bind(value);
    }
}
