//! Asset movements: checkouts, checkins and supply consumption
//!
//! Movements are append-only. Each operation locks the asset row, checks its state, updates
//! it and records the movement on the caller's connection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;
use validator::Validate;

use super::asset::{Asset, AssetKind, AssetStatus};
use super::ppe_delivery::ItemCondition;
use super::{Page, PageRequest};
use crate::validation::validate_not_blank;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "asset_movement_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    Checkout,
    Checkin,
    Consumption,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AssetMovement {
    pub id: Uuid,
    pub company_id: Uuid,
    pub asset_id: Uuid,
    pub employee_id: Uuid,
    pub kind: MovementKind,
    pub quantity: i32,
    pub condition: Option<ItemCondition>,
    pub work_site: Option<String>,
    pub notes: Option<String>,
    pub workflow_session_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Common fields of a movement request
#[derive(Debug, Clone, Default)]
pub struct MovementContext {
    pub notes: Option<String>,
    pub workflow_session_id: Option<Uuid>,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CheckoutRequest {
    pub employee_id: Uuid,

    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CheckinRequest {
    pub employee_id: Uuid,

    pub condition: ItemCondition,

    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ConsumeRequest {
    pub employee_id: Uuid,

    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,

    #[validate(length(min = 1, max = 255), custom(function = "validate_not_blank"))]
    pub work_site: String,

    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

/// Result of a movement attempt
#[derive(Debug)]
pub enum MovementOutcome {
    Recorded { asset: Asset, movement: AssetMovement },
    UnknownAsset,
    UnknownEmployee,
    /// The operation does not apply to this kind of asset
    WrongKind(AssetKind),
    /// The asset is not in a state that allows the operation
    Unavailable(AssetStatus),
    /// Checkin by someone other than the holder
    NotHeld,
    InsufficientQuantity { available: i32 },
}

/// Asset status after a checkin in the given condition
pub fn status_after_checkin(condition: ItemCondition) -> AssetStatus {
    match condition {
        ItemCondition::Good | ItemCondition::Worn => AssetStatus::Available,
        ItemCondition::Damaged => AssetStatus::Maintenance,
        ItemCondition::Lost => AssetStatus::Retired,
    }
}

const COLUMNS: &str = "id, company_id, asset_id, employee_id, kind, quantity, condition, work_site, notes, \
                       workflow_session_id, created_by, created_at";

async fn employee_exists(conn: &mut PgConnection, company_id: Uuid, employee_id: Uuid) -> Result<bool, sqlx::Error> {
    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM employees WHERE company_id = $1 AND id = $2 AND status <> 'terminated')",
    )
    .bind(company_id)
    .bind(employee_id)
    .fetch_one(&mut *conn)
    .await?;

    Ok(exists)
}

#[allow(clippy::too_many_arguments)]
async fn record(
    conn: &mut PgConnection,
    asset: &Asset,
    employee_id: Uuid,
    kind: MovementKind,
    quantity: i32,
    condition: Option<ItemCondition>,
    work_site: Option<String>,
    ctx: MovementContext,
) -> Result<AssetMovement, sqlx::Error> {
    let movement = sqlx::query_as::<_, AssetMovement>(&format!(
        r#"
        INSERT INTO asset_movements
            (company_id, asset_id, employee_id, kind, quantity, condition, work_site, notes,
             workflow_session_id, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        RETURNING {}
        "#,
        COLUMNS
    ))
    .bind(asset.company_id)
    .bind(asset.id)
    .bind(employee_id)
    .bind(kind)
    .bind(quantity)
    .bind(condition)
    .bind(work_site)
    .bind(ctx.notes)
    .bind(ctx.workflow_session_id)
    .bind(ctx.created_by)
    .fetch_one(&mut *conn)
    .await?;

    Ok(movement)
}

async fn set_holder(
    conn: &mut PgConnection,
    asset: &Asset,
    status: AssetStatus,
    holder: Option<Uuid>,
) -> Result<Asset, sqlx::Error> {
    let updated = sqlx::query_as::<_, Asset>(&format!(
        r#"
        UPDATE assets SET status = $3, holder_employee_id = $4, updated_at = NOW()
        WHERE company_id = $1 AND id = $2
        RETURNING {}
        "#,
        super::asset::COLUMNS
    ))
    .bind(asset.company_id)
    .bind(asset.id)
    .bind(status)
    .bind(holder)
    .fetch_one(&mut *conn)
    .await?;

    Ok(updated)
}

impl AssetMovement {
    /// Lends an available tool or machine to an employee
    pub async fn checkout(
        conn: &mut PgConnection,
        company_id: Uuid,
        asset_id: Uuid,
        employee_id: Uuid,
        ctx: MovementContext,
    ) -> Result<MovementOutcome, sqlx::Error> {
        let Some(asset) = Asset::lock(conn, company_id, asset_id).await? else {
            return Ok(MovementOutcome::UnknownAsset);
        };
        if !asset.kind.is_lendable() {
            return Ok(MovementOutcome::WrongKind(asset.kind));
        }
        if asset.status != AssetStatus::Available {
            return Ok(MovementOutcome::Unavailable(asset.status));
        }
        if !employee_exists(conn, company_id, employee_id).await? {
            return Ok(MovementOutcome::UnknownEmployee);
        }

        let updated = set_holder(conn, &asset, AssetStatus::InUse, Some(employee_id)).await?;
        let movement = record(conn, &asset, employee_id, MovementKind::Checkout, 1, None, None, ctx).await?;

        Ok(MovementOutcome::Recorded {
            asset: updated,
            movement,
        })
    }

    /// Takes back a tool or machine from its holder
    ///
    /// Damaged items go to maintenance, lost items are retired.
    pub async fn checkin(
        conn: &mut PgConnection,
        company_id: Uuid,
        asset_id: Uuid,
        employee_id: Uuid,
        condition: ItemCondition,
        ctx: MovementContext,
    ) -> Result<MovementOutcome, sqlx::Error> {
        let Some(asset) = Asset::lock(conn, company_id, asset_id).await? else {
            return Ok(MovementOutcome::UnknownAsset);
        };
        if !asset.kind.is_lendable() {
            return Ok(MovementOutcome::WrongKind(asset.kind));
        }
        if asset.status != AssetStatus::InUse {
            return Ok(MovementOutcome::Unavailable(asset.status));
        }
        if asset.holder_employee_id != Some(employee_id) {
            return Ok(MovementOutcome::NotHeld);
        }

        let updated = set_holder(conn, &asset, status_after_checkin(condition), None).await?;
        let movement = record(
            conn,
            &asset,
            employee_id,
            MovementKind::Checkin,
            1,
            Some(condition),
            None,
            ctx,
        )
        .await?;

        Ok(MovementOutcome::Recorded {
            asset: updated,
            movement,
        })
    }

    /// Consumes supplies at a work site
    pub async fn consume(
        conn: &mut PgConnection,
        company_id: Uuid,
        asset_id: Uuid,
        employee_id: Uuid,
        quantity: i32,
        work_site: String,
        ctx: MovementContext,
    ) -> Result<MovementOutcome, sqlx::Error> {
        let Some(asset) = Asset::lock(conn, company_id, asset_id).await? else {
            return Ok(MovementOutcome::UnknownAsset);
        };
        if asset.kind != AssetKind::Supply {
            return Ok(MovementOutcome::WrongKind(asset.kind));
        }
        if asset.status == AssetStatus::Retired {
            return Ok(MovementOutcome::Unavailable(asset.status));
        }
        if asset.quantity < quantity {
            return Ok(MovementOutcome::InsufficientQuantity {
                available: asset.quantity,
            });
        }
        if !employee_exists(conn, company_id, employee_id).await? {
            return Ok(MovementOutcome::UnknownEmployee);
        }

        let updated = sqlx::query_as::<_, Asset>(&format!(
            r#"
            UPDATE assets SET quantity = quantity - $3, updated_at = NOW()
            WHERE company_id = $1 AND id = $2
            RETURNING {}
            "#,
            super::asset::COLUMNS
        ))
        .bind(company_id)
        .bind(asset_id)
        .bind(quantity)
        .fetch_one(&mut *conn)
        .await?;

        let movement = record(
            conn,
            &asset,
            employee_id,
            MovementKind::Consumption,
            quantity,
            None,
            Some(work_site),
            ctx,
        )
        .await?;

        Ok(MovementOutcome::Recorded {
            asset: updated,
            movement,
        })
    }

    /// Movement history of an asset, newest first
    pub async fn list_for_asset(
        pool: &PgPool,
        company_id: Uuid,
        asset_id: Uuid,
        page: &PageRequest,
    ) -> Result<Page<Self>, sqlx::Error> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM asset_movements WHERE company_id = $1 AND asset_id = $2",
        )
        .bind(company_id)
        .bind(asset_id)
        .fetch_one(pool)
        .await?;

        let items = sqlx::query_as::<_, AssetMovement>(&format!(
            r#"
            SELECT {}
            FROM asset_movements
            WHERE company_id = $1 AND asset_id = $2
            ORDER BY created_at DESC, id
            LIMIT $3 OFFSET $4
            "#,
            COLUMNS
        ))
        .bind(company_id)
        .bind(asset_id)
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(pool)
        .await?;

        Ok(Page::new(items, total, page))
    }
}
