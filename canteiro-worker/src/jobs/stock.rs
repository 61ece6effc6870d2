use super::alerts::{low_stock_alert, publish, LowStock, StockSource};
use super::{Job, JobContext};
use async_trait::async_trait;
use canteiro_shared::models::company::Company;

/// Alerts for PPE items and supplies at or below their minimum
#[derive(Debug, Clone, Copy, Default)]
pub struct StockAlerts;

#[async_trait]
impl Job for StockAlerts {
    fn name(&self) -> &'static str {
        "stock_alerts"
    }

    async fn run(&self, ctx: &JobContext) -> anyhow::Result<u64> {
        let mut created = 0;

        for company_id in Company::list_ids(&ctx.db).await? {
            let ppe = sqlx::query_as::<_, LowStock>(
                r#"
                SELECT id AS entity_id, name, stock_quantity AS quantity, min_stock AS minimum, 'un' AS unit
                FROM ppe_items
                WHERE company_id = $1 AND min_stock > 0 AND stock_quantity <= min_stock
                "#,
            )
            .bind(company_id)
            .fetch_all(&ctx.db)
            .await?;

            let supplies = sqlx::query_as::<_, LowStock>(
                r#"
                SELECT id AS entity_id, name, quantity, min_quantity AS minimum, unit
                FROM assets
                WHERE company_id = $1 AND kind = 'supply' AND status <> 'retired'
                  AND min_quantity > 0 AND quantity <= min_quantity
                "#,
            )
            .bind(company_id)
            .fetch_all(&ctx.db)
            .await?;

            let alerts = ppe
                .iter()
                .map(|stock| low_stock_alert(StockSource::Ppe, stock))
                .chain(supplies.iter().map(|stock| low_stock_alert(StockSource::Supply, stock)))
                .collect();

            let new = publish(&ctx.db, company_id, alerts).await?;
            if new > 0 {
                tracing::info!(company_id = %company_id, created = new, "Low stock alerts raised");
            }
            created += new;
        }

        Ok(created)
    }
}
