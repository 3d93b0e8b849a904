//! Postgres implementation of [`SyncStore`].
//!
//! Writes are row-at-a-time upserts, deliberately not wrapped in one big
//! transaction: partial progress on a crash stays visible and the natural
//! identity keys make the following run converge without duplication.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::{
    AdRecord, AdRow, AdSetRecord, AdSetRow, CampaignRecord, CampaignRow, CreativeAssetRecord,
    MetricRecord, PlatformAccountRecord, StorageError, SyncStore,
};

/// Sentinel for unset scope levels inside the metric identity key.
const NO_SCOPE: &str = "'00000000-0000-0000-0000-000000000000'::uuid";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply any pending schema migrations.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl SyncStore for PgStore {
    async fn upsert_platform_account(
        &self,
        record: &PlatformAccountRecord,
    ) -> Result<Uuid, StorageError> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO platform_accounts (
                workspace_id, platform_key, external_id, display_name, metadata,
                last_synced_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5::jsonb, now(), now())
            ON CONFLICT (workspace_id, platform_key, external_id)
            DO UPDATE SET
                display_name = EXCLUDED.display_name,
                metadata = EXCLUDED.metadata,
                last_synced_at = now(),
                updated_at = now()
            RETURNING id
            "#,
        )
        .bind(record.workspace_id)
        .bind(&record.platform_key)
        .bind(&record.external_id)
        .bind(&record.display_name)
        .bind(&record.metadata)
        .fetch_one(&self.pool)
        .await?;
        debug!(platform_account_id = %id, platform_key = %record.platform_key, "platform account upserted");
        Ok(id)
    }

    async fn upsert_campaign(&self, record: &CampaignRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO campaigns (
                workspace_id, platform_account_id, external_id, name, objective,
                status, source, start_date, end_date, daily_budget, lifetime_budget,
                last_synced_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, 'synced', $7, $8, $9, $10, now(), now())
            ON CONFLICT (platform_account_id, external_id)
            DO UPDATE SET
                name = EXCLUDED.name,
                objective = EXCLUDED.objective,
                status = EXCLUDED.status,
                start_date = EXCLUDED.start_date,
                end_date = EXCLUDED.end_date,
                daily_budget = EXCLUDED.daily_budget,
                lifetime_budget = EXCLUDED.lifetime_budget,
                last_synced_at = now(),
                updated_at = now()
            "#,
        )
        .bind(record.workspace_id)
        .bind(record.platform_account_id)
        .bind(&record.external_id)
        .bind(&record.name)
        .bind(&record.objective)
        .bind(record.status.as_str())
        .bind(record.start_date)
        .bind(record.end_date)
        .bind(record.daily_budget)
        .bind(record.lifetime_budget)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_ad_set(&self, record: &AdSetRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO ad_sets (
                campaign_id, platform_account_id, external_id, name, status,
                start_date, end_date, bid_strategy, bid_amount, budget_type,
                daily_budget, lifetime_budget, targeting, destination_type,
                promoted_object, last_synced_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13::jsonb,
                    $14, $15::jsonb, now(), now())
            ON CONFLICT (campaign_id, external_id)
            DO UPDATE SET
                name = EXCLUDED.name,
                status = EXCLUDED.status,
                start_date = EXCLUDED.start_date,
                end_date = EXCLUDED.end_date,
                bid_strategy = EXCLUDED.bid_strategy,
                bid_amount = EXCLUDED.bid_amount,
                budget_type = EXCLUDED.budget_type,
                daily_budget = EXCLUDED.daily_budget,
                lifetime_budget = EXCLUDED.lifetime_budget,
                targeting = EXCLUDED.targeting,
                destination_type = EXCLUDED.destination_type,
                promoted_object = EXCLUDED.promoted_object,
                last_synced_at = now(),
                updated_at = now()
            "#,
        )
        .bind(record.campaign_id)
        .bind(record.platform_account_id)
        .bind(&record.external_id)
        .bind(&record.name)
        .bind(record.status.as_str())
        .bind(record.start_date)
        .bind(record.end_date)
        .bind(&record.bid_strategy)
        .bind(record.bid_amount)
        .bind(&record.budget_type)
        .bind(record.daily_budget)
        .bind(record.lifetime_budget)
        .bind(&record.targeting)
        .bind(&record.destination_type)
        .bind(&record.promoted_object)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_ad(&self, record: &AdRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO ads (
                ad_set_id, platform_account_id, external_id, name, status,
                creative_asset_id, last_synced_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, now(), now())
            ON CONFLICT (ad_set_id, external_id)
            DO UPDATE SET
                name = EXCLUDED.name,
                status = EXCLUDED.status,
                creative_asset_id = EXCLUDED.creative_asset_id,
                last_synced_at = now(),
                updated_at = now()
            "#,
        )
        .bind(record.ad_set_id)
        .bind(record.platform_account_id)
        .bind(&record.external_id)
        .bind(&record.name)
        .bind(record.status.as_str())
        .bind(record.creative_asset_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_creative_asset(
        &self,
        record: &CreativeAssetRecord,
    ) -> Result<Uuid, StorageError> {
        let existing = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM creative_assets WHERE workspace_id = $1 AND hash = $2 LIMIT 1",
        )
        .bind(record.workspace_id)
        .bind(&record.hash)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = existing {
            sqlx::query(
                r#"
                UPDATE creative_assets
                SET name = $2,
                    storage_url = $3,
                    thumbnail_url = $4,
                    text_content = $5,
                    metadata = $6::jsonb,
                    updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(&record.name)
            .bind(&record.storage_url)
            .bind(&record.thumbnail_url)
            .bind(&record.text_content)
            .bind(&record.metadata)
            .execute(&self.pool)
            .await?;
            return Ok(id);
        }

        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO creative_assets (
                workspace_id, type, name, storage_url, thumbnail_url,
                text_content, hash, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8::jsonb)
            RETURNING id
            "#,
        )
        .bind(record.workspace_id)
        .bind(&record.kind)
        .bind(&record.name)
        .bind(&record.storage_url)
        .bind(&record.thumbnail_url)
        .bind(&record.text_content)
        .bind(&record.hash)
        .bind(&record.metadata)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn upsert_metric(&self, record: &MetricRecord) -> Result<(), StorageError> {
        let sql = format!(
            r#"
            INSERT INTO performance_metrics (
                workspace_id, platform_account_id, campaign_id, ad_set_id, ad_id,
                granularity, metric_date, currency, impressions, clicks, spend,
                ctr, cpc, cpa, roas, conversions, conversion_value, extra_metrics,
                synced_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18::jsonb, now())
            ON CONFLICT (workspace_id, platform_account_id,
                         COALESCE(campaign_id, {NO_SCOPE}),
                         COALESCE(ad_set_id, {NO_SCOPE}),
                         COALESCE(ad_id, {NO_SCOPE}),
                         granularity, metric_date)
            DO UPDATE SET
                currency = EXCLUDED.currency,
                impressions = EXCLUDED.impressions,
                clicks = EXCLUDED.clicks,
                spend = EXCLUDED.spend,
                ctr = EXCLUDED.ctr,
                cpc = EXCLUDED.cpc,
                cpa = EXCLUDED.cpa,
                roas = EXCLUDED.roas,
                conversions = EXCLUDED.conversions,
                conversion_value = EXCLUDED.conversion_value,
                extra_metrics = COALESCE(performance_metrics.extra_metrics, '{{}}'::jsonb)
                                || EXCLUDED.extra_metrics,
                synced_at = now()
            "#
        );
        sqlx::query(&sql)
            .bind(record.workspace_id)
            .bind(record.platform_account_id)
            .bind(record.campaign_id)
            .bind(record.ad_set_id)
            .bind(record.ad_id)
            .bind(record.granularity.as_str())
            .bind(record.metric_date)
            .bind(&record.currency)
            .bind(record.impressions)
            .bind(record.clicks)
            .bind(record.spend)
            .bind(record.ctr)
            .bind(record.cpc)
            .bind(record.cpa)
            .bind(record.roas)
            .bind(record.conversions)
            .bind(record.conversion_value)
            .bind(&record.extra_metrics)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn merge_day_extras(
        &self,
        workspace_id: Uuid,
        platform_account_id: Uuid,
        metric_date: NaiveDate,
        extras: &Value,
    ) -> Result<(), StorageError> {
        let sql = format!(
            r#"
            INSERT INTO performance_metrics (
                workspace_id, platform_account_id, granularity, metric_date,
                extra_metrics, synced_at
            )
            VALUES ($1, $2, 'day', $3, $4::jsonb, now())
            ON CONFLICT (workspace_id, platform_account_id,
                         COALESCE(campaign_id, {NO_SCOPE}),
                         COALESCE(ad_set_id, {NO_SCOPE}),
                         COALESCE(ad_id, {NO_SCOPE}),
                         granularity, metric_date)
            DO UPDATE SET
                extra_metrics = COALESCE(performance_metrics.extra_metrics, '{{}}'::jsonb)
                                || EXCLUDED.extra_metrics,
                synced_at = now()
            "#
        );
        sqlx::query(&sql)
            .bind(workspace_id)
            .bind(platform_account_id)
            .bind(metric_date)
            .bind(extras)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load_campaigns(
        &self,
        platform_account_id: Uuid,
    ) -> Result<Vec<CampaignRow>, StorageError> {
        let rows = sqlx::query_as::<_, (Uuid, String)>(
            "SELECT id, external_id FROM campaigns WHERE platform_account_id = $1",
        )
        .bind(platform_account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, external_id)| CampaignRow { id, external_id })
            .collect())
    }

    async fn load_ad_sets(
        &self,
        platform_account_id: Uuid,
    ) -> Result<Vec<AdSetRow>, StorageError> {
        let rows = sqlx::query_as::<_, (Uuid, String, Uuid)>(
            "SELECT id, external_id, campaign_id FROM ad_sets WHERE platform_account_id = $1",
        )
        .bind(platform_account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, external_id, campaign_id)| AdSetRow {
                id,
                external_id,
                campaign_id,
            })
            .collect())
    }

    async fn load_ads(&self, platform_account_id: Uuid) -> Result<Vec<AdRow>, StorageError> {
        let rows = sqlx::query_as::<_, (Uuid, String, Uuid, Uuid)>(
            r#"
            SELECT ads.id, ads.external_id, ads.ad_set_id, ad_sets.campaign_id
            FROM ads
            JOIN ad_sets ON ad_sets.id = ads.ad_set_id
            WHERE ads.platform_account_id = $1
            "#,
        )
        .bind(platform_account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, external_id, ad_set_id, campaign_id)| AdRow {
                id,
                external_id,
                ad_set_id,
                campaign_id,
            })
            .collect())
    }

    async fn mark_integration_synced(
        &self,
        workspace_id: Uuid,
        platform_key: &str,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE workspace_integrations
            SET last_synced_at = now(), updated_at = now()
            WHERE workspace_id = $1 AND platform_key = $2
            "#,
        )
        .bind(workspace_id)
        .bind(platform_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
