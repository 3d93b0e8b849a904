//! Relational store behind the sync engine.
//!
//! Every write is an idempotent upsert keyed by a natural identity, which
//! is what makes interrupted runs safely re-runnable: partial progress is
//! durable and a re-run converges instead of duplicating. The engine only
//! ever talks to the store through the [`SyncStore`] trait; the Postgres
//! implementation lives in [`pg`].

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use relay_core::{EntityStatus, Granularity};

pub mod pg;
pub mod resolver;

pub use pg::PgStore;
pub use resolver::{EntityResolver, ResolvedAd, ResolvedAdSet};

pub const CRATE_NAME: &str = "relay-storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("expected a row back from {operation}")]
    MissingRow { operation: &'static str },
}

/// Denormalized profile of one external account under a workspace.
/// Created lazily on first sync, refreshed (never replaced) afterwards.
#[derive(Debug, Clone)]
pub struct PlatformAccountRecord {
    pub workspace_id: Uuid,
    pub platform_key: String,
    pub external_id: String,
    pub display_name: String,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct CampaignRecord {
    pub workspace_id: Uuid,
    pub platform_account_id: Uuid,
    pub external_id: String,
    pub name: String,
    pub objective: Option<String>,
    pub status: EntityStatus,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub daily_budget: Option<f64>,
    pub lifetime_budget: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct AdSetRecord {
    pub campaign_id: Uuid,
    pub platform_account_id: Uuid,
    pub external_id: String,
    pub name: String,
    pub status: EntityStatus,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub bid_strategy: Option<String>,
    pub bid_amount: Option<f64>,
    pub budget_type: Option<String>,
    pub daily_budget: Option<f64>,
    pub lifetime_budget: Option<f64>,
    pub targeting: Value,
    pub promoted_object: Value,
    pub destination_type: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AdRecord {
    pub ad_set_id: Uuid,
    pub platform_account_id: Uuid,
    pub external_id: String,
    pub name: String,
    pub status: EntityStatus,
    pub creative_asset_id: Option<Uuid>,
}

/// Platform-agnostic media record, deduplicated by `hash` (the source
/// creative's external id).
#[derive(Debug, Clone)]
pub struct CreativeAssetRecord {
    pub workspace_id: Uuid,
    pub kind: String,
    pub name: String,
    pub storage_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub text_content: Option<String>,
    pub hash: String,
    pub metadata: Value,
}

/// One (scope, granularity, date) fact row. Unset scope levels are part
/// of the identity as a nil-UUID sentinel so the uniqueness constraint
/// still holds for sparse scopes.
#[derive(Debug, Clone)]
pub struct MetricRecord {
    pub workspace_id: Uuid,
    pub platform_account_id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub ad_set_id: Option<Uuid>,
    pub ad_id: Option<Uuid>,
    pub granularity: Granularity,
    pub metric_date: NaiveDate,
    pub currency: Option<String>,
    pub impressions: i64,
    pub clicks: i64,
    pub spend: f64,
    pub ctr: f64,
    pub cpc: f64,
    pub cpa: f64,
    pub roas: Option<f64>,
    pub conversions: f64,
    pub conversion_value: f64,
    pub extra_metrics: Value,
}

/// Read-back tuples for the entity resolver.
#[derive(Debug, Clone)]
pub struct CampaignRow {
    pub id: Uuid,
    pub external_id: String,
}

#[derive(Debug, Clone)]
pub struct AdSetRow {
    pub id: Uuid,
    pub external_id: String,
    pub campaign_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct AdRow {
    pub id: Uuid,
    pub external_id: String,
    pub ad_set_id: Uuid,
    pub campaign_id: Uuid,
}

/// Named upsert/select operations the engine is allowed to perform.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Insert-or-refresh the platform account, returning its internal id.
    async fn upsert_platform_account(
        &self,
        record: &PlatformAccountRecord,
    ) -> Result<Uuid, StorageError>;

    async fn upsert_campaign(&self, record: &CampaignRecord) -> Result<(), StorageError>;

    async fn upsert_ad_set(&self, record: &AdSetRecord) -> Result<(), StorageError>;

    async fn upsert_ad(&self, record: &AdRecord) -> Result<(), StorageError>;

    /// Append-or-update keyed by content hash; returns the asset id.
    async fn upsert_creative_asset(
        &self,
        record: &CreativeAssetRecord,
    ) -> Result<Uuid, StorageError>;

    /// Overwrites computed columns, merges `extra_metrics` key-by-key.
    async fn upsert_metric(&self, record: &MetricRecord) -> Result<(), StorageError>;

    /// Merge counters into the account-level day bag without touching
    /// computed columns (social account insights land here).
    async fn merge_day_extras(
        &self,
        workspace_id: Uuid,
        platform_account_id: Uuid,
        metric_date: NaiveDate,
        extras: &Value,
    ) -> Result<(), StorageError>;

    async fn load_campaigns(
        &self,
        platform_account_id: Uuid,
    ) -> Result<Vec<CampaignRow>, StorageError>;

    async fn load_ad_sets(
        &self,
        platform_account_id: Uuid,
    ) -> Result<Vec<AdSetRow>, StorageError>;

    async fn load_ads(&self, platform_account_id: Uuid) -> Result<Vec<AdRow>, StorageError>;

    async fn mark_integration_synced(
        &self,
        workspace_id: Uuid,
        platform_key: &str,
    ) -> Result<(), StorageError>;
}
