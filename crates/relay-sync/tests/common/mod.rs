//! In-memory [`SyncStore`] used by the engine tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};
use uuid::Uuid;

use relay_storage::{
    AdRecord, AdRow, AdSetRecord, AdSetRow, CampaignRecord, CampaignRow, CreativeAssetRecord,
    MetricRecord, PlatformAccountRecord, StorageError, SyncStore,
};

const NIL: Uuid = Uuid::nil();

#[derive(Default)]
pub struct MemoryState {
    pub accounts: HashMap<(Uuid, String, String), Uuid>,
    pub campaigns: HashMap<(Uuid, String), (Uuid, CampaignRecord)>,
    pub ad_sets: HashMap<(Uuid, String), (Uuid, AdSetRecord)>,
    pub ads: HashMap<(Uuid, String), (Uuid, AdRecord)>,
    pub creatives: HashMap<(Uuid, String), (Uuid, CreativeAssetRecord)>,
    pub metrics: HashMap<(Uuid, Uuid, Uuid, Uuid, Uuid, NaiveDate), MetricRecord>,
    pub day_extras: HashMap<(Uuid, Uuid, NaiveDate), Value>,
    pub synced: Vec<(Uuid, String)>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn snapshot<T>(&self, read: impl FnOnce(&MemoryState) -> T) -> T {
        read(&self.state.lock().expect("lock"))
    }
}

#[async_trait]
impl SyncStore for MemoryStore {
    async fn upsert_platform_account(
        &self,
        record: &PlatformAccountRecord,
    ) -> Result<Uuid, StorageError> {
        let mut state = self.state.lock().expect("lock");
        let key = (
            record.workspace_id,
            record.platform_key.clone(),
            record.external_id.clone(),
        );
        Ok(*state.accounts.entry(key).or_insert_with(Uuid::new_v4))
    }

    async fn upsert_campaign(&self, record: &CampaignRecord) -> Result<(), StorageError> {
        let mut state = self.state.lock().expect("lock");
        let key = (record.platform_account_id, record.external_id.clone());
        let id = state
            .campaigns
            .get(&key)
            .map(|(id, _)| *id)
            .unwrap_or_else(Uuid::new_v4);
        state.campaigns.insert(key, (id, record.clone()));
        Ok(())
    }

    async fn upsert_ad_set(&self, record: &AdSetRecord) -> Result<(), StorageError> {
        let mut state = self.state.lock().expect("lock");
        let key = (record.campaign_id, record.external_id.clone());
        let id = state
            .ad_sets
            .get(&key)
            .map(|(id, _)| *id)
            .unwrap_or_else(Uuid::new_v4);
        state.ad_sets.insert(key, (id, record.clone()));
        Ok(())
    }

    async fn upsert_ad(&self, record: &AdRecord) -> Result<(), StorageError> {
        let mut state = self.state.lock().expect("lock");
        let key = (record.ad_set_id, record.external_id.clone());
        let id = state
            .ads
            .get(&key)
            .map(|(id, _)| *id)
            .unwrap_or_else(Uuid::new_v4);
        state.ads.insert(key, (id, record.clone()));
        Ok(())
    }

    async fn upsert_creative_asset(
        &self,
        record: &CreativeAssetRecord,
    ) -> Result<Uuid, StorageError> {
        let mut state = self.state.lock().expect("lock");
        let key = (record.workspace_id, record.hash.clone());
        let id = state
            .creatives
            .get(&key)
            .map(|(id, _)| *id)
            .unwrap_or_else(Uuid::new_v4);
        state.creatives.insert(key, (id, record.clone()));
        Ok(id)
    }

    async fn upsert_metric(&self, record: &MetricRecord) -> Result<(), StorageError> {
        let mut state = self.state.lock().expect("lock");
        let key = (
            record.workspace_id,
            record.platform_account_id,
            record.campaign_id.unwrap_or(NIL),
            record.ad_set_id.unwrap_or(NIL),
            record.ad_id.unwrap_or(NIL),
            record.metric_date,
        );
        state.metrics.insert(key, record.clone());
        Ok(())
    }

    async fn merge_day_extras(
        &self,
        workspace_id: Uuid,
        platform_account_id: Uuid,
        metric_date: NaiveDate,
        extras: &Value,
    ) -> Result<(), StorageError> {
        let mut state = self.state.lock().expect("lock");
        let bag = state
            .day_extras
            .entry((workspace_id, platform_account_id, metric_date))
            .or_insert_with(|| json!({}));
        if let (Some(existing), Some(incoming)) = (bag.as_object_mut(), extras.as_object()) {
            for (key, value) in incoming {
                existing.insert(key.clone(), value.clone());
            }
        }
        Ok(())
    }

    async fn load_campaigns(
        &self,
        platform_account_id: Uuid,
    ) -> Result<Vec<CampaignRow>, StorageError> {
        Ok(self.snapshot(|state| {
            state
                .campaigns
                .iter()
                .filter(|((account, _), _)| *account == platform_account_id)
                .map(|((_, external_id), (id, _))| CampaignRow {
                    id: *id,
                    external_id: external_id.clone(),
                })
                .collect()
        }))
    }

    async fn load_ad_sets(
        &self,
        platform_account_id: Uuid,
    ) -> Result<Vec<AdSetRow>, StorageError> {
        Ok(self.snapshot(|state| {
            state
                .ad_sets
                .values()
                .filter(|(_, record)| record.platform_account_id == platform_account_id)
                .map(|(id, record)| AdSetRow {
                    id: *id,
                    external_id: record.external_id.clone(),
                    campaign_id: record.campaign_id,
                })
                .collect()
        }))
    }

    async fn load_ads(&self, platform_account_id: Uuid) -> Result<Vec<AdRow>, StorageError> {
        Ok(self.snapshot(|state| {
            state
                .ads
                .values()
                .filter(|(_, record)| record.platform_account_id == platform_account_id)
                .filter_map(|(id, record)| {
                    let campaign_id = state
                        .ad_sets
                        .values()
                        .find(|(set_id, _)| *set_id == record.ad_set_id)
                        .map(|(_, set)| set.campaign_id)?;
                    Some(AdRow {
                        id: *id,
                        external_id: record.external_id.clone(),
                        ad_set_id: record.ad_set_id,
                        campaign_id,
                    })
                })
                .collect()
        }))
    }

    async fn mark_integration_synced(
        &self,
        workspace_id: Uuid,
        platform_key: &str,
    ) -> Result<(), StorageError> {
        self.state
            .lock()
            .expect("lock")
            .synced
            .push((workspace_id, platform_key.to_string()));
        Ok(())
    }
}
