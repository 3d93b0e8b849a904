//! Hierarchical entity sync: campaigns, then ad sets, then ads with
//! their creatives.
//!
//! The campaign listing is the only fatal fetch; every per-campaign and
//! per-ad-set child listing goes through the bounded enrichment pool and a
//! failing item is counted and skipped. Children whose parent cannot be
//! resolved after the parent level's read-back are skipped too, never
//! written with a dangling reference.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use relay_core::{minor_units_to_decimal, normalize_status, SyncWindow};
use relay_platforms::ads::{build_creative_payload, RawAd, RawAdSet, RawCampaign};
use relay_platforms::pool::enrich_many;
use relay_storage::{
    AdRecord, AdSetRecord, CampaignRecord, CreativeAssetRecord, EntityResolver,
};

use crate::engine::AdsSync;
use crate::{api_err, store_err, ProgressReporter, SyncError, SyncPhase, SyncSummary};

/// Graph timestamps come back as `2024-03-08T14:30:00+0000`.
fn parse_graph_time(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|ts| DateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%z").ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn campaign_record(
    workspace_id: Uuid,
    platform_account_id: Uuid,
    raw: &RawCampaign,
) -> CampaignRecord {
    CampaignRecord {
        workspace_id,
        platform_account_id,
        external_id: raw.id.clone(),
        name: raw
            .name
            .clone()
            .unwrap_or_else(|| format!("Campaign {}", raw.id)),
        objective: raw.objective.clone(),
        status: normalize_status(
            raw.status.as_deref().unwrap_or(""),
            raw.effective_status.as_deref(),
        ),
        start_date: parse_graph_time(raw.start_time.as_deref()),
        end_date: parse_graph_time(raw.stop_time.as_deref()),
        daily_budget: minor_units_to_decimal(raw.daily_budget.as_ref()),
        lifetime_budget: minor_units_to_decimal(raw.lifetime_budget.as_ref()),
    }
}

fn ad_set_record(campaign_id: Uuid, platform_account_id: Uuid, raw: &RawAdSet) -> AdSetRecord {
    let daily_budget = minor_units_to_decimal(raw.daily_budget.as_ref());
    let lifetime_budget = minor_units_to_decimal(raw.lifetime_budget.as_ref());
    let budget_type = if daily_budget.is_some() {
        Some("daily".to_string())
    } else if lifetime_budget.is_some() {
        Some("lifetime".to_string())
    } else {
        None
    };
    AdSetRecord {
        campaign_id,
        platform_account_id,
        external_id: raw.id.clone(),
        name: raw
            .name
            .clone()
            .unwrap_or_else(|| format!("Ad set {}", raw.id)),
        status: normalize_status(
            raw.status.as_deref().unwrap_or(""),
            raw.effective_status.as_deref(),
        ),
        start_date: parse_graph_time(raw.start_time.as_deref()),
        end_date: parse_graph_time(raw.end_time.as_deref()),
        bid_strategy: raw.bid_strategy.clone(),
        bid_amount: minor_units_to_decimal(raw.bid_amount.as_ref()),
        budget_type,
        daily_budget,
        lifetime_budget,
        targeting: raw.targeting.clone().unwrap_or_else(|| json!({})),
        promoted_object: raw.promoted_object.clone().unwrap_or_else(|| json!({})),
        destination_type: raw.destination_type.clone(),
    }
}

impl AdsSync {
    pub(crate) async fn sync_hierarchy(
        &self,
        workspace_id: Uuid,
        platform_account_id: Uuid,
        window: &SyncWindow,
        resolver: &mut EntityResolver,
        summary: &mut SyncSummary,
        progress: &ProgressReporter,
    ) -> Result<bool, SyncError> {
        progress.report(10, "listing campaigns");
        let campaigns = self
            .api
            .list_campaigns(window)
            .await
            .map_err(api_err(SyncPhase::Campaigns))?;

        for raw in &campaigns {
            let record = campaign_record(workspace_id, platform_account_id, raw);
            self.store
                .upsert_campaign(&record)
                .await
                .map_err(store_err(SyncPhase::Campaigns))?;
            summary.campaigns_synced += 1;
        }
        resolver
            .refresh_campaigns(self.store.as_ref(), platform_account_id)
            .await
            .map_err(store_err(SyncPhase::Campaigns))?;
        progress.report(25, "campaigns stored");

        if self.cancel.is_cancelled() {
            return Ok(true);
        }

        let campaign_ids: Vec<String> = campaigns.iter().map(|c| c.id.clone()).collect();
        let api = Arc::clone(&self.api);
        let ad_set_batches = enrich_many(campaign_ids, self.pool, move |campaign_id: String| {
            let api = Arc::clone(&api);
            async move { api.list_ad_sets(&campaign_id).await }
        })
        .await;
        summary.items_failed += ad_set_batches.failed;

        let mut ad_set_ids = Vec::new();
        for (campaign_ext, ad_sets) in ad_set_batches.values {
            let Some(campaign_id) = resolver.campaign(&campaign_ext) else {
                warn!(
                    campaign = %campaign_ext,
                    orphans = ad_sets.len(),
                    "campaign not resolvable, skipping its ad sets"
                );
                summary.entities_skipped += ad_sets.len();
                continue;
            };
            for raw in &ad_sets {
                let record = ad_set_record(campaign_id, platform_account_id, raw);
                self.store
                    .upsert_ad_set(&record)
                    .await
                    .map_err(store_err(SyncPhase::AdSets))?;
                summary.ad_sets_synced += 1;
                ad_set_ids.push(raw.id.clone());
            }
        }
        resolver
            .refresh_ad_sets(self.store.as_ref(), platform_account_id)
            .await
            .map_err(store_err(SyncPhase::AdSets))?;
        progress.report(40, "ad sets stored");

        if self.cancel.is_cancelled() {
            return Ok(true);
        }

        let api = Arc::clone(&self.api);
        let ad_batches = enrich_many(ad_set_ids, self.pool, move |ad_set_id: String| {
            let api = Arc::clone(&api);
            async move { api.list_ads(&ad_set_id).await }
        })
        .await;
        summary.items_failed += ad_batches.failed;

        let mut ads: Vec<RawAd> = Vec::new();
        let mut creative_ids: HashSet<String> = HashSet::new();
        for (_, batch) in ad_batches.values {
            for ad in batch {
                if let Some(creative) = &ad.creative {
                    creative_ids.insert(creative.id.clone());
                }
                ads.push(ad);
            }
        }
        progress.report(55, "fetching creative details");

        if self.cancel.is_cancelled() {
            return Ok(true);
        }

        // Creatives go in before ads so ads can reference their asset row.
        let api = Arc::clone(&self.api);
        let creative_batches = enrich_many(
            creative_ids.into_iter().collect(),
            self.pool,
            move |creative_id: String| {
                let api = Arc::clone(&api);
                async move { api.creative_details(&creative_id).await }
            },
        )
        .await;
        summary.items_failed += creative_batches.failed;

        let mut asset_ids: std::collections::HashMap<String, Uuid> =
            std::collections::HashMap::new();
        for (creative_ext, raw) in creative_batches.values {
            let payload = build_creative_payload(&raw);
            let record = CreativeAssetRecord {
                workspace_id,
                kind: payload.kind.as_str().to_string(),
                name: payload.name,
                storage_url: payload.storage_url,
                thumbnail_url: payload.thumbnail_url,
                text_content: payload.text_content,
                hash: payload.hash,
                metadata: payload.metadata,
            };
            let asset_id = self
                .store
                .upsert_creative_asset(&record)
                .await
                .map_err(store_err(SyncPhase::Creatives))?;
            asset_ids.insert(creative_ext, asset_id);
            summary.creatives_synced += 1;
        }
        progress.report(65, "storing ads");

        for raw in &ads {
            let Some(parent) = raw
                .adset_id
                .as_deref()
                .and_then(|ext| resolver.ad_set(ext))
            else {
                warn!(ad = %raw.id, "ad set not resolvable, skipping ad");
                summary.entities_skipped += 1;
                continue;
            };
            let creative_asset_id = raw
                .creative
                .as_ref()
                .and_then(|c| asset_ids.get(&c.id))
                .copied();
            let record = AdRecord {
                ad_set_id: parent.id,
                platform_account_id,
                external_id: raw.id.clone(),
                name: raw
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("Ad {}", raw.id)),
                status: normalize_status(
                    raw.status.as_deref().unwrap_or(""),
                    raw.effective_status.as_deref(),
                ),
                creative_asset_id,
            };
            self.store
                .upsert_ad(&record)
                .await
                .map_err(store_err(SyncPhase::Ads))?;
            summary.ads_synced += 1;
        }
        resolver
            .refresh_ads(self.store.as_ref(), platform_account_id)
            .await
            .map_err(store_err(SyncPhase::Ads))?;
        progress.report(68, "hierarchy stored");

        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn graph_timestamps_parse_with_compact_offset() {
        let parsed = parse_graph_time(Some("2024-03-08T14:30:00+0000")).expect("parsed");
        assert_eq!(parsed.to_rfc3339(), "2024-03-08T14:30:00+00:00");
        assert_eq!(parse_graph_time(Some("not a date")), None);
        assert_eq!(parse_graph_time(None), None);
    }

    #[test]
    fn budget_type_follows_whichever_budget_is_set() {
        let raw = RawAdSet {
            id: "as1".to_string(),
            campaign_id: None,
            name: None,
            status: Some("ACTIVE".to_string()),
            effective_status: None,
            start_time: None,
            end_time: None,
            daily_budget: Some(json!("2500")),
            lifetime_budget: None,
            bid_strategy: None,
            bid_amount: None,
            targeting: None,
            promoted_object: None,
            destination_type: None,
        };
        let record = ad_set_record(Uuid::new_v4(), Uuid::new_v4(), &raw);
        assert_eq!(record.budget_type.as_deref(), Some("daily"));
        assert_eq!(record.daily_budget, Some(25.0));
        assert_eq!(record.name, "Ad set as1");
    }
}
