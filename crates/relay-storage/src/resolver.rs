//! External-id to internal-id translation, scoped by parent.
//!
//! The maps are rebuilt by re-reading just-written rows from storage after
//! each level's upserts rather than being accumulated in memory across the
//! run: upserts may land on rows created by an earlier run under a
//! different internal id, and reading back is correct where guessing is
//! not. This also makes a run resumable after a crash mid-hierarchy.

use std::collections::HashMap;

use uuid::Uuid;

use crate::{AdRow, AdSetRow, CampaignRow, StorageError, SyncStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAdSet {
    pub id: Uuid,
    pub campaign_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedAd {
    pub id: Uuid,
    pub ad_set_id: Uuid,
    pub campaign_id: Uuid,
}

#[derive(Debug, Default)]
pub struct EntityResolver {
    campaigns: HashMap<String, Uuid>,
    ad_sets: HashMap<String, ResolvedAdSet>,
    ads: HashMap<String, ResolvedAd>,
}

impl EntityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn refresh_campaigns(
        &mut self,
        store: &dyn SyncStore,
        platform_account_id: Uuid,
    ) -> Result<(), StorageError> {
        self.set_campaigns(store.load_campaigns(platform_account_id).await?);
        Ok(())
    }

    pub async fn refresh_ad_sets(
        &mut self,
        store: &dyn SyncStore,
        platform_account_id: Uuid,
    ) -> Result<(), StorageError> {
        self.set_ad_sets(store.load_ad_sets(platform_account_id).await?);
        Ok(())
    }

    pub async fn refresh_ads(
        &mut self,
        store: &dyn SyncStore,
        platform_account_id: Uuid,
    ) -> Result<(), StorageError> {
        self.set_ads(store.load_ads(platform_account_id).await?);
        Ok(())
    }

    pub fn set_campaigns(&mut self, rows: Vec<CampaignRow>) {
        self.campaigns = rows
            .into_iter()
            .map(|row| (row.external_id, row.id))
            .collect();
    }

    pub fn set_ad_sets(&mut self, rows: Vec<AdSetRow>) {
        self.ad_sets = rows
            .into_iter()
            .map(|row| {
                (
                    row.external_id,
                    ResolvedAdSet {
                        id: row.id,
                        campaign_id: row.campaign_id,
                    },
                )
            })
            .collect();
    }

    pub fn set_ads(&mut self, rows: Vec<AdRow>) {
        self.ads = rows
            .into_iter()
            .map(|row| {
                (
                    row.external_id,
                    ResolvedAd {
                        id: row.id,
                        ad_set_id: row.ad_set_id,
                        campaign_id: row.campaign_id,
                    },
                )
            })
            .collect();
    }

    pub fn campaign(&self, external_id: &str) -> Option<Uuid> {
        self.campaigns.get(external_id).copied()
    }

    pub fn ad_set(&self, external_id: &str) -> Option<ResolvedAdSet> {
        self.ad_sets.get(external_id).copied()
    }

    pub fn ad(&self, external_id: &str) -> Option<ResolvedAd> {
        self.ads.get(external_id).copied()
    }

    pub fn campaign_count(&self) -> usize {
        self.campaigns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_external_ids_resolve_to_none() {
        let mut resolver = EntityResolver::new();
        let internal = Uuid::new_v4();
        resolver.set_campaigns(vec![CampaignRow {
            id: internal,
            external_id: "ext-1".to_string(),
        }]);

        assert_eq!(resolver.campaign("ext-1"), Some(internal));
        assert_eq!(resolver.campaign("ext-missing"), None);
        assert_eq!(resolver.ad_set("anything"), None);
    }

    #[test]
    fn refresh_replaces_rather_than_accumulates() {
        let mut resolver = EntityResolver::new();
        resolver.set_campaigns(vec![CampaignRow {
            id: Uuid::new_v4(),
            external_id: "stale".to_string(),
        }]);
        resolver.set_campaigns(vec![CampaignRow {
            id: Uuid::new_v4(),
            external_id: "fresh".to_string(),
        }]);

        assert_eq!(resolver.campaign("stale"), None);
        assert!(resolver.campaign("fresh").is_some());
        assert_eq!(resolver.campaign_count(), 1);
    }

    #[test]
    fn ad_rows_carry_full_parent_chain() {
        let mut resolver = EntityResolver::new();
        let (ad_id, ad_set_id, campaign_id) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        resolver.set_ads(vec![AdRow {
            id: ad_id,
            external_id: "ad-9".to_string(),
            ad_set_id,
            campaign_id,
        }]);

        let resolved = resolver.ad("ad-9").expect("resolved");
        assert_eq!(resolved.id, ad_id);
        assert_eq!(resolved.ad_set_id, ad_set_id);
        assert_eq!(resolved.campaign_id, campaign_id);
    }
}
