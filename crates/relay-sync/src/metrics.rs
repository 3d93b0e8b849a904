//! Metric ingestion: per-day insight rows at every scope level.
//!
//! Rows arrive keyed by external ids; the resolver maps them onto
//! internal ids read back from storage. A row whose scope cannot be
//! resolved (the entity was archived out of the listing window, or its
//! parent failed to sync) is counted and dropped rather than written with
//! a dangling scope.

use chrono::NaiveDate;
use tracing::warn;
use uuid::Uuid;

use relay_core::{DerivedMetrics, Granularity, InsightLevel, InsightRow, SyncWindow};
use relay_storage::{EntityResolver, MetricRecord};

use crate::engine::{AdsSync, MetricScope};
use crate::{api_err, store_err, ProgressReporter, SyncError, SyncPhase, SyncSummary};

fn resolve_scope(
    level: InsightLevel,
    row: &InsightRow,
    resolver: &EntityResolver,
) -> Option<MetricScope> {
    match level {
        InsightLevel::Account => Some(MetricScope::default()),
        InsightLevel::Campaign => {
            let campaign_id = resolver.campaign(row.campaign_id.as_deref()?)?;
            Some(MetricScope {
                campaign_id: Some(campaign_id),
                ..Default::default()
            })
        }
        InsightLevel::AdSet => {
            let ad_set = resolver.ad_set(row.adset_id.as_deref()?)?;
            Some(MetricScope {
                campaign_id: Some(ad_set.campaign_id),
                ad_set_id: Some(ad_set.id),
                ad_id: None,
            })
        }
        InsightLevel::Ad => {
            let ad = resolver.ad(row.ad_id.as_deref()?)?;
            Some(MetricScope {
                campaign_id: Some(ad.campaign_id),
                ad_set_id: Some(ad.ad_set_id),
                ad_id: Some(ad.id),
            })
        }
    }
}

fn metric_date(row: &InsightRow) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(row.date_start.as_deref()?, "%Y-%m-%d").ok()
}

impl AdsSync {
    pub(crate) async fn sync_metrics(
        &self,
        workspace_id: Uuid,
        platform_account_id: Uuid,
        account_currency: Option<&str>,
        window: &SyncWindow,
        resolver: &mut EntityResolver,
        summary: &mut SyncSummary,
        progress: &ProgressReporter,
    ) -> Result<bool, SyncError> {
        // A metrics-only run starts with an empty resolver; a full run
        // refreshed it during hierarchy sync. Refreshing is idempotent, so
        // always read back all three levels before resolving scopes.
        resolver
            .refresh_campaigns(self.store.as_ref(), platform_account_id)
            .await
            .map_err(store_err(SyncPhase::Metrics))?;
        resolver
            .refresh_ad_sets(self.store.as_ref(), platform_account_id)
            .await
            .map_err(store_err(SyncPhase::Metrics))?;
        resolver
            .refresh_ads(self.store.as_ref(), platform_account_id)
            .await
            .map_err(store_err(SyncPhase::Metrics))?;

        for (index, level) in InsightLevel::ALL.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Ok(true);
            }
            let percent = 70 + (index as u8) * 6;
            progress.report(percent, &format!("ingesting {} metrics", level.as_str()));

            let rows = self
                .api
                .insights(level, window)
                .await
                .map_err(api_err(SyncPhase::Metrics))?;

            for row in &rows {
                let Some(date) = metric_date(row) else {
                    warn!(level = level.as_str(), "insight row has no date, dropping");
                    summary.metrics_skipped += 1;
                    continue;
                };
                let Some(scope) = resolve_scope(level, row, resolver) else {
                    warn!(
                        level = level.as_str(),
                        campaign = row.campaign_id.as_deref().unwrap_or("-"),
                        adset = row.adset_id.as_deref().unwrap_or("-"),
                        ad = row.ad_id.as_deref().unwrap_or("-"),
                        "insight scope not resolvable, dropping row"
                    );
                    summary.metrics_skipped += 1;
                    continue;
                };

                let derived = DerivedMetrics::from_row(row);
                let record = MetricRecord {
                    workspace_id,
                    platform_account_id,
                    campaign_id: scope.campaign_id,
                    ad_set_id: scope.ad_set_id,
                    ad_id: scope.ad_id,
                    granularity: Granularity::Day,
                    metric_date: date,
                    currency: row
                        .account_currency
                        .clone()
                        .or_else(|| account_currency.map(str::to_string)),
                    impressions: derived.impressions,
                    clicks: derived.clicks,
                    spend: derived.spend,
                    ctr: derived.ctr,
                    cpc: derived.cpc,
                    cpa: derived.cpa,
                    roas: derived.roas,
                    conversions: derived.conversions,
                    conversion_value: derived.conversion_value,
                    extra_metrics: derived.extra,
                };
                self.store
                    .upsert_metric(&record)
                    .await
                    .map_err(store_err(SyncPhase::Metrics))?;
                summary.metrics_synced += 1;
            }
        }

        progress.report(95, "metrics stored");
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_storage::{AdRow, AdSetRow, CampaignRow};

    fn row(campaign: Option<&str>, adset: Option<&str>, ad: Option<&str>) -> InsightRow {
        InsightRow {
            date_start: Some("2024-03-08".to_string()),
            campaign_id: campaign.map(str::to_string),
            adset_id: adset.map(str::to_string),
            ad_id: ad.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn account_level_rows_resolve_to_empty_scope() {
        let resolver = EntityResolver::new();
        let scope = resolve_scope(InsightLevel::Account, &row(None, None, None), &resolver)
            .expect("scope");
        assert_eq!(scope.campaign_id, None);
        assert_eq!(scope.ad_set_id, None);
        assert_eq!(scope.ad_id, None);
    }

    #[test]
    fn ad_level_rows_carry_the_full_parent_chain() {
        let mut resolver = EntityResolver::new();
        let (c, s, a) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        resolver.set_campaigns(vec![CampaignRow {
            id: c,
            external_id: "c1".to_string(),
        }]);
        resolver.set_ad_sets(vec![AdSetRow {
            id: s,
            external_id: "s1".to_string(),
            campaign_id: c,
        }]);
        resolver.set_ads(vec![AdRow {
            id: a,
            external_id: "a1".to_string(),
            ad_set_id: s,
            campaign_id: c,
        }]);

        let scope = resolve_scope(
            InsightLevel::Ad,
            &row(Some("c1"), Some("s1"), Some("a1")),
            &resolver,
        )
        .expect("scope");
        assert_eq!(scope.campaign_id, Some(c));
        assert_eq!(scope.ad_set_id, Some(s));
        assert_eq!(scope.ad_id, Some(a));
    }

    #[test]
    fn unresolvable_scope_is_dropped() {
        let resolver = EntityResolver::new();
        assert!(resolve_scope(
            InsightLevel::Campaign,
            &row(Some("missing"), None, None),
            &resolver
        )
        .is_none());
        // Missing external id entirely also drops.
        assert!(resolve_scope(InsightLevel::Ad, &row(None, None, None), &resolver).is_none());
    }

    #[test]
    fn malformed_dates_are_rejected() {
        let mut bad = row(None, None, None);
        bad.date_start = Some("03/08/2024".to_string());
        assert_eq!(metric_date(&bad), None);
        assert_eq!(
            metric_date(&row(None, None, None)),
            NaiveDate::from_ymd_opt(2024, 3, 8)
        );
    }
}
