//! Social sync: account insight series, media listings, per-media metrics.
//!
//! Unlike the ads hierarchy there are no child entities to resolve; the
//! account series land in the platform account's per-day extras bag and
//! each media item becomes a creative asset deduplicated by its external
//! id. Individual series fetches are tolerant (a metric the token cannot
//! read is counted and skipped); the profile probe and the media listing
//! are fatal.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

use relay_core::window::reporting_tz;
use relay_core::SyncWindow;
use relay_platforms::pool::{enrich_many, PoolConfig};
use relay_platforms::social::{
    InsightSeries, RawMedia, SocialApi, DAILY_SERIES_METRICS, TOTAL_VALUE_METRICS,
};
use relay_storage::{CreativeAssetRecord, PlatformAccountRecord, SyncStore};

use crate::{
    api_err, store_err, CancelToken, NoopProgress, ProgressReporter, ProgressSink, RunStatus,
    SyncError, SyncPhase, PLATFORM_SOCIAL,
};

#[derive(Debug, Clone, serde::Serialize)]
pub struct SocialSummary {
    pub status: RunStatus,
    /// Per-day account insight datapoints merged into storage.
    pub user_insights: usize,
    pub media_fetched: usize,
    pub media_insights: usize,
    pub items_failed: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

pub struct SocialSync {
    store: Arc<dyn SyncStore>,
    api: Arc<dyn SocialApi>,
    progress: Arc<dyn ProgressSink>,
    cancel: CancelToken,
    pool: PoolConfig,
}

fn day_of(timestamp: &str) -> Option<NaiveDate> {
    DateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S%z")
        .ok()
        .map(|dt| dt.with_timezone(&reporting_tz()).date_naive())
}

/// Flatten one series response into `(metric name, value)` pairs, taking
/// the aggregate when the metric was requested as a total.
fn series_value(series: &InsightSeries) -> Option<Value> {
    if let Some(total) = &series.total_value {
        return Some(total.get("value").cloned().unwrap_or_else(|| total.clone()));
    }
    series.values.last()?.value.clone()
}

fn media_kind(media_type: Option<&str>) -> &'static str {
    match media_type {
        Some("VIDEO") => "video",
        Some("CAROUSEL_ALBUM") => "carousel",
        _ => "image",
    }
}

fn media_name(raw: &RawMedia) -> String {
    raw.caption
        .as_deref()
        .and_then(|caption| caption.lines().find(|line| !line.trim().is_empty()))
        .map(|line| line.trim().chars().take(80).collect())
        .unwrap_or_else(|| format!("Media {}", raw.id))
}

impl SocialSync {
    pub fn new(store: Arc<dyn SyncStore>, api: Arc<dyn SocialApi>) -> Self {
        Self {
            store,
            api,
            progress: Arc::new(NoopProgress),
            cancel: CancelToken::new(),
            pool: PoolConfig::default(),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_pool_config(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub async fn run(
        &self,
        workspace_id: Uuid,
        days: i64,
    ) -> Result<SocialSummary, SyncError> {
        let started_at = Utc::now();
        let mut summary = SocialSummary {
            status: RunStatus::Completed,
            user_insights: 0,
            media_fetched: 0,
            media_insights: 0,
            items_failed: 0,
            started_at,
            completed_at: started_at,
        };
        let progress = ProgressReporter::new(Arc::clone(&self.progress));
        let window = SyncWindow::metrics(days, started_at)?;

        info!(workspace = %workspace_id, days, "starting social sync");

        progress.report(2, "validating permissions");
        let profile = self
            .api
            .validate_permissions()
            .await
            .map_err(api_err(SyncPhase::Account))?;
        let account = PlatformAccountRecord {
            workspace_id,
            platform_key: PLATFORM_SOCIAL.to_string(),
            external_id: profile.id.clone(),
            display_name: profile
                .username
                .clone()
                .unwrap_or_else(|| profile.id.clone()),
            metadata: json!({
                "followers_count": profile.followers_count,
                "media_count": profile.media_count,
            }),
        };
        let platform_account_id = self
            .store
            .upsert_platform_account(&account)
            .await
            .map_err(store_err(SyncPhase::Account))?;
        progress.report(10, "account profile stored");

        if self.cancel.is_cancelled() {
            return Ok(self.finish_cancelled(summary, &progress));
        }

        let day_bags = self.collect_account_series(&window, &mut summary).await;
        for (date, bag) in &day_bags {
            self.store
                .merge_day_extras(workspace_id, platform_account_id, *date, &Value::Object(bag.clone()))
                .await
                .map_err(store_err(SyncPhase::Metrics))?;
        }
        progress.report(45, "account insights stored");

        if self.cancel.is_cancelled() {
            return Ok(self.finish_cancelled(summary, &progress));
        }

        progress.report(50, "listing media");
        let media = self
            .api
            .list_media(&window)
            .await
            .map_err(api_err(SyncPhase::Media))?;
        summary.media_fetched = media.len();

        let mut posted_days: HashMap<String, NaiveDate> = HashMap::new();
        for raw in &media {
            if let Some(posted) = raw.posted_at() {
                posted_days.insert(
                    raw.id.clone(),
                    posted.with_timezone(&reporting_tz()).date_naive(),
                );
            }
            let record = CreativeAssetRecord {
                workspace_id,
                kind: media_kind(raw.media_type.as_deref()).to_string(),
                name: media_name(raw),
                storage_url: raw.media_url.clone(),
                thumbnail_url: raw.thumbnail_url.clone().or_else(|| raw.media_url.clone()),
                text_content: raw.caption.clone(),
                hash: raw.id.clone(),
                metadata: json!({
                    "permalink": raw.permalink,
                    "media_type": raw.media_type,
                    "like_count": raw.like_count,
                    "comments_count": raw.comments_count,
                    "timestamp": raw.timestamp,
                }),
            };
            self.store
                .upsert_creative_asset(&record)
                .await
                .map_err(store_err(SyncPhase::Media))?;
        }
        progress.report(70, "media stored");

        if self.cancel.is_cancelled() {
            return Ok(self.finish_cancelled(summary, &progress));
        }

        let api = Arc::clone(&self.api);
        let media_ids: Vec<String> = media.iter().map(|m| m.id.clone()).collect();
        let insight_batches = enrich_many(media_ids, self.pool, move |media_id: String| {
            let api = Arc::clone(&api);
            async move { api.media_insights(&media_id).await }
        })
        .await;
        summary.items_failed += insight_batches.failed;

        let fallback_day = window.until.date_naive();
        let mut per_day: HashMap<NaiveDate, Map<String, Value>> = HashMap::new();
        for (media_id, series_list) in insight_batches.values {
            let mut metrics = Map::new();
            for series in &series_list {
                let Some(name) = series.name.clone() else {
                    continue;
                };
                if let Some(value) = series_value(series) {
                    metrics.insert(name, value);
                }
            }
            if metrics.is_empty() {
                continue;
            }
            let day = posted_days.get(&media_id).copied().unwrap_or(fallback_day);
            per_day
                .entry(day)
                .or_default()
                .insert(media_id, Value::Object(metrics));
            summary.media_insights += 1;
        }
        // One merge per day so the jsonb merge never clobbers another
        // media item's insights under the shared key.
        for (date, items) in per_day {
            let extras = json!({ "media_insights": Value::Object(items) });
            self.store
                .merge_day_extras(workspace_id, platform_account_id, date, &extras)
                .await
                .map_err(store_err(SyncPhase::Metrics))?;
        }
        progress.report(92, "media insights stored");

        progress.report(98, "finalizing");
        self.store
            .mark_integration_synced(workspace_id, PLATFORM_SOCIAL)
            .await
            .map_err(store_err(SyncPhase::Finalize))?;

        summary.completed_at = Utc::now();
        progress.report(100, "sync complete");
        info!(
            user_insights = summary.user_insights,
            media = summary.media_fetched,
            media_insights = summary.media_insights,
            failed = summary.items_failed,
            "social sync complete"
        );
        Ok(summary)
    }

    /// Fetch every account-level metric, tolerating individual failures,
    /// and bucket the datapoints per reporting-zone day.
    async fn collect_account_series(
        &self,
        window: &SyncWindow,
        summary: &mut SocialSummary,
    ) -> HashMap<NaiveDate, Map<String, Value>> {
        let mut day_bags: HashMap<NaiveDate, Map<String, Value>> = HashMap::new();
        let total_day = window.until.date_naive();

        for metric in DAILY_SERIES_METRICS {
            match self.api.daily_series(metric, window).await {
                Ok(series_list) => {
                    for series in &series_list {
                        for point in &series.values {
                            let Some(day) = point.end_time.as_deref().and_then(day_of) else {
                                continue;
                            };
                            let Some(value) = point.value.clone() else {
                                continue;
                            };
                            day_bags
                                .entry(day)
                                .or_default()
                                .insert(metric.to_string(), value);
                            summary.user_insights += 1;
                        }
                    }
                }
                Err(err) => {
                    warn!(metric, error = %err, "daily series fetch failed, skipping metric");
                    summary.items_failed += 1;
                }
            }
        }

        for metric in TOTAL_VALUE_METRICS {
            match self.api.total_value_series(metric, window).await {
                Ok(series_list) => {
                    for series in &series_list {
                        if let Some(value) = series_value(series) {
                            day_bags
                                .entry(total_day)
                                .or_default()
                                .insert(metric.to_string(), value);
                            summary.user_insights += 1;
                        }
                    }
                }
                Err(err) => {
                    warn!(metric, error = %err, "total value fetch failed, skipping metric");
                    summary.items_failed += 1;
                }
            }
        }

        day_bags
    }

    fn finish_cancelled(
        &self,
        mut summary: SocialSummary,
        progress: &ProgressReporter,
    ) -> SocialSummary {
        summary.status = RunStatus::Cancelled;
        summary.completed_at = Utc::now();
        progress.report(100, "sync cancelled");
        info!("social sync cancelled, partial progress committed");
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_value_prefers_the_total_aggregate() {
        let series: InsightSeries = serde_json::from_value(json!({
            "name": "profile_views",
            "values": [{"value": 3}],
            "total_value": {"value": 42},
        }))
        .expect("series");
        assert_eq!(series_value(&series), Some(json!(42)));
    }

    #[test]
    fn series_value_falls_back_to_latest_point() {
        let series: InsightSeries = serde_json::from_value(json!({
            "name": "reach",
            "values": [{"value": 5}, {"value": 9}],
        }))
        .expect("series");
        assert_eq!(series_value(&series), Some(json!(9)));
    }

    #[test]
    fn end_time_buckets_to_the_reporting_day() {
        // 01:00 UTC is still the previous civil day at UTC-03:00.
        let day = day_of("2024-03-11T01:00:00+0000").expect("day");
        assert_eq!(day, NaiveDate::from_ymd_opt(2024, 3, 10).expect("date"));
    }

    #[test]
    fn media_names_truncate_captions() {
        let raw = RawMedia {
            id: "m1".to_string(),
            caption: Some("First line of a caption\nSecond line".to_string()),
            media_type: Some("VIDEO".to_string()),
            media_url: None,
            thumbnail_url: None,
            permalink: None,
            timestamp: None,
            like_count: None,
            comments_count: None,
        };
        assert_eq!(media_name(&raw), "First line of a caption");
        assert_eq!(media_kind(raw.media_type.as_deref()), "video");

        let leading_blank = RawMedia {
            caption: Some("\n  \nActual headline".to_string()),
            ..raw.clone()
        };
        assert_eq!(media_name(&leading_blank), "Actual headline");

        let whitespace_only = RawMedia {
            caption: Some("\n  \n".to_string()),
            ..raw.clone()
        };
        assert_eq!(media_name(&whitespace_only), "Media m1");

        let bare = RawMedia {
            caption: None,
            ..raw
        };
        assert_eq!(media_name(&bare), "Media m1");
    }
}
