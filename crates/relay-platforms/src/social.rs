//! Client for the social graph API: account-level insight series, media
//! listings and per-media insight metrics.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use relay_core::SyncWindow;

use crate::{fetch_all, ApiError, GraphClient, PageSource};

const PAGE_LIMIT: &str = "100";
const MEDIA_FIELDS: &str = "id,caption,media_type,media_url,thumbnail_url,permalink,timestamp,\
                            like_count,comments_count";

/// Per-day metrics the platform serves as plain time series.
pub const DAILY_SERIES_METRICS: [&str; 2] = ["reach", "follower_count"];

/// Metrics only available through the `total_value` aggregation.
pub const TOTAL_VALUE_METRICS: [&str; 9] = [
    "profile_views",
    "website_clicks",
    "accounts_engaged",
    "total_interactions",
    "likes",
    "comments",
    "shares",
    "saves",
    "replies",
];

/// Per-media insight metrics requested item by item.
pub const MEDIA_METRICS: [&str; 6] = [
    "reach",
    "saved",
    "plays",
    "total_interactions",
    "profile_activity",
    "shares",
];

#[derive(Debug, Clone, Deserialize)]
pub struct SocialProfile {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub followers_count: Option<i64>,
    #[serde(default)]
    pub media_count: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeriesPoint {
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub total_value: Option<Value>,
}

/// One named insight series: `{name, values: [{end_time, value}]}` or a
/// `total_value` aggregate depending on the metric.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InsightSeries {
    #[serde(default, alias = "title")]
    pub name: Option<String>,
    #[serde(default)]
    pub values: Vec<SeriesPoint>,
    #[serde(default)]
    pub total_value: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMedia {
    pub id: String,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub permalink: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub like_count: Option<i64>,
    #[serde(default)]
    pub comments_count: Option<i64>,
}

impl RawMedia {
    pub fn posted_at(&self) -> Option<DateTime<Utc>> {
        self.timestamp
            .as_deref()
            .and_then(|ts| DateTime::parse_from_str(ts, "%Y-%m-%dT%H:%M:%S%z").ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Operations the social sync path needs from the platform. Implemented
/// by [`GraphSocialClient`]; mocked in the engine's integration tests.
#[async_trait]
pub trait SocialApi: Send + Sync {
    /// Cheap probe confirming the token can read the profile and the
    /// insights surface; failures map to missing-permission errors.
    async fn validate_permissions(&self) -> Result<SocialProfile, ApiError>;

    async fn daily_series(
        &self,
        metric: &str,
        window: &SyncWindow,
    ) -> Result<Vec<InsightSeries>, ApiError>;

    async fn total_value_series(
        &self,
        metric: &str,
        window: &SyncWindow,
    ) -> Result<Vec<InsightSeries>, ApiError>;

    /// Media within the window, newest first. The listing endpoint has no
    /// server-side date filter, so the window is applied client-side on
    /// the media timestamp while following cursors.
    async fn list_media(&self, window: &SyncWindow) -> Result<Vec<RawMedia>, ApiError>;

    async fn media_insights(&self, media_id: &str) -> Result<Vec<InsightSeries>, ApiError>;
}

pub struct GraphSocialClient {
    client: GraphClient,
    user_id: String,
}

impl GraphSocialClient {
    pub fn new(client: GraphClient, user_id: &str) -> Self {
        Self {
            client,
            user_id: user_id.to_string(),
        }
    }

    fn decode_series(items: Vec<Value>, url: &str) -> Result<Vec<InsightSeries>, ApiError> {
        items
            .into_iter()
            .map(|item| {
                serde_json::from_value(item).map_err(|source| ApiError::Decode {
                    url: url.to_string(),
                    source,
                })
            })
            .collect()
    }

    async fn insight_series(
        &self,
        metric: &str,
        window: &SyncWindow,
        total_value: bool,
    ) -> Result<Vec<InsightSeries>, ApiError> {
        let mut params = vec![
            ("metric", metric.to_string()),
            ("period", "day".to_string()),
            ("since", window.since_unix().to_string()),
            ("until", window.until.timestamp().to_string()),
        ];
        if total_value {
            params.push(("metric_type", "total_value".to_string()));
        }
        let url = self
            .client
            .endpoint(&format!("{}/insights", self.user_id), &params)?;
        Self::decode_series(fetch_all(&self.client, &url).await?, &url)
    }
}

#[async_trait]
impl SocialApi for GraphSocialClient {
    async fn validate_permissions(&self) -> Result<SocialProfile, ApiError> {
        let url = self.client.endpoint(
            &self.user_id,
            &[("fields", "id,username,followers_count,media_count".to_string())],
        )?;
        let value = self.client.get_json(&url).await?;
        serde_json::from_value(value).map_err(|source| ApiError::Decode { url, source })
    }

    async fn daily_series(
        &self,
        metric: &str,
        window: &SyncWindow,
    ) -> Result<Vec<InsightSeries>, ApiError> {
        self.insight_series(metric, window, false).await
    }

    async fn total_value_series(
        &self,
        metric: &str,
        window: &SyncWindow,
    ) -> Result<Vec<InsightSeries>, ApiError> {
        self.insight_series(metric, window, true).await
    }

    async fn list_media(&self, window: &SyncWindow) -> Result<Vec<RawMedia>, ApiError> {
        let url = self.client.endpoint(
            &format!("{}/media", self.user_id),
            &[
                ("fields", MEDIA_FIELDS.to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ],
        )?;
        let items = fetch_all(&self.client, &url).await?;
        let mut media = Vec::new();
        for item in items {
            let raw: RawMedia =
                serde_json::from_value(item).map_err(|source| ApiError::Decode {
                    url: url.clone(),
                    source,
                })?;
            match raw.posted_at() {
                Some(posted) if window.contains(posted) => media.push(raw),
                _ => {}
            }
        }
        Ok(media)
    }

    async fn media_insights(&self, media_id: &str) -> Result<Vec<InsightSeries>, ApiError> {
        let url = self.client.endpoint(
            &format!("{media_id}/insights"),
            &[("metric", MEDIA_METRICS.join(","))],
        )?;
        Self::decode_series(fetch_all(&self.client, &url).await?, &url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn media_timestamp_parses_graph_format() {
        let raw: RawMedia = serde_json::from_value(json!({
            "id": "m1",
            "timestamp": "2024-03-08T14:30:00+0000",
        }))
        .expect("media");
        let posted = raw.posted_at().expect("timestamp");
        assert_eq!(posted.to_rfc3339(), "2024-03-08T14:30:00+00:00");
    }

    #[test]
    fn series_decodes_title_alias_and_total_value() {
        let series: InsightSeries = serde_json::from_value(json!({
            "title": "Profile views",
            "values": [{"end_time": "2024-03-08T07:00:00+0000", "value": 42}],
            "total_value": {"value": 42},
        }))
        .expect("series");
        assert_eq!(series.name.as_deref(), Some("Profile views"));
        assert_eq!(series.values.len(), 1);
    }
}
