//! Client for the ads graph API: hierarchical entity listings
//! (campaigns, ad sets, ads), creative details and time-series insights.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use relay_core::{InsightLevel, InsightRow, SyncWindow};

use crate::{fetch_all, ApiError, GraphClient, PageSource};

const PAGE_LIMIT: &str = "100";

const CAMPAIGN_FIELDS: &str = "id,name,status,effective_status,objective,start_time,stop_time,\
                               daily_budget,lifetime_budget,created_time,updated_time";
const AD_SET_FIELDS: &str = "id,name,status,effective_status,campaign_id,start_time,end_time,\
                             daily_budget,lifetime_budget,bid_strategy,bid_amount,budget_remaining,\
                             targeting,promoted_object,destination_type,created_time,updated_time";
const AD_FIELDS: &str = "id,name,status,effective_status,adset_id,created_time,updated_time,\
                         creative{id,name}";
const CREATIVE_FIELDS: &str =
    "id,name,body,thumbnail_url,image_url,object_story_spec,asset_feed_spec,status";
const INSIGHT_FIELDS: &str = "date_start,date_stop,impressions,reach,frequency,clicks,\
                              unique_clicks,spend,cpm,cpc,ctr,actions,action_values,\
                              inline_link_clicks,inline_post_engagement,outbound_clicks,\
                              outbound_clicks_ctr,purchase_roas,account_currency";

#[derive(Debug, Clone, Deserialize)]
pub struct RawCampaign {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub effective_status: Option<String>,
    #[serde(default)]
    pub objective: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub stop_time: Option<String>,
    #[serde(default)]
    pub daily_budget: Option<Value>,
    #[serde(default)]
    pub lifetime_budget: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAdSet {
    pub id: String,
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub effective_status: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub daily_budget: Option<Value>,
    #[serde(default)]
    pub lifetime_budget: Option<Value>,
    #[serde(default)]
    pub bid_strategy: Option<String>,
    #[serde(default)]
    pub bid_amount: Option<Value>,
    #[serde(default)]
    pub targeting: Option<Value>,
    #[serde(default)]
    pub promoted_object: Option<Value>,
    #[serde(default)]
    pub destination_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCreativeRef {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAd {
    pub id: String,
    #[serde(default)]
    pub adset_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub effective_status: Option<String>,
    #[serde(default)]
    pub creative: Option<RawCreativeRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawCreative {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub object_story_spec: Option<Value>,
    #[serde(default)]
    pub asset_feed_spec: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountProfile {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub account_status: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreativeKind {
    Video,
    Carousel,
    Image,
    Text,
}

impl CreativeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreativeKind::Video => "video",
            CreativeKind::Carousel => "carousel",
            CreativeKind::Image => "image",
            CreativeKind::Text => "text",
        }
    }
}

/// Normalized creative record ready for storage. `hash` is the external
/// creative id, the natural dedup key: the same creative fetched twice
/// must collapse to one asset row.
#[derive(Debug, Clone)]
pub struct CreativePayload {
    pub kind: CreativeKind,
    pub name: String,
    pub storage_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub text_content: Option<String>,
    pub hash: String,
    pub metadata: Value,
}

fn story_str(story: &Value, section: &str, field: &str) -> Option<String> {
    story
        .get(section)?
        .get(field)?
        .as_str()
        .map(str::to_string)
}

pub fn build_creative_payload(creative: &RawCreative) -> CreativePayload {
    let story = creative
        .object_story_spec
        .clone()
        .unwrap_or(Value::Object(Default::default()));

    let kind = if story.get("video_data").is_some() {
        CreativeKind::Video
    } else if story.get("carousel_data").is_some() {
        CreativeKind::Carousel
    } else if story.get("image_data").is_some() || creative.image_url.is_some() {
        CreativeKind::Image
    } else {
        CreativeKind::Text
    };

    let mut storage_url = creative.image_url.clone();
    let mut thumbnail_url = creative.thumbnail_url.clone().or_else(|| storage_url.clone());
    let mut text_content = creative.body.clone();

    if story.get("video_data").is_some() {
        storage_url = story_str(&story, "video_data", "video_url").or(storage_url);
        thumbnail_url = story_str(&story, "video_data", "image_url").or(thumbnail_url);
        text_content = story_str(&story, "video_data", "message").or(text_content);
    }
    if story.get("image_data").is_some() {
        storage_url = storage_url.or_else(|| story_str(&story, "image_data", "image_url"));
        thumbnail_url = story_str(&story, "image_data", "image_url").or(thumbnail_url);
        text_content = story_str(&story, "image_data", "message").or(text_content);
    }
    if story.get("link_data").is_some() {
        text_content = text_content.or_else(|| story_str(&story, "link_data", "message"));
    }
    if text_content.is_none() {
        if let Some(cards) = story
            .get("carousel_data")
            .and_then(|c| c.get("cards"))
            .and_then(Value::as_array)
        {
            let titles: Vec<&str> = cards
                .iter()
                .filter_map(|card| card.get("title").and_then(Value::as_str))
                .collect();
            if !titles.is_empty() {
                text_content = Some(titles.join(" | "));
            }
        }
    }

    CreativePayload {
        kind,
        name: creative
            .name
            .clone()
            .unwrap_or_else(|| format!("Creative {}", creative.id)),
        storage_url,
        thumbnail_url,
        text_content,
        hash: creative.id.clone(),
        metadata: serde_json::json!({
            "object_story_spec": story,
            "asset_feed_spec": creative.asset_feed_spec.clone(),
        }),
    }
}

/// Operations the hierarchical orchestrator and metric pipeline need from
/// the ads platform. Implemented by [`GraphAdsClient`]; mocked in the
/// engine's integration tests.
#[async_trait]
pub trait AdsApi: Send + Sync {
    async fn account_profile(&self) -> Result<AccountProfile, ApiError>;

    /// Campaigns updated since the window start, to bound result size.
    async fn list_campaigns(&self, window: &SyncWindow) -> Result<Vec<RawCampaign>, ApiError>;

    async fn list_ad_sets(&self, campaign_external_id: &str) -> Result<Vec<RawAdSet>, ApiError>;

    async fn list_ads(&self, ad_set_external_id: &str) -> Result<Vec<RawAd>, ApiError>;

    async fn creative_details(&self, creative_external_id: &str)
        -> Result<RawCreative, ApiError>;

    async fn insights(
        &self,
        level: InsightLevel,
        window: &SyncWindow,
    ) -> Result<Vec<InsightRow>, ApiError>;
}

pub struct GraphAdsClient {
    client: GraphClient,
    account_path: String,
}

impl GraphAdsClient {
    pub fn new(client: GraphClient, account_id: &str) -> Self {
        let account_path = if account_id.starts_with("act_") {
            account_id.to_string()
        } else {
            format!("act_{account_id}")
        };
        Self {
            client,
            account_path,
        }
    }

    fn decode_items<T: serde::de::DeserializeOwned>(
        items: Vec<Value>,
        url: &str,
    ) -> Result<Vec<T>, ApiError> {
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
}

#[async_trait]
impl AdsApi for GraphAdsClient {
    async fn account_profile(&self) -> Result<AccountProfile, ApiError> {
        let url = self.client.endpoint(
            &self.account_path,
            &[("fields", "id,name,currency,account_status".to_string())],
        )?;
        let value = self.client.get_json(&url).await?;
        serde_json::from_value(value).map_err(|source| ApiError::Decode { url, source })
    }

    async fn list_campaigns(&self, window: &SyncWindow) -> Result<Vec<RawCampaign>, ApiError> {
        let filtering = serde_json::json!([{
            "field": "updated_time",
            "operator": "GREATER_THAN",
            "value": window.since_unix(),
        }]);
        let url = self.client.endpoint(
            &format!("{}/campaigns", self.account_path),
            &[
                ("fields", CAMPAIGN_FIELDS.to_string()),
                ("filtering", filtering.to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ],
        )?;
        Self::decode_items(fetch_all(&self.client, &url).await?, &url)
    }

    async fn list_ad_sets(&self, campaign_external_id: &str) -> Result<Vec<RawAdSet>, ApiError> {
        let url = self.client.endpoint(
            &format!("{campaign_external_id}/adsets"),
            &[
                ("fields", AD_SET_FIELDS.to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ],
        )?;
        Self::decode_items(fetch_all(&self.client, &url).await?, &url)
    }

    async fn list_ads(&self, ad_set_external_id: &str) -> Result<Vec<RawAd>, ApiError> {
        let url = self.client.endpoint(
            &format!("{ad_set_external_id}/ads"),
            &[
                ("fields", AD_FIELDS.to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ],
        )?;
        Self::decode_items(fetch_all(&self.client, &url).await?, &url)
    }

    async fn creative_details(
        &self,
        creative_external_id: &str,
    ) -> Result<RawCreative, ApiError> {
        let url = self.client.endpoint(
            creative_external_id,
            &[("fields", CREATIVE_FIELDS.to_string())],
        )?;
        let value = self.client.get_json(&url).await?;
        serde_json::from_value(value).map_err(|source| ApiError::Decode { url, source })
    }

    async fn insights(
        &self,
        level: InsightLevel,
        window: &SyncWindow,
    ) -> Result<Vec<InsightRow>, ApiError> {
        let mut fields = INSIGHT_FIELDS.to_string();
        match level {
            InsightLevel::Account => {}
            InsightLevel::Campaign => fields.push_str(",campaign_id"),
            InsightLevel::AdSet => fields.push_str(",campaign_id,adset_id"),
            InsightLevel::Ad => fields.push_str(",campaign_id,adset_id,ad_id"),
        }
        let time_range = serde_json::json!({
            "since": window.since_day_key(),
            "until": window.until_day_key(),
        });
        let url = self.client.endpoint(
            &format!("{}/insights", self.account_path),
            &[
                ("fields", fields),
                ("time_range", time_range.to_string()),
                ("time_increment", "1".to_string()),
                ("level", level.as_str().to_string()),
                ("limit", PAGE_LIMIT.to_string()),
            ],
        )?;
        Self::decode_items(fetch_all(&self.client, &url).await?, &url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn video_story_wins_type_and_urls() {
        let creative = RawCreative {
            id: "c1".to_string(),
            name: Some("Launch video".to_string()),
            body: None,
            thumbnail_url: Some("https://cdn.example/thumb.jpg".to_string()),
            image_url: None,
            object_story_spec: Some(json!({
                "video_data": {
                    "video_url": "https://cdn.example/v.mp4",
                    "image_url": "https://cdn.example/poster.jpg",
                    "message": "Watch this",
                }
            })),
            asset_feed_spec: None,
        };
        let payload = build_creative_payload(&creative);
        assert_eq!(payload.kind, CreativeKind::Video);
        assert_eq!(payload.storage_url.as_deref(), Some("https://cdn.example/v.mp4"));
        assert_eq!(
            payload.thumbnail_url.as_deref(),
            Some("https://cdn.example/poster.jpg")
        );
        assert_eq!(payload.text_content.as_deref(), Some("Watch this"));
        assert_eq!(payload.hash, "c1");
    }

    #[test]
    fn carousel_titles_become_text_content() {
        let creative = RawCreative {
            id: "c2".to_string(),
            name: None,
            body: None,
            thumbnail_url: None,
            image_url: None,
            object_story_spec: Some(json!({
                "carousel_data": {
                    "cards": [{"title": "One"}, {"title": "Two"}, {}]
                }
            })),
            asset_feed_spec: None,
        };
        let payload = build_creative_payload(&creative);
        assert_eq!(payload.kind, CreativeKind::Carousel);
        assert_eq!(payload.text_content.as_deref(), Some("One | Two"));
        assert_eq!(payload.name, "Creative c2");
    }

    #[test]
    fn bare_image_url_maps_to_image_kind() {
        let creative = RawCreative {
            id: "c3".to_string(),
            name: Some("Static".to_string()),
            body: Some("Buy now".to_string()),
            thumbnail_url: None,
            image_url: Some("https://cdn.example/i.png".to_string()),
            object_story_spec: None,
            asset_feed_spec: None,
        };
        let payload = build_creative_payload(&creative);
        assert_eq!(payload.kind, CreativeKind::Image);
        assert_eq!(payload.thumbnail_url.as_deref(), Some("https://cdn.example/i.png"));
        assert_eq!(payload.text_content.as_deref(), Some("Buy now"));
    }
}
