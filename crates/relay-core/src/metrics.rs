//! Derivation of computed metrics from raw insight rows.
//!
//! Insight rows arrive with counters encoded as strings, an open list of
//! `actions` (heterogeneous conversion counters) and `action_values`
//! (their monetary value). Derivation runs once per row and the precedence
//! below is deliberate:
//!
//! - `conversions` / `conversion_value`: the row's own field when > 0,
//!   else the purchase action's count/value, else 0.
//! - `roas`: a platform-provided ROAS when present, finite and > 0; else
//!   the largest action value divided by spend (spend 0 treated as 1)
//!   when that value is > 0; else `None`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// One entry of the open `actions` / `action_values` lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionEntry {
    #[serde(default, alias = "actionType", alias = "type")]
    pub action_type: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub count: Option<Value>,
}

/// Raw per-day insight row as returned by the time-series endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsightRow {
    #[serde(default)]
    pub date_start: Option<String>,
    #[serde(default)]
    pub date_stop: Option<String>,
    #[serde(default)]
    pub impressions: Option<Value>,
    #[serde(default)]
    pub clicks: Option<Value>,
    #[serde(default)]
    pub spend: Option<Value>,
    #[serde(default)]
    pub reach: Option<Value>,
    #[serde(default)]
    pub frequency: Option<Value>,
    #[serde(default)]
    pub unique_clicks: Option<Value>,
    #[serde(default)]
    pub inline_link_clicks: Option<Value>,
    #[serde(default)]
    pub inline_post_engagement: Option<Value>,
    #[serde(default)]
    pub outbound_clicks: Option<Value>,
    #[serde(default)]
    pub outbound_clicks_ctr: Option<Value>,
    #[serde(default)]
    pub conversions: Option<Value>,
    #[serde(default)]
    pub conversion_value: Option<Value>,
    #[serde(default)]
    pub actions: Option<Vec<ActionEntry>>,
    #[serde(default)]
    pub action_values: Option<Vec<ActionEntry>>,
    #[serde(default)]
    pub purchase_roas: Option<Vec<ActionEntry>>,
    #[serde(default)]
    pub roas: Option<Value>,
    #[serde(default)]
    pub account_currency: Option<String>,
    #[serde(default)]
    pub campaign_id: Option<String>,
    #[serde(default)]
    pub adset_id: Option<String>,
    #[serde(default)]
    pub ad_id: Option<String>,
}

/// Computed metrics for one (scope, day) cell plus the open extras bag.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedMetrics {
    pub impressions: i64,
    pub clicks: i64,
    pub spend: f64,
    pub ctr: f64,
    pub cpc: f64,
    pub cpa: f64,
    pub roas: Option<f64>,
    pub conversions: f64,
    pub conversion_value: f64,
    pub primary_action: Option<String>,
    pub extra: Value,
}

fn num(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn entry_value(entry: &ActionEntry) -> f64 {
    if entry.value.is_some() {
        num(entry.value.as_ref())
    } else {
        num(entry.count.as_ref())
    }
}

fn is_purchase(action_type: &str) -> bool {
    action_type == "purchase" || action_type.ends_with(".purchase")
}

fn purchase_amount(entries: Option<&[ActionEntry]>) -> Option<f64> {
    entries?.iter().find_map(|entry| {
        let kind = entry.action_type.as_deref()?;
        is_purchase(kind).then(|| entry_value(entry))
    })
}

fn largest_entry(entries: Option<&[ActionEntry]>) -> Option<(&str, f64)> {
    entries?
        .iter()
        .filter_map(|entry| Some((entry.action_type.as_deref()?, entry_value(entry))))
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

fn platform_roas(row: &InsightRow) -> Option<f64> {
    let explicit = row
        .purchase_roas
        .as_deref()
        .and_then(|entries| entries.first())
        .map(entry_value)
        .or_else(|| row.roas.as_ref().map(|v| num(Some(v))));
    explicit.filter(|v| v.is_finite() && *v > 0.0)
}

impl DerivedMetrics {
    pub fn from_row(row: &InsightRow) -> Self {
        let impressions = num(row.impressions.as_ref());
        let clicks = num(row.clicks.as_ref());
        let spend = num(row.spend.as_ref());

        let conversions = Some(num(row.conversions.as_ref()))
            .filter(|v| *v > 0.0)
            .or_else(|| purchase_amount(row.actions.as_deref()))
            .unwrap_or(0.0);
        let conversion_value = Some(num(row.conversion_value.as_ref()))
            .filter(|v| *v > 0.0)
            .or_else(|| purchase_amount(row.action_values.as_deref()))
            .unwrap_or(0.0);

        let ctr = if impressions > 0.0 {
            clicks / impressions * 100.0
        } else {
            0.0
        };
        let cpc = if clicks > 0.0 { spend / clicks } else { 0.0 };
        let cpa = if conversions > 0.0 {
            spend / conversions
        } else {
            0.0
        };

        let roas = platform_roas(row).or_else(|| {
            largest_entry(row.action_values.as_deref())
                .map(|(_, value)| value)
                .filter(|value| *value > 0.0)
                .map(|value| value / if spend == 0.0 { 1.0 } else { spend })
        });

        let primary = largest_entry(row.actions.as_deref());
        let primary_action = primary.map(|(kind, _)| kind.to_string());

        let mut counts = serde_json::Map::new();
        for entry in row.actions.as_deref().unwrap_or_default() {
            if let Some(kind) = entry.action_type.as_deref() {
                counts.insert(kind.to_string(), json!(entry_value(entry)));
            }
        }
        let mut values = serde_json::Map::new();
        for entry in row.action_values.as_deref().unwrap_or_default() {
            if let Some(kind) = entry.action_type.as_deref() {
                values.insert(kind.to_string(), json!(entry_value(entry)));
            }
        }

        let extra = json!({
            "reach": num(row.reach.as_ref()),
            "frequency": num(row.frequency.as_ref()),
            "unique_clicks": num(row.unique_clicks.as_ref()),
            "inline_link_clicks": num(row.inline_link_clicks.as_ref()),
            "inline_post_engagement": num(row.inline_post_engagement.as_ref()),
            "outbound_clicks": row.outbound_clicks.clone().unwrap_or(Value::Array(vec![])),
            "outbound_clicks_ctr": row.outbound_clicks_ctr.clone().unwrap_or(Value::Array(vec![])),
            "actions": row.actions.clone().unwrap_or_default(),
            "action_values": row.action_values.clone().unwrap_or_default(),
            "derived_metrics": {
                "counts": Value::Object(counts),
                "values": Value::Object(values),
                "primary_conversion_action": primary_action.clone().unwrap_or_else(|| "unknown".to_string()),
            },
        });

        Self {
            impressions: impressions as i64,
            clicks: clicks as i64,
            spend,
            ctr,
            cpc,
            cpa,
            roas,
            conversions,
            conversion_value,
            primary_action,
            extra,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: &str, value: f64) -> ActionEntry {
        ActionEntry {
            action_type: Some(kind.to_string()),
            value: Some(json!(value)),
            count: None,
        }
    }

    #[test]
    fn derives_rates_with_purchase_fallback() {
        let row = InsightRow {
            impressions: Some(json!("1000")),
            clicks: Some(json!("20")),
            spend: Some(json!("50.0")),
            conversions: Some(json!(0)),
            actions: Some(vec![entry("purchase", 2.0)]),
            action_values: Some(vec![entry("purchase", 80.0)]),
            ..Default::default()
        };
        let derived = DerivedMetrics::from_row(&row);
        assert_eq!(derived.ctr, 2.0);
        assert_eq!(derived.cpc, 2.5);
        assert_eq!(derived.conversions, 2.0);
        assert_eq!(derived.cpa, 25.0);
        assert_eq!(derived.roas, Some(1.6));
        assert_eq!(derived.primary_action.as_deref(), Some("purchase"));
    }

    #[test]
    fn platform_roas_takes_precedence_when_positive() {
        let row = InsightRow {
            spend: Some(json!("10")),
            purchase_roas: Some(vec![entry("omni_purchase", 3.2)]),
            action_values: Some(vec![entry("purchase", 80.0)]),
            ..Default::default()
        };
        assert_eq!(DerivedMetrics::from_row(&row).roas, Some(3.2));
    }

    #[test]
    fn zero_platform_roas_falls_back_to_action_values() {
        let row = InsightRow {
            spend: Some(json!("40")),
            purchase_roas: Some(vec![entry("omni_purchase", 0.0)]),
            action_values: Some(vec![entry("purchase", 80.0)]),
            ..Default::default()
        };
        assert_eq!(DerivedMetrics::from_row(&row).roas, Some(2.0));
    }

    #[test]
    fn zero_spend_divides_by_one() {
        let row = InsightRow {
            spend: Some(json!("0")),
            action_values: Some(vec![entry("lead", 12.0)]),
            ..Default::default()
        };
        assert_eq!(DerivedMetrics::from_row(&row).roas, Some(12.0));
    }

    #[test]
    fn empty_row_yields_zeroes_and_no_roas() {
        let derived = DerivedMetrics::from_row(&InsightRow::default());
        assert_eq!(derived.ctr, 0.0);
        assert_eq!(derived.cpc, 0.0);
        assert_eq!(derived.cpa, 0.0);
        assert_eq!(derived.roas, None);
        assert_eq!(derived.primary_action, None);
    }

    #[test]
    fn extras_bag_captures_every_action_type() {
        let row = InsightRow {
            reach: Some(json!("500")),
            actions: Some(vec![entry("purchase", 2.0), entry("link_click", 15.0)]),
            ..Default::default()
        };
        let derived = DerivedMetrics::from_row(&row);
        let counts = &derived.extra["derived_metrics"]["counts"];
        assert_eq!(counts["purchase"], json!(2.0));
        assert_eq!(counts["link_click"], json!(15.0));
        assert_eq!(derived.extra["reach"], json!(500.0));
        // link_click outnumbers purchase, so it wins the primary label.
        assert_eq!(derived.primary_action.as_deref(), Some("link_click"));
    }
}
