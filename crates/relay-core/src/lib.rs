//! Core domain model for the Relay platform sync engine.
//!
//! Everything in this crate is pure: window math, status normalization,
//! money conversion and insight-row derivation. No I/O, no async.

use serde::{Deserialize, Serialize};

pub mod metrics;
pub mod money;
pub mod status;
pub mod window;

pub use metrics::{DerivedMetrics, InsightRow};
pub use money::minor_units_to_decimal;
pub use status::{normalize_status, EntityStatus};
pub use window::{SyncWindow, WindowError, REPORTING_TZ};

pub const CRATE_NAME: &str = "relay-core";

/// Time bucket size of a metric row. The engine only produces daily rows
/// today; the enum exists so the storage key stays explicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Day,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::Day => "day",
        }
    }
}

/// Scope discriminator for the time-series insights endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightLevel {
    Account,
    Campaign,
    AdSet,
    Ad,
}

impl InsightLevel {
    pub const ALL: [InsightLevel; 4] = [
        InsightLevel::Account,
        InsightLevel::Campaign,
        InsightLevel::AdSet,
        InsightLevel::Ad,
    ];

    /// Wire value the external insights endpoint expects for `level`.
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightLevel::Account => "account",
            InsightLevel::Campaign => "campaign",
            InsightLevel::AdSet => "adset",
            InsightLevel::Ad => "ad",
        }
    }
}
