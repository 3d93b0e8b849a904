//! Platform status normalization.
//!
//! External platforms report two statuses per entity: the configured one
//! and an effective/delivery one. The effective status wins whenever it
//! says the entity is actually paused, archived or delivering; otherwise
//! the configured status is mapped through a fixed table.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Active,
    Paused,
    Archived,
    Draft,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Active => "active",
            EntityStatus::Paused => "paused",
            EntityStatus::Archived => "archived",
            EntityStatus::Draft => "draft",
        }
    }
}

fn map_raw(raw: &str) -> EntityStatus {
    match raw.trim().to_ascii_uppercase().as_str() {
        "ACTIVE" | "IN_PROCESS" | "PENDING" | "WITH_ISSUES" => EntityStatus::Active,
        "PAUSED" | "INACTIVE" => EntityStatus::Paused,
        "ARCHIVED" | "DELETED" => EntityStatus::Archived,
        _ => EntityStatus::Draft,
    }
}

/// Resolve an entity's stored status from its configured status and the
/// optional effective/delivery status.
pub fn normalize_status(configured: &str, effective: Option<&str>) -> EntityStatus {
    if let Some(effective) = effective {
        match map_raw(effective) {
            EntityStatus::Paused => return EntityStatus::Paused,
            EntityStatus::Archived => return EntityStatus::Archived,
            EntityStatus::Active => return EntityStatus::Active,
            EntityStatus::Draft => {}
        }
    }
    map_raw(configured)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_pause_overrides_configured_active() {
        assert_eq!(
            normalize_status("ACTIVE", Some("PAUSED")),
            EntityStatus::Paused
        );
    }

    #[test]
    fn configured_status_used_without_effective() {
        assert_eq!(normalize_status("PAUSED", None), EntityStatus::Paused);
        assert_eq!(normalize_status("ARCHIVED", None), EntityStatus::Archived);
        assert_eq!(normalize_status("with_issues", None), EntityStatus::Active);
    }

    #[test]
    fn unknown_statuses_fall_back_to_draft() {
        assert_eq!(normalize_status("PENDING_REVIEW", None), EntityStatus::Draft);
        assert_eq!(normalize_status("DISAPPROVED", None), EntityStatus::Draft);
    }

    #[test]
    fn draft_effective_falls_through_to_configured() {
        assert_eq!(
            normalize_status("ACTIVE", Some("PENDING_REVIEW")),
            EntityStatus::Active
        );
    }
}
