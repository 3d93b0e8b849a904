//! The Relay sync engine: pulls hierarchical advertising data and
//! time-series metrics from rate-limited external platforms and
//! reconciles them into the relational store, incrementally and
//! idempotently.
//!
//! Two sync paths share the same plumbing: [`AdsSync`] walks the
//! campaign → ad set → ad → creative hierarchy and ingests per-level
//! metrics; [`SocialSync`] ingests account insight series and media.
//! Both are safe to re-run: every write is an upsert keyed by a natural
//! identity, so a crashed or cancelled run converges on the next attempt.

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use relay_core::WindowError;
use relay_platforms::ApiError;
use relay_storage::StorageError;

mod engine;
mod hierarchy;
mod metrics;
mod social;

pub use engine::AdsSync;
pub use social::{SocialSummary, SocialSync};

pub const CRATE_NAME: &str = "relay-sync";

/// Platform keys the engine writes under. Kept vendor-neutral: one ads
/// graph platform, one social graph platform.
pub const PLATFORM_ADS: &str = "ads";
pub const PLATFORM_SOCIAL: &str = "social";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncScope {
    All,
    HierarchyOnly,
    MetricsOnly,
}

impl SyncScope {
    pub fn includes_hierarchy(&self) -> bool {
        matches!(self, SyncScope::All | SyncScope::HierarchyOnly)
    }

    pub fn includes_metrics(&self) -> bool {
        matches!(self, SyncScope::All | SyncScope::MetricsOnly)
    }
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub workspace_id: Uuid,
    pub days: i64,
    pub scope: SyncScope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Cancelled,
}

/// Counts reported back to the caller. Per-item failures are aggregated,
/// not itemized, to keep the summary small.
#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub status: RunStatus,
    pub campaigns_synced: usize,
    pub ad_sets_synced: usize,
    pub ads_synced: usize,
    pub creatives_synced: usize,
    pub metrics_synced: usize,
    /// Entities dropped because their parent was not resolvable.
    pub entities_skipped: usize,
    /// Metric rows dropped because their scope id was not resolvable.
    pub metrics_skipped: usize,
    /// Best-effort per-item fetches that failed and were skipped.
    pub items_failed: usize,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl SyncSummary {
    fn started(started_at: DateTime<Utc>) -> Self {
        Self {
            status: RunStatus::Completed,
            campaigns_synced: 0,
            ad_sets_synced: 0,
            ads_synced: 0,
            creatives_synced: 0,
            metrics_synced: 0,
            entities_skipped: 0,
            metrics_skipped: 0,
            items_failed: 0,
            started_at,
            completed_at: started_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    Credentials,
    Account,
    Campaigns,
    AdSets,
    Ads,
    Creatives,
    Metrics,
    Media,
    Finalize,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SyncPhase::Credentials => "credentials",
            SyncPhase::Account => "account",
            SyncPhase::Campaigns => "campaigns",
            SyncPhase::AdSets => "ad sets",
            SyncPhase::Ads => "ads",
            SyncPhase::Creatives => "creatives",
            SyncPhase::Metrics => "metrics",
            SyncPhase::Media => "media",
            SyncPhase::Finalize => "finalize",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    #[error("invalid sync window: {0}")]
    Window(#[from] WindowError),
    #[error("{phase} sync failed: {source}")]
    Api {
        phase: SyncPhase,
        #[source]
        source: ApiError,
    },
    #[error("{phase} sync failed to persist: {source}")]
    Storage {
        phase: SyncPhase,
        #[source]
        source: StorageError,
    },
}

impl SyncError {
    pub fn phase(&self) -> Option<SyncPhase> {
        match self {
            SyncError::Credentials(_) => Some(SyncPhase::Credentials),
            SyncError::Window(_) => None,
            SyncError::Api { phase, .. } | SyncError::Storage { phase, .. } => Some(*phase),
        }
    }
}

/// `map_err` adapters so call sites stay terse.
pub(crate) fn api_err(phase: SyncPhase) -> impl FnOnce(ApiError) -> SyncError {
    move |source| SyncError::Api { phase, source }
}

pub(crate) fn store_err(phase: SyncPhase) -> impl FnOnce(StorageError) -> SyncError {
    move |source| SyncError::Storage { phase, source }
}

/// Decrypted credentials for one (workspace, platform) pair. Decryption
/// itself is a black box behind the provider trait.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_token: String,
    pub account_id: String,
    pub extra: HashMap<String, String>,
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no credentials configured for platform '{platform_key}' in workspace {workspace_id}")]
    Missing {
        workspace_id: Uuid,
        platform_key: String,
    },
    #[error("credentials for platform '{platform_key}' are invalid: {reason}")]
    Invalid {
        platform_key: String,
        reason: String,
    },
}

#[async_trait]
pub trait CredentialsProvider: Send + Sync {
    async fn get_credentials(
        &self,
        workspace_id: Uuid,
        platform_key: &str,
    ) -> Result<Credentials, CredentialError>;
}

/// Fire-and-forget progress sink. Implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn report(&self, percent: u8, message: &str);
}

#[derive(Debug, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _percent: u8, _message: &str) {}
}

/// Wraps a sink with two guarantees: percentages never go backwards, and
/// a failing sink never aborts the sync.
pub(crate) struct ProgressReporter {
    sink: Arc<dyn ProgressSink>,
    last: AtomicU8,
}

impl ProgressReporter {
    pub(crate) fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            sink,
            last: AtomicU8::new(0),
        }
    }

    pub(crate) fn report(&self, percent: u8, message: &str) {
        let percent = percent.min(100).max(self.last.load(Ordering::SeqCst));
        self.last.store(percent, Ordering::SeqCst);
        let sink = Arc::clone(&self.sink);
        if catch_unwind(AssertUnwindSafe(|| sink.report(percent, message))).is_err() {
            warn!(percent, msg = message, "progress sink panicked, ignoring");
        }
    }
}

/// External cancellation signal, checked between sync steps (never
/// mid-HTTP-call). Already-committed upserts stay committed.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PanickySink;

    impl ProgressSink for PanickySink {
        fn report(&self, _percent: u8, _message: &str) {
            panic!("sink exploded");
        }
    }

    struct RecordingSink(std::sync::Mutex<Vec<u8>>);

    impl ProgressSink for RecordingSink {
        fn report(&self, percent: u8, _message: &str) {
            self.0.lock().expect("lock").push(percent);
        }
    }

    #[test]
    fn progress_is_monotone_and_capped() {
        let sink = Arc::new(RecordingSink(std::sync::Mutex::new(Vec::new())));
        let reporter = ProgressReporter::new(sink.clone());
        reporter.report(10, "a");
        reporter.report(5, "b");
        reporter.report(120, "c");
        assert_eq!(*sink.0.lock().expect("lock"), vec![10, 10, 100]);
    }

    #[test]
    fn panicking_sink_does_not_abort() {
        let reporter = ProgressReporter::new(Arc::new(PanickySink));
        reporter.report(50, "still alive");
    }

    #[test]
    fn cancel_token_flips_once() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
        assert!(token.clone().is_cancelled());
    }
}
