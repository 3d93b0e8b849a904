//! Ads sync orchestrator: account profile, entity hierarchy, metrics.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use relay_core::SyncWindow;
use relay_platforms::ads::AdsApi;
use relay_platforms::pool::PoolConfig;
use relay_storage::{EntityResolver, PlatformAccountRecord, SyncStore};

use crate::{
    api_err, store_err, CancelToken, NoopProgress, ProgressReporter, ProgressSink, RunStatus,
    SyncError, SyncOptions, SyncPhase, SyncSummary, PLATFORM_ADS,
};

/// One configured sync engine for the ads platform. Cheap to construct;
/// [`run`](AdsSync::run) may be called repeatedly with different options.
pub struct AdsSync {
    pub(crate) store: Arc<dyn SyncStore>,
    pub(crate) api: Arc<dyn AdsApi>,
    pub(crate) progress: Arc<dyn ProgressSink>,
    pub(crate) cancel: CancelToken,
    pub(crate) pool: PoolConfig,
}

impl AdsSync {
    pub fn new(store: Arc<dyn SyncStore>, api: Arc<dyn AdsApi>) -> Self {
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

    /// Run one sync pass. Cancellation is honored between steps and
    /// reported as a successful summary with [`RunStatus::Cancelled`];
    /// everything upserted before the cancel stays committed.
    pub async fn run(&self, options: &SyncOptions) -> Result<SyncSummary, SyncError> {
        let started_at = Utc::now();
        let mut summary = SyncSummary::started(started_at);
        let progress = ProgressReporter::new(Arc::clone(&self.progress));
        let window = SyncWindow::trailing(options.days, started_at)?;

        info!(
            workspace = %options.workspace_id,
            days = options.days,
            scope = ?options.scope,
            "starting ads sync"
        );

        progress.report(2, "fetching account profile");
        let profile = self
            .api
            .account_profile()
            .await
            .map_err(api_err(SyncPhase::Account))?;
        let currency = profile.currency.clone();
        let account = PlatformAccountRecord {
            workspace_id: options.workspace_id,
            platform_key: PLATFORM_ADS.to_string(),
            external_id: profile.id.clone(),
            display_name: profile.name.clone().unwrap_or_else(|| profile.id.clone()),
            metadata: json!({
                "currency": profile.currency,
                "account_status": profile.account_status,
            }),
        };
        let platform_account_id = self
            .store
            .upsert_platform_account(&account)
            .await
            .map_err(store_err(SyncPhase::Account))?;
        progress.report(5, "account profile stored");

        let mut resolver = EntityResolver::new();

        if options.scope.includes_hierarchy() {
            let cancelled = self
                .sync_hierarchy(
                    options.workspace_id,
                    platform_account_id,
                    &window,
                    &mut resolver,
                    &mut summary,
                    &progress,
                )
                .await?;
            if cancelled {
                return Ok(self.finish_cancelled(summary, &progress));
            }
        }

        if self.cancel.is_cancelled() {
            return Ok(self.finish_cancelled(summary, &progress));
        }

        if options.scope.includes_metrics() {
            let metrics_window = SyncWindow::metrics(options.days, started_at)?;
            let cancelled = self
                .sync_metrics(
                    options.workspace_id,
                    platform_account_id,
                    currency.as_deref(),
                    &metrics_window,
                    &mut resolver,
                    &mut summary,
                    &progress,
                )
                .await?;
            if cancelled {
                return Ok(self.finish_cancelled(summary, &progress));
            }
        }

        progress.report(98, "finalizing");
        self.store
            .mark_integration_synced(options.workspace_id, PLATFORM_ADS)
            .await
            .map_err(store_err(SyncPhase::Finalize))?;

        summary.completed_at = Utc::now();
        progress.report(100, "sync complete");
        info!(
            campaigns = summary.campaigns_synced,
            ad_sets = summary.ad_sets_synced,
            ads = summary.ads_synced,
            creatives = summary.creatives_synced,
            metrics = summary.metrics_synced,
            failed = summary.items_failed,
            "ads sync complete"
        );
        Ok(summary)
    }

    fn finish_cancelled(
        &self,
        mut summary: SyncSummary,
        progress: &ProgressReporter,
    ) -> SyncSummary {
        summary.status = RunStatus::Cancelled;
        summary.completed_at = Utc::now();
        progress.report(100, "sync cancelled");
        info!(
            campaigns = summary.campaigns_synced,
            ad_sets = summary.ad_sets_synced,
            ads = summary.ads_synced,
            "ads sync cancelled, partial progress committed"
        );
        summary
    }
}

/// Scope ids resolved for a metric row; `None` fields stay unset.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct MetricScope {
    pub(crate) campaign_id: Option<Uuid>,
    pub(crate) ad_set_id: Option<Uuid>,
    pub(crate) ad_id: Option<Uuid>,
}
