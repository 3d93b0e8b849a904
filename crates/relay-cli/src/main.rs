//! `relay` — command line front end for the platform sync engine.

mod config;

use std::io::Write as _;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use config::{Config, EnvCredentials};
use relay_platforms::ads::GraphAdsClient;
use relay_platforms::social::GraphSocialClient;
use relay_platforms::{GraphClient, GraphClientConfig};
use relay_storage::PgStore;
use relay_sync::{
    AdsSync, CancelToken, CredentialsProvider, ProgressSink, RunStatus, SocialSync, SyncOptions,
    SyncScope, PLATFORM_ADS, PLATFORM_SOCIAL,
};

#[derive(Parser)]
#[command(name = "relay", about = "Relay platform sync engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Pull entities and metrics from an external platform.
    Sync {
        #[command(subcommand)]
        target: SyncTarget,
    },
    /// Apply pending database migrations.
    Migrate,
}

#[derive(Subcommand)]
enum SyncTarget {
    /// Sync the ads hierarchy, creatives and metrics.
    Ads(AdsArgs),
    /// Sync social account insights and media.
    Social(SocialArgs),
}

#[derive(Args)]
struct AdsArgs {
    /// Workspace to sync into; falls back to RELAY_WORKSPACE_ID.
    #[arg(long)]
    workspace: Option<Uuid>,
    /// Trailing window length in days.
    #[arg(long, default_value_t = 30)]
    days: i64,
    #[arg(long, value_enum, default_value = "all")]
    scope: ScopeArg,
}

#[derive(Args)]
struct SocialArgs {
    #[arg(long)]
    workspace: Option<Uuid>,
    #[arg(long, default_value_t = 30)]
    days: i64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ScopeArg {
    All,
    Hierarchy,
    Metrics,
}

impl From<ScopeArg> for SyncScope {
    fn from(arg: ScopeArg) -> Self {
        match arg {
            ScopeArg::All => SyncScope::All,
            ScopeArg::Hierarchy => SyncScope::HierarchyOnly,
            ScopeArg::Metrics => SyncScope::MetricsOnly,
        }
    }
}

/// Single-line progress on stdout, overwritten in place.
#[derive(Default)]
struct ConsoleProgress {
    last_len: Mutex<usize>,
}

impl ProgressSink for ConsoleProgress {
    fn report(&self, percent: u8, message: &str) {
        let line = format!("[{percent:>3}%] {message}");
        let mut last_len = self.last_len.lock().unwrap_or_else(|e| e.into_inner());
        let padding = last_len.saturating_sub(line.len());
        print!("\r{line}{}", " ".repeat(padding));
        *last_len = line.len();
        if percent >= 100 {
            println!();
        }
        let _ = std::io::stdout().flush();
    }
}

fn resolve_workspace(flag: Option<Uuid>, config: &Config) -> Result<Uuid> {
    flag.or(config.workspace_id)
        .ok_or_else(|| anyhow::anyhow!("no workspace given: pass --workspace or set RELAY_WORKSPACE_ID"))
}

fn graph_client(config: &Config, access_token: &str) -> Result<GraphClient> {
    let mut client_config = GraphClientConfig::new(&config.api_base_url, access_token);
    client_config.timeout = config.http_timeout;
    client_config.rate_limit = config.rate_limit;
    Ok(GraphClient::new(client_config)?)
}

fn cancel_on_ctrl_c() -> CancelToken {
    let token = CancelToken::new();
    let handle = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupt received, finishing current step");
            handle.cancel();
        }
    });
    token
}

async fn run_ads(config: &Config, args: &AdsArgs) -> Result<()> {
    let workspace_id = resolve_workspace(args.workspace, config)?;
    let credentials = EnvCredentials
        .get_credentials(workspace_id, PLATFORM_ADS)
        .await?;

    let store = Arc::new(PgStore::connect(&config.database_url).await?);
    let client = graph_client(config, &credentials.access_token)?;
    let api = Arc::new(GraphAdsClient::new(client, &credentials.account_id));

    let engine = AdsSync::new(store, api)
        .with_progress(Arc::new(ConsoleProgress::default()))
        .with_cancel(cancel_on_ctrl_c())
        .with_pool_config(config.pool);

    let summary = engine
        .run(&SyncOptions {
            workspace_id,
            days: args.days,
            scope: args.scope.into(),
        })
        .await?;

    let elapsed = summary.completed_at - summary.started_at;
    println!(
        "{} in {}s: {} campaigns, {} ad sets, {} ads, {} creatives, {} metric rows",
        match summary.status {
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
        },
        elapsed.num_seconds(),
        summary.campaigns_synced,
        summary.ad_sets_synced,
        summary.ads_synced,
        summary.creatives_synced,
        summary.metrics_synced,
    );
    if summary.entities_skipped + summary.metrics_skipped + summary.items_failed > 0 {
        println!(
            "skipped {} entities, {} metric rows; {} item fetches failed",
            summary.entities_skipped, summary.metrics_skipped, summary.items_failed
        );
    }
    Ok(())
}

async fn run_social(config: &Config, args: &SocialArgs) -> Result<()> {
    let workspace_id = resolve_workspace(args.workspace, config)?;
    let credentials = EnvCredentials
        .get_credentials(workspace_id, PLATFORM_SOCIAL)
        .await?;

    let store = Arc::new(PgStore::connect(&config.database_url).await?);
    let client = graph_client(config, &credentials.access_token)?;
    let api = Arc::new(GraphSocialClient::new(client, &credentials.account_id));

    let engine = SocialSync::new(store, api)
        .with_progress(Arc::new(ConsoleProgress::default()))
        .with_cancel(cancel_on_ctrl_c())
        .with_pool_config(config.pool);

    let summary = engine.run(workspace_id, args.days).await?;

    let elapsed = summary.completed_at - summary.started_at;
    println!(
        "{} in {}s: {} insight datapoints, {} media, {} media insight sets",
        match summary.status {
            RunStatus::Completed => "completed",
            RunStatus::Cancelled => "cancelled",
        },
        elapsed.num_seconds(),
        summary.user_insights,
        summary.media_fetched,
        summary.media_insights,
    );
    if summary.items_failed > 0 {
        println!("{} item fetches failed", summary.items_failed);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    info!(base_url = %config.api_base_url, "configuration loaded");

    match &cli.command {
        Command::Sync { target } => match target {
            SyncTarget::Ads(args) => run_ads(&config, args).await,
            SyncTarget::Social(args) => run_social(&config, args).await,
        },
        Command::Migrate => {
            let store = PgStore::connect(&config.database_url).await?;
            store.migrate().await?;
            println!("migrations applied");
            Ok(())
        }
    }
}
