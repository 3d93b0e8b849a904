//! Environment-backed configuration and credentials.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use uuid::Uuid;

use relay_platforms::PoolConfig;
use relay_sync::{CredentialError, Credentials, CredentialsProvider, PLATFORM_ADS, PLATFORM_SOCIAL};

const DEFAULT_API_BASE_URL: &str = "https://graph.example.com/v19.0";

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => Ok(value),
            Err(_) => bail!("{key} has an unparseable value: {raw:?}"),
        },
        Err(_) => Ok(default),
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub api_base_url: String,
    pub http_timeout: Duration,
    pub rate_limit: Duration,
    pub pool: PoolConfig,
    /// Default workspace when `--workspace` is not given.
    pub workspace_id: Option<Uuid>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let api_base_url =
            env::var("RELAY_API_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string());
        let http_timeout = Duration::from_secs(env_parse("RELAY_HTTP_TIMEOUT_SECS", 20u64)?);
        let rate_limit = Duration::from_millis(env_parse("RELAY_RATE_LIMIT_MS", 200u64)?);
        let pool = PoolConfig {
            concurrency: env_parse("RELAY_ENRICH_CONCURRENCY", 5usize)?,
            max_items: env_parse("RELAY_ENRICH_MAX_ITEMS", 500usize)?,
        };
        let workspace_id = match env::var("RELAY_WORKSPACE_ID") {
            Ok(raw) => Some(
                Uuid::parse_str(raw.trim())
                    .context("RELAY_WORKSPACE_ID is not a valid UUID")?,
            ),
            Err(_) => None,
        };
        Ok(Self {
            database_url,
            api_base_url,
            http_timeout,
            rate_limit,
            pool,
            workspace_id,
        })
    }
}

/// Reads platform credentials from the process environment. A stand-in
/// for a real secrets backend; the engine only sees the trait.
pub struct EnvCredentials;

fn required(platform_key: &str, workspace_id: Uuid, key: &str) -> Result<String, CredentialError> {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| CredentialError::Missing {
            workspace_id,
            platform_key: platform_key.to_string(),
        })
}

#[async_trait]
impl CredentialsProvider for EnvCredentials {
    async fn get_credentials(
        &self,
        workspace_id: Uuid,
        platform_key: &str,
    ) -> Result<Credentials, CredentialError> {
        let (token_key, account_key) = match platform_key {
            key if key == PLATFORM_ADS => ("RELAY_ADS_ACCESS_TOKEN", "RELAY_ADS_ACCOUNT_ID"),
            key if key == PLATFORM_SOCIAL => ("RELAY_SOCIAL_ACCESS_TOKEN", "RELAY_SOCIAL_USER_ID"),
            other => {
                return Err(CredentialError::Invalid {
                    platform_key: other.to_string(),
                    reason: "unknown platform".to_string(),
                })
            }
        };
        Ok(Credentials {
            access_token: required(platform_key, workspace_id, token_key)?,
            account_id: required(platform_key, workspace_id, account_key)?,
            extra: Default::default(),
        })
    }
}
