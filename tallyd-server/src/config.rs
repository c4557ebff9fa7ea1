//! Environment-driven server configuration.
//!
//! Everything is read once at startup; missing required variables abort the
//! process with a message naming the variable.

use std::env;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use tallyd_core::CoordinatorSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    /// Swap Redis for the in-process store; local development only.
    pub dev_mode: bool,
    pub redis_url: String,

    pub namespace: String,
    pub max_retries: u32,
    pub lease_ttl: Duration,
    pub scheduler_interval: Duration,
    pub pipeline_timeout: Duration,
    pub max_concurrent_pipelines: usize,

    pub coordinator_public_key: String,
    pub session_key_address: String,
    pub session_key_approval: String,

    /// Header name carrying the shared webhook secret.
    pub webhook_secret_header: String,
    pub webhook_secret_value: String,

    pub proving_engine_url: String,
    pub signer_service_url: String,
    pub subgraph_project_id: String,
    pub subgraph_version: String,

    /// Origins allowed by the CORS layer; empty disables cross-origin access.
    pub allowed_origins: Vec<String>,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_required(key: &str) -> Result<String> {
    env::var(key).map_err(|_| anyhow!("{key} must be set"))
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw.parse().with_context(|| format!("invalid {key}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            server_host: env_or("SERVER_HOST", "0.0.0.0"),
            server_port: env_parse("SERVER_PORT", 8080)?,
            dev_mode: env_parse("DEV_MODE", false)?,
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1:6379"),

            namespace: env_or("COORDINATOR_NAMESPACE", "tallyd"),
            max_retries: env_parse("COORDINATOR_MAX_RETRIES", 3)?,
            lease_ttl: Duration::from_secs(env_parse("LEASE_TTL_SECS", 900)?),
            scheduler_interval: Duration::from_secs(env_parse(
                "SCHEDULER_INTERVAL_SECS",
                60,
            )?),
            pipeline_timeout: Duration::from_secs(env_parse(
                "PIPELINE_TIMEOUT_SECS",
                600,
            )?),
            max_concurrent_pipelines: env_parse("MAX_CONCURRENT_PIPELINES", 4)?,

            coordinator_public_key: env_required("COORDINATOR_PUBLIC_KEY")?,
            session_key_address: env_required("SESSION_KEY_ADDRESS")?,
            session_key_approval: env_required("SESSION_KEY_APPROVAL")?,

            webhook_secret_header: env_or("WEBHOOK_SECRET_HEADER", "x-webhook-secret"),
            webhook_secret_value: env_required("WEBHOOK_SECRET_VALUE")?,

            proving_engine_url: env_required("PROVING_ENGINE_URL")?,
            signer_service_url: env_required("SIGNER_SERVICE_URL")?,
            subgraph_project_id: env_required("SUBGRAPH_PROJECT_ID")?,
            subgraph_version: env_or("SUBGRAPH_VERSION", "v1"),

            allowed_origins: env::var("COORDINATOR_ALLOWED_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|origin| !origin.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            namespace: self.namespace.clone(),
            max_retries: self.max_retries,
            lease_ttl: self.lease_ttl,
            poll_interval: self.scheduler_interval,
            pipeline_timeout: self.pipeline_timeout,
            max_concurrent_pipelines: self.max_concurrent_pipelines,
            coordinator_public_key: self.coordinator_public_key.clone(),
            session_key_address: self.session_key_address.clone(),
            session_key_approval: self.session_key_approval.clone(),
        }
    }
}
