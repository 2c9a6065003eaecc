use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::consts::{DEFAULT_ARTIFACT_PREFIX, GEMINI_API_BASE_URL, VEO3_MODEL_ID};
use crate::videogen::generation::GenerationSettings;
use crate::videogen::models::veo3::Veo3Config;
use crate::videogen::poller::{PollOptions, RetryPolicy};

const CONFIG_PATH_ENV: &str = "VEO_AGENT_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "veo-agent.toml";
const ENV_PREFIX: &str = "VEO_AGENT";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_model_id")]
    pub model_id: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Unset means wait as long as the vendor takes
    #[serde(default)]
    pub max_wait_secs: Option<u64>,
    #[serde(default)]
    pub transient_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Falls back to the OS temp directory
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
    #[serde(default = "default_artifact_prefix")]
    pub artifact_prefix: String,
    /// Sessions untouched for this long are dropped with their video
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
    #[serde(default = "default_session_sweep_interval_secs")]
    pub session_sweep_interval_secs: u64,
    #[serde(default)]
    pub sentry_dsn: Option<String>,
    #[serde(default = "default_sentry_traces_sample_rate")]
    pub sentry_traces_sample_rate: f32,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_api_base_url() -> String {
    GEMINI_API_BASE_URL.to_string()
}

fn default_model_id() -> String {
    VEO3_MODEL_ID.to_string()
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_retry_backoff_ms() -> u64 {
    2000
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_artifact_prefix() -> String {
    DEFAULT_ARTIFACT_PREFIX.to_string()
}

fn default_session_idle_secs() -> u64 {
    3600
}

fn default_session_sweep_interval_secs() -> u64 {
    300
}

fn default_sentry_traces_sample_rate() -> f32 {
    0.5
}

impl AppConfig {
    /// Optional TOML file (path from `VEO_AGENT_CONFIG`), then `VEO_AGENT_*` env vars.
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let builder = Config::builder()
            .add_source(File::with_name(&path).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));

        let conf: AppConfig = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        conf.validate()?;
        Ok(conf)
    }

    pub fn from_toml(toml: &str) -> Result<Self> {
        let conf: AppConfig = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        conf.validate()?;
        Ok(conf)
    }

    fn validate(&self) -> Result<()> {
        self.socket_addr()?;
        reqwest::Url::parse(&self.api_base_url)
            .with_context(|| format!("api_base_url is not a valid URL: {}", self.api_base_url))?;
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be greater than zero");
        }
        if self.session_idle_secs == 0 || self.session_sweep_interval_secs == 0 {
            anyhow::bail!("session_idle_secs and session_sweep_interval_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.bind_addr
            .parse()
            .with_context(|| format!("bind_addr is not a socket address: {}", self.bind_addr))
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    pub fn poll_options(&self) -> PollOptions {
        PollOptions {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            max_wait: self.max_wait_secs.map(Duration::from_secs),
            retry: RetryPolicy {
                max_retries: self.transient_retries,
                initial_backoff: Duration::from_millis(self.retry_backoff_ms),
            },
        }
    }

    pub fn generation_settings(&self) -> GenerationSettings {
        GenerationSettings {
            poll: self.poll_options(),
            scratch_dir: self.scratch_dir(),
            artifact_prefix: self.artifact_prefix.clone(),
        }
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }

    pub fn session_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session_sweep_interval_secs)
    }

    pub fn veo3_config(&self) -> Veo3Config {
        Veo3Config {
            base_url: self.api_base_url.clone(),
            model_id: self.model_id.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}
