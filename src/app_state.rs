use anyhow::{Context, Result};
use reqwest::Client as ReqwestClient;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::videogen::api::VideoGenApi;
use crate::videogen::generation::GenerationSettings;
use crate::videogen::models::veo3::{Veo3Client, Veo3Config};
use crate::videogen::session::SessionRegistry;
use crate::videogen::types::ApiKey;

/// Builds a vendor client bound to one user's key
pub type ApiFactory = Arc<dyn Fn(ApiKey) -> Arc<dyn VideoGenApi> + Send + Sync>;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub sessions: Arc<SessionRegistry>,
    pub settings: GenerationSettings,
    api_factory: ApiFactory,
}

impl AppState {
    pub fn new(app_config: AppConfig) -> Result<Self> {
        let http = ReqwestClient::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;

        let veo3_config = app_config.veo3_config();
        Ok(Self::with_api_factory(
            app_config,
            veo3_api_factory(http, veo3_config),
        ))
    }

    pub fn with_api_factory(app_config: AppConfig, api_factory: ApiFactory) -> Self {
        Self {
            settings: app_config.generation_settings(),
            config: app_config,
            sessions: Arc::new(SessionRegistry::new()),
            api_factory,
        }
    }

    pub fn videogen_api(&self, api_key: ApiKey) -> Arc<dyn VideoGenApi> {
        (self.api_factory)(api_key)
    }
}

fn veo3_api_factory(http: ReqwestClient, config: Veo3Config) -> ApiFactory {
    Arc::new(move |api_key: ApiKey| -> Arc<dyn VideoGenApi> {
        Arc::new(Veo3Client::new(http.clone(), config.clone(), api_key))
    })
}

