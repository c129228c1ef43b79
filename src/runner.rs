use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

use crate::config::{Config, SourceKind};
use crate::error::SyncError;
use crate::http::RetryPolicy;
use crate::notion::NotionRepository;
use crate::source::build_source;
use crate::sync::{RunAborted, SyncDriver, SyncReport};

/// Starts one complete sync run. The HTTP trigger and the schedule go through
/// this so tests can swap in a scripted run.
#[async_trait]
pub trait SyncLauncher: Send + Sync {
    async fn launch(&self) -> Result<SyncReport, RunAborted>;
}

/// Builds fresh clients from the loaded config for every run.
pub struct ConfiguredLauncher {
    config: Config,
}

impl ConfiguredLauncher {
    pub fn new(config: Config) -> Self {
        ConfiguredLauncher { config }
    }

    pub fn source_label(&self) -> &str {
        match self.config.source.kind {
            SourceKind::Weread => &self.config.weread.label,
            SourceKind::Kindle => &self.config.kindle.label,
        }
    }

    pub fn driver(&self) -> Result<SyncDriver, SyncError> {
        let cfg = &self.config;
        let source = build_source(cfg)?;
        let repo = Arc::new(NotionRepository::new(
            &cfg.notion,
            RetryPolicy::from_options(&cfg.sync),
            cfg.sync.request_timeout_seconds,
        )?);
        Ok(SyncDriver::new(source, repo, &cfg.notion, cfg.sync.clone()))
    }
}

#[async_trait]
impl SyncLauncher for ConfiguredLauncher {
    async fn launch(&self) -> Result<SyncReport, RunAborted> {
        let driver = self.driver().map_err(|error| RunAborted {
            report: SyncReport::empty(self.source_label(), Utc::now()),
            error,
        })?;
        driver.run().await
    }
}
