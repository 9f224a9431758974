use crate::allow_list::DomainAllowList;
use crate::config::RegisterConfig;
use crate::crawler::{CrawlSummary, Crawler, Scheduler};
use crate::extract::{Canonicalizer, Extractor};
use crate::fetch::{ExponentialBackoff, Fetcher, HttpFetcher, PageClient, ReqwestClient, RetryConfig};
use crate::pipeline::{Pipeline, UrlLocks};
use crate::rating::RatingEngine;
use crate::registry::Registry;
use crate::store::{AllowedDomainStore, GraphStore, RecordStore};
use crate::validate::{ShaclValidator, Validator};
use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::task;
use tracing::info;

/// Registry statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub records: u64,
    pub publishers: u64,
}

/// Everything one register process runs on.
pub struct AppState {
    config: Arc<RegisterConfig>,
    store: GraphStore,
    registry: Arc<Registry>,
    crawler: Arc<Crawler>,
}

impl AppState {
    /// Open the configured store and wire up the HTTP fetcher.
    pub async fn new(config: Arc<RegisterConfig>) -> Result<Self> {
        let store_dir = config.store_dir.clone();
        let store = task::spawn_blocking(move || GraphStore::from_config(store_dir.as_deref()))
            .await?
            .context("failed to open graph store")?;

        let client: Arc<dyn PageClient> = Arc::new(
            ReqwestClient::new(&config.user_agent, config.fetch_timeout)
                .context("failed to build HTTP client")?,
        );
        Self::with_client(config, store, client).await
    }

    /// Like [`AppState::new`] over an existing store and page client.
    pub async fn with_client(
        config: Arc<RegisterConfig>,
        store: GraphStore,
        client: Arc<dyn PageClient>,
    ) -> Result<Self> {
        let extractor = Extractor::new(Canonicalizer::new(&config.default_language));
        let fetcher: Arc<dyn Fetcher> = Arc::new(
            HttpFetcher::new(client, extractor)
                .with_max_pages(config.max_pages)
                .with_retry(Arc::new(ExponentialBackoff::new(RetryConfig {
                    max_attempts: config.fetch_attempts,
                    ..RetryConfig::default()
                }))),
        );

        let validator: Arc<dyn Validator> = match config.shapes_file.as_ref() {
            Some(path) => Arc::new(ShaclValidator::from_file(path)?),
            None => Arc::new(ShaclValidator::with_default_shapes()?),
        };

        let state = Self::from_parts(config, store, fetcher, validator);
        state.seed_allowed_domains().await?;
        Ok(state)
    }

    pub fn from_parts(
        config: Arc<RegisterConfig>,
        store: GraphStore,
        fetcher: Arc<dyn Fetcher>,
        validator: Arc<dyn Validator>,
    ) -> Self {
        let shared = Arc::new(store.clone());
        let pipeline = Arc::new(Pipeline::new(
            fetcher,
            validator,
            RatingEngine::default(),
            shared.clone(),
            shared.clone(),
        ));
        let locks = UrlLocks::new();
        let registry = Arc::new(Registry::new(
            DomainAllowList::new(shared.clone()),
            shared.clone(),
            pipeline.clone(),
            locks.clone(),
        ));
        let crawler = Arc::new(Crawler::new(shared, pipeline, locks));

        Self {
            config,
            store,
            registry,
            crawler,
        }
    }

    async fn seed_allowed_domains(&self) -> Result<()> {
        for domain in &self.config.allowed_domains {
            AllowedDomainStore::add(&self.store, domain)
                .await
                .with_context(|| format!("failed to seed allowed domain {domain}"))?;
        }
        if !self.config.allowed_domains.is_empty() {
            info!(domains = self.config.allowed_domains.len(), "allow-list seeded");
        }
        Ok(())
    }

    pub fn config(&self) -> Arc<RegisterConfig> {
        self.config.clone()
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn crawler(&self) -> &Arc<Crawler> {
        &self.crawler
    }

    /// Scheduler over this state's crawler.
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            self.crawler.clone(),
            self.config.crawl_interval,
            self.config.crawl_ttl,
        )
    }

    /// Crawl every registration older than the configured ttl, now.
    pub async fn crawl_now(&self) -> Result<CrawlSummary> {
        let ttl = chrono::Duration::from_std(self.config.crawl_ttl)?;
        Ok(self.crawler.crawl(Utc::now() - ttl).await?)
    }

    pub async fn stats(&self) -> Result<Stats> {
        Ok(Stats {
            records: self.store.count_records().await?,
            publishers: self.store.count_publishers().await?,
        })
    }
}
