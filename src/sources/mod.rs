use crate::config::{AppConfig, FetchConfig};
use crate::types::{RawItem, Result, SourceKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::sync::Arc;
use tracing::info;

pub mod arxiv;
pub mod rss;
pub mod webpage;

pub use arxiv::ArxivConnector;
pub use rss::FeedConnector;
pub use webpage::WebpageConnector;

/// Contract every source implements: fetch items newer than `since`,
/// in the source's native shape. Connectors are independent; a failure
/// here is isolated per source by the harvester and never cancels
/// siblings.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Human-readable name, used in logs and failure notes.
    fn name(&self) -> String;

    async fn fetch(&self, since: DateTime<Utc>) -> Result<Vec<RawItem>>;
}

/// Shared HTTP client construction: bounded timeout, compression,
/// custom user agent.
pub fn build_client(config: &FetchConfig) -> Client {
    Client::builder()
        .user_agent(&config.user_agent)
        .timeout(config.timeout)
        .gzip(true)
        .deflate(true)
        .brotli(true)
        .build()
        .expect("Failed to create HTTP client")
}

/// Instantiate every connector enabled in the configuration.
pub fn enabled_connectors(config: &AppConfig) -> Vec<Arc<dyn SourceConnector>> {
    let mut connectors: Vec<Arc<dyn SourceConnector>> = Vec::new();

    if config.sources.arxiv_enabled {
        connectors.push(Arc::new(ArxivConnector::new(
            &config.fetch,
            config.sources.arxiv_categories.clone(),
            config.sources.arxiv_max_results,
        )));
    }
    if config.sources.feed_enabled && !config.sources.feed_urls.is_empty() {
        connectors.push(Arc::new(FeedConnector::new(
            &config.fetch,
            config.sources.feed_urls.clone(),
        )));
    }
    if config.sources.scrape_enabled && !config.sources.scrape_pages.is_empty() {
        connectors.push(Arc::new(WebpageConnector::new(
            &config.fetch,
            config.sources.scrape_pages.clone(),
        )));
    }

    info!("enabled {} source connectors", connectors.len());
    connectors
}
